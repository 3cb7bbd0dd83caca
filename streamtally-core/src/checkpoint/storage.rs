use super::*;

/// Storage interface for query checkpoints, keyed by batch id.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &QueryCheckpoint) -> Result<()>;
    /// The checkpoint with the highest batch id, if any.
    fn latest(&self) -> Result<Option<QueryCheckpoint>>;
    fn list(&self) -> Result<Vec<BatchId>>;
    fn purge(&self, keep_last_n: usize) -> Result<()>;
}

/// In-memory checkpoint storage for tests and local single-process execution.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<BatchId, Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, checkpoint: &QueryCheckpoint) -> Result<()> {
        let bytes = checkpoint.encode()?;
        self.checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint store lock poisoned"))?
            .insert(checkpoint.batch_id, bytes);
        Ok(())
    }

    fn latest(&self) -> Result<Option<QueryCheckpoint>> {
        let guard = self
            .checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint store lock poisoned"))?;
        guard
            .values()
            .next_back()
            .map(|bytes| QueryCheckpoint::decode(bytes))
            .transpose()
    }

    fn list(&self) -> Result<Vec<BatchId>> {
        Ok(self
            .checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint store lock poisoned"))?
            .keys()
            .copied()
            .collect())
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let mut guard = self
            .checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint store lock poisoned"))?;
        while guard.len() > keep_last_n {
            guard.pop_first();
        }
        Ok(())
    }
}

/// File-system checkpoint storage: one `batch-<id>.bin` file per checkpoint.
///
/// Files are written under a temporary name and renamed into place, so a
/// crash mid-write never leaves a truncated checkpoint behind.
pub struct FsCheckpointStore {
    base_path: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).with_context(|| {
            format!(
                "failed to create checkpoint directory {}",
                base_path.display()
            )
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn checkpoint_path(&self, batch_id: BatchId) -> PathBuf {
        self.base_path.join(format!("batch-{batch_id}.bin"))
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn save(&self, checkpoint: &QueryCheckpoint) -> Result<()> {
        let bytes = checkpoint.encode()?;
        let path = self.checkpoint_path(checkpoint.batch_id);
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, bytes)
            .with_context(|| format!("write checkpoint {} failed", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("publish checkpoint {} failed", path.display()))
    }

    fn latest(&self) -> Result<Option<QueryCheckpoint>> {
        let Some(batch_id) = self.list()?.last().copied() else {
            return Ok(None);
        };
        let path = self.checkpoint_path(batch_id);
        let bytes = fs::read(&path)
            .with_context(|| format!("read checkpoint {} failed", path.display()))?;
        QueryCheckpoint::decode(&bytes).map(Some)
    }

    fn list(&self) -> Result<Vec<BatchId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_path)
            .with_context(|| format!("read_dir failed for {}", self.base_path.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id_part) = name
                .strip_prefix("batch-")
                .and_then(|rest| rest.strip_suffix(".bin"))
            {
                if let Ok(id) = id_part.parse::<BatchId>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let ids = self.list()?;
        if ids.len() <= keep_last_n {
            return Ok(());
        }
        let purge_count = ids.len() - keep_last_n;
        for batch_id in ids.into_iter().take(purge_count) {
            let path = self.checkpoint_path(batch_id);
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}
