use super::*;

/// Files in one directory, each file one unit.
///
/// Files are ordered by modification time, then by name. Hidden files
/// (`.` prefix), in-progress files (`_` prefix, `.tmp` or `~` suffix) and
/// sub-directories are ignored. An optional extension filter restricts the
/// listing further.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    extension: Option<String>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: None,
        }
    }

    /// Only list files ending in `.<ext>`.
    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        let ext = ext.into();
        self.extension = Some(ext.trim_start_matches('.').to_string());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn accepts(&self, name: &str) -> bool {
        if name.starts_with('.') || name.starts_with('_') {
            return false;
        }
        if name.ends_with(".tmp") || name.ends_with('~') {
            return false;
        }
        match &self.extension {
            Some(ext) => Path::new(name)
                .extension()
                .is_some_and(|e| e.to_string_lossy() == ext.as_str()),
            None => true,
        }
    }
}

impl Source for DirectorySource {
    fn list_new_units(&self, cursor: &BatchCursor, limit: Option<usize>) -> Result<Vec<UnitId>> {
        let mut files: Vec<(SystemTime, String)> = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("read_dir failed for {}", self.dir.display()))?
        {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.accepts(&name) {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, name));
        }
        files.sort();
        Ok(files
            .into_iter()
            .map(|(_, name)| UnitId::new(name))
            .filter(|id| !cursor.contains(id))
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn read_unit(&self, id: &UnitId) -> Result<Vec<u8>> {
        let path = self.dir.join(id.as_str());
        fs::read(&path).with_context(|| format!("read {} failed", path.display()))
    }

    fn describe(&self) -> String {
        format!("directory({})", self.dir.display())
    }
}
