use super::*;

/// In-process source whose units are pushed at runtime.
///
/// Cloning yields another handle to the same units, so a test can keep
/// pushing after handing the source to a query.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    units: Arc<Mutex<Vec<(UnitId, Arc<[u8]>)>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit with a generated id; returns the id.
    pub fn push(&self, bytes: impl Into<Vec<u8>>) -> Result<UnitId> {
        let bytes: Vec<u8> = bytes.into();
        let mut units = self.lock()?;
        let id = UnitId::new(format!("unit-{:06}", units.len()));
        units.push((id.clone(), Arc::from(bytes)));
        Ok(id)
    }

    /// Append a unit made of newline-joined `lines`.
    pub fn push_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<UnitId> {
        let joined = lines
            .iter()
            .map(|l| l.as_ref())
            .collect::<Vec<_>>()
            .join("\n");
        self.push(joined)
    }

    /// Append a unit under an explicit id. Ids must be unique.
    pub fn push_named(&self, id: impl Into<UnitId>, bytes: impl Into<Vec<u8>>) -> Result<()> {
        let id = id.into();
        let bytes: Vec<u8> = bytes.into();
        let mut units = self.lock()?;
        if units.iter().any(|(existing, _)| *existing == id) {
            return Err(anyhow!("unit {id} already exists"));
        }
        units.push((id, Arc::from(bytes)));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|units| units.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<(UnitId, Arc<[u8]>)>>> {
        self.units
            .lock()
            .map_err(|_| anyhow!("memory source lock poisoned"))
    }
}

impl Source for MemorySource {
    fn list_new_units(&self, cursor: &BatchCursor, limit: Option<usize>) -> Result<Vec<UnitId>> {
        Ok(self
            .lock()?
            .iter()
            .map(|(id, _)| id)
            .filter(|id| !cursor.contains(id))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn read_unit(&self, id: &UnitId) -> Result<Vec<u8>> {
        self.lock()?
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, bytes)| bytes.to_vec())
            .ok_or_else(|| anyhow!("unit {id} not found in memory source"))
    }

    fn describe(&self) -> String {
        format!("memory({} units)", self.len())
    }
}
