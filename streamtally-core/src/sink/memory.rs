use super::*;

/// A named in-memory result table.
///
/// Readers take an `Arc` snapshot of the current table; a write builds the
/// next table off to the side and swaps the pointer, so readers never see a
/// half-applied batch and never block the writer for longer than the swap.
#[derive(Debug, Clone)]
pub struct MemorySink {
    name: String,
    table: Arc<RwLock<Arc<ResultTable>>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Arc::new(RwLock::new(Arc::new(ResultTable::new()))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current table contents.
    pub fn table(&self) -> Arc<ResultTable> {
        match self.table.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

impl Sink for MemorySink {
    fn write(&self, batch_id: BatchId, rows: &[EmittedRow], mode: OutputMode) -> Result<()> {
        let current = self.table();
        if current.batch_id().is_some_and(|applied| batch_id <= applied) {
            return Ok(());
        }
        let next = Arc::new(current.apply(batch_id, rows, mode));
        *self
            .table
            .write()
            .map_err(|_| anyhow!("memory table '{}' lock poisoned", self.name))? = next;
        Ok(())
    }

    fn supports(&self, _mode: OutputMode) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("memory({})", self.name)
    }
}
