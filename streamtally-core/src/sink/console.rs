use super::*;

/// Prints every batch to a writer (stdout by default).
pub struct ConsoleSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ConsoleSink {
    fn write(&self, batch_id: BatchId, rows: &[EmittedRow], mode: OutputMode) -> Result<()> {
        let rule = "-".repeat(43);
        let body = render_rows(rows.iter().map(|row| (&row.key, &row.value)));
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("console sink lock poisoned"))?;
        write!(out, "{rule}\nBatch: {batch_id} ({mode})\n{rule}\n{body}\n")?;
        out.flush()?;
        Ok(())
    }

    fn supports(&self, _mode: OutputMode) -> bool {
        true
    }

    fn describe(&self) -> String {
        "console".to_string()
    }
}
