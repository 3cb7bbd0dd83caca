use std::path::PathBuf;

use streamtally_core::query::{QueryHandle, SinkTarget, Trigger};
use streamtally_core::sink::OutputMode;
use streamtally_core::{QueryError, QueryResult};
use tracing::info;

use crate::stream::WindowedAggregation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkChoice {
    Console,
    Memory,
}

/// Chooses where and how often results are written, then starts the query.
pub struct StreamWriter<'a> {
    aggregation: WindowedAggregation<'a>,
    name: Option<String>,
    output_mode: OutputMode,
    trigger: Trigger,
    sink: SinkChoice,
    checkpoint_location: Option<PathBuf>,
}

impl<'a> StreamWriter<'a> {
    pub(crate) fn new(aggregation: WindowedAggregation<'a>) -> Self {
        Self {
            aggregation,
            name: None,
            output_mode: OutputMode::default(),
            trigger: Trigger::default(),
            sink: SinkChoice::Console,
            checkpoint_location: None,
        }
    }

    /// Name the query. The memory sink publishes under this name.
    pub fn query_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Publish results to a memory table named after the query.
    pub fn memory(mut self) -> Self {
        self.sink = SinkChoice::Memory;
        self
    }

    pub fn console(mut self) -> Self {
        self.sink = SinkChoice::Console;
        self
    }

    pub fn checkpoint_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_location = Some(path.into());
        self
    }

    /// Validate the whole chain and start the query.
    pub fn start(self) -> QueryResult<QueryHandle> {
        let mut config = self
            .aggregation
            .to_config()?
            .with_output_mode(self.output_mode);

        let mut trigger = self.trigger;
        if trigger.max_units_per_cycle.is_none() {
            trigger.max_units_per_cycle = self.aggregation.max_units_per_trigger();
        }
        config = config.with_trigger(trigger);

        if let Some(name) = &self.name {
            config = config.with_name(name.clone());
        }
        config = match (self.sink, &self.name) {
            (SinkChoice::Memory, Some(name)) => config.with_memory_table(name.clone()),
            (SinkChoice::Memory, None) => {
                return Err(QueryError::config("a memory sink requires a query name"))
            }
            (SinkChoice::Console, _) => config.with_sink(SinkTarget::Console),
        };
        if let Some(path) = self.checkpoint_location {
            config = config.with_checkpoint_location(path);
        }

        let session = self.aggregation.session();
        let handle = session
            .manager
            .start(config, self.aggregation.source())?;
        info!(
            session = session.name(),
            query = %handle.id(),
            name = ?handle.name(),
            "started query from session"
        );
        Ok(handle)
    }
}
