use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use streamtally_core::query::QueryConfig;
use streamtally_core::schema::{Schema, SchemaPolicy};
use streamtally_core::source::{DirectorySource, MemorySource, Source};
use streamtally_core::state::AggregateSpec;
use streamtally_core::window::WindowSpec;
use streamtally_core::{QueryError, QueryResult};

use crate::session::StreamingSession;
use crate::writer::StreamWriter;

/// Describes a streaming input.
///
/// Created by [`StreamingSession::read_stream`]. A schema is mandatory: input
/// is never inferred.
pub struct StreamReader<'a> {
    session: &'a StreamingSession,
    schema: Option<Schema>,
    schema_policy: SchemaPolicy,
    max_units_per_trigger: Option<usize>,
}

impl<'a> StreamReader<'a> {
    pub(crate) fn new(session: &'a StreamingSession) -> Self {
        Self {
            session,
            schema: None,
            schema_policy: SchemaPolicy::default(),
            max_units_per_trigger: None,
        }
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.schema_policy = policy;
        self
    }

    /// Consume at most `n` input units per cycle.
    pub fn max_units_per_trigger(mut self, n: usize) -> Self {
        self.max_units_per_trigger = Some(n);
        self
    }

    /// Stream JSON-lines files as they appear in `dir`.
    pub fn json_dir(self, dir: impl Into<PathBuf>) -> QueryResult<StreamFrame<'a>> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(QueryError::config(format!(
                "input directory {} does not exist",
                dir.display()
            )));
        }
        self.source(Arc::new(DirectorySource::new(dir)))
    }

    /// Stream units pushed into `source`.
    pub fn memory(self, source: MemorySource) -> QueryResult<StreamFrame<'a>> {
        self.source(Arc::new(source))
    }

    pub fn source(self, source: Arc<dyn Source>) -> QueryResult<StreamFrame<'a>> {
        let schema = self.schema.ok_or_else(|| {
            QueryError::config("a schema must be declared before reading a stream")
        })?;
        Ok(StreamFrame {
            session: self.session,
            source,
            schema,
            schema_policy: self.schema_policy,
            max_units_per_trigger: self.max_units_per_trigger,
            watermark_delay: None,
            window: None,
            group_by: None,
        })
    }
}

/// An unbounded, schema-typed input, shaped by window and grouping.
pub struct StreamFrame<'a> {
    session: &'a StreamingSession,
    source: Arc<dyn Source>,
    schema: Schema,
    schema_policy: SchemaPolicy,
    max_units_per_trigger: Option<usize>,
    watermark_delay: Option<Duration>,
    window: Option<(String, WindowSpec)>,
    group_by: Option<String>,
}

impl<'a> StreamFrame<'a> {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Treat windows ending more than `delay` before the latest event time as
    /// closed.
    pub fn with_watermark(mut self, delay: Duration) -> Self {
        self.watermark_delay = Some(delay);
        self
    }

    /// Tumbling event-time windows of `size` over `time_field`.
    pub fn window(self, time_field: impl Into<String>, size: Duration) -> Self {
        self.window_spec(time_field, WindowSpec::tumbling(size))
    }

    /// Overlapping windows of `size`, one starting every `slide`.
    pub fn sliding_window(
        self,
        time_field: impl Into<String>,
        size: Duration,
        slide: Duration,
    ) -> Self {
        self.window_spec(time_field, WindowSpec::sliding(size, slide))
    }

    pub fn window_spec(mut self, time_field: impl Into<String>, spec: WindowSpec) -> Self {
        self.window = Some((time_field.into(), spec));
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by = Some(field.into());
        self
    }

    pub fn count(self) -> WindowedAggregation<'a> {
        self.agg(AggregateSpec::Count)
    }

    pub fn sum(self, field: impl Into<String>) -> WindowedAggregation<'a> {
        self.agg(AggregateSpec::sum(field))
    }

    pub fn min(self, field: impl Into<String>) -> WindowedAggregation<'a> {
        self.agg(AggregateSpec::min(field))
    }

    pub fn max(self, field: impl Into<String>) -> WindowedAggregation<'a> {
        self.agg(AggregateSpec::max(field))
    }

    pub fn agg(self, aggregate: AggregateSpec) -> WindowedAggregation<'a> {
        WindowedAggregation {
            frame: self,
            aggregate,
        }
    }
}

/// A fully described aggregation, ready to be written somewhere.
pub struct WindowedAggregation<'a> {
    frame: StreamFrame<'a>,
    aggregate: AggregateSpec,
}

impl<'a> WindowedAggregation<'a> {
    pub fn write_stream(self) -> StreamWriter<'a> {
        StreamWriter::new(self)
    }

    pub(crate) fn session(&self) -> &'a StreamingSession {
        self.frame.session
    }

    pub(crate) fn source(&self) -> Arc<dyn Source> {
        Arc::clone(&self.frame.source)
    }

    pub(crate) fn max_units_per_trigger(&self) -> Option<usize> {
        self.frame.max_units_per_trigger
    }

    /// The query configuration this chain describes, with default sink and
    /// trigger.
    pub fn to_config(&self) -> QueryResult<QueryConfig> {
        let frame = &self.frame;
        let (time_field, window) = frame
            .window
            .clone()
            .ok_or_else(|| QueryError::config("an aggregation requires a window"))?;
        let group_by = frame
            .group_by
            .clone()
            .ok_or_else(|| QueryError::config("an aggregation requires a group-by field"))?;

        let mut config = QueryConfig::new(frame.schema.clone(), window, time_field, group_by)
            .with_schema_policy(frame.schema_policy)
            .with_aggregate(self.aggregate.clone());
        if let Some(delay) = frame.watermark_delay {
            config = config.with_watermark_delay(delay);
        }
        Ok(config)
    }
}
