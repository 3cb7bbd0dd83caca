use super::*;

/// When the scheduler runs a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerMode {
    /// One cycle per `interval`, aligned to the time the previous cycle started.
    ProcessingTime {
        #[serde(with = "crate::interval::serde_interval")]
        interval: Duration,
    },
    /// Cycles back to back while input is available; idle polling otherwise.
    #[default]
    AsAvailable,
    /// Process everything currently available, then stop.
    AvailableNow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(flatten)]
    pub mode: TriggerMode,
    /// Upper bound on units consumed by one cycle; `None` takes everything.
    #[serde(default)]
    pub max_units_per_cycle: Option<usize>,
}

impl Trigger {
    pub fn processing_time(interval: Duration) -> Self {
        Self {
            mode: TriggerMode::ProcessingTime { interval },
            max_units_per_cycle: None,
        }
    }

    pub fn as_available() -> Self {
        Self::default()
    }

    pub fn available_now() -> Self {
        Self {
            mode: TriggerMode::AvailableNow,
            max_units_per_cycle: None,
        }
    }

    pub fn with_max_units_per_cycle(mut self, max_units: usize) -> Self {
        self.max_units_per_cycle = Some(max_units);
        self
    }
}

/// Retry budget for per-cycle failures.
///
/// A query fails once a cycle has failed `max_retries + 1` times in a row.
/// Waits between attempts double from `initial_backoff` up to `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "crate::interval::serde_interval")]
    pub initial_backoff: Duration,
    #[serde(with = "crate::interval::serde_interval")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
        }
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether `consecutive_failures` is still within budget.
    pub fn allows(&self, consecutive_failures: u32) -> bool {
        consecutive_failures <= self.max_retries
    }
}

/// Where emitted rows go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkTarget {
    /// A named in-memory table, readable through [`QueryManager::table`].
    Memory { table: String },
    Console,
}

impl Default for SinkTarget {
    fn default() -> Self {
        Self::Console
    }
}

/// Declarative definition of one streaming query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub schema: Schema,
    #[serde(default)]
    pub schema_policy: SchemaPolicy,
    pub window: WindowSpec,
    pub time_field: String,
    pub group_by: String,
    #[serde(default = "default_aggregate")]
    pub aggregate: AggregateSpec,
    #[serde(default)]
    pub output_mode: OutputMode,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub sink: SinkTarget,
    /// Enables the event-time watermark: `max event time seen - delay`.
    #[serde(default, with = "crate::interval::serde_opt_interval")]
    pub watermark_delay: Option<Duration>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub checkpoint_location: Option<PathBuf>,
}

fn default_aggregate() -> AggregateSpec {
    AggregateSpec::Count
}

impl QueryConfig {
    /// A count query in complete mode, printing to the console.
    pub fn new(
        schema: Schema,
        window: WindowSpec,
        time_field: impl Into<String>,
        group_by: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            schema,
            schema_policy: SchemaPolicy::default(),
            window,
            time_field: time_field.into(),
            group_by: group_by.into(),
            aggregate: default_aggregate(),
            output_mode: OutputMode::default(),
            trigger: Trigger::default(),
            sink: SinkTarget::default(),
            watermark_delay: None,
            retry: RetryPolicy::default(),
            checkpoint_location: None,
        }
    }

    pub fn from_json(json: &str) -> QueryResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| QueryError::config(format!("invalid query config: {e}")))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.schema_policy = policy;
        self
    }

    pub fn with_aggregate(mut self, aggregate: AggregateSpec) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_sink(mut self, sink: SinkTarget) -> Self {
        self.sink = sink;
        self
    }

    /// Shorthand for a memory sink named `table`.
    pub fn with_memory_table(self, table: impl Into<String>) -> Self {
        self.with_sink(SinkTarget::Memory {
            table: table.into(),
        })
    }

    pub fn with_watermark_delay(mut self, delay: Duration) -> Self {
        self.watermark_delay = Some(delay);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_checkpoint_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_location = Some(path.into());
        self
    }

    /// Check the configuration without starting anything.
    pub fn validate(&self) -> QueryResult<()> {
        self.compile().map(|_| ())
    }

    pub(crate) fn compile(&self) -> QueryResult<QueryPlan> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(QueryError::config("query name must not be empty"));
            }
        }
        if let SinkTarget::Memory { table } = &self.sink {
            if table.trim().is_empty() {
                return Err(QueryError::config("memory table name must not be empty"));
            }
        }
        if self.output_mode == OutputMode::Append && self.watermark_delay.is_none() {
            return Err(QueryError::config(
                "append output mode requires a watermark delay",
            ));
        }
        if let TriggerMode::ProcessingTime { interval } = self.trigger.mode {
            if interval.is_zero() {
                return Err(QueryError::config("processing-time interval must be positive"));
            }
        }
        if self.trigger.max_units_per_cycle == Some(0) {
            return Err(QueryError::config("max_units_per_cycle must be at least 1"));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(QueryError::config(
                "retry initial_backoff must not exceed max_backoff",
            ));
        }

        let assigner = self.window.build()?;
        let projection = EventProjection::new(
            &self.schema,
            &self.time_field,
            &self.group_by,
            self.aggregate.measure_field(),
        )?;
        let decoder = JsonLinesDecoder::new(Arc::new(self.schema.clone()), self.schema_policy);

        Ok(QueryPlan {
            assigner,
            decoder,
            projection,
            kind: self.aggregate.kind(),
            watermark: self.watermark_delay.map(WatermarkPolicy::new),
            output_mode: self.output_mode,
            trigger: self.trigger,
            retry: self.retry,
        })
    }
}

/// A validated configuration, resolved into the pieces a scheduler runs.
#[derive(Debug)]
pub(crate) struct QueryPlan {
    pub assigner: Box<dyn WindowAssigner>,
    pub decoder: JsonLinesDecoder,
    pub projection: EventProjection,
    pub kind: AggregateKind,
    pub watermark: Option<WatermarkPolicy>,
    pub output_mode: OutputMode,
    pub trigger: Trigger,
    pub retry: RetryPolicy,
}
