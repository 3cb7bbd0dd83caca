use super::*;

/// Generated identity of a started query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryId(pub uuid::Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for QueryId {
    type Err = QueryError;

    fn from_str(s: &str) -> QueryResult<Self> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| QueryError::config(format!("invalid query id '{s}': {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Active,
    Stopped,
    Failed,
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

/// Where the scheduler is within a cycle.
///
/// ```text
/// Idle -> Discovering -> Decoding -> Merging -> Emitting -> Idle
///   \__________________________________________________/
///                          |
///                       Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Discovering,
    Decoding,
    Merging,
    Emitting,
    Stopped,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Decoding => "decoding",
            Self::Merging => "merging",
            Self::Emitting => "emitting",
            Self::Stopped => "stopped",
        })
    }
}

/// Position of the committed cursor, without the full set of seen units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Id the next committed batch will carry.
    pub next_batch_id: BatchId,
    pub last_unit: Option<UnitId>,
    pub units_seen: usize,
}

impl From<&BatchCursor> for CursorPosition {
    fn from(cursor: &BatchCursor) -> Self {
        Self {
            next_batch_id: cursor.batch_id,
            last_unit: cursor.last_unit.clone(),
            units_seen: cursor.seen.len(),
        }
    }
}

/// Point-in-time status of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStatus {
    pub id: QueryId,
    pub name: Option<String>,
    pub state: QueryState,
    pub phase: CyclePhase,
    pub message: String,
    pub last_error: Option<String>,
    /// Committed cycles, excluding no-op cycles that found no input.
    pub cycles_run: u64,
    pub consecutive_failures: u32,
    pub last_cursor: CursorPosition,
    pub watermark: Option<EventTime>,
}

impl QueryStatus {
    pub(crate) fn new(id: QueryId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            state: QueryState::Active,
            phase: CyclePhase::Idle,
            message: "initializing".to_string(),
            last_error: None,
            cycles_run: 0,
            consecutive_failures: 0,
            last_cursor: CursorPosition::default(),
            watermark: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == QueryState::Active
    }
}

/// Metrics of one committed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryProgress {
    pub id: QueryId,
    pub name: Option<String>,
    pub batch_id: BatchId,
    pub units: Vec<UnitId>,
    /// Rows decoded and projected into events.
    pub input_rows: u64,
    /// Malformed lines and rows without a time or group value.
    pub skipped_rows: u64,
    /// Window contributions dropped behind the watermark.
    pub late_rows: u64,
    pub emitted_rows: u64,
    pub state_rows: u64,
    pub evicted_rows: u64,
    pub watermark: Option<EventTime>,
    pub duration_ms: u64,
    /// Wall-clock commit time, epoch millis.
    pub timestamp: i64,
}

/// Bounded history of recent progress reports.
pub const PROGRESS_HISTORY: usize = 100;
