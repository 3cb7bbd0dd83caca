use serde::{Deserialize, Serialize};

/// Event time in milliseconds since the Unix epoch.
pub type EventTime = i64;

/// Sequence number of a committed micro-batch.
pub type BatchId = u64;

/// Minimum possible event time. Used as the initial "no watermark" sentinel.
pub const EVENT_TIME_MIN: EventTime = i64::MIN;

/// Maximum possible event time. Used to represent no upper bound.
pub const EVENT_TIME_MAX: EventTime = i64::MAX;

/// Identifier of one discrete input unit (a file, or a pushed buffer).
///
/// Units are discovered in a stable order by the source and recorded in the
/// batch cursor once their contribution has been committed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UnitId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A decoded input event, projected onto the fields the query aggregates.
///
/// `key` is the rendered value of the group-by attribute; `measure` carries
/// the numeric field for sum/min/max and is `None` for plain counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: EventTime,
    pub key: String,
    pub measure: Option<f64>,
}

impl Event {
    /// Create an event with no measure (count aggregation).
    pub fn new(timestamp: EventTime, key: impl Into<String>) -> Self {
        Self {
            timestamp,
            key: key.into(),
            measure: None,
        }
    }

    /// Create an event carrying a numeric measure.
    pub fn with_measure(timestamp: EventTime, key: impl Into<String>, measure: f64) -> Self {
        Self {
            timestamp,
            key: key.into(),
            measure: Some(measure),
        }
    }
}

/// Watermark indicates that no elements with timestamp < this value will arrive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    pub timestamp: EventTime,
}

impl Watermark {
    /// Create a new watermark at the given timestamp.
    pub fn new(timestamp: EventTime) -> Self {
        Self { timestamp }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Watermark({}ms)", self.timestamp)
    }
}

/// Trait bound for types that are persisted in checkpoints.
pub trait StreamData: Send + Clone + Serialize + for<'de> Deserialize<'de> + 'static {}

// Blanket implementation: any type satisfying the bounds is StreamData.
impl<T> StreamData for T where T: Send + Clone + Serialize + for<'de> Deserialize<'de> + 'static {}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
