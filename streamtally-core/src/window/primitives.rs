use super::*;

/// A half-open event-time window `[start, end)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeWindow {
    pub start: EventTime,
    pub end: EventTime,
}

impl TimeWindow {
    pub fn new(start: EventTime, end: EventTime) -> Self {
        Self { start, end }
    }

    /// The maximum timestamp that belongs to this window.
    pub fn max_timestamp(&self) -> EventTime {
        self.end.saturating_sub(1)
    }

    /// Return true if `timestamp` falls inside this window.
    pub fn contains(&self, timestamp: EventTime) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// A window is closed once the watermark has reached its end: no further
    /// event can land inside it.
    pub fn is_closed_at(&self, watermark: EventTime) -> bool {
        self.end <= watermark
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Assigns one or more [`TimeWindow`]s to an event timestamp.
///
/// Implementations must be total: every `i64` timestamp maps to at least one
/// window, without panicking or overflowing.
pub trait WindowAssigner: Send + Sync + std::fmt::Debug {
    /// Return the windows that contain `timestamp`, in ascending start order.
    fn assign_windows(&self, timestamp: EventTime) -> Vec<TimeWindow>;

    /// Window length in milliseconds.
    fn size_ms(&self) -> i64;
}

/// Declarative window geometry, as carried in query configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    /// Window length.
    #[serde(with = "crate::interval::serde_interval")]
    pub size: Duration,
    /// Distance between window starts. `None` means tumbling (`slide == size`).
    #[serde(default, with = "crate::interval::serde_opt_interval")]
    pub slide: Option<Duration>,
    /// Shift of the window grid relative to the epoch.
    #[serde(default, with = "crate::interval::serde_interval")]
    pub offset: Duration,
}

impl WindowSpec {
    pub fn tumbling(size: Duration) -> Self {
        Self {
            size,
            slide: None,
            offset: Duration::ZERO,
        }
    }

    pub fn sliding(size: Duration, slide: Duration) -> Self {
        Self {
            size,
            slide: Some(slide),
            offset: Duration::ZERO,
        }
    }

    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    /// Validate the geometry and build the matching assigner.
    pub fn build(&self) -> QueryResult<Box<dyn WindowAssigner>> {
        let size_ms = positive_millis("window duration", self.size)?;
        let offset_ms = millis("window offset", self.offset)?;
        match self.slide {
            None => {
                if offset_ms >= size_ms {
                    return Err(QueryError::config(
                        "window offset must be smaller than the window duration",
                    ));
                }
                Ok(Box::new(TumblingWindows { size_ms, offset_ms }))
            }
            Some(slide) => {
                let slide_ms = positive_millis("window slide", slide)?;
                if slide_ms > size_ms {
                    return Err(QueryError::config(
                        "window slide must not exceed the window duration",
                    ));
                }
                if offset_ms >= slide_ms {
                    return Err(QueryError::config(
                        "window offset must be smaller than the window slide",
                    ));
                }
                let per_event = (size_ms + slide_ms - 1) / slide_ms;
                if per_event > MAX_WINDOWS_PER_EVENT {
                    return Err(QueryError::config(format!(
                        "window duration / slide yields {per_event} windows per event (max {MAX_WINDOWS_PER_EVENT})"
                    )));
                }
                Ok(Box::new(SlidingWindows {
                    size_ms,
                    slide_ms,
                    offset_ms,
                }))
            }
        }
    }
}

/// Upper bound on overlapping windows a single event may fall into.
pub const MAX_WINDOWS_PER_EVENT: i64 = 1024;

fn millis(what: &str, d: Duration) -> QueryResult<i64> {
    i64::try_from(d.as_millis()).map_err(|_| QueryError::config(format!("{what} is too large")))
}

fn positive_millis(what: &str, d: Duration) -> QueryResult<i64> {
    let ms = millis(what, d)?;
    if ms <= 0 {
        return Err(QueryError::config(format!(
            "{what} must be at least one millisecond"
        )));
    }
    Ok(ms)
}

/// Clamp an i128 intermediate back into the event-time range.
pub(crate) fn clamp_event_time(v: i128) -> EventTime {
    v.clamp(EVENT_TIME_MIN as i128, EVENT_TIME_MAX as i128) as EventTime
}
