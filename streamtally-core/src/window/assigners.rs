use super::*;

// ── Tumbling ──────────────────────────────────────────────────────────────────

/// Fixed-size, non-overlapping event-time windows aligned to multiples of `size`.
#[derive(Debug, Clone)]
pub struct TumblingWindows {
    pub(crate) size_ms: i64,
    pub(crate) offset_ms: i64,
}

impl TumblingWindows {
    /// Create tumbling windows of the given `size`.
    pub fn of(size: Duration) -> QueryResult<Self> {
        Self::of_with_offset(size, Duration::ZERO)
    }

    /// Create tumbling windows with a non-zero alignment `offset`.
    pub fn of_with_offset(size: Duration, offset: Duration) -> QueryResult<Self> {
        let assigner = WindowSpec::tumbling(size).with_offset(offset).build()?;
        Ok(Self {
            size_ms: assigner.size_ms(),
            offset_ms: millis_lossless(offset),
        })
    }
}

impl WindowAssigner for TumblingWindows {
    fn assign_windows(&self, timestamp: EventTime) -> Vec<TimeWindow> {
        // i128 keeps the arithmetic total at the edges of the i64 range.
        let ts = timestamp as i128;
        let size = self.size_ms as i128;
        let start = ts - (ts - self.offset_ms as i128).rem_euclid(size);
        vec![TimeWindow::new(
            clamp_event_time(start),
            clamp_event_time(start + size),
        )]
    }

    fn size_ms(&self) -> i64 {
        self.size_ms
    }
}

// ── Sliding ───────────────────────────────────────────────────────────────────

/// Fixed-size, possibly overlapping event-time windows.
/// An element belongs to `ceil(size / slide)` windows.
#[derive(Debug, Clone)]
pub struct SlidingWindows {
    pub(crate) size_ms: i64,
    pub(crate) slide_ms: i64,
    pub(crate) offset_ms: i64,
}

impl SlidingWindows {
    /// Create sliding windows of the given `size` advancing every `slide`.
    pub fn of(size: Duration, slide: Duration) -> QueryResult<Self> {
        WindowSpec::sliding(size, slide).build()?;
        Ok(Self {
            size_ms: millis_lossless(size),
            slide_ms: millis_lossless(slide),
            offset_ms: 0,
        })
    }
}

impl WindowAssigner for SlidingWindows {
    fn assign_windows(&self, timestamp: EventTime) -> Vec<TimeWindow> {
        // Walk back from the last window start by `slide` until no window covers ts.
        let ts = timestamp as i128;
        let size = self.size_ms as i128;
        let slide = self.slide_ms as i128;
        let last_start = ts - (ts - self.offset_ms as i128).rem_euclid(slide);
        let mut windows = Vec::new();
        let mut start = last_start;
        while start > ts - size {
            windows.push(TimeWindow::new(
                clamp_event_time(start),
                clamp_event_time(start + size),
            ));
            start -= slide;
        }
        windows.reverse();
        windows
    }

    fn size_ms(&self) -> i64 {
        self.size_ms
    }
}

// Only called after `WindowSpec::build` has range-checked the duration.
fn millis_lossless(d: Duration) -> i64 {
    d.as_millis() as i64
}
