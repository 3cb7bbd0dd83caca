use super::*;

/// Bounded out-of-orderness: events may arrive up to `delay` behind the
/// largest event time seen so far.
///
/// The watermark is `max_seen_timestamp - delay`. A window whose end is at
/// or before the watermark is closed; later contributions to it are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkPolicy {
    delay_ms: i64,
}

impl WatermarkPolicy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay_ms: i64::try_from(delay.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn delay_ms(&self) -> i64 {
        self.delay_ms
    }
}

/// Persistent watermark bookkeeping for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkState {
    /// Largest event time committed so far.
    pub max_seen: EventTime,
    /// Current watermark, `EVENT_TIME_MIN` until the first commit.
    pub watermark: EventTime,
}

impl Default for WatermarkState {
    fn default() -> Self {
        Self {
            max_seen: EVENT_TIME_MIN,
            watermark: EVENT_TIME_MIN,
        }
    }
}

/// Tracks the query watermark across micro-batches.
///
/// The tracker never regresses. Batches are observed into a proposal first
/// and only [`advance`](Self::advance)d once the batch has been committed.
#[derive(Debug, Clone, Default)]
pub struct WatermarkTracker {
    policy: Option<WatermarkPolicy>,
    state: WatermarkState,
}

impl WatermarkTracker {
    /// A tracker for `policy`; `None` disables watermarking (no window ever closes).
    pub fn new(policy: Option<WatermarkPolicy>) -> Self {
        Self {
            policy,
            state: WatermarkState::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.is_some()
    }

    /// Current watermark in milliseconds, `EVENT_TIME_MIN` when none.
    pub fn current_ms(&self) -> EventTime {
        self.state.watermark
    }

    /// Return the current watermark, or `None` if no watermark has been emitted yet.
    pub fn current_watermark(&self) -> Option<Watermark> {
        if self.state.watermark == EVENT_TIME_MIN {
            return None;
        }
        Some(Watermark::new(self.state.watermark))
    }

    pub fn state(&self) -> WatermarkState {
        self.state
    }

    pub fn restore(&mut self, state: WatermarkState) {
        self.state = state;
    }

    /// The state this tracker would hold after a batch whose largest event
    /// time is `batch_max`.
    pub fn propose(&self, batch_max: Option<EventTime>) -> WatermarkState {
        let Some(policy) = self.policy else {
            return self.state;
        };
        let max_seen = match batch_max {
            Some(ts) => ts.max(self.state.max_seen),
            None => self.state.max_seen,
        };
        if max_seen == EVENT_TIME_MIN {
            return self.state;
        }
        let candidate = max_seen.saturating_sub(policy.delay_ms);
        WatermarkState {
            max_seen,
            watermark: candidate.max(self.state.watermark),
        }
    }

    /// Adopt a proposal; returns the new watermark when it moved forward.
    pub fn advance(&mut self, proposal: WatermarkState) -> Option<Watermark> {
        self.state.max_seen = self.state.max_seen.max(proposal.max_seen);
        if proposal.watermark > self.state.watermark {
            self.state.watermark = proposal.watermark;
            Some(Watermark::new(proposal.watermark))
        } else {
            None
        }
    }

    /// Whether a contribution to a window ending at `window_end` is late.
    pub fn is_late(&self, window_end: EventTime) -> bool {
        self.is_enabled() && window_end <= self.state.watermark
    }
}
