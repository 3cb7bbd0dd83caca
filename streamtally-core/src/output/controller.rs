use super::*;

/// What one cycle hands to the sink, and what it evicts afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitPlan {
    pub rows: Vec<EmittedRow>,
    /// Whether the sink is called at all this cycle.
    pub write: bool,
    /// Evict windows ending at or before this time after commit.
    pub evict_through: Option<EventTime>,
    finalized_through: EventTime,
}

/// Bookkeeping the controller persists across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputModeController {
    mode: OutputMode,
    /// Append mode has emitted every window ending at or before this time.
    finalized_through: EventTime,
}

impl OutputModeController {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            finalized_through: EVENT_TIME_MIN,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn finalized_through(&self) -> EventTime {
        self.finalized_through
    }

    pub fn restore(&mut self, finalized_through: EventTime) {
        self.finalized_through = finalized_through;
    }

    /// Compute the rows for a cycle whose merge is `staged` and whose
    /// watermark after commit will be `watermark`.
    pub fn plan(&self, store: &StateStore, staged: &StagedMerge, watermark: EventTime) -> EmitPlan {
        let closes_windows = watermark > EVENT_TIME_MIN;
        match self.mode {
            OutputMode::Complete => {
                let rows: Vec<EmittedRow> = store
                    .preview(staged)
                    .into_iter()
                    .map(|(k, v)| EmittedRow::new(k, v))
                    .collect();
                EmitPlan {
                    rows,
                    write: true,
                    evict_through: None,
                    finalized_through: self.finalized_through,
                }
            }
            OutputMode::Update => {
                let rows: Vec<EmittedRow> = staged
                    .changed()
                    .iter()
                    .filter_map(|k| staged.get(k).map(|v| EmittedRow::new(k.clone(), v.clone())))
                    .collect();
                EmitPlan {
                    write: !rows.is_empty(),
                    rows,
                    evict_through: closes_windows.then_some(watermark),
                    finalized_through: self.finalized_through,
                }
            }
            OutputMode::Append => {
                let rows: Vec<EmittedRow> = if closes_windows {
                    store
                        .preview(staged)
                        .into_iter()
                        .filter(|(k, _)| {
                            k.window.is_closed_at(watermark)
                                && k.window.end > self.finalized_through
                        })
                        .map(|(k, v)| EmittedRow::new(k, v))
                        .collect()
                } else {
                    Vec::new()
                };
                EmitPlan {
                    write: !rows.is_empty(),
                    rows,
                    evict_through: closes_windows.then_some(watermark),
                    finalized_through: self.finalized_through.max(watermark),
                }
            }
        }
    }

    /// Record that `plan` was delivered and committed.
    pub fn commit(&mut self, plan: &EmitPlan) {
        self.finalized_through = self.finalized_through.max(plan.finalized_through);
    }
}
