//! Micro-batch scheduler: one loop per query, on its own thread.
//!
//! ```text
//! loop {
//!     wait for tick | Trigger | Stop
//!     Discovering: units = source.list_new_units(cursor, max_units)   (no lock)
//!                  AvailableNow: first listing fixed, drained, then stop
//!     Decoding:    rows  = decode(units) -> events                    (no lock)
//!     Merging:     delta = assign + drop late; staged = store.stage(delta)
//!     Emitting:    sink.write(rows); commit store, watermark, cursor
//!     checkpoint (cursor, watermark, state)
//! }
//! ```
//!
//! The store's write lock is held from Merging through Emitting only. Stop is
//! honoured between phases; a cycle that has started merging always finishes.

use super::*;

/// Wait between polls of an idle source under [`TriggerMode::AsAvailable`].
pub(crate) const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of one scheduler cycle.
#[derive(Debug)]
pub(crate) enum CycleOutcome {
    /// No new units; nothing changed.
    Idle,
    /// A batch was committed.
    Committed(BatchId),
    /// Stop was requested at a phase boundary before merging.
    Cancelled,
}

enum Wake {
    Run,
    Stop,
}

pub(crate) struct Scheduler {
    shared: Arc<QueryShared>,
    source: Arc<dyn Source>,
    sink: Arc<dyn Sink>,
    plan: QueryPlan,
    control: Receiver<Control>,
    cursor: BatchCursor,
    watermark: WatermarkTracker,
    output: OutputModeController,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    pending_checkpoint: Option<QueryCheckpoint>,
    /// Units pending when an `AvailableNow` query started; it stops once these are drained.
    available_now: Option<Vec<UnitId>>,
    consecutive_failures: u32,
    stop_requested: bool,
}

/// Committed recovery point loaded at start.
pub(crate) struct Recovery {
    pub cursor: BatchCursor,
    pub watermark: crate::time::WatermarkState,
    pub finalized_through: EventTime,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shared: Arc<QueryShared>,
        source: Arc<dyn Source>,
        sink: Arc<dyn Sink>,
        plan: QueryPlan,
        control: Receiver<Control>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
        recovery: Option<Recovery>,
    ) -> Self {
        let mut watermark = WatermarkTracker::new(plan.watermark);
        let mut output = OutputModeController::new(plan.output_mode);
        let mut cursor = BatchCursor::new();
        if let Some(recovery) = recovery {
            watermark.restore(recovery.watermark);
            output.restore(recovery.finalized_through);
            cursor = recovery.cursor;
        }
        Self {
            shared,
            source,
            sink,
            plan,
            control,
            cursor,
            watermark,
            output,
            checkpoints,
            pending_checkpoint: None,
            available_now: None,
            consecutive_failures: 0,
            stop_requested: false,
        }
    }

    /// Drive cycles until stopped, drained (`AvailableNow`) or failed.
    pub fn run(mut self) {
        tracing::info!(
            query_id = %self.shared.id,
            name = ?self.shared.name,
            source = %self.source.describe(),
            sink = %self.sink.describe(),
            "query started"
        );
        self.set_phase(CyclePhase::Idle, "waiting for next trigger");

        loop {
            let started = Instant::now();
            let outcome = self.run_cycle();

            let wait = match outcome {
                Ok(CycleOutcome::Cancelled) => break,
                Ok(outcome) => {
                    if self.consecutive_failures > 0 {
                        self.reset_failures();
                    }
                    match (self.plan.trigger.mode, outcome) {
                        (TriggerMode::AvailableNow, CycleOutcome::Idle) => break,
                        (TriggerMode::ProcessingTime { interval }, _) => {
                            interval.saturating_sub(started.elapsed())
                        }
                        (_, CycleOutcome::Committed(_)) => Duration::ZERO,
                        (_, _) => IDLE_POLL_INTERVAL,
                    }
                }
                Err(err) => {
                    self.consecutive_failures += 1;
                    let consecutive_failures = self.consecutive_failures;
                    let retryable =
                        err.is_retryable() && self.plan.retry.allows(consecutive_failures);
                    self.shared.update(|p| {
                        p.status.consecutive_failures = consecutive_failures;
                        p.status.last_error = Some(err.to_string());
                    });
                    if !retryable {
                        self.fail(err);
                        return;
                    }
                    let backoff = self.plan.retry.backoff(consecutive_failures);
                    tracing::warn!(
                        query_id = %self.shared.id,
                        attempt = consecutive_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "cycle failed, retrying"
                    );
                    self.set_phase(CyclePhase::Idle, &format!("retrying after error: {err}"));
                    match self.wait_for_stop(backoff) {
                        Wake::Stop => break,
                        Wake::Run => continue,
                    }
                }
            };

            if self.stop_requested {
                break;
            }
            if !wait.is_zero() {
                self.set_phase(CyclePhase::Idle, "waiting for next trigger");
            }
            match self.wait(wait) {
                Wake::Stop => break,
                Wake::Run => {}
            }
        }
        self.finish();
    }

    /// One pass through the phases. Errors leave the cursor and the store untouched.
    pub fn run_cycle(&mut self) -> QueryResult<CycleOutcome> {
        let started = Instant::now();
        if let Some(checkpoint) = self.pending_checkpoint.take() {
            self.save_checkpoint(checkpoint)?;
        }

        // ── Discovering ──────────────────────────────────────────────────
        self.set_phase(CyclePhase::Discovering, "looking for new input");
        let units = self.discover()?;
        if units.is_empty() {
            self.set_phase(CyclePhase::Idle, "no new input");
            return Ok(CycleOutcome::Idle);
        }
        if self.poll_stop() {
            return Ok(CycleOutcome::Cancelled);
        }

        // ── Decoding ─────────────────────────────────────────────────────
        self.set_phase(CyclePhase::Decoding, &format!("decoding {} units", units.len()));
        let mut events: Vec<Event> = Vec::new();
        let mut skipped_rows: u64 = 0;
        for unit in &units {
            let bytes = self
                .source
                .read_unit(unit)
                .map_err(QueryError::from_source)?;
            let decoded = self.plan.decoder.decode(&bytes);
            if let Some(first) = decoded.errors.first() {
                if self.plan.decoder.policy().on_invalid == InvalidRecordPolicy::FailBatch {
                    return Err(QueryError::Decode {
                        unit: unit.clone(),
                        error: first.clone(),
                    });
                }
                for error in &decoded.errors {
                    tracing::debug!(query_id = %self.shared.id, unit = %unit, %error, "dropped record");
                }
            }
            skipped_rows += decoded.errors.len() as u64;
            for row in &decoded.rows {
                match self.plan.projection.project(row) {
                    Ok(event) => events.push(event),
                    Err(_) => skipped_rows += 1,
                }
            }
        }
        if self.poll_stop() {
            return Ok(CycleOutcome::Cancelled);
        }

        // ── Merging ──────────────────────────────────────────────────────
        self.set_phase(CyclePhase::Merging, &format!("merging {} events", events.len()));
        let mut store = self
            .shared
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut delta = BatchDelta::new(self.plan.kind);
        let mut late_rows: u64 = 0;
        for event in &events {
            for window in self.plan.assigner.assign_windows(event.timestamp) {
                if self.watermark.is_late(window.end) {
                    late_rows += 1;
                    continue;
                }
                delta.add(
                    AggregationKey::new(event.key.clone(), window),
                    Accumulator::of_event(self.plan.kind, event.measure),
                )?;
            }
        }
        let proposal = self
            .watermark
            .propose(events.iter().map(|e| e.timestamp).max());
        let staged = store.stage(delta)?;

        // ── Emitting ─────────────────────────────────────────────────────
        self.set_phase(CyclePhase::Emitting, "writing results");
        let batch_id = self.cursor.batch_id;
        let emit = self.output.plan(&store, &staged, proposal.watermark);
        if emit.write {
            self.sink
                .write(batch_id, &emit.rows, self.plan.output_mode)
                .map_err(QueryError::from_sink)?;
        }

        store.commit(staged);
        self.watermark.advance(proposal);
        self.output.commit(&emit);
        let evicted_rows = match emit.evict_through {
            Some(through) => store.drop_where(|k| k.window.is_closed_at(through)),
            None => 0,
        };
        self.cursor.advance(&units);
        let state_rows = store.len() as u64;
        let checkpoint = self.checkpoints.as_ref().map(|_| QueryCheckpoint {
            batch_id,
            cursor: self.cursor.clone(),
            watermark: self.watermark.state(),
            finalized_through: self.output.finalized_through(),
            state: store.snapshot(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
        drop(store);

        let progress = QueryProgress {
            id: self.shared.id,
            name: self.shared.name.clone(),
            batch_id,
            units,
            input_rows: events.len() as u64,
            skipped_rows,
            late_rows,
            emitted_rows: if emit.write { emit.rows.len() as u64 } else { 0 },
            state_rows,
            evicted_rows: evicted_rows as u64,
            watermark: self.watermark.current_watermark().map(|w| w.timestamp),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        tracing::debug!(
            query_id = %self.shared.id,
            batch_id,
            units = progress.units.len(),
            input_rows = progress.input_rows,
            skipped_rows,
            late_rows,
            emitted_rows = progress.emitted_rows,
            state_rows,
            "batch committed"
        );
        let cursor = self.cursor.clone();
        self.consecutive_failures = 0;
        self.shared.update(move |p| {
            p.status.cycles_run += 1;
            p.status.consecutive_failures = 0;
            p.status.last_error = None;
            p.status.last_cursor = CursorPosition::from(&cursor);
            p.status.watermark = progress.watermark;
            p.cursor = cursor;
            if p.recent.len() == PROGRESS_HISTORY {
                p.recent.pop_front();
            }
            p.recent.push_back(progress);
        });
        self.set_phase(CyclePhase::Idle, &format!("committed batch {batch_id}"));

        if let Some(checkpoint) = checkpoint {
            self.save_checkpoint(checkpoint)?;
        }
        Ok(CycleOutcome::Committed(batch_id))
    }

    /// Units for this cycle, capped at `max_units_per_cycle`.
    ///
    /// Under `AvailableNow` the first listing is fixed as the target set and
    /// later arrivals are left for the next run.
    fn discover(&mut self) -> QueryResult<Vec<UnitId>> {
        let limit = self.plan.trigger.max_units_per_cycle;
        if self.plan.trigger.mode != TriggerMode::AvailableNow {
            return self
                .source
                .list_new_units(&self.cursor, limit)
                .map_err(QueryError::from_source);
        }
        if self.available_now.is_none() {
            let pending = self
                .source
                .list_new_units(&self.cursor, None)
                .map_err(QueryError::from_source)?;
            tracing::debug!(query_id = %self.shared.id, units = pending.len(), "available-now target fixed");
            self.available_now = Some(pending);
        }
        let target = self.available_now.as_deref().unwrap_or_default();
        Ok(target
            .iter()
            .filter(|unit| !self.cursor.contains(unit))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn save_checkpoint(&mut self, checkpoint: QueryCheckpoint) -> QueryResult<()> {
        let Some(store) = &self.checkpoints else {
            return Ok(());
        };
        let saved = store
            .save(&checkpoint)
            .and_then(|_| store.purge(RETAINED_CHECKPOINTS));
        if let Err(err) = saved {
            self.pending_checkpoint = Some(checkpoint);
            return Err(QueryError::from_checkpoint(err));
        }
        Ok(())
    }

    fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.shared.update(|p| {
            p.status.consecutive_failures = 0;
            p.status.last_error = None;
        });
    }

    fn set_phase(&self, phase: CyclePhase, message: &str) {
        self.shared.update(|p| {
            p.status.phase = phase;
            p.status.message = message.to_string();
        });
    }

    /// Drain control messages without blocking; true once stop was requested.
    fn poll_stop(&mut self) -> bool {
        loop {
            match self.control.try_recv() {
                Ok(Control::Stop) | Err(TryRecvError::Disconnected) => {
                    self.stop_requested = true;
                }
                Ok(Control::Trigger) => continue,
                Err(TryRecvError::Empty) => break,
            }
        }
        self.stop_requested
    }

    /// Sleep up to `timeout`; a trigger ends the wait early.
    fn wait(&mut self, timeout: Duration) -> Wake {
        if self.poll_stop() {
            return Wake::Stop;
        }
        if timeout.is_zero() {
            return Wake::Run;
        }
        match self.control.recv_timeout(timeout) {
            Ok(Control::Trigger) | Err(RecvTimeoutError::Timeout) => Wake::Run,
            Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => {
                self.stop_requested = true;
                Wake::Stop
            }
        }
    }

    /// Sleep the full `timeout` unless stopped; triggers do not cut a backoff short.
    fn wait_for_stop(&mut self, timeout: Duration) -> Wake {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Wake::Run;
            }
            match self.control.recv_timeout(deadline - now) {
                Ok(Control::Trigger) => continue,
                Err(RecvTimeoutError::Timeout) => return Wake::Run,
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    self.stop_requested = true;
                    return Wake::Stop;
                }
            }
        }
    }

    fn finish(&self) {
        tracing::info!(query_id = %self.shared.id, name = ?self.shared.name, "query stopped");
        self.shared.update(|p| {
            p.status.state = QueryState::Stopped;
            p.status.phase = CyclePhase::Stopped;
            p.status.message = "stopped".to_string();
        });
    }

    fn fail(&self, err: QueryError) {
        tracing::error!(query_id = %self.shared.id, name = ?self.shared.name, error = %err, "query failed");
        self.shared.update(|p| {
            p.status.state = QueryState::Failed;
            p.status.phase = CyclePhase::Stopped;
            p.status.message = format!("failed: {err}");
            p.status.last_error = Some(err.to_string());
            p.error = Some(err);
        });
    }
}
