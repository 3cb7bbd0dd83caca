use super::*;
use crate::checkpoint::InMemoryCheckpointStore;
use crate::schema::{parse_timestamp, DataType, Field};
use crate::sink::EmittedRow;
use crate::source::MemorySource;
use crate::window::TimeWindow;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_channel::bounded;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn ts(s: &str) -> EventTime {
    parse_timestamp(s).unwrap()
}

fn key(action: &str, start: &str, end: &str) -> AggregationKey {
    AggregationKey::new(action, TimeWindow::new(ts(start), ts(end)))
}

fn line(action: &str, time: &str) -> String {
    format!(r#"{{"time": "{time}", "action": "{action}"}}"#)
}

fn schema() -> Schema {
    Schema::new(vec![
        Field::new("time", DataType::Timestamp, false),
        Field::new("action", DataType::String, false),
    ])
    .unwrap()
}

fn hourly_counts() -> QueryConfig {
    QueryConfig::new(
        schema(),
        WindowSpec::tumbling(Duration::from_secs(3600)),
        "time",
        "action",
    )
    .with_retry(RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(5),
    ))
}

/// Records every write; fails the first `failures` of them.
#[derive(Default)]
struct RecordingSink {
    writes: Mutex<Vec<(BatchId, Vec<EmittedRow>, OutputMode)>>,
    failures: AtomicU32,
}

impl RecordingSink {
    fn failing(failures: u32) -> Self {
        Self {
            writes: Mutex::default(),
            failures: AtomicU32::new(failures),
        }
    }

    fn writes(&self) -> Vec<(BatchId, Vec<EmittedRow>, OutputMode)> {
        self.writes.lock().unwrap().clone()
    }
}

impl Sink for RecordingSink {
    fn write(&self, batch_id: BatchId, rows: &[EmittedRow], mode: OutputMode) -> anyhow::Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("sink unavailable");
        }
        self.writes
            .lock()
            .unwrap()
            .push((batch_id, rows.to_vec(), mode));
        Ok(())
    }

    fn supports(&self, _mode: OutputMode) -> bool {
        true
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

/// A [`MemorySource`] whose listings and reads fail a set number of times.
struct FlakySource {
    inner: MemorySource,
    list_failures: AtomicU32,
    read_failures: AtomicU32,
}

impl FlakySource {
    fn new(inner: &MemorySource, list_failures: u32, read_failures: u32) -> Self {
        Self {
            inner: inner.clone(),
            list_failures: AtomicU32::new(list_failures),
            read_failures: AtomicU32::new(read_failures),
        }
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Source for FlakySource {
    fn list_new_units(
        &self,
        cursor: &BatchCursor,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<UnitId>> {
        if take_failure(&self.list_failures) {
            anyhow::bail!("listing unavailable");
        }
        self.inner.list_new_units(cursor, limit)
    }

    fn read_unit(&self, id: &UnitId) -> anyhow::Result<Vec<u8>> {
        if take_failure(&self.read_failures) {
            anyhow::bail!("disk hiccup reading {id}");
        }
        self.inner.read_unit(id)
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}

/// Blocks inside `read_unit` until released, announcing each entry.
struct BlockingSource {
    inner: MemorySource,
    entered: crossbeam_channel::Sender<()>,
    release: crossbeam_channel::Receiver<()>,
}

impl Source for BlockingSource {
    fn list_new_units(
        &self,
        cursor: &BatchCursor,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<UnitId>> {
        self.inner.list_new_units(cursor, limit)
    }

    fn read_unit(&self, id: &UnitId) -> anyhow::Result<Vec<u8>> {
        let _ = self.entered.send(());
        self.release.recv()?;
        self.inner.read_unit(id)
    }

    fn describe(&self) -> String {
        "blocking".to_string()
    }
}

/// Every read appends one more unit, so the source never runs dry.
struct GrowingSource {
    inner: MemorySource,
}

impl Source for GrowingSource {
    fn list_new_units(
        &self,
        cursor: &BatchCursor,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<UnitId>> {
        self.inner.list_new_units(cursor, limit)
    }

    fn read_unit(&self, id: &UnitId) -> anyhow::Result<Vec<u8>> {
        let bytes = self.inner.read_unit(id)?;
        self.inner
            .push_lines(&[line("open", "2016-07-26 09:59:00")])?;
        Ok(bytes)
    }

    fn describe(&self) -> String {
        "growing".to_string()
    }
}

/// An [`InMemoryCheckpointStore`] whose first `failures` saves fail.
struct FlakyCheckpointStore {
    inner: InMemoryCheckpointStore,
    failures: AtomicU32,
}

impl CheckpointStore for FlakyCheckpointStore {
    fn save(&self, checkpoint: &QueryCheckpoint) -> anyhow::Result<()> {
        if take_failure(&self.failures) {
            anyhow::bail!("checkpoint volume full");
        }
        self.inner.save(checkpoint)
    }

    fn latest(&self) -> anyhow::Result<Option<QueryCheckpoint>> {
        self.inner.latest()
    }

    fn list(&self) -> anyhow::Result<Vec<BatchId>> {
        self.inner.list()
    }

    fn purge(&self, keep_last_n: usize) -> anyhow::Result<()> {
        self.inner.purge(keep_last_n)
    }
}

/// Poll `check` until it holds or `WAIT` runs out.
fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT.unwrap_or_default();
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

fn start_recording(
    manager: &QueryManager,
    config: QueryConfig,
    source: &MemorySource,
    sink: &Arc<RecordingSink>,
) -> QueryHandle {
    let sink: Arc<dyn Sink> = sink.clone();
    manager
        .start_with(
            config,
            Arc::new(source.clone()),
            QueryRuntime::new().with_sink(sink),
        )
        .unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[test]
fn test_open_open_close_scenario() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    source
        .push_lines(&[
            line("open", "2016-07-26 09:15:00"),
            line("open", "2016-07-26 09:50:00"),
            line("close", "2016-07-26 10:05:00"),
        ])
        .unwrap();
    let sink = Arc::new(RecordingSink::default());
    let handle = start_recording(
        &manager,
        hourly_counts().with_output_mode(OutputMode::Update),
        &source,
        &sink,
    );

    handle.process_all_available().unwrap();
    let expected: Snapshot = [
        (
            key("close", "2016-07-26 10:00:00", "2016-07-26 11:00:00"),
            Accumulator::Count(1),
        ),
        (
            key("open", "2016-07-26 09:00:00", "2016-07-26 10:00:00"),
            Accumulator::Count(2),
        ),
    ]
    .into_iter()
    .collect();
    assert_eq!(handle.snapshot(), expected);

    // Let at least one empty cycle run.
    std::thread::sleep(IDLE_POLL * 3);
    handle.process_all_available().unwrap();

    assert_eq!(handle.snapshot(), expected);
    assert_eq!(handle.status().cycles_run, 1);
    let writes = sink.writes();
    assert_eq!(writes.len(), 1, "no re-emit without changes");
    assert_eq!(writes[0].1.len(), 2);

    handle.stop();
}

const IDLE_POLL: Duration = Duration::from_millis(100);

#[test]
fn test_throttle_one_unit_per_cycle() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    for minute in ["10", "20", "30"] {
        source
            .push_lines(&[line("open", &format!("2016-07-26 09:{minute}:00"))])
            .unwrap();
    }
    let config = hourly_counts()
        .with_memory_table("throttled")
        .with_trigger(Trigger::as_available().with_max_units_per_cycle(1));
    let handle = manager.start(config, Arc::new(source.clone())).unwrap();

    handle.process_all_available().unwrap();
    let progress = handle.recent_progress();
    assert_eq!(progress.len(), 3);
    for (i, p) in progress.iter().enumerate() {
        assert_eq!(p.batch_id, i as BatchId);
        assert_eq!(p.units.len(), 1);
        assert_eq!(p.input_rows, 1);
    }
    let status = handle.status();
    assert_eq!(status.cycles_run, 3);
    assert_eq!(status.last_cursor.next_batch_id, 3);
    assert_eq!(status.last_cursor.units_seen, 3);

    let table = manager.table("throttled").unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.rows()[0].value, Accumulator::Count(3));

    handle.stop();
}

#[test]
fn test_complete_mode_is_monotone() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    let sink = Arc::new(RecordingSink::default());
    let handle = start_recording(&manager, hourly_counts(), &source, &sink);

    for (action, time) in [
        ("open", "2016-07-26 09:15:00"),
        ("close", "2016-07-26 09:16:00"),
        ("open", "2016-07-26 10:15:00"),
        ("open", "2016-07-26 09:45:00"),
    ] {
        source.push_lines(&[line(action, time)]).unwrap();
        handle.process_all_available().unwrap();
    }

    let writes = sink.writes();
    assert_eq!(writes.len(), 4);
    for pair in writes.windows(2) {
        let before: BTreeMap<_, _> = pair[0].1.iter().map(|r| (&r.key, &r.value)).collect();
        let after: BTreeMap<_, _> = pair[1].1.iter().map(|r| (&r.key, &r.value)).collect();
        for (k, v) in before {
            let later = after.get(k).expect("complete mode never drops a key");
            assert!(later.as_f64().unwrap() >= v.as_f64().unwrap());
        }
    }
    assert!(writes.iter().all(|(_, _, mode)| *mode == OutputMode::Complete));
    handle.stop();
}

#[test]
fn test_append_mode_emits_closed_windows_once() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    let sink = Arc::new(RecordingSink::default());
    let config = hourly_counts()
        .with_output_mode(OutputMode::Append)
        .with_watermark_delay(Duration::from_secs(600));
    let handle = start_recording(&manager, config, &source, &sink);

    source
        .push_lines(&[
            line("open", "2016-07-26 09:15:00"),
            line("open", "2016-07-26 09:50:00"),
        ])
        .unwrap();
    handle.process_all_available().unwrap();
    source
        .push_lines(&[line("close", "2016-07-26 10:05:00")])
        .unwrap();
    handle.process_all_available().unwrap();
    assert!(sink.writes().is_empty(), "no window closed yet");

    // Watermark moves to 11:20, closing both windows.
    source
        .push_lines(&[line("open", "2016-07-26 11:30:00")])
        .unwrap();
    handle.process_all_available().unwrap();

    // A late event for a closed window is dropped, never re-emitted.
    source
        .push_lines(&[line("open", "2016-07-26 09:20:00")])
        .unwrap();
    handle.process_all_available().unwrap();

    let writes = sink.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].1,
        vec![
            EmittedRow::new(
                key("close", "2016-07-26 10:00:00", "2016-07-26 11:00:00"),
                Accumulator::Count(1)
            ),
            EmittedRow::new(
                key("open", "2016-07-26 09:00:00", "2016-07-26 10:00:00"),
                Accumulator::Count(2)
            ),
        ]
    );
    let last = handle.last_progress().unwrap();
    assert_eq!(last.late_rows, 1);
    assert_eq!(last.watermark, Some(ts("2016-07-26 11:20:00")));
    // Finalized windows were evicted; only the open 11:00 window remains.
    assert_eq!(handle.snapshot().len(), 1);
    handle.stop();
}

#[test]
fn test_sink_failure_leaves_state_untouched_and_retries() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    source
        .push_lines(&[
            line("open", "2016-07-26 09:15:00"),
            line("open", "2016-07-26 09:50:00"),
        ])
        .unwrap();
    let sink = Arc::new(RecordingSink::failing(2));
    let handle = start_recording(&manager, hourly_counts(), &source, &sink);

    handle.process_all_available().unwrap();
    let snapshot = handle.snapshot();
    assert_eq!(
        snapshot[&key("open", "2016-07-26 09:00:00", "2016-07-26 10:00:00")],
        Accumulator::Count(2),
        "retried batches are merged exactly once"
    );
    assert_eq!(sink.writes().len(), 1);
    let status = handle.status();
    assert_eq!(status.cycles_run, 1);
    assert_eq!(status.consecutive_failures, 0);
    handle.stop();
}

#[test]
fn test_exhausted_retry_budget_fails_query() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    source
        .push_lines(&[line("open", "2016-07-26 09:15:00")])
        .unwrap();
    let sink = Arc::new(RecordingSink::failing(u32::MAX));
    let config = hourly_counts().with_retry(RetryPolicy::new(
        2,
        Duration::from_millis(1),
        Duration::from_millis(2),
    ));
    let handle = start_recording(&manager, config, &source, &sink);

    let err = handle.await_termination(WAIT).unwrap_err();
    assert!(matches!(err, QueryError::Sink(_)));

    let status = handle.status();
    assert_eq!(status.state, QueryState::Failed);
    assert_eq!(status.consecutive_failures, 3);
    assert!(status.last_error.unwrap().contains("sink unavailable"));
    assert_eq!(status.last_cursor.next_batch_id, 0);
    assert!(handle.snapshot().is_empty());
    assert!(matches!(
        handle.process_all_available(),
        Err(QueryError::Sink(_))
    ));
    assert!(manager.active().is_empty());
}

#[test]
fn test_fail_batch_policy_escalates_decode_errors() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    source
        .push_lines(&[line("open", "2016-07-26 09:15:00"), "not json".to_string()])
        .unwrap();
    let config = hourly_counts()
        .with_schema_policy(SchemaPolicy {
            on_invalid: InvalidRecordPolicy::FailBatch,
            ..SchemaPolicy::default()
        })
        .with_retry(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO));
    let handle = manager.start(config, Arc::new(source)).unwrap();

    match handle.await_termination(WAIT) {
        Err(QueryError::Decode { unit, error }) => {
            assert_eq!(unit, UnitId::from("unit-000000"));
            assert_eq!(error.line, 2);
        }
        other => panic!("expected decode failure, got {other:?}"),
    }
}

#[test]
fn test_drop_record_policy_counts_skipped_rows() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    source
        .push_lines(&[
            line("open", "2016-07-26 09:15:00"),
            "not json".to_string(),
            r#"{"time": null, "action": "open"}"#.to_string(),
            String::new(),
        ])
        .unwrap();
    let handle = manager
        .start(
            hourly_counts().with_memory_table("skips"),
            Arc::new(source),
        )
        .unwrap();
    handle.process_all_available().unwrap();

    let progress = handle.last_progress().unwrap();
    assert_eq!(progress.input_rows, 1);
    assert_eq!(progress.skipped_rows, 2);
    assert_eq!(progress.emitted_rows, 1);
    handle.stop();
}

#[test]
fn test_restart_from_checkpoint_does_not_double_count() {
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let source = MemorySource::new();
    source
        .push_lines(&[line("open", "2016-07-26 09:15:00")])
        .unwrap();
    source
        .push_lines(&[line("open", "2016-07-26 09:25:00")])
        .unwrap();
    let config = hourly_counts()
        .with_name("resumable")
        .with_memory_table("resumable")
        .with_trigger(Trigger::available_now().with_max_units_per_cycle(1));

    // First run drains the two units and stops by itself.
    let manager = QueryManager::new();
    let first = manager
        .start_with(
            config.clone(),
            Arc::new(source.clone()),
            QueryRuntime::new().with_checkpoint_store(Arc::clone(&checkpoints)),
        )
        .unwrap();
    assert!(first.await_termination(WAIT).unwrap());
    assert_eq!(checkpoints.list().unwrap(), vec![0, 1]);

    // Simulated crash: a fresh manager replays from the same source.
    source
        .push_lines(&[line("open", "2016-07-26 09:35:00")])
        .unwrap();
    let manager = QueryManager::new();
    let second = manager
        .start_with(
            config,
            Arc::new(source.clone()),
            QueryRuntime::new().with_checkpoint_store(Arc::clone(&checkpoints)),
        )
        .unwrap();
    assert!(second.await_termination(WAIT).unwrap());

    let window = key("open", "2016-07-26 09:00:00", "2016-07-26 10:00:00");
    assert_eq!(second.snapshot()[&window], Accumulator::Count(3));
    let progress = second.recent_progress();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].batch_id, 2);
    assert_eq!(second.status().last_cursor.units_seen, 3);
}

#[test]
fn test_checkpoint_location_on_disk() {
    let dir = std::env::temp_dir().join(format!(
        "streamtally-query-checkpoint-{}-{}",
        std::process::id(),
        QueryId::new()
    ));
    let source = MemorySource::new();
    source
        .push_lines(&[line("close", "2016-07-26 10:05:00")])
        .unwrap();
    let config = hourly_counts()
        .with_checkpoint_location(&dir)
        .with_trigger(Trigger::available_now());

    let manager = QueryManager::new();
    let handle = manager.start(config.clone(), Arc::new(source.clone())).unwrap();
    assert!(handle.await_termination(WAIT).unwrap());
    assert!(dir.join("batch-0.bin").exists());

    let restarted = manager.start(config, Arc::new(source)).unwrap();
    assert!(restarted.await_termination(WAIT).unwrap());
    assert_eq!(restarted.status().cycles_run, 0);
    assert_eq!(restarted.snapshot(), handle.snapshot());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_source_read_failures_retry_without_moving_cursor() {
    let manager = QueryManager::new();
    let memory = MemorySource::new();
    memory
        .push_lines(&[line("open", "2016-07-26 09:15:00")])
        .unwrap();
    memory
        .push_lines(&[line("open", "2016-07-26 09:50:00")])
        .unwrap();
    let config = hourly_counts()
        .with_memory_table("flaky_reads")
        .with_retry(RetryPolicy::new(
            3,
            Duration::from_millis(200),
            Duration::from_millis(400),
        ));
    let handle = manager
        .start(config, Arc::new(FlakySource::new(&memory, 0, 2)))
        .unwrap();

    assert!(wait_for(|| handle.status().consecutive_failures == 2));
    let status = handle.status();
    assert!(status.is_active());
    assert_eq!(status.last_cursor.next_batch_id, 0);
    assert_eq!(status.last_cursor.units_seen, 0);
    assert!(status.last_error.unwrap().contains("disk hiccup"));
    assert!(handle.snapshot().is_empty());

    assert!(wait_for(|| handle.status().cycles_run == 1));
    handle.process_all_available().unwrap();
    let window = key("open", "2016-07-26 09:00:00", "2016-07-26 10:00:00");
    assert_eq!(handle.snapshot()[&window], Accumulator::Count(2));
    let progress = handle.recent_progress();
    assert_eq!(progress.len(), 1, "both units land in a single batch");
    assert_eq!(progress[0].batch_id, 0);
    assert_eq!(progress[0].units.len(), 2);

    let status = handle.status();
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.last_error, None);
    assert_eq!(status.last_cursor.next_batch_id, 1);
    assert_eq!(status.last_cursor.units_seen, 2);
    assert_eq!(
        manager.table("flaky_reads").unwrap().rows()[0].value,
        Accumulator::Count(2)
    );
    handle.stop();
}

#[test]
fn test_unreachable_source_fails_query() {
    let manager = QueryManager::new();
    let memory = MemorySource::new();
    memory
        .push_lines(&[line("open", "2016-07-26 09:15:00")])
        .unwrap();
    let config = hourly_counts().with_retry(RetryPolicy::new(
        1,
        Duration::from_millis(1),
        Duration::from_millis(2),
    ));
    let handle = manager
        .start(config, Arc::new(FlakySource::new(&memory, u32::MAX, 0)))
        .unwrap();

    let err = handle.await_termination(WAIT).unwrap_err();
    assert!(matches!(err, QueryError::Source(ref msg) if msg.contains("listing unavailable")));
    let status = handle.status();
    assert_eq!(status.state, QueryState::Failed);
    assert_eq!(status.consecutive_failures, 2);
    assert_eq!(status.cycles_run, 0);
    assert_eq!(status.last_cursor.next_batch_id, 0);
    assert!(matches!(handle.error(), Some(QueryError::Source(_))));
    assert!(handle.snapshot().is_empty());
}

#[test]
fn test_failed_checkpoint_is_saved_on_next_cycle() {
    let checkpoints = Arc::new(FlakyCheckpointStore {
        inner: InMemoryCheckpointStore::new(),
        failures: AtomicU32::new(1),
    });
    let source = MemorySource::new();
    source
        .push_lines(&[line("open", "2016-07-26 09:15:00")])
        .unwrap();
    let manager = QueryManager::new();
    let store: Arc<dyn CheckpointStore> = checkpoints.clone();
    let handle = manager
        .start_with(
            hourly_counts().with_memory_table("persisted"),
            Arc::new(source.clone()),
            QueryRuntime::new().with_checkpoint_store(store),
        )
        .unwrap();

    // The batch commits even though its checkpoint write fails.
    handle.process_all_available().unwrap();
    assert!(wait_for(|| checkpoints.list().unwrap() == vec![0]));
    assert!(wait_for(|| handle.status().consecutive_failures == 0));
    assert_eq!(handle.recent_progress().len(), 1, "the batch is not re-run");

    source
        .push_lines(&[line("open", "2016-07-26 09:45:00")])
        .unwrap();
    handle.process_all_available().unwrap();
    assert!(wait_for(|| checkpoints.list().unwrap() == vec![0, 1]));
    let latest = checkpoints.latest().unwrap().unwrap();
    assert_eq!(latest.batch_id, 1);
    assert_eq!(CursorPosition::from(&latest.cursor).units_seen, 2);
    let window = key("open", "2016-07-26 09:00:00", "2016-07-26 10:00:00");
    assert_eq!(latest.state[&window], Accumulator::Count(2));
    handle.stop();
}

#[test]
fn test_stop_during_decode_abandons_cycle() {
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let memory = MemorySource::new();
    memory
        .push_lines(&[line("open", "2016-07-26 09:15:00")])
        .unwrap();
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let source = BlockingSource {
        inner: memory,
        entered: entered_tx,
        release: release_rx,
    };
    let sink = Arc::new(RecordingSink::default());
    let recording: Arc<dyn Sink> = sink.clone();
    let store: Arc<dyn CheckpointStore> = checkpoints.clone();
    let manager = QueryManager::new();
    let handle = manager
        .start_with(
            hourly_counts(),
            Arc::new(source),
            QueryRuntime::new()
                .with_sink(recording)
                .with_checkpoint_store(store),
        )
        .unwrap();

    entered_rx.recv_timeout(WAIT.unwrap()).unwrap();
    assert_eq!(handle.status().phase, CyclePhase::Decoding);
    let stopping = handle.clone();
    let stopper = std::thread::spawn(move || stopping.stop());
    std::thread::sleep(Duration::from_millis(100));
    release_tx.send(()).unwrap();
    stopper.join().unwrap();

    let status = handle.status();
    assert_eq!(status.state, QueryState::Stopped);
    assert_eq!(status.cycles_run, 0);
    assert_eq!(status.last_cursor.next_batch_id, 0);
    assert_eq!(status.last_cursor.units_seen, 0);
    assert!(handle.snapshot().is_empty());
    assert!(handle.last_progress().is_none());
    assert!(sink.writes().is_empty());
    assert!(checkpoints.list().unwrap().is_empty());
}

#[test]
fn test_available_now_ignores_units_arriving_mid_run() {
    let memory = MemorySource::new();
    for minute in ["10", "20"] {
        memory
            .push_lines(&[line("open", &format!("2016-07-26 09:{minute}:00"))])
            .unwrap();
    }
    let manager = QueryManager::new();
    let handle = manager
        .start(
            hourly_counts()
                .with_memory_table("snapshot_run")
                .with_trigger(Trigger::available_now().with_max_units_per_cycle(1)),
            Arc::new(GrowingSource {
                inner: memory.clone(),
            }),
        )
        .unwrap();

    assert!(handle.await_termination(WAIT).unwrap());
    let status = handle.status();
    assert_eq!(status.cycles_run, 2);
    assert_eq!(status.last_cursor.units_seen, 2);
    assert_eq!(memory.len(), 4, "input kept arriving during the run");
    assert_eq!(
        manager.table("snapshot_run").unwrap().rows()[0].value,
        Accumulator::Count(2)
    );
}

// ── Lifecycle ────────────────────────────────────────────────────────────

#[test]
fn test_stop_keeps_state_readable() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    source
        .push_lines(&[line("open", "2016-07-26 09:15:00")])
        .unwrap();
    let handle = manager
        .start(
            hourly_counts()
                .with_name("stoppable")
                .with_memory_table("stoppable"),
            Arc::new(source),
        )
        .unwrap();
    handle.process_all_available().unwrap();

    handle.stop();
    handle.stop();
    let status = handle.status();
    assert_eq!(status.state, QueryState::Stopped);
    assert_eq!(status.phase, CyclePhase::Stopped);
    assert!(handle.await_termination(Some(Duration::ZERO)).unwrap());
    assert_eq!(handle.snapshot().len(), 1);
    assert_eq!(manager.table("stoppable").unwrap().len(), 1);
    assert!(manager.active().is_empty());
    assert_eq!(manager.queries().len(), 1);
}

#[test]
fn test_remove_terminated_forgets_stopped_queries() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    source
        .push_lines(&[line("open", "2016-07-26 09:15:00")])
        .unwrap();
    let finished = manager
        .start(
            hourly_counts()
                .with_name("finished")
                .with_memory_table("finished")
                .with_trigger(Trigger::available_now()),
            Arc::new(source),
        )
        .unwrap();
    let running = manager
        .start(
            hourly_counts().with_name("running"),
            Arc::new(MemorySource::new()),
        )
        .unwrap();
    assert!(finished.await_termination(WAIT).unwrap());

    assert_eq!(manager.remove_terminated(), 1);
    assert_eq!(manager.remove_terminated(), 0);
    let remaining: Vec<QueryId> = manager.queries().iter().map(QueryHandle::id).collect();
    assert_eq!(remaining, vec![running.id()]);
    assert!(manager.find("finished").is_none());
    assert_eq!(manager.table("finished").unwrap().len(), 1);
    assert_eq!(finished.snapshot().len(), 1);

    running.stop();
    assert_eq!(manager.remove_terminated(), 1);
    assert!(manager.queries().is_empty());
}

#[test]
fn test_await_termination_times_out_while_active() {
    let manager = QueryManager::new();
    let handle = manager
        .start(hourly_counts(), Arc::new(MemorySource::new()))
        .unwrap();
    assert!(!handle
        .await_termination(Some(Duration::from_millis(20)))
        .unwrap());
    assert!(handle.is_active());
    manager.stop_all();
    assert!(!handle.is_active());
}

#[test]
fn test_processing_time_trigger() {
    let manager = QueryManager::new();
    let source = MemorySource::new();
    let handle = manager
        .start(
            hourly_counts()
                .with_memory_table("ticks")
                .with_trigger(Trigger::processing_time(Duration::from_millis(20))),
            Arc::new(source.clone()),
        )
        .unwrap();
    source
        .push_lines(&[line("open", "2016-07-26 09:15:00")])
        .unwrap();
    handle.process_all_available().unwrap();
    assert_eq!(manager.table("ticks").unwrap().len(), 1);
    handle.stop();
}

#[test]
fn test_names_and_tables_are_unique_among_active_queries() {
    let manager = QueryManager::new();
    let first = manager
        .start(
            hourly_counts().with_name("q").with_memory_table("t"),
            Arc::new(MemorySource::new()),
        )
        .unwrap();

    let same_name = manager.start(
        hourly_counts().with_name("q").with_memory_table("other"),
        Arc::new(MemorySource::new()),
    );
    assert!(matches!(same_name, Err(QueryError::Configuration(_))));

    let same_table = manager.start(
        hourly_counts().with_name("q2").with_memory_table("t"),
        Arc::new(MemorySource::new()),
    );
    assert!(matches!(same_table, Err(QueryError::Configuration(_))));

    first.stop();
    let again = manager
        .start(
            hourly_counts().with_name("q").with_memory_table("t"),
            Arc::new(MemorySource::new()),
        )
        .unwrap();
    assert_eq!(manager.find("q").unwrap().id(), again.id());
    assert_eq!(manager.find(&first.id().to_string()).unwrap().id(), first.id());
    assert!(manager.find("missing").is_none());
    assert!(matches!(manager.table("nope"), Err(QueryError::NotFound(_))));
    manager.stop_all();
}

// ── Configuration ────────────────────────────────────────────────────────

#[test]
fn test_invalid_configurations_never_start() {
    let manager = QueryManager::new();
    let source: Arc<dyn Source> = Arc::new(MemorySource::new());
    let cases = [
        hourly_counts().with_output_mode(OutputMode::Append),
        QueryConfig::new(schema(), WindowSpec::tumbling(Duration::from_secs(60)), "ts", "action"),
        QueryConfig::new(schema(), WindowSpec::tumbling(Duration::from_secs(60)), "action", "action"),
        hourly_counts().with_aggregate(AggregateSpec::sum("action")),
        hourly_counts().with_aggregate(AggregateSpec::sum("missing")),
        hourly_counts().with_trigger(Trigger::as_available().with_max_units_per_cycle(0)),
        hourly_counts().with_trigger(Trigger::processing_time(Duration::ZERO)),
        hourly_counts().with_memory_table(" "),
        QueryConfig::new(schema(), WindowSpec::tumbling(Duration::ZERO), "time", "action"),
    ];
    for config in cases {
        let err = manager.start(config.clone(), Arc::clone(&source)).unwrap_err();
        assert!(
            matches!(err, QueryError::Configuration(_)),
            "{config:?} gave {err:?}"
        );
    }
    assert!(manager.queries().is_empty());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "name": "hourly_actions",
        "schema": [
            {"name": "time", "data_type": "timestamp"},
            {"name": "action", "data_type": "string"},
            {"name": "amount", "data_type": "float64"}
        ],
        "window": {"size": "1 hour"},
        "time_field": "time",
        "group_by": "action",
        "aggregate": {"function": "sum", "field": "amount"},
        "output_mode": "update",
        "trigger": {"mode": "processing_time", "interval": "10 seconds", "max_units_per_cycle": 1},
        "sink": {"type": "memory", "table": "counts"},
        "watermark_delay": "10 minutes",
        "retry": {"max_retries": 5, "initial_backoff": "200 ms", "max_backoff": "5 seconds"}
    }"#;
    let config = QueryConfig::from_json(json).unwrap();
    assert_eq!(config.name.as_deref(), Some("hourly_actions"));
    assert_eq!(config.aggregate, AggregateSpec::sum("amount"));
    assert_eq!(config.output_mode, OutputMode::Update);
    assert_eq!(
        config.trigger,
        Trigger::processing_time(Duration::from_secs(10)).with_max_units_per_cycle(1)
    );
    assert_eq!(config.watermark_delay, Some(Duration::from_secs(600)));
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.checkpoint_location, None);
    config.validate().unwrap();

    let minimal = QueryConfig::from_json(
        r#"{"schema": [{"name": "t", "data_type": "timestamp"}, {"name": "k", "data_type": "string"}],
            "window": {"size": "5 minutes", "slide": "1 minute"},
            "time_field": "t", "group_by": "k"}"#,
    )
    .unwrap();
    assert_eq!(minimal.aggregate, AggregateSpec::Count);
    assert_eq!(minimal.trigger, Trigger::as_available());
    assert_eq!(minimal.sink, SinkTarget::Console);

    assert!(QueryConfig::from_json(r#"{"window": {"size": "1 parsec"}}"#).is_err());
}

#[test]
fn test_retry_backoff_doubles_up_to_cap() {
    let retry = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
    assert_eq!(retry.backoff(1), Duration::from_millis(100));
    assert_eq!(retry.backoff(2), Duration::from_millis(200));
    assert_eq!(retry.backoff(3), Duration::from_millis(350));
    assert_eq!(retry.backoff(64), Duration::from_millis(350));
    assert!(retry.allows(5));
    assert!(!retry.allows(6));
}
