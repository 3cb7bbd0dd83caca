use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use streamtally_api::StreamingSession;
use streamtally_core::query::{QueryState, Trigger};
use streamtally_core::schema::{parse_timestamp, DataType, Field, Schema};
use streamtally_core::sink::OutputMode;
use streamtally_core::source::MemorySource;
use streamtally_core::state::AggregationKey;
use streamtally_core::window::TimeWindow;
use streamtally_core::QueryError;

const HOUR: Duration = Duration::from_secs(3600);

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "streamtally-api-{prefix}-{}-{nanos}",
        std::process::id()
    ))
}

fn key(action: &str, start: &str, end: &str) -> AggregationKey {
    AggregationKey::new(
        action,
        TimeWindow::new(parse_timestamp(start).unwrap(), parse_timestamp(end).unwrap()),
    )
}

fn actions_schema() -> Schema {
    Schema::new(vec![
        Field::new("time", DataType::Timestamp, false),
        Field::new("action", DataType::String, false),
    ])
    .unwrap()
}

fn purchases_schema() -> Schema {
    Schema::new(vec![
        Field::new("time", DataType::Timestamp, false),
        Field::new("item", DataType::String, false),
        Field::new("amount", DataType::Float64, false),
    ])
    .unwrap()
}

fn action(action: &str, time: &str) -> String {
    format!(r#"{{"time": "{time}", "action": "{action}"}}"#)
}

#[test]
fn test_hourly_counts_over_memory_input() {
    let session = StreamingSession::new("hourly");
    let input = MemorySource::new();
    input
        .push_lines(&[
            action("open", "2016-07-26 09:15:00"),
            action("open", "2016-07-26 09:40:00"),
            action("close", "2016-07-26 09:55:00"),
        ])
        .unwrap();

    let query = session
        .read_stream()
        .schema(actions_schema())
        .memory(input.clone())
        .unwrap()
        .window("time", HOUR)
        .group_by("action")
        .count()
        .write_stream()
        .query_name("counts")
        .output_mode(OutputMode::Complete)
        .memory()
        .start()
        .unwrap();

    query.process_all_available().unwrap();
    let table = session.table("counts").unwrap();
    let nine = |a| key(a, "2016-07-26 09:00:00", "2016-07-26 10:00:00");
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(&nine("open")).and_then(|v| v.as_f64()), Some(2.0));
    assert_eq!(table.get(&nine("close")).and_then(|v| v.as_f64()), Some(1.0));

    input
        .push_lines(&[action("open", "2016-07-26 10:05:00")])
        .unwrap();
    query.process_all_available().unwrap();
    let table = session.table("counts").unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.batch_id(), Some(1));
    assert_eq!(
        table
            .get(&key("open", "2016-07-26 10:00:00", "2016-07-26 11:00:00"))
            .and_then(|v| v.as_f64()),
        Some(1.0)
    );

    query.stop();
    assert_eq!(query.status().state, QueryState::Stopped);
}

#[test]
fn test_sliding_sum_over_json_directory() {
    let dir = unique_temp_dir("sliding");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("0001.json"),
        concat!(
            r#"{"time": "2016-07-26 12:07:00", "item": "tea", "amount": 2.5}"#,
            "\n",
            r#"{"time": "2016-07-26 12:12:00", "item": "tea", "amount": 1.0}"#,
            "\n",
        ),
    )
    .unwrap();

    let session = StreamingSession::new("sliding");
    let query = session
        .read_stream()
        .schema(purchases_schema())
        .json_dir(&dir)
        .unwrap()
        .sliding_window("time", Duration::from_secs(600), Duration::from_secs(300))
        .group_by("item")
        .sum("amount")
        .write_stream()
        .query_name("spend")
        .trigger(Trigger::available_now())
        .memory()
        .start()
        .unwrap();

    assert!(query.await_termination(Some(Duration::from_secs(10))).unwrap());
    let table = session.table("spend").unwrap();
    let sum = |start, end| table.get(&key("tea", start, end)).and_then(|v| v.as_f64());
    assert_eq!(sum("2016-07-26 12:00:00", "2016-07-26 12:10:00"), Some(2.5));
    assert_eq!(sum("2016-07-26 12:05:00", "2016-07-26 12:15:00"), Some(3.5));
    assert_eq!(sum("2016-07-26 12:10:00", "2016-07-26 12:20:00"), Some(1.0));
    assert_eq!(table.len(), 3);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_append_mode_emits_closed_windows_once() {
    let session = StreamingSession::new("append");
    let input = MemorySource::new();
    let query = session
        .read_stream()
        .schema(actions_schema())
        .max_units_per_trigger(1)
        .memory(input.clone())
        .unwrap()
        .with_watermark(Duration::from_secs(600))
        .window("time", HOUR)
        .group_by("action")
        .count()
        .write_stream()
        .query_name("closed")
        .output_mode(OutputMode::Append)
        .memory()
        .start()
        .unwrap();

    input
        .push_lines(&[action("open", "2016-07-26 09:15:00")])
        .unwrap();
    query.process_all_available().unwrap();
    assert!(session.table("closed").unwrap().is_empty());

    // Watermark moves to 10:10, closing the 09:00 window.
    input
        .push_lines(&[action("open", "2016-07-26 10:20:00")])
        .unwrap();
    query.process_all_available().unwrap();
    let table = session.table("closed").unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(
        table
            .get(&key("open", "2016-07-26 09:00:00", "2016-07-26 10:00:00"))
            .and_then(|v| v.as_f64()),
        Some(1.0)
    );

    // Too late for the closed window: dropped.
    input
        .push_lines(&[action("open", "2016-07-26 09:30:00")])
        .unwrap();
    query.process_all_available().unwrap();
    assert_eq!(session.table("closed").unwrap().len(), 1);
    assert_eq!(query.last_progress().unwrap().late_rows, 1);
}

#[test]
fn test_sessions_are_isolated() {
    let a = StreamingSession::new("a");
    let b = StreamingSession::new("b");
    for session in [&a, &b] {
        let input = MemorySource::new();
        input
            .push_lines(&[action("open", "2016-07-26 09:15:00")])
            .unwrap();
        let query = session
            .read_stream()
            .schema(actions_schema())
            .memory(input)
            .unwrap()
            .window("time", HOUR)
            .group_by("action")
            .count()
            .write_stream()
            .query_name("counts")
            .memory()
            .start()
            .unwrap();
        query.process_all_available().unwrap();
    }
    assert_eq!(a.table("counts").unwrap().len(), 1);
    assert_eq!(b.table("counts").unwrap().len(), 1);
    assert_eq!(a.active().len(), 1);
}

#[test]
fn test_incomplete_chains_are_rejected() {
    let session = StreamingSession::new("errors");

    let err = session
        .read_stream()
        .memory(MemorySource::new())
        .err()
        .unwrap();
    assert!(matches!(err, QueryError::Configuration(_)));

    let err = session
        .read_stream()
        .schema(actions_schema())
        .json_dir(unique_temp_dir("missing"))
        .err()
        .unwrap();
    assert!(matches!(err, QueryError::Configuration(_)));

    let err = session
        .read_stream()
        .schema(actions_schema())
        .memory(MemorySource::new())
        .unwrap()
        .group_by("action")
        .count()
        .write_stream()
        .start()
        .err()
        .unwrap();
    assert!(matches!(err, QueryError::Configuration(_)));

    let err = session
        .read_stream()
        .schema(actions_schema())
        .memory(MemorySource::new())
        .unwrap()
        .window("time", HOUR)
        .group_by("action")
        .count()
        .write_stream()
        .memory()
        .start()
        .err()
        .unwrap();
    assert!(matches!(err, QueryError::Configuration(_)));

    // Sum over a string column.
    let err = session
        .read_stream()
        .schema(actions_schema())
        .memory(MemorySource::new())
        .unwrap()
        .window("time", HOUR)
        .group_by("action")
        .sum("action")
        .write_stream()
        .start()
        .err()
        .unwrap();
    assert!(matches!(err, QueryError::Configuration(_)));

    assert!(session.active().is_empty());
}
