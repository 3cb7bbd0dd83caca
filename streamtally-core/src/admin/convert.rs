use super::*;

impl From<QueryStatus> for rpc::QueryStatusReply {
    fn from(status: QueryStatus) -> Self {
        Self {
            id: status.id.to_string(),
            name: status.name,
            state: status.state.to_string(),
            phase: status.phase.to_string(),
            message: status.message,
            last_error: status.last_error,
            cycles_run: status.cycles_run,
            consecutive_failures: status.consecutive_failures,
            next_batch_id: status.last_cursor.next_batch_id,
            last_unit: status.last_cursor.last_unit.map(|u| u.0),
            units_seen: status.last_cursor.units_seen as u64,
            watermark: status.watermark,
        }
    }
}

impl From<QueryProgress> for rpc::ProgressEntry {
    fn from(progress: QueryProgress) -> Self {
        Self {
            batch_id: progress.batch_id,
            units: progress.units.into_iter().map(|u| u.0).collect(),
            input_rows: progress.input_rows,
            skipped_rows: progress.skipped_rows,
            late_rows: progress.late_rows,
            emitted_rows: progress.emitted_rows,
            state_rows: progress.state_rows,
            evicted_rows: progress.evicted_rows,
            watermark: progress.watermark,
            duration_ms: progress.duration_ms,
            timestamp: progress.timestamp,
        }
    }
}

pub(crate) fn table_reply(name: &str, table: &ResultTable) -> rpc::ReadTableReply {
    rpc::ReadTableReply {
        table: name.to_string(),
        batch_id: table.batch_id(),
        rows: table
            .iter()
            .map(|(key, value)| rpc::TableRow {
                key: key.key.clone(),
                window_start: key.window.start,
                window_end: key.window.end,
                value: value.to_string(),
                numeric_value: value.as_f64(),
            })
            .collect(),
    }
}

pub(crate) fn to_status(err: QueryError) -> Status {
    match err {
        QueryError::NotFound(what) => Status::not_found(what),
        QueryError::Configuration(msg) => Status::invalid_argument(msg),
        other => Status::internal(other.to_string()),
    }
}
