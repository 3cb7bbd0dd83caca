//! # Sinks
//!
//! A sink receives the rows the output mode controller emits for a cycle.
//! Each write is atomic from a reader's point of view: either all of the
//! cycle's rows are visible or none are.
//!
//! - [`MemorySink`]: a named, queryable [`ResultTable`], swapped on each write
//! - [`ConsoleSink`]: prints each batch as a text table

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::schema::format_event_time;
use crate::state::{Accumulator, AggregationKey};
use crate::types::BatchId;

mod console;
mod memory;
mod table;

pub use console::*;
pub use memory::*;
pub use table::*;

/// Which subset of the aggregation state is emitted each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The whole result, every cycle.
    #[default]
    Complete,
    /// Only rows whose value changed this cycle.
    Update,
    /// Only rows whose window has closed, exactly once.
    Append,
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Complete => "complete",
            Self::Update => "update",
            Self::Append => "append",
        })
    }
}

impl std::str::FromStr for OutputMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, QueryError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complete" => Ok(Self::Complete),
            "update" => Ok(Self::Update),
            "append" => Ok(Self::Append),
            other => Err(QueryError::config(format!("unknown output mode '{other}'"))),
        }
    }
}

/// One result row: an aggregation key and its current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedRow {
    pub key: AggregationKey,
    pub value: Accumulator,
}

impl EmittedRow {
    pub fn new(key: AggregationKey, value: Accumulator) -> Self {
        Self { key, value }
    }
}

/// Destination of emitted rows.
pub trait Sink: Send + Sync {
    /// Deliver the rows of batch `batch_id`. Redelivering an already
    /// applied batch id must not change what readers see.
    fn write(&self, batch_id: BatchId, rows: &[EmittedRow], mode: OutputMode) -> Result<()>;

    /// Whether this sink can honor `mode`.
    fn supports(&self, mode: OutputMode) -> bool;

    fn describe(&self) -> String;
}

#[cfg(test)]
#[path = "tests/sink_tests.rs"]
mod tests;
