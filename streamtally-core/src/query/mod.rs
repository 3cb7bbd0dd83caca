//! # Streaming Queries
//!
//! A query ties a [`Source`](crate::source::Source), a schema, a window, an
//! aggregate and a [`Sink`](crate::sink::Sink) together and runs them as a
//! sequence of micro-batches on its own scheduler thread.
//!
//! - [`QueryConfig`]: declarative, serde-loadable query definition
//! - [`QueryManager`]: starts queries and tracks them by id, name and table
//! - [`QueryHandle`]: stop, status, progress and result access for one query

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointStore, FsCheckpointStore, QueryCheckpoint, RETAINED_CHECKPOINTS};
use crate::error::{QueryError, QueryResult};
use crate::output::OutputModeController;
use crate::schema::{EventProjection, InvalidRecordPolicy, JsonLinesDecoder, Schema, SchemaPolicy};
use crate::sink::{ConsoleSink, MemorySink, OutputMode, ResultTable, Sink};
use crate::source::{BatchCursor, Source};
use crate::state::{
    Accumulator, AggregateKind, AggregateSpec, AggregationKey, BatchDelta, Snapshot, StateStore,
};
use crate::time::{WatermarkPolicy, WatermarkTracker};
use crate::types::{BatchId, Event, EventTime, UnitId};
use crate::window::{WindowAssigner, WindowSpec};

mod config;
mod handle;
mod manager;
mod scheduler;
mod status;

pub use config::*;
pub use handle::*;
pub use manager::*;
pub use status::*;

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
