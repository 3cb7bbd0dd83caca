//! # StreamTally Core
//!
//! Micro-batch engine for continuously updated windowed aggregations over
//! append-only input.
//!
//! A query repeatedly discovers new input units, decodes them against a
//! declared schema, assigns every event to event-time windows, merges the
//! contributions into keyed state, and publishes results to a sink according
//! to its output mode:
//!
//! - [`source`]: input discovery ([`DirectorySource`](source::DirectorySource),
//!   [`MemorySource`](source::MemorySource)) and the [`BatchCursor`](source::BatchCursor).
//! - [`schema`]: schemas, the JSON-lines decoder, and the event projection.
//! - [`window`]: tumbling and sliding window assigners.
//! - [`state`]: aggregate accumulators and the staged [`StateStore`](state::StateStore).
//! - [`time`]: watermark tracking.
//! - [`output`]: complete/update/append emission and eviction.
//! - [`sink`]: result tables and the console sink.
//! - [`checkpoint`]: durable batch-boundary checkpoints.
//! - [`query`]: configuration, the cycle scheduler, handles, and the manager.
//! - [`admin`]: the gRPC admin service over a [`QueryManager`](query::QueryManager).

pub mod admin;
pub mod checkpoint;
pub mod error;
pub mod interval;
pub mod output;
pub mod query;
pub mod schema;
pub mod sink;
pub mod source;
pub mod state;
pub mod time;
pub mod types;
pub mod window;

pub use error::{QueryError, QueryResult};
