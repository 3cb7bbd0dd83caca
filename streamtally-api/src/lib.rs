//! # StreamTally API
//!
//! Fluent session API for starting windowed streaming aggregations.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use streamtally_api::StreamingSession;
//! use streamtally_core::schema::{DataType, Field, Schema};
//! use streamtally_core::sink::OutputMode;
//!
//! # fn main() -> streamtally_core::QueryResult<()> {
//! let session = StreamingSession::new("actions");
//! let schema = Schema::new(vec![
//!     Field::new("time", DataType::Timestamp, false),
//!     Field::new("action", DataType::String, false),
//! ])?;
//!
//! let query = session
//!     .read_stream()
//!     .schema(schema)
//!     .max_units_per_trigger(1)
//!     .json_dir("/data/events")?
//!     .window("time", Duration::from_secs(3600))
//!     .group_by("action")
//!     .count()
//!     .write_stream()
//!     .query_name("counts")
//!     .output_mode(OutputMode::Complete)
//!     .memory()
//!     .start()?;
//!
//! query.process_all_available()?;
//! println!("{}", session.table("counts")?.render());
//! # Ok(())
//! # }
//! ```
//!
//! - [`session`]: [`StreamingSession`], the owner of every query it starts.
//! - [`stream`]: [`StreamReader`](stream::StreamReader),
//!   [`StreamFrame`](stream::StreamFrame) and
//!   [`WindowedAggregation`](stream::WindowedAggregation), the fluent chain
//!   from input to aggregate.
//! - [`writer`]: [`StreamWriter`](writer::StreamWriter), sink and trigger
//!   choice, and query start.

pub mod session;
pub mod stream;
pub mod writer;

pub use session::StreamingSession;
pub use streamtally_core;
