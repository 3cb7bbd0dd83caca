//! # Window Assigner
//!
//! Maps an event timestamp to the half-open [`TimeWindow`]s it belongs to.
//!
//! Assignment is a pure function of the timestamp and the window geometry:
//! boundaries sit at `offset + k * slide` milliseconds since the Unix epoch,
//! so re-assigning the same event always yields the same windows, in this
//! process or after a restart.
//!
//! - [`TumblingWindows`]: fixed-size, non-overlapping (one window per event)
//! - [`SlidingWindows`]: fixed-size, overlapping (`ceil(size / slide)` windows)

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::types::{EventTime, EVENT_TIME_MAX, EVENT_TIME_MIN};

mod assigners;
mod primitives;

pub use assigners::*;
pub use primitives::*;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
