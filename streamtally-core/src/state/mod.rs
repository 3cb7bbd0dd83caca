//! # Aggregation State
//!
//! The running result of a query: a mapping from [`AggregationKey`]
//! (group-by value plus window) to an [`Accumulator`].
//!
//! - [`Accumulator`]: mergeable aggregate values with an identity element
//! - [`StateStore`]: the keyed store, with staged batch application so a
//!   failed emit leaves committed state untouched

use std::collections::BTreeMap;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::window::TimeWindow;

mod accumulator;
mod store;

pub use accumulator::*;
pub use store::*;

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
