//! Output mode controller: decides which rows a cycle emits and which state
//! may be evicted once the cycle commits.

use serde::{Deserialize, Serialize};

use crate::sink::{EmittedRow, OutputMode};
use crate::state::{StagedMerge, StateStore};
use crate::types::{EventTime, EVENT_TIME_MIN};

mod controller;

pub use controller::*;

#[cfg(test)]
#[path = "tests/output_tests.rs"]
mod tests;
