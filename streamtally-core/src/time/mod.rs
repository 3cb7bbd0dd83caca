use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{EventTime, Watermark, EVENT_TIME_MIN};

mod watermark;

pub use watermark::*;

#[cfg(test)]
#[path = "tests/time_tests.rs"]
mod tests;
