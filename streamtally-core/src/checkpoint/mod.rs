//! Query checkpoints: the committed `(cursor, watermark, state)` of a query,
//! persisted after every successful cycle so a restarted query resumes where
//! it left off.

use crate::source::BatchCursor;
use crate::state::Snapshot;
use crate::time::WatermarkState;
use crate::types::{BatchId, EventTime};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

mod metadata;
mod storage;

pub use metadata::*;
pub use storage::*;

/// Number of checkpoints a query keeps after each save.
pub const RETAINED_CHECKPOINTS: usize = 10;

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;
