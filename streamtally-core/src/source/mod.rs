//! # Sources
//!
//! A source exposes discrete input units (files, pushed buffers) in a stable
//! order. The scheduler asks for units not yet recorded in its
//! [`BatchCursor`] and reads them whole.
//!
//! - [`MemorySource`]: units pushed at runtime, for tests and emulation
//! - [`DirectorySource`]: files in a directory, ordered by modification time

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{BatchId, UnitId};

mod cursor;
mod directory;
mod memory;

pub use cursor::*;
pub use directory::*;
pub use memory::*;

/// A replayable, ordered collection of input units.
pub trait Source: Send + Sync {
    /// Units not yet in `cursor`, in the source's stable order, at most `limit`.
    fn list_new_units(&self, cursor: &BatchCursor, limit: Option<usize>) -> Result<Vec<UnitId>>;

    /// The raw bytes of one unit.
    fn read_unit(&self, id: &UnitId) -> Result<Vec<u8>>;

    /// Short human-readable description, used in logs and status.
    fn describe(&self) -> String;
}

#[cfg(test)]
#[path = "tests/source_tests.rs"]
mod tests;
