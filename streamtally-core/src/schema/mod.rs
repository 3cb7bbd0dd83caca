//! # Record Schema & Decoder
//!
//! Input is declared up front rather than inferred: a [`Schema`] lists the
//! fields, their [`DataType`]s and nullability, and a [`SchemaPolicy`] says
//! what to do with unknown fields and invalid records.
//!
//! - [`JsonLinesDecoder`] turns one raw input unit (newline-delimited JSON)
//!   into typed [`Row`]s plus per-line [`DecodeError`](crate::error::DecodeError)s.
//! - [`EventProjection`] picks the time, group-by and measure columns out of a
//!   row and produces the [`Event`](crate::types::Event) the engine aggregates.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, QueryError, QueryResult};
use crate::types::{Event, EventTime};

mod decoder;
mod projection;
mod types;

pub use decoder::*;
pub use projection::*;
pub use types::*;

#[cfg(test)]
#[path = "tests/schema_tests.rs"]
mod tests;
