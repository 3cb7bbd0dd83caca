//! Error taxonomy for streaming queries.
//!
//! Errors are classified by how far they propagate:
//!
//! - [`DecodeError`] is per record. It is counted and skipped, unless the
//!   schema policy asks for the whole batch to fail.
//! - [`QueryError::Source`], [`QueryError::Sink`] and [`QueryError::Checkpoint`]
//!   are per cycle. The cursor is not advanced and the cycle is retried; the
//!   query fails only once the retry budget is exhausted.
//! - [`QueryError::Configuration`] is fatal at start; the query never runs.

use crate::types::UnitId;

/// A single malformed record inside an input unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct DecodeError {
    /// 1-based line number within the unit.
    pub line: usize,
    pub reason: String,
}

impl DecodeError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by query start, cycles, and the lifecycle API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// Invalid schema, window, aggregate, or mode combination.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A malformed record under the fail-batch policy.
    #[error("decode error in unit {unit}: {error}")]
    Decode { unit: UnitId, error: DecodeError },

    /// Discovery or read failure from the source.
    #[error("source error: {0}")]
    Source(String),

    /// The sink rejected the cycle's rows.
    #[error("sink error: {0}")]
    Sink(String),

    /// Persisting or restoring a checkpoint failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Operation on a query that is no longer running.
    #[error("query {0} is not active")]
    NotActive(String),

    /// A named query or table was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl QueryError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Source(err.to_string())
    }

    pub fn from_sink(err: impl std::fmt::Display) -> Self {
        Self::Sink(err.to_string())
    }

    pub fn from_checkpoint(err: impl std::fmt::Display) -> Self {
        Self::Checkpoint(format!("{err:#}"))
    }

    /// Whether the error belongs to a single cycle and may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::Source(_) | Self::Sink(_) | Self::Checkpoint(_)
        )
    }
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;
