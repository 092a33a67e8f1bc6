//! Error types for anirank
//!
//! Each failure class has its own type so callers can tell an isolated
//! per-item failure from one that must stop an operation:
//! - [`FetchError`]: transient source failures, never fatal to a batch
//! - [`ValidationError`]: rejected operator input, the store is untouched
//! - [`ScoringError`]: titles excluded from ranking
//! - [`IndexResolutionError`]: a removal batch rejected as a whole

use crate::types::{SourceId, TitleId};
use thiserror::Error;

/// Failure talking to a rating source
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded its deadline
    #[error("Request timed out")]
    Timeout,

    /// Source has no such title
    #[error("Not found: {0}")]
    NotFound(String),

    /// Source answered with an error status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Optional capability the source does not provide
    #[error("Source {source_id} does not support {operation}")]
    Unsupported {
        source_id: SourceId,
        operation: &'static str,
    },

    /// Source could not be constructed from its configuration
    #[error("Source configuration error: {0}")]
    Config(String),
}

impl FetchError {
    /// True for failures worth trying again with another query
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Timeout | FetchError::Api { .. }
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Rejected operator input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Score {score} outside {source_id} scale {min}..={max}")]
    ScoreOutOfRange {
        source_id: SourceId,
        score: f64,
        min: f64,
        max: f64,
    },

    #[error("Not a number: '{0}'")]
    NotANumber(String),

    #[error("Vote count must be a nonnegative integer, got '{0}'")]
    InvalidVotes(String),

    #[error("Unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("Unknown title: {0}")]
    UnknownTitle(TitleId),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// Too few sources with nonzero weight to produce a composite
    #[error("Title {title_id} has {contributing} contributing sources, {required} required")]
    DataInsufficient {
        title_id: TitleId,
        contributing: usize,
        required: usize,
    },
}

/// Removal selector that cannot be resolved against the ranking snapshot
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexResolutionError {
    #[error("Malformed selector '{0}'")]
    Malformed(String),

    #[error("Position {position} out of range 1..={len}")]
    OutOfRange { position: usize, len: usize },

    #[error("No positions selected")]
    Empty,

    /// Title resolved from the snapshot is no longer in the store
    #[error("Title {0} was already removed")]
    AlreadyRemoved(TitleId),
}

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("Common error: {0}")]
    Common(#[from] anirank_common::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Removal rejected: {0}")]
    IndexResolution(#[from] IndexResolutionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
