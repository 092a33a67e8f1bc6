//! Error type shared by the AniRank crates
//!
//! Covers configuration, storage and file handling. Domain failures of the
//! ranking core (fetch, validation, scoring, removal) live in `anirank::error`
//! and wrap this type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite access for the title and observation tables
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Config files, ranking reports and log files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Report or seed JSON that does not match its schema
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unparseable TOML or a value rejected by `TomlConfig::validate`
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing title, source or report
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed analysis period or other command argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
