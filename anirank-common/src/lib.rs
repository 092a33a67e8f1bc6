//! # AniRank Common Library
//!
//! Shared code for the AniRank workspace including:
//! - Configuration model, validation and file resolution
//! - Analysis period (season) utilities
//! - Pipeline event types and the broadcast EventBus
//! - The common error type

pub mod config;
pub mod error;
pub mod events;
pub mod period;

pub use error::{Error, Result};
pub use period::{AnalysisPeriod, Season};
