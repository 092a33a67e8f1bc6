//! anirank library interface
//!
//! Cross-site anime rating reconciliation: ratings for the same titles are
//! collected from several sites, normalized onto one scale, combined into a
//! composite score and ranked. Missing (title, source) observations are
//! filled by an automatic retry pass or by manual entry.

pub mod completion;
pub mod db;
pub mod error;
pub mod manual;
pub mod pipeline;
pub mod ranking;
pub mod report;
pub mod scoring;
pub mod sources;
pub mod store;
pub mod types;

pub use crate::error::{Error, Result};
pub use crate::pipeline::{CollectSummary, Pipeline, PipelineRun};
pub use crate::ranking::{CompositeResult, Ranking};
pub use crate::scoring::{CompositeScore, CompositeScorer, ScoringParams};
pub use crate::store::ObservationStore;
