//! Completion engine
//!
//! - [`detector`]: which (title, source) observations are missing
//! - [`variants`]: the query cascade tried for each missing observation
//! - [`orchestrator`]: concurrent retry pass under rate and concurrency limits

pub mod detector;
pub mod orchestrator;
pub mod variants;

pub use detector::{CompletionDetector, WorkItem};
pub use orchestrator::{CompletionOutcome, Resolution, RetryOrchestrator, RetryReport, UnresolvedReason};
pub use variants::{title_variants, TitleVariant, VariantKind};

use anirank_common::config::TomlConfig;
use std::time::Duration;

/// Immutable completion configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub enabled: bool,
    /// Total attempts per item across all variants
    pub max_retry_per_anime: u32,
    pub search_timeout: Duration,
    pub parallel_searches: usize,
    pub min_existing_sources: usize,
    pub use_alternative_titles: bool,
    pub default_manual_votes: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

impl CompletionSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        let completion = &config.completion;
        Self {
            enabled: completion.enabled,
            max_retry_per_anime: completion.max_retry_per_anime,
            search_timeout: Duration::from_secs(completion.search_timeout_secs),
            parallel_searches: completion.parallel_searches,
            min_existing_sources: completion.min_existing_sources,
            use_alternative_titles: completion.use_alternative_titles,
            default_manual_votes: completion.default_manual_votes,
        }
    }
}
