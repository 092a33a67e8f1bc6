//! Normalization and composite scoring
//!
//! Turns a title's observations into one comparable number:
//! 1. Bayesian-smooth each raw score toward its source mean
//! 2. Standardize against the source statistics
//! 3. Average the Z-scores weighted by `ln(votes) · platform_weight`
//!
//! Scoring is a pure projection of the store plus parameters. Titles with
//! fewer than `min_sources` weighted sources get [`ScoringError::DataInsufficient`].

pub mod normalize;
pub mod statistics;

pub use normalize::{bayesian_smooth, confidence, source_weight, z_score};
pub use statistics::{distribution_std_dev, mean_and_sample_std, StatisticsTable};

use crate::error::ScoringError;
use crate::store::ObservationStore;
use crate::types::{RatingObservation, SourceId, SourceStatistics, TitleId};
use anirank_common::config::{StatisticsMethod, TomlConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Per-source scoring inputs
#[derive(Debug, Clone, PartialEq)]
pub struct SourceParams {
    pub platform_weight: f64,
    /// Configured mean estimate
    pub mean: Option<f64>,
    /// Configured standard deviation estimate
    pub std_dev: Option<f64>,
}

/// Immutable scoring configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringParams {
    /// Bayesian prior strength `M`
    pub min_credible_votes: f64,
    pub min_votes_threshold: u64,
    pub min_sources: usize,
    pub use_natural_log: bool,
    pub bayesian_smoothing: bool,
    pub statistics_method: StatisticsMethod,
    pub min_measured_samples: usize,
    /// Enabled sources only; observations from other sources are ignored
    pub sources: BTreeMap<SourceId, SourceParams>,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            min_credible_votes: 5000.0,
            min_votes_threshold: 50,
            min_sources: 2,
            use_natural_log: true,
            bayesian_smoothing: true,
            statistics_method: StatisticsMethod::Measured,
            min_measured_samples: 5,
            sources: BTreeMap::new(),
        }
    }
}

impl ScoringParams {
    pub fn from_config(config: &TomlConfig) -> Self {
        let scoring = &config.scoring;
        let sources = config
            .sources
            .iter()
            .filter(|(_, source)| source.enabled)
            .map(|(id, source)| {
                (
                    SourceId::from(id.as_str()),
                    SourceParams {
                        platform_weight: source.platform_weight,
                        mean: source.mean,
                        std_dev: source.std_dev,
                    },
                )
            })
            .collect();

        Self {
            min_credible_votes: scoring.min_credible_votes as f64,
            min_votes_threshold: scoring.min_votes_threshold,
            min_sources: scoring.min_sources,
            use_natural_log: scoring.use_natural_log,
            bayesian_smoothing: scoring.bayesian_smoothing,
            statistics_method: scoring.statistics_method,
            min_measured_samples: scoring.min_measured_samples,
            sources,
        }
    }
}

/// One source's part in a composite
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceContribution {
    pub source_id: SourceId,
    pub raw_score: f64,
    pub vote_count: u64,
    pub smoothed_score: f64,
    pub z_score: f64,
    pub weight: f64,
}

/// Composite for one eligible title
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeScore {
    pub title_id: TitleId,
    pub composite_score: f64,
    pub confidence: f64,
    pub contributing_source_count: usize,
    /// Votes summed over contributing sources
    pub total_votes: u64,
    pub contributions: Vec<SourceContribution>,
}

impl CompositeScore {
    pub fn contributing_sources(&self) -> impl Iterator<Item = &SourceId> {
        self.contributions.iter().map(|c| &c.source_id)
    }
}

/// Composite for every title in a store, split into eligible and insufficient
#[derive(Debug, Clone, Default)]
pub struct ScoreBoard {
    pub scored: Vec<CompositeScore>,
    pub insufficient: Vec<ScoringError>,
    pub statistics: StatisticsTable,
}

/// Score one title from its observations
///
/// Pure: the same observations, statistics and parameters always give the
/// same result.
pub fn composite_score<'a>(
    title_id: &TitleId,
    observations: impl IntoIterator<Item = &'a RatingObservation>,
    statistics: &StatisticsTable,
    params: &ScoringParams,
) -> Result<CompositeScore, ScoringError> {
    let mut contributions = Vec::new();

    for obs in observations {
        let Some(source) = params.sources.get(&obs.source_id) else {
            continue;
        };
        let Some(stats) = statistics.get(&obs.source_id) else {
            continue;
        };
        let weight = source_weight(
            obs.vote_count,
            source.platform_weight,
            params.min_votes_threshold,
            params.use_natural_log,
        );
        if weight <= 0.0 {
            continue;
        }

        let smoothed = if params.bayesian_smoothing {
            bayesian_smooth(obs.raw_score, obs.vote_count, stats.mean, params.min_credible_votes)
        } else {
            obs.raw_score
        };

        contributions.push(SourceContribution {
            source_id: obs.source_id.clone(),
            raw_score: obs.raw_score,
            vote_count: obs.vote_count,
            smoothed_score: smoothed,
            z_score: z_score(smoothed, stats.mean, stats.std_dev),
            weight,
        });
    }

    let weight_sum: f64 = contributions.iter().map(|c| c.weight).sum();
    if contributions.len() < params.min_sources.max(1) || weight_sum <= 0.0 {
        return Err(ScoringError::DataInsufficient {
            title_id: title_id.clone(),
            contributing: contributions.len(),
            required: params.min_sources,
        });
    }

    let weighted_sum: f64 = contributions.iter().map(|c| c.z_score * c.weight).sum();
    let total_votes: u64 = contributions.iter().map(|c| c.vote_count).sum();

    Ok(CompositeScore {
        title_id: title_id.clone(),
        composite_score: weighted_sum / weight_sum,
        confidence: confidence(contributions.len(), total_votes),
        contributing_source_count: contributions.len(),
        total_votes,
        contributions,
    })
}

/// Scores a store with fixed parameters
#[derive(Debug, Clone)]
pub struct CompositeScorer {
    params: ScoringParams,
    reported: BTreeMap<SourceId, SourceStatistics>,
}

impl CompositeScorer {
    pub fn new(params: ScoringParams) -> Self {
        Self {
            params,
            reported: BTreeMap::new(),
        }
    }

    /// Statistics reported by the sources themselves
    pub fn with_reported_statistics(mut self, reported: BTreeMap<SourceId, SourceStatistics>) -> Self {
        self.reported = reported;
        self
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    pub fn statistics(&self, store: &ObservationStore) -> StatisticsTable {
        StatisticsTable::build(store, &self.params, &self.reported)
    }

    pub fn score_title(
        &self,
        store: &ObservationStore,
        statistics: &StatisticsTable,
        title_id: &TitleId,
    ) -> Result<CompositeScore, ScoringError> {
        composite_score(title_id, store.observations_for(title_id), statistics, &self.params)
    }

    /// Score every title, in title id order
    pub fn score_all(&self, store: &ObservationStore) -> ScoreBoard {
        let statistics = self.statistics(store);
        let mut board = ScoreBoard {
            statistics,
            ..ScoreBoard::default()
        };

        for record in store.titles() {
            match self.score_title(store, &board.statistics, &record.id) {
                Ok(score) => board.scored.push(score),
                Err(err) => {
                    debug!(title_id = %record.id, error = %err, "Title excluded from ranking");
                    board.insufficient.push(err);
                }
            }
        }

        info!(
            scored = board.scored.len(),
            insufficient = board.insufficient.len(),
            "Scoring complete"
        );
        board
    }
}
