//! Per-source statistics used for standardization
//!
//! Resolution order for each enabled source:
//! 1. measured from the store (method "measured", enough samples, σ > 0)
//! 2. reported by the source itself
//! 3. configured estimate

use super::ScoringParams;
use crate::store::ObservationStore;
use crate::types::{ScoreDistribution, SourceId, SourceStatistics, StatisticsOrigin};
use anirank_common::config::StatisticsMethod;
use std::collections::BTreeMap;
use tracing::debug;

/// Mean and sample standard deviation (n-1)
pub fn mean_and_sample_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}

/// Population standard deviation of a score histogram
///
/// Buckets whose label is not a number are ignored.
pub fn distribution_std_dev(distribution: &ScoreDistribution) -> Option<f64> {
    let buckets: Vec<(f64, f64)> = distribution
        .iter()
        .filter_map(|(label, count)| Some((label.trim().parse::<f64>().ok()?, *count as f64)))
        .filter(|(_, count)| *count > 0.0)
        .collect();

    let total: f64 = buckets.iter().map(|(_, count)| count).sum();
    if total <= 0.0 {
        return None;
    }
    let mean = buckets.iter().map(|(score, count)| score * count).sum::<f64>() / total;
    let variance = buckets
        .iter()
        .map(|(score, count)| count * (score - mean).powi(2))
        .sum::<f64>()
        / total;
    Some(variance.sqrt())
}

/// Statistics for every source that has any
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsTable {
    by_source: BTreeMap<SourceId, SourceStatistics>,
}

impl StatisticsTable {
    pub fn build(
        store: &ObservationStore,
        params: &ScoringParams,
        reported: &BTreeMap<SourceId, SourceStatistics>,
    ) -> Self {
        let mut samples: BTreeMap<&SourceId, Vec<f64>> = BTreeMap::new();
        for obs in store.observations() {
            samples.entry(&obs.source_id).or_default().push(obs.raw_score);
        }

        let mut by_source = BTreeMap::new();
        for (source_id, source) in &params.sources {
            let measured = match params.statistics_method {
                StatisticsMethod::Measured => samples
                    .get(source_id)
                    .filter(|values| values.len() >= params.min_measured_samples)
                    .and_then(|values| {
                        let (mean, std_dev) = mean_and_sample_std(values)?;
                        (std_dev > 0.0).then_some(SourceStatistics {
                            mean,
                            std_dev,
                            origin: StatisticsOrigin::Measured {
                                samples: values.len(),
                            },
                        })
                    }),
                StatisticsMethod::Configured => None,
            };

            let configured = match (source.mean, source.std_dev) {
                (Some(mean), Some(std_dev)) => Some(SourceStatistics {
                    mean,
                    std_dev,
                    origin: StatisticsOrigin::Configured,
                }),
                _ => None,
            };

            let resolved = measured
                .or_else(|| reported.get(source_id).copied())
                .or(configured);

            match resolved {
                Some(stats) => {
                    debug!(
                        source = %source_id,
                        mean = stats.mean,
                        std_dev = stats.std_dev,
                        origin = ?stats.origin,
                        "Source statistics"
                    );
                    by_source.insert(source_id.clone(), stats);
                }
                None => debug!(source = %source_id, "No statistics available for source"),
            }
        }

        Self { by_source }
    }

    pub fn get(&self, source_id: &SourceId) -> Option<&SourceStatistics> {
        self.by_source.get(source_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceId, &SourceStatistics)> {
        self.by_source.iter()
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}
