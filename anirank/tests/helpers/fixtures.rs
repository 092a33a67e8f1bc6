//! Store and parameter builders

use super::mock_source::MockSource;
use anirank::scoring::{ScoringParams, SourceParams};
use anirank::sources::{RatingSource, SourceSet};
use anirank::store::ObservationStore;
use anirank::types::{ObservationOrigin, RatingObservation, SourceRating, TitleRecord};
use anirank_common::config::StatisticsMethod;
use chrono::Utc;
use std::sync::Arc;

/// Scoring over `sources`, each with configured mean 7.0 and σ 1.0
pub fn configured_params(sources: &[&str]) -> ScoringParams {
    let mut params = ScoringParams {
        statistics_method: StatisticsMethod::Configured,
        ..ScoringParams::default()
    };
    for id in sources {
        params.sources.insert(
            (*id).into(),
            SourceParams {
                platform_weight: 1.0,
                mean: Some(7.0),
                std_dev: Some(1.0),
            },
        );
    }
    params
}

pub fn observation(
    title_id: &str,
    source: &str,
    score: f64,
    votes: u64,
    origin: ObservationOrigin,
) -> RatingObservation {
    RatingObservation::new(
        title_id.into(),
        source.into(),
        SourceRating {
            raw_score: score,
            vote_count: votes,
            distribution: None,
        },
        origin,
        Utc::now(),
    )
}

/// Store of (id, title, [(source, score, votes)]) rows, all collected
pub fn store_with(rows: &[(&str, &str, &[(&str, f64, u64)])]) -> ObservationStore {
    let mut store = ObservationStore::new();
    for (id, title, scores) in rows {
        store.insert_title(TitleRecord::new(*id, *title));
        for (source, score, votes) in scores.iter() {
            store
                .upsert(observation(id, source, *score, *votes, ObservationOrigin::Collected))
                .unwrap();
        }
    }
    store
}

pub fn source_set(sources: &[Arc<MockSource>]) -> SourceSet {
    sources
        .iter()
        .map(|source| {
            let source: Arc<dyn RatingSource> = Arc::clone(source) as Arc<dyn RatingSource>;
            (source.id().clone(), source)
        })
        .collect()
}
