//! Dense ranking, percentiles and snapshot-based removal
//!
//! A [`Ranking`] is an immutable snapshot. Removal selectors are resolved
//! against one snapshot into a [`RemovalPlan`] of title ids before anything
//! is deleted, so positions never shift while a batch is being applied.

use crate::error::IndexResolutionError;
use crate::scoring::{CompositeScore, CompositeScorer, ScoreBoard};
use crate::store::ObservationStore;
use crate::types::{SourceId, TitleId};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::info;

/// Ranked title
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeResult {
    /// 1-based dense rank
    pub rank: usize,
    /// `(K - rank + 1) / K · 100`
    pub percentile: f64,
    pub title: String,
    #[serde(flatten)]
    pub score: CompositeScore,
}

impl CompositeResult {
    pub fn title_id(&self) -> &TitleId {
        &self.score.title_id
    }
}

/// Title excluded from ranking for lack of data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnrankedTitle {
    pub title_id: TitleId,
    pub title: String,
    pub contributing_source_count: usize,
    pub observed_sources: Vec<SourceId>,
}

/// Position of a title among the ranked titles observed on one source
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SiteRank {
    pub rank: usize,
    pub percentile: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ranking {
    pub entries: Vec<CompositeResult>,
    pub unranked: Vec<UnrankedTitle>,
}

pub fn percentile(rank: usize, total: usize) -> f64 {
    if total == 0 || rank == 0 || rank > total {
        return 0.0;
    }
    (total - rank + 1) as f64 / total as f64 * 100.0
}

/// Composite desc, total votes desc, title asc, title id asc
fn compare_entries(a: &(String, CompositeScore), b: &(String, CompositeScore)) -> Ordering {
    b.1.composite_score
        .total_cmp(&a.1.composite_score)
        .then_with(|| b.1.total_votes.cmp(&a.1.total_votes))
        .then_with(|| a.0.cmp(&b.0))
        .then_with(|| a.1.title_id.cmp(&b.1.title_id))
}

impl Ranking {
    /// Dense ranking of a score board
    pub fn from_board(board: ScoreBoard, store: &ObservationStore) -> Self {
        let title_of = |id: &TitleId| {
            store
                .title(id)
                .map(|record| record.title.clone())
                .unwrap_or_else(|| id.to_string())
        };

        let mut scored: Vec<(String, CompositeScore)> = board
            .scored
            .into_iter()
            .map(|score| (title_of(&score.title_id), score))
            .collect();
        scored.sort_by(compare_entries);

        let total = scored.len();
        let entries = scored
            .into_iter()
            .enumerate()
            .map(|(i, (title, score))| CompositeResult {
                rank: i + 1,
                percentile: percentile(i + 1, total),
                title,
                score,
            })
            .collect();

        let unranked = board
            .insufficient
            .into_iter()
            .map(|err| {
                let crate::error::ScoringError::DataInsufficient {
                    title_id,
                    contributing,
                    ..
                } = err;
                UnrankedTitle {
                    title: title_of(&title_id),
                    observed_sources: store.observed_sources(&title_id).into_iter().collect(),
                    contributing_source_count: contributing,
                    title_id,
                }
            })
            .collect();

        Self { entries, unranked }
    }

    /// Score and rank a store
    pub fn compute(scorer: &CompositeScorer, store: &ObservationStore) -> Self {
        let ranking = Self::from_board(scorer.score_all(store), store);
        info!(
            ranked = ranking.entries.len(),
            unranked = ranking.unranked.len(),
            "Ranking computed"
        );
        ranking
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, rank: usize) -> Option<&CompositeResult> {
        rank.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn rank_of(&self, title_id: &TitleId) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| entry.title_id() == title_id)
            .map(|entry| entry.rank)
    }

    /// Per-source rank of every ranked title, by raw score on that source
    ///
    /// Sources observed on fewer than 2 ranked titles get no ranking.
    pub fn site_rankings(
        &self,
        store: &ObservationStore,
    ) -> BTreeMap<SourceId, BTreeMap<TitleId, SiteRank>> {
        let mut per_source: BTreeMap<SourceId, Vec<(f64, u64, &CompositeResult)>> = BTreeMap::new();
        for entry in &self.entries {
            for obs in store.observations_for(entry.title_id()) {
                per_source
                    .entry(obs.source_id.clone())
                    .or_default()
                    .push((obs.raw_score, obs.vote_count, entry));
            }
        }

        per_source
            .into_iter()
            .filter(|(_, titles)| titles.len() >= 2)
            .map(|(source, mut titles)| {
                titles.sort_by(|a, b| {
                    b.0.total_cmp(&a.0)
                        .then_with(|| b.1.cmp(&a.1))
                        .then_with(|| a.2.rank.cmp(&b.2.rank))
                });
                let total = titles.len();
                let ranks = titles
                    .into_iter()
                    .enumerate()
                    .map(|(i, (_, _, entry))| {
                        (
                            entry.title_id().clone(),
                            SiteRank {
                                rank: i + 1,
                                percentile: percentile(i + 1, total),
                            },
                        )
                    })
                    .collect();
                (source, ranks)
            })
            .collect()
    }

    /// Resolve selectors against this snapshot
    ///
    /// The whole batch fails if any position is outside `1..=len`.
    pub fn resolve(&self, selectors: &[Selector]) -> Result<RemovalPlan, IndexResolutionError> {
        let mut positions: Vec<usize> = Vec::new();
        for selector in selectors {
            let (first, last) = match *selector {
                Selector::Single(position) => (position, position),
                Selector::Range(start, end) => (start.min(end), start.max(end)),
            };
            for position in [first, last] {
                if position == 0 || position > self.len() {
                    return Err(IndexResolutionError::OutOfRange {
                        position,
                        len: self.len(),
                    });
                }
            }
            positions.extend(first..=last);
        }
        positions.sort_unstable();
        positions.dedup();

        if positions.is_empty() {
            return Err(IndexResolutionError::Empty);
        }

        let targets = positions
            .iter()
            .filter_map(|&position| self.get(position))
            .map(|entry| RemovalTarget {
                position: entry.rank,
                title_id: entry.title_id().clone(),
                title: entry.title.clone(),
            })
            .collect();

        Ok(RemovalPlan {
            snapshot_len: self.len(),
            targets,
        })
    }
}

/// One removal selector, in 1-based ranking positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Single(usize),
    /// Inclusive; reversed bounds are accepted
    Range(usize, usize),
}

/// Parse "3", "3,7,12" or "1-5,10,15-20"
///
/// Any malformed part rejects the whole input.
pub fn parse_selectors(input: &str) -> Result<Vec<Selector>, IndexResolutionError> {
    let malformed = |part: &str| IndexResolutionError::Malformed(part.to_string());
    let parse_position = |text: &str| -> Result<usize, IndexResolutionError> {
        text.trim().parse::<usize>().map_err(|_| malformed(text.trim()))
    };

    let mut selectors = Vec::new();
    for part in input.split(',').map(str::trim) {
        if part.is_empty() {
            continue;
        }
        let selector = match part.split_once('-') {
            Some((start, end)) => Selector::Range(parse_position(start)?, parse_position(end)?),
            None => Selector::Single(parse_position(part)?),
        };
        selectors.push(selector);
    }

    if selectors.is_empty() {
        return Err(IndexResolutionError::Empty);
    }
    Ok(selectors)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalTarget {
    /// Position in the snapshot the plan was resolved against
    pub position: usize,
    pub title_id: TitleId,
    pub title: String,
}

/// Titles to delete, resolved from one ranking snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalPlan {
    pub snapshot_len: usize,
    pub targets: Vec<RemovalTarget>,
}

impl RemovalPlan {
    pub fn title_ids(&self) -> Vec<TitleId> {
        self.targets.iter().map(|t| t.title_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Delete the planned titles in one batch, then rank the survivors
    pub fn apply(
        &self,
        store: &mut ObservationStore,
        scorer: &CompositeScorer,
    ) -> Result<Ranking, IndexResolutionError> {
        let removed = store.remove_titles(&self.title_ids())?;
        info!(
            removed = removed.len(),
            remaining = store.title_count(),
            "Titles removed"
        );
        Ok(Ranking::compute(scorer, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{ScoringParams, SourceParams};
    use crate::types::{ObservationOrigin, RatingObservation, SourceRating, TitleRecord};
    use anirank_common::config::StatisticsMethod;
    use chrono::Utc;

    fn scorer() -> CompositeScorer {
        let mut params = ScoringParams {
            statistics_method: StatisticsMethod::Configured,
            ..ScoringParams::default()
        };
        for id in ["bangumi", "mal"] {
            params.sources.insert(
                id.into(),
                SourceParams {
                    platform_weight: 1.0,
                    mean: Some(7.0),
                    std_dev: Some(1.0),
                },
            );
        }
        CompositeScorer::new(params)
    }

    fn add(store: &mut ObservationStore, id: &str, title: &str, scores: &[(&str, f64, u64)]) {
        store.insert_title(TitleRecord::new(id, title));
        for (source, score, votes) in scores {
            store
                .upsert(RatingObservation::new(
                    id.into(),
                    (*source).into(),
                    SourceRating {
                        raw_score: *score,
                        vote_count: *votes,
                        distribution: None,
                    },
                    ObservationOrigin::Collected,
                    Utc::now(),
                ))
                .unwrap();
        }
    }

    /// Ten titles with strictly decreasing scores: t01 best
    fn ten_titles() -> ObservationStore {
        let mut store = ObservationStore::new();
        for i in 1..=10 {
            let score = 9.5 - i as f64 * 0.2;
            add(
                &mut store,
                &format!("t{i:02}"),
                &format!("Title {i:02}"),
                &[("bangumi", score, 20_000), ("mal", score, 20_000)],
            );
        }
        store
    }

    fn ids(ranking: &Ranking) -> Vec<String> {
        ranking.entries.iter().map(|e| e.title_id().to_string()).collect()
    }

    #[test]
    fn test_dense_ranks_and_percentiles() {
        let store = ten_titles();
        let ranking = Ranking::compute(&scorer(), &store);

        assert_eq!(ranking.len(), 10);
        for (i, entry) in ranking.entries.iter().enumerate() {
            assert_eq!(entry.rank, i + 1);
        }
        assert_eq!(ranking.entries[0].title_id().as_str(), "t01");
        assert_eq!(ranking.entries[0].percentile, 100.0);
        assert_eq!(ranking.entries[9].percentile, 10.0);
    }

    #[test]
    fn test_identical_observations_ordered_by_title() {
        let mut store = ObservationStore::new();
        add(&mut store, "a", "Zeta", &[("bangumi", 8.0, 1000), ("mal", 8.0, 1000)]);
        add(&mut store, "b", "Alpha", &[("bangumi", 8.0, 1000), ("mal", 8.0, 1000)]);
        add(&mut store, "c", "Mid", &[("bangumi", 8.0, 9000), ("mal", 8.0, 9000)]);

        // "c" smooths differently; only the identical pair ties
        let ranking = Ranking::compute(&scorer(), &store);
        let pos_a = ranking.rank_of(&"a".into()).unwrap();
        let pos_b = ranking.rank_of(&"b".into()).unwrap();
        assert_eq!(pos_b + 1, pos_a);
    }

    fn composite(id: &str, score: f64, votes: u64) -> CompositeScore {
        CompositeScore {
            title_id: id.into(),
            composite_score: score,
            confidence: 0.8,
            contributing_source_count: 2,
            total_votes: votes,
            contributions: Vec::new(),
        }
    }

    #[test]
    fn test_equal_composites_ordered_by_votes_then_title() {
        let mut store = ObservationStore::new();
        store.insert_title(TitleRecord::new("a", "Alpha"));
        store.insert_title(TitleRecord::new("b", "Beta"));
        store.insert_title(TitleRecord::new("z", "Zeta"));
        store.insert_title(TitleRecord::new("top", "Omega"));

        let board = ScoreBoard {
            scored: vec![
                composite("a", 0.5, 10),
                composite("b", 0.5, 10),
                composite("z", 0.5, 99),
                composite("top", 0.9, 1),
            ],
            ..ScoreBoard::default()
        };
        let ranking = Ranking::from_board(board, &store);

        // Score first, then more votes, then title
        assert_eq!(ids(&ranking), vec!["top", "z", "a", "b"]);
        let ranks: Vec<usize> = ranking.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unranked_titles_listed_separately() {
        let mut store = ten_titles();
        add(&mut store, "solo", "Only On Mal", &[("mal", 9.9, 50_000)]);

        let ranking = Ranking::compute(&scorer(), &store);
        assert_eq!(ranking.len(), 10);
        assert_eq!(ranking.unranked.len(), 1);
        let unranked = &ranking.unranked[0];
        assert_eq!(unranked.title_id.as_str(), "solo");
        assert_eq!(unranked.title, "Only On Mal");
        assert_eq!(unranked.observed_sources, vec![SourceId::from("mal")]);
        assert!(ranking.rank_of(&"solo".into()).is_none());
    }

    #[test]
    fn test_parse_selectors() {
        assert_eq!(parse_selectors("3").unwrap(), vec![Selector::Single(3)]);
        assert_eq!(
            parse_selectors(" 1-5, 10 ,15-20").unwrap(),
            vec![Selector::Range(1, 5), Selector::Single(10), Selector::Range(15, 20)]
        );
        assert_eq!(parse_selectors("7-3").unwrap(), vec![Selector::Range(7, 3)]);
        assert_eq!(
            parse_selectors("1,x").unwrap_err(),
            IndexResolutionError::Malformed("x".to_string())
        );
        assert!(parse_selectors("1-").is_err());
        assert!(parse_selectors("-2").is_err());
        assert_eq!(parse_selectors(" , ").unwrap_err(), IndexResolutionError::Empty);
    }

    #[test]
    fn test_resolve_dedups_and_swaps_reversed_ranges() {
        let store = ten_titles();
        let ranking = Ranking::compute(&scorer(), &store);

        let plan = ranking.resolve(&parse_selectors("4-2,3,9").unwrap()).unwrap();
        let positions: Vec<_> = plan.targets.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![2, 3, 4, 9]);
        assert_eq!(plan.snapshot_len, 10);
        assert_eq!(plan.title_ids()[0].as_str(), "t02");
    }

    #[test]
    fn test_out_of_range_rejects_whole_batch() {
        let mut store = ten_titles();
        let ranking = Ranking::compute(&scorer(), &store);

        let err = ranking.resolve(&parse_selectors("1,2,11").unwrap()).unwrap_err();
        assert_eq!(err, IndexResolutionError::OutOfRange { position: 11, len: 10 });
        assert!(ranking.resolve(&[Selector::Single(0)]).is_err());

        // Nothing was deleted
        assert_eq!(store.title_count(), 10);
        let plan = ranking.resolve(&[Selector::Single(1)]).unwrap();
        plan.apply(&mut store, &scorer()).unwrap();
        assert_eq!(store.title_count(), 9);
    }

    #[test]
    fn test_remove_position_two_of_ten() {
        let mut store = ten_titles();
        let before = Ranking::compute(&scorer(), &store);
        let plan = before.resolve(&[Selector::Single(2)]).unwrap();

        let after = plan.apply(&mut store, &scorer()).unwrap();

        assert_eq!(after.len(), 9);
        let ranks: Vec<_> = after.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, (1..=9).collect::<Vec<_>>());

        let mut expected = ids(&before);
        expected.remove(1);
        assert_eq!(ids(&after), expected);
        assert!((after.entries[8].percentile - 100.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_multi_selector_batch_uses_one_snapshot() {
        let mut store = ten_titles();
        let before = Ranking::compute(&scorer(), &store);

        // Resolved against the snapshot, positions 1 and 2 are t01 and t02,
        // never "the new position 2 after removing 1"
        let plan = before.resolve(&parse_selectors("1,2,10").unwrap()).unwrap();
        let after = plan.apply(&mut store, &scorer()).unwrap();

        assert_eq!(ids(&after), vec!["t03", "t04", "t05", "t06", "t07", "t08", "t09"]);
    }

    #[test]
    fn test_stale_plan_is_rejected() {
        let mut store = ten_titles();
        let snapshot = Ranking::compute(&scorer(), &store);
        let plan = snapshot.resolve(&[Selector::Range(1, 2)]).unwrap();
        plan.apply(&mut store, &scorer()).unwrap();

        let err = plan.apply(&mut store, &scorer()).unwrap_err();
        assert!(matches!(err, IndexResolutionError::AlreadyRemoved(_)));
        assert_eq!(store.title_count(), 8);
    }

    #[test]
    fn test_site_rankings() {
        let mut store = ObservationStore::new();
        add(&mut store, "a", "A", &[("bangumi", 7.0, 5000), ("mal", 8.5, 5000)]);
        add(&mut store, "b", "B", &[("bangumi", 8.0, 5000), ("mal", 8.0, 5000)]);

        let ranking = Ranking::compute(&scorer(), &store);
        let sites = ranking.site_rankings(&store);

        assert_eq!(sites[&SourceId::from("mal")][&TitleId::from("a")].rank, 1);
        assert_eq!(sites[&SourceId::from("bangumi")][&TitleId::from("a")].rank, 2);
        assert_eq!(sites[&SourceId::from("bangumi")][&TitleId::from("b")].percentile, 100.0);
    }

    #[test]
    fn test_site_rankings_need_two_titles() {
        let mut store = ObservationStore::new();
        add(&mut store, "a", "A", &[("bangumi", 7.0, 5000), ("mal", 8.5, 5000)]);

        let ranking = Ranking::compute(&scorer(), &store);
        assert!(ranking.site_rankings(&store).is_empty());
    }

    #[test]
    fn test_percentile_bounds() {
        assert_eq!(percentile(1, 4), 100.0);
        assert_eq!(percentile(4, 4), 25.0);
        assert_eq!(percentile(0, 4), 0.0);
        assert_eq!(percentile(5, 4), 0.0);
        assert_eq!(percentile(1, 0), 0.0);
    }
}
