//! Observation store
//!
//! Holds every [`TitleRecord`] and exactly one live [`RatingObservation`] per
//! (title, source) pair. All writers, automatic or manual, go through
//! [`ObservationStore::upsert`].

use crate::error::{IndexResolutionError, ValidationError};
use crate::types::{RatingObservation, SourceId, TitleId, TitleRecord};
use anirank_common::AnalysisPeriod;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// What an upsert did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First observation for the pair
    Inserted,
    /// Existing observation replaced
    Replaced,
    /// Identical observation already stored
    Unchanged,
    /// Existing observation has higher precedence (manual) and was kept
    Outranked,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Replaced)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationStore {
    titles: BTreeMap<TitleId, TitleRecord>,
    observations: BTreeMap<TitleId, BTreeMap<SourceId, RatingObservation>>,
}

impl ObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a title; an already known title only gains new aliases and ids
    ///
    /// Returns true if the title was new.
    pub fn insert_title(&mut self, record: TitleRecord) -> bool {
        match self.titles.get_mut(&record.id) {
            Some(existing) => {
                for alias in record.display_titles() {
                    existing.add_alias(alias);
                }
                for (source, id) in &record.external_ids {
                    existing.add_external_id(source, id);
                }
                false
            }
            None => {
                self.titles.insert(record.id.clone(), record);
                true
            }
        }
    }

    pub fn add_alias(&mut self, title_id: &TitleId, alias: &str) -> bool {
        self.titles
            .get_mut(title_id)
            .map(|record| record.add_alias(alias))
            .unwrap_or(false)
    }

    pub fn add_external_id(&mut self, title_id: &TitleId, source: &SourceId, id: &str) -> bool {
        self.titles
            .get_mut(title_id)
            .map(|record| record.add_external_id(source, id))
            .unwrap_or(false)
    }

    /// Insert or replace the observation for its (title, source) pair
    ///
    /// Last write wins within an origin class. An automatic write never
    /// replaces a manual observation.
    pub fn upsert(
        &mut self,
        observation: RatingObservation,
    ) -> Result<UpsertOutcome, ValidationError> {
        if !self.titles.contains_key(&observation.title_id) {
            return Err(ValidationError::UnknownTitle(observation.title_id));
        }

        let by_source = self
            .observations
            .entry(observation.title_id.clone())
            .or_default();

        let outcome = match by_source.get(&observation.source_id) {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing.origin.precedence() > observation.origin.precedence() => {
                UpsertOutcome::Outranked
            }
            Some(existing) if same_rating(existing, &observation) => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Replaced,
        };

        debug!(
            title_id = %observation.title_id,
            source = %observation.source_id,
            origin = observation.origin.as_str(),
            ?outcome,
            "Upsert observation"
        );

        if outcome.changed() {
            by_source.insert(observation.source_id.clone(), observation);
        }
        Ok(outcome)
    }

    /// Delete titles and all their observations as one batch
    ///
    /// Every id is checked before anything is deleted; one unknown id
    /// rejects the whole batch.
    pub fn remove_titles(&mut self, ids: &[TitleId]) -> Result<Vec<TitleRecord>, IndexResolutionError> {
        if let Some(missing) = ids.iter().find(|id| !self.titles.contains_key(*id)) {
            return Err(IndexResolutionError::AlreadyRemoved(missing.clone()));
        }

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            self.observations.remove(id);
            if let Some(record) = self.titles.remove(id) {
                removed.push(record);
            }
        }
        Ok(removed)
    }

    /// Keep only titles released in `period`, with their observations
    ///
    /// Titles without a period are dropped too. Returns how many were dropped.
    pub fn retain_period(&mut self, period: AnalysisPeriod) -> usize {
        let before = self.titles.len();
        self.titles.retain(|_, record| record.period == Some(period));
        let titles = &self.titles;
        self.observations.retain(|id, _| titles.contains_key(id));
        before - self.titles.len()
    }

    pub fn title(&self, id: &TitleId) -> Option<&TitleRecord> {
        self.titles.get(id)
    }

    pub fn contains_title(&self, id: &TitleId) -> bool {
        self.titles.contains_key(id)
    }

    pub fn titles(&self) -> impl Iterator<Item = &TitleRecord> {
        self.titles.values()
    }

    pub fn title_count(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn observation(&self, title_id: &TitleId, source_id: &SourceId) -> Option<&RatingObservation> {
        self.observations.get(title_id)?.get(source_id)
    }

    /// Observations of one title, ordered by source id
    pub fn observations_for(&self, title_id: &TitleId) -> impl Iterator<Item = &RatingObservation> {
        self.observations
            .get(title_id)
            .into_iter()
            .flat_map(|by_source| by_source.values())
    }

    pub fn observed_sources(&self, title_id: &TitleId) -> BTreeSet<SourceId> {
        self.observations_for(title_id)
            .map(|obs| obs.source_id.clone())
            .collect()
    }

    /// All observations, ordered by title then source
    pub fn observations(&self) -> impl Iterator<Item = &RatingObservation> {
        self.observations.values().flat_map(|by_source| by_source.values())
    }

    pub fn observation_count(&self) -> usize {
        self.observations.values().map(BTreeMap::len).sum()
    }

    /// Sum of vote counts over every observation of a title
    pub fn total_votes(&self, title_id: &TitleId) -> u64 {
        self.observations_for(title_id).map(|obs| obs.vote_count).sum()
    }
}

fn same_rating(a: &RatingObservation, b: &RatingObservation) -> bool {
    a.raw_score == b.raw_score
        && a.vote_count == b.vote_count
        && a.distribution == b.distribution
        && a.origin == b.origin
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObservationOrigin, SourceRating};
    use chrono::Utc;

    fn obs(title: &str, source: &str, score: f64, votes: u64, origin: ObservationOrigin) -> RatingObservation {
        RatingObservation::new(
            TitleId::from(title),
            SourceId::from(source),
            SourceRating {
                raw_score: score,
                vote_count: votes,
                distribution: None,
            },
            origin,
            Utc::now(),
        )
    }

    fn store_with(titles: &[&str]) -> ObservationStore {
        let mut store = ObservationStore::new();
        for id in titles {
            store.insert_title(TitleRecord::new(*id, format!("Title {id}")));
        }
        store
    }

    #[test]
    fn test_identical_upsert_changes_state_once() {
        let mut store = store_with(&["t1"]);
        let first = obs("t1", "mal", 8.1, 1200, ObservationOrigin::Collected);

        assert_eq!(store.upsert(first.clone()).unwrap(), UpsertOutcome::Inserted);
        let snapshot = store.clone();

        let mut again = first;
        again.fetched_at = Utc::now();
        assert_eq!(store.upsert(again).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store, snapshot);
        assert_eq!(store.observation_count(), 1);
    }

    #[test]
    fn test_upsert_replaces_never_appends() {
        let mut store = store_with(&["t1"]);
        store.upsert(obs("t1", "mal", 8.1, 1200, ObservationOrigin::Collected)).unwrap();
        let outcome = store.upsert(obs("t1", "mal", 8.3, 1500, ObservationOrigin::Retried)).unwrap();

        assert_eq!(outcome, UpsertOutcome::Replaced);
        assert_eq!(store.observation_count(), 1);
        let stored = store.observation(&"t1".into(), &"mal".into()).unwrap();
        assert_eq!(stored.raw_score, 8.3);
        assert_eq!(stored.vote_count, 1500);
    }

    #[test]
    fn test_automatic_write_never_replaces_manual() {
        let mut store = store_with(&["t1"]);
        store.upsert(obs("t1", "bangumi", 7.0, 100, ObservationOrigin::Manual)).unwrap();

        let outcome = store.upsert(obs("t1", "bangumi", 7.9, 900, ObservationOrigin::Retried)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Outranked);
        assert_eq!(store.observation(&"t1".into(), &"bangumi".into()).unwrap().raw_score, 7.0);

        // Manual over manual is last-write-wins
        let outcome = store.upsert(obs("t1", "bangumi", 7.4, 100, ObservationOrigin::Manual)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Replaced);
    }

    #[test]
    fn test_upsert_for_unknown_title_is_rejected() {
        let mut store = ObservationStore::new();
        let err = store.upsert(obs("ghost", "mal", 8.0, 10, ObservationOrigin::Collected)).unwrap_err();
        assert_eq!(err, ValidationError::UnknownTitle("ghost".into()));
        assert_eq!(store.observation_count(), 0);
    }

    #[test]
    fn test_remove_titles_is_all_or_nothing() {
        let mut store = store_with(&["a", "b", "c"]);
        store.upsert(obs("a", "mal", 8.0, 10, ObservationOrigin::Collected)).unwrap();
        store.upsert(obs("b", "mal", 7.0, 10, ObservationOrigin::Collected)).unwrap();

        let err = store.remove_titles(&["a".into(), "zzz".into()]).unwrap_err();
        assert_eq!(err, IndexResolutionError::AlreadyRemoved("zzz".into()));
        assert_eq!(store.title_count(), 3);
        assert_eq!(store.observation_count(), 2);

        let removed = store.remove_titles(&["a".into(), "c".into()]).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.title_count(), 1);
        assert_eq!(store.observation_count(), 1);
        assert!(store.observation(&"a".into(), &"mal".into()).is_none());
    }

    #[test]
    fn test_insert_existing_title_merges_aliases() {
        let mut store = ObservationStore::new();
        assert!(store.insert_title(TitleRecord::new("t1", "Kusuriya no Hitorigoto")));
        let again = TitleRecord::new("t1", "Kusuriya no Hitorigoto")
            .with_localized("The Apothecary Diaries")
            .with_external_id("bangumi", "376703");
        assert!(!store.insert_title(again));

        let record = store.title(&"t1".into()).unwrap();
        assert_eq!(record.aliases, vec!["The Apothecary Diaries"]);
        assert!(record.external_ids.contains_key(&SourceId::from("bangumi")));
    }

    #[test]
    fn test_retain_period_drops_other_seasons() {
        let winter = AnalysisPeriod::new(2024, anirank_common::Season::Winter);
        let spring = AnalysisPeriod::new(2024, anirank_common::Season::Spring);
        let mut store = ObservationStore::new();
        store.insert_title(TitleRecord::new("w", "Frieren").with_period(winter));
        store.insert_title(TitleRecord::new("s", "Kaiju No. 8").with_period(spring));
        store.insert_title(TitleRecord::new("u", "Undated"));
        store.upsert(obs("w", "mal", 9.1, 1000, ObservationOrigin::Collected)).unwrap();
        store.upsert(obs("s", "mal", 8.2, 1000, ObservationOrigin::Collected)).unwrap();

        assert_eq!(store.retain_period(winter), 2);
        let ids: Vec<_> = store.titles().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["w"]);
        assert_eq!(store.observation_count(), 1);
        assert!(store.observation(&"s".into(), &"mal".into()).is_none());
    }

    #[test]
    fn test_observed_sources_and_votes() {
        let mut store = store_with(&["t1"]);
        store.upsert(obs("t1", "mal", 8.0, 1000, ObservationOrigin::Collected)).unwrap();
        store.upsert(obs("t1", "bangumi", 7.5, 300, ObservationOrigin::Collected)).unwrap();

        let sources: Vec<_> = store.observed_sources(&"t1".into()).into_iter().collect();
        assert_eq!(sources, vec![SourceId::from("bangumi"), SourceId::from("mal")]);
        assert_eq!(store.total_votes(&"t1".into()), 1300);
    }
}
