//! Manual completion
//!
//! [`ManualSession`] is a pure state machine: each operator decision maps
//! the current session to a new session plus one [`ManualEffect`]. The
//! interactive prompt in the binary only reads input and feeds decisions.
//!
//! [`ManualCoordinator`] applies accepted entries one at a time: upsert,
//! persist, rescore the affected title. Nothing is batched, so an aborted
//! session keeps every entry confirmed before the abort.

use crate::completion::WorkItem;
use crate::db;
use crate::error::{Result, ValidationError};
use crate::scoring::{CompositeScore, CompositeScorer};
use crate::store::{ObservationStore, UpsertOutcome};
use crate::types::{ObservationOrigin, RatingObservation, SourceId, SourceRating, TitleId};
use anirank_common::config::TomlConfig;
use anirank_common::events::{EventBus, PipelineEvent};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};
use uuid::Uuid;

/// Valid score range of a source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreScale {
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self { min: 0.0, max: 10.0 }
    }
}

impl ScoreScale {
    pub fn contains(&self, score: f64) -> bool {
        score.is_finite() && score >= self.min && score <= self.max
    }

    /// Scales of every configured source
    pub fn from_config(config: &TomlConfig) -> BTreeMap<SourceId, ScoreScale> {
        config
            .sources
            .iter()
            .map(|(id, source)| {
                (
                    SourceId::from(id.as_str()),
                    ScoreScale {
                        min: source.score_min,
                        max: source.score_max,
                    },
                )
            })
            .collect()
    }
}

/// One missing (title, source) pair awaiting operator input
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub title_id: TitleId,
    pub title: String,
    pub title_localized: Option<String>,
    pub source_id: SourceId,
    pub rank: Option<usize>,
    pub scale: ScoreScale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManualDecision {
    /// Score for the current entry; votes fall back to the session default
    Enter { score: f64, votes: Option<u64> },
    /// Leave the current entry missing
    SkipEntry,
    /// Leave every remaining entry of the current title missing
    SkipTitle,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManualEffect {
    /// Accepted entry, to be upserted and persisted now
    Upsert(RatingObservation),
    /// Invalid input; the same entry stays current
    Rejected(ValidationError),
    /// Number of entries skipped
    Skipped(usize),
    Finished,
}

/// Manual completion session state
#[derive(Debug, Clone, PartialEq)]
pub struct ManualSession {
    pub id: Uuid,
    queue: VecDeque<PendingEntry>,
    default_votes: u64,
    accepted: usize,
    skipped: usize,
    finished: bool,
}

impl ManualSession {
    pub fn new(entries: Vec<PendingEntry>, default_votes: u64) -> Self {
        let finished = entries.is_empty();
        Self {
            id: Uuid::new_v4(),
            queue: entries.into(),
            default_votes,
            accepted: 0,
            skipped: 0,
            finished,
        }
    }

    /// Session over a work list, keeping its order
    pub fn from_work_items(
        items: &[WorkItem],
        scales: &BTreeMap<SourceId, ScoreScale>,
        default_votes: u64,
    ) -> Self {
        let entries = items
            .iter()
            .map(|item| PendingEntry {
                title_id: item.title.id.clone(),
                title: item.title.title.clone(),
                title_localized: item.title.title_localized.clone(),
                source_id: item.source_id.clone(),
                rank: item.rank,
                scale: scales.get(&item.source_id).copied().unwrap_or_default(),
            })
            .collect();
        Self::new(entries, default_votes)
    }

    pub fn current(&self) -> Option<&PendingEntry> {
        if self.finished {
            None
        } else {
            self.queue.front()
        }
    }

    pub fn remaining(&self) -> usize {
        if self.finished {
            0
        } else {
            self.queue.len()
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn default_votes(&self) -> u64 {
        self.default_votes
    }

    /// Apply one operator decision
    pub fn apply(mut self, decision: ManualDecision, now: DateTime<Utc>) -> (Self, ManualEffect) {
        let Some(entry) = self.current().cloned() else {
            self.finished = true;
            return (self, ManualEffect::Finished);
        };

        let effect = match decision {
            ManualDecision::Quit => {
                self.finished = true;
                ManualEffect::Finished
            }
            ManualDecision::SkipEntry => {
                self.queue.pop_front();
                self.skipped += 1;
                ManualEffect::Skipped(1)
            }
            ManualDecision::SkipTitle => {
                let before = self.queue.len();
                self.queue.retain(|pending| pending.title_id != entry.title_id);
                let skipped = before - self.queue.len();
                self.skipped += skipped;
                ManualEffect::Skipped(skipped)
            }
            ManualDecision::Enter { score, votes } => {
                if !entry.scale.contains(score) {
                    return (
                        self,
                        ManualEffect::Rejected(ValidationError::ScoreOutOfRange {
                            source_id: entry.source_id,
                            score,
                            min: entry.scale.min,
                            max: entry.scale.max,
                        }),
                    );
                }
                self.queue.pop_front();
                self.accepted += 1;
                ManualEffect::Upsert(RatingObservation::new(
                    entry.title_id,
                    entry.source_id,
                    SourceRating {
                        raw_score: score,
                        vote_count: votes.unwrap_or(self.default_votes),
                        distribution: None,
                    },
                    ObservationOrigin::Manual,
                    now,
                ))
            }
        };

        if self.queue.is_empty() {
            self.finished = true;
        }
        (self, effect)
    }
}

/// Parse an operator score; the scale is checked by the session
pub fn parse_score(input: &str) -> std::result::Result<f64, ValidationError> {
    let input = input.trim();
    input
        .parse::<f64>()
        .ok()
        .filter(|score| score.is_finite())
        .ok_or_else(|| ValidationError::NotANumber(input.to_string()))
}

/// Parse an operator vote count; empty input means "use the default"
pub fn parse_votes(input: &str) -> std::result::Result<Option<u64>, ValidationError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    input
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ValidationError::InvalidVotes(input.to_string()))
}

/// Applies accepted manual entries to the store and the database
pub struct ManualCoordinator {
    pool: Option<SqlitePool>,
    scorer: CompositeScorer,
    events: EventBus,
}

impl ManualCoordinator {
    pub fn new(pool: Option<SqlitePool>, scorer: CompositeScorer, events: EventBus) -> Self {
        Self {
            pool,
            scorer,
            events,
        }
    }

    /// Upsert and persist one accepted entry, then rescore its title
    ///
    /// Returns the upsert outcome and the title's new composite, if it has one.
    pub async fn commit(
        &self,
        store: &mut ObservationStore,
        observation: RatingObservation,
    ) -> Result<(UpsertOutcome, Option<CompositeScore>)> {
        let title_id = observation.title_id.clone();
        let source_id = observation.source_id.clone();
        let (score, votes) = (observation.raw_score, observation.vote_count);

        let outcome = store.upsert(observation.clone())?;
        if outcome.changed() {
            if let Some(pool) = &self.pool {
                db::observations::upsert_observation(pool, &observation).await?;
            }
        }

        info!(
            title_id = %title_id,
            source = %source_id,
            score,
            votes,
            ?outcome,
            "Manual entry applied"
        );
        self.events.emit_lossy(PipelineEvent::ManualEntryAccepted {
            title_id: title_id.to_string(),
            source_id: source_id.to_string(),
            score,
            votes,
        });

        let statistics = self.scorer.statistics(store);
        let composite = match self.scorer.score_title(store, &statistics, &title_id) {
            Ok(composite) => Some(composite),
            Err(e) => {
                debug!(title_id = %title_id, error = %e, "Title still unranked");
                None
            }
        };
        Ok((outcome, composite))
    }

    /// Route a session effect; only upserts touch the store
    pub async fn handle(
        &self,
        store: &mut ObservationStore,
        effect: &ManualEffect,
    ) -> Result<Option<CompositeScore>> {
        match effect {
            ManualEffect::Upsert(observation) => {
                let (_, composite) = self.commit(store, observation.clone()).await?;
                Ok(composite)
            }
            ManualEffect::Rejected(_) | ManualEffect::Skipped(_) | ManualEffect::Finished => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TitleRecord;

    fn entry(title: &str, source: &str) -> PendingEntry {
        PendingEntry {
            title_id: title.into(),
            title: title.to_string(),
            title_localized: None,
            source_id: source.into(),
            rank: None,
            scale: ScoreScale::default(),
        }
    }

    fn session() -> ManualSession {
        ManualSession::new(
            vec![entry("a", "bangumi"), entry("a", "mal"), entry("b", "mal")],
            100,
        )
    }

    #[test]
    fn test_out_of_range_score_is_reprompted() {
        let (session, effect) = session().apply(
            ManualDecision::Enter {
                score: 11.0,
                votes: None,
            },
            Utc::now(),
        );
        assert!(matches!(
            effect,
            ManualEffect::Rejected(ValidationError::ScoreOutOfRange { score, .. }) if score == 11.0
        ));
        assert_eq!(session.remaining(), 3);
        assert_eq!(session.current().unwrap().source_id.as_str(), "bangumi");

        let (_, effect) = session.apply(
            ManualDecision::Enter {
                score: -0.5,
                votes: None,
            },
            Utc::now(),
        );
        assert!(matches!(effect, ManualEffect::Rejected(_)));
    }

    #[test]
    fn test_accepted_entry_defaults_votes() {
        let now = Utc::now();
        let (session, effect) = session().apply(
            ManualDecision::Enter {
                score: 7.5,
                votes: None,
            },
            now,
        );
        let ManualEffect::Upsert(observation) = effect else {
            panic!("expected upsert, got {effect:?}");
        };
        assert_eq!(observation.title_id.as_str(), "a");
        assert_eq!(observation.source_id.as_str(), "bangumi");
        assert_eq!(observation.raw_score, 7.5);
        assert_eq!(observation.vote_count, 100);
        assert_eq!(observation.origin, ObservationOrigin::Manual);
        assert_eq!(observation.fetched_at, now);
        assert_eq!(session.accepted(), 1);
        assert_eq!(session.current().unwrap().source_id.as_str(), "mal");

        let (_, effect) = session.apply(
            ManualDecision::Enter {
                score: 10.0,
                votes: Some(0),
            },
            now,
        );
        let ManualEffect::Upsert(observation) = effect else {
            panic!("expected upsert");
        };
        assert_eq!(observation.vote_count, 0);
    }

    #[test]
    fn test_skip_title_drops_all_its_entries() {
        let (session, effect) = session().apply(ManualDecision::SkipTitle, Utc::now());
        assert_eq!(effect, ManualEffect::Skipped(2));
        assert_eq!(session.current().unwrap().title_id.as_str(), "b");
        assert_eq!(session.skipped(), 2);
    }

    #[test]
    fn test_session_finishes() {
        let now = Utc::now();
        let (s, _) = session().apply(ManualDecision::SkipEntry, now);
        let (s, _) = s.apply(ManualDecision::SkipEntry, now);
        let (s, effect) = s.apply(
            ManualDecision::Enter {
                score: 8.0,
                votes: Some(5),
            },
            now,
        );
        assert!(matches!(effect, ManualEffect::Upsert(_)));
        assert!(s.is_finished());
        assert!(s.current().is_none());

        let (s, effect) = s.apply(ManualDecision::SkipEntry, now);
        assert_eq!(effect, ManualEffect::Finished);
        assert!(s.is_finished());
    }

    #[test]
    fn test_quit_keeps_counts() {
        let now = Utc::now();
        let (s, _) = session().apply(
            ManualDecision::Enter {
                score: 8.0,
                votes: None,
            },
            now,
        );
        let (s, effect) = s.apply(ManualDecision::Quit, now);
        assert_eq!(effect, ManualEffect::Finished);
        assert_eq!(s.accepted(), 1);
        assert_eq!(s.remaining(), 0);
    }

    #[test]
    fn test_empty_session_is_finished() {
        let s = ManualSession::new(Vec::new(), 100);
        assert!(s.is_finished());
        assert!(s.current().is_none());
    }

    #[test]
    fn test_parse_inputs() {
        assert_eq!(parse_score(" 7.25 ").unwrap(), 7.25);
        assert!(matches!(parse_score("seven"), Err(ValidationError::NotANumber(_))));
        assert!(parse_score("NaN").is_err());
        assert_eq!(parse_votes("").unwrap(), None);
        assert_eq!(parse_votes("1200").unwrap(), Some(1200));
        assert!(matches!(parse_votes("-3"), Err(ValidationError::InvalidVotes(_))));
    }

    #[test]
    fn test_session_from_work_items_uses_source_scale() {
        let items = vec![WorkItem {
            title: TitleRecord::new("t1", "Title"),
            source_id: "filmarks".into(),
            rank: Some(4),
            total_votes: 10,
            observed_count: 1,
        }];
        let mut scales = BTreeMap::new();
        scales.insert(SourceId::from("filmarks"), ScoreScale { min: 0.0, max: 5.0 });

        let s = ManualSession::from_work_items(&items, &scales, 100);
        assert_eq!(s.current().unwrap().scale.max, 5.0);

        let (_, effect) = s.apply(
            ManualDecision::Enter {
                score: 6.0,
                votes: None,
            },
            Utc::now(),
        );
        assert!(matches!(effect, ManualEffect::Rejected(_)));
    }

    #[tokio::test]
    async fn test_coordinator_commits_and_manual_wins() {
        let mut store = ObservationStore::new();
        store.insert_title(TitleRecord::new("t1", "Title"));
        let coordinator = ManualCoordinator::new(
            None,
            CompositeScorer::new(crate::scoring::ScoringParams::default()),
            EventBus::new(8),
        );

        let manual = RatingObservation::new(
            "t1".into(),
            "mal".into(),
            SourceRating {
                raw_score: 7.0,
                vote_count: 100,
                distribution: None,
            },
            ObservationOrigin::Manual,
            Utc::now(),
        );
        let (outcome, composite) = coordinator.commit(&mut store, manual).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert!(composite.is_none());

        let automatic = RatingObservation::new(
            "t1".into(),
            "mal".into(),
            SourceRating {
                raw_score: 8.8,
                vote_count: 9000,
                distribution: None,
            },
            ObservationOrigin::Retried,
            Utc::now(),
        );
        assert_eq!(store.upsert(automatic).unwrap(), UpsertOutcome::Outranked);
        assert_eq!(store.observation(&"t1".into(), &"mal".into()).unwrap().raw_score, 7.0);
    }
}
