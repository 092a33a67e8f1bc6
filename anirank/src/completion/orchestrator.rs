//! Retry search orchestrator
//!
//! Work items are queued per source in priority order. Each source gets one
//! task running `parallel_searches` workers that take items from the front
//! of its queue, so a strict source only slows its own queue. A worker walks
//! the item's variant cascade, searching the source and fetching the top
//! candidate's rating, and stops at the first variant that yields both.
//! Results travel back through a merge queue and are only applied to the
//! store after every task has finished.

use super::detector::WorkItem;
use super::variants::title_variants;
use super::CompletionSettings;
use crate::error::FetchError;
use crate::sources::{RatingSource, RequestGate, SourceSet};
use crate::store::{ObservationStore, UpsertOutcome};
use crate::types::{ObservationOrigin, RatingObservation, SourceId, SourceRating, TitleId, TitleRef};
use anirank_common::events::{EventBus, PipelineEvent};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// Every variant was tried without a search hit and a rating
    NoMatch,
    /// An attempt exceeded the search timeout
    Timeout,
    /// `max_retry_per_anime` reached before the cascade ended
    RetriesExhausted,
    Cancelled,
    /// No adapter for the source
    SourceUnavailable,
}

impl UnresolvedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnresolvedReason::NoMatch => "no match",
            UnresolvedReason::Timeout => "timeout",
            UnresolvedReason::RetriesExhausted => "retries exhausted",
            UnresolvedReason::Cancelled => "cancelled",
            UnresolvedReason::SourceUnavailable => "source unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        observation: RatingObservation,
        /// Query that produced the hit
        query: String,
        candidate: TitleRef,
    },
    Unresolved {
        reason: UnresolvedReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    pub title_id: TitleId,
    pub source_id: SourceId,
    /// Search attempts made, across all variants
    pub attempts: u32,
    pub resolution: Resolution,
}

impl CompletionOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved { .. })
    }
}

/// Outcomes of one completion pass, ordered by (title, source)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryReport {
    pub outcomes: Vec<CompletionOutcome>,
}

impl RetryReport {
    pub fn resolved_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_resolved()).count()
    }

    pub fn unresolved_count(&self) -> usize {
        self.outcomes.len() - self.resolved_count()
    }

    /// Upsert every resolved observation; returns how many changed the store
    ///
    /// The matched candidate's id and title are recorded on the title.
    pub fn merge_into(&self, store: &mut ObservationStore) -> usize {
        let mut changed = 0;
        for outcome in &self.outcomes {
            let Resolution::Resolved {
                observation,
                candidate,
                ..
            } = &outcome.resolution
            else {
                continue;
            };

            match store.upsert(observation.clone()) {
                Ok(result) => {
                    if result.changed() {
                        changed += 1;
                    }
                    if result != UpsertOutcome::Outranked {
                        store.add_external_id(&outcome.title_id, &outcome.source_id, &candidate.external_id);
                        store.add_alias(&outcome.title_id, &candidate.title);
                    }
                }
                Err(e) => warn!(
                    title_id = %outcome.title_id,
                    source = %outcome.source_id,
                    error = %e,
                    "Resolved observation dropped"
                ),
            }
        }
        changed
    }
}

pub struct RetryOrchestrator {
    sources: SourceSet,
    gate: Arc<RequestGate>,
    settings: CompletionSettings,
    events: EventBus,
    cancel: CancellationToken,
}

impl RetryOrchestrator {
    pub fn new(
        sources: SourceSet,
        gate: Arc<RequestGate>,
        settings: CompletionSettings,
        events: EventBus,
    ) -> Self {
        Self {
            sources,
            gate,
            settings,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one completion pass over `items`
    ///
    /// Returns once every task has finished; the store is not touched.
    pub async fn run(&self, items: Vec<WorkItem>) -> RetryReport {
        let (tx, mut rx) = mpsc::unbounded_channel::<CompletionOutcome>();

        // Stable grouping keeps the detector's order within each queue
        let mut queues: BTreeMap<SourceId, Vec<WorkItem>> = BTreeMap::new();
        for item in items {
            queues.entry(item.source_id.clone()).or_default().push(item);
        }

        let mut tasks = JoinSet::new();
        for (source_id, queue) in queues {
            let Some(source) = self.sources.get(&source_id).cloned() else {
                for item in queue {
                    let _ = tx.send(CompletionOutcome {
                        title_id: item.title.id.clone(),
                        source_id: item.source_id.clone(),
                        attempts: 0,
                        resolution: Resolution::Unresolved {
                            reason: UnresolvedReason::SourceUnavailable,
                        },
                    });
                }
                continue;
            };

            debug!(source = %source_id, items = queue.len(), "Completion queue started");
            let gate = Arc::clone(&self.gate);
            let settings = self.settings.clone();
            let cancel = self.cancel.clone();
            let workers = settings.parallel_searches.max(1);
            let tx = tx.clone();
            tasks.spawn(async move {
                let mut outcomes = stream::iter(queue)
                    .map(|item| resolve_item(Arc::clone(&source), Arc::clone(&gate), &settings, &cancel, item))
                    .buffer_unordered(workers);
                while let Some(outcome) = outcomes.next().await {
                    let _ = tx.send(outcome);
                }
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = ?e, "Completion task failed");
            }
        }

        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            self.emit(&outcome);
            outcomes.push(outcome);
        }
        outcomes.sort_by(|a, b| {
            a.title_id
                .cmp(&b.title_id)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });

        let report = RetryReport { outcomes };
        info!(
            resolved = report.resolved_count(),
            unresolved = report.unresolved_count(),
            "Completion pass finished"
        );
        report
    }

    fn emit(&self, outcome: &CompletionOutcome) {
        let event = match &outcome.resolution {
            Resolution::Resolved { query, .. } => PipelineEvent::CompletionResolved {
                title_id: outcome.title_id.to_string(),
                source_id: outcome.source_id.to_string(),
                query: query.clone(),
                attempts: outcome.attempts,
            },
            Resolution::Unresolved { reason } => PipelineEvent::CompletionUnresolved {
                title_id: outcome.title_id.to_string(),
                source_id: outcome.source_id.to_string(),
                attempts: outcome.attempts,
                reason: reason.as_str().to_string(),
            },
        };
        self.events.emit_lossy(event);
    }
}

/// Search one query and fetch the top candidate's rating
///
/// Each request gets `timeout` once the gate admits it.
async fn attempt(
    source: &dyn RatingSource,
    gate: &RequestGate,
    timeout: Duration,
    query: &str,
) -> Result<Option<(TitleRef, SourceRating)>, FetchError> {
    let candidates = gate.call_within(source.id(), timeout, source.search_title(query)).await?;
    let Some(top) = candidates.into_iter().next() else {
        return Ok(None);
    };
    let rating = gate
        .call_within(source.id(), timeout, source.get_title_rating(&top.external_id))
        .await?;
    Ok(rating.map(|rating| (top, rating)))
}

async fn resolve_item(
    source: Arc<dyn RatingSource>,
    gate: Arc<RequestGate>,
    settings: &CompletionSettings,
    cancel: &CancellationToken,
    item: WorkItem,
) -> CompletionOutcome {
    let title_id = item.title.id.clone();
    let source_id = item.source_id.clone();
    let variants = title_variants(&item.title, settings.use_alternative_titles);
    let max_attempts = settings.max_retry_per_anime.max(1);

    let finish = |attempts: u32, resolution: Resolution| CompletionOutcome {
        title_id: title_id.clone(),
        source_id: source_id.clone(),
        attempts,
        resolution,
    };
    let unresolved = |attempts: u32, reason: UnresolvedReason| {
        debug!(
            title_id = %title_id,
            source = %source_id,
            attempts,
            reason = reason.as_str(),
            "Item left missing"
        );
        finish(attempts, Resolution::Unresolved { reason })
    };

    let mut attempts = 0u32;
    for variant in &variants {
        if attempts >= max_attempts {
            return unresolved(attempts, UnresolvedReason::RetriesExhausted);
        }
        if cancel.is_cancelled() {
            return unresolved(attempts, UnresolvedReason::Cancelled);
        }
        attempts += 1;

        match attempt(source.as_ref(), &gate, settings.search_timeout, &variant.query).await {
            Ok(Some((candidate, rating))) => {
                info!(
                    title_id = %title_id,
                    source = %source_id,
                    query = %variant.query,
                    variant = ?variant.kind,
                    attempts,
                    "Missing observation resolved"
                );
                let observation = RatingObservation::new(
                    title_id.clone(),
                    source_id.clone(),
                    rating,
                    ObservationOrigin::Retried,
                    Utc::now(),
                );
                return finish(
                    attempts,
                    Resolution::Resolved {
                        observation,
                        query: variant.query.clone(),
                        candidate,
                    },
                );
            }
            Ok(None) => {
                debug!(source = %source_id, query = %variant.query, "No hit for variant");
            }
            Err(FetchError::Timeout) => {
                warn!(
                    title_id = %title_id,
                    source = %source_id,
                    query = %variant.query,
                    "Search attempt timed out"
                );
                return unresolved(attempts, UnresolvedReason::Timeout);
            }
            Err(e) => {
                debug!(
                    source = %source_id,
                    query = %variant.query,
                    error = %e,
                    "Variant failed, trying next"
                );
            }
        }
    }

    unresolved(attempts, UnresolvedReason::NoMatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TitleRecord;

    fn resolved_outcome(title: &str, external_id: &str) -> CompletionOutcome {
        let rating = SourceRating {
            raw_score: 7.9,
            vote_count: 800,
            distribution: None,
        };
        CompletionOutcome {
            title_id: title.into(),
            source_id: "bangumi".into(),
            attempts: 2,
            resolution: Resolution::Resolved {
                observation: RatingObservation::new(
                    title.into(),
                    "bangumi".into(),
                    rating,
                    ObservationOrigin::Retried,
                    Utc::now(),
                ),
                query: "Frieren".to_string(),
                candidate: TitleRef {
                    source_id: "bangumi".into(),
                    external_id: external_id.to_string(),
                    title: "葬送的芙莉莲".to_string(),
                    alternative_titles: Vec::new(),
                },
            },
        }
    }

    #[test]
    fn test_merge_records_observation_id_and_alias() {
        let mut store = ObservationStore::new();
        store.insert_title(TitleRecord::new("t1", "Sousou no Frieren"));

        let report = RetryReport {
            outcomes: vec![
                resolved_outcome("t1", "400602"),
                CompletionOutcome {
                    title_id: "t1".into(),
                    source_id: "anilist".into(),
                    attempts: 3,
                    resolution: Resolution::Unresolved {
                        reason: UnresolvedReason::NoMatch,
                    },
                },
            ],
        };

        assert_eq!(report.resolved_count(), 1);
        assert_eq!(report.unresolved_count(), 1);
        assert_eq!(report.merge_into(&mut store), 1);

        let record = store.title(&"t1".into()).unwrap();
        assert_eq!(record.external_ids[&SourceId::from("bangumi")], "400602");
        assert_eq!(record.aliases, vec!["葬送的芙莉莲"]);
        assert_eq!(store.observation_count(), 1);

        // Merging again is idempotent
        assert_eq!(report.merge_into(&mut store), 0);
        assert_eq!(store.observation_count(), 1);
    }

    #[test]
    fn test_merge_skips_removed_titles() {
        let mut store = ObservationStore::new();
        let report = RetryReport {
            outcomes: vec![resolved_outcome("gone", "1")],
        };
        assert_eq!(report.merge_into(&mut store), 0);
        assert_eq!(store.observation_count(), 0);
    }
}
