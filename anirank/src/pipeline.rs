//! Staged analysis pipeline
//!
//! collect → score → detect missing → retry → rerank
//!
//! Concurrent stages (collection, retry) send their results through a merge
//! queue; the store is only written once every task of the stage has
//! joined. Scoring, detection and reranking are plain functions over the
//! store.

use crate::completion::{CompletionDetector, CompletionSettings, RetryOrchestrator, RetryReport, WorkItem};
use crate::error::{Error, FetchError, Result};
use crate::ranking::{parse_selectors, Ranking, RemovalPlan};
use crate::scoring::{CompositeScorer, ScoringParams};
use crate::sources::{record_from_ref, RatingSource, RequestGate, SourceRegistry, SourceSet};
use crate::store::{ObservationStore, UpsertOutcome};
use crate::types::{
    ObservationOrigin, RatingObservation, SourceId, SourceRating, SourceStatistics, TitleId, TitleRecord, TitleRef,
};
use anirank_common::config::TomlConfig;
use anirank_common::events::{EventBus, PipelineEvent, Stage};
use anirank_common::AnalysisPeriod;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Rating found for one (title, source) pair
type Fetched = Option<(Option<TitleRef>, SourceRating)>;

/// Counts for one collection stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectSummary {
    /// (title, source) pairs attempted
    pub attempted: usize,
    pub collected: usize,
    /// Not found or unrated on the source
    pub not_found: usize,
    pub failed: usize,
}

/// Outcome of a full automatic run
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub collect: CollectSummary,
    /// `None` when the retry pass was skipped or disabled
    pub retry: Option<RetryReport>,
    pub ranking: Ranking,
    /// Still missing after the run; input for manual completion
    pub missing: Vec<WorkItem>,
}

pub struct Pipeline {
    sources: SourceSet,
    enabled: Vec<SourceId>,
    gate: Arc<RequestGate>,
    params: ScoringParams,
    settings: CompletionSettings,
    events: EventBus,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Sources enabled for scoring and completion are the ones in `params`
    pub fn new(
        sources: SourceSet,
        gate: Arc<RequestGate>,
        params: ScoringParams,
        settings: CompletionSettings,
        events: EventBus,
    ) -> Self {
        let enabled = params.sources.keys().cloned().collect();
        Self {
            sources,
            enabled,
            gate,
            params,
            settings,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &TomlConfig, registry: &SourceRegistry, events: EventBus) -> Self {
        Self::new(
            registry.build_enabled(config),
            Arc::new(RequestGate::from_config(config)),
            ScoringParams::from_config(config),
            CompletionSettings::from_config(config),
            events,
        )
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }

    pub fn enabled_sources(&self) -> &[SourceId] {
        &self.enabled
    }

    /// Statistics published by the sources themselves
    ///
    /// A source that fails to answer is logged and falls back to measured
    /// or configured statistics.
    pub async fn reported_statistics(&self) -> BTreeMap<SourceId, SourceStatistics> {
        let mut reported = BTreeMap::new();
        for (id, source) in &self.sources {
            match self.gate.call(id, source.get_source_statistics()).await {
                Ok(Some(statistics)) => {
                    debug!(source = %id, mean = statistics.mean, std_dev = statistics.std_dev, "Source statistics reported");
                    reported.insert(id.clone(), statistics);
                }
                Ok(None) => {}
                Err(e) => warn!(source = %id, error = %e, "Source statistics unavailable"),
            }
        }
        reported
    }

    pub async fn scorer(&self) -> CompositeScorer {
        CompositeScorer::new(self.params.clone()).with_reported_statistics(self.reported_statistics().await)
    }

    /// Titles of a period, from the first source that lists seasons
    ///
    /// Details are fetched per title; a title whose details fail keeps the
    /// listing's fields.
    pub async fn discover_titles(&self, period: AnalysisPeriod) -> Result<Vec<TitleRecord>> {
        let source = self
            .sources
            .values()
            .find(|source| source.capabilities().seasonal_listing)
            .cloned()
            .ok_or_else(|| {
                Error::Common(anirank_common::Error::Config(
                    "no enabled source supports seasonal listing".to_string(),
                ))
            })?;

        let listing = self.gate.call(source.id(), source.get_seasonal_titles(period)).await?;
        let mut seen = BTreeSet::new();
        let listing: Vec<TitleRef> = listing
            .into_iter()
            .filter(|title_ref| seen.insert(title_ref.external_id.clone()))
            .collect();
        info!(source = %source.id(), period = %period, titles = listing.len(), "Seasonal listing fetched");

        let records = stream::iter(listing)
            .map(|title_ref| {
                let source = Arc::clone(&source);
                let gate = Arc::clone(&self.gate);
                async move {
                    let details = gate
                        .call(source.id(), source.get_title_details(&title_ref.external_id))
                        .await;
                    let mut record = match details {
                        Ok(Some(record)) => record,
                        Ok(None) => record_from_ref(&title_ref),
                        Err(e) => {
                            debug!(source = %source.id(), external_id = %title_ref.external_id, error = %e, "Details unavailable, using listing");
                            record_from_ref(&title_ref)
                        }
                    };
                    if record.period.is_none() {
                        record.period = Some(period);
                    }
                    record
                }
            })
            .buffered(self.gate.max_in_flight())
            .collect::<Vec<_>>()
            .await;

        Ok(records)
    }

    /// Fetch a rating for every (title, enabled source) pair
    ///
    /// Titles are inserted (merged) into the store first. A failing pair is
    /// logged and left missing.
    pub async fn collect(&self, store: &mut ObservationStore, titles: Vec<TitleRecord>) -> CollectSummary {
        let ids: Vec<TitleId> = titles.iter().map(|record| record.id.clone()).collect();
        for record in titles {
            store.insert_title(record);
        }

        let mut pairs = Vec::new();
        for id in &ids {
            let Some(record) = store.title(id) else {
                continue;
            };
            for source in self.sources.values() {
                pairs.push((record.clone(), Arc::clone(source)));
            }
        }

        let mut summary = CollectSummary {
            attempted: pairs.len(),
            ..CollectSummary::default()
        };
        self.events.stage_started(Stage::Collect, pairs.len());
        info!(titles = ids.len(), pairs = pairs.len(), "Collection started");

        let (tx, mut rx) = mpsc::unbounded_channel::<(TitleId, SourceId, std::result::Result<Fetched, FetchError>)>();
        let mut tasks = JoinSet::new();
        for (record, source) in pairs {
            let gate = Arc::clone(&self.gate);
            let cancel = self.cancel.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                if cancel.is_cancelled() {
                    return;
                }
                let result = fetch_rating(source.as_ref(), &gate, &record).await;
                let _ = tx.send((record.id, source.id().clone(), result));
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = ?e, "Collection task failed");
            }
        }

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let fetched_at = Utc::now();
        for (title_id, source_id, result) in results {
            match result {
                Ok(Some((matched, rating))) => {
                    let observation = RatingObservation::new(
                        title_id.clone(),
                        source_id.clone(),
                        rating,
                        ObservationOrigin::Collected,
                        fetched_at,
                    );
                    match store.upsert(observation) {
                        Ok(outcome) => {
                            summary.collected += 1;
                            match matched {
                                Some(candidate) if outcome != UpsertOutcome::Outranked => {
                                    store.add_external_id(&title_id, &source_id, &candidate.external_id);
                                    store.add_alias(&title_id, &candidate.title);
                                }
                                _ => {}
                            }
                        }
                        Err(e) => {
                            summary.failed += 1;
                            warn!(title_id = %title_id, source = %source_id, error = %e, "Collected observation dropped");
                        }
                    }
                }
                Ok(None) => {
                    summary.not_found += 1;
                    debug!(title_id = %title_id, source = %source_id, "No rating on source");
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(title_id = %title_id, source = %source_id, error = %e, "Collection failed");
                }
            }
        }

        self.events
            .stage_completed(Stage::Collect, summary.collected, summary.not_found + summary.failed);
        info!(
            collected = summary.collected,
            not_found = summary.not_found,
            failed = summary.failed,
            "Collection complete"
        );
        summary
    }

    /// Score and rank the store, reporting as `stage`
    pub fn rank(&self, scorer: &CompositeScorer, store: &ObservationStore, stage: Stage) -> Ranking {
        self.events.stage_started(stage, store.title_count());
        let ranking = Ranking::compute(scorer, store);
        self.events.stage_completed(stage, ranking.len(), ranking.unranked.len());
        ranking
    }

    pub fn detector(&self) -> CompletionDetector {
        CompletionDetector::new(self.enabled.clone(), self.settings.min_existing_sources)
    }

    pub fn detect_missing(&self, store: &ObservationStore, ranking: &Ranking) -> Vec<WorkItem> {
        self.events.stage_started(Stage::DetectMissing, store.title_count());
        let items = self.detector().detect(store, ranking);
        self.events.stage_completed(Stage::DetectMissing, items.len(), 0);
        items
    }

    /// One completion pass, merged into the store after every task joined
    pub async fn retry(&self, store: &mut ObservationStore, items: Vec<WorkItem>) -> RetryReport {
        self.events.stage_started(Stage::Retry, items.len());
        let orchestrator = RetryOrchestrator::new(
            self.sources.clone(),
            Arc::clone(&self.gate),
            self.settings.clone(),
            self.events.clone(),
        )
        .with_cancellation(self.cancel.clone());

        let report = orchestrator.run(items).await;
        let merged = report.merge_into(store);
        self.events
            .stage_completed(Stage::Retry, report.resolved_count(), report.unresolved_count());
        info!(merged, unresolved = report.unresolved_count(), "Completion pass merged");
        report
    }

    /// collect → score → detect → retry → rerank
    pub async fn run(
        &self,
        store: &mut ObservationStore,
        titles: Vec<TitleRecord>,
        with_retry: bool,
    ) -> Result<PipelineRun> {
        let collect = self.collect(store, titles).await;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let scorer = self.scorer().await;
        let mut ranking = self.rank(&scorer, store, Stage::Score);

        let retry = if with_retry && self.settings.enabled {
            let items = self.detect_missing(store, &ranking);
            let report = self.retry(store, items).await;
            ranking = self.rank(&scorer, store, Stage::Rerank);
            Some(report)
        } else {
            None
        };

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let missing = self.detector().detect(store, &ranking);
        info!(
            ranked = ranking.len(),
            unranked = ranking.unranked.len(),
            still_missing = missing.len(),
            "Pipeline run complete"
        );
        Ok(PipelineRun {
            collect,
            retry,
            ranking,
            missing,
        })
    }

    /// Resolve `selectors` against `snapshot`, delete in one batch, rerank
    pub fn remove(
        &self,
        store: &mut ObservationStore,
        scorer: &CompositeScorer,
        snapshot: &Ranking,
        selectors: &str,
    ) -> Result<(RemovalPlan, Ranking)> {
        let plan = snapshot.resolve(&parse_selectors(selectors)?)?;
        self.events.stage_started(Stage::Removal, plan.len());
        let ranking = plan.apply(store, scorer)?;

        self.events.emit_lossy(PipelineEvent::TitlesRemoved {
            title_ids: plan.title_ids().iter().map(ToString::to_string).collect(),
            remaining: store.title_count(),
        });
        self.events.stage_completed(Stage::Removal, plan.len(), 0);
        Ok((plan, ranking))
    }
}

/// Rating by known id, otherwise by the top search candidate for the title
async fn fetch_rating(
    source: &dyn RatingSource,
    gate: &RequestGate,
    record: &TitleRecord,
) -> std::result::Result<Fetched, FetchError> {
    if let Some(external_id) = record.external_ids.get(source.id()) {
        let rating = gate.call(source.id(), source.get_title_rating(external_id)).await?;
        return Ok(rating.map(|rating| (None, rating)));
    }

    let candidates = gate.call(source.id(), source.search_title(&record.title)).await?;
    let Some(top) = candidates.into_iter().next() else {
        return Ok(None);
    };
    let rating = gate
        .call(source.id(), source.get_title_rating(&top.external_id))
        .await?;
    Ok(rating.map(|rating| (Some(top), rating)))
}
