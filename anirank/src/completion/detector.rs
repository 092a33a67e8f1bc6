//! Missing observation detection
//!
//! `missing = enabled_sources - observed_sources` per title. The work list
//! is ordered by current rank (ranked titles first, best first), then by
//! total votes descending, then title id.

use crate::ranking::Ranking;
use crate::store::ObservationStore;
use crate::types::{SourceId, TitleId, TitleRecord};
use std::cmp::Ordering;
use tracing::debug;

/// One missing (title, source) observation
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub title: TitleRecord,
    pub source_id: SourceId,
    /// Rank in the snapshot the list was built from
    pub rank: Option<usize>,
    pub total_votes: u64,
    /// Sources the title already has
    pub observed_count: usize,
}

impl WorkItem {
    pub fn title_id(&self) -> &TitleId {
        &self.title.id
    }
}

#[derive(Debug, Clone)]
pub struct CompletionDetector {
    enabled_sources: Vec<SourceId>,
    min_existing_sources: usize,
}

impl CompletionDetector {
    pub fn new(enabled_sources: Vec<SourceId>, min_existing_sources: usize) -> Self {
        Self {
            enabled_sources,
            min_existing_sources,
        }
    }

    pub fn enabled_sources(&self) -> &[SourceId] {
        &self.enabled_sources
    }

    /// Prioritized work list
    ///
    /// Titles observed on fewer than `min_existing_sources` sources are
    /// left out.
    pub fn detect(&self, store: &ObservationStore, ranking: &Ranking) -> Vec<WorkItem> {
        let mut items = Vec::new();
        let mut skipped = 0usize;

        for record in store.titles() {
            let observed = store.observed_sources(&record.id);
            let missing: Vec<&SourceId> = self
                .enabled_sources
                .iter()
                .filter(|source| !observed.contains(*source))
                .collect();
            if missing.is_empty() {
                continue;
            }
            if observed.len() < self.min_existing_sources {
                skipped += 1;
                continue;
            }

            let rank = ranking.rank_of(&record.id);
            let total_votes = store.total_votes(&record.id);
            for source_id in missing {
                items.push(WorkItem {
                    title: record.clone(),
                    source_id: source_id.clone(),
                    rank,
                    total_votes,
                    observed_count: observed.len(),
                });
            }
        }

        items.sort_by(priority);
        debug!(items = items.len(), skipped_titles = skipped, "Missing observations detected");
        items
    }
}

fn priority(a: &WorkItem, b: &WorkItem) -> Ordering {
    let rank_key = |item: &WorkItem| item.rank.unwrap_or(usize::MAX);
    rank_key(a)
        .cmp(&rank_key(b))
        .then_with(|| b.total_votes.cmp(&a.total_votes))
        .then_with(|| a.title.id.cmp(&b.title.id))
        .then_with(|| a.source_id.cmp(&b.source_id))
}
