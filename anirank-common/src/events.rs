//! Pipeline events
//!
//! Stages report progress through a broadcast [`EventBus`]. Emission is
//! lossy: a pipeline run with nobody listening is normal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collect,
    Score,
    DetectMissing,
    Retry,
    ManualCompletion,
    Removal,
    Rerank,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Collect => "collect",
            Stage::Score => "score",
            Stage::DetectMissing => "detect-missing",
            Stage::Retry => "retry",
            Stage::ManualCompletion => "manual-completion",
            Stage::Removal => "removal",
            Stage::Rerank => "rerank",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
        /// Work units the stage will process (titles, items, ...)
        items: usize,
        timestamp: DateTime<Utc>,
    },

    StageCompleted {
        stage: Stage,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A missing (title, source) observation was found by the retry pass
    CompletionResolved {
        title_id: String,
        source_id: String,
        /// Query text that produced the hit
        query: String,
        attempts: u32,
    },

    /// A missing (title, source) observation is still missing after the pass
    CompletionUnresolved {
        title_id: String,
        source_id: String,
        attempts: u32,
        reason: String,
    },

    ManualEntryAccepted {
        title_id: String,
        source_id: String,
        score: f64,
        votes: u64,
    },

    TitlesRemoved {
        title_ids: Vec<String>,
        remaining: usize,
    },
}

/// Broadcast bus for [`PipelineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn stage_started(&self, stage: Stage, items: usize) {
        self.emit_lossy(PipelineEvent::StageStarted {
            stage,
            items,
            timestamp: Utc::now(),
        });
    }

    pub fn stage_completed(&self, stage: Stage, succeeded: usize, failed: usize) {
        self.emit_lossy(PipelineEvent::StageCompleted {
            stage,
            succeeded,
            failed,
            timestamp: Utc::now(),
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
