//! Persisted ranking result
//!
//! Written as pretty JSON to
//! `results_dir/ranking_<year>_<season>_<timestamp>.json`, one file per run.

use crate::error::Result;
use crate::ranking::Ranking;
use crate::store::ObservationStore;
use crate::types::{ObservationOrigin, RatingObservation, SourceId, SourceRating, TitleId, TitleRecord};
use anirank_common::{AnalysisPeriod, Season};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const REPORT_PREFIX: &str = "ranking_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceScore {
    pub score: f64,
    pub votes: u64,
    /// Rank among ranked titles observed on this source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_percentile: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub title_id: TitleId,
    pub title: String,
    pub composite_score: f64,
    pub confidence: f64,
    pub percentile: f64,
    pub source_count: usize,
    pub total_votes: u64,
    pub per_source: BTreeMap<SourceId, SourceScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub period: Season,
    pub year: i32,
    pub generated_at: DateTime<Utc>,
    /// Program version and build
    pub generator: String,
    pub total_count: usize,
    pub rankings: Vec<RankedEntry>,
    pub unranked: Vec<TitleId>,
}

impl RankingReport {
    pub fn from_ranking(
        period: AnalysisPeriod,
        ranking: &Ranking,
        store: &ObservationStore,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let site_rankings = ranking.site_rankings(store);

        let rankings = ranking
            .entries
            .iter()
            .map(|entry| {
                let per_source = entry
                    .score
                    .contributions
                    .iter()
                    .map(|contribution| {
                        let site = site_rankings
                            .get(&contribution.source_id)
                            .and_then(|ranks| ranks.get(entry.title_id()));
                        (
                            contribution.source_id.clone(),
                            SourceScore {
                                score: contribution.raw_score,
                                votes: contribution.vote_count,
                                site_rank: site.map(|s| s.rank),
                                site_percentile: site.map(|s| s.percentile),
                            },
                        )
                    })
                    .collect();

                RankedEntry {
                    rank: entry.rank,
                    title_id: entry.title_id().clone(),
                    title: entry.title.clone(),
                    composite_score: entry.score.composite_score,
                    confidence: entry.score.confidence,
                    percentile: entry.percentile,
                    source_count: entry.score.contributing_source_count,
                    total_votes: entry.score.total_votes,
                    per_source,
                }
            })
            .collect();

        Self {
            period: period.season,
            year: period.year,
            generated_at,
            generator: format!("anirank {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
            total_count: ranking.len(),
            rankings,
            unranked: ranking.unranked.iter().map(|u| u.title_id.clone()).collect(),
        }
    }

    pub fn analysis_period(&self) -> AnalysisPeriod {
        AnalysisPeriod::new(self.year, self.period)
    }

    pub fn file_name(&self) -> String {
        format!(
            "{REPORT_PREFIX}{}_{}_{}.json",
            self.year,
            self.period.as_str(),
            self.generated_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write into `dir` (temp file + rename); returns the final path
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let tmp_path = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &path)?;

        info!(path = %path.display(), ranked = self.total_count, "Ranking report written");
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Store holding the ranked titles and their per-source observations
    ///
    /// Unranked titles are listed by id only and are not restored.
    pub fn to_store(&self) -> ObservationStore {
        let mut store = ObservationStore::new();
        let period = self.analysis_period();
        for entry in &self.rankings {
            store.insert_title(TitleRecord::new(entry.title_id.clone(), entry.title.clone()).with_period(period));
            for (source_id, source_score) in &entry.per_source {
                let observation = RatingObservation::new(
                    entry.title_id.clone(),
                    source_id.clone(),
                    SourceRating {
                        raw_score: source_score.score,
                        vote_count: source_score.votes,
                        distribution: None,
                    },
                    ObservationOrigin::Collected,
                    self.generated_at,
                );
                if let Err(e) = store.upsert(observation) {
                    warn!(title_id = %entry.title_id, source = %source_id, error = %e, "Report entry skipped");
                }
            }
        }
        store
    }
}

/// Newest report in `dir`, by generation time encoded in the file name
pub fn latest_report(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut newest: Option<(String, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(REPORT_PREFIX) || !name.ends_with(".json") {
            continue;
        }
        // ranking_<year>_<season>_<date>_<time>.json
        let stem = name.trim_end_matches(".json");
        let Some(timestamp) = stem.splitn(4, '_').nth(3) else {
            continue;
        };
        if newest.as_ref().map_or(true, |(best, _)| timestamp > best.as_str()) {
            newest = Some((timestamp.to_string(), path.clone()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
