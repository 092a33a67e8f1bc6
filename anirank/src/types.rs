//! Core data model
//!
//! - [`TitleRecord`]: one analyzed title with its display titles
//! - [`RatingObservation`]: the single live observation for a (title, source) pair
//! - [`SourceStatistics`]: per-source mean and standard deviation used for normalization
//!
//! Composite results are derived values and live in [`crate::scoring`] and
//! [`crate::ranking`]; they are never stored on their own.

use anirank_common::AnalysisPeriod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Histogram of score bucket → vote count, e.g. `{"8": 120, "9": 40}`
pub type ScoreDistribution = BTreeMap<String, u64>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Stable identity of an analyzed title
    TitleId
);
string_id!(
    /// Rating source identifier, e.g. "mal" or "bangumi"
    SourceId
);

/// One analyzed title
///
/// Immutable after creation except for alias and external id additions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleRecord {
    pub id: TitleId,
    /// Original title
    pub title: String,
    /// Localized (usually English) title
    pub title_localized: Option<String>,
    /// Further alternative titles, in discovery order
    #[serde(default)]
    pub aliases: Vec<String>,
    pub period: Option<AnalysisPeriod>,
    /// Per-source identifiers already known for this title
    #[serde(default)]
    pub external_ids: BTreeMap<SourceId, String>,
}

impl TitleRecord {
    pub fn new(id: impl Into<TitleId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            title_localized: None,
            aliases: Vec::new(),
            period: None,
            external_ids: BTreeMap::new(),
        }
    }

    pub fn with_localized(mut self, localized: impl Into<String>) -> Self {
        let localized = localized.into();
        if !localized.trim().is_empty() {
            self.title_localized = Some(localized);
        }
        self
    }

    pub fn with_period(mut self, period: AnalysisPeriod) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_external_id(mut self, source: impl Into<SourceId>, id: impl Into<String>) -> Self {
        self.external_ids.insert(source.into(), id.into());
        self
    }

    /// Record an alternative title; returns false if it is already known
    pub fn add_alias(&mut self, alias: &str) -> bool {
        let alias = alias.trim();
        if alias.is_empty() || self.display_titles().any(|known| known == alias) {
            return false;
        }
        self.aliases.push(alias.to_string());
        true
    }

    /// Record a source id unless one is already known for that source
    pub fn add_external_id(&mut self, source: &SourceId, id: &str) -> bool {
        if self.external_ids.contains_key(source) {
            return false;
        }
        self.external_ids.insert(source.clone(), id.to_string());
        true
    }

    /// Original, localized and alias titles in that order
    pub fn display_titles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title.as_str())
            .chain(self.title_localized.as_deref())
            .chain(self.aliases.iter().map(String::as_str))
    }
}

/// Where an observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationOrigin {
    /// Initial collection stage
    Collected,
    /// Automatic completion pass
    Retried,
    /// Operator-supplied correction
    Manual,
}

impl ObservationOrigin {
    /// Higher precedence writes are never replaced by lower precedence ones
    pub fn precedence(self) -> u8 {
        match self {
            ObservationOrigin::Collected | ObservationOrigin::Retried => 0,
            ObservationOrigin::Manual => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObservationOrigin::Collected => "collected",
            ObservationOrigin::Retried => "retried",
            ObservationOrigin::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "collected" => Some(ObservationOrigin::Collected),
            "retried" => Some(ObservationOrigin::Retried),
            "manual" => Some(ObservationOrigin::Manual),
            _ => None,
        }
    }
}

/// Rating as reported by a source, before it is attached to a title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRating {
    pub raw_score: f64,
    pub vote_count: u64,
    pub distribution: Option<ScoreDistribution>,
}

/// The live observation for one (title, source) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingObservation {
    pub title_id: TitleId,
    pub source_id: SourceId,
    pub raw_score: f64,
    pub vote_count: u64,
    pub distribution: Option<ScoreDistribution>,
    pub fetched_at: DateTime<Utc>,
    pub origin: ObservationOrigin,
}

impl RatingObservation {
    pub fn new(
        title_id: TitleId,
        source_id: SourceId,
        rating: SourceRating,
        origin: ObservationOrigin,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title_id,
            source_id,
            raw_score: rating.raw_score,
            vote_count: rating.vote_count,
            distribution: rating.distribution,
            fetched_at,
            origin,
        }
    }

    pub fn key(&self) -> (TitleId, SourceId) {
        (self.title_id.clone(), self.source_id.clone())
    }
}

/// Candidate returned by a source search or seasonal listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleRef {
    pub source_id: SourceId,
    /// Identifier of the title on that source
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub alternative_titles: Vec<String>,
}

/// How a source's statistics were obtained
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatisticsOrigin {
    /// Computed from the observations in the store
    Measured { samples: usize },
    /// Reported by the source itself
    Reported,
    /// Configured estimate
    Configured,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceStatistics {
    pub mean: f64,
    pub std_dev: f64,
    pub origin: StatisticsOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_alias_skips_known_titles() {
        let mut record = TitleRecord::new("t1", "Sousou no Frieren").with_localized("Frieren");

        assert!(!record.add_alias("Sousou no Frieren"));
        assert!(!record.add_alias("Frieren"));
        assert!(!record.add_alias("   "));
        assert!(record.add_alias("葬送のフリーレン"));
        assert!(!record.add_alias("葬送のフリーレン"));

        let titles: Vec<_> = record.display_titles().collect();
        assert_eq!(titles, vec!["Sousou no Frieren", "Frieren", "葬送のフリーレン"]);
    }

    #[test]
    fn test_add_external_id_keeps_first() {
        let mut record = TitleRecord::new("t1", "Title");
        let mal = SourceId::from("mal");
        assert!(record.add_external_id(&mal, "52991"));
        assert!(!record.add_external_id(&mal, "99999"));
        assert_eq!(record.external_ids.get(&mal).map(String::as_str), Some("52991"));
    }

    #[test]
    fn test_manual_origin_outranks_automatic() {
        assert!(ObservationOrigin::Manual.precedence() > ObservationOrigin::Retried.precedence());
        assert_eq!(
            ObservationOrigin::Collected.precedence(),
            ObservationOrigin::Retried.precedence()
        );
        assert_eq!(ObservationOrigin::parse("manual"), Some(ObservationOrigin::Manual));
        assert_eq!(ObservationOrigin::parse("bogus"), None);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = TitleId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
