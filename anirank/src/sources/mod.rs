//! Rating source collaborators
//!
//! Every rating source implements [`RatingSource`]. Seasonal listing is an
//! optional capability declared through [`SourceCapabilities`].

pub mod bangumi;
pub mod gate;
pub mod mal;
pub mod registry;

pub use gate::RequestGate;
pub use registry::{SourceConstructor, SourceRegistry};

use crate::error::FetchError;
use crate::types::{SourceId, SourceRating, SourceStatistics, TitleRecord, TitleRef};
use anirank_common::AnalysisPeriod;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Enabled sources by id
pub type SourceSet = BTreeMap<SourceId, Arc<dyn RatingSource>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCapabilities {
    pub seasonal_listing: bool,
}

#[async_trait]
pub trait RatingSource: Send + Sync {
    fn id(&self) -> &SourceId;

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::default()
    }

    /// Candidates for a query, best match first
    async fn search_title(&self, query: &str) -> Result<Vec<TitleRef>, FetchError>;

    async fn get_title_details(&self, external_id: &str) -> Result<Option<TitleRecord>, FetchError>;

    /// Current rating, `None` when the title has no rating on this source
    async fn get_title_rating(&self, external_id: &str) -> Result<Option<SourceRating>, FetchError>;

    async fn get_seasonal_titles(&self, _period: AnalysisPeriod) -> Result<Vec<TitleRef>, FetchError> {
        Err(FetchError::Unsupported {
            source_id: self.id().clone(),
            operation: "seasonal listing",
        })
    }

    /// Source-wide score statistics, if the source publishes them
    async fn get_source_statistics(&self) -> Result<Option<SourceStatistics>, FetchError> {
        Ok(None)
    }
}

/// Title id for a title first seen on `source`
pub fn title_id_for(source: &SourceId, external_id: &str) -> crate::types::TitleId {
    crate::types::TitleId::new(format!("{source}:{external_id}"))
}

/// Minimal record built from a search or listing hit
pub fn record_from_ref(title_ref: &TitleRef) -> TitleRecord {
    let mut alternatives = title_ref.alternative_titles.iter();
    let mut record = TitleRecord::new(
        title_id_for(&title_ref.source_id, &title_ref.external_id),
        title_ref.title.clone(),
    )
    .with_external_id(title_ref.source_id.clone(), title_ref.external_id.clone());

    if let Some(localized) = alternatives.next() {
        record = record.with_localized(localized.clone());
    }
    for alias in alternatives {
        record.add_alias(alias);
    }
    record
}
