//! Scripted in-memory rating source
//!
//! Responses are keyed by query (search) or external id (rating, details).
//! Unscripted searches return no candidates; unscripted ratings are not
//! found. Every call is logged with the time it started.

use anirank::error::FetchError;
use anirank::sources::{RatingSource, SourceCapabilities};
use anirank::types::{SourceId, SourceRating, SourceStatistics, TitleRecord, TitleRef};
use anirank_common::AnalysisPeriod;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Scripted response
#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Ok(T),
    /// Fails with a transient network error
    NetworkError,
    /// Never answers within any test timeout
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Search(String),
    Rating(String),
    Details(String),
    Seasonal,
    Statistics,
}

/// Decrements the in-flight counter when a call ends or is dropped
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockSource {
    id: SourceId,
    searches: HashMap<String, Scripted<Vec<TitleRef>>>,
    ratings: HashMap<String, Scripted<Option<SourceRating>>>,
    details: HashMap<String, TitleRecord>,
    seasonal: Option<Vec<TitleRef>>,
    statistics: Option<SourceStatistics>,
    delay: Duration,
    calls: Arc<Mutex<Vec<(Instant, Call)>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new(id: &str) -> Self {
        Self {
            id: SourceId::from(id),
            searches: HashMap::new(),
            ratings: HashMap::new(),
            details: HashMap::new(),
            seasonal: None,
            statistics: None,
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn title_ref(&self, external_id: &str, title: &str) -> TitleRef {
        TitleRef {
            source_id: self.id.clone(),
            external_id: external_id.to_string(),
            title: title.to_string(),
            alternative_titles: Vec::new(),
        }
    }

    /// `query` finds `external_id`, which is rated `score` by `votes` users
    pub fn with_hit(mut self, query: &str, external_id: &str, score: f64, votes: u64) -> Self {
        let candidate = self.title_ref(external_id, query);
        self.searches.insert(query.to_string(), Scripted::Ok(vec![candidate]));
        self.with_rating(external_id, score, votes)
    }

    pub fn with_search(mut self, query: &str, response: Scripted<Vec<TitleRef>>) -> Self {
        self.searches.insert(query.to_string(), response);
        self
    }

    pub fn with_rating(mut self, external_id: &str, score: f64, votes: u64) -> Self {
        self.ratings.insert(
            external_id.to_string(),
            Scripted::Ok(Some(SourceRating {
                raw_score: score,
                vote_count: votes,
                distribution: None,
            })),
        );
        self
    }

    pub fn with_rating_response(mut self, external_id: &str, response: Scripted<Option<SourceRating>>) -> Self {
        self.ratings.insert(external_id.to_string(), response);
        self
    }

    pub fn with_details(mut self, external_id: &str, record: TitleRecord) -> Self {
        self.details.insert(external_id.to_string(), record);
        self
    }

    /// Declares the seasonal listing capability
    pub fn with_seasonal(mut self, titles: Vec<TitleRef>) -> Self {
        self.seasonal = Some(titles);
        self
    }

    pub fn with_statistics(mut self, mean: f64, std_dev: f64) -> Self {
        self.statistics = Some(SourceStatistics {
            mean,
            std_dev,
            origin: anirank::types::StatisticsOrigin::Reported,
        });
        self
    }

    /// Latency added to every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.timed_calls().into_iter().map(|(_, call)| call).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn search_queries(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Search(query) => Some(query),
                _ => None,
            })
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: Call) -> InFlight {
        self.calls.lock().unwrap().push((Instant::now(), call));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.in_flight));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        guard
    }

    async fn answer<T: Clone>(&self, response: Option<&Scripted<T>>, default: T) -> Result<T, FetchError> {
        match response {
            None => Ok(default),
            Some(Scripted::Ok(value)) => Ok(value.clone()),
            Some(Scripted::NetworkError) => Err(FetchError::Network("connection reset".to_string())),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchError::Timeout)
            }
        }
    }
}

#[async_trait]
impl RatingSource for MockSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            seasonal_listing: self.seasonal.is_some(),
        }
    }

    async fn search_title(&self, query: &str) -> Result<Vec<TitleRef>, FetchError> {
        let _guard = self.enter(Call::Search(query.to_string())).await;
        self.answer(self.searches.get(query), Vec::new()).await
    }

    async fn get_title_details(&self, external_id: &str) -> Result<Option<TitleRecord>, FetchError> {
        let _guard = self.enter(Call::Details(external_id.to_string())).await;
        Ok(self.details.get(external_id).cloned())
    }

    async fn get_title_rating(&self, external_id: &str) -> Result<Option<SourceRating>, FetchError> {
        let _guard = self.enter(Call::Rating(external_id.to_string())).await;
        self.answer(self.ratings.get(external_id), None).await
    }

    async fn get_seasonal_titles(&self, _period: AnalysisPeriod) -> Result<Vec<TitleRef>, FetchError> {
        let _guard = self.enter(Call::Seasonal).await;
        match &self.seasonal {
            Some(titles) => Ok(titles.clone()),
            None => Err(FetchError::Unsupported {
                source_id: self.id.clone(),
                operation: "seasonal listing",
            }),
        }
    }

    async fn get_source_statistics(&self) -> Result<Option<SourceStatistics>, FetchError> {
        let _guard = self.enter(Call::Statistics).await;
        Ok(self.statistics)
    }
}
