//! MyAnimeList client (API v2)
//!
//! - Search: `GET /anime?q=`
//! - Details and rating: `GET /anime/{id}` (`mean`, `num_scoring_users`)
//! - Seasonal listing: `GET /anime/season/{year}/{season}`
//!
//! Requests are authenticated with the `X-MAL-CLIENT-ID` header.

use super::{record_from_ref, RatingSource, SourceCapabilities};
use crate::error::FetchError;
use crate::types::{SourceId, SourceRating, TitleRecord, TitleRef};
use anirank_common::config::SourceConfig;
use anirank_common::{AnalysisPeriod, Season};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.myanimelist.net/v2";

/// MAL rejects queries shorter than this
const MIN_QUERY_CHARS: usize = 3;

const SEARCH_LIMIT: &str = "10";
const SEASON_LIMIT: &str = "500";

#[derive(Debug, Deserialize)]
struct MalPage {
    #[serde(default)]
    data: Vec<MalNode>,
}

#[derive(Debug, Deserialize)]
struct MalNode {
    node: MalAnime,
}

#[derive(Debug, Deserialize)]
struct MalAnime {
    id: u64,
    title: String,
    #[serde(default)]
    alternative_titles: Option<MalAlternativeTitles>,
    mean: Option<f64>,
    num_scoring_users: Option<u64>,
    start_season: Option<MalSeason>,
}

#[derive(Debug, Default, Deserialize)]
struct MalAlternativeTitles {
    #[serde(default)]
    synonyms: Vec<String>,
    en: Option<String>,
    ja: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MalSeason {
    year: i32,
    season: String,
}

impl MalAnime {
    fn into_ref(self, source_id: &SourceId) -> TitleRef {
        let alternatives = self.alternative_titles.unwrap_or_default();
        let alternative_titles = alternatives
            .en
            .into_iter()
            .chain(alternatives.ja)
            .chain(alternatives.synonyms)
            .filter(|t| !t.trim().is_empty())
            .collect();
        TitleRef {
            source_id: source_id.clone(),
            external_id: self.id.to_string(),
            title: self.title,
            alternative_titles,
        }
    }
}

pub(crate) fn parse_list(body: &str, source_id: &SourceId) -> Result<Vec<TitleRef>, FetchError> {
    let page: MalPage =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("MAL list: {e}")))?;
    Ok(page
        .data
        .into_iter()
        .map(|item| item.node.into_ref(source_id))
        .collect())
}

pub(crate) fn parse_rating(body: &str) -> Result<Option<SourceRating>, FetchError> {
    let anime: MalAnime =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("MAL anime: {e}")))?;
    Ok(match (anime.mean, anime.num_scoring_users) {
        (Some(mean), Some(votes)) if votes > 0 => Some(SourceRating {
            raw_score: mean,
            vote_count: votes,
            distribution: None,
        }),
        _ => None,
    })
}

pub(crate) fn parse_details(body: &str, source_id: &SourceId) -> Result<TitleRecord, FetchError> {
    let mut anime: MalAnime =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("MAL anime: {e}")))?;
    let period = anime.start_season.take().and_then(|s| {
        Season::ALL
            .into_iter()
            .find(|season| season.as_str() == s.season)
            .map(|season| AnalysisPeriod::new(s.year, season))
    });
    let mut record = record_from_ref(&anime.into_ref(source_id));
    record.period = period;
    Ok(record)
}

pub struct MalClient {
    id: SourceId,
    http_client: Client,
    base_url: String,
}

impl MalClient {
    pub fn new(id: SourceId, config: &SourceConfig) -> Result<Self, FetchError> {
        let client_id = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| FetchError::Config(format!("{id}: api_key (MAL client id) is required")))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            "x-mal-client-id",
            header::HeaderValue::from_str(client_id)
                .map_err(|e| FetchError::Config(format!("{id}: invalid client id: {e}")))?,
        );

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(super::registry::USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Config(format!("{id}: HTTP client: {e}")))?;

        Ok(Self {
            id,
            http_client,
            base_url: config
                .api_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn boxed(id: SourceId, config: &SourceConfig) -> Result<Arc<dyn RatingSource>, FetchError> {
        Ok(Arc::new(Self::new(id, config)?))
    }

    /// GET a path, `None` on 404
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<String>, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(source = %self.id, url = %url, "MAL request");

        let response = self.http_client.get(&url).query(query).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(Some(response.text().await?))
    }
}

#[async_trait]
impl RatingSource for MalClient {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            seasonal_listing: true,
        }
    }

    async fn search_title(&self, query: &str) -> Result<Vec<TitleRef>, FetchError> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            return Ok(Vec::new());
        }
        let params = [("q", query), ("limit", SEARCH_LIMIT), ("fields", "alternative_titles")];
        match self.get("/anime", &params).await? {
            Some(body) => parse_list(&body, &self.id),
            None => Ok(Vec::new()),
        }
    }

    async fn get_title_details(&self, external_id: &str) -> Result<Option<TitleRecord>, FetchError> {
        let path = format!("/anime/{external_id}");
        let params = [("fields", "alternative_titles,start_season")];
        self.get(&path, &params)
            .await?
            .map(|body| parse_details(&body, &self.id))
            .transpose()
    }

    async fn get_title_rating(&self, external_id: &str) -> Result<Option<SourceRating>, FetchError> {
        let path = format!("/anime/{external_id}");
        let params = [("fields", "mean,num_scoring_users")];
        match self.get(&path, &params).await? {
            Some(body) => parse_rating(&body),
            None => Ok(None),
        }
    }

    async fn get_seasonal_titles(&self, period: AnalysisPeriod) -> Result<Vec<TitleRef>, FetchError> {
        let path = format!("/anime/season/{}/{}", period.year, period.season.as_str());
        let params = [("limit", SEASON_LIMIT), ("fields", "alternative_titles")];
        match self.get(&path, &params).await? {
            Some(body) => parse_list(&body, &self.id),
            None => Ok(Vec::new()),
        }
    }
}
