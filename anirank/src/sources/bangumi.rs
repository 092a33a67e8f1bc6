//! Bangumi client (API v0)
//!
//! - Search: `POST /v0/search/subjects` restricted to anime subjects
//! - Details and rating: `GET /v0/subjects/{id}`, including the 1-10 vote histogram
//!
//! Bangumi has no seasonal listing endpoint.

use super::{RatingSource, SourceCapabilities};
use crate::error::FetchError;
use crate::types::{ScoreDistribution, SourceId, SourceRating, TitleRecord, TitleRef};
use anirank_common::config::SourceConfig;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.bgm.tv";

/// Bangumi subject type for anime
const SUBJECT_TYPE_ANIME: u8 = 2;

const SEARCH_LIMIT: &str = "10";

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<Subject>,
}

#[derive(Debug, Deserialize)]
struct Subject {
    id: u64,
    name: String,
    #[serde(default)]
    name_cn: String,
    rating: Option<SubjectRating>,
}

#[derive(Debug, Deserialize)]
struct SubjectRating {
    #[serde(default)]
    score: f64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    count: BTreeMap<String, u64>,
}

impl Subject {
    fn into_ref(self, source_id: &SourceId) -> TitleRef {
        let alternative_titles = if self.name_cn.trim().is_empty() || self.name_cn == self.name {
            Vec::new()
        } else {
            vec![self.name_cn]
        };
        TitleRef {
            source_id: source_id.clone(),
            external_id: self.id.to_string(),
            title: self.name,
            alternative_titles,
        }
    }
}

pub(crate) fn parse_search(body: &str, source_id: &SourceId) -> Result<Vec<TitleRef>, FetchError> {
    let page: SearchPage =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("Bangumi search: {e}")))?;
    Ok(page.data.into_iter().map(|s| s.into_ref(source_id)).collect())
}

fn parse_subject(body: &str) -> Result<Subject, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("Bangumi subject: {e}")))
}

/// Rating with its histogram; unrated subjects (no votes) yield `None`
pub(crate) fn parse_rating(body: &str) -> Result<Option<SourceRating>, FetchError> {
    let subject = parse_subject(body)?;
    Ok(subject
        .rating
        .filter(|rating| rating.total > 0 && rating.score > 0.0)
        .map(|rating| {
            let distribution: ScoreDistribution = rating
                .count
                .into_iter()
                .filter(|(_, votes)| *votes > 0)
                .collect();
            SourceRating {
                raw_score: rating.score,
                vote_count: rating.total,
                distribution: (!distribution.is_empty()).then_some(distribution),
            }
        }))
}

pub(crate) fn parse_details(body: &str, source_id: &SourceId) -> Result<TitleRecord, FetchError> {
    let subject = parse_subject(body)?;
    Ok(super::record_from_ref(&subject.into_ref(source_id)))
}

pub struct BangumiClient {
    id: SourceId,
    http_client: Client,
    base_url: String,
}

impl BangumiClient {
    pub fn new(id: SourceId, config: &SourceConfig) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = config.api_key.as_deref().filter(|t| !t.trim().is_empty()) {
            let value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| FetchError::Config(format!("{id}: invalid access token: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

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

    async fn read_body(&self, response: reqwest::Response) -> Result<Option<String>, FetchError> {
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

    async fn get_subject(&self, external_id: &str) -> Result<Option<String>, FetchError> {
        let url = format!("{}/v0/subjects/{}", self.base_url, external_id);
        debug!(source = %self.id, url = %url, "Bangumi request");
        let response = self.http_client.get(&url).send().await?;
        self.read_body(response).await
    }
}

#[async_trait]
impl RatingSource for BangumiClient {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            seasonal_listing: false,
        }
    }

    async fn search_title(&self, query: &str) -> Result<Vec<TitleRef>, FetchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/v0/search/subjects", self.base_url);
        debug!(source = %self.id, query = %query, "Bangumi search");

        let body = json!({
            "keyword": query,
            "filter": { "type": [SUBJECT_TYPE_ANIME] },
        });
        let response = self
            .http_client
            .post(&url)
            .query(&[("limit", SEARCH_LIMIT)])
            .json(&body)
            .send()
            .await?;

        match self.read_body(response).await? {
            Some(body) => parse_search(&body, &self.id),
            None => Ok(Vec::new()),
        }
    }

    async fn get_title_details(&self, external_id: &str) -> Result<Option<TitleRecord>, FetchError> {
        self.get_subject(external_id)
            .await?
            .map(|body| parse_details(&body, &self.id))
            .transpose()
    }

    async fn get_title_rating(&self, external_id: &str) -> Result<Option<SourceRating>, FetchError> {
        match self.get_subject(external_id).await? {
            Some(body) => parse_rating(&body),
            None => Ok(None),
        }
    }
}
