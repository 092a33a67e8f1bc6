//! Source registry: explicit source id → constructor map

use super::{bangumi::BangumiClient, mal::MalClient, RatingSource, SourceSet};
use crate::error::FetchError;
use crate::types::SourceId;
use anirank_common::config::{SourceConfig, TomlConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const USER_AGENT: &str = concat!("anirank/", env!("CARGO_PKG_VERSION"));

pub type SourceConstructor = fn(SourceId, &SourceConfig) -> Result<Arc<dyn RatingSource>, FetchError>;

#[derive(Clone, Default)]
pub struct SourceRegistry {
    constructors: BTreeMap<String, SourceConstructor>,
}

impl SourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapters (`mal`, `bangumi`)
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("mal", MalClient::boxed);
        registry.register("bangumi", BangumiClient::boxed);
        registry
    }

    /// Register or replace a constructor
    pub fn register(&mut self, id: &str, constructor: SourceConstructor) {
        self.constructors.insert(id.to_string(), constructor);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn build(&self, id: &str, config: &SourceConfig) -> Result<Arc<dyn RatingSource>, FetchError> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| FetchError::Config(format!("no adapter registered for source '{id}'")))?;
        constructor(SourceId::from(id), config)
    }

    /// Build every enabled source; unknown or misconfigured ones are skipped
    pub fn build_enabled(&self, config: &TomlConfig) -> SourceSet {
        let mut sources = SourceSet::new();
        for (id, source_config) in config.sources.iter().filter(|(_, s)| s.enabled) {
            match self.build(id, source_config) {
                Ok(source) => {
                    sources.insert(SourceId::from(id.as_str()), source);
                }
                Err(e) => warn!(source = %id, error = %e, "Source skipped"),
            }
        }
        info!(
            sources = ?sources.keys().map(SourceId::as_str).collect::<Vec<_>>(),
            "Sources ready"
        );
        sources
    }
}
