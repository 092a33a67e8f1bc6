//! Configuration loading, validation and config file resolution
//!
//! The whole configuration lives in one TOML file. Every section carries
//! `#[serde(default)]`, so a partial file is valid and anything it omits
//! falls back to the compiled defaults.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `ANIRANK_CONFIG` environment variable
//! 3. `<platform config dir>/anirank/config.toml`
//! 4. Compiled defaults (fallback, logged as a warning)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "ANIRANK_CONFIG";
/// Environment override for `logging.level`
pub const LOG_LEVEL_ENV_VAR: &str = "ANIRANK_LOG_LEVEL";
/// Environment override for `storage.data_dir`
pub const DATA_DIR_ENV_VAR: &str = "ANIRANK_DATA_DIR";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Complete configuration file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub scoring: ScoringConfig,
    pub completion: CompletionConfig,
    /// Rating sources keyed by source id (e.g. "mal", "bangumi")
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            scoring: ScoringConfig::default(),
            completion: CompletionConfig::default(),
            sources: default_sources(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    /// Optional file receiving a plain-text copy of the log
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory; platform default when unset
    pub data_dir: Option<PathBuf>,
    /// SQLite file name, relative to the data directory
    pub database_file: String,
    /// Ranking report directory; `<data_dir>/results` when unset
    pub results_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_file: "anirank.db".to_string(),
            results_dir: None,
        }
    }
}

impl StorageConfig {
    /// Data directory after applying the platform default
    pub fn resolved_data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolved_data_dir().join(&self.database_file)
    }

    pub fn results_path(&self) -> PathBuf {
        match &self.results_dir {
            Some(dir) => dir.clone(),
            None => self.resolved_data_dir().join("results"),
        }
    }
}

/// How per-source mean and standard deviation are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatisticsMethod {
    /// Measured from the titles currently in the store, falling back to
    /// configured estimates when a source has too few samples
    Measured,
    /// Always use the configured estimates
    Configured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Bayesian smoothing constant M
    pub min_credible_votes: u64,
    /// Observations with fewer votes carry zero weight
    pub min_votes_threshold: u64,
    /// Contributing sources required for a composite score
    pub min_sources: usize,
    /// ln(N) when true, log10(N) otherwise
    pub use_natural_log: bool,
    pub bayesian_smoothing: bool,
    pub statistics_method: StatisticsMethod,
    pub min_measured_samples: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_credible_votes: 5000,
            min_votes_threshold: 50,
            min_sources: 2,
            use_natural_log: true,
            bayesian_smoothing: true,
            statistics_method: StatisticsMethod::Measured,
            min_measured_samples: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub enabled: bool,
    /// Total search attempts per (title, source) item across all variants
    pub max_retry_per_anime: u32,
    pub search_timeout_secs: u64,
    /// Global cap on in-flight search tasks
    pub parallel_searches: usize,
    /// Titles observed on fewer sources are not retried automatically
    pub min_existing_sources: usize,
    pub use_alternative_titles: bool,
    /// Vote count recorded for a manual entry that omits one
    pub default_manual_votes: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retry_per_anime: 3,
            search_timeout_secs: 30,
            parallel_searches: 5,
            min_existing_sources: 1,
            use_alternative_titles: true,
            default_manual_votes: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    /// Platform reliability coefficient P
    pub platform_weight: f64,
    /// Minimum interval between two requests to this source
    pub rate_limit_ms: u64,
    pub timeout_secs: u64,
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    /// Estimated mean, used when statistics cannot be measured
    pub mean: Option<f64>,
    /// Estimated standard deviation, used when statistics cannot be measured
    pub std_dev: Option<f64>,
    pub score_min: f64,
    pub score_max: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            platform_weight: 1.0,
            rate_limit_ms: 1000,
            timeout_secs: 30,
            api_base_url: None,
            api_key: None,
            mean: None,
            std_dev: None,
            score_min: 0.0,
            score_max: 10.0,
        }
    }
}

impl SourceConfig {
    fn estimate(enabled: bool, platform_weight: f64, mean: f64, std_dev: f64) -> Self {
        Self {
            enabled,
            platform_weight,
            mean: Some(mean),
            std_dev: Some(std_dev),
            ..Self::default()
        }
    }

    /// True if `score` lies on this source's scale
    pub fn accepts_score(&self, score: f64) -> bool {
        score.is_finite() && score >= self.score_min && score <= self.score_max
    }
}

/// Known sources with their fallback statistics; only the sources with a
/// built-in adapter are enabled out of the box
fn default_sources() -> BTreeMap<String, SourceConfig> {
    BTreeMap::from([
        ("anilist".to_string(), SourceConfig::estimate(false, 1.0, 7.5, 0.9)),
        ("bangumi".to_string(), SourceConfig::estimate(true, 1.0, 7.2, 0.8)),
        ("douban".to_string(), SourceConfig::estimate(false, 1.0, 8.0, 0.7)),
        ("filmarks".to_string(), SourceConfig::estimate(false, 0.9, 7.3, 0.8)),
        ("imdb".to_string(), SourceConfig::estimate(false, 0.8, 7.0, 1.0)),
        ("mal".to_string(), SourceConfig::estimate(true, 1.0, 7.8, 0.6)),
    ])
}

impl TomlConfig {
    /// Load, apply environment overrides and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(format!("config file {}", path.display())));
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolve and load the configuration
    ///
    /// A missing config file is not an error: compiled defaults are used and
    /// a warning is logged. Returns the path that was loaded, if any.
    pub fn load(cli_arg: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        match resolve_config_path(cli_arg) {
            Some(path) if path.exists() => {
                let config = Self::from_file(&path)?;
                info!("Configuration loaded from {}", path.display());
                Ok((config, Some(path)))
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Ok((Self::defaults_with_env()?, None))
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Ok((Self::defaults_with_env()?, None))
            }
        }
    }

    fn defaults_with_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV_VAR) {
            self.logging.level = level.to_lowercase();
        }
        if let Ok(dir) = std::env::var(DATA_DIR_ENV_VAR) {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Enabled source ids in ascending order
    pub fn enabled_sources(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|(_, source)| source.enabled)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.get(id)
    }

    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging.level",
                format!("'{}' is not one of {}", self.logging.level, VALID_LOG_LEVELS.join(", ")),
            ));
        }
        if self.storage.database_file.trim().is_empty() {
            return Err(invalid("storage.database_file", "cannot be empty"));
        }

        let scoring = &self.scoring;
        if scoring.min_credible_votes == 0 {
            return Err(invalid("scoring.min_credible_votes", "must be positive"));
        }
        if scoring.min_sources == 0 {
            return Err(invalid("scoring.min_sources", "must be at least 1"));
        }
        if scoring.min_measured_samples < 2 {
            return Err(invalid("scoring.min_measured_samples", "must be at least 2"));
        }

        let completion = &self.completion;
        if !(1..=10).contains(&completion.max_retry_per_anime) {
            return Err(invalid("completion.max_retry_per_anime", "must be between 1 and 10"));
        }
        if !(5..=120).contains(&completion.search_timeout_secs) {
            return Err(invalid(
                "completion.search_timeout_secs",
                "must be between 5 and 120 seconds",
            ));
        }
        if !(1..=20).contains(&completion.parallel_searches) {
            return Err(invalid("completion.parallel_searches", "must be between 1 and 20"));
        }

        for (id, source) in &self.sources {
            if !source.platform_weight.is_finite() || source.platform_weight < 0.0 {
                return Err(invalid(
                    &format!("sources.{id}.platform_weight"),
                    "must be non-negative",
                ));
            }
            if let Some(std_dev) = source.std_dev {
                if !(std_dev > 0.0) {
                    return Err(invalid(&format!("sources.{id}.std_dev"), "must be positive"));
                }
            }
            if !(source.score_min < source.score_max) {
                return Err(invalid(
                    &format!("sources.{id}.score_min"),
                    "must be below score_max",
                ));
            }
            if source.timeout_secs == 0 {
                return Err(invalid(&format!("sources.{id}.timeout_secs"), "must be positive"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl std::fmt::Display) -> Error {
    Error::Config(format!("{field}: {reason}"))
}

/// Resolve which config file to read, without checking that it exists
/// except for the platform default location
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|dir| dir.join("anirank").join("config.toml"))
        .filter(|path| path.exists())
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("anirank"))
        .unwrap_or_else(|| PathBuf::from("./anirank_data"))
}

/// Write a config file atomically (temp file in the same directory + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
