//! Configuration for cardvault-scan
//!
//! Settings come from a TOML file (every key optional) with compiled
//! defaults. Secrets resolve from several tiers:
//! - Vision API key: Database → `CARDVAULT_VISION_API_KEY` → TOML
//! - Token secret: `CARDVAULT_TOKEN_SECRET` → TOML

use cardvault_common::{Error, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::services::candidate_resolver::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::services::collection_store::DEFAULT_ANONYMOUS_LIFETIME_HOURS;
use crate::services::catalog_client::{DEFAULT_MIN_INTERVAL_MS, YGOPRODECK_BASE_URL};
use crate::services::image_preprocessor::DEFAULT_MAX_DIMENSION;
use crate::services::vision_client::VISION_ANNOTATE_URL;

pub const VISION_API_KEY_ENV: &str = "CARDVAULT_VISION_API_KEY";
pub const TOKEN_SECRET_ENV: &str = "CARDVAULT_TOKEN_SECRET";
pub const ROOT_FOLDER_ENV: &str = "CARDVAULT_ROOT";
pub const DEFAULT_BIND: &str = "127.0.0.1:5730";

/// Contents of `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub root_folder: Option<PathBuf>,
    pub bind: String,
    pub vision_api_key: Option<String>,
    pub vision: VisionConfig,
    pub catalog: CatalogConfig,
    pub batches: BatchConfig,
    pub collections: CollectionConfig,
    pub auth: AuthConfig,
    pub uploads: UploadConfig,
    pub sweeper: SweeperConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind: DEFAULT_BIND.to_string(),
            vision_api_key: None,
            vision: VisionConfig::default(),
            catalog: CatalogConfig::default(),
            batches: BatchConfig::default(),
            collections: CollectionConfig::default(),
            auth: AuthConfig::default(),
            uploads: UploadConfig::default(),
            sweeper: SweeperConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| Error::Config(format!("Invalid bind address {:?}: {}", self.bind, e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub min_interval_ms: u64,
    /// Downscale + grayscale + sharpen before upload
    pub preprocess: bool,
    pub max_dimension: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: VISION_ANNOTATE_URL.to_string(),
            timeout_secs: 30,
            min_interval_ms: 0,
            preprocess: true,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

impl VisionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub min_interval_ms: u64,
    pub confidence_threshold: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: YGOPRODECK_BASE_URL.to_string(),
            timeout_secs: 15,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl CatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub anonymous_ttl_hours: i64,
    pub owned_ttl_hours: i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            anonymous_ttl_hours: 5,
            owned_ttl_hours: 24,
        }
    }
}

impl BatchConfig {
    pub fn anonymous_ttl(&self) -> ChronoDuration {
        ChronoDuration::hours(self.anonymous_ttl_hours)
    }

    pub fn owned_ttl(&self) -> ChronoDuration {
        ChronoDuration::hours(self.owned_ttl_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub anonymous_ttl_hours: i64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            anonymous_ttl_hours: DEFAULT_ANONYMOUS_LIFETIME_HOURS,
        }
    }
}

impl CollectionConfig {
    pub fn anonymous_ttl(&self) -> ChronoDuration {
        ChronoDuration::hours(self.anonymous_ttl_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_secret: Option<String>,
    /// Accept requests without a bearer token
    pub allow_anonymous: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            allow_anonymous: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_files: usize,
    pub max_file_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Resolve the Vision API key
///
/// **Priority:** Database → ENV → TOML. Warns when more than one source is set.
pub async fn resolve_vision_api_key(db: &Pool<Sqlite>, config: &ServiceConfig) -> Result<String> {
    let db_key = crate::db::settings::get_vision_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(VISION_API_KEY_ENV)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = config.vision_api_key.clone().filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "Vision API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("Vision API key loaded from database");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("Vision API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("Vision API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "Vision API key not configured. Set one of:\n\
         1. Environment: {}=your-key\n\
         2. TOML config: vision_api_key = \"your-key\"\n\
         3. Database: settings key '{}'",
        VISION_API_KEY_ENV,
        crate::db::settings::VISION_API_KEY
    )))
}

/// Resolve the bearer token signing secret (ENV → TOML)
pub fn resolve_token_secret(config: &AuthConfig) -> Option<String> {
    std::env::var(TOKEN_SECRET_ENV)
        .ok()
        .filter(|s| is_valid_key(s))
        .or_else(|| config.token_secret.clone().filter(|s| is_valid_key(s)))
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
