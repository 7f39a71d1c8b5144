//! YGOPRODeck card catalog client
//!
//! Searches `cardinfo.php?fname=<term>` (fuzzy name search) and returns the
//! matching records. "No card matching your query" responses come back as
//! HTTP 400 and are treated as an empty result, not an error.

use serde::Deserialize;
use std::time::Duration;

use crate::services::rate_limiter::RateLimiter;
use crate::types::{CardCatalog, CatalogError, CatalogRecord};

pub const YGOPRODECK_BASE_URL: &str = "https://db.ygoprodeck.com/api/v7/cardinfo.php";
const USER_AGENT: &str = concat!("CardVault/", env!("CARGO_PKG_VERSION"));
/// YGOPRODeck allows 20 requests per second
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 50;

/// `cardinfo.php` success body
#[derive(Debug, Deserialize)]
struct CardInfoResponse {
    #[serde(default)]
    data: Vec<CatalogRecord>,
}

/// `cardinfo.php` error body
#[derive(Debug, Deserialize)]
struct CardInfoError {
    error: String,
}

/// YGOPRODeck API client
pub struct YgoProDeckClient {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter,
}

impl YgoProDeckClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        min_interval: Duration,
    ) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
            rate_limiter: RateLimiter::new(min_interval),
        })
    }

    fn parse_body(status: reqwest::StatusCode, body: &str) -> Result<Vec<CatalogRecord>, CatalogError> {
        if status.is_success() {
            let parsed: CardInfoResponse =
                serde_json::from_str(body).map_err(|e| CatalogError::Parse(e.to_string()))?;
            return Ok(parsed.data);
        }

        if status == reqwest::StatusCode::BAD_REQUEST {
            if let Ok(err) = serde_json::from_str::<CardInfoError>(body) {
                if err.error.to_lowercase().contains("no card matching") {
                    return Ok(Vec::new());
                }
                return Err(CatalogError::Api(status.as_u16(), err.error));
            }
        }

        Err(CatalogError::Api(status.as_u16(), body.to_string()))
    }
}

#[async_trait::async_trait]
impl CardCatalog for YgoProDeckClient {
    fn name(&self) -> &'static str {
        "ygoprodeck"
    }

    async fn search_by_name(&self, term: &str) -> Result<Vec<CatalogRecord>, CatalogError> {
        self.rate_limiter.wait(self.name()).await;

        tracing::debug!(term = %term, "Querying card catalog");

        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[("fname", term)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CatalogError::Timeout
                } else {
                    CatalogError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let records = Self::parse_body(status, &body)?;

        tracing::debug!(term = %term, results = records.len(), "Card catalog search complete");

        Ok(records)
    }
}
