//! Google Cloud Vision text detection client
//!
//! Calls `images:annotate` with a `TEXT_DETECTION` feature. The first text
//! annotation carries the full detected block; later annotations are the
//! individual words and are ignored.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::services::rate_limiter::RateLimiter;
use crate::types::{DetectedText, OcrError, TextDetector};

pub const VISION_ANNOTATE_URL: &str = "https://vision.googleapis.com/v1/images:annotate";
const USER_AGENT: &str = concat!("CardVault/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateRequest<'a> {
    requests: [AnnotateImageRequest<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageRequest<'a> {
    image: ImageContent,
    features: [Feature<'a>; 1],
    image_context: ImageContext,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
struct Feature<'a> {
    #[serde(rename = "type")]
    feature_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContext {
    text_detection_params: TextDetectionParams,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TextDetectionParams {
    enable_text_detection_confidence_score: bool,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    error: Option<ResponseStatus>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Google Cloud Vision API client (API key authentication)
pub struct GoogleVisionClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    rate_limiter: RateLimiter,
}

impl GoogleVisionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: String,
        timeout: Duration,
        min_interval: Duration,
    ) -> Result<Self, OcrError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            api_key,
            rate_limiter: RateLimiter::new(min_interval),
        })
    }

    fn build_request(image: &[u8]) -> AnnotateRequest<'static> {
        AnnotateRequest {
            requests: [AnnotateImageRequest {
                image: ImageContent {
                    content: base64::engine::general_purpose::STANDARD.encode(image),
                },
                features: [Feature {
                    feature_type: "TEXT_DETECTION",
                }],
                image_context: ImageContext {
                    text_detection_params: TextDetectionParams {
                        enable_text_detection_confidence_score: true,
                    },
                },
            }],
        }
    }

    fn parse_response(body: &str) -> Result<DetectedText, OcrError> {
        let parsed: AnnotateResponse =
            serde_json::from_str(body).map_err(|e| OcrError::Parse(e.to_string()))?;

        let Some(first) = parsed.responses.into_iter().next() else {
            return Ok(DetectedText::default());
        };

        if let Some(status) = first.error {
            if status.code != 0 {
                return Err(OcrError::Api(status.code as u16, status.message));
            }
        }

        Ok(first
            .text_annotations
            .into_iter()
            .next()
            .map(|annotation| DetectedText::new(annotation.description))
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl TextDetector for GoogleVisionClient {
    fn name(&self) -> &'static str {
        "google-vision"
    }

    async fn detect_text(&self, image: &[u8]) -> Result<DetectedText, OcrError> {
        self.rate_limiter.wait(self.name()).await;

        tracing::debug!(bytes = image.len(), "Submitting image for text detection");

        let response = self
            .http_client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::build_request(image))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OcrError::Timeout
                } else {
                    OcrError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(OcrError::InvalidApiKey);
        }

        let body = response
            .text()
            .await
            .map_err(|e| OcrError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(OcrError::Api(status.as_u16(), body));
        }

        let detected = Self::parse_response(&body)?;

        tracing::debug!(
            chars = detected.text.len(),
            empty = detected.is_empty(),
            "Text detection complete"
        );

        Ok(detected)
    }
}
