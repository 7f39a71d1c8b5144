//! Core Types and Trait Definitions for cardvault-scan
//!
//! The two external services the scan pipeline depends on sit behind the
//! narrow traits defined here:
//! - [`TextDetector`] turns image bytes into a block of detected text
//! - [`CardCatalog`] returns catalog records whose name matches a search term
//!
//! Production implementations live in `services::vision_client` and
//! `services::catalog_client`; tests substitute fixture-backed fakes.

use cardvault_common::CardEntry;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Text detection
// ============================================================================

/// Raw text block detected on one image (reading order, top to bottom)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedText {
    pub text: String,
}

impl DetectedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// True when the service found nothing readable
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Text detection errors
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Text detection timed out")]
    Timeout,
}

/// Text detection service
#[async_trait::async_trait]
pub trait TextDetector: Send + Sync {
    /// Service name for logging
    fn name(&self) -> &'static str;

    /// Detect text on an encoded image
    ///
    /// An image without text yields `Ok` with an empty [`DetectedText`].
    async fn detect_text(&self, image: &[u8]) -> Result<DetectedText, OcrError>;
}

// ============================================================================
// Card catalog
// ============================================================================

/// Artwork reference attached to a catalog record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardImage {
    pub id: i64,
    pub image_url: String,
    #[serde(default)]
    pub image_url_small: Option<String>,
    #[serde(default)]
    pub image_url_cropped: Option<String>,
}

/// Card as returned by the external catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub card_type: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub race: String,
    #[serde(default)]
    pub archetype: Option<String>,
    #[serde(default)]
    pub card_images: Vec<CardImage>,
}

/// Catalog client errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Catalog search timed out")]
    Timeout,
}

/// External card catalog searched by (partial) card name
#[async_trait::async_trait]
pub trait CardCatalog: Send + Sync {
    /// Service name for logging
    fn name(&self) -> &'static str;

    /// Records whose name matches `term`; empty when nothing matches
    async fn search_by_name(&self, term: &str) -> Result<Vec<CatalogRecord>, CatalogError>;
}

/// Winning catalog record, projected to what callers need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedCard {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub card_type: String,
    pub description: String,
    pub race: String,
    pub archetype: Option<String>,
    pub images: Vec<CardImage>,
}

impl From<CatalogRecord> for VerifiedCard {
    fn from(record: CatalogRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            card_type: record.card_type,
            description: record.desc,
            race: record.race,
            archetype: record.archetype,
            images: record.card_images,
        }
    }
}

// ============================================================================
// Pipeline input / output
// ============================================================================

/// One uploaded image
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Why an image did not yield a verified card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFailure {
    /// Text detection returned nothing (or failed)
    NoTextDetected,
    /// Text was found but no line looked like a card title
    NoTitleLine,
    /// Catalog returned nothing scoring above the confidence threshold
    NoConfidentMatch,
    /// The per-image task itself failed
    Internal(String),
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanFailure::NoTextDetected => f.write_str("No text detected"),
            ScanFailure::NoTitleLine => f.write_str("No card title found in detected text"),
            ScanFailure::NoConfidentMatch => f.write_str("No confident catalog match"),
            ScanFailure::Internal(msg) => write!(f, "Processing failed: {}", msg),
        }
    }
}

/// Per-image pipeline result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOutcome {
    pub filename: String,
    pub success: bool,
    /// Normalized title the catalog was searched with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_card: Option<VerifiedCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageOutcome {
    pub fn verified(filename: impl Into<String>, ocr_result: String, card: VerifiedCard) -> Self {
        Self {
            filename: filename.into(),
            success: true,
            ocr_result: Some(ocr_result),
            verified_card: Some(card),
            error: None,
        }
    }

    pub fn failed(
        filename: impl Into<String>,
        ocr_result: Option<String>,
        failure: ScanFailure,
    ) -> Self {
        Self {
            filename: filename.into(),
            success: false,
            ocr_result,
            verified_card: None,
            error: Some(failure.to_string()),
        }
    }

    /// Batch/collection entry for a verified outcome
    pub fn card_entry(&self) -> Option<CardEntry> {
        self.verified_card
            .as_ref()
            .map(|card| CardEntry::new(card.name.clone(), card.card_type.clone()))
    }
}

/// Entries for every verified outcome, in input order
pub fn verified_entries(outcomes: &[ImageOutcome]) -> Vec<CardEntry> {
    outcomes.iter().filter_map(ImageOutcome::card_entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> CatalogRecord {
        CatalogRecord {
            id: 46986414,
            name: name.to_string(),
            card_type: "Normal Monster".to_string(),
            desc: "The ultimate wizard in terms of attack and defense.".to_string(),
            race: "Spellcaster".to_string(),
            archetype: Some("Dark Magician".to_string()),
            card_images: vec![],
        }
    }

    #[test]
    fn test_catalog_record_parses_catalog_json() {
        let json = r#"{
            "id": 89631139,
            "name": "Blue-Eyes White Dragon",
            "type": "Normal Monster",
            "frameType": "normal",
            "desc": "This legendary dragon is a powerful engine of destruction.",
            "atk": 3000,
            "race": "Dragon",
            "archetype": "Blue-Eyes",
            "card_images": [{
                "id": 89631139,
                "image_url": "https://images.ygoprodeck.com/images/cards/89631139.jpg",
                "image_url_small": "https://images.ygoprodeck.com/images/cards_small/89631139.jpg"
            }]
        }"#;

        let record: CatalogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.name, "Blue-Eyes White Dragon");
        assert_eq!(record.card_type, "Normal Monster");
        assert_eq!(record.archetype.as_deref(), Some("Blue-Eyes"));
        assert_eq!(record.card_images.len(), 1);
        assert_eq!(record.card_images[0].image_url_cropped, None);
    }

    #[test]
    fn test_catalog_record_without_archetype() {
        let json = r#"{"id": 1, "name": "Raigeki", "type": "Spell Card", "desc": "", "race": "Normal"}"#;
        let record: CatalogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.archetype, None);
        assert!(record.card_images.is_empty());
    }

    #[test]
    fn test_verified_card_projection() {
        let card = VerifiedCard::from(record("Dark Magician"));
        assert_eq!(card.name, "Dark Magician");
        assert_eq!(card.description, "The ultimate wizard in terms of attack and defense.");
        assert_eq!(card.race, "Spellcaster");
    }

    #[test]
    fn test_failed_outcome_serialization() {
        let outcome = ImageOutcome::failed("scan.jpg", None, ScanFailure::NoTextDetected);
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["filename"], "scan.jpg");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "No text detected");
        assert!(json.get("verified_card").is_none());
        assert!(json.get("ocr_result").is_none());
    }

    #[test]
    fn test_verified_entries_keep_order_and_skip_failures() {
        let outcomes = vec![
            ImageOutcome::verified("a.jpg", "DARK MAGICIAN".into(), record("Dark Magician").into()),
            ImageOutcome::failed("b.jpg", Some("XYZ".into()), ScanFailure::NoConfidentMatch),
            ImageOutcome::verified("c.jpg", "RAIGEKI".into(), record("Raigeki").into()),
        ];

        let entries = verified_entries(&outcomes);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Dark Magician");
        assert_eq!(entries[1].name, "Raigeki");
        assert_eq!(entries[1].card_type, "Normal Monster");
    }
}
