//! Image resolution pipeline
//!
//! One uploaded image in, one [`ImageOutcome`] out:
//!
//! 1. Optional preprocessing ([`ImagePreprocessor`])
//! 2. Text detection ([`TextDetector`], bounded by a timeout)
//! 3. Title line selection and normalization (`crate::text`)
//! 4. Catalog resolution ([`CandidateResolver`])
//!
//! [`ScanPipeline::process_all`] runs every image in its own task and
//! returns outcomes in input order. A failing image never affects its
//! siblings.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::services::candidate_resolver::CandidateResolver;
use crate::services::image_preprocessor::ImagePreprocessor;
use crate::text::{normalize_card_name, select_title_line, split_lines};
use crate::types::{ImageOutcome, ImageUpload, ScanFailure, TextDetector};

/// Default bound on a single text detection call
pub const DEFAULT_OCR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ScanPipeline {
    detector: Arc<dyn TextDetector>,
    resolver: Arc<CandidateResolver>,
    preprocessor: Option<ImagePreprocessor>,
    ocr_timeout: Duration,
}

impl ScanPipeline {
    pub fn new(detector: Arc<dyn TextDetector>, resolver: Arc<CandidateResolver>) -> Self {
        Self {
            detector,
            resolver,
            preprocessor: None,
            ocr_timeout: DEFAULT_OCR_TIMEOUT,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: ImagePreprocessor) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn with_ocr_timeout(mut self, timeout: Duration) -> Self {
        self.ocr_timeout = timeout;
        self
    }

    /// Resolve every upload concurrently; `result[i]` belongs to `uploads[i]`
    pub async fn process_all(&self, uploads: Vec<ImageUpload>) -> Vec<ImageOutcome> {
        let total = uploads.len();
        let filenames: Vec<String> = uploads.iter().map(|u| u.filename.clone()).collect();

        let handles: Vec<_> = uploads
            .into_iter()
            .map(|upload| {
                let pipeline = self.clone();
                tokio::spawn(async move { pipeline.process_image(upload).await })
            })
            .collect();

        let outcomes: Vec<ImageOutcome> = join_all(handles)
            .await
            .into_iter()
            .zip(filenames)
            .map(|(joined, filename)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(filename = %filename, error = %e, "Image task failed");
                    ImageOutcome::failed(filename, None, ScanFailure::Internal(e.to_string()))
                }
            })
            .collect();

        let verified = outcomes.iter().filter(|o| o.success).count();
        tracing::info!(total, verified, failed = total - verified, "Scan complete");

        outcomes
    }

    /// Resolve one upload to an outcome; never fails
    pub async fn process_image(&self, upload: ImageUpload) -> ImageOutcome {
        let ImageUpload { filename, bytes } = upload;

        let bytes = match &self.preprocessor {
            Some(preprocessor) => preprocessor.prepare(bytes).await,
            None => bytes,
        };

        let detected =
            match tokio::time::timeout(self.ocr_timeout, self.detector.detect_text(&bytes)).await {
                Ok(Ok(detected)) => detected,
                Ok(Err(e)) => {
                    tracing::warn!(
                        filename = %filename,
                        detector = self.detector.name(),
                        error = %e,
                        "Text detection failed"
                    );
                    return ImageOutcome::failed(filename, None, ScanFailure::NoTextDetected);
                }
                Err(_) => {
                    tracing::warn!(
                        filename = %filename,
                        detector = self.detector.name(),
                        timeout_ms = self.ocr_timeout.as_millis() as u64,
                        "Text detection timed out"
                    );
                    return ImageOutcome::failed(filename, None, ScanFailure::NoTextDetected);
                }
            };

        if detected.is_empty() {
            return ImageOutcome::failed(filename, None, ScanFailure::NoTextDetected);
        }

        let lines = split_lines(&detected.text);
        let candidate = normalize_card_name(select_title_line(&lines));
        if candidate.is_empty() {
            tracing::debug!(filename = %filename, lines = lines.len(), "No title line found");
            return ImageOutcome::failed(filename, None, ScanFailure::NoTitleLine);
        }

        tracing::debug!(filename = %filename, candidate = %candidate, "Resolving candidate");

        match self.resolver.resolve(&candidate).await {
            Some(card) => ImageOutcome::verified(filename, candidate, card),
            None => ImageOutcome::failed(filename, Some(candidate), ScanFailure::NoConfidentMatch),
        }
    }
}
