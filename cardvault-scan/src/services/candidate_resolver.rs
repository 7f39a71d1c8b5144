//! Candidate resolver
//!
//! Resolves a normalized OCR title against the card catalog:
//!
//! 1. Search the catalog with the first word of the title
//! 2. Score every returned record against the full title
//! 3. Accept the best record only if it reaches the confidence threshold
//!
//! Scoring (case-insensitive):
//! - +1 per title word that also appears in the record name (hyphens in the
//!   record name count as word breaks)
//! - +10 when the record name equals the title
//! - +5 when the record name contains the title as a phrase
//! - -0.5 per record word beyond the title's word count
//!
//! Catalog failures and timeouts resolve to "no match"; they are logged,
//! never propagated.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{CardCatalog, CatalogRecord, VerifiedCard};

/// Minimum score a record needs to be accepted
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 2.0;

const EXACT_MATCH_BONUS: f64 = 10.0;
const PHRASE_MATCH_BONUS: f64 = 5.0;
const EXTRA_WORD_PENALTY: f64 = 0.5;

/// Catalog record paired with its score for one resolution call
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub record: CatalogRecord,
    pub score: f64,
}

/// Score one catalog name against the candidate title
pub fn score_candidate(candidate: &str, record_name: &str) -> f64 {
    let candidate_lower = candidate.to_lowercase();
    let candidate_words: Vec<&str> = candidate_lower.split_whitespace().collect();

    let record_lower = record_name.to_lowercase();
    let record_spaced = record_lower.replace('-', " ");
    let record_words: Vec<&str> = record_spaced.split_whitespace().collect();

    let matching = candidate_words
        .iter()
        .filter(|word| record_words.contains(word))
        .count();
    let mut score = matching as f64;

    if record_lower == candidate_lower {
        score += EXACT_MATCH_BONUS;
    }

    let phrase = candidate_words.join(" ");
    if record_lower.contains(&phrase) {
        score += PHRASE_MATCH_BONUS;
    }

    if record_words.len() > candidate_words.len() {
        let extra = record_words.len() - candidate_words.len();
        score -= extra as f64 * EXTRA_WORD_PENALTY;
    }

    score
}

/// Score and order records, best first
///
/// The sort is stable: records with equal scores keep the order the
/// catalog returned them in.
pub fn rank_candidates(candidate: &str, records: Vec<CatalogRecord>) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = records
        .into_iter()
        .map(|record| ScoredCandidate {
            score: score_candidate(candidate, &record.name),
            record,
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored
}

/// Best-ranked record, if it reaches `threshold`
pub fn pick_winner(
    candidate: &str,
    records: Vec<CatalogRecord>,
    threshold: f64,
) -> Option<ScoredCandidate> {
    rank_candidates(candidate, records)
        .into_iter()
        .next()
        .filter(|best| best.score >= threshold)
}

/// Catalog search term: the first word of the candidate
pub fn search_term(candidate: &str) -> Option<&str> {
    candidate.split_whitespace().next()
}

/// Resolves candidate titles against an injected catalog
pub struct CandidateResolver {
    catalog: Arc<dyn CardCatalog>,
    threshold: f64,
    timeout: Duration,
}

impl CandidateResolver {
    pub fn new(catalog: Arc<dyn CardCatalog>) -> Self {
        Self {
            catalog,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Resolve a normalized title to a verified card
    pub async fn resolve(&self, candidate: &str) -> Option<VerifiedCard> {
        let term = search_term(candidate)?;

        let records = match tokio::time::timeout(self.timeout, self.catalog.search_by_name(term)).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                tracing::warn!(
                    catalog = self.catalog.name(),
                    term = %term,
                    error = %e,
                    "Catalog search failed, treating as no match"
                );
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    catalog = self.catalog.name(),
                    term = %term,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Catalog search timed out, treating as no match"
                );
                return None;
            }
        };

        if records.is_empty() {
            tracing::debug!(term = %term, "Catalog returned no records");
            return None;
        }

        let total = records.len();
        match pick_winner(candidate, records, self.threshold) {
            Some(best) => {
                tracing::info!(
                    candidate = %candidate,
                    card = %best.record.name,
                    score = best.score,
                    candidates = total,
                    "Verified card"
                );
                Some(best.record.into())
            }
            None => {
                tracing::info!(
                    candidate = %candidate,
                    candidates = total,
                    threshold = self.threshold,
                    "No candidate reached the confidence threshold"
                );
                None
            }
        }
    }
}
