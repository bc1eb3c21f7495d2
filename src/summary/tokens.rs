//! Length estimation in the backend's token units.
//!
//! Every budget in the summary pipeline is expressed in these units. Estimates
//! are not additive across concatenation, so callers measure the joined text
//! rather than summing the parts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors raised by a concrete tokenizer
#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("tokenizer unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode text: {0}")]
    Encode(String),
}

/// A tokenizer that can count tokens for a piece of text.
///
/// Implementations may fail (model files missing, encoder errors); the
/// [`LengthEstimator`] absorbs those failures.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError>;
}

/// Whitespace word count, the deterministic fallback estimate
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Character-ratio tokenizer used when no model vocabulary is available
#[derive(Debug, Clone, Copy)]
pub struct CharRatioCounter {
    chars_per_token: usize,
}

impl CharRatioCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for CharRatioCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(text.chars().count().div_ceil(self.chars_per_token))
    }
}

/// Which estimator the pipeline should build from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// ~4 characters per token
    #[default]
    Chars,
    /// One token per whitespace-separated word
    Words,
}

/// Maps text to an integer cost. Never fails: if the tokenizer is missing or
/// errors, the whitespace word count is used instead.
#[derive(Clone, Default)]
pub struct LengthEstimator {
    counter: Option<Arc<dyn TokenCounter>>,
}

impl LengthEstimator {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter: Some(counter),
        }
    }

    /// Estimator with no tokenizer; always uses the word-count fallback
    pub fn word_count() -> Self {
        Self { counter: None }
    }

    /// Estimator backed by the 4-chars-per-token heuristic
    pub fn heuristic() -> Self {
        Self::new(Arc::new(CharRatioCounter::default()))
    }

    pub fn from_kind(kind: EstimatorKind) -> Self {
        match kind {
            EstimatorKind::Chars => Self::heuristic(),
            EstimatorKind::Words => Self::word_count(),
        }
    }

    pub fn estimate(&self, text: &str) -> usize {
        match &self.counter {
            Some(counter) => match counter.count_tokens(text) {
                Ok(count) => count,
                Err(e) => {
                    debug!("Tokenizer failed ({}), falling back to word count", e);
                    word_count(text)
                }
            },
            None => word_count(text),
        }
    }
}

impl fmt::Debug for LengthEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LengthEstimator")
            .field("tokenizer", &self.counter.is_some())
            .finish()
    }
}
