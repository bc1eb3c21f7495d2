use crate::jobs::{Cancelled, JobGuard};
use crate::summary::backend::Condenser;
use crate::summary::chunker::{Chunk, ChunkBuilder};
use crate::summary::tokens::LengthEstimator;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Output budget used when the caller does not pass one
pub const DEFAULT_TARGET_LENGTH: usize = 130;
pub const DEFAULT_MIN_LENGTH: usize = 30;
/// Input budget per chunk, matching a 1024-token encoder window
pub const DEFAULT_MAX_CHUNK_COST: usize = 1024;

/// Output for one chunk, in chunk order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResult {
    Condensed(String),
    /// Both attempts failed; `ordinal` is 1-based
    Placeholder { ordinal: usize, text: String },
}

impl ChunkResult {
    pub fn text(&self) -> &str {
        match self {
            ChunkResult::Condensed(text) => text,
            ChunkResult::Placeholder { text, .. } => text,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ChunkResult::Placeholder { .. })
    }
}

/// Placeholder text substituted for a chunk that could not be condensed
pub fn placeholder_for_chunk(ordinal: usize) -> String {
    format!("[summary unavailable: condensation failed for chunk {}]", ordinal)
}

/// Output limit for the single retry: half the original, never below `min_length`
pub fn retry_max_length(max_length: usize, min_length: usize) -> usize {
    (max_length / 2).max(min_length)
}

/// Joins chunk outputs in order with a single space
pub fn combine_results(results: &[ChunkResult]) -> String {
    results
        .iter()
        .map(ChunkResult::text)
        .collect::<Vec<_>>()
        .join(" ")
}

fn checkpoint(job: Option<&JobGuard>, stage: &str) -> Result<(), Cancelled> {
    match job {
        Some(job) => job.checkpoint(stage),
        None => Ok(()),
    }
}

/// Runs `condense` over chunks with per-chunk retry and placeholder isolation
pub struct SegmentProcessor<'a> {
    condenser: &'a dyn Condenser,
    estimator: &'a LengthEstimator,
}

impl<'a> SegmentProcessor<'a> {
    pub fn new(condenser: &'a dyn Condenser, estimator: &'a LengthEstimator) -> Self {
        Self {
            condenser,
            estimator,
        }
    }

    /// Condenses every chunk. A failing chunk never stops the ones after it;
    /// only a cancelled job does, and only between chunks.
    pub async fn process_chunks(
        &self,
        chunks: &[Chunk],
        target_length: usize,
        min_length: usize,
        job: Option<&JobGuard>,
    ) -> Result<Vec<ChunkResult>, Cancelled> {
        let total = chunks.len();
        let mut results = Vec::with_capacity(total);

        for (i, chunk) in chunks.iter().enumerate() {
            checkpoint(job, &format!("chunk {}/{}", i + 1, total))?;
            results.push(
                self.condense_chunk(chunk, i + 1, total, target_length, min_length)
                    .await,
            );
        }

        let failed = results.iter().filter(|r| r.is_placeholder()).count();
        if failed > 0 {
            warn!("⚠️ {} of {} chunks fell back to placeholders", failed, total);
        }
        Ok(results)
    }

    async fn condense_chunk(
        &self,
        chunk: &Chunk,
        ordinal: usize,
        total: usize,
        max_length: usize,
        min_length: usize,
    ) -> ChunkResult {
        let chunk_start = Instant::now();
        info!(
            "⏲️ Processing chunk {}/{} (cost: {}, {} chars)",
            ordinal,
            total,
            chunk.cost(),
            chunk.text().len()
        );

        let first_error = match self
            .condenser
            .condense(chunk.text(), max_length, min_length)
            .await
        {
            Ok(summary) => {
                info!(
                    "✓ Chunk {}/{} processed successfully in {}ms",
                    ordinal,
                    total,
                    chunk_start.elapsed().as_millis()
                );
                return ChunkResult::Condensed(summary);
            }
            Err(e) => e,
        };

        let retry_length = retry_max_length(max_length, min_length);
        warn!(
            "⚠️ Chunk {}/{} failed ({}), retrying with max_length {}",
            ordinal, total, first_error, retry_length
        );

        match self
            .condenser
            .condense(chunk.text(), retry_length, min_length)
            .await
        {
            Ok(summary) => {
                info!(
                    "✓ Chunk {}/{} processed on retry in {}ms",
                    ordinal,
                    total,
                    chunk_start.elapsed().as_millis()
                );
                ChunkResult::Condensed(summary)
            }
            Err(e) => {
                error!(
                    "❌ Chunk {}/{} failed twice after {}ms: {}",
                    ordinal,
                    total,
                    chunk_start.elapsed().as_millis(),
                    e
                );
                ChunkResult::Placeholder {
                    ordinal,
                    text: placeholder_for_chunk(ordinal),
                }
            }
        }
    }

    /// Second pass: re-condenses the combined text once if it is still over
    /// `chunk_budget`. A failure returns the combined text unchanged.
    pub async fn consolidate(
        &self,
        combined: String,
        chunk_budget: usize,
        target_length: usize,
        min_length: usize,
        job: Option<&JobGuard>,
    ) -> Result<String, Cancelled> {
        let combined_cost = self.estimator.estimate(&combined);
        if combined_cost <= chunk_budget {
            return Ok(combined);
        }

        checkpoint(job, "final consolidation")?;
        info!(
            "Combined summary is {} units (budget {}), condensing once more",
            combined_cost, chunk_budget
        );

        match self
            .condenser
            .condense(&combined, target_length, min_length)
            .await
        {
            Ok(condensed) => Ok(condensed),
            Err(e) => {
                warn!(
                    "⚠️ Final consolidation failed ({}), returning uncondensed summary",
                    e
                );
                Ok(combined)
            }
        }
    }
}

/// Chunked summarization front end.
///
/// Splits the transcript into chunks within `max_chunk_cost`, condenses each,
/// joins the results and re-condenses once if the join is still too long.
pub struct Summarizer {
    condenser: Arc<dyn Condenser>,
    estimator: LengthEstimator,
    max_chunk_cost: usize,
    default_target_length: usize,
}

impl Summarizer {
    pub fn new(condenser: Arc<dyn Condenser>, estimator: LengthEstimator, max_chunk_cost: usize) -> Self {
        Self {
            condenser,
            estimator,
            max_chunk_cost: max_chunk_cost.max(1),
            default_target_length: DEFAULT_TARGET_LENGTH,
        }
    }

    pub fn with_default_target_length(mut self, target_length: usize) -> Self {
        self.default_target_length = target_length;
        self
    }

    pub fn estimator(&self) -> &LengthEstimator {
        &self.estimator
    }

    pub fn max_chunk_cost(&self) -> usize {
        self.max_chunk_cost
    }

    /// Summarizes `text`. Never fails; degraded chunks show up as placeholders.
    pub async fn summarize(&self, text: &str, target_length: Option<usize>, min_length: usize) -> String {
        // No job is attached, so nothing can cancel this run
        self.run(text, target_length, min_length, None)
            .await
            .unwrap_or_default()
    }

    /// Same as [`Summarizer::summarize`], checking `job` before every backend call
    pub async fn summarize_job(
        &self,
        text: &str,
        target_length: Option<usize>,
        min_length: usize,
        job: &JobGuard,
    ) -> Result<String, Cancelled> {
        self.run(text, target_length, min_length, Some(job)).await
    }

    async fn run(
        &self,
        text: &str,
        target_length: Option<usize>,
        min_length: usize,
        job: Option<&JobGuard>,
    ) -> Result<String, Cancelled> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let target_length = target_length.unwrap_or(self.default_target_length).max(1);
        let min_length = if min_length > target_length {
            warn!(
                "min_length {} exceeds target_length {}, clamping",
                min_length, target_length
            );
            target_length
        } else {
            min_length
        };

        let start = Instant::now();
        let chunks = ChunkBuilder::new(&self.estimator, self.max_chunk_cost).build(text);
        info!(
            "Summarizing {} chunks (target_length: {}, min_length: {})",
            chunks.len(),
            target_length,
            min_length
        );

        let processor = SegmentProcessor::new(self.condenser.as_ref(), &self.estimator);
        let results = processor
            .process_chunks(&chunks, target_length, min_length, job)
            .await?;
        let combined = combine_results(&results);
        let summary = processor
            .consolidate(combined, self.max_chunk_cost, target_length, min_length, job)
            .await?;

        info!(
            "Summary generation completed in {:.2}s ({} chars)",
            start.elapsed().as_secs_f64(),
            summary.len()
        );
        Ok(summary)
    }
}
