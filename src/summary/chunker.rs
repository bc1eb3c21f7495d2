use crate::summary::tokens::LengthEstimator;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

// Terminal punctuation followed by whitespace or end of text. "3.5" and
// "e.g.x" stay whole; "Dr. Smith" over-splits, which is harmless here.
static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("Invalid sentence regex pattern"));

/// A token-bounded run of spans, joined with single spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    spans: Vec<String>,
    text: String,
    cost: usize,
}

impl Chunk {
    pub fn spans(&self) -> &[String] {
        &self.spans
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Estimated cost of [`Chunk::text`] at build time
    pub fn cost(&self) -> usize {
        self.cost
    }
}

/// Splits text into trimmed sentence spans. Each span keeps its own terminal
/// punctuation; a trailing fragment without punctuation is kept as-is.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut spans = Vec::new();
    let mut last_end = 0;

    for mat in SENTENCE_END.find_iter(text) {
        let span = text[last_end..mat.end()].trim();
        if !span.is_empty() {
            spans.push(span.to_string());
        }
        last_end = mat.end();
    }

    let tail = text[last_end..].trim();
    if !tail.is_empty() {
        spans.push(tail.to_string());
    }

    spans
}

/// Partitions text into chunks whose estimated cost stays within a budget.
///
/// Sentences are packed greedily. A sentence that is over budget on its own
/// is re-split into words (and a single over-budget word into characters)
/// and packed into word-level chunks before sentence packing resumes.
pub struct ChunkBuilder<'a> {
    estimator: &'a LengthEstimator,
    max_chunk_cost: usize,
}

impl<'a> ChunkBuilder<'a> {
    pub fn new(estimator: &'a LengthEstimator, max_chunk_cost: usize) -> Self {
        Self {
            estimator,
            max_chunk_cost: max_chunk_cost.max(1),
        }
    }

    pub fn build(&self, text: &str) -> Vec<Chunk> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return vec![];
        }

        let mut packer = Packer::new(self.estimator, self.max_chunk_cost);

        for sentence in sentences {
            if self.estimator.estimate(&sentence) <= self.max_chunk_cost {
                packer.push(sentence);
                continue;
            }

            debug!(
                "Sentence over budget ({} chars), re-packing at word level",
                sentence.len()
            );
            packer.close();
            for piece in self.word_pieces(&sentence) {
                packer.push(piece);
            }
            packer.close();
        }

        let chunks = packer.finish();
        info!(
            "Created {} chunks with max_chunk_cost {}",
            chunks.len(),
            self.max_chunk_cost
        );
        chunks
    }

    fn word_pieces(&self, sentence: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        for word in sentence.split_whitespace() {
            if self.estimator.estimate(word) <= self.max_chunk_cost {
                pieces.push(word.to_string());
            } else {
                pieces.extend(self.char_pieces(word));
            }
        }
        pieces
    }

    fn char_pieces(&self, word: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();

        for ch in word.chars() {
            current.push(ch);
            if self.estimator.estimate(&current) > self.max_chunk_cost {
                current.pop();
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                // A lone char over budget cannot be split further
                current.push(ch);
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}

/// Convenience wrapper around [`ChunkBuilder`]
pub fn chunk_text(text: &str, max_chunk_cost: usize, estimator: &LengthEstimator) -> Vec<Chunk> {
    ChunkBuilder::new(estimator, max_chunk_cost).build(text)
}

struct Packer<'a> {
    estimator: &'a LengthEstimator,
    budget: usize,
    spans: Vec<String>,
    text: String,
    cost: usize,
    chunks: Vec<Chunk>,
}

impl<'a> Packer<'a> {
    fn new(estimator: &'a LengthEstimator, budget: usize) -> Self {
        Self {
            estimator,
            budget,
            spans: Vec::new(),
            text: String::new(),
            cost: 0,
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, unit: String) {
        if !self.spans.is_empty() {
            let candidate = format!("{} {}", self.text, unit);
            let cost = self.estimator.estimate(&candidate);
            if cost <= self.budget {
                self.text = candidate;
                self.cost = cost;
                self.spans.push(unit);
                return;
            }
            self.close();
        }

        self.cost = self.estimator.estimate(&unit);
        self.text = unit.clone();
        self.spans.push(unit);
    }

    fn close(&mut self) {
        if self.spans.is_empty() {
            return;
        }
        self.chunks.push(Chunk {
            spans: std::mem::take(&mut self.spans),
            text: std::mem::take(&mut self.text),
            cost: self.cost,
        });
        self.cost = 0;
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.close();
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn joined(chunks: &[Chunk]) -> String {
        chunks
            .iter()
            .map(|c| c.text())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_split_sentences_keeps_punctuation() {
        let spans = split_sentences("  First one.  Second?Yes! Third  ");
        assert_eq!(spans, vec!["First one.", "Second?Yes!", "Third"]);
    }

    #[test]
    fn test_split_sentences_ignores_decimal_points() {
        let spans = split_sentences("Revenue grew 3.5 percent. Costs fell.");
        assert_eq!(spans, vec!["Revenue grew 3.5 percent.", "Costs fell."]);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let estimator = LengthEstimator::word_count();
        for budget in [1, 10, 1024] {
            assert!(chunk_text("", budget, &estimator).is_empty());
            assert!(chunk_text("   \n\t ", budget, &estimator).is_empty());
        }
    }

    #[test]
    fn test_sentences_are_packed_greedily_in_order() {
        let estimator = LengthEstimator::word_count();
        let text = "One two three. Four five. Six seven eight nine. Ten.";
        let chunks = chunk_text(text, 5, &estimator);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text()).collect();
        assert_eq!(
            texts,
            vec!["One two three. Four five.", "Six seven eight nine. Ten."]
        );
        assert_eq!(chunks[0].spans().len(), 2);
        assert!(chunks.iter().all(|c| c.cost() <= 5));
    }

    #[test]
    fn test_oversized_sentence_is_split_into_word_chunks() {
        let estimator = LengthEstimator::word_count();
        let text = "Short one. a b c d e f g h i j. Tail here.";
        let chunks = chunk_text(text, 4, &estimator);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text()).collect();
        assert_eq!(
            texts,
            vec!["Short one.", "a b c d", "e f g h", "i j.", "Tail here."]
        );
        for chunk in &chunks {
            assert!(estimator.estimate(chunk.text()) <= 4);
        }
        assert_eq!(normalized(&joined(&chunks)), normalized(text));
    }

    #[test]
    fn test_oversized_word_is_split_by_characters() {
        let estimator = LengthEstimator::heuristic();
        let word = "x".repeat(50);
        let chunks = chunk_text(&word, 4, &estimator);

        for chunk in &chunks {
            assert!(estimator.estimate(chunk.text()) <= 4);
        }
        let rebuilt: String = joined(&chunks).split_whitespace().collect();
        assert_eq!(rebuilt, word);
    }

    #[test]
    fn test_chunks_cover_input_up_to_whitespace() {
        let estimator = LengthEstimator::heuristic();
        let text = "Alice opened the meeting.\n\nBob reported that the release slipped by two days! \
                    Carol asked whether QA had signed off? Nobody knew.   Dana will follow up by Friday";
        for budget in [3, 8, 20, 1000] {
            let chunks = chunk_text(text, budget, &estimator);
            assert_eq!(normalized(&joined(&chunks)), normalized(text), "budget {}", budget);
            for chunk in &chunks {
                assert!(estimator.estimate(chunk.text()) <= budget, "budget {}", budget);
            }
        }
    }

    #[test]
    fn test_text_under_budget_is_single_chunk() {
        let estimator = LengthEstimator::word_count();
        let chunks = chunk_text("Just a short note. Nothing else.", 100, &estimator);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "Just a short note. Nothing else.");
        assert_eq!(chunks[0].cost(), 6);
    }

    #[test]
    fn test_zero_budget_is_treated_as_one() {
        let estimator = LengthEstimator::word_count();
        let chunks = chunk_text("a b c.", 0, &estimator);
        assert_eq!(chunks.len(), 3);
    }
}
