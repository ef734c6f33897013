//! Passage processing between retrieval and the LLM fan-out.
//!
//! Deduplication, period/region partitioning, and size-bounded batching.
//! Everything here is pure and synchronous; the heavy lifting happens in
//! the LLM calls downstream.

pub mod dedup;
pub mod partition;

pub use dedup::{deduplicate, sentence_list};
pub use partition::{
    Gazetteer, PeriodBound, PeriodTable, UNDATED_LABEL, UNLOCATED_LABEL, earliest_year,
    extract_years, order_regions_by_event_year, partition_by_period, partition_by_region,
};

use crate::retrieval::RetrievedPassage;

/// One size-bounded batch of passages for a single narrative call.
#[derive(Debug, Clone)]
pub struct PassageBatch {
    /// Passages in retrieval order.
    pub passages: Vec<RetrievedPassage>,
    /// Total whitespace-delimited words across the batch.
    pub word_count: usize,
}

/// Packs passages greedily into batches bounded by `max_words`.
///
/// Passage order is preserved and every input passage lands in exactly
/// one batch. A single passage larger than the bound is split at
/// sentence boundaries into several entries sharing its chunk id; splits
/// never occur mid-sentence.
#[must_use]
pub fn batch(passages: Vec<RetrievedPassage>, max_words: usize) -> Vec<PassageBatch> {
    let max_words = max_words.max(1);
    let mut batches: Vec<PassageBatch> = Vec::new();
    let mut current = PassageBatch {
        passages: Vec::new(),
        word_count: 0,
    };

    let flush = |current: &mut PassageBatch, batches: &mut Vec<PassageBatch>| {
        if !current.passages.is_empty() {
            batches.push(std::mem::replace(
                current,
                PassageBatch {
                    passages: Vec::new(),
                    word_count: 0,
                },
            ));
        }
    };

    for passage in passages {
        let words = passage.word_count();
        if words > max_words {
            flush(&mut current, &mut batches);
            for piece in split_passage(&passage, max_words) {
                let piece_words = piece.word_count();
                batches.push(PassageBatch {
                    passages: vec![piece],
                    word_count: piece_words,
                });
            }
            continue;
        }
        if current.word_count + words > max_words {
            flush(&mut current, &mut batches);
        }
        current.word_count += words;
        current.passages.push(passage);
    }
    flush(&mut current, &mut batches);
    batches
}

/// Splits an oversized passage at sentence boundaries into pieces of at
/// most `max_words` words (a single sentence longer than the bound
/// becomes its own piece).
fn split_passage(passage: &RetrievedPassage, max_words: usize) -> Vec<RetrievedPassage> {
    let sentences = dedup::sentence_list(&passage.text);
    let mut pieces: Vec<RetrievedPassage> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0;

    for sentence in sentences {
        let words = sentence.split_whitespace().count();
        if current_words + words > max_words && !current.is_empty() {
            pieces.push(RetrievedPassage {
                text: current.join(" "),
                ..passage.clone()
            });
            current.clear();
            current_words = 0;
        }
        current.push(sentence);
        current_words += words;
    }
    if !current.is_empty() {
        pieces.push(RetrievedPassage {
            text: current.join(" "),
            ..passage.clone()
        });
    }
    pieces
}
