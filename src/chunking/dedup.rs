//! Sentence-level deduplication of retrieved passages.
//!
//! The corpus chunker overlaps adjacent chunks, and keyword + semantic
//! retrieval surfaces the same material under several terms, so passage
//! sets carry heavy redundancy. This module removes exact duplicates,
//! collapses near-duplicates (sentence overlap above a fixed threshold,
//! longer text wins), and trims overlapping sentence runs between
//! neighboring passages.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use unicode_segmentation::UnicodeSegmentation;

use crate::retrieval::RetrievedPassage;

/// Sentence-overlap ratio above which two passages are near-duplicates.
const NEAR_DUP_OVERLAP: f64 = 0.8;

/// Splits text into trimmed, non-empty sentences.
#[must_use]
pub fn sentence_list(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn sentence_hash(sentence: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    sentence.hash(&mut hasher);
    hasher.finish()
}

fn sentence_hashes(text: &str) -> HashSet<u64> {
    sentence_list(text).iter().map(|s| sentence_hash(s)).collect()
}

/// Deduplicates a passage list.
///
/// When `cache` carries the precomputed surviving ids for this passage
/// set (the optional `deduplicated_cache.json` artifact), it is used as a
/// read-through short-circuit; the cache is a performance aid and must
/// agree with the live path. Otherwise:
///
/// 1. exact duplicates (identical trimmed text) keep the first occurrence;
/// 2. near-duplicates (sentence overlap > 80% of the smaller set) keep
///    the longer text;
/// 3. sentence runs duplicated between surviving neighbors are trimmed
///    from the later passage.
#[must_use]
pub fn deduplicate(
    passages: Vec<RetrievedPassage>,
    cache: Option<&[String]>,
) -> Vec<RetrievedPassage> {
    if let Some(surviving) = cache {
        let keep: HashSet<&str> = surviving.iter().map(String::as_str).collect();
        return passages
            .into_iter()
            .filter(|p| keep.contains(p.chunk_id.as_str()))
            .collect();
    }

    // Pass 1: exact duplicates by trimmed text.
    let mut seen_texts: HashSet<u64> = HashSet::new();
    let mut unique: Vec<RetrievedPassage> = Vec::with_capacity(passages.len());
    for passage in passages {
        let key = sentence_hash(passage.text.trim());
        if seen_texts.insert(key) {
            unique.push(passage);
        }
    }

    // Pass 2: near-duplicates by sentence overlap; longer text survives.
    let hashes: Vec<HashSet<u64>> = unique.iter().map(|p| sentence_hashes(&p.text)).collect();
    let mut dropped = vec![false; unique.len()];
    for i in 0..unique.len() {
        if dropped[i] {
            continue;
        }
        for j in (i + 1)..unique.len() {
            if dropped[j] {
                continue;
            }
            let smaller = hashes[i].len().min(hashes[j].len());
            if smaller == 0 {
                continue;
            }
            let shared = hashes[i].intersection(&hashes[j]).count();
            #[allow(clippy::cast_precision_loss)]
            let ratio = shared as f64 / smaller as f64;
            if ratio > NEAR_DUP_OVERLAP {
                if unique[i].text.len() >= unique[j].text.len() {
                    dropped[j] = true;
                } else {
                    dropped[i] = true;
                    break;
                }
            }
        }
    }
    let mut survivors: Vec<RetrievedPassage> = unique
        .into_iter()
        .zip(dropped)
        .filter_map(|(p, gone)| (!gone).then_some(p))
        .collect();

    // Pass 3: trim sentence runs repeated from the previous survivor
    // (chunker overlap between adjacent chunks of one source span).
    let mut index = 1;
    while index < survivors.len() {
        let previous: HashSet<u64> = sentence_hashes(&survivors[index - 1].text);
        let current = &survivors[index];
        let sentences = sentence_list(&current.text);
        let carried = sentences
            .iter()
            .take_while(|s| previous.contains(&sentence_hash(s)))
            .count();
        if carried == 0 {
            index += 1;
            continue;
        }
        if carried == sentences.len() {
            survivors.remove(index);
            continue;
        }
        let trimmed = sentences[carried..].join(" ");
        survivors[index].text = trimmed;
        index += 1;
    }

    survivors
}
