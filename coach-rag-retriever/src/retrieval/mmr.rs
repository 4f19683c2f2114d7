//! Candidate deduplication and Maximal Marginal Relevance selection.
//!
//! Both functions expect candidates in descending score order, as returned by
//! [`VectorStore::search`](crate::storage::VectorStore::search).

use crate::storage::{ScoredChunk, cosine_similarity};
use std::collections::HashSet;

/// Lowercased text with whitespace runs collapsed, for duplicate detection.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop candidates that repeat an earlier one.
///
/// A candidate is a duplicate when its normalized text equals an earlier
/// kept candidate's, or their vectors have cosine similarity above
/// `threshold`. The first (highest scoring) occurrence is kept, and only
/// kept candidates count when judging later ones.
pub fn dedupe(candidates: Vec<ScoredChunk>, threshold: f32) -> Vec<ScoredChunk> {
    let mut seen_text = HashSet::new();
    let mut kept: Vec<ScoredChunk> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let key = normalize_text(&candidate.chunk.text);
        if seen_text.contains(&key) {
            continue;
        }
        let near_duplicate = kept
            .iter()
            .any(|k| cosine_similarity(&k.vector, &candidate.vector) > threshold);
        if !near_duplicate {
            seen_text.insert(key);
            kept.push(candidate);
        }
    }
    kept
}

/// Pick up to `k` candidates by MMR with trade-off `lambda`.
///
/// Each step takes the candidate maximising
/// `lambda * score - (1 - lambda) * max_similarity_to_selected`; ties go to
/// the earlier candidate. Returns indices into `candidates` in selection order.
pub fn mmr_select(candidates: &[ScoredChunk], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    // Max similarity of each candidate to anything selected so far
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for (pos, &i) in remaining.iter().enumerate() {
            let penalty = if selected.is_empty() {
                0.0
            } else {
                redundancy[i]
            };
            let value = lambda * candidates[i].score - (1.0 - lambda) * penalty;
            if best.is_none_or(|(_, v)| value > v) {
                best = Some((pos, value));
            }
        }

        let Some((pos, _)) = best else {
            break;
        };
        let chosen = remaining.remove(pos);
        for &i in &remaining {
            let sim = cosine_similarity(&candidates[i].vector, &candidates[chosen].vector);
            redundancy[i] = redundancy[i].max(sim);
        }
        selected.push(chosen);
    }

    selected
}
