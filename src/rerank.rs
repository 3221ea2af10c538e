//! Rerank stage: precision pass over the retriever's candidates.
//!
//! The reranker re-scores candidates against the query and keeps the
//! top `top_n`. The sort is stable, so candidates with equal relevance
//! keep their retrieval order. The stage absorbs backend failures: on
//! error the retriever's own top `top_n`, in retrieval order, goes to
//! the generator instead.

use std::sync::Arc;

use crate::models::{EvidenceChunk, RankedEvidence};
use crate::providers::RerankProvider;

pub async fn rerank(
    provider: Arc<dyn RerankProvider>,
    query: &str,
    candidates: Vec<EvidenceChunk>,
    top_n: usize,
    model: Option<&str>,
) -> Vec<RankedEvidence> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();

    match provider.scores(query, &texts, model).await {
        Ok(scores) if scores.len() == candidates.len() => {
            order_by_relevance(candidates, &scores, top_n)
        }
        Ok(scores) => {
            tracing::warn!(
                provider = provider.id(),
                expected = candidates.len(),
                got = scores.len(),
                "reranker returned wrong score count; using retrieval order"
            );
            passthrough(candidates, top_n)
        }
        Err(e) => {
            tracing::warn!(
                provider = provider.id(),
                error = %e,
                "reranking failed; using retrieval order"
            );
            passthrough(candidates, top_n)
        }
    }
}

/// Stable sort by descending relevance, then truncate. Stability is
/// what keeps equal-relevance candidates in retrieval order.
fn order_by_relevance(
    candidates: Vec<EvidenceChunk>,
    scores: &[f64],
    top_n: usize,
) -> Vec<RankedEvidence> {
    let mut scored: Vec<(EvidenceChunk, f64)> = candidates
        .into_iter()
        .zip(scores.iter().copied())
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(rank, (chunk, relevance))| RankedEvidence {
            chunk,
            relevance,
            rank,
        })
        .collect()
}

/// Fallback: retrieval order stands in for relevance order.
fn passthrough(candidates: Vec<EvidenceChunk>, top_n: usize) -> Vec<RankedEvidence> {
    candidates
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(rank, chunk)| {
            let relevance = chunk.score;
            RankedEvidence {
                chunk,
                relevance,
                rank,
            }
        })
        .collect()
}
