//! Evidence retrieval over the SQLite corpus index.
//!
//! Three modes share one contract: return at most `top_k` evidence
//! chunks, sorted by descending score with a deterministic tie-break on
//! chunk id.
//!
//! - `sparse`  — BM25 over the `chunks_fts` FTS5 table
//! - `dense`   — cosine similarity over stored `chunk_vectors`
//! - `hybrid`  — both legs fused with reciprocal rank fusion
//!
//! Scores are mode-specific (BM25 weights, cosine values, RRF sums) and
//! mean nothing across modes; only the ordering is the product. Hybrid
//! fusion therefore works on ranks, never on the raw leg scores.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::embedding::{self, blob_to_vec, cosine_similarity, tokenize, EmbeddingBackend};
use crate::models::{EvidenceChunk, RetrievalMode};

pub async fn retrieve(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingBackend,
    config: &RetrievalConfig,
    query: &str,
) -> Result<Vec<EvidenceChunk>> {
    let mut results = match config.mode {
        RetrievalMode::Sparse => sparse_search(pool, query, config.candidate_k).await?,
        RetrievalMode::Dense => dense_search(pool, embedder, query, config.candidate_k).await?,
        RetrievalMode::Hybrid => {
            let (sparse, dense) = tokio::join!(
                sparse_search(pool, query, config.candidate_k),
                dense_search(pool, embedder, query, config.candidate_k),
            );
            fuse_rrf(&[sparse?, dense?], config.rrf_k)
        }
    };

    sort_evidence(&mut results);
    results.truncate(config.top_k);
    Ok(results)
}

/// Descending score; equal scores order by chunk id so runs are
/// reproducible.
fn sort_evidence(results: &mut [EvidenceChunk]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

// ═══════════════════════════════════════════════════════════════════════
// Sparse (FTS5 / BM25)
// ═══════════════════════════════════════════════════════════════════════

/// FTS5 MATCH syntax chokes on raw user text (apostrophes, question
/// marks, operators), so queries are rebuilt from bare tokens joined
/// with OR.
fn fts_query(text: &str) -> Option<String> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

async fn sparse_search(
    pool: &SqlitePool,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<EvidenceChunk>> {
    let Some(match_expr) = fts_query(query) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(
        r#"
        SELECT c.id, c.chunk_index, c.text,
               d.title, d.source_id, d.source_url,
               bm25(chunks_fts) AS bm25_score
        FROM chunks_fts
        JOIN chunks c ON c.id = chunks_fts.chunk_id
        JOIN documents d ON d.id = c.document_id
        WHERE chunks_fts MATCH ?
        ORDER BY bm25(chunks_fts)
        LIMIT ?
        "#,
    )
    .bind(&match_expr)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    // bm25() returns lower-is-better; negate so every mode sorts the
    // same direction.
    Ok(rows
        .iter()
        .map(|row| evidence_from_row(row, -row.get::<f64, _>("bm25_score")))
        .collect())
}

// ═══════════════════════════════════════════════════════════════════════
// Dense (cosine over stored vectors)
// ═══════════════════════════════════════════════════════════════════════

async fn dense_search(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingBackend,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<EvidenceChunk>> {
    let query_vec = embedding::embed_query(embedder, query).await?;

    let rows = sqlx::query(
        r#"
        SELECT c.id, c.chunk_index, c.text,
               d.title, d.source_id, d.source_url,
               v.embedding
        FROM chunk_vectors v
        JOIN chunks c ON c.id = v.chunk_id
        JOIN documents d ON d.id = c.document_id
        WHERE v.model = ?
        "#,
    )
    .bind(embedder.model_name())
    .fetch_all(pool)
    .await?;

    let mut scored: Vec<EvidenceChunk> = rows
        .iter()
        .map(|row| {
            let stored = blob_to_vec(row.get::<Vec<u8>, _>("embedding").as_slice());
            let score = cosine_similarity(&query_vec, &stored) as f64;
            evidence_from_row(row, score)
        })
        .collect();

    sort_evidence(&mut scored);
    scored.truncate(candidate_k.max(0) as usize);
    Ok(scored)
}

fn evidence_from_row(row: &sqlx::sqlite::SqliteRow, score: f64) -> EvidenceChunk {
    let title: Option<String> = row.get("title");
    let source_id: String = row.get("source_id");
    EvidenceChunk {
        chunk_id: row.get("id"),
        doc: title.unwrap_or(source_id),
        location: row.get("chunk_index"),
        url: row.get("source_url"),
        text: row.get("text"),
        score,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Hybrid fusion
// ═══════════════════════════════════════════════════════════════════════

/// Reciprocal rank fusion: each leg contributes `1 / (k + rank)` per
/// chunk, with rank starting at 1. Rank-based fusion sidesteps the
/// incomparability of BM25 and cosine scales.
pub fn fuse_rrf(legs: &[Vec<EvidenceChunk>], rrf_k: u32) -> Vec<EvidenceChunk> {
    let mut fused: HashMap<String, EvidenceChunk> = HashMap::new();

    for leg in legs {
        for (rank, chunk) in leg.iter().enumerate() {
            let contribution = 1.0 / (rrf_k as f64 + rank as f64 + 1.0);
            fused
                .entry(chunk.chunk_id.clone())
                .and_modify(|existing| existing.score += contribution)
                .or_insert_with(|| {
                    let mut c = chunk.clone();
                    c.score = contribution;
                    c
                });
        }
    }

    fused.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, score: f64) -> EvidenceChunk {
        EvidenceChunk {
            chunk_id: id.to_string(),
            doc: "doc.md".to_string(),
            location: 0,
            url: None,
            text: format!("text for {}", id),
            score,
        }
    }

    #[test]
    fn test_fts_query_strips_punctuation() {
        let q = fts_query("What's the income limit?").unwrap();
        assert!(!q.contains('\''));
        assert!(!q.contains('?'));
        assert!(q.contains("income"));
        assert!(q.contains(" OR "));
    }

    #[test]
    fn test_fts_query_empty_for_punctuation_only() {
        assert!(fts_query("??!").is_none());
    }

    #[test]
    fn test_sort_descending_with_id_tiebreak() {
        let mut results = vec![chunk("b", 0.5), chunk("a", 0.5), chunk("c", 0.9)];
        sort_evidence(&mut results);
        let ids: Vec<&str> = results.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_rrf_rewards_presence_in_both_legs() {
        let sparse = vec![chunk("x", 10.0), chunk("y", 5.0)];
        let dense = vec![chunk("y", 0.9), chunk("z", 0.8)];
        let mut fused = fuse_rrf(&[sparse, dense], 60);
        sort_evidence(&mut fused);
        // y appears in both legs, so it outranks the single-leg leaders.
        assert_eq!(fused[0].chunk_id, "y");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_rrf_score_is_rank_based() {
        // Leg scores differ wildly; fused contributions depend only on rank.
        let a = vec![chunk("p", 1_000_000.0)];
        let b = vec![chunk("q", 0.000_1)];
        let fused = fuse_rrf(&[a, b], 60);
        let p = fused.iter().find(|c| c.chunk_id == "p").unwrap();
        let q = fused.iter().find(|c| c.chunk_id == "q").unwrap();
        assert!((p.score - q.score).abs() < f64::EPSILON);
    }
}
