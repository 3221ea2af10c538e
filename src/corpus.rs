//! Corpus ingestion: filesystem → SQLite index.
//!
//! Walks a directory of policy documents, applies the configured
//! include/exclude globs, and indexes each matching file: one
//! `documents` row, paragraph chunks, FTS rows for sparse retrieval,
//! and (when embeddings are enabled) one vector per chunk for dense
//! retrieval.
//!
//! Ingestion is incremental. A document whose body hash is unchanged is
//! skipped entirely; a changed document is reindexed from scratch
//! (chunks, FTS rows, and vectors are replaced, never patched).

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{vec_to_blob, EmbeddingBackend};
use crate::models::{Chunk, Document};

/// Chunks embedded per backend call.
const EMBED_BATCH: usize = 32;

#[derive(Debug, Default)]
pub struct IndexStats {
    pub scanned: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub chunks: usize,
    pub embedded: usize,
}

pub async fn index_directory(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingBackend,
    config: &Config,
    root: &Path,
) -> Result<IndexStats> {
    let include = build_globset(&config.corpus.include_globs)?;
    let exclude = build_globset(&config.corpus.exclude_globs)?;

    let mut stats = IndexStats::default();
    let mut pending: Vec<Chunk> = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if !include.is_match(&rel) || exclude.is_match(&rel) {
            continue;
        }

        stats.scanned += 1;
        let body = std::fs::read_to_string(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;

        match index_document(pool, config, &rel, &body).await? {
            Some(chunks) => {
                stats.indexed += 1;
                stats.chunks += chunks.len();
                pending.extend(chunks);
            }
            None => stats.unchanged += 1,
        }
    }

    if embedder.dims() > 0 {
        stats.embedded = embed_chunks(pool, embedder, &pending).await?;
    }

    tracing::info!(
        scanned = stats.scanned,
        indexed = stats.indexed,
        unchanged = stats.unchanged,
        chunks = stats.chunks,
        embedded = stats.embedded,
        "corpus indexing finished"
    );
    Ok(stats)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// First markdown heading, else the file stem.
fn extract_title(source_id: &str, body: &str) -> String {
    for line in body.lines() {
        let line = line.trim();
        if let Some(heading) = line.strip_prefix("# ") {
            let heading = heading.trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }
    Path::new(source_id)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| source_id.to_string())
}

fn hash_body(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Index one document. Returns the fresh chunks when the document was
/// (re)indexed, `None` when the stored copy is already current.
async fn index_document(
    pool: &SqlitePool,
    config: &Config,
    source_id: &str,
    body: &str,
) -> Result<Option<Vec<Chunk>>> {
    let dedup_hash = hash_body(body);

    let existing: Option<(String, String)> =
        sqlx::query_as("SELECT id, dedup_hash FROM documents WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(pool)
            .await?;

    let document_id = match existing {
        Some((_, ref stored_hash)) if *stored_hash == dedup_hash => return Ok(None),
        Some((id, _)) => id,
        None => Uuid::new_v4().to_string(),
    };

    let document = Document {
        id: document_id,
        source_id: source_id.to_string(),
        source_url: None,
        title: Some(extract_title(source_id, body)),
        body: body.to_string(),
        updated_at: chrono::Utc::now().timestamp(),
        dedup_hash,
    };

    sqlx::query(
        r#"
        INSERT INTO documents (id, source_id, source_url, title, body, updated_at, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            updated_at = excluded.updated_at,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&document.id)
    .bind(&document.source_id)
    .bind(&document.source_url)
    .bind(&document.title)
    .bind(&document.body)
    .bind(document.updated_at)
    .bind(&document.dedup_hash)
    .execute(pool)
    .await?;

    // Replace derived rows wholesale.
    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(&document.id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(&document.id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(&document.id)
        .execute(pool)
        .await?;

    let chunks = chunk_text(&document.id, body, config.chunking.max_tokens);
    for chunk in &chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(pool)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(pool)
            .await?;
    }

    Ok(Some(chunks))
}

async fn embed_chunks(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingBackend,
    chunks: &[Chunk],
) -> Result<usize> {
    let mut embedded = 0;

    for batch in chunks.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;

        for (chunk, vector) in batch.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(embedder.model_name())
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(pool)
            .await?;
            embedded += 1;
        }
    }

    Ok(embedded)
}
