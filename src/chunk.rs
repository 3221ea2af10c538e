//! Paragraph-boundary text chunker.
//!
//! Splits document body text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit, breaking on paragraph boundaries (`\n\n`) so each
//! chunk stays semantically coherent. A chunk's index doubles as its
//! citation location ("page") in answer sources.
//!
//! Each chunk carries a SHA-256 hash of its text for staleness detection
//! during re-indexing.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio; precise tokenization is not worth
/// a tokenizer dependency for chunk sizing.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting max_tokens.
/// Returns chunks with contiguous indices starting at 0; always at least one.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;

    let mut chunks = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        // Flush the buffer when this paragraph would overflow it.
        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            push_chunk(&mut chunks, document_id, &buf);
            buf.clear();
        }

        if para.len() > max_chars {
            // Oversized paragraph: hard-split at word boundaries.
            let mut rest = para;
            while !rest.is_empty() {
                let cut = split_point(rest, max_chars);
                push_chunk(&mut chunks, document_id, rest[..cut].trim());
                rest = &rest[cut..];
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(para);
        }
    }

    if !buf.is_empty() {
        push_chunk(&mut chunks, document_id, &buf);
    }
    if chunks.is_empty() {
        push_chunk(&mut chunks, document_id, text.trim());
    }

    chunks
}

/// Find a split point at or before `max_chars`, preferring a newline or
/// space boundary over a mid-word cut.
fn split_point(text: &str, max_chars: usize) -> usize {
    if text.len() <= max_chars {
        return text.len();
    }
    // Avoid slicing inside a multi-byte character.
    let mut limit = max_chars;
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }
    text[..limit]
        .rfind('\n')
        .or_else(|| text[..limit].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

fn push_chunk(chunks: &mut Vec<Chunk>, document_id: &str, text: &str) {
    let index = chunks.len() as i64;
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    chunks.push(Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Families of four qualify under the income cap.", 400);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_empty_text_yields_one_chunk() {
        let chunks = chunk_text("doc1", "", 400);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_paragraphs_grouped_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("doc1", text, 400);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_indices_contiguous_when_split() {
        let text = (0..40)
            .map(|i| format!("Eligibility rule number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, 10);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_oversized_paragraph_hard_split() {
        let text = "word ".repeat(200);
        let chunks = chunk_text("doc1", &text, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 10 * CHARS_PER_TOKEN + 1);
        }
    }

    #[test]
    fn test_hashes_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma";
        let a = chunk_text("doc1", text, 5);
        let b = chunk_text("doc1", text, 5);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
        }
    }
}
