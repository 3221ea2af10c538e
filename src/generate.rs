//! Answer generation and source attribution.
//!
//! The generator only ever sees the ranked evidence; the grounding rule
//! is enforced structurally here rather than hoped for downstream:
//!
//! - no evidence means the fixed insufficient-evidence answer, with no
//!   sources and no generator call
//! - sources attached to an answer always come from the evidence set,
//!   selected by the `[n]` citation markers the generator emits
//!
//! Generation failures are fatal. There is no canned fallback answer
//! because a fabricated answer about benefits eligibility is worse than
//! a visible error.

use std::sync::Arc;

use crate::models::{ActionItem, Message, RankedEvidence, ResponseType, Source};
use crate::providers::{GenerateProvider, GenerationRequest};

/// Fixed reply when retrieval produced nothing to ground an answer on.
pub const INSUFFICIENT_EVIDENCE_ANSWER: &str = "I couldn't find information about that in the \
childcare assistance documentation. Try rephrasing your question, or contact your local \
childcare assistance office for help.";

pub struct GeneratedAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
}

pub async fn generate(
    provider: Arc<dyn GenerateProvider>,
    query: &str,
    evidence: &[RankedEvidence],
    history: &[Message],
    response_type: ResponseType,
    model: Option<&str>,
) -> anyhow::Result<GeneratedAnswer> {
    if evidence.is_empty() {
        return Ok(GeneratedAnswer {
            answer: INSUFFICIENT_EVIDENCE_ANSWER.to_string(),
            sources: Vec::new(),
        });
    }

    let request = GenerationRequest {
        query,
        evidence,
        history,
        response_type,
        model,
    };
    let answer = provider.generate(&request).await?;
    let sources = cited_sources(&answer, evidence);

    Ok(GeneratedAnswer { answer, sources })
}

/// Map `[n]` markers back to evidence, in order of first citation,
/// deduplicated per document location. Markers outside 1..=len are
/// ignored. An answer with no markers keeps all evidence as sources
/// rather than claiming it used none.
fn cited_sources(answer: &str, evidence: &[RankedEvidence]) -> Vec<Source> {
    let cited = citation_indices(answer, evidence.len());

    let picked: Vec<&RankedEvidence> = if cited.is_empty() {
        evidence.iter().collect()
    } else {
        cited.iter().map(|&i| &evidence[i]).collect()
    };

    let mut sources: Vec<Source> = Vec::new();
    for item in picked {
        let source = Source::from_chunk(&item.chunk);
        let duplicate = sources
            .iter()
            .any(|s| s.doc == source.doc && s.page == source.page);
        if !duplicate {
            sources.push(source);
        }
    }
    sources
}

/// 0-based evidence indices cited in the answer, in order of first
/// appearance.
fn citation_indices(answer: &str, evidence_len: usize) -> Vec<usize> {
    let mut indices = Vec::new();
    let bytes = answer.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close) = answer[i + 1..].find(']') {
                let inner = &answer[i + 1..i + 1 + close];
                if let Ok(n) = inner.parse::<usize>() {
                    if n >= 1 && n <= evidence_len && !indices.contains(&(n - 1)) {
                        indices.push(n - 1);
                    }
                }
                i += close + 2;
                continue;
            }
        }
        i += 1;
    }
    indices
}

/// Next-step links attached to `needs_action` answers.
pub fn action_items() -> Vec<ActionItem> {
    vec![
        ActionItem {
            kind: "application".to_string(),
            url: "https://childcare.gov/apply".to_string(),
            label: "Start a childcare assistance application".to_string(),
            description: Some(
                "Online application for the childcare assistance program.".to_string(),
            ),
        },
        ActionItem {
            kind: "office_locator".to_string(),
            url: "https://childcare.gov/consumer-education/find-help".to_string(),
            label: "Find your local office".to_string(),
            description: Some(
                "Locate the office that handles applications for your area.".to_string(),
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvidenceChunk;
    use crate::providers::builtin::BuiltinProvider;

    fn evidence(n: usize) -> Vec<RankedEvidence> {
        (0..n)
            .map(|i| RankedEvidence {
                chunk: EvidenceChunk {
                    chunk_id: format!("c{}", i),
                    doc: format!("doc{}.md", i),
                    location: i as i64,
                    url: None,
                    text: format!("Evidence passage number {}.", i),
                    score: 1.0 - i as f64 * 0.1,
                },
                relevance: 1.0 - i as f64 * 0.1,
                rank: i,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_no_evidence_yields_fixed_answer_and_no_sources() {
        let out = generate(
            Arc::new(BuiltinProvider::new()),
            "income limit?",
            &[],
            &[],
            ResponseType::Informational,
            None,
        )
        .await
        .unwrap();
        assert_eq!(out.answer, INSUFFICIENT_EVIDENCE_ANSWER);
        assert!(out.sources.is_empty());
    }

    #[tokio::test]
    async fn test_sources_come_from_evidence() {
        let ev = evidence(3);
        let out = generate(
            Arc::new(BuiltinProvider::new()),
            "evidence passage",
            &ev,
            &[],
            ResponseType::Informational,
            None,
        )
        .await
        .unwrap();
        assert!(!out.sources.is_empty());
        for source in &out.sources {
            assert!(ev.iter().any(|e| e.chunk.doc == source.doc));
        }
    }

    #[test]
    fn test_citation_indices_in_first_use_order() {
        assert_eq!(citation_indices("See [2] and [1], also [2].", 3), vec![1, 0]);
    }

    #[test]
    fn test_citation_indices_ignore_out_of_range() {
        assert_eq!(citation_indices("Bogus [9] and [0], real [1].", 2), vec![0]);
    }

    #[test]
    fn test_citation_indices_ignore_non_numeric() {
        assert_eq!(citation_indices("[note] [1]", 2), vec![0]);
    }

    #[test]
    fn test_uncited_answer_keeps_all_evidence() {
        let ev = evidence(2);
        let sources = cited_sources("An answer with no markers.", &ev);
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn test_duplicate_locations_deduplicated() {
        let mut ev = evidence(2);
        ev[1].chunk.doc = ev[0].chunk.doc.clone();
        ev[1].chunk.location = ev[0].chunk.location;
        let sources = cited_sources("[1] and [2]", &ev);
        assert_eq!(sources.len(), 1);
    }
}
