//! Deterministic, credential-free provider for every capability.
//!
//! The builtin provider keeps the whole pipeline runnable with no
//! network access and no API keys: keyword-rule intent classification,
//! lexical query expansion, token-overlap reranking, and extractive
//! grounded generation. It is the configured default and the backend
//! every test runs against.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::embedding::tokenize;
use crate::models::{Message, ResponseType, Role};

use super::{ClassifyProvider, GenerateProvider, GenerationRequest, ReformulateProvider, RerankProvider};

/// Terms that signal the question is about this domain at all.
const DOMAIN_HINTS: &[&str] = &[
    "child", "children", "childcare", "daycare", "care", "eligib", "income", "copay",
    "co-pay", "subsidy", "subsidies", "assistance", "voucher", "provider", "family",
    "families", "household", "apply", "application", "renew", "benefit", "ccap",
];

/// Terms that signal the asker wants to do something, not just know
/// something.
const ACTION_HINTS: &[&str] = &[
    "apply", "application", "renew", "renewal", "appeal", "submit", "enroll",
    "sign up", "register", "how do i get", "how to get",
];

/// Words too common to help a retrieval query.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "what", "whats", "about", "there",
    "their", "they", "have", "does", "how", "much", "many", "when", "where", "which",
    "would", "could", "should", "your", "from", "will",
];

pub struct BuiltinProvider;

impl BuiltinProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BuiltinProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[async_trait]
impl ClassifyProvider for BuiltinProvider {
    fn id(&self) -> &str {
        "builtin"
    }

    fn description(&self) -> String {
        "Builtin keyword-rule classifier (offline)".to_string()
    }

    async fn classify(
        &self,
        question: &str,
        history: &[Message],
        _model: Option<&str>,
    ) -> Result<ResponseType> {
        let lower = question.to_lowercase();

        if contains_any(&lower, ACTION_HINTS) {
            return Ok(ResponseType::NeedsAction);
        }
        if contains_any(&lower, DOMAIN_HINTS) {
            return Ok(ResponseType::Informational);
        }

        // A short follow-up ("what about five people?") inherits scope
        // from recent user turns.
        let follow_up_in_scope = history
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .take(2)
            .any(|m| contains_any(&m.content.to_lowercase(), DOMAIN_HINTS));

        if follow_up_in_scope {
            Ok(ResponseType::Informational)
        } else {
            Ok(ResponseType::OutOfScope)
        }
    }
}

#[async_trait]
impl ReformulateProvider for BuiltinProvider {
    fn id(&self) -> &str {
        "builtin"
    }

    /// Lexical expansion: fold content words from the most recent user
    /// turns into the query so follow-ups retrieve against the topic
    /// they elide.
    async fn reformulate(
        &self,
        question: &str,
        history: &[Message],
        _model: Option<&str>,
    ) -> Result<String> {
        let present: BTreeSet<String> = tokenize(question).into_iter().collect();

        let mut carried: Vec<String> = Vec::new();
        let mut seen = BTreeSet::new();
        for message in history.iter().rev().filter(|m| m.role == Role::User).take(2) {
            for token in tokenize(&message.content) {
                if token.len() >= 4
                    && !STOPWORDS.contains(&token.as_str())
                    && !present.contains(&token)
                    && seen.insert(token.clone())
                {
                    carried.push(token);
                }
            }
        }

        if carried.is_empty() {
            Ok(question.to_string())
        } else {
            carried.sort();
            Ok(format!("{} {}", question, carried.join(" ")))
        }
    }
}

#[async_trait]
impl RerankProvider for BuiltinProvider {
    fn id(&self) -> &str {
        "builtin"
    }

    fn description(&self) -> String {
        "Builtin token-overlap reranker (offline)".to_string()
    }

    /// Relevance = |query tokens ∩ candidate tokens| / |query tokens|.
    async fn scores(
        &self,
        query: &str,
        texts: &[String],
        _model: Option<&str>,
    ) -> Result<Vec<f64>> {
        let query_tokens: BTreeSet<String> = tokenize(query).into_iter().collect();
        if query_tokens.is_empty() {
            return Ok(vec![0.0; texts.len()]);
        }

        Ok(texts
            .iter()
            .map(|text| {
                let candidate: BTreeSet<String> = tokenize(text).into_iter().collect();
                let overlap = query_tokens.intersection(&candidate).count();
                overlap as f64 / query_tokens.len() as f64
            })
            .collect())
    }
}

/// Longest snippet of a chunk used in an extractive answer line.
const SNIPPET_CHARS: usize = 240;

#[async_trait]
impl GenerateProvider for BuiltinProvider {
    fn id(&self) -> &str {
        "builtin"
    }

    fn description(&self) -> String {
        "Builtin extractive generator (offline)".to_string()
    }

    /// Extractive generation: quote the top evidence verbatim with
    /// citation markers. Nothing in the answer exists outside the
    /// evidence, so grounding holds by construction.
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let mut lines = vec!["Here's what the childcare assistance documentation says:".to_string()];

        for (i, item) in request.evidence.iter().take(3).enumerate() {
            lines.push(format!("- {} [{}]", snippet(&item.chunk.text), i + 1));
        }

        if request.response_type == ResponseType::NeedsAction {
            lines.push(
                "The links below will take you to the application and your local office."
                    .to_string(),
            );
        }

        Ok(lines.join("\n"))
    }
}

fn snippet(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.len() <= SNIPPET_CHARS {
        return flat.to_string();
    }
    let mut cut = SNIPPET_CHARS;
    while !flat.is_char_boundary(cut) {
        cut -= 1;
    }
    let clipped = flat[..cut].rfind(' ').map(|p| &flat[..p]).unwrap_or(&flat[..cut]);
    format!("{}…", clipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvidenceChunk, RankedEvidence};

    fn history_of(contents: &[&str]) -> Vec<Message> {
        contents.iter().map(|c| Message::user(*c)).collect()
    }

    #[tokio::test]
    async fn test_classify_action_intent() {
        let p = BuiltinProvider::new();
        let tag = p
            .classify("How do I apply for childcare assistance?", &[], None)
            .await
            .unwrap();
        assert_eq!(tag, ResponseType::NeedsAction);
    }

    #[tokio::test]
    async fn test_classify_informational() {
        let p = BuiltinProvider::new();
        let tag = p
            .classify("What is the income limit for a family of 4?", &[], None)
            .await
            .unwrap();
        assert_eq!(tag, ResponseType::Informational);
    }

    #[tokio::test]
    async fn test_classify_out_of_scope() {
        let p = BuiltinProvider::new();
        let tag = p
            .classify("What's the weather tomorrow?", &[], None)
            .await
            .unwrap();
        assert_eq!(tag, ResponseType::OutOfScope);
    }

    #[tokio::test]
    async fn test_classify_follow_up_inherits_scope() {
        let p = BuiltinProvider::new();
        let history = history_of(&["What's the income limit for childcare assistance?"]);
        let tag = p
            .classify("And for five people?", &history, None)
            .await
            .unwrap();
        assert_eq!(tag, ResponseType::Informational);
    }

    #[tokio::test]
    async fn test_reformulate_carries_topic_terms() {
        let p = BuiltinProvider::new();
        let history = history_of(&["What's the eligibility limit for childcare?"]);
        let rewritten = p
            .reformulate("what about a family of 5", &history, None)
            .await
            .unwrap();
        assert!(rewritten.starts_with("what about a family of 5"));
        assert!(rewritten.contains("eligibility"));
        assert!(rewritten.contains("childcare"));
    }

    #[tokio::test]
    async fn test_reformulate_without_new_terms_is_identity() {
        let p = BuiltinProvider::new();
        let history = history_of(&["family"]);
        let rewritten = p
            .reformulate("family income question", &history, None)
            .await
            .unwrap();
        assert_eq!(rewritten, "family income question");
    }

    #[tokio::test]
    async fn test_rerank_scores_favor_overlap() {
        let p = BuiltinProvider::new();
        let texts = vec![
            "income limit for each family".to_string(),
            "unrelated forestry rules".to_string(),
        ];
        let scores = p.scores("family income limit", &texts, None).await.unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }

    #[tokio::test]
    async fn test_generate_cites_evidence() {
        let p = BuiltinProvider::new();
        let evidence = vec![RankedEvidence {
            chunk: EvidenceChunk {
                chunk_id: "c1".to_string(),
                doc: "eligibility.md".to_string(),
                location: 0,
                url: None,
                text: "A family of 4 qualifies below $5,000 per month.".to_string(),
                score: 1.0,
            },
            relevance: 1.0,
            rank: 0,
        }];
        let request = GenerationRequest {
            query: "limit for a family of 4",
            evidence: &evidence,
            history: &[],
            response_type: ResponseType::Informational,
            model: None,
        };
        let answer = p.generate(&request).await.unwrap();
        assert!(answer.contains("[1]"));
        assert!(answer.contains("$5,000"));
    }
}
