//! Query reformulation stage.
//!
//! Rewrites the question into a self-contained retrieval query using
//! prior turns. Two hard rules hold at this boundary:
//!
//! - no history (or conversational mode off) means the question passes
//!   through verbatim, never paraphrased
//! - backend failure falls back to the verbatim question
//!
//! Either way the retriever always receives a usable query.

use std::sync::Arc;

use crate::models::Message;
use crate::providers::ReformulateProvider;

pub async fn reformulate(
    provider: Arc<dyn ReformulateProvider>,
    question: &str,
    history: &[Message],
    model: Option<&str>,
) -> String {
    if history.is_empty() {
        return question.to_string();
    }

    match provider.reformulate(question, history, model).await {
        Ok(query) if !query.trim().is_empty() => query,
        Ok(_) => {
            tracing::warn!(
                provider = provider.id(),
                "reformulation returned empty query; using original question"
            );
            question.to_string()
        }
        Err(e) => {
            tracing::warn!(
                provider = provider.id(),
                error = %e,
                "reformulation failed; using original question"
            );
            question.to_string()
        }
    }
}
