//! Intent classification stage.
//!
//! Labels the question with a [`ResponseType`] before any retrieval
//! happens. The stage absorbs backend failures: a broken classifier
//! degrades the answer shape, it never takes down the request. The
//! declared fallback is `informational`.

use std::sync::Arc;

use crate::models::{Message, ResponseType};
use crate::providers::ClassifyProvider;

pub async fn classify(
    provider: Arc<dyn ClassifyProvider>,
    question: &str,
    history: &[Message],
    model: Option<&str>,
) -> ResponseType {
    match provider.classify(question, history, model).await {
        Ok(tag) => tag,
        Err(e) => {
            tracing::warn!(
                provider = provider.id(),
                error = %e,
                "intent classification failed; defaulting to informational"
            );
            ResponseType::Informational
        }
    }
}
