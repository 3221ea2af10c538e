//! Pipeline error taxonomy.
//!
//! Every stage failure maps onto a closed set of variants with a fixed
//! propagation policy: configuration errors and the retrieval/generation
//! stages are fatal for the request; classification, reformulation, and
//! reranking are absorbed at their stage boundary and replaced by a
//! declared fallback. The absorb-vs-propagate decision lives with the
//! stage, never at the call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The requested provider is not registered for the capability.
    #[error("unknown provider '{provider}' for capability '{capability}'")]
    UnknownProvider {
        capability: &'static str,
        provider: String,
    },

    /// A registered provider is missing required credentials or endpoint
    /// configuration. Surfaced at startup when the provider is a
    /// configured default, otherwise on first use.
    #[error("provider '{provider}' is misconfigured: {reason}")]
    MisconfiguredProvider { provider: String, reason: String },

    /// Intent classification failed. Non-fatal: the pipeline degrades to
    /// the default `informational` classification.
    #[error("intent classification failed")]
    Classification(#[source] anyhow::Error),

    /// Query reformulation failed. Non-fatal: the pipeline falls back to
    /// the identity query.
    #[error("query reformulation failed")]
    Reformulation(#[source] anyhow::Error),

    /// Evidence retrieval failed. Fatal for the request.
    #[error("evidence retrieval failed")]
    Retrieval(#[source] anyhow::Error),

    /// Reranking failed. Non-fatal: the pipeline passes the retriever's
    /// top-N through unranked.
    #[error("reranking failed")]
    Rerank(#[source] anyhow::Error),

    /// Answer generation failed. Fatal: there is no fallback answer
    /// text, a wrong fallback being worse than a visible error.
    #[error("answer generation failed")]
    Generation(#[source] anyhow::Error),
}

impl PipelineError {
    /// Whether this error propagates to the request boundary. Non-fatal
    /// variants only exist transiently inside their stage before being
    /// absorbed; seeing one escape the stage is a bug.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::UnknownProvider { .. }
                | PipelineError::MisconfiguredProvider { .. }
                | PipelineError::Retrieval(_)
                | PipelineError::Generation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_policy() {
        assert!(PipelineError::Retrieval(anyhow::anyhow!("x")).is_fatal());
        assert!(PipelineError::Generation(anyhow::anyhow!("x")).is_fatal());
        assert!(PipelineError::UnknownProvider {
            capability: "generate",
            provider: "nope".to_string()
        }
        .is_fatal());
        assert!(!PipelineError::Classification(anyhow::anyhow!("x")).is_fatal());
        assert!(!PipelineError::Reformulation(anyhow::anyhow!("x")).is_fatal());
        assert!(!PipelineError::Rerank(anyhow::anyhow!("x")).is_fatal());
    }

    #[test]
    fn test_unknown_provider_message_names_capability() {
        let err = PipelineError::UnknownProvider {
            capability: "rerank",
            provider: "acme".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rerank"));
        assert!(msg.contains("acme"));
    }
}
