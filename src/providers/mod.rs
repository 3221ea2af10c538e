//! Capability traits and the provider registry.
//!
//! Every pipeline stage that talks to an AI backend does so through one
//! of the capability traits below. A vendor adapter implements exactly
//! the traits for the capabilities it serves, and the
//! [`ProviderRegistry`] maps (capability, provider name) to an adapter
//! instance. Swapping vendors never changes pipeline logic.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             ProviderRegistry                │
//! │  ┌─────────┐ ┌─────────┐ ┌──────────────┐  │
//! │  │ builtin │ │ openai  │ │   cohere     │  │
//! │  │ (all)   │ │ (LLM)   │ │  (rerank)    │  │
//! │  └─────────┘ └─────────┘ └──────────────┘  │
//! └──────────────┬──────────────────────────────┘
//!                ▼
//!     resolve(capability, override?) → adapter
//! ```
//!
//! Resolution happens once per request; adapters are never re-resolved
//! mid-pipeline. Credential problems are detected at registry
//! construction for the configured defaults and on first use for
//! request-time overrides.

pub mod builtin;
pub mod cohere;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{self, EmbeddingBackend};
use crate::error::PipelineError;
use crate::models::{
    Message, ModelDefaults, ModelInfo, ModelsResponse, RankedEvidence, ResponseType,
};

// ═══════════════════════════════════════════════════════════════════════
// Capability traits
// ═══════════════════════════════════════════════════════════════════════

/// Labels a question with a [`ResponseType`] tag.
#[async_trait]
pub trait ClassifyProvider: Send + Sync {
    /// Provider identifier (e.g. `"builtin"`, `"openai"`).
    fn id(&self) -> &str;

    /// Human-readable description for the models listing.
    fn description(&self) -> String;

    async fn classify(
        &self,
        question: &str,
        history: &[Message],
        model: Option<&str>,
    ) -> Result<ResponseType>;
}

/// Rewrites the current question into a self-contained query using
/// prior turns.
#[async_trait]
pub trait ReformulateProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn reformulate(
        &self,
        question: &str,
        history: &[Message],
        model: Option<&str>,
    ) -> Result<String>;
}

/// Re-scores candidate texts against a query. Returns one relevance
/// score per input, in input order; ordering and truncation stay with
/// the rerank stage.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> String;

    async fn scores(&self, query: &str, texts: &[String], model: Option<&str>)
        -> Result<Vec<f64>>;
}

/// Everything the generator needs for one answer.
pub struct GenerationRequest<'a> {
    pub query: &'a str,
    pub evidence: &'a [RankedEvidence],
    pub history: &'a [Message],
    pub response_type: ResponseType,
    pub model: Option<&'a str>,
}

/// Produces grounded answer text. Citations are emitted as `[n]`
/// markers referring to 1-based evidence positions; the generate stage
/// parses them into sources.
#[async_trait]
pub trait GenerateProvider: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> String;

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;
}

impl std::fmt::Debug for dyn GenerateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateProvider")
            .field("id", &self.id())
            .finish()
    }
}

/// Number the evidence for a prompt or extractive answer: one block per
/// chunk, tagged `[n]` in rank order.
pub fn evidence_block(evidence: &[RankedEvidence]) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, e)| format!("[{}] ({}) {}", i + 1, e.chunk.doc, e.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// An adapter plus any credential problem found at construction.
/// Resolution fails with `MisconfiguredProvider` while the issue stands.
struct Entry<T: ?Sized> {
    adapter: Arc<T>,
    credential_issue: Option<String>,
}

fn resolve_entry<T: ?Sized>(
    map: &HashMap<String, Entry<T>>,
    default: &str,
    requested: Option<&str>,
    capability: &'static str,
) -> Result<Arc<T>, PipelineError> {
    let name = requested.unwrap_or(default);
    let entry = map.get(name).ok_or_else(|| PipelineError::UnknownProvider {
        capability,
        provider: name.to_string(),
    })?;
    if let Some(reason) = &entry.credential_issue {
        return Err(PipelineError::MisconfiguredProvider {
            provider: name.to_string(),
            reason: reason.clone(),
        });
    }
    Ok(entry.adapter.clone())
}

/// Maps (capability, provider name) to a configured adapter.
///
/// Pure lookup and validation; the registry itself performs no network
/// calls. Built once at startup from the configuration.
pub struct ProviderRegistry {
    classifiers: HashMap<String, Entry<dyn ClassifyProvider>>,
    reformulators: HashMap<String, Entry<dyn ReformulateProvider>>,
    rerankers: HashMap<String, Entry<dyn RerankProvider>>,
    generators: HashMap<String, Entry<dyn GenerateProvider>>,
    embedder: Arc<dyn EmbeddingBackend>,
    default_classifier: String,
    default_reformulator: String,
    default_reranker: String,
    default_generator: String,
}

impl ProviderRegistry {
    /// Build the registry from configuration and validate that every
    /// configured default resolves. Credential problems in a default
    /// provider surface here, at startup, rather than on first request.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let mut registry = Self {
            classifiers: HashMap::new(),
            reformulators: HashMap::new(),
            rerankers: HashMap::new(),
            generators: HashMap::new(),
            embedder: embedding::create_backend(&config.embedding).map_err(|e| {
                PipelineError::MisconfiguredProvider {
                    provider: config.embedding.provider.clone(),
                    reason: e.to_string(),
                }
            })?,
            default_classifier: config.providers.classifier.clone(),
            default_reformulator: config.providers.reformulator.clone(),
            default_reranker: config.providers.reranker.clone(),
            default_generator: config.providers.generator.clone(),
        };

        let local = Arc::new(builtin::BuiltinProvider::new());
        registry.register_classifier(local.clone(), None);
        registry.register_reformulator(local.clone(), None);
        registry.register_reranker(local.clone(), None);
        registry.register_generator(local, None);

        let openai = Arc::new(openai::OpenAiChat::from_config(&config.providers.openai));
        let openai_issue = openai.credential_issue();
        registry.register_classifier(openai.clone(), openai_issue.clone());
        registry.register_reformulator(openai.clone(), openai_issue.clone());
        registry.register_generator(openai, openai_issue);

        let cohere = Arc::new(cohere::CohereRerank::from_config(&config.providers.cohere));
        let cohere_issue = cohere.credential_issue();
        registry.register_reranker(cohere, cohere_issue);

        // Fail fast when a configured default is unusable.
        registry.classifier(None)?;
        registry.reformulator(None)?;
        registry.reranker(None)?;
        registry.generator(None)?;

        Ok(registry)
    }

    pub fn register_classifier(
        &mut self,
        adapter: Arc<dyn ClassifyProvider>,
        credential_issue: Option<String>,
    ) {
        self.classifiers.insert(
            adapter.id().to_string(),
            Entry {
                adapter,
                credential_issue,
            },
        );
    }

    pub fn register_reformulator(
        &mut self,
        adapter: Arc<dyn ReformulateProvider>,
        credential_issue: Option<String>,
    ) {
        self.reformulators.insert(
            adapter.id().to_string(),
            Entry {
                adapter,
                credential_issue,
            },
        );
    }

    pub fn register_reranker(
        &mut self,
        adapter: Arc<dyn RerankProvider>,
        credential_issue: Option<String>,
    ) {
        self.rerankers.insert(
            adapter.id().to_string(),
            Entry {
                adapter,
                credential_issue,
            },
        );
    }

    pub fn register_generator(
        &mut self,
        adapter: Arc<dyn GenerateProvider>,
        credential_issue: Option<String>,
    ) {
        self.generators.insert(
            adapter.id().to_string(),
            Entry {
                adapter,
                credential_issue,
            },
        );
    }

    pub fn classifier(
        &self,
        requested: Option<&str>,
    ) -> Result<Arc<dyn ClassifyProvider>, PipelineError> {
        resolve_entry(&self.classifiers, &self.default_classifier, requested, "classify")
    }

    pub fn reformulator(
        &self,
        requested: Option<&str>,
    ) -> Result<Arc<dyn ReformulateProvider>, PipelineError> {
        resolve_entry(
            &self.reformulators,
            &self.default_reformulator,
            requested,
            "reformulate",
        )
    }

    pub fn reranker(
        &self,
        requested: Option<&str>,
    ) -> Result<Arc<dyn RerankProvider>, PipelineError> {
        resolve_entry(&self.rerankers, &self.default_reranker, requested, "rerank")
    }

    pub fn generator(
        &self,
        requested: Option<&str>,
    ) -> Result<Arc<dyn GenerateProvider>, PipelineError> {
        resolve_entry(&self.generators, &self.default_generator, requested, "generate")
    }

    /// The embedding backend serving the `retrieve` capability. Selected
    /// by configuration only; there is no per-request override.
    pub fn embedder(&self) -> Arc<dyn EmbeddingBackend> {
        self.embedder.clone()
    }

    /// Listing for `GET /models`.
    pub fn models(&self) -> ModelsResponse {
        let mut generators: Vec<ModelInfo> = self
            .generators
            .values()
            .map(|e| ModelInfo {
                id: e.adapter.id().to_string(),
                name: e.adapter.description(),
            })
            .collect();
        generators.sort_by(|a, b| a.id.cmp(&b.id));

        let mut rerankers: Vec<ModelInfo> = self
            .rerankers
            .values()
            .map(|e| ModelInfo {
                id: e.adapter.id().to_string(),
                name: e.adapter.description(),
            })
            .collect();
        rerankers.sort_by(|a, b| a.id.cmp(&b.id));

        let mut classifiers: Vec<ModelInfo> = self
            .classifiers
            .values()
            .map(|e| ModelInfo {
                id: e.adapter.id().to_string(),
                name: e.adapter.description(),
            })
            .collect();
        classifiers.sort_by(|a, b| a.id.cmp(&b.id));

        ModelsResponse {
            provider: self.default_generator.clone(),
            generators,
            rerankers,
            classifiers,
            defaults: ModelDefaults {
                generator: self.default_generator.clone(),
                reranker: self.default_reranker.clone(),
                classifier: self.default_classifier.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn registry() -> ProviderRegistry {
        let config = Config::minimal(PathBuf::from("/tmp/carechat-registry-test.sqlite"));
        ProviderRegistry::from_config(&config).unwrap()
    }

    #[test]
    fn test_defaults_resolve() {
        let r = registry();
        assert_eq!(r.classifier(None).unwrap().id(), "builtin");
        assert_eq!(r.generator(None).unwrap().id(), "builtin");
        assert_eq!(r.reranker(None).unwrap().id(), "builtin");
        assert_eq!(r.reformulator(None).unwrap().id(), "builtin");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let r = registry();
        let err = r.generator(Some("acme")).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownProvider { .. }));
    }

    #[test]
    fn test_misconfigured_provider_rejected_on_use() {
        // openai is registered but, absent OPENAI_API_KEY, unusable.
        if std::env::var("OPENAI_API_KEY").is_ok() {
            return;
        }
        let r = registry();
        let err = r.generator(Some("openai")).unwrap_err();
        assert!(matches!(err, PipelineError::MisconfiguredProvider { .. }));
    }

    #[test]
    fn test_models_listing_contains_all_backends() {
        let r = registry();
        let models = r.models();
        assert!(models.generators.iter().any(|m| m.id == "builtin"));
        assert!(models.generators.iter().any(|m| m.id == "openai"));
        assert!(models.rerankers.iter().any(|m| m.id == "cohere"));
        assert_eq!(models.defaults.generator, "builtin");
    }

    #[test]
    fn test_evidence_block_numbering() {
        use crate::models::EvidenceChunk;
        let evidence = vec![
            RankedEvidence {
                chunk: EvidenceChunk {
                    chunk_id: "c1".to_string(),
                    doc: "eligibility.md".to_string(),
                    location: 0,
                    url: None,
                    text: "Income limits apply.".to_string(),
                    score: 1.0,
                },
                relevance: 1.0,
                rank: 0,
            },
            RankedEvidence {
                chunk: EvidenceChunk {
                    chunk_id: "c2".to_string(),
                    doc: "copay.md".to_string(),
                    location: 2,
                    url: None,
                    text: "Copays are sliding scale.".to_string(),
                    score: 0.5,
                },
                relevance: 0.5,
                rank: 1,
            },
        ];
        let block = evidence_block(&evidence);
        assert!(block.starts_with("[1] (eligibility.md)"));
        assert!(block.contains("[2] (copay.md)"));
    }
}
