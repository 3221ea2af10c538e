//! End-to-end pipeline tests against a real SQLite index.
//!
//! Everything runs on the builtin providers: no network, no
//! credentials. Each test indexes a small policy corpus into a
//! temporary database and drives the full pipeline through
//! `ChatPipeline::run`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use carechat::config::Config;
use carechat::generate::INSUFFICIENT_EVIDENCE_ANSWER;
use carechat::models::{ChatRequest, Message, ResponseType, Role};
use carechat::pipeline::{ChatPipeline, OUT_OF_SCOPE_ANSWER};
use carechat::providers::{
    ClassifyProvider, GenerateProvider, GenerationRequest, ReformulateProvider,
};
use carechat::{corpus, db, embedding, error::PipelineError, migrate};

const ELIGIBILITY_DOC: &str = "# Income Eligibility\n\nA family of 4 is eligible for childcare \
assistance when gross monthly income is at or below $5,000.\n\nA family of 5 is eligible when \
gross monthly income is at or below $5,800.";

const COPAY_DOC: &str = "# Copayments\n\nCopayments are assessed on a sliding scale based on \
family size and income. The minimum copay is $15 per month.";

const APPLY_DOC: &str = "# Applying\n\nTo apply for childcare assistance, submit an application \
online or at your local office. Renewals are due every 12 months.";

struct TestEnv {
    pipeline: ChatPipeline,
    _dir: TempDir,
}

async fn setup(docs: &[(&str, &str)]) -> Result<TestEnv> {
    let dir = TempDir::new()?;
    let corpus_dir = dir.path().join("docs");
    std::fs::create_dir_all(&corpus_dir)?;
    for (name, body) in docs {
        std::fs::write(corpus_dir.join(name), body)?;
    }

    let config = Config::minimal(dir.path().join("carechat.sqlite"));

    migrate::run_migrations(&config).await?;
    let pool = db::connect(&config.db).await?;
    let embedder = embedding::create_backend(&config.embedding)?;
    corpus::index_directory(&pool, embedder.as_ref(), &config, &corpus_dir).await?;
    pool.close().await;

    let pipeline = ChatPipeline::initialize(config).await?;
    Ok(TestEnv {
        pipeline,
        _dir: dir,
    })
}

fn request(question: &str) -> ChatRequest {
    ChatRequest {
        question: question.to_string(),
        session_id: None,
        provider: None,
        llm_model: None,
        reranker_model: None,
        intent_model: None,
        conversational_mode: None,
    }
}

fn request_in_session(question: &str, session_id: &str) -> ChatRequest {
    ChatRequest {
        session_id: Some(session_id.to_string()),
        ..request(question)
    }
}

#[tokio::test]
async fn test_eligibility_question_is_grounded_with_sources() -> Result<()> {
    let env = setup(&[("eligibility.md", ELIGIBILITY_DOC), ("copay.md", COPAY_DOC)]).await?;

    let response = env
        .pipeline
        .run(request("What is the income limit for a family of 4?"))
        .await?;

    assert_eq!(response.response_type, ResponseType::Informational);
    assert!(response.answer.contains("$5,000"));
    assert!(!response.sources.is_empty());
    assert!(response
        .sources
        .iter()
        .any(|s| s.doc == "Income Eligibility"));
    assert!(response.action_items.is_empty());
    assert!(!response.session_id.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_action_question_attaches_action_items() -> Result<()> {
    let env = setup(&[("apply.md", APPLY_DOC)]).await?;

    let response = env
        .pipeline
        .run(request("How do I apply for childcare assistance?"))
        .await?;

    assert_eq!(response.response_type, ResponseType::NeedsAction);
    assert!(!response.action_items.is_empty());
    assert!(response.action_items.iter().all(|a| !a.url.is_empty()));
    Ok(())
}

#[tokio::test]
async fn test_out_of_scope_short_circuits_retrieval() -> Result<()> {
    let env = setup(&[("eligibility.md", ELIGIBILITY_DOC)]).await?;

    let response = env
        .pipeline
        .run(request("What's the weather going to be tomorrow?"))
        .await?;

    assert_eq!(response.response_type, ResponseType::OutOfScope);
    assert_eq!(response.answer, OUT_OF_SCOPE_ANSWER);
    assert!(response.sources.is_empty());
    assert!(response.action_items.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_empty_corpus_yields_fixed_insufficient_evidence_answer() -> Result<()> {
    let env = setup(&[]).await?;

    let response = env
        .pipeline
        .run(request("What is the income limit for childcare assistance?"))
        .await?;

    assert_eq!(response.answer, INSUFFICIENT_EVIDENCE_ANSWER);
    assert!(response.sources.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_follow_up_uses_session_context() -> Result<()> {
    let env = setup(&[("eligibility.md", ELIGIBILITY_DOC), ("copay.md", COPAY_DOC)]).await?;

    let first = env
        .pipeline
        .run(request_in_session(
            "What is the childcare assistance income limit for a family of 4?",
            "s-follow",
        ))
        .await?;
    assert!(first.answer.contains("$5,000"));

    // The follow-up elides the topic entirely; reformulation must carry
    // it from the prior turn.
    let second = env
        .pipeline
        .run(request_in_session("And for a family of 5?", "s-follow"))
        .await?;
    assert_eq!(second.response_type, ResponseType::Informational);
    assert!(second.answer.contains("$5,800"));

    let transcript = env.pipeline.sessions().transcript("s-follow").await;
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[3].role, Role::Assistant);
    Ok(())
}

#[tokio::test]
async fn test_conversational_mode_off_ignores_history() -> Result<()> {
    let env = setup(&[("eligibility.md", ELIGIBILITY_DOC)]).await?;

    env.pipeline
        .run(request_in_session(
            "What is the childcare assistance income limit?",
            "s-mode",
        ))
        .await?;

    let mut follow_up = request_in_session("And for five people?", "s-mode");
    follow_up.conversational_mode = Some(false);
    let response = env.pipeline.run(follow_up).await?;

    // Without history the follow-up has no domain signal at all.
    assert_eq!(response.response_type, ResponseType::OutOfScope);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_keep_exchanges_paired() -> Result<()> {
    let env = setup(&[("eligibility.md", ELIGIBILITY_DOC)]).await?;
    let pipeline = Arc::new(env.pipeline);

    let mut handles = Vec::new();
    for n in 0..8 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .run(request_in_session(
                    &format!("What is the childcare income limit, question {}?", n),
                    "s-concurrent",
                ))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap()?;
    }

    let transcript = pipeline.sessions().transcript("s-concurrent").await;
    assert_eq!(transcript.len(), 16);
    for pair in transcript.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
    Ok(())
}

#[tokio::test]
async fn test_clear_resets_session_history() -> Result<()> {
    let env = setup(&[("eligibility.md", ELIGIBILITY_DOC)]).await?;

    env.pipeline
        .run(request_in_session(
            "What is the childcare income limit?",
            "s-clear",
        ))
        .await?;
    assert!(env.pipeline.sessions().clear("s-clear").await);
    assert!(env.pipeline.sessions().transcript("s-clear").await.is_empty());

    // The id stays usable after clearing.
    env.pipeline
        .run(request_in_session(
            "What is the childcare income limit?",
            "s-clear",
        ))
        .await?;
    assert_eq!(env.pipeline.sessions().transcript("s-clear").await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_provider_is_fatal() -> Result<()> {
    let env = setup(&[("eligibility.md", ELIGIBILITY_DOC)]).await?;

    let mut req = request_in_session("What is the childcare income limit?", "s-unknown");
    req.provider = Some("acme".to_string());
    let err = env.pipeline.run(req).await.unwrap_err();

    assert!(matches!(err, PipelineError::UnknownProvider { .. }));
    assert!(err.is_fatal());
    // The failed request left no trace in the session.
    assert!(env
        .pipeline
        .sessions()
        .transcript("s-unknown")
        .await
        .is_empty());
    Ok(())
}

// ============ Generation failure ============

/// Classifies and reformulates like the builtin provider would, but
/// always fails at generation.
struct BrokenGenerator;

#[async_trait]
impl ClassifyProvider for BrokenGenerator {
    fn id(&self) -> &str {
        "broken"
    }

    fn description(&self) -> String {
        "test-only: generation always fails".to_string()
    }

    async fn classify(
        &self,
        _question: &str,
        _history: &[Message],
        _model: Option<&str>,
    ) -> Result<ResponseType> {
        Ok(ResponseType::Informational)
    }
}

#[async_trait]
impl ReformulateProvider for BrokenGenerator {
    fn id(&self) -> &str {
        "broken"
    }

    async fn reformulate(
        &self,
        question: &str,
        _history: &[Message],
        _model: Option<&str>,
    ) -> Result<String> {
        Ok(question.to_string())
    }
}

#[async_trait]
impl GenerateProvider for BrokenGenerator {
    fn id(&self) -> &str {
        "broken"
    }

    fn description(&self) -> String {
        "test-only: generation always fails".to_string()
    }

    async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String> {
        anyhow::bail!("generation backend unavailable")
    }
}

#[tokio::test]
async fn test_generation_failure_returns_error_and_skips_session_append() -> Result<()> {
    let env = setup(&[("eligibility.md", ELIGIBILITY_DOC)]).await?;
    let mut pipeline = env.pipeline;

    let adapter = Arc::new(BrokenGenerator);
    pipeline.registry_mut().register_classifier(adapter.clone(), None);
    pipeline
        .registry_mut()
        .register_reformulator(adapter.clone(), None);
    pipeline.registry_mut().register_generator(adapter, None);

    let mut req = request_in_session("What is the childcare income limit?", "s-broken");
    req.provider = Some("broken".to_string());
    let err = pipeline.run(req).await.unwrap_err();

    assert!(matches!(err, PipelineError::Generation(_)));
    assert!(err.is_fatal());
    assert!(pipeline.sessions().transcript("s-broken").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reindexing_unchanged_corpus_skips_documents() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus_dir = dir.path().join("docs");
    std::fs::create_dir_all(&corpus_dir)?;
    std::fs::write(corpus_dir.join("eligibility.md"), ELIGIBILITY_DOC)?;

    let config = Config::minimal(dir.path().join("carechat.sqlite"));
    migrate::run_migrations(&config).await?;
    let pool = db::connect(&config.db).await?;
    let embedder = embedding::create_backend(&config.embedding)?;

    let first = corpus::index_directory(&pool, embedder.as_ref(), &config, &corpus_dir).await?;
    assert_eq!(first.indexed, 1);
    assert!(first.chunks > 0);
    assert_eq!(first.embedded, first.chunks);

    let second = corpus::index_directory(&pool, embedder.as_ref(), &config, &corpus_dir).await?;
    assert_eq!(second.indexed, 0);
    assert_eq!(second.unchanged, 1);
    Ok(())
}
