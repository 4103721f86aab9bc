//! End-to-end tests for the retrieval, reranking and generation pipeline.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    BrokenGenerator, BrokenReranker, LengthReranker, SlowGenerator, TemplateGenerator,
    pipeline_builder, seed,
};
use ragflow::{
    CancellationToken, GenerationConfig, Metadata, Pipeline, PipelineConfig, RagError,
    RerankingConfig, SearchResult, Stage, Usage,
};
use serde_json::json;

const QUERY: &str = "how does rust manage memory";

fn ids(results: &[SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.document.id.as_str()).collect()
}

#[tokio::test]
async fn retrieval_only_returns_empty_text_and_zero_usage() {
    let pipeline = pipeline_builder(3).build().unwrap();
    seed(&pipeline).await;

    let response = pipeline.process(QUERY, Metadata::new()).await.unwrap();

    assert_eq!(response.response_text, "");
    assert_eq!(response.usage, Usage::default());
    assert_eq!(ids(&response.results), vec!["ownership_0", "serde_0", "python_0"]);
    assert!((response.results[0].score - 1.0).abs() < 1e-5);
    assert_eq!(response.metadata["stages"], json!(["retrieval"]));
    assert_eq!(response.metadata["retrieved_count"], 3);
}

#[tokio::test]
async fn full_pipeline_reranks_then_generates() {
    let pipeline = pipeline_builder(3)
        .reranking(RerankingConfig::default(), Arc::new(LengthReranker))
        .generation(
            GenerationConfig::builder().model("template").build().unwrap(),
            Arc::new(TemplateGenerator),
        )
        .build()
        .unwrap();
    seed(&pipeline).await;

    let mut request = Metadata::new();
    request.insert("request_id".to_string(), json!("r-1"));
    let response = pipeline.process(QUERY, request).await.unwrap();

    assert_eq!(response.response_text, format!("{QUERY} (3 documents)"));
    assert_eq!(response.usage.completion_tokens, 4);
    assert!(response.usage.prompt_tokens > 0);
    assert_eq!(ids(&response.results), vec!["ownership_0", "python_0", "serde_0"]);
    assert!(response.results[0].metadata.contains_key("original_score"));
    assert_eq!(response.metadata["stages"], json!(["retrieval", "reranking", "generation"]));
    assert_eq!(response.metadata["model"], "template");
    assert_eq!(response.metadata["documents_used"], 3);
    assert_eq!(response.metadata["request"]["request_id"], "r-1");
}

#[tokio::test]
async fn stage_failure_aborts_with_stage_error() {
    let pipeline = pipeline_builder(3)
        .generation(GenerationConfig::default(), Arc::new(BrokenGenerator))
        .build()
        .unwrap();
    seed(&pipeline).await;

    let err = pipeline.process(QUERY, Metadata::new()).await.unwrap_err();

    assert_eq!(err.failed_stage(), Some(Stage::Generation));
    match err {
        RagError::PipelineStage { source, .. } => {
            assert!(matches!(*source, RagError::FatalProvider { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_collection_is_a_retrieval_failure() {
    let pipeline = pipeline_builder(3).build().unwrap();
    let err = pipeline.process(QUERY, Metadata::new()).await.unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Retrieval));
}

#[tokio::test]
async fn partial_results_survive_generation_failure() {
    let pipeline = pipeline_builder(3)
        .generation(GenerationConfig::default(), Arc::new(BrokenGenerator))
        .allow_partial_results(true)
        .build()
        .unwrap();
    seed(&pipeline).await;

    let response = pipeline.process(QUERY, Metadata::new()).await.unwrap();

    assert_eq!(response.response_text, "");
    assert_eq!(response.results.len(), 3);
    assert!(response.metadata["generation_error"].as_str().unwrap().contains("quota exhausted"));
    assert_eq!(response.metadata["stages"], json!(["retrieval"]));
}

#[tokio::test]
async fn partial_results_fall_back_to_retrieval_order() {
    let pipeline = pipeline_builder(3)
        .reranking(RerankingConfig::default(), Arc::new(BrokenReranker))
        .generation(GenerationConfig::default(), Arc::new(TemplateGenerator))
        .allow_partial_results(true)
        .build()
        .unwrap();
    seed(&pipeline).await;

    let response = pipeline.process(QUERY, Metadata::new()).await.unwrap();

    assert_eq!(ids(&response.results), vec!["ownership_0", "serde_0", "python_0"]);
    assert!(response.metadata.contains_key("reranking_error"));
    assert_eq!(response.metadata["stages"], json!(["retrieval", "generation"]));
    assert!(!response.response_text.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_in_flight_generation() {
    let pipeline = Arc::new(
        pipeline_builder(3)
            .generation(GenerationConfig::default(), Arc::new(SlowGenerator(Duration::from_secs(60))))
            .build()
            .unwrap(),
    );
    seed(&pipeline).await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let err = pipeline.process_with_cancellation(QUERY, Metadata::new(), &token).await.unwrap_err();
    assert!(matches!(err, RagError::Cancelled));
}

#[tokio::test]
async fn cancelled_token_stops_before_retrieval() {
    let pipeline = pipeline_builder(3).build().unwrap();
    seed(&pipeline).await;

    let token = CancellationToken::new();
    token.cancel();
    let err = pipeline.process_with_cancellation(QUERY, Metadata::new(), &token).await.unwrap_err();
    assert!(matches!(err, RagError::Cancelled));
}

#[test]
fn builder_requires_retrieval_inputs() {
    let err = Pipeline::builder().build().err().unwrap();
    assert!(matches!(err, RagError::Configuration(_)));

    let err = Pipeline::builder()
        .embedding_provider(Arc::new(common::KeywordEmbedder::default()))
        .retrieval(Default::default())
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("vector_store"));
}

#[test]
fn configured_stage_needs_a_provider() {
    let config = PipelineConfig::from_json(
        r#"{
            "retrieval": {"collection": "docs", "limit": 4},
            "generation": {"model": "m", "temperature": 0.1, "top_p": 1.0,
                           "max_input_tokens": 512, "max_output_tokens": 64}
        }"#,
    )
    .unwrap();

    let err = pipeline_builder(3).config(config.clone()).build().err().unwrap();
    assert!(err.to_string().contains("generation"));

    let pipeline = pipeline_builder(3)
        .config(config)
        .generation_provider(Arc::new(TemplateGenerator))
        .build()
        .unwrap();
    assert_eq!(pipeline.config().retrieval.limit, 4);
    assert_eq!(pipeline.config().generation.as_ref().unwrap().model, "m");
    assert!(pipeline.reranking().is_none());
}
