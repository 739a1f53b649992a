//! Black-box integration tests: drive the pipeline's outbound-call
//! components and the HTTP API surface against a mocked backend fleet
//! (`wiremock`) instead of real layout/vision/embedding services.
//!
//! These exercise scenarios 2, 3, 5, and 6 from the end-to-end scenario list
//! at the layer that doesn't require an actual PDF or a running LLM
//! provider: the layout-engine fallback chain, the embeddings call, and the
//! HTTP surface's envelope shapes. Scenarios 1 and 4 (full PDF ingest, live
//! structured extraction) need a real PDF fixture and a configured LLM
//! provider and are exercised instead by the unit tests colocated with
//! `decode.rs` and `extract.rs`.

use docforge::config::PipelineConfig;
use docforge::context::Context;
use docforge::orchestrator::Orchestrator;
use docforge::registry::{BackendRegistry, Capability};
use docforge::server::create_router;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt as _;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn layout_response_body() -> serde_json::Value {
    json!({
        "pages": [{
            "page_number": 1,
            "text": "Scanned page recovered by OCR fallback. ".repeat(20),
            "detections": []
        }],
        "embedded_images": [],
        "formula_count": 0,
        "table_count": 0,
    })
}

/// Scenario 2: primary layout engine returns HTTP 500, orchestrator falls
/// back to the next engine in the strategy plan and still succeeds.
#[tokio::test]
async fn layout_extract_falls_back_past_a_failing_engine() {
    let server = MockServer::start().await;
    // Lower priority value wins when both mocks match the same request;
    // the failing stub is exhausted after one hit and falls through to
    // the success stub for every request after that.
    Mock::given(method("POST"))
        .and(path("/extract"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/extract"))
        .respond_with(ResponseTemplate::new(200).set_body_json(layout_response_body()))
        .with_priority(2)
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let registry = Arc::new(BackendRegistry::new(http.clone(), Duration::from_secs(2)));
    registry.register("layout", server.uri(), Capability::LayoutExtraction).await;

    let plan = docforge::decode::classify_non_pdf("application/octet-stream").1;
    let out = docforge::pipeline::layout::extract(
        &http,
        &registry,
        &plan,
        b"irrelevant bytes",
        "scan.pdf",
        docforge::model::InputClass::ScannedPdf,
        "cpu",
        "en",
        Duration::from_secs(5),
    )
    .await
    .expect("fallback engine should have succeeded");

    assert!(out.document.markdown.len() > 500, "expected >500 chars of fallback markdown");
}

/// All engines in the plan fail -> fatal `BackendUnavailable`.
#[tokio::test]
async fn layout_extract_is_unavailable_when_every_engine_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/extract")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

    let http = reqwest::Client::new();
    let registry = Arc::new(BackendRegistry::new(http.clone(), Duration::from_secs(2)));
    registry.register("layout", server.uri(), Capability::LayoutExtraction).await;

    let plan = docforge::decode::classify_non_pdf("application/pdf").1;
    let err = docforge::pipeline::layout::extract(
        &http,
        &registry,
        &plan,
        b"bytes",
        "doc.pdf",
        docforge::model::InputClass::TextPdf,
        "cpu",
        "en",
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();

    assert_eq!(err.tag(), "backend_unavailable");
}

/// Embeddings backend returns a vector of the expected dimension.
#[tokio::test]
async fn embed_returns_vector_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.1, 0.2, 0.3]})))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let registry = Arc::new(BackendRegistry::new(http.clone(), Duration::from_secs(2)));
    registry.register("embeddings", server.uri(), Capability::Embeddings).await;

    let outcome = docforge::pipeline::embed::embed(&http, &registry, "nomic-embed-text", "hello world", Some(3), Duration::from_secs(5)).await;

    assert!(outcome.generated);
    assert_eq!(outcome.vector, Some(vec![0.1, 0.2, 0.3]));
}

/// A dimension mismatch against the expected size is non-fatal: the
/// artifact simply gets no embedding.
#[tokio::test]
async fn embed_dimension_mismatch_yields_no_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.1, 0.2]})))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let registry = Arc::new(BackendRegistry::new(http.clone(), Duration::from_secs(2)));
    registry.register("embeddings", server.uri(), Capability::Embeddings).await;

    let outcome = docforge::pipeline::embed::embed(&http, &registry, "nomic-embed-text", "hello world", Some(768), Duration::from_secs(5)).await;

    assert!(!outcome.generated);
    assert!(outcome.vector.is_none());
}

/// No embeddings backend registered at all: `embed` degrades gracefully
/// rather than panicking or blocking.
#[tokio::test]
async fn embed_with_no_backend_registered_degrades_gracefully() {
    let http = reqwest::Client::new();
    let registry = Arc::new(BackendRegistry::new(http.clone(), Duration::from_secs(2)));

    let outcome = docforge::pipeline::embed::embed(&http, &registry, "nomic-embed-text", "text", None, Duration::from_secs(5)).await;

    assert!(!outcome.generated);
    assert!(outcome.vector.is_none());
}

async fn test_orchestrator() -> (Arc<Orchestrator>, tempfile::TempDir) {
    let blob_dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::builder()
        .blob_store_dir(blob_dir.path().to_path_buf())
        .templates_dir(std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/templates"))
        .build()
        .unwrap();
    let ctx = Context::build(config).await.expect("context should build without any registered backends");
    (Arc::new(Orchestrator::new(ctx)), blob_dir)
}

/// `GET /health` reports a fixed, stable shape.
#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (orchestrator, _dir) = test_orchestrator().await;
    let app = create_router(orchestrator);

    let response = app
        .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

/// The shipped `medical_research` template loads and is retrievable by id.
#[tokio::test]
async fn medical_research_template_is_loaded_and_retrievable() {
    let (orchestrator, _dir) = test_orchestrator().await;
    assert!(orchestrator.templates().get("medical_research").is_some());

    let app = create_router(orchestrator);
    let response = app
        .oneshot(axum::http::Request::builder().uri("/templates/medical_research").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

/// Requesting an unknown template id is a 404, not a panic.
#[tokio::test]
async fn unknown_template_id_is_not_found() {
    let (orchestrator, _dir) = test_orchestrator().await;
    let app = create_router(orchestrator);

    let response = app
        .oneshot(axum::http::Request::builder().uri("/templates/does-not-exist").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}

/// Scenario 5 at the orchestrator layer: requesting structured extraction
/// under an alias whose credentials are absent from the environment is
/// rejected before any network call.
#[tokio::test]
async fn extract_structured_rejects_unconfigured_provider() {
    std::env::remove_var("ANTHROPIC_API_KEY");
    let (orchestrator, _dir) = test_orchestrator().await;

    let result = orchestrator
        .extract_text(
            "some document text",
            Some("medical_research".to_string()),
            Vec::new(),
            "cloud_b",
            None,
            docforge::extract::ExtractionOverrides::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(result.tag(), "provider_not_configured");
}

/// Scenario 5 at the HTTP layer: `POST /extract-structured` reports an
/// unconfigured provider on the result envelope (HTTP 200,
/// `success=false`), not as an error response.
#[tokio::test]
async fn extract_structured_reports_unconfigured_provider_on_envelope() {
    std::env::remove_var("ANTHROPIC_API_KEY");
    let (orchestrator, _dir) = test_orchestrator().await;
    let app = create_router(orchestrator);

    let body = json!({
        "text": "some document text",
        "template_id": "medical_research",
        "provider": "cloud_b",
    });
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/extract-structured")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(envelope["success"], false);
    assert_eq!(envelope["error"], "ProviderNotConfigured");
    assert_eq!(envelope["provider"], "cloud_b");
}

/// `GET /providers` reflects the environment: `local` is always
/// configured, `cloud_a`/`cloud_b` only when their API keys are set.
#[tokio::test]
async fn providers_endpoint_reflects_environment() {
    std::env::remove_var("OPENAI_API_KEY");
    let (orchestrator, _dir) = test_orchestrator().await;
    let app = create_router(orchestrator);

    let response = app
        .oneshot(axum::http::Request::builder().uri("/providers").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let providers: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    let local = providers.iter().find(|p| p["alias"] == "local").unwrap();
    assert_eq!(local["configured"], true);
    let cloud_a = providers.iter().find(|p| p["alias"] == "cloud_a").unwrap();
    assert_eq!(cloud_a["configured"], false);
}
