use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_research_orchestrator::client::providers::{ProviderError, ProviderMap, SourceProvider};
use rust_research_orchestrator::client::{PaperRecord, SourceName};
use rust_research_orchestrator::config::{BudgetConfig, DepthConfig, ResearchConfig};
use rust_research_orchestrator::llm::{SynthesisOptions, Synthesizer};
use rust_research_orchestrator::server::{build_router, AppState, API_KEY_HEADER};
use rust_research_orchestrator::services::AccessPolicy;
use rust_research_orchestrator::{AccessGate, QuotaGate, RankingPolicy, ResearchOrchestrator};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot`

struct OnePaper(SourceName);

#[async_trait]
impl SourceProvider for OnePaper {
    fn name(&self) -> SourceName {
        self.0
    }

    fn error_prefix(&self) -> &'static str {
        "Error fetching from test source"
    }

    async fn search(&self, _query: &str, _max: u32) -> Result<Vec<PaperRecord>, ProviderError> {
        Ok(vec![PaperRecord::new(
            Some(format!("{} paper on graph learning", self.0.display_name())),
            Some("2025".to_string()),
            &["Test Author".to_string()],
            Some("Abstract.".to_string()),
            Some(format!("https://{}.example/1", self.0)),
        )])
    }
}

/// Synthesizer that records the key it was handed
#[derive(Default)]
struct KeyEcho {
    keys: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl Synthesizer for KeyEcho {
    async fn synthesize(
        &self,
        _prompt: &str,
        options: &SynthesisOptions,
    ) -> rust_research_orchestrator::Result<String> {
        self.keys.lock().unwrap().push(options.api_key.clone());
        Ok("Cited synthesis.".to_string())
    }
}

fn app_with(policy: AccessPolicy, free_limit: i64, synthesizer: Arc<KeyEcho>) -> Router {
    let mut providers: ProviderMap = BTreeMap::new();
    for source in SourceName::ALL {
        providers.insert(source, Arc::new(OnePaper(source)));
    }
    let orchestrator = ResearchOrchestrator::new(
        providers,
        ResearchConfig::default(),
        BudgetConfig::default(),
        RankingPolicy::PerSource,
    )
    .with_synthesizer(synthesizer);

    let access = AccessGate::new(
        policy,
        DepthConfig::default(),
        QuotaGate::new(free_limit, Duration::from_secs(3600)),
    );
    let state = AppState::new(Arc::new(orchestrator), Arc::new(access), Vec::new());
    build_router(state, 256)
}

fn app() -> Router {
    app_with(AccessPolicy::default(), 2, Arc::new(KeyEcho::default()))
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_from(peer: [u8; 4], uri: &str, body: &str) -> Request<Body> {
    let mut request = post(uri, body);
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
    request
}

/// POST attributed to a public, non-bypassed address
fn post_from_public(uri: &str, body: &str) -> Request<Body> {
    post_from([203, 0, 113, 7], uri, body)
}

fn post_from_loopback(uri: &str, body: &str) -> Request<Body> {
    post_from([127, 0, 0, 1], uri, body)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn limits_endpoint_lists_tiers() {
    let response = app()
        .oneshot(Request::builder().uri("/limits").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["allowed_depths"], json!(["low", "med"]));
    assert_eq!(body["per_source_caps"], json!({"low": 3, "med": 5, "high": 10}));
    assert_eq!(body["require_api_key"], false);
}

#[tokio::test]
async fn invalid_json_is_rejected() {
    let response = app().oneshot(post("/research", "{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await, json!({"error": "Invalid JSON"}));
}

#[tokio::test]
async fn missing_query_is_rejected() {
    let response = app()
        .oneshot(post("/collect", r#"{"query": "   "}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await, json!({"error": "No query provided"}));
}

#[tokio::test]
async fn loopback_research_returns_payload_and_synthesis() {
    let response = app()
        .oneshot(post_from_loopback(
            "/research",
            r#"{"query": "graph neural networks for materials", "depth": "high"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["synthesis"], "Cited synthesis.");
    assert_eq!(body["summary"]["total"], 3);
    assert_eq!(body["used_sources"], json!(["arxiv", "pubmed", "openalex"]));
    assert!(body["raw_results"]["arxiv"]
        .as_str()
        .unwrap()
        .starts_with("arXiv paper on graph learning (2025)"));
    assert_eq!(body["optimization"]["method"], "fallback");
}

#[tokio::test]
async fn missing_connect_info_is_limited_like_a_public_client() {
    let app = app_with(AccessPolicy::default(), 1, Arc::new(KeyEcho::default()));

    let response = app
        .clone()
        .oneshot(post("/collect", r#"{"query": "graphs", "depth": "high"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json_body(response).await["allowed_up_to"], "med");

    let low = r#"{"query": "graphs", "depth": "low"}"#;
    let response = app.clone().oneshot(post("/collect", low)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(post("/collect", low)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json_body(response).await["error"], "Free quota exceeded");
}

#[tokio::test]
async fn public_client_cannot_exceed_default_depth() {
    let response = app()
        .oneshot(post_from_public(
            "/collect",
            r#"{"query": "graph learning", "depth": "high"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = json_body(response).await;
    assert_eq!(body["allowed_up_to"], "med");
}

#[tokio::test]
async fn public_client_large_max_results_maps_to_high_tier() {
    let response = app()
        .oneshot(post_from_public(
            "/collect",
            r#"{"query": "graph learning", "max_results": 8}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn quota_exhaustion_returns_payment_required() {
    let app = app();
    let body = r#"{"query": "graph learning", "depth": "low"}"#;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_from_public("/collect", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(post_from_public("/collect", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let denial = json_body(response).await;
    assert_eq!(denial["error"], "Free quota exceeded");
    assert_eq!(denial["remaining"], 0);
    assert!(denial["reset_in"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn api_key_bypasses_limits_and_reaches_synthesizer() {
    let synthesizer = Arc::new(KeyEcho::default());
    let app = app_with(AccessPolicy::default(), 1, synthesizer.clone());

    for _ in 0..3 {
        let mut request = post_from_public(
            "/research",
            r#"{"query": "graph learning", "depth": "high"}"#,
        );
        request
            .headers_mut()
            .insert(API_KEY_HEADER, "sk-user-key".parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let keys = synthesizer.keys.lock().unwrap();
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| k.as_deref() == Some("sk-user-key")));
}

#[tokio::test]
async fn require_api_key_rejects_anonymous_clients() {
    let policy = AccessPolicy {
        require_api_key: true,
        ..AccessPolicy::default()
    };
    let app = app_with(policy, 10, Arc::new(KeyEcho::default()));

    let response = app
        .oneshot(post_from_public("/collect", r#"{"query": "graph learning"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json_body(response).await["error"], "API key required");
}

#[tokio::test]
async fn synthesize_requires_usable_raw_results() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post("/synthesize", r#"{"query": "x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(post(
            "/synthesize",
            r#"{"query": "x", "raw_results": {"arxiv": "No results", "pubmed": "No papers found."}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn synthesize_uses_optimized_keywords_when_query_missing() {
    let response = app()
        .oneshot(post(
            "/synthesize",
            r#"{
                "raw_results": {"openalex": "A paper (2024) by A\nAbstract: x\nURL: https://a.example"},
                "optimized_query": {"keywords": ["graph", "materials"]}
            }"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"synthesis": "Cited synthesis."}));
}
