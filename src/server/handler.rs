use crate::client::SourceName;
use crate::llm::SynthesisOptions;
use crate::services::{
    AccessDecision, AccessGate, DepthRequest, DepthTier, ResearchOrchestrator, ResearchPayload,
    ResearchRequest,
};
use crate::{Config, Error};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Header carrying a caller's own LLM key
pub const API_KEY_HEADER: &str = "x-user-api-key";

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    PaymentRequired(Value),
    Internal(Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            Self::PaymentRequired(body) => (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response(),
            Self::Internal(e) => {
                error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidInput { reason, .. } => Self::BadRequest(reason),
            other => Self::Internal(other),
        }
    }
}

impl From<AccessDecision> for AppError {
    fn from(decision: AccessDecision) -> Self {
        let body = match decision {
            AccessDecision::QuotaExceeded { remaining, reset_in } => json!({
                "error": "Free quota exceeded",
                "remaining": remaining,
                "reset_in": reset_in,
            }),
            AccessDecision::DepthDenied { allowed_up_to } => json!({
                "error": "Requested depth requires an API key",
                "allowed_up_to": allowed_up_to,
            }),
            AccessDecision::ApiKeyRequired => json!({ "error": "API key required" }),
            AccessDecision::Allowed { .. } => json!({ "error": "Access denied" }),
        };
        Self::PaymentRequired(body)
    }
}

/// Address the request is attributed to for quota purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ResearchOrchestrator>,
    pub access: Arc<AccessGate>,
    trusted_proxies: Arc<Vec<IpNetwork>>,
    default_max_results: u32,
}

impl AppState {
    #[must_use]
    pub fn new(
        orchestrator: Arc<ResearchOrchestrator>,
        access: Arc<AccessGate>,
        trusted_proxies: Vec<IpNetwork>,
    ) -> Self {
        let default_max_results = orchestrator.research_config().default_max_results;
        Self {
            orchestrator,
            access,
            trusted_proxies: Arc::new(trusted_proxies),
            default_max_results,
        }
    }

    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let orchestrator = Arc::new(ResearchOrchestrator::from_config(config)?);
        let access = Arc::new(AccessGate::from_config(&config.quota, &config.depth));
        let trusted_proxies = config
            .server
            .trusted_proxies
            .iter()
            .filter_map(|s| IpNetwork::from_str(s).ok())
            .collect();
        Ok(Self::new(orchestrator, access, trusted_proxies))
    }
}

const UNKNOWN_PEER: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Peer address, or the first `X-Forwarded-For` hop when the peer is a trusted proxy.
///
/// Without connect info the request is attributed to the unspecified address,
/// which is not loopback and shares one quota bucket.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted_proxies: &[IpNetwork]) -> IpAddr {
    let Some(peer_ip) = peer else {
        return UNKNOWN_PEER;
    };

    if trusted_proxies.iter().any(|cidr| cidr.contains(peer_ip)) {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|xff| xff.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok())
        {
            return forwarded;
        }
    }
    peer_ip
}

async fn resolve_client_ip(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip());
    let ip = client_ip(req.headers(), peer, &state.trusted_proxies);
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

pub fn build_router(state: AppState, body_limit_kb: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/limits", get(limits))
        .route("/research", post(research))
        .route("/collect", post(collect))
        .route("/synthesize", post(synthesize))
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_client_ip))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit_kb * 1024))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    build: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        build: env!("VERGEN_BUILD_TIMESTAMP"),
    })
}

#[derive(Serialize)]
struct Limits {
    allowed_depths: Vec<DepthTier>,
    per_source_caps: BTreeMap<DepthTier, u32>,
    require_api_key: bool,
}

async fn limits(State(state): State<AppState>) -> impl IntoResponse {
    let depth = state.access.depth();
    Json(Limits {
        allowed_depths: depth.allowed_depths(),
        per_source_caps: depth.caps(),
        require_api_key: state.access.requires_api_key(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ResearchBody {
    query: Option<String>,
    max_results: Option<u32>,
    depth: Option<String>,
    model: Option<String>,
    reasoning_effort: Option<String>,
    verbosity: Option<String>,
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!("Rejecting request body: {}", e);
        AppError::BadRequest("Invalid JSON".to_string())
    })
}

fn api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// Validate the body and run it through the access gate
fn admit(
    state: &AppState,
    ip: IpAddr,
    headers: &HeaderMap,
    body: ResearchBody,
) -> Result<(ResearchRequest, DepthRequest), AppError> {
    let query = body
        .query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::BadRequest("No query provided".to_string()))?;

    let depth = body.depth.as_deref().and_then(|d| match DepthTier::from_str(d) {
        Ok(tier) => Some(tier),
        Err(e) => {
            warn!("Ignoring requested depth: {}", e);
            None
        }
    });
    let depth = DepthRequest::resolve(
        depth,
        body.max_results,
        state.default_max_results,
        state.access.depth(),
    );

    let key = api_key(headers);
    let decision = state.access.authorize(ip, key.as_deref(), depth.tier);
    if !decision.is_allowed() {
        info!("Rejected request from {}: {:?}", ip, decision);
        return Err(decision.into());
    }

    Ok((
        ResearchRequest {
            query,
            max_results: depth.max_results,
            synthesis: SynthesisOptions {
                model: body.model,
                reasoning_effort: body.reasoning_effort,
                verbosity: body.verbosity,
                api_key: key,
            },
        },
        depth,
    ))
}

async fn research(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResearchPayload>, AppError> {
    let (request, depth) = admit(&state, ip, &headers, parse_json(&body)?)?;
    info!("Research request at depth {} ({} per source)", depth.tier, depth.max_results);
    let payload = state.orchestrator.run(&request).await?;
    Ok(Json(payload))
}

async fn collect(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResearchPayload>, AppError> {
    let (request, _) = admit(&state, ip, &headers, parse_json(&body)?)?;
    let payload = state
        .orchestrator
        .collect(&request.query, request.max_results)
        .await?;
    Ok(Json(payload))
}

#[derive(Debug, Default, Deserialize)]
struct SynthesizeBody {
    raw_results: Option<Value>,
    query: Option<String>,
    optimized_query: Option<Value>,
    model: Option<String>,
    reasoning_effort: Option<String>,
    verbosity: Option<String>,
}

async fn synthesize(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let body: SynthesizeBody = parse_json(&body)?;

    let Some(Value::Object(entries)) = body.raw_results else {
        return Err(AppError::BadRequest("raw_results must be provided".to_string()));
    };
    let raw_results: BTreeMap<SourceName, String> = entries
        .into_iter()
        .filter_map(|(key, value)| {
            let source = SourceName::from_str(&key).ok()?;
            value.as_str().map(|text| (source, text.to_string()))
        })
        .collect();

    let query = body
        .query
        .filter(|q| !q.trim().is_empty())
        .or_else(|| {
            let keywords = body.optimized_query.as_ref()?.get("keywords")?.as_array()?;
            Some(
                keywords
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        })
        .unwrap_or_default();

    let options = SynthesisOptions {
        model: body.model,
        reasoning_effort: body.reasoning_effort,
        verbosity: body.verbosity,
        api_key: api_key(&headers),
    };

    let synthesis = match state
        .orchestrator
        .synthesize_provided(&query, &raw_results, &options)
        .await
    {
        Ok(text) => text,
        Err(e @ Error::InvalidInput { .. }) => return Err(e.into()),
        Err(e) => {
            warn!("Synthesis failed: {}", e);
            format!("Synthesis unavailable: {e}")
        }
    };

    Ok(Json(json!({ "synthesis": synthesis })))
}
