//! Native entry: the same pipeline behind an axum router, used by the dev
//! server binary and the end-to-end tests.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{Method, StatusCode},
    response::Response,
    Router,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ProxyConfig;
use crate::handler::{self, ProxyRequest, ProxyResponse, RequestMethod};
use crate::learn::{self, MemoryLearnStore};
use crate::token::TokenManager;
use crate::upstream::UpstreamClient;

/// Initialize tracing subscriber for native (non-WASM) builds.
/// Uses RUST_LOG env var for filtering (defaults to info).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true))
        .with(filter)
        .init();
}

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<ProxyConfig>,
    tokens: Arc<TokenManager>,
    upstream: Arc<UpstreamClient>,
    learn: Option<Arc<MemoryLearnStore>>,
}

impl AppState {
    /// Wire up the pipeline for a config. Learning gets an in-memory store
    /// when enabled; there is no KV off-platform.
    pub fn new(cfg: ProxyConfig) -> Result<Self, String> {
        let upstream = UpstreamClient::new(&cfg.base_url, &cfg.api_key, &cfg.api_secret)?;
        let learn = cfg.learning_enabled.then(|| Arc::new(MemoryLearnStore::new()));
        Ok(Self {
            cfg: Arc::new(cfg),
            tokens: Arc::new(TokenManager::new()),
            upstream: Arc::new(upstream),
            learn,
        })
    }

    /// The learner store, when learning is enabled.
    pub fn learn_store(&self) -> Option<Arc<MemoryLearnStore>> {
        self.learn.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(handle_any).with_state(state)
}

async fn handle_any(State(state): State<AppState>, req: Request) -> Response {
    let method = if req.method() == Method::GET {
        RequestMethod::Get
    } else if req.method() == Method::OPTIONS {
        RequestMethod::Options
    } else {
        RequestMethod::Other
    };

    let proxy_req = ProxyRequest {
        method,
        path: req.uri().path().to_string(),
        query: req.uri().query().unwrap_or("").to_string(),
        authorization: req
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let ProxyResponse {
        status,
        body,
        observation,
    } = handler::handle_request(
        proxy_req,
        &state.cfg,
        &state.tokens,
        state.upstream.as_ref(),
        state.learn.as_deref(),
    )
    .await;

    if let (Some(obs), Some(store)) = (observation, state.learn.clone()) {
        tokio::spawn(async move {
            learn::observe(store.as_ref(), &obs.entity, &obs.body).await;
        });
    }

    let mut builder = Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", handler::CORS_ALLOW_METHODS)
        .header("Access-Control-Allow-Headers", handler::CORS_ALLOW_HEADERS)
        .header("Access-Control-Max-Age", handler::CORS_MAX_AGE);
    if status != 204 {
        builder = builder.header("Content-Type", "application/json");
    }

    match builder.body(Body::from(body)) {
        Ok(response) => response,
        Err(_) => {
            let mut fallback = Response::new(Body::empty());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        }
    }
}
