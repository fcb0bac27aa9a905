#![allow(dead_code)] // Test helpers appear unused when compiled independently

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::Response,
    routing::post,
    Json, Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use bloxs_proxy::config::ProxyConfig;
use bloxs_proxy::native::{build_router, AppState};
use bloxs_proxy::redact::ForbiddenNames;

pub const SHORT_KEY: &str = "test-short-key";

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);

/// A JWT whose `exp` claim is far in the future, so the proxy caches it.
pub fn far_future_jwt() -> String {
    let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"bloxs-proxy","exp":4102444800}"#);
    format!("eyJhbGciOiJIUzI1NiJ9.{}.c2lnbmF0dXJl", payload)
}

#[derive(Clone)]
struct BloxsState {
    auth_calls: Arc<Mutex<usize>>,
    feed_requests: Arc<Mutex<Vec<String>>>,
    feed_reply: Arc<Mutex<(u16, String)>>,
}

/// In-process stand-in for the Bloxs API: an `/Authorization` endpoint plus a
/// catch-all feed that records every request it receives.
pub struct MockBloxs {
    state: BloxsState,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    pub url: String,
}

impl MockBloxs {
    pub async fn auth_calls(&self) -> usize {
        *self.state.auth_calls.lock().await
    }

    /// Feed requests as path-and-query strings, in arrival order.
    pub async fn feed_requests(&self) -> Vec<String> {
        self.state.feed_requests.lock().await.clone()
    }

    pub async fn set_feed_reply(&self, status: u16, body: &str) {
        *self.state.feed_reply.lock().await = (status, body.to_string());
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Best-effort check for whether binding to loopback is permitted in the
/// current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

pub async fn spawn_mock_bloxs() -> MockBloxs {
    let state = BloxsState {
        auth_calls: Arc::new(Mutex::new(0)),
        feed_requests: Arc::new(Mutex::new(Vec::new())),
        feed_reply: Arc::new(Mutex::new((200, r#"{"value":[]}"#.to_string()))),
    };

    let app = Router::new()
        .route("/Authorization", post(authorize))
        .fallback(feed)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock Bloxs listener");
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock Bloxs server error: {}", err);
        }
    });

    MockBloxs {
        state,
        shutdown_tx,
        handle,
        url: format!("http://{}", addr),
    }
}

async fn authorize(State(state): State<BloxsState>) -> Json<Value> {
    let mut calls = state.auth_calls.lock().await;
    *calls += 1;
    Json(json!({
        "token": far_future_jwt(),
        "expiration": "01/10/2026 16:42:26",
    }))
}

async fn feed(State(state): State<BloxsState>, req: Request) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    state.feed_requests.lock().await.push(path_and_query);

    let (status, body) = state.feed_reply.lock().await.clone();
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .expect("failed to build mock feed response")
}

/// Start the proxy against a mock Bloxs URL, returning its base URL and the
/// wired state (for learner-store inspection).
pub async fn spawn_proxy(bloxs_url: &str, learning: bool) -> (String, AppState) {
    let cfg = ProxyConfig {
        proxy_api_key: SHORT_KEY.to_string(),
        base_url: bloxs_url.to_string(),
        api_key: "test-api-key".to_string(),
        api_secret: "test-api-secret".to_string(),
        learning_enabled: learning,
        forbidden: ForbiddenNames::builtin(),
    };
    let state = AppState::new(cfg).expect("failed to build proxy state");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind proxy listener");
    let addr = listener.local_addr().unwrap();

    let router = build_router(state.clone());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            eprintln!("proxy server error: {}", err);
        }
    });

    (format!("http://{}", addr), state)
}

/// Wait for the proxy to answer its (unauthenticated) CORS preflight.
pub async fn wait_for_ready(client: &reqwest::Client, base_url: &str) {
    poll_until(|| async {
        client
            .request(reqwest::Method::OPTIONS, format!("{}/odatafeed/Units", base_url))
            .send()
            .await
            .ok()
            .map(|_| ())
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for {} to be ready", base_url));
}

/// Poll until `f` yields a value or the attempts run out.
pub async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}
