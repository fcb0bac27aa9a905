use std::rc::Rc;

use time::format_description::well_known::Rfc3339;
use tracing_subscriber::fmt::format::Pretty;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_web::{performance_layer, MakeWebConsoleWriter};
use worker::*;

use crate::config::ProxyConfig;
use crate::handler::{self, ProxyRequest, ProxyResponse, RequestMethod};
use crate::learn::{self, KvLearnStore};
use crate::token::TokenManager;
use crate::upstream::UpstreamClient;

thread_local! {
    /// Process-wide token cache; isolates keep it across requests.
    static TOKEN_MANAGER: Rc<TokenManager> = Rc::new(TokenManager::new());
}

/// Add CORS headers to a response.
fn with_cors(response: Response) -> Result<Response> {
    let headers = Headers::new();
    headers.set("Access-Control-Allow-Origin", "*")?;
    headers.set("Access-Control-Allow-Methods", handler::CORS_ALLOW_METHODS)?;
    headers.set("Access-Control-Allow-Headers", handler::CORS_ALLOW_HEADERS)?;
    headers.set("Access-Control-Max-Age", handler::CORS_MAX_AGE)?;

    // Copy original headers
    for (key, value) in response.headers() {
        if !key.to_lowercase().starts_with("access-control-") {
            headers.set(&key, &value)?;
        }
    }

    Ok(Response::from_body(response.body().clone())?
        .with_status(response.status_code())
        .with_headers(headers))
}

/// Initialize tracing for Cloudflare Workers.
/// Must be called via #[event(start)] to run once on worker initialization.
#[event(start)]
fn init() {
    // JSON formatting layer that writes to the Workers console
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_ansi(false)
        .with_timer(UtcTime::new(Rfc3339))
        .with_writer(MakeWebConsoleWriter::new());

    let perf_layer = performance_layer().with_details_from_fields(Pretty::default());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(perf_layer)
        .init();
}

#[event(fetch)]
pub async fn main(req: Request, env: Env, ctx: Context) -> Result<Response> {
    let cfg = match ProxyConfig::from_worker_env(&env) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "proxy misconfigured");
            let resp = ProxyResponse::error(500, format!("Configuration error: {}", e));
            return with_cors(json_response(resp.status, resp.body.to_vec())?);
        }
    };

    let upstream = match UpstreamClient::new(&cfg.base_url, &cfg.api_key, &cfg.api_secret) {
        Ok(client) => client,
        Err(e) => return with_cors(Response::error(e, 500)?),
    };

    let kv_store = env.kv("LEARNING_KV").ok().map(KvLearnStore::new);
    let tokens = TOKEN_MANAGER.with(Rc::clone);

    let proxy_req = ProxyRequest {
        method: match req.method() {
            Method::Get => RequestMethod::Get,
            Method::Options => RequestMethod::Options,
            _ => RequestMethod::Other,
        },
        path: req.path(),
        query: req.url()?.query().unwrap_or("").to_string(),
        authorization: req.headers().get("Authorization").ok().flatten(),
    };

    let ProxyResponse {
        status,
        body,
        observation,
    } = handler::handle_request(proxy_req, &cfg, &tokens, &upstream, kv_store.as_ref()).await;

    // Learning runs after the response is dispatched; losing it is fine.
    if let (Some(obs), Some(store)) = (observation, kv_store) {
        ctx.wait_until(async move {
            learn::observe(&store, &obs.entity, &obs.body).await;
        });
    }

    let response = if status == 204 {
        Response::empty()?.with_status(204)
    } else {
        json_response(status, body.to_vec())?
    };
    with_cors(response)
}

fn json_response(status: u16, body: Vec<u8>) -> Result<Response> {
    let headers = Headers::new();
    headers.set("Content-Type", "application/json")?;
    Ok(Response::from_bytes(body)?
        .with_status(status)
        .with_headers(headers))
}
