//! Request pipeline shared by the Worker and native entries.
//!
//! The platform layers translate their request types into [`ProxyRequest`],
//! call [`handle_request`], wrap the result in CORS headers, and schedule the
//! returned learning observation. Everything else happens here, in order:
//! method gate, short-key auth, special endpoints, path normalisation, token
//! acquisition, query sanitisation, guardrails, upstream fetch, error
//! mapping, redaction.

use std::borrow::Cow;

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::catalog;
use crate::config::ProxyConfig;
use crate::learn::{self, LearnStore};
use crate::metadata;
use crate::query;
use crate::redact;
use crate::token::TokenManager;
use crate::upstream::{FeedReply, FeedUpstream};

pub const CORS_ALLOW_METHODS: &str = "GET, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Authorization, Content-Type";
pub const CORS_MAX_AGE: &str = "86400";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Options,
    Other,
}

/// Platform-independent view of the inbound request.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: RequestMethod,
    /// URL path, e.g. `/odatafeed/Units`.
    pub path: String,
    /// Raw query string without the leading `?`; empty when absent.
    pub query: String,
    /// Verbatim `Authorization` header, if present.
    pub authorization: Option<String>,
}

/// A response body the learner should see, scheduled by the platform layer
/// after the client response is dispatched.
#[derive(Debug)]
pub struct Observation {
    pub entity: String,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct ProxyResponse {
    pub status: u16,
    /// JSON body; empty only for 204.
    pub body: Bytes,
    pub observation: Option<Observation>,
}

impl ProxyResponse {
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            body: serde_json::to_vec(value).map(Bytes::from).unwrap_or_default(),
            observation: None,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &json!({ "error": message.into() }))
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: Bytes::new(),
            observation: None,
        }
    }
}

/// Run one request through the proxy pipeline.
#[tracing::instrument(name = "proxy", skip_all, fields(method = ?req.method, path = %req.path))]
pub async fn handle_request<U, L>(
    req: ProxyRequest,
    cfg: &ProxyConfig,
    tokens: &TokenManager,
    upstream: &U,
    learn_store: Option<&L>,
) -> ProxyResponse
where
    U: FeedUpstream + ?Sized,
    L: LearnStore + ?Sized,
{
    match req.method {
        RequestMethod::Options => return ProxyResponse::no_content(),
        RequestMethod::Get => {}
        RequestMethod::Other => return ProxyResponse::error(405, "Method not allowed"),
    }

    // Short-key auth comes before any I/O, upstream auth included.
    let bearer = match req.authorization.as_deref().and_then(bearer_token) {
        Some(b) => b,
        None => return ProxyResponse::error(401, "Missing or invalid Authorization header"),
    };
    if bearer != cfg.proxy_api_key {
        return ProxyResponse::error(401, "Invalid API key");
    }

    if req.path == "/odatafeed/$metadata-summary" {
        return ProxyResponse::json(200, &metadata::summary_document());
    }
    if req.path == "/odatafeed/$learn-summary" {
        return learn_summary_response(&req.query, cfg, learn_store).await;
    }

    let Some((entity, normalised_path)) = normalise_path(&req.path) else {
        return ProxyResponse::error(404, "Not found");
    };

    let jwt = match tokens.acquire(upstream).await {
        Ok(jwt) => jwt,
        Err(e) => {
            warn!(error = %e, "token acquisition failed");
            return ProxyResponse::error(500, format!("Failed to get Bloxs token: {}", e));
        }
    };

    let sanitised = query::sanitise_query(&req.query, entity.as_deref());

    if let Some(name) = entity.as_deref() {
        if catalog::requires_filter(name) && !query::has_filter(&sanitised) {
            debug!(entity = name, "rejecting unfiltered query");
            return ProxyResponse::error(
                400,
                format!(
                    "{} queries require a $filter. Add one (see filterExamples in $metadata-summary) and keep $top at or below {}.",
                    name,
                    catalog::top_cap_for(name)
                ),
            );
        }
    }

    let path_and_query = format!("{}{}", normalised_path, sanitised);
    let reply = match upstream.fetch_feed(&path_and_query, &jwt).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "upstream fetch failed");
            return ProxyResponse::error(502, format!("Failed to fetch from Bloxs: {}", e));
        }
    };

    if !(200..300).contains(&reply.status) {
        return upstream_error_envelope(&reply, entity.as_deref());
    }

    let body = match redact::redact_envelope(&reply.body, &cfg.forbidden) {
        Cow::Borrowed(_) => reply.body.clone(),
        Cow::Owned(bytes) => Bytes::from(bytes),
    };

    let observation = match (&entity, learn_store) {
        (Some(name), Some(_)) if cfg.learning_enabled => Some(Observation {
            entity: name.clone(),
            body: body.clone(),
        }),
        _ => None,
    };

    info!(
        entity = entity.as_deref().unwrap_or("-"),
        bytes = body.len(),
        "request proxied"
    );

    ProxyResponse {
        status: 200,
        body,
        observation,
    }
}

/// Extract the token from a `Bearer <token>` header value.
fn bearer_token(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Split a feed path into its entity (if any) and the path to forward, with
/// the entity segment rewritten to its canonical spelling. `None` means the
/// path is not under `/odatafeed`.
fn normalise_path(path: &str) -> Option<(Option<String>, String)> {
    let rest = path.strip_prefix("/odatafeed")?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return Some((None, "/odatafeed".to_string()));
    }

    let (segment, remainder) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };

    let canonical = if segment.starts_with('$') {
        segment.to_string()
    } else {
        catalog::alias_for(segment)
            .map(str::to_string)
            .unwrap_or_else(|| segment.to_string())
    };

    let entity = if canonical.starts_with('$') {
        None
    } else {
        Some(canonical.clone())
    };
    Some((entity, format!("/odatafeed/{}{}", canonical, remainder)))
}

async fn learn_summary_response<L: LearnStore + ?Sized>(
    query: &str,
    cfg: &ProxyConfig,
    store: Option<&L>,
) -> ProxyResponse {
    if !cfg.learning_enabled {
        return ProxyResponse::error(
            400,
            "Learning is disabled. Set ENABLE_LEARNING=true to activate schema learning.",
        );
    }
    let Some(store) = store else {
        return ProxyResponse::error(
            400,
            "Learning is enabled but no LEARNING_KV namespace is bound.",
        );
    };

    let entity = query::query_param(query, "entity");
    match learn::summary(store, entity.as_deref()).await {
        Ok(doc) => ProxyResponse::json(200, &doc),
        Err(e) => ProxyResponse::error(500, format!("Failed to read learning data: {}", e)),
    }
}

/// Project an upstream error body onto the envelope returned to clients.
fn upstream_error_envelope(reply: &FeedReply, entity: Option<&str>) -> ProxyResponse {
    let raw = String::from_utf8_lossy(&reply.body);
    let message = serde_json::from_slice::<Value>(&reply.body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| raw.trim().to_string());

    let mut envelope = json!({
        "error": message,
        "status": reply.status,
        "entity": entity,
        "suggestion": "Check field names against /odatafeed/$metadata-summary before retrying.",
        "availableFields": catalog::fields_for(entity.unwrap_or("")),
    });

    if let Some(field) = invalid_property_name(&raw) {
        envelope["suggestion"] = json!(format!(
            "The field '{}' does not exist on {}.",
            field,
            entity.unwrap_or("this entity")
        ));
        envelope["invalidField"] = json!(field);
    }

    ProxyResponse::json(reply.status, &envelope)
}

/// Field name from upstream messages shaped like `... property named 'Foo' ...`.
fn invalid_property_name(body: &str) -> Option<String> {
    const MARKER: &str = "property named '";
    let start = body.find(MARKER)? + MARKER.len();
    let len = body[start..].find('\'')?;
    let name = &body[start..start + len];
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
