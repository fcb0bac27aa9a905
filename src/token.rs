//! Upstream JWT lifecycle.
//!
//! One cache entry per process. A cached token is reused while more than five
//! minutes of validity remain; otherwise a fresh credential exchange runs.
//! Concurrent refreshes are allowed (last write wins, both tokens are valid),
//! so no single-flight machinery is needed.

use std::sync::Mutex;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tracing::{debug, info};

use crate::clock;
use crate::upstream::{FeedUpstream, FetchError};

/// Remaining validity below which the cached token is refreshed.
pub const REUSE_MARGIN_MS: i64 = 5 * 60 * 1000;

/// Assumed lifetime when the auth reply discloses no usable expiry.
const FALLBACK_TTL_MS: i64 = 55 * 60 * 1000;

#[derive(Debug, Clone)]
struct TokenCacheEntry {
    jwt: String,
    expires_at_ms: i64,
}

#[derive(Debug)]
pub enum TokenError {
    /// The auth endpoint answered with a non-2xx status.
    Auth(u16),
    Transport(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Auth(status) => write!(f, "Bloxs auth failed: {}", status),
            TokenError::Transport(msg) => write!(f, "{}", msg),
        }
    }
}

/// Sole writer of the process-wide token cache.
pub struct TokenManager {
    cache: Mutex<Option<TokenCacheEntry>>,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
        }
    }

    /// Return a JWT with at least [`REUSE_MARGIN_MS`] of validity left,
    /// exchanging credentials with the upstream when the cache cannot serve.
    pub async fn acquire<U: FeedUpstream + ?Sized>(&self, upstream: &U) -> Result<String, TokenError> {
        let now = clock::now_ms();
        if let Some(jwt) = self.cached(now) {
            debug!("reusing cached Bloxs token");
            return Ok(jwt);
        }

        let reply = upstream.authorize().await.map_err(|e| match e {
            FetchError::Http { status, .. } => TokenError::Auth(status),
            FetchError::Network(msg) => TokenError::Transport(msg),
        })?;

        let expires_at_ms = token_expiry_ms(&reply.token, reply.expiration.as_deref(), now);
        info!(
            valid_for_s = (expires_at_ms - now) / 1000,
            "obtained fresh Bloxs token"
        );

        let mut guard = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(TokenCacheEntry {
            jwt: reply.token.clone(),
            expires_at_ms,
        });
        Ok(reply.token)
    }

    fn cached(&self, now_ms: i64) -> Option<String> {
        let guard = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .as_ref()
            .filter(|entry| entry.expires_at_ms - now_ms > REUSE_MARGIN_MS)
            .map(|entry| entry.jwt.clone())
    }
}

/// Expiry resolution, in order: JWT `exp` claim, the reply's `expiration`
/// string, a fixed 55-minute fallback.
fn token_expiry_ms(token: &str, expiration: Option<&str>, now_ms: i64) -> i64 {
    if let Some(ms) = jwt_exp_ms(token) {
        return ms;
    }
    if let Some(ms) = expiration.and_then(parse_expiration_ms) {
        return ms;
    }
    now_ms + FALLBACK_TTL_MS
}

/// `exp` claim (in ms) of a three-part JWT, when the payload segment
/// base64url-decodes to JSON with a numeric `exp`.
fn jwt_exp_ms(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let header = parts.next()?;
    let payload = parts.next()?;
    let signature = parts.next()?;
    if header.is_empty() || signature.is_empty() || parts.next().is_some() {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_f64()?;
    Some((exp * 1000.0) as i64)
}

/// Parse `D/M/YYYY[ H:M[:S]]` as UTC. When day-first yields an impossible
/// calendar date the components are retried month-first.
fn parse_expiration_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (date_part, time_part) = match raw.split_once(' ') {
        Some((d, t)) => (d, Some(t.trim())),
        None => (raw, None),
    };

    let mut numbers = date_part.split('/');
    let first: u32 = numbers.next()?.trim().parse().ok()?;
    let second: u32 = numbers.next()?.trim().parse().ok()?;
    let year: i32 = numbers.next()?.trim().parse().ok()?;
    if numbers.next().is_some() {
        return None;
    }

    let date = chrono::NaiveDate::from_ymd_opt(year, second, first)
        .or_else(|| chrono::NaiveDate::from_ymd_opt(year, first, second))?;

    let (hour, minute, second) = match time_part {
        Some(t) if !t.is_empty() => {
            let mut clock = t.split(':');
            let h: u32 = clock.next()?.trim().parse().ok()?;
            let m: u32 = clock.next()?.trim().parse().ok()?;
            let s: u32 = match clock.next() {
                Some(x) => x.trim().parse().ok()?,
                None => 0,
            };
            if clock.next().is_some() {
                return None;
            }
            (h, m, s)
        }
        _ => (0, 0, 0),
    };

    let timestamp = date.and_hms_opt(hour, minute, second)?;
    Some(timestamp.and_utc().timestamp_millis())
}
