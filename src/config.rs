//! Environment-derived proxy configuration.

use crate::redact::ForbiddenNames;

/// Everything the request pipeline needs to know about its deployment.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Short key clients present as `Authorization: Bearer <key>`.
    pub proxy_api_key: String,
    /// Base URL of the Bloxs API, no trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub learning_enabled: bool,
    pub forbidden: ForbiddenNames,
}

/// Truthy values for `ENABLE_LEARNING`.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

impl ProxyConfig {
    /// Build from Cloudflare Worker bindings. Credentials are secrets, the
    /// rest plain vars.
    #[cfg(target_arch = "wasm32")]
    pub fn from_worker_env(env: &worker::Env) -> worker::Result<Self> {
        Ok(Self {
            proxy_api_key: env.secret("PROXY_API_KEY")?.to_string(),
            base_url: env.var("BLOXS_BASE_URL")?.to_string(),
            api_key: env.secret("BLOXS_API_KEY")?.to_string(),
            api_secret: env.secret("BLOXS_API_SECRET")?.to_string(),
            learning_enabled: env
                .var("ENABLE_LEARNING")
                .map(|v| parse_flag(&v.to_string()))
                .unwrap_or(false),
            forbidden: ForbiddenNames::builtin(),
        })
    }

    /// Build from process environment variables (native dev server).
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let required = |name: &str| {
            std::env::var(name).with_context(|| format!("{} is not set", name))
        };

        Ok(Self {
            proxy_api_key: required("PROXY_API_KEY")?,
            base_url: required("BLOXS_BASE_URL")?,
            api_key: required("BLOXS_API_KEY")?,
            api_secret: required("BLOXS_API_SECRET")?,
            learning_enabled: std::env::var("ENABLE_LEARNING")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            forbidden: ForbiddenNames::builtin(),
        })
    }
}
