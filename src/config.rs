//! Client configuration
//!
//! Loaded from environment variables or a YAML file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubrequestConfig {
    /// Base URL of the backend, e.g. `https://farm.example.com`
    pub host: String,
    /// Path of the subrequests endpoint
    pub endpoint: String,
    /// Response format requested via `?_format=`
    pub format: String,
    /// Prefix of JSON:API resource routes
    pub api_prefix: String,
    /// Root marker used as the lexical prefix of top-level commands
    pub root_prefix: String,
    /// Static bearer token, if any
    pub bearer_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SubrequestConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".to_string(),
            endpoint: "/subrequests".to_string(),
            format: "json".to_string(),
            api_prefix: "/api".to_string(),
            root_prefix: "$ROOT".to_string(),
            bearer_token: None,
            timeout_secs: 30,
        }
    }
}

impl SubrequestConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Create config from SUBREQUESTS_* env vars, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Self {
            host: var("SUBREQUESTS_HOST").unwrap_or(defaults.host),
            endpoint: var("SUBREQUESTS_ENDPOINT").unwrap_or(defaults.endpoint),
            format: defaults.format,
            api_prefix: var("SUBREQUESTS_API_PREFIX").unwrap_or(defaults.api_prefix),
            root_prefix: defaults.root_prefix,
            bearer_token: var("SUBREQUESTS_TOKEN"),
            timeout_secs: var("SUBREQUESTS_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }

    /// Load config from a YAML file; missing keys take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading subrequest configuration from {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.subrequest_url()?;
        Ok(config)
    }

    /// URL of the one physical call made per batch
    pub fn subrequest_url(&self) -> Result<Url> {
        let base = Url::parse(&self.host)
            .with_context(|| format!("Invalid subrequests host '{}'", self.host))?;
        let mut url = base
            .join(&self.endpoint)
            .with_context(|| format!("Invalid subrequests endpoint '{}'", self.endpoint))?;
        url.query_pairs_mut().append_pair("_format", &self.format);
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
