// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Host Capability Detection
//!
//! Hosts advertise optional features through `GET /v1/version`. Older
//! hosts predate the endpoint entirely, so a missing or failing probe
//! degrades to "no optional capabilities" rather than an error.

use serde::Deserialize;
use tracing::debug;

use crate::error::Result;

/// Feature tokens for web-search support.
pub const WEB_SEARCH_FEATURES: &[&str] = &[
    "host-side-web-search",
    "inference-web-search",
    "streaming-web-search",
    "websocket-web-search",
];

/// Provider hints a host may advertise alongside search support.
pub const SEARCH_PROVIDER_HINTS: &[&str] = &[
    "brave-search-api",
    "duckduckgo-fallback",
    "bing-search-api",
];

/// Parsed `/v1/version` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostCapabilities {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub features: Vec<String>,
}

impl HostCapabilities {
    pub fn has_feature(&self, token: &str) -> bool {
        self.features.iter().any(|f| f == token)
    }

    /// True when the host supports any web-search mode.
    pub fn supports_web_search(&self) -> bool {
        WEB_SEARCH_FEATURES.iter().any(|t| self.has_feature(t))
    }

    /// Advertised search providers, in the host's declared order.
    pub fn search_providers(&self) -> Vec<&str> {
        self.features
            .iter()
            .map(String::as_str)
            .filter(|f| SEARCH_PROVIDER_HINTS.contains(f))
            .collect()
    }
}

/// Probe a host's capabilities. Never fails on older hosts: any probe
/// error yields the empty capability set.
pub async fn fetch_capabilities(
    http: &reqwest::Client,
    api_url: &str,
) -> Result<HostCapabilities> {
    let url = format!("{}/v1/version", api_url.trim_end_matches('/'));
    match http.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            match response.json::<HostCapabilities>().await {
                Ok(caps) => Ok(caps),
                Err(e) => {
                    debug!("Malformed /v1/version payload, assuming no capabilities: {}", e);
                    Ok(HostCapabilities::default())
                }
            }
        }
        Ok(response) => {
            debug!(
                "/v1/version returned {}, assuming no capabilities",
                response.status()
            );
            Ok(HostCapabilities::default())
        }
        Err(e) => {
            debug!("/v1/version probe failed, assuming no capabilities: {}", e);
            Ok(HostCapabilities::default())
        }
    }
}
