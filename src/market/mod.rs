//! External market-data lookup for the high-market-cap exclusion.
//!
//! Market capitalization is sourced from a Blockscout-compatible explorer
//! API; this module never computes it. The classifier treats a missing or
//! failed lookup as "unknown" and proceeds with detection.

use alloy::primitives::Address;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Current market cap in USD, or `None` when the source does not know
    /// the token.
    async fn market_cap_usd(&self, token: Address) -> anyhow::Result<Option<f64>>;
}

/// Explorer token endpoint response (subset of fields we need).
#[derive(Debug, Deserialize)]
struct ExplorerToken {
    #[serde(default)]
    circulating_market_cap: Option<String>,
}

/// Blockscout-style `/api/v2/tokens/{address}` lookup.
pub struct HttpMarketData {
    base_url: String,
    http: Client,
}

impl HttpMarketData {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn market_cap_usd(&self, token: Address) -> anyhow::Result<Option<f64>> {
        let url = format!("{}/api/v2/tokens/{:#x}", self.base_url, token);
        let resp = self.http.get(&url).send().await?;

        if !resp.status().is_success() {
            debug!(token = %token, status = %resp.status(), "market data lookup failed");
            return Ok(None);
        }

        let body: ExplorerToken = resp.json().await?;
        Ok(body
            .circulating_market_cap
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explorer_response_parsing() {
        let body: ExplorerToken =
            serde_json::from_str(r#"{"circulating_market_cap":"250000.5","name":"T"}"#).unwrap();
        assert_eq!(
            body.circulating_market_cap.as_deref().and_then(|s| s.parse::<f64>().ok()),
            Some(250000.5)
        );

        let missing: ExplorerToken = serde_json::from_str(r#"{"name":"T"}"#).unwrap();
        assert!(missing.circulating_market_cap.is_none());
    }
}
