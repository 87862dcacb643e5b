use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{LibraryError, Result};

/// JSON-RPC over HTTP POST, shared by the daemon control endpoint and the
/// remote metadata proxy.
#[derive(Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<Value>,
}

impl RpcClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "method": method, "params": params }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LibraryError::Http(format!(
                "HTTP {} from {method}: {}",
                status.as_u16(),
                text
            )));
        }

        let envelope: RpcEnvelope<T> = response.json().await?;
        if let Some(error) = envelope.error {
            return Err(LibraryError::Http(format!("{method} returned error: {error}")));
        }
        envelope
            .result
            .ok_or_else(|| LibraryError::Http(format!("{method} returned no result")))
    }
}

/// `status` result of the local daemon.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct DaemonStatus {
    pub wallet: Option<WalletStatus>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct WalletStatus {
    pub blocks_behind: Option<Value>,
}

impl DaemonStatus {
    /// `None` when the lag field is absent or not a number.
    pub fn blocks_behind(&self) -> Option<u64> {
        self.wallet
            .as_ref()
            .and_then(|wallet| wallet.blocks_behind.as_ref())
            .and_then(parse_u64_value)
    }
}

/// A claim as returned by `resolve` or inside a `claim_search` page.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ResolvedClaim {
    pub claim_id: Option<String>,
    pub permanent_url: Option<String>,
    pub canonical_url: Option<String>,
    pub value: ClaimValue,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ClaimValue {
    pub title: Option<String>,
    pub description: Option<String>,
    pub release_time: Option<Value>,
    pub source: Option<ClaimSource>,
    pub thumbnail: Option<Thumbnail>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ClaimSource {
    pub size: Option<Value>,
    pub media_type: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Thumbnail {
    pub url: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ClaimSearchPage {
    pub items: Vec<ResolvedClaim>,
}

pub type ResolveResult = HashMap<String, ResolvedClaim>;

impl ClaimValue {
    pub fn size(&self) -> u64 {
        self.source
            .as_ref()
            .and_then(|source| source.size.as_ref())
            .and_then(parse_u64_value)
            .unwrap_or(0)
    }

    pub fn release_time(&self) -> Option<i64> {
        match self.release_time.as_ref()? {
            Value::Number(number) => number.as_i64(),
            Value::String(raw) => raw.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

/// Numbers arrive either as JSON numbers or as decimal strings.
pub fn parse_u64_value(value: &Value) -> Option<u64> {
    if let Some(number) = value.as_u64() {
        return Some(number);
    }
    value.as_str().and_then(|raw| raw.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lag_accepts_numbers_and_strings() {
        let numeric: DaemonStatus =
            serde_json::from_value(json!({ "wallet": { "blocks_behind": 12 } })).unwrap();
        assert_eq!(numeric.blocks_behind(), Some(12));

        let text: DaemonStatus =
            serde_json::from_value(json!({ "wallet": { "blocks_behind": "0" } })).unwrap();
        assert_eq!(text.blocks_behind(), Some(0));

        let missing: DaemonStatus =
            serde_json::from_value(json!({ "wallet": null, "is_running": true })).unwrap();
        assert_eq!(missing.blocks_behind(), None);
    }

    #[test]
    fn resolved_claims_tolerate_error_entries() {
        let result: ResolveResult = serde_json::from_value(json!({
            "lbry://@dev#a/game#1": {
                "claim_id": "abc",
                "canonical_url": "lbry://@dev#a/game#1",
                "value": {
                    "title": "Game",
                    "release_time": "1672531200",
                    "source": { "size": "2048", "name": "game.zip", "media_type": "application/zip" }
                }
            },
            "lbry://@missing/thing": { "error": { "name": "NOT_FOUND" } }
        }))
        .unwrap();

        let found = &result["lbry://@dev#a/game#1"];
        assert_eq!(found.claim_id.as_deref(), Some("abc"));
        assert_eq!(found.value.size(), 2048);
        assert_eq!(found.value.release_time(), Some(1_672_531_200));
        assert!(result["lbry://@missing/thing"].claim_id.is_none());
    }
}
