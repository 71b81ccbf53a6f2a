//! Configuration loading and resolution.
//!
//! Two layers live here: [`TrackerSettings`], persisted next to the product
//! map and editable at runtime, and [`TrackerConfig`], read once from the
//! process environment.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::storage::KeyValueStore;

/// Store key holding the settings document.
pub const SETTINGS_KEY: &str = "trackerSettings";

const DEFAULT_CHECK_INTERVAL_MINUTES: u64 = 60;
const MIN_CHECK_INTERVAL_MINUTES: u64 = 1;
/// Longest accepted check interval: one year.
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 365 * 24 * 60;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_BRIDGE_TIMEOUT_MS: u64 = 500;

/// User-editable tracker settings (the `UPDATE_SETTINGS` payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSettings {
    #[serde(
        default = "default_interval",
        deserialize_with = "lenient_interval"
    )]
    pub check_interval_minutes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_api_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_api_key: Option<String>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
            seller_api_client_id: None,
            seller_api_key: None,
        }
    }
}

fn default_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_MINUTES
}

/// Accept the interval as a number or numeric string; anything unusable
/// falls back to the default, anything huge is capped.
fn lenient_interval<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let minutes = match raw {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    Ok(minutes
        .filter(|m| *m > 0)
        .map_or(DEFAULT_CHECK_INTERVAL_MINUTES, |m| {
            m.min(MAX_CHECK_INTERVAL_MINUTES)
        }))
}

/// Client id and API key for the seller price API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerCredentials {
    pub client_id: String,
    pub api_key: String,
}

impl TrackerSettings {
    /// Period between background checks, between one minute and one year.
    pub fn check_interval(&self) -> Duration {
        let minutes = self
            .check_interval_minutes
            .clamp(MIN_CHECK_INTERVAL_MINUTES, MAX_CHECK_INTERVAL_MINUTES);
        Duration::from_secs(minutes.saturating_mul(60))
    }

    /// Seller credentials when both halves are present and non-blank.
    pub fn seller_credentials(&self) -> Option<SellerCredentials> {
        let client_id = self.seller_api_client_id.as_deref()?.trim();
        let api_key = self.seller_api_key.as_deref()?.trim();
        if client_id.is_empty() || api_key.is_empty() {
            return None;
        }
        Some(SellerCredentials {
            client_id: client_id.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Fill missing seller credentials from the process config.
    pub fn with_fallback_credentials(mut self, config: &TrackerConfig) -> Self {
        if self.seller_api_client_id.is_none() {
            self.seller_api_client_id = config.seller_client_id.clone();
        }
        if self.seller_api_key.is_none() {
            self.seller_api_key = config.seller_api_key.clone();
        }
        self
    }

    /// Read settings from the store, defaulting when absent or unreadable.
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self> {
        match store.get(SETTINGS_KEY).await? {
            Some(raw) => match serde_json::from_value(raw) {
                Ok(settings) => Ok(settings),
                Err(e) => {
                    tracing::warn!("stored settings unreadable, using defaults: {e}");
                    Ok(Self::default())
                }
            },
            None => Ok(Self::default()),
        }
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(SETTINGS_KEY, serde_json::to_value(self)?).await
    }
}

/// Process-level configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Directory holding the persisted store.
    pub data_dir: PathBuf,
    /// Per-request timeout for remote fetches.
    pub http_timeout: Duration,
    /// How long a page-context category request may wait for its answer.
    pub bridge_timeout: Duration,
    pub seller_client_id: Option<String>,
    pub seller_api_key: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            bridge_timeout: Duration::from_millis(DEFAULT_BRIDGE_TIMEOUT_MS),
            seller_client_id: None,
            seller_api_key: None,
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        let data_dir = read_env_string("PRICE_TRACKER_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        Self {
            data_dir,
            http_timeout: Duration::from_millis(
                read_env_u64("PRICE_TRACKER_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS).max(1),
            ),
            bridge_timeout: Duration::from_millis(
                read_env_u64("PRICE_TRACKER_BRIDGE_TIMEOUT_MS", DEFAULT_BRIDGE_TIMEOUT_MS).max(1),
            ),
            seller_client_id: read_env_string("PRICE_TRACKER_SELLER_CLIENT_ID"),
            seller_api_key: read_env_string("PRICE_TRACKER_SELLER_API_KEY"),
        }
    }

    /// Path of the JSON document backing the store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("price-tracker"))
        .unwrap_or_else(|| PathBuf::from(".price-tracker"))
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    read_env_string(name)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
