//! Tracked-product records, status payloads, and derived price analytics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::extract::price::coerce_price;

/// Maximum number of history entries kept per product.
pub const HISTORY_LIMIT: usize = 100;

/// A single timestamped price observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// When the price was observed (epoch milliseconds on disk).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Observed price in whole currency units.
    pub price: u64,
}

/// A marketplace item under price surveillance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedProduct {
    /// Marketplace-assigned product id; unique key.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default)]
    pub image: Option<String>,
    /// Chronological observations, capped at [`HISTORY_LIMIT`].
    #[serde(default, deserialize_with = "null_as_default")]
    pub history: Vec<HistoryEntry>,
    /// Price at first observation. Set once, never overwritten.
    #[serde(default)]
    pub initial_price: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_known_price: u64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_price: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category_path: Vec<String>,
}

/// Result of committing an observed price to a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceChange {
    /// Same price as before; only the liveness timestamp moved.
    Unchanged,
    /// A new history entry was appended.
    Changed { previous: u64 },
}

impl TrackedProduct {
    /// Create a freshly tracked product seeded with a single history entry.
    pub fn new(candidate: &ProductCandidate, price: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: candidate.id.clone(),
            title: candidate.title.clone(),
            url: candidate.url.clone(),
            image: candidate.image.clone(),
            history: vec![HistoryEntry {
                timestamp: now,
                price,
            }],
            initial_price: Some(price),
            last_known_price: price,
            last_update: Some(now),
            target_price: None,
            category_path: candidate.category_path.clone(),
        }
    }

    /// Backfill `initial_price` on legacy records that lack it.
    ///
    /// Uses the oldest history entry, then the last known price. Returns
    /// `true` when a value was written.
    pub fn ensure_initial_price(&mut self) -> bool {
        if matches!(self.initial_price, Some(p) if p > 0) {
            return false;
        }
        let source = self
            .history
            .first()
            .map(|e| e.price)
            .filter(|p| *p > 0)
            .or(Some(self.last_known_price).filter(|p| *p > 0));
        match source {
            Some(price) => {
                self.initial_price = Some(price);
                true
            }
            None => false,
        }
    }

    /// Evict the oldest entries so at most [`HISTORY_LIMIT`] remain.
    pub fn cap_history(&mut self) {
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    /// Commit an observation.
    ///
    /// An unchanged price only refreshes `last_update`; a changed price also
    /// appends to history and moves `last_known_price` in the same step.
    pub fn record_price(&mut self, price: u64, now: DateTime<Utc>) -> PriceChange {
        self.ensure_initial_price();
        if self.last_known_price == price {
            self.last_update = Some(now);
            return PriceChange::Unchanged;
        }
        let previous = self.last_known_price;
        self.history.push(HistoryEntry {
            timestamp: now,
            price,
        });
        self.cap_history();
        self.last_known_price = price;
        self.last_update = Some(now);
        PriceChange::Changed { previous }
    }

    /// Rounded mean of all recorded prices.
    pub fn average_price(&self) -> Option<u64> {
        average_price(&self.history)
    }

    /// Gap between the historical peak and the latest price.
    pub fn price_drop(&self) -> Option<u64> {
        price_drop(&self.history)
    }

    /// Leaf of the category path, if any.
    pub fn primary_category(&self) -> Option<&str> {
        self.category_path.last().map(|s| s.as_str())
    }

    /// Whether moving from `previous` to the current price crossed the
    /// target threshold downwards.
    pub fn crossed_target(&self, previous: u64) -> bool {
        match self.target_price {
            Some(target) if target > 0 => previous > target && self.last_known_price <= target,
            _ => false,
        }
    }

    /// Status payload describing this product.
    pub fn status(&self) -> ProductStatus {
        ProductStatus {
            id: self.id.clone(),
            is_tracked: true,
            current_price: Some(self.last_known_price),
            average_price: self.average_price(),
            price_drop: self.price_drop(),
            last_update: self.last_update,
            target_price: self.target_price,
        }
    }
}

/// Arithmetic mean of the history prices, rounded half up.
pub fn average_price(history: &[HistoryEntry]) -> Option<u64> {
    if history.is_empty() {
        return None;
    }
    let len = history.len() as u128;
    let total: u128 = history.iter().map(|e| e.price as u128).sum();
    Some(((2 * total + len) / (2 * len)) as u64)
}

/// `max(history) - latest`, floored at zero; `None` below two entries.
pub fn price_drop(history: &[HistoryEntry]) -> Option<u64> {
    if history.len() < 2 {
        return None;
    }
    let max = history.iter().map(|e| e.price).max()?;
    let current = history.last()?.price;
    Some(max.saturating_sub(current))
}

/// Status payload exchanged with UI surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStatus {
    pub id: String,
    pub is_tracked: bool,
    pub current_price: Option<u64>,
    pub average_price: Option<u64>,
    pub price_drop: Option<u64>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_update: Option<DateTime<Utc>>,
    pub target_price: Option<u64>,
}

impl ProductStatus {
    /// Status for an id that is not tracked, echoing the observed page price.
    pub fn untracked(id: &str, current_price: Option<u64>) -> Self {
        Self {
            id: id.to_string(),
            is_tracked: false,
            current_price,
            average_price: None,
            price_drop: None,
            last_update: None,
            target_price: None,
        }
    }
}

/// Product data offered for tracking (the `ADD_PRODUCT` payload).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCandidate {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image: Option<String>,
    /// Price seen on the page, if the page yielded one.
    #[serde(default, deserialize_with = "lenient_price")]
    pub current_price: Option<u64>,
    /// Raw user-supplied threshold (string or number).
    #[serde(default)]
    pub target_price: Option<Value>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub category_path: Vec<String>,
}

/// Accept prices sent either as numbers or as formatted strings.
/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn lenient_price<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(coerce_price))
}
