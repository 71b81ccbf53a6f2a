//! Remote content acquisition.
//!
//! A [`RemoteFetcher`] returns raw payloads only; turning them into prices
//! is the extractors' job. Transport and auth failures surface as
//! [`TrackerError`](crate::TrackerError) values that callers downgrade to
//! "no price this cycle".

pub mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::SellerCredentials;
use crate::error::Result;

pub use http::HttpFetcher;

/// Source of raw product payloads.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Product page HTML.
    async fn fetch_page(&self, url: &str) -> Result<String>;

    /// Page-composer JSON for a product page URL.
    async fn fetch_composer(&self, url: &str) -> Result<Value>;

    /// Seller price API response for one product id.
    async fn fetch_seller_price(
        &self,
        product_id: &str,
        credentials: &SellerCredentials,
    ) -> Result<Value>;
}
