//! reqwest-backed fetcher for product pages and marketplace JSON APIs.
//!
//! Not a browser: plain HTTP with a desktop Chrome user-agent, retry on
//! 5xx and transport errors, and `retry-after`-aware backoff on 429.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::RemoteFetcher;
use crate::config::SellerCredentials;
use crate::error::{Result, TrackerError};

pub const COMPOSER_ENDPOINT: &str = "https://www.ozon.ru/api/composer-api.bx/page/json/v2";
pub const SELLER_PRICES_ENDPOINT: &str = "https://api-seller.ozon.ru/v4/product/info/prices";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";
const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9";

/// HTTP fetcher for the marketplace endpoints.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    composer_endpoint: String,
    seller_endpoint: String,
    max_retries: u32,
    retry_base: Duration,
}

impl HttpFetcher {
    /// Fails when the TLS backend or system configuration rejects the client.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TrackerError::Network(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            composer_endpoint: COMPOSER_ENDPOINT.to_string(),
            seller_endpoint: SELLER_PRICES_ENDPOINT.to_string(),
            max_retries: 2,
            retry_base: Duration::from_millis(500),
        })
    }

    /// Point the JSON APIs at other hosts.
    pub fn with_endpoints(mut self, composer: impl Into<String>, seller: impl Into<String>) -> Self {
        self.composer_endpoint = composer.into();
        self.seller_endpoint = seller.into();
        self
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Send a request with retry on 5xx/transport errors and backoff on 429.
    async fn send<F>(&self, url: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut retries = 0u32;
        loop {
            match build().send().await {
                Ok(r) => {
                    let status = r.status().as_u16();

                    if status >= 500 && retries < self.max_retries {
                        retries += 1;
                        tokio::time::sleep(self.retry_base * 2u32.pow(retries - 1)).await;
                        continue;
                    }

                    if status == 429 && retries < self.max_retries {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    if !r.status().is_success() {
                        return Err(TrackerError::HttpStatus {
                            status,
                            url: url.to_string(),
                        });
                    }
                    return Ok(r);
                }
                Err(e) => {
                    if retries < self.max_retries && !e.is_builder() {
                        retries += 1;
                        tracing::debug!("request to {url} failed, retrying: {e}");
                        tokio::time::sleep(self.retry_base * 2u32.pow(retries - 1)).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    fn composer_url(&self, page_url: &str) -> Result<Url> {
        let page = Url::parse(page_url)
            .map_err(|e| TrackerError::InvalidProduct(format!("bad product url {page_url}: {e}")))?;
        let mut target = page.path().to_string();
        if let Some(query) = page.query() {
            target.push('?');
            target.push_str(query);
        }
        let mut composer = Url::parse(&self.composer_endpoint)
            .map_err(|e| TrackerError::Network(format!("bad composer endpoint: {e}")))?;
        composer.query_pairs_mut().append_pair("url", &target);
        Ok(composer)
    }
}

/// Seller API filter: numeric ids are marketplace product ids, anything
/// else is treated as the seller's own offer id.
fn seller_request_body(product_id: &str) -> Value {
    let filter = match product_id.parse::<u64>() {
        Ok(numeric) => json!({ "product_id": [numeric], "visibility": "ALL" }),
        Err(_) => json!({ "offer_id": [product_id], "visibility": "ALL" }),
    };
    json!({ "filter": filter, "limit": 1 })
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        let resp = self
            .send(url, || {
                self.client
                    .get(url)
                    .header("Accept", HTML_ACCEPT)
                    .header("Accept-Language", ACCEPT_LANGUAGE)
                    .header("Cache-Control", "no-store")
            })
            .await?;
        Ok(resp.text().await?)
    }

    async fn fetch_composer(&self, url: &str) -> Result<Value> {
        let composer = self.composer_url(url)?;
        let target = composer.to_string();
        let resp = self
            .send(&target, || {
                self.client
                    .get(composer.clone())
                    .header("Accept", "application/json")
                    .header("Accept-Language", ACCEPT_LANGUAGE)
            })
            .await?;
        Ok(resp.json::<Value>().await?)
    }

    async fn fetch_seller_price(
        &self,
        product_id: &str,
        credentials: &SellerCredentials,
    ) -> Result<Value> {
        let body = seller_request_body(product_id);
        let endpoint = self.seller_endpoint.clone();
        let resp = self
            .send(&endpoint, || {
                self.client
                    .post(&endpoint)
                    .header("Client-Id", &credentials.client_id)
                    .header("Api-Key", &credentials.api_key)
                    .json(&body)
            })
            .await?;
        Ok(resp.json::<Value>().await?)
    }
}
