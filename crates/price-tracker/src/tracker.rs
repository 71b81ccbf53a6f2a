//! Orchestration of fetching, extraction, persistence and alerting.
//!
//! Per product the states are `untracked → tracked`, with each refresh
//! either leaving the price unchanged (liveness only) or appending a
//! history entry. A failed refresh leaves the record untouched; the next
//! cycle is the retry.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::bridge::CategoryBridge;
use crate::config::{TrackerConfig, TrackerSettings};
use crate::error::{Result, TrackerError};
use crate::events::{StatusBroadcaster, TrackerEvent};
use crate::extract::category::sanitize_category_parts;
use crate::extract::price;
use crate::fetch::RemoteFetcher;
use crate::notify::{Alert, NotificationDispatcher};
use crate::repository::ProductRepository;
use crate::snapshot::PageSnapshot;
use crate::types::{PriceChange, ProductCandidate, ProductStatus, TrackedProduct};

/// What triggered a price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// Background timer cycle.
    Scheduled,
    /// User-requested check.
    Manual,
    /// Passive observation while the user views the page.
    Page,
}

impl UpdateSource {
    /// Only background cycles may alert the user.
    pub fn notifies(self) -> bool {
        matches!(self, UpdateSource::Scheduled)
    }
}

/// Result of refreshing one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No price was obtained, or the product is no longer tracked.
    Skipped,
    /// Same price; `last_update` moved.
    Unchanged,
    /// New price appended to history.
    Changed { previous: u64, current: u64 },
}

/// Mutable process-wide state owned by the tracker.
struct TrackerContext {
    settings: watch::Sender<TrackerSettings>,
    fallback: Option<TrackerConfig>,
    warned_missing_credentials: AtomicBool,
}

/// A resolved remote price, plus the page snapshot when the page was read.
struct Resolved {
    price: u64,
    page: Option<PageSnapshot>,
}

pub struct PriceTracker {
    repository: ProductRepository,
    fetcher: Arc<dyn RemoteFetcher>,
    notifier: Arc<dyn NotificationDispatcher>,
    broadcaster: StatusBroadcaster,
    bridge: Option<CategoryBridge>,
    context: TrackerContext,
}

impl PriceTracker {
    pub fn new(
        repository: ProductRepository,
        fetcher: Arc<dyn RemoteFetcher>,
        notifier: Arc<dyn NotificationDispatcher>,
        broadcaster: StatusBroadcaster,
    ) -> Self {
        let (settings, _) = watch::channel(TrackerSettings::default());
        Self {
            repository,
            fetcher,
            notifier,
            broadcaster,
            bridge: None,
            context: TrackerContext {
                settings,
                fallback: None,
                warned_missing_credentials: AtomicBool::new(false),
            },
        }
    }

    /// Ask the page context for categories when a candidate has none.
    pub fn with_bridge(mut self, bridge: CategoryBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Use environment-provided seller credentials when settings lack them.
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.context.fallback = Some(config);
        self
    }

    pub fn repository(&self) -> &ProductRepository {
        &self.repository
    }

    pub fn broadcaster(&self) -> &StatusBroadcaster {
        &self.broadcaster
    }

    // ── Settings ────────────────────────────────────────────────────────────

    pub fn settings(&self) -> TrackerSettings {
        self.context.settings.borrow().clone()
    }

    /// Observe settings changes (the scheduler reschedules on them).
    pub fn watch_settings(&self) -> watch::Receiver<TrackerSettings> {
        self.context.settings.subscribe()
    }

    /// Load persisted settings into the running tracker.
    pub async fn reload_settings(&self) -> Result<TrackerSettings> {
        let settings = TrackerSettings::load(self.repository.store().as_ref()).await?;
        self.context.settings.send_replace(settings.clone());
        Ok(settings)
    }

    /// Persist and apply new settings.
    pub async fn update_settings(&self, settings: TrackerSettings) -> Result<()> {
        settings.save(self.repository.store().as_ref()).await?;
        tracing::info!(
            "settings updated: check interval {} min",
            settings.check_interval_minutes.max(1)
        );
        self.context.settings.send_replace(settings);
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Start tracking a product.
    ///
    /// Uses the candidate's page price when present, otherwise resolves one
    /// remotely. Fails with [`TrackerError::NoPriceAvailable`] when neither
    /// works. Tracking an id that is already tracked records the price as a
    /// page observation and refreshes the display metadata.
    pub async fn track(&self, candidate: ProductCandidate) -> Result<ProductStatus> {
        let id = candidate.id.trim().to_string();
        if id.is_empty() {
            return Err(TrackerError::InvalidProduct("missing product id".to_string()));
        }
        let target = match &candidate.target_price {
            Some(raw) => parse_target_price(raw)?,
            None => None,
        };

        let (price, page) = match candidate.current_price.filter(|p| *p > 0) {
            Some(price) => (price, None),
            None => match self.resolve_price(&id, &candidate.url).await {
                Some(resolved) => (resolved.price, resolved.page),
                None => return Err(TrackerError::NoPriceAvailable(id)),
            },
        };

        let mut category_path = sanitize_category_parts(&candidate.category_path, &candidate.title);
        if category_path.is_empty() {
            if let Some(candidate_category) = candidate.category.as_deref() {
                category_path = sanitize_category_parts(&[candidate_category], &candidate.title);
            }
        }
        if category_path.is_empty() {
            if let Some(page) = &page {
                category_path = page.category_path.clone();
            }
        }
        if category_path.is_empty() {
            if let Some(bridge) = &self.bridge {
                category_path = bridge.request_categories(&candidate.title).await;
            }
        }

        let now = Utc::now();
        let product = match self.repository.get(&id).await? {
            Some(mut existing) => {
                existing.title = candidate.title.clone();
                existing.url = candidate.url.clone();
                if candidate.image.is_some() {
                    existing.image = candidate.image.clone();
                }
                if existing.category_path.is_empty() {
                    existing.category_path = category_path;
                }
                if target.is_some() {
                    existing.target_price = target;
                }
                existing.record_price(price, now);
                existing
            }
            None => {
                let mut fresh = TrackedProduct::new(&candidate, price, now);
                fresh.id = id.clone();
                fresh.category_path = category_path;
                fresh.target_price = target;
                fresh
            }
        };

        let saved = self.repository.upsert(product).await?;
        tracing::info!("tracking {} at {} ({})", saved.id, saved.last_known_price, saved.title);
        let status = saved.status();
        self.broadcaster
            .emit(TrackerEvent::ProductStatusUpdated(status.clone()));
        self.publish_count().await;
        Ok(status)
    }

    /// Stop tracking. Unknown ids are a successful no-op.
    pub async fn untrack(&self, id: &str) -> Result<()> {
        if self.repository.remove(id).await? {
            tracing::info!("stopped tracking {id}");
            self.broadcaster
                .emit(TrackerEvent::ProductStatusUpdated(ProductStatus::untracked(id, None)));
            self.publish_count().await;
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<TrackedProduct>> {
        Ok(self.repository.get_all().await?.into_values().collect())
    }

    /// Status for a product page.
    ///
    /// An untracked id echoes `current_price`. For a tracked id a differing
    /// page price is first recorded as a passive observation.
    pub async fn get_status(&self, id: &str, current_price: Option<u64>) -> Result<ProductStatus> {
        let Some(product) = self.repository.get(id).await? else {
            return Ok(ProductStatus::untracked(id, current_price));
        };
        match current_price.filter(|p| *p > 0) {
            Some(observed) if observed != product.last_known_price => {
                self.update_price(id, observed, UpdateSource::Page).await?;
                match self.repository.get(id).await? {
                    Some(updated) => Ok(updated.status()),
                    None => Ok(ProductStatus::untracked(id, current_price)),
                }
            }
            _ => Ok(product.status()),
        }
    }

    /// Set or clear the alert threshold. Invalid input leaves the previous
    /// threshold untouched.
    pub async fn set_target_price(&self, id: &str, raw: &Value) -> Result<Option<u64>> {
        let target = parse_target_price(raw)?;
        let mut product = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| TrackerError::ProductNotFound(id.to_string()))?;
        product.target_price = target;
        let saved = self.repository.upsert(product).await?;
        self.broadcaster
            .emit(TrackerEvent::ProductStatusUpdated(saved.status()));
        Ok(saved.target_price)
    }

    // ── Price updates ───────────────────────────────────────────────────────

    /// Commit an observed price for a tracked product.
    pub async fn update_price(
        &self,
        id: &str,
        price: u64,
        source: UpdateSource,
    ) -> Result<RefreshOutcome> {
        self.commit_price(id, price, source, Vec::new()).await
    }

    async fn commit_price(
        &self,
        id: &str,
        price: u64,
        source: UpdateSource,
        discovered_categories: Vec<String>,
    ) -> Result<RefreshOutcome> {
        if price == 0 {
            return Ok(RefreshOutcome::Skipped);
        }
        let Some(mut product) = self.repository.get(id).await? else {
            tracing::debug!("price for untracked product {id} ignored");
            return Ok(RefreshOutcome::Skipped);
        };

        let change = product.record_price(price, Utc::now());
        if product.category_path.is_empty() && !discovered_categories.is_empty() {
            product.category_path = discovered_categories;
        }
        let saved = self.repository.upsert(product).await?;
        self.broadcaster
            .emit(TrackerEvent::ProductStatusUpdated(saved.status()));

        let PriceChange::Changed { previous } = change else {
            return Ok(RefreshOutcome::Unchanged);
        };
        tracing::info!("price of {id} changed {previous} -> {price} ({source:?})");
        self.publish_count().await;

        if source.notifies() {
            if let Some(alert) = alert_for(&saved, previous) {
                if let Err(e) = self.notifier.dispatch(&alert).await {
                    tracing::warn!("failed to deliver alert for {id}: {e}");
                }
            }
        }
        Ok(RefreshOutcome::Changed {
            previous,
            current: price,
        })
    }

    /// Fetch and commit the current price of one product.
    ///
    /// Failures are logged and reported as [`RefreshOutcome::Skipped`].
    pub async fn refresh_one(&self, product: &TrackedProduct, source: UpdateSource) -> RefreshOutcome {
        let Some(resolved) = self.resolve_price(&product.id, &product.url).await else {
            tracing::warn!("no price for {} this cycle; keeping previous state", product.id);
            return RefreshOutcome::Skipped;
        };
        let categories = match resolved.page {
            Some(page) if product.category_path.is_empty() => page.category_path,
            _ => Vec::new(),
        };
        match self
            .commit_price(&product.id, resolved.price, source, categories)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("failed to record price for {}: {e}", product.id);
                RefreshOutcome::Skipped
            }
        }
    }

    /// Refresh every tracked product, one at a time.
    pub async fn refresh_all(&self, source: UpdateSource) -> Result<BTreeMap<String, RefreshOutcome>> {
        let products = self.repository.get_all().await?;
        if products.is_empty() {
            self.publish_count().await;
        }
        let mut outcomes = BTreeMap::new();
        for (id, product) in products {
            let outcome = self.refresh_one(&product, source).await;
            outcomes.insert(id, outcome);
        }
        tracing::info!(
            "price check ({source:?}) finished: {} product(s), {} changed",
            outcomes.len(),
            outcomes
                .values()
                .filter(|o| matches!(o, RefreshOutcome::Changed { .. }))
                .count()
        );
        Ok(outcomes)
    }

    // ── Remote resolution ───────────────────────────────────────────────────

    /// Seller API, then the product page, then the page-composer API.
    async fn resolve_price(&self, id: &str, url: &str) -> Option<Resolved> {
        let settings = match &self.context.fallback {
            Some(config) => self.settings().with_fallback_credentials(config),
            None => self.settings(),
        };

        match settings.seller_credentials() {
            Some(credentials) => match self.fetcher.fetch_seller_price(id, &credentials).await {
                Ok(body) => {
                    if let Some(price) = price::from_json(&body) {
                        return Some(Resolved { price, page: None });
                    }
                    tracing::debug!("seller API response for {id} carried no price");
                }
                Err(e) => tracing::warn!("seller API lookup for {id} failed: {e}"),
            },
            None => {
                if !self
                    .context
                    .warned_missing_credentials
                    .swap(true, Ordering::Relaxed)
                {
                    tracing::warn!("{}; falling back to page scraping", TrackerError::MissingCredentials);
                }
            }
        }

        if url.is_empty() {
            return None;
        }

        let mut page = None;
        match self.fetcher.fetch_page(url).await {
            Ok(html) => {
                let snapshot = PageSnapshot::parse(url, &html);
                if let Some(price) = snapshot.price {
                    return Some(Resolved {
                        price,
                        page: Some(snapshot),
                    });
                }
                page = Some(snapshot);
            }
            Err(e) => tracing::warn!("page fetch for {id} failed: {e}"),
        }

        match self.fetcher.fetch_composer(url).await {
            Ok(body) => price::from_json(&body).map(|price| Resolved { price, page }),
            Err(e) => {
                tracing::warn!("composer lookup for {id} failed: {e}");
                None
            }
        }
    }

    async fn publish_count(&self) {
        match self.repository.count().await {
            Ok(count) => self
                .broadcaster
                .emit(TrackerEvent::TrackedCountChanged { count }),
            Err(e) => tracing::warn!("could not count tracked products: {e}"),
        }
    }
}

/// Alert policy for a committed price change.
///
/// A downward crossing of the target wins; otherwise any gap below the
/// historical peak is reported as a drop.
pub fn alert_for(product: &TrackedProduct, previous: u64) -> Option<Alert> {
    if product.crossed_target(previous) {
        let target = product.target_price?;
        return Some(Alert::target_reached(product, target));
    }
    match product.price_drop() {
        Some(drop) if drop > 0 => Some(Alert::price_dropped(product, drop)),
        _ => None,
    }
}

/// Normalize a user-supplied threshold.
///
/// `null` and blank strings clear the threshold. Anything else must be a
/// positive whole number, given as a JSON number or a string that may carry
/// spaces and a currency sign.
pub fn parse_target_price(raw: &Value) -> Result<Option<u64>> {
    let invalid = || TrackerError::InvalidTargetPrice(raw.to_string());
    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                return if v > 0 { Ok(Some(v)) } else { Err(invalid()) };
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f > 0.0 && f.fract() == 0.0 => Ok(Some(f as u64)),
                _ => Err(invalid()),
            }
        }
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '₽')
                .collect();
            if cleaned.is_empty() {
                return Ok(None);
            }
            match cleaned.parse::<u64>() {
                Ok(v) if v > 0 => Ok(Some(v)),
                _ => Err(invalid()),
            }
        }
        _ => Err(invalid()),
    }
}
