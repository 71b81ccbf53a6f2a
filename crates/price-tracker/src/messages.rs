//! Messaging contract between page observers, UI surfaces and the tracker.
//!
//! Requests arrive as `{"action": "...", "payload": {...}}`. Every action
//! except `UPDATE_PRICE_FROM_PAGE` answers with a JSON response.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::TrackerSettings;
use crate::error::TrackerError;
use crate::scheduler::SchedulerHandle;
use crate::tracker::{PriceTracker, UpdateSource};
use crate::types::ProductCandidate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum TrackerRequest {
    AddProduct(ProductCandidate),
    RemoveProduct {
        id: String,
    },
    #[serde(rename_all = "camelCase")]
    GetProductStatus {
        id: String,
        #[serde(default, deserialize_with = "crate::types::lenient_price")]
        current_price: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    SetTargetPrice {
        id: String,
        #[serde(default)]
        target_price: Value,
    },
    UpdatePriceFromPage {
        id: String,
        #[serde(default, deserialize_with = "crate::types::lenient_price")]
        price: Option<u64>,
    },
    ForcePriceCheck,
    UpdateSettings(TrackerSettings),
}

fn failure(error: &TrackerError) -> Value {
    json!({ "ok": false, "error": error.to_string() })
}

/// Dispatch a raw message. Returns the response, or `None` for
/// fire-and-forget and unrecognized actions.
pub async fn handle_message(tracker: &PriceTracker, raw: Value) -> Option<Value> {
    match serde_json::from_value::<TrackerRequest>(raw) {
        Ok(request) => handle_request(tracker, request).await,
        Err(e) => {
            tracing::debug!("ignoring unrecognized message: {e}");
            None
        }
    }
}

/// Dispatch a raw message in a process that runs the background scheduler.
///
/// Manual checks are queued on the scheduler so they never overlap a timed
/// cycle; every other action is handled as in [`handle_message`].
pub async fn handle_message_scheduled(
    tracker: &PriceTracker,
    scheduler: &SchedulerHandle,
    raw: Value,
) -> Option<Value> {
    match serde_json::from_value::<TrackerRequest>(raw) {
        Ok(TrackerRequest::ForcePriceCheck) => {
            scheduler.force_check();
            Some(json!({ "ok": true }))
        }
        Ok(request) => handle_request(tracker, request).await,
        Err(e) => {
            tracing::debug!("ignoring unrecognized message: {e}");
            None
        }
    }
}

pub async fn handle_request(tracker: &PriceTracker, request: TrackerRequest) -> Option<Value> {
    match request {
        TrackerRequest::AddProduct(candidate) => Some(match tracker.track(candidate).await {
            Ok(_) => json!({ "ok": true }),
            Err(e) => failure(&e),
        }),
        TrackerRequest::RemoveProduct { id } => Some(match tracker.untrack(&id).await {
            Ok(()) => json!({ "ok": true }),
            Err(e) => failure(&e),
        }),
        TrackerRequest::GetProductStatus { id, current_price } => {
            Some(match tracker.get_status(&id, current_price).await {
                Ok(status) => serde_json::to_value(status).unwrap_or_else(|e| failure(&e.into())),
                Err(e) => failure(&e),
            })
        }
        TrackerRequest::SetTargetPrice { id, target_price } => {
            Some(match tracker.set_target_price(&id, &target_price).await {
                Ok(target) => json!({ "ok": true, "targetPrice": target }),
                Err(e) => failure(&e),
            })
        }
        TrackerRequest::UpdatePriceFromPage { id, price } => {
            if let Some(price) = price {
                if let Err(e) = tracker.update_price(&id, price, UpdateSource::Page).await {
                    tracing::warn!("page price update for {id} failed: {e}");
                }
            }
            None
        }
        TrackerRequest::ForcePriceCheck => Some(match tracker.refresh_all(UpdateSource::Manual).await {
            Ok(_) => json!({ "ok": true }),
            Err(e) => failure(&e),
        }),
        TrackerRequest::UpdateSettings(settings) => Some(match tracker.update_settings(settings).await {
            Ok(()) => json!({ "ok": true }),
            Err(e) => failure(&e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SellerCredentials;
    use crate::error::Result;
    use crate::events::StatusBroadcaster;
    use crate::fetch::RemoteFetcher;
    use crate::notify::TracingNotifier;
    use crate::repository::ProductRepository;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Offline;

    #[async_trait]
    impl RemoteFetcher for Offline {
        async fn fetch_page(&self, _url: &str) -> Result<String> {
            Err(TrackerError::Network("offline".into()))
        }
        async fn fetch_composer(&self, _url: &str) -> Result<Value> {
            Err(TrackerError::Network("offline".into()))
        }
        async fn fetch_seller_price(&self, _id: &str, _c: &SellerCredentials) -> Result<Value> {
            Err(TrackerError::Network("offline".into()))
        }
    }

    fn tracker() -> PriceTracker {
        PriceTracker::new(
            ProductRepository::new(Arc::new(MemoryStore::new())),
            Arc::new(Offline),
            Arc::new(TracingNotifier),
            StatusBroadcaster::default(),
        )
    }

    fn add(price: Value) -> Value {
        json!({
            "action": "ADD_PRODUCT",
            "payload": {
                "id": "1234567",
                "title": "Наушники",
                "url": "https://www.ozon.ru/product/naushniki-1234567/",
                "currentPrice": price
            }
        })
    }

    #[test]
    fn test_parse_actions() {
        let req: TrackerRequest =
            serde_json::from_value(json!({"action": "FORCE_PRICE_CHECK"})).unwrap();
        assert_eq!(req, TrackerRequest::ForcePriceCheck);
        let req: TrackerRequest = serde_json::from_value(json!({
            "action": "GET_PRODUCT_STATUS",
            "payload": {"id": "1", "currentPrice": "1 299 ₽"}
        }))
        .unwrap();
        assert_eq!(
            req,
            TrackerRequest::GetProductStatus {
                id: "1".into(),
                current_price: Some(1299)
            }
        );
    }

    #[tokio::test]
    async fn test_add_then_status() {
        let tracker = tracker();
        let resp = handle_message(&tracker, add(json!(1990))).await.unwrap();
        assert_eq!(resp, json!({"ok": true}));

        let status = handle_message(
            &tracker,
            json!({"action": "GET_PRODUCT_STATUS", "payload": {"id": "1234567"}}),
        )
        .await
        .unwrap();
        assert_eq!(status["isTracked"], true);
        assert_eq!(status["currentPrice"], 1990);
        assert_eq!(status["averagePrice"], 1990);
        assert!(status["priceDrop"].is_null());
    }

    #[tokio::test]
    async fn test_add_without_price_reports_reason() {
        let tracker = tracker();
        let resp = handle_message(&tracker, add(Value::Null)).await.unwrap();
        assert_eq!(resp["ok"], false);
        assert!(resp["error"]
            .as_str()
            .unwrap()
            .contains("no price could be resolved"));
    }

    #[tokio::test]
    async fn test_set_target_and_remove() {
        let tracker = tracker();
        handle_message(&tracker, add(json!(1990))).await;
        let resp = handle_message(
            &tracker,
            json!({"action": "SET_TARGET_PRICE", "payload": {"id": "1234567", "targetPrice": "1500"}}),
        )
        .await
        .unwrap();
        assert_eq!(resp, json!({"ok": true, "targetPrice": 1500}));

        let resp = handle_message(
            &tracker,
            json!({"action": "REMOVE_PRODUCT", "payload": {"id": "1234567"}}),
        )
        .await
        .unwrap();
        assert_eq!(resp, json!({"ok": true}));
        let resp = handle_message(
            &tracker,
            json!({"action": "REMOVE_PRODUCT", "payload": {"id": "1234567"}}),
        )
        .await
        .unwrap();
        assert_eq!(resp, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_page_update_is_fire_and_forget() {
        let tracker = tracker();
        handle_message(&tracker, add(json!(1990))).await;
        let resp = handle_message(
            &tracker,
            json!({"action": "UPDATE_PRICE_FROM_PAGE", "payload": {"id": "1234567", "price": 1790}}),
        )
        .await;
        assert!(resp.is_none());
        let stored = tracker.repository().get("1234567").await.unwrap().unwrap();
        assert_eq!(stored.last_known_price, 1790);
    }

    #[tokio::test]
    async fn test_settings_and_force_check() {
        let tracker = tracker();
        let resp = handle_message(
            &tracker,
            json!({"action": "UPDATE_SETTINGS", "payload": {"checkIntervalMinutes": 30}}),
        )
        .await
        .unwrap();
        assert_eq!(resp, json!({"ok": true}));
        assert_eq!(tracker.settings().check_interval_minutes, 30);

        let resp = handle_message(&tracker, json!({"action": "FORCE_PRICE_CHECK"}))
            .await
            .unwrap();
        assert_eq!(resp, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_unknown_action_is_ignored() {
        let tracker = tracker();
        assert!(handle_message(&tracker, json!({"action": "OPEN_OPTIONS"})).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_force_check_runs_on_the_loop() {
        use crate::scheduler;
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct Counting(AtomicUsize);

        #[async_trait]
        impl RemoteFetcher for Counting {
            async fn fetch_page(&self, _url: &str) -> Result<String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(r#"<meta itemprop="price" content="1990">"#.to_string())
            }
            async fn fetch_composer(&self, _url: &str) -> Result<Value> {
                Err(TrackerError::Network("offline".into()))
            }
            async fn fetch_seller_price(&self, _id: &str, _c: &SellerCredentials) -> Result<Value> {
                Err(TrackerError::Network("offline".into()))
            }
        }

        let fetcher = Arc::new(Counting::default());
        let tracker = Arc::new(PriceTracker::new(
            ProductRepository::new(Arc::new(MemoryStore::new())),
            fetcher.clone(),
            Arc::new(TracingNotifier),
            StatusBroadcaster::default(),
        ));
        handle_message(&tracker, add(json!(1990))).await;
        let handle = SchedulerHandle::new();
        let task = scheduler::spawn(tracker.clone(), handle.clone());

        let force = json!({"action": "FORCE_PRICE_CHECK"});
        let resp = handle_message_scheduled(&tracker, &handle, force).await.unwrap();
        assert_eq!(resp, json!({"ok": true}));
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 1);

        let resp = handle_message_scheduled(
            &tracker,
            &handle,
            json!({"action": "REMOVE_PRODUCT", "payload": {"id": "1234567"}}),
        )
        .await
        .unwrap();
        assert_eq!(resp, json!({"ok": true}));

        handle.shutdown();
        task.await.unwrap();
    }
}
