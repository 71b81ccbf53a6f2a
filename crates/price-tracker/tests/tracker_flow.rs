//! End-to-end tracker flows over a file-backed store and scripted remotes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_test::assert_ok;

use price_tracker::config::SellerCredentials;
use price_tracker::fetch::RemoteFetcher;
use price_tracker::notify::{Alert, NotificationDispatcher};
use price_tracker::storage::JsonFileStore;
use price_tracker::*;

// ─────────────────────── helpers ───────────────────────

const URL_A: &str = "https://www.ozon.ru/product/naushniki-1111111/";
const URL_B: &str = "https://www.ozon.ru/product/kolonka-2222222/";

/// Page responses per URL; `None` simulates a failed fetch.
#[derive(Default)]
struct ScriptedFetcher {
    pages: Mutex<HashMap<String, VecDeque<Option<u64>>>>,
    seller: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn script(&self, url: &str, prices: &[Option<u64>]) {
        self.pages
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(prices.iter().copied());
    }
}

#[async_trait]
impl RemoteFetcher for ScriptedFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        let next = self
            .pages
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
            .flatten();
        match next {
            Some(price) => Ok(format!(
                r#"<html><head><meta itemprop="price" content="{price}"></head>
                <body><h1>Товар</h1>
                <div data-widget="webBreadcrumbs"><a href="/c/1"><span>Электроника</span></a></div>
                </body></html>"#
            )),
            None => Err(TrackerError::Network("connection reset".into())),
        }
    }

    async fn fetch_composer(&self, _url: &str) -> Result<Value> {
        Err(TrackerError::HttpStatus {
            status: 403,
            url: "composer".into(),
        })
    }

    async fn fetch_seller_price(&self, product_id: &str, c: &SellerCredentials) -> Result<Value> {
        self.seller.lock().unwrap().push(format!("{product_id}:{}", c.client_id));
        Ok(json!({"result": {"items": [{"price": {"price": "777.0000"}}]}}))
    }
}

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<Alert>>);

impl RecordingNotifier {
    fn alerts(&self) -> Vec<Alert> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn dispatch(&self, alert: &Alert) -> Result<()> {
        self.0.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    tracker: PriceTracker,
    fetcher: Arc<ScriptedFetcher>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("store.json")));
    let fetcher = Arc::new(ScriptedFetcher::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let tracker = PriceTracker::new(
        ProductRepository::new(store),
        fetcher.clone(),
        notifier.clone(),
        StatusBroadcaster::new(256),
    );
    Harness {
        _dir: dir,
        tracker,
        fetcher,
        notifier,
    }
}

fn candidate(id: &str, url: &str, price: u64) -> ProductCandidate {
    ProductCandidate {
        id: id.into(),
        title: format!("Товар {id}"),
        url: url.into(),
        current_price: Some(price),
        ..Default::default()
    }
}

async fn stored(h: &Harness, id: &str) -> TrackedProduct {
    h.tracker.repository().get(id).await.unwrap().unwrap()
}

// ─────────────────────── notification policy ───────────────────────

#[tokio::test]
async fn test_target_alert_fires_once_per_crossing() {
    let h = harness();
    assert_ok!(h.tracker.track(candidate("1111111", URL_A, 150)).await);
    assert_ok!(h.tracker.set_target_price("1111111", &json!(100)).await);
    h.fetcher.script(URL_A, &[Some(120), Some(90), Some(80)]);

    for _ in 0..3 {
        h.tracker.refresh_all(UpdateSource::Scheduled).await.unwrap();
    }

    let alerts = h.notifier.alerts();
    let targets: Vec<&Alert> = alerts
        .iter()
        .filter(|a| matches!(a, Alert::TargetReached { .. }))
        .collect();
    assert_eq!(targets.len(), 1);
    assert!(matches!(
        targets[0],
        Alert::TargetReached {
            price: 90,
            target: 100,
            ..
        }
    ));
    assert_eq!(alerts.len(), 3);
    assert!(matches!(alerts[0], Alert::PriceDropped { drop: 30, .. }));
    assert!(matches!(alerts[2], Alert::PriceDropped { drop: 70, .. }));
}

#[tokio::test]
async fn test_manual_and_unchanged_checks_stay_silent() {
    let h = harness();
    h.tracker.track(candidate("1111111", URL_A, 500)).await.unwrap();
    h.fetcher.script(URL_A, &[Some(400), Some(400)]);

    let first = h.tracker.refresh_all(UpdateSource::Manual).await.unwrap();
    assert_eq!(
        first["1111111"],
        RefreshOutcome::Changed {
            previous: 500,
            current: 400
        }
    );
    let before = stored(&h, "1111111").await;

    let second = h.tracker.refresh_all(UpdateSource::Scheduled).await.unwrap();
    assert_eq!(second["1111111"], RefreshOutcome::Unchanged);

    let after = stored(&h, "1111111").await;
    assert_eq!(after.history.len(), 2);
    assert!(after.last_update >= before.last_update);
    assert!(h.notifier.alerts().is_empty());
}

// ─────────────────────── record invariants ───────────────────────

#[tokio::test]
async fn test_history_window_and_initial_price() {
    let h = harness();
    h.tracker.track(candidate("1111111", URL_A, 5000)).await.unwrap();
    let prices: Vec<Option<u64>> = (1..=150).map(|i| Some(5000 + i)).collect();
    h.fetcher.script(URL_A, &prices);

    for _ in 0..150 {
        h.tracker.refresh_all(UpdateSource::Manual).await.unwrap();
    }

    let product = stored(&h, "1111111").await;
    assert_eq!(product.history.len(), 100);
    let kept: Vec<u64> = product.history.iter().map(|e| e.price).collect();
    let expected: Vec<u64> = (51..=150).map(|i| 5000 + i).collect();
    assert_eq!(kept, expected);
    assert!(product
        .history
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(product.initial_price, Some(5000));
    assert_eq!(product.last_known_price, 5150);
}

#[tokio::test]
async fn test_retracking_keeps_initial_price() {
    let h = harness();
    h.tracker.track(candidate("1111111", URL_A, 900)).await.unwrap();
    h.tracker.track(candidate("1111111", URL_A, 850)).await.unwrap();
    let product = stored(&h, "1111111").await;
    assert_eq!(product.initial_price, Some(900));
    assert_eq!(product.history.len(), 2);
    assert_eq!(product.last_known_price, 850);
}

// ─────────────────────── batch behavior ───────────────────────

#[tokio::test]
async fn test_failed_fetch_does_not_abort_batch() {
    let h = harness();
    h.tracker.track(candidate("1111111", URL_A, 1000)).await.unwrap();
    h.tracker.track(candidate("2222222", URL_B, 2000)).await.unwrap();
    h.fetcher.script(URL_A, &[None]);
    h.fetcher.script(URL_B, &[Some(1800)]);

    let outcomes = h.tracker.refresh_all(UpdateSource::Scheduled).await.unwrap();
    assert_eq!(outcomes["1111111"], RefreshOutcome::Skipped);
    assert_eq!(
        outcomes["2222222"],
        RefreshOutcome::Changed {
            previous: 2000,
            current: 1800
        }
    );
    assert_eq!(stored(&h, "1111111").await.history.len(), 1);
    assert_eq!(stored(&h, "2222222").await.last_known_price, 1800);
}

#[tokio::test]
async fn test_refresh_backfills_missing_category() {
    let h = harness();
    h.tracker.track(candidate("1111111", URL_A, 1000)).await.unwrap();
    assert!(stored(&h, "1111111").await.category_path.is_empty());
    h.fetcher.script(URL_A, &[Some(990)]);
    h.tracker.refresh_all(UpdateSource::Manual).await.unwrap();
    assert_eq!(stored(&h, "1111111").await.category_path, vec!["Электроника"]);
}

#[tokio::test]
async fn test_seller_api_preferred_when_configured() {
    let h = harness();
    h.tracker
        .update_settings(TrackerSettings {
            seller_api_client_id: Some("42".into()),
            seller_api_key: Some("secret".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut c = candidate("1111111", URL_A, 0);
    c.current_price = None;
    let status = h.tracker.track(c).await.unwrap();
    assert_eq!(status.current_price, Some(777));
    assert_eq!(*h.fetcher.seller.lock().unwrap(), vec!["1111111:42".to_string()]);
}

// ─────────────────────── broadcasts ───────────────────────

#[tokio::test]
async fn test_broadcast_follows_persisted_write() {
    let h = harness();
    h.tracker.track(candidate("1111111", URL_A, 1000)).await.unwrap();
    let mut rx = h.tracker.broadcaster().subscribe();
    h.fetcher.script(URL_A, &[Some(950)]);
    h.tracker.refresh_all(UpdateSource::Scheduled).await.unwrap();

    match rx.try_recv().unwrap() {
        TrackerEvent::ProductStatusUpdated(status) => {
            assert_eq!(status.current_price, Some(950));
            assert_eq!(stored(&h, "1111111").await.last_known_price, 950);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        rx.try_recv().unwrap(),
        TrackerEvent::TrackedCountChanged { count: 1 }
    );
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    {
        let repo = ProductRepository::new(Arc::new(JsonFileStore::new(&path)));
        let tracker = PriceTracker::new(
            repo,
            Arc::new(ScriptedFetcher::default()),
            Arc::new(RecordingNotifier::default()),
            StatusBroadcaster::default(),
        );
        tracker.track(candidate("1111111", URL_A, 1000)).await.unwrap();
        tracker.set_target_price("1111111", &json!("800")).await.unwrap();
    }
    let repo = ProductRepository::new(Arc::new(JsonFileStore::new(&path)));
    let product = repo.get("1111111").await.unwrap().unwrap();
    assert_eq!(product.target_price, Some(800));
    assert_eq!(product.initial_price, Some(1000));

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(raw["trackedProducts"]["1111111"]["lastUpdate"].is_i64());
}
