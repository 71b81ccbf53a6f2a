//! Cross-context category bridge.
//!
//! Category data sometimes lives only in the hosting page's own script
//! realm. The requester posts `{id, type: "categories"}` through a
//! [`PagePort`] and waits for the response echoing the same id. A request
//! that is not answered within the timeout resolves to an empty list.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::extract::category::{sanitize_category_parts, scan_values};

pub const CATEGORIES_REQUEST: &str = "categories";

/// Requests that may wait unread in the page context.
const REQUEST_QUEUE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Vec<String>>>>>;

/// Requester side of the bridge.
#[derive(Clone)]
pub struct CategoryBridge {
    outgoing: mpsc::Sender<BridgeRequest>,
    pending: Pending,
    timeout: Duration,
}

/// Page side of the bridge: receives requests, answers them by id.
pub struct PagePort {
    requests: mpsc::Receiver<BridgeRequest>,
    pending: Pending,
}

impl CategoryBridge {
    /// Create a connected requester/page pair.
    pub fn channel(timeout: Duration) -> (CategoryBridge, PagePort) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        (
            CategoryBridge {
                outgoing: tx,
                pending: pending.clone(),
                timeout,
            },
            PagePort {
                requests: rx,
                pending,
            },
        )
    }

    /// Raw category labels from the page context, or empty on timeout.
    pub async fn request_raw(&self) -> Vec<String> {
        let id = format!("cat-{}", uuid::Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id.clone(), tx);
        }

        let request = BridgeRequest {
            id: id.clone(),
            kind: CATEGORIES_REQUEST.to_string(),
        };
        // The timeout covers queueing too: a page that stops reading must not
        // stall the requester.
        let exchange = async {
            if self.outgoing.send(request).await.is_err() {
                return Err("bridge closed; no page context");
            }
            rx.await.map_err(|_| "page context dropped the request")
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(categories)) => categories,
            Ok(Err(reason)) => {
                tracing::debug!("category bridge request {id} failed: {reason}");
                self.forget(&id);
                Vec::new()
            }
            Err(_) => {
                tracing::debug!(
                    "category bridge request {id} timed out after {}ms",
                    self.timeout.as_millis()
                );
                self.forget(&id);
                Vec::new()
            }
        }
    }

    /// Sanitized category path from the page context.
    pub async fn request_categories(&self, title: &str) -> Vec<String> {
        let raw = self.request_raw().await;
        sanitize_category_parts(&raw, title)
    }

    fn forget(&self, id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }
}

impl PagePort {
    /// Next request posted by the requester; `None` once it is dropped.
    pub async fn next_request(&mut self) -> Option<BridgeRequest> {
        self.requests.recv().await
    }

    /// Deliver a response. Unknown or expired ids are ignored.
    pub fn respond(&self, response: BridgeResponse) {
        if response.kind != CATEGORIES_REQUEST {
            return;
        }
        let waiter = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&response.id),
            Err(_) => None,
        };
        match waiter {
            Some(tx) => {
                let _ = tx.send(response.categories);
            }
            None => tracing::debug!("dropping bridge response for unknown id {}", response.id),
        }
    }
}

/// Answers category requests from page-context state.
///
/// Application state blobs are scanned first, then the analytics event log;
/// labels from both are concatenated unsanitized.
#[derive(Debug, Clone, Default)]
pub struct PageStateResponder {
    pub app_state: Vec<Value>,
    pub data_layer: Vec<Value>,
}

impl PageStateResponder {
    pub fn new(app_state: Vec<Value>, data_layer: Vec<Value>) -> Self {
        Self {
            app_state,
            data_layer,
        }
    }

    pub fn gather(&self) -> Vec<String> {
        let mut combined = scan_values(&self.app_state);
        combined.extend(scan_values(&self.data_layer));
        combined
    }

    pub fn answer(&self, request: &BridgeRequest) -> Option<BridgeResponse> {
        if request.kind != CATEGORIES_REQUEST {
            return None;
        }
        Some(BridgeResponse {
            id: request.id.clone(),
            kind: request.kind.clone(),
            categories: self.gather(),
        })
    }

    /// Answer requests until the requester goes away.
    pub async fn serve(self, mut port: PagePort) {
        while let Some(request) = port.next_request().await {
            if let Some(response) = self.answer(&request) {
                port.respond(response);
            }
        }
    }
}
