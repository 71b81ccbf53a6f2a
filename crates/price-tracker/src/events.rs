// Copyright 2026 Price Tracker Contributors
// SPDX-License-Identifier: MIT

//! Status broadcaster: relays tracked-product state to UI surfaces.
//!
//! A `tokio::sync::broadcast` channel carrying [`TrackerEvent`] values. Any
//! number of listeners (popup, in-page widget, CLI watcher) can subscribe
//! independently; with no subscribers events are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::ProductStatus;

/// Every event the tracker publishes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum TrackerEvent {
    /// Fresh status of one product, sent after the write that caused it.
    ProductStatusUpdated(ProductStatus),
    /// Number of tracked products changed (badge text).
    #[serde(rename_all = "camelCase")]
    TrackedCountChanged { count: usize },
}

/// Fan-out of [`TrackerEvent`]s.
#[derive(Clone)]
pub struct StatusBroadcaster {
    sender: broadcast::Sender<TrackerEvent>,
}

impl StatusBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers.
    pub fn emit(&self, event: TrackerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.sender.subscribe()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Badge label for a tracked count; empty when nothing is tracked.
pub fn badge_text(count: usize) -> String {
    if count == 0 {
        String::new()
    } else {
        count.to_string()
    }
}
