// Copyright 2026 Price Tracker Contributors
// SPDX-License-Identifier: MIT

//! Price tracker: marketplace price surveillance engine.
//!
//! Extracts a canonical price and category path from heterogeneous page
//! payloads, keeps a bounded price history per tracked product, and decides
//! when a price change deserves a user notification.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod messages;
pub mod notify;
pub mod repository;
pub mod scheduler;
pub mod snapshot;
pub mod storage;
pub mod tracker;
pub mod types;

pub use config::{TrackerConfig, TrackerSettings};
pub use error::{Result, TrackerError};
pub use events::{StatusBroadcaster, TrackerEvent};
pub use repository::ProductRepository;
pub use tracker::{PriceTracker, RefreshOutcome, UpdateSource};
pub use types::*;
