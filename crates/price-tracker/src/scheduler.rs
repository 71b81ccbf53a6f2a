//! Background price-check loop.
//!
//! Runs `refresh_all` on a timer whose period follows the settings, and on
//! demand when a force check is requested through the [`SchedulerHandle`].
//! Cycles started by this loop never overlap: a trigger that arrives
//! mid-cycle is served after it. A `refresh_all` called directly on the
//! tracker runs alongside the loop, and the last write wins.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::tracker::{PriceTracker, UpdateSource};

/// Handles for steering a running scheduler.
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    shutdown: Arc<Notify>,
    force: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a manual check as soon as the loop is free.
    pub fn force_check(&self) {
        self.force.notify_one();
    }

    /// Stop the loop after the current cycle.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

fn interval_for(period: Duration) -> tokio::time::Interval {
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Spawn the check loop until `handle.shutdown()` is called.
///
/// The first timed check runs one period after start.
pub fn spawn(tracker: Arc<PriceTracker>, handle: SchedulerHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut settings_rx = tracker.watch_settings();
        let mut period = settings_rx.borrow_and_update().check_interval();
        let mut ticker = interval_for(period);
        tracing::info!("price check loop started: every {}s", period.as_secs());

        loop {
            tokio::select! {
                _ = handle.shutdown.notified() => {
                    tracing::info!("price check loop stopping");
                    break;
                }
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        tracing::debug!("settings channel closed; keeping current period");
                        settings_rx = tracker.watch_settings();
                        continue;
                    }
                    let next = settings_rx.borrow_and_update().check_interval();
                    if next != period {
                        period = next;
                        ticker = interval_for(period);
                        tracing::info!("price check rescheduled: every {}s", period.as_secs());
                    }
                }
                _ = handle.force.notified() => {
                    run_cycle(&tracker, UpdateSource::Manual).await;
                }
                _ = ticker.tick() => {
                    run_cycle(&tracker, UpdateSource::Scheduled).await;
                }
            }
        }
    })
}

async fn run_cycle(tracker: &PriceTracker, source: UpdateSource) {
    if let Err(e) = tracker.refresh_all(source).await {
        tracing::warn!("price check ({source:?}) could not read tracked products: {e}");
    }
}
