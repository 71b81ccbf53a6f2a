//! User-facing price alerts.
//!
//! The tracker decides *whether* to alert; a [`NotificationDispatcher`]
//! only renders what it is handed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::TrackedProduct;

/// Alert about a tracked product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Alert {
    /// The price moved from above the target to at or below it.
    #[serde(rename_all = "camelCase")]
    TargetReached {
        product_id: String,
        title: String,
        image: Option<String>,
        price: u64,
        target: u64,
    },
    /// The price is below its historical peak.
    #[serde(rename_all = "camelCase")]
    PriceDropped {
        product_id: String,
        title: String,
        image: Option<String>,
        price: u64,
        drop: u64,
    },
}

impl Alert {
    pub fn target_reached(product: &TrackedProduct, target: u64) -> Self {
        Alert::TargetReached {
            product_id: product.id.clone(),
            title: product.title.clone(),
            image: product.image.clone(),
            price: product.last_known_price,
            target,
        }
    }

    pub fn price_dropped(product: &TrackedProduct, drop: u64) -> Self {
        Alert::PriceDropped {
            product_id: product.id.clone(),
            title: product.title.clone(),
            image: product.image.clone(),
            price: product.last_known_price,
            drop,
        }
    }

    pub fn product_id(&self) -> &str {
        match self {
            Alert::TargetReached { product_id, .. } | Alert::PriceDropped { product_id, .. } => {
                product_id
            }
        }
    }

    /// Replacement tag: a newer alert of the same kind for the same product
    /// supersedes the previous one.
    pub fn tag(&self) -> String {
        match self {
            Alert::TargetReached { product_id, .. } => format!("price-target-{product_id}"),
            Alert::PriceDropped { product_id, .. } => format!("price-drop-{product_id}"),
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            Alert::TargetReached { .. } => "Цена достигла порога",
            Alert::PriceDropped { .. } => "Цена снизилась! 🎉",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Alert::TargetReached {
                title,
                price,
                target,
                ..
            } => format!(
                "{title}\nТекущая цена: {} (порог: {})",
                format_rub(*price),
                format_rub(*target)
            ),
            Alert::PriceDropped {
                title, price, drop, ..
            } => format!(
                "{title}\nНовая цена: {} (−{})",
                format_rub(*price),
                format_rub(*drop)
            ),
        }
    }
}

/// Render a whole-ruble amount with narrow-space digit grouping: `1 299 ₽`.
pub fn format_rub(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + 8);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('\u{202f}');
        }
        grouped.push(ch);
    }
    grouped.push_str(" ₽");
    grouped
}

/// Renders alerts to the user.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, alert: &Alert) -> Result<()>;
}

/// Dispatcher that writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn dispatch(&self, alert: &Alert) -> Result<()> {
        tracing::info!(
            tag = %alert.tag(),
            "{}: {}",
            alert.heading(),
            alert.body().replace('\n', " | ")
        );
        Ok(())
    }
}
