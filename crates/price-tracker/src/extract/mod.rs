//! Price and category extraction from heterogeneous page payloads.
//!
//! Marketplace pages carry the same facts in several incompatible shapes
//! (SEO metadata, JSON-LD, render state, live DOM). Each shape is read by an
//! independent strategy, and strategies are tried in a fixed order until one
//! produces a result. A strategy that fails yields nothing; it never errors.

pub mod category;
pub mod price;
pub mod walk;

use scraper::Selector;

use crate::error::TrackerError;

/// A named extraction strategy over input `I`.
pub type Strategy<I, T> = (&'static str, fn(&I) -> Option<T>);

/// Run strategies in order and return the first hit.
pub fn first_hit<I: ?Sized, T>(input: &I, strategies: &[Strategy<I, T>]) -> Option<T> {
    for (name, strategy) in strategies {
        if let Some(found) = strategy(input) {
            tracing::debug!("extraction strategy '{name}' produced a result");
            return Some(found);
        }
    }
    None
}

/// Parse a CSS selector, logging rather than failing on a bad pattern.
pub(crate) fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::debug!("invalid selector {css:?}: {e:?}");
            None
        }
    }
}

/// Log a source that failed to parse; the caller moves on to the next one.
pub(crate) fn skip_malformed(origin: &str, reason: impl std::fmt::Display) {
    let err = TrackerError::MalformedEmbeddedData {
        origin: origin.to_string(),
        reason: reason.to_string(),
    };
    tracing::debug!("skipping source: {err}");
}

/// Collapse runs of whitespace and trim.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
