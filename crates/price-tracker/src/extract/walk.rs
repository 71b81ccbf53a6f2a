//! Budgeted traversal state for untrusted nested JSON.
//!
//! Embedded application state can be megabytes of arbitrarily nested data.
//! Every scan carries a [`ScanBudget`]: recursion stops below
//! [`MAX_DEPTH`] and the whole scan stops after [`SCAN_LIMIT`] visited nodes,
//! keeping whatever was found so far.

use serde_json::Value;
use std::collections::HashSet;

/// Deepest nesting level a scan descends to.
pub const MAX_DEPTH: usize = 6;

/// Node budget shared by all sources of a single scan.
pub const SCAN_LIMIT: usize = 1200;

/// Shared node budget and visited set for one scan.
#[derive(Debug)]
pub struct ScanBudget {
    visited: usize,
    limit: usize,
    seen: HashSet<usize>,
}

impl ScanBudget {
    pub fn new() -> Self {
        Self::with_limit(SCAN_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            visited: 0,
            limit,
            seen: HashSet::new(),
        }
    }

    /// Whether no node may be visited anymore.
    pub fn exhausted(&self) -> bool {
        self.visited >= self.limit
    }

    /// Consume one node of budget. Returns `false` once exhausted.
    pub fn charge(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }
        self.visited += 1;
        true
    }

    /// Record a container by identity; `false` if it was already scanned.
    ///
    /// Callers often hand in overlapping views of one tree (a state blob and
    /// one of its children); identity keeps the shared part from being
    /// scanned twice. Only valid for values that outlive the scan.
    pub fn first_visit(&mut self, node: &Value) -> bool {
        self.seen.insert(node as *const Value as usize)
    }

    /// Number of nodes visited so far.
    pub fn visited(&self) -> usize {
        self.visited
    }
}

impl Default for ScanBudget {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse text that looks like embedded JSON.
///
/// Accepts a clean document, or a script body with leading assignment noise
/// (`window.__STATE__ = {...};`): everything before the first `{`/`[` and a
/// trailing `;` are dropped.
pub fn parse_json_like(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str(trimmed) {
            return Some(v);
        }
    }
    let start = trimmed.find(['{', '['])?;
    let body = trimmed[start..].trim_end().trim_end_matches(';');
    match serde_json::from_str(body) {
        Ok(v) => Some(v),
        Err(e) => {
            super::skip_malformed("embedded state", e);
            None
        }
    }
}

/// Whether a string is worth attempting to parse as embedded JSON.
pub fn looks_like_json(text: &str) -> bool {
    let t = text.trim_start();
    (t.starts_with('{') && text.trim_end().ends_with('}'))
        || (t.starts_with('[') && text.trim_end().ends_with(']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_budget_exhausts() {
        let mut budget = ScanBudget::with_limit(2);
        assert!(budget.charge());
        assert!(budget.charge());
        assert!(!budget.charge());
        assert!(budget.exhausted());
        assert_eq!(budget.visited(), 2);
    }

    #[test]
    fn test_first_visit_by_identity() {
        let tree = json!({"a": {"b": 1}});
        let mut budget = ScanBudget::new();
        assert!(budget.first_visit(&tree["a"]));
        assert!(!budget.first_visit(&tree["a"]));
        assert!(budget.first_visit(&tree));
    }

    #[test]
    fn test_parse_json_like_with_assignment_noise() {
        let v = parse_json_like("window.__INITIAL_STATE__ = {\"a\": [1, 2]};").unwrap();
        assert_eq!(v["a"][1], 2);
    }

    #[test]
    fn test_parse_json_like_rejects_garbage() {
        assert!(parse_json_like("no json here").is_none());
        assert!(parse_json_like("{broken").is_none());
        assert!(parse_json_like("   ").is_none());
    }

    #[test]
    fn test_looks_like_json() {
        assert!(looks_like_json(r#"{"price":"1 299 ₽"}"#));
        assert!(looks_like_json("[1]"));
        assert!(!looks_like_json("1 299 ₽"));
    }
}
