//! Category breadcrumb extraction.
//!
//! Sources, in precedence order (first non-empty wins):
//! 1. `category` metadata tags
//! 2. JSON-LD `BreadcrumbList` / `category`
//! 3. the on-page breadcrumb navigation
//! 4. the analytics event log (`dataLayer`)
//! 5. `<script type="application/json">` state chunks
//! 6. application state handed over from the page context
//!
//! Sources 4–6 are arbitrary nested blobs and are scanned under a
//! [`ScanBudget`].

use regex::Regex;
use scraper::Html;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::OnceLock;

use super::price::jsonld_objects;
use super::walk::{parse_json_like, ScanBudget, MAX_DEPTH};
use super::{collapse_whitespace, first_hit, selector, skip_malformed, Strategy};

/// Keys whose values are category labels.
pub const CATEGORY_KEYS: &[&str] = &[
    "category",
    "categoryName",
    "categoryTitle",
    "category_path",
    "categoryPath",
    "category_path_text",
    "catalogCategory",
    "catalogSection",
    "catalog_name",
    "categories",
    "categoryLabel",
    "sectionName",
    "superCategory",
];

/// Keys whose values are breadcrumb trails.
pub const BREADCRUMB_KEYS: &[&str] = &[
    "breadcrumbs",
    "breadCrumbs",
    "breadcrumb",
    "categoryBreadcrumbs",
    "categoryCrumbs",
    "path",
];

/// Label fields of a breadcrumb entry object.
const LABEL_FIELDS: &[&str] = &["name", "title", "text", "label"];

/// Generic root labels that never describe a category.
const HOME_LABELS: &[&str] = &["главная", "home"];

/// Script tags that carry serialized application state.
const STATE_SCRIPTS: &[&str] = &[
    r#"script[type="application/json"][data-state-chunk]"#,
    r#"script[type="application/json"][data-state]"#,
    r#"script[type="application/json"][id^="state-"]"#,
    r#"script[type="application/json"][id^="__NUXT_DATA__"]"#,
    r#"script[type="application/json"][id^="__NEXT_DATA__"]"#,
    r#"script[type="application/json"][id^="__APOLLO_STATE__"]"#,
];

/// Everything category extraction may look at.
#[derive(Default, Clone, Copy)]
pub struct CategorySources<'a> {
    /// The parsed product page.
    pub document: Option<&'a Html>,
    /// Events pushed to the page's analytics log.
    pub data_layer: &'a [Value],
    /// Application state blobs obtained from the page context.
    pub app_state: &'a [Value],
}

struct CategoryInput<'a> {
    sources: CategorySources<'a>,
    title: &'a str,
}

/// Resolve the category path for a product titled `title`.
pub fn extract_category_path(sources: CategorySources<'_>, title: &str) -> Vec<String> {
    let input = CategoryInput { sources, title };
    let strategies: [Strategy<CategoryInput<'_>, Vec<String>>; 6] = [
        ("metadata", from_metadata),
        ("structured-data", from_structured_data),
        ("breadcrumb-widget", from_breadcrumb_widget),
        ("data-layer", from_data_layer),
        ("state-scripts", from_state_scripts),
        ("app-state", from_app_state),
    ];
    first_hit(&input, &strategies).unwrap_or_default()
}

/// Last element of a category path.
pub fn primary_category(path: &[String]) -> Option<&str> {
    path.last().map(|s| s.as_str())
}

/// Clean a candidate list.
///
/// Whitespace is collapsed, home labels and echoes of the product title are
/// dropped, and duplicates are removed case-insensitively keeping the first.
pub fn sanitize_category_parts<S: AsRef<str>>(parts: &[S], title: &str) -> Vec<String> {
    let lowered_title = title.trim().to_lowercase();
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for raw in parts {
        let normalized = collapse_whitespace(raw.as_ref());
        if normalized.is_empty() {
            continue;
        }
        let lowered = normalized.to_lowercase();
        if HOME_LABELS.contains(&lowered.as_str()) {
            continue;
        }
        if !lowered_title.is_empty() && lowered == lowered_title {
            continue;
        }
        if seen.insert(lowered) {
            unique.push(normalized);
        }
    }
    unique
}

fn non_empty(parts: Vec<String>, title: &str) -> Option<Vec<String>> {
    let clean = sanitize_category_parts(&parts, title);
    if clean.is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn split_meta(text: &str) -> impl Iterator<Item = String> + '_ {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[,>\n\r|\\/]+").expect("meta split regex is valid"));
    re.split(text)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
}

/// Split a state-blob label on breadcrumb separators.
pub fn split_state_label(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\s*[>›»«/|,\n\r]+\s*").expect("state split regex is valid")
    });
    re.split(text)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

// ── Document strategies ─────────────────────────────────────────────────────

fn from_metadata(input: &CategoryInput<'_>) -> Option<Vec<String>> {
    let doc = input.sources.document?;
    let sel = selector(
        r#"meta[itemprop="category"], meta[property="product:category"], meta[name="category"], meta[name="product:category"]"#,
    )?;
    let mut parts = Vec::new();
    for el in doc.select(&sel) {
        let content = el
            .value()
            .attr("content")
            .or_else(|| el.value().attr("value"))
            .map(|s| s.to_string())
            .unwrap_or_else(|| el.text().collect());
        parts.extend(split_meta(&content));
    }
    non_empty(parts, input.title)
}

fn from_structured_data(input: &CategoryInput<'_>) -> Option<Vec<String>> {
    let doc = input.sources.document?;
    let sel = selector(r#"script[type="application/ld+json"]"#)?;
    let mut parts = Vec::new();
    for script in doc.select(&sel) {
        let text: String = script.text().collect();
        let data: Value = match serde_json::from_str(text.trim()) {
            Ok(v) => v,
            Err(e) => {
                skip_malformed("JSON-LD block", e);
                continue;
            }
        };
        for object in jsonld_objects(&data) {
            parts.extend(categories_from_jsonld(object));
        }
    }
    non_empty(parts, input.title)
}

fn categories_from_jsonld(data: &Value) -> Vec<String> {
    if data.get("@type").and_then(|t| t.as_str()) == Some("BreadcrumbList") {
        if let Some(items) = data.get("itemListElement").and_then(|l| l.as_array()) {
            return items
                .iter()
                .filter_map(|item| {
                    item.get("name")
                        .or_else(|| item.get("item").and_then(|i| i.get("name")))
                        .and_then(|n| n.as_str())
                        .map(|s| s.to_string())
                })
                .collect();
        }
    }
    match data.get("category").and_then(|c| c.as_str()) {
        Some(category) => split_meta(category).collect(),
        None => Vec::new(),
    }
}

fn from_breadcrumb_widget(input: &CategoryInput<'_>) -> Option<Vec<String>> {
    let doc = input.sources.document?;
    let widget_sel = selector(
        r#"[data-widget="webBreadcrumbs"], nav[aria-label*="крош"], nav[aria-label*="bread"], nav[aria-label*="Bread"]"#,
    )?;
    let widget = doc.select(&widget_sel).next()?;
    let label_sel = selector("a span, a, li span")?;
    let parts: Vec<String> = widget
        .select(&label_sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    non_empty(parts, input.title)
}

fn from_data_layer(input: &CategoryInput<'_>) -> Option<Vec<String>> {
    if input.sources.data_layer.is_empty() {
        return None;
    }
    non_empty(scan_values(input.sources.data_layer), input.title)
}

fn from_state_scripts(input: &CategoryInput<'_>) -> Option<Vec<String>> {
    let doc = input.sources.document?;
    let blobs = state_blobs_from_document(doc);
    if blobs.is_empty() {
        return None;
    }
    non_empty(scan_values(&blobs), input.title)
}

fn from_app_state(input: &CategoryInput<'_>) -> Option<Vec<String>> {
    if input.sources.app_state.is_empty() {
        return None;
    }
    non_empty(scan_values(input.sources.app_state), input.title)
}

/// Parse every state-carrying script tag of the document.
pub fn state_blobs_from_document(doc: &Html) -> Vec<Value> {
    let mut blobs = Vec::new();
    for css in STATE_SCRIPTS {
        let Some(sel) = selector(css) else {
            continue;
        };
        for script in doc.select(&sel) {
            let text: String = script.text().collect();
            if let Some(value) = parse_json_like(&text) {
                blobs.push(value);
            }
        }
    }
    blobs
}

// ── Bounded scan ────────────────────────────────────────────────────────────

/// Collect raw category labels from `values` under one shared budget.
pub fn scan_values<'v, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'v Value>,
{
    let mut budget = ScanBudget::new();
    let mut collected = Vec::new();
    for value in values {
        if budget.exhausted() {
            break;
        }
        scan(value, 0, &mut budget, &mut collected);
    }
    collected
}

/// Walk containers looking for category- and breadcrumb-shaped keys.
pub fn scan(node: &Value, depth: usize, budget: &mut ScanBudget, out: &mut Vec<String>) {
    if depth > MAX_DEPTH || budget.exhausted() {
        return;
    }
    match node {
        Value::Array(items) => {
            if !budget.charge() {
                return;
            }
            for item in items {
                if budget.exhausted() {
                    break;
                }
                scan(item, depth + 1, budget, out);
            }
        }
        Value::Object(map) => {
            if !budget.first_visit(node) || !budget.charge() {
                return;
            }
            scan_object(map, depth, budget, out);
        }
        _ => {
            budget.charge();
        }
    }
}

fn scan_object(map: &Map<String, Value>, depth: usize, budget: &mut ScanBudget, out: &mut Vec<String>) {
    for key in CATEGORY_KEYS {
        if let Some(value) = map.get(*key) {
            collect_labels(value, depth + 1, budget, out);
        }
    }
    for key in BREADCRUMB_KEYS {
        if let Some(value) = map.get(*key) {
            collect_crumbs(value, depth + 1, budget, out);
        }
    }
    if map.get("@type").and_then(|t| t.as_str()) == Some("BreadcrumbList") {
        if let Some(items) = map.get("itemListElement") {
            collect_crumbs(items, depth + 1, budget, out);
        }
    }
    for (key, value) in map {
        if budget.exhausted() {
            break;
        }
        let key = key.as_str();
        if CATEGORY_KEYS.contains(&key) || BREADCRUMB_KEYS.contains(&key) {
            continue;
        }
        if value.is_object() || value.is_array() {
            scan(value, depth + 1, budget, out);
        }
    }
}

/// Value found under a category key.
fn collect_labels(value: &Value, depth: usize, budget: &mut ScanBudget, out: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::String(s) => {
            if budget.charge() {
                out.extend(split_state_label(s));
            }
        }
        Value::Array(items) => {
            if !budget.charge() {
                return;
            }
            for item in items {
                if budget.exhausted() {
                    break;
                }
                collect_labels(item, depth + 1, budget, out);
            }
        }
        Value::Object(map) => {
            if let Some(label) = entry_label(map) {
                out.extend(split_state_label(label));
            }
            scan(value, depth, budget, out);
        }
        _ => {
            budget.charge();
        }
    }
}

/// Value found under a breadcrumb key: a trail of labels or entry objects.
fn collect_crumbs(value: &Value, depth: usize, budget: &mut ScanBudget, out: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Array(entries) => {
            if !budget.charge() {
                return;
            }
            for entry in entries {
                if !budget.charge() {
                    break;
                }
                match entry {
                    Value::String(s) => out.extend(split_state_label(s)),
                    Value::Object(map) => {
                        if let Some(label) = entry_label(map)
                            .or_else(|| map.get("item").and_then(|i| i.get("name")).and_then(|n| n.as_str()))
                        {
                            out.extend(split_state_label(label));
                        }
                    }
                    _ => {}
                }
            }
        }
        Value::Object(_) => scan(value, depth, budget, out),
        _ => {}
    }
}

fn entry_label(map: &Map<String, Value>) -> Option<&str> {
    LABEL_FIELDS
        .iter()
        .filter_map(|k| map.get(*k).and_then(|v| v.as_str()))
        .find(|s| !s.trim().is_empty())
}
