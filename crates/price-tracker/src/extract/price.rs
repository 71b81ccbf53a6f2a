//! Price extraction.
//!
//! Three entry points, one per payload shape:
//! - [`from_document`]: parsed HTML: metadata, then JSON-LD, then the
//!   price widget text.
//! - [`from_html`]: raw HTML text: embedded `"price"` fragments, then a
//!   digits-before-currency match.
//! - [`from_json`]: composer/seller API responses and other nested blobs,
//!   walked under a [`ScanBudget`].
//!
//! Prices are whole currency units. Anything non-finite, zero or negative is
//! treated as "no price".

use regex::Regex;
use scraper::Html;
use serde_json::Value;
use std::sync::OnceLock;

use super::walk::{looks_like_json, parse_json_like, ScanBudget, MAX_DEPTH};
use super::{first_hit, selector, skip_malformed, Strategy};

/// Field names that carry a price directly, checked before a full scan.
pub const PRICE_FIELDS: &[&str] = &[
    "price",
    "finalPrice",
    "currentPrice",
    "priceValue",
    "convertedPrice",
    "totalPrice",
    "priceWithDiscount",
    "marketing_price",
    "cardPrice",
    "salePrice",
];

/// Keys holding the amount when a price field is itself an object.
const NESTED_AMOUNT_FIELDS: &[&str] = &["value", "amount", "units"];

/// Containers that render the live price on a product page.
const PRICE_WIDGETS: &str = r#"[data-widget="webCurrentPrice"], [data-widget="webDetailBlock"], [data-widget="webPricing"], [data-widget="webMainPrice"], [data-widget="webSale"]"#;

const DOCUMENT_STRATEGIES: &[Strategy<Html, u64>] = &[
    ("metadata", price_from_metadata),
    ("structured-data", price_from_structured_data),
    ("widget-text", price_from_widgets),
];

const HTML_STRATEGIES: &[Strategy<str, u64>] = &[
    ("nested-price-fragment", price_from_nested_fragment),
    ("max-price-field", price_from_price_fields),
    ("currency-suffix", price_from_currency_suffix),
];

fn currency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)₽|руб|rub").expect("currency regex is valid"))
}

/// Resolve a price from a parsed document.
pub fn from_document(doc: &Html) -> Option<u64> {
    first_hit(doc, DOCUMENT_STRATEGIES)
}

/// Resolve a price from raw HTML text without DOM queries.
pub fn from_html(html: &str) -> Option<u64> {
    let normalized = normalize_entities(html);
    first_hit(normalized.as_str(), HTML_STRATEGIES)
}

/// Resolve a price from a fetched page: document strategies first, then the
/// raw-text fallbacks.
pub fn from_page(html: &str) -> Option<u64> {
    let doc = Html::parse_document(html);
    from_document(&doc).or_else(|| from_html(html))
}

/// Resolve a price from an arbitrary JSON payload under a fresh budget.
pub fn from_json(node: &Value) -> Option<u64> {
    let mut budget = ScanBudget::new();
    from_json_with_budget(node, &mut budget)
}

/// Resolve a price from JSON, spending from a caller-owned budget.
///
/// Returns the first price found in precedence order, or `None` once the
/// budget or depth limit is hit without a match.
pub fn from_json_with_budget(node: &Value, budget: &mut ScanBudget) -> Option<u64> {
    walk_price(node, 0, false, budget)
}

// ── Document strategies ─────────────────────────────────────────────────────

fn price_from_metadata(doc: &Html) -> Option<u64> {
    let sel = selector(r#"meta[itemprop="price"], [itemprop="price"]"#)?;
    let el = doc.select(&sel).next()?;
    let raw = el
        .value()
        .attr("content")
        .filter(|c| !c.trim().is_empty())
        .map(|c| c.to_string())
        .unwrap_or_else(|| el.text().collect::<String>());
    digits_to_price(&raw)
}

fn price_from_structured_data(doc: &Html) -> Option<u64> {
    let sel = selector(r#"script[type="application/ld+json"]"#)?;
    for script in doc.select(&sel) {
        let text: String = script.text().collect();
        let data: Value = match serde_json::from_str(text.trim()) {
            Ok(v) => v,
            Err(e) => {
                skip_malformed("JSON-LD block", e);
                continue;
            }
        };
        if let Some(price) = jsonld_objects(&data)
            .into_iter()
            .find_map(price_from_jsonld_object)
        {
            return Some(price);
        }
    }
    None
}

/// Flatten top-level arrays and `@graph` containers into candidate objects.
pub(crate) fn jsonld_objects(data: &Value) -> Vec<&Value> {
    if let Some(items) = data.as_array() {
        return items.iter().collect();
    }
    if let Some(graph) = data.get("@graph").and_then(|g| g.as_array()) {
        let mut objects = vec![data];
        objects.extend(graph.iter());
        return objects;
    }
    vec![data]
}

fn price_from_jsonld_object(v: &Value) -> Option<u64> {
    let from_offers = match v.get("offers") {
        Some(Value::Array(offers)) => offers
            .iter()
            .filter_map(|o| o.get("price"))
            .find_map(coerce_price),
        Some(offer @ Value::Object(_)) => offer.get("price").and_then(coerce_price),
        _ => None,
    };
    from_offers.or_else(|| v.get("price").and_then(coerce_price))
}

fn price_from_widgets(doc: &Html) -> Option<u64> {
    let container_sel = selector(PRICE_WIDGETS)?;
    let container = doc.select(&container_sel).next()?;
    let text_sel = selector("span, div, p, strong")?;
    for node in container.select(&text_sel) {
        let text: String = node.text().collect();
        if text.chars().any(|c| c.is_ascii_digit()) && currency_re().is_match(&text) {
            if let Some(price) = digits_to_price(&text) {
                return Some(price);
            }
        }
    }
    digits_to_price(&container.text().collect::<String>())
}

// ── Raw HTML strategies ─────────────────────────────────────────────────────

fn price_from_nested_fragment(html: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#""price"\s*:\s*\{\s*"price"\s*:\s*(\d+)"#).expect("nested price regex is valid")
    });
    let caps = re.captures(html)?;
    digits_to_price(caps.get(1)?.as_str())
}

/// Highest of all embedded `"price": N` values.
///
/// Crossed-out and promotional prices tend to sit next to the real one and
/// are lower, so the maximum is taken.
fn price_from_price_fields(html: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#""price"\s*:\s*(\d+(?:\.\d+)?)"#).expect("price field regex is valid")
    });
    re.captures_iter(html)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .filter_map(float_to_price)
        .max()
}

fn price_from_currency_suffix(html: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)([0-9][0-9\s]{2,})\s*(₽|руб|rub)").expect("currency suffix regex is valid")
    });
    let caps = re.captures(html)?;
    digits_to_price(caps.get(1)?.as_str())
}

/// Replace the HTML entities and escapes that hide prices from the regexes.
pub fn normalize_entities(html: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"(?i)&nbsp;|&#160;|&#xa0;|&thinsp;|&#8201;|&#8239;|&quot;|&#34;|&#x22;|&#8381;|&#x20bd;|\\""#)
            .expect("entity regex is valid")
    });
    let replaced = re.replace_all(html, |caps: &regex::Captures<'_>| {
        let m = caps[0].to_ascii_lowercase();
        match m.as_str() {
            "&quot;" | "&#34;" | "&#x22;" | "\\\"" => "\"",
            "&#8381;" | "&#x20bd;" => "₽",
            _ => " ",
        }
    });
    replaced
        .chars()
        .map(|c| match c {
            '\u{a0}' | '\u{2009}' | '\u{202f}' => ' ',
            other => other,
        })
        .collect()
}

// ── JSON walk ───────────────────────────────────────────────────────────────

fn walk_price(node: &Value, depth: usize, in_price_field: bool, budget: &mut ScanBudget) -> Option<u64> {
    if depth > MAX_DEPTH || !budget.charge() {
        return None;
    }
    match node {
        Value::Number(_) if in_price_field => coerce_price(node),
        Value::String(s) if looks_like_json(s) => {
            let embedded = parse_json_like(s)?;
            walk_price(&embedded, depth + 1, in_price_field, budget)
        }
        Value::String(s) if in_price_field => parse_price_text(s),
        Value::Array(items) => {
            for item in items {
                if budget.exhausted() {
                    break;
                }
                if let Some(price) = walk_price(item, depth + 1, in_price_field, budget) {
                    return Some(price);
                }
            }
            None
        }
        Value::Object(map) => {
            let nested: &[&str] = if in_price_field {
                NESTED_AMOUNT_FIELDS
            } else {
                &[]
            };
            for key in PRICE_FIELDS.iter().chain(nested.iter()) {
                if let Some(value) = map.get(*key) {
                    if let Some(price) = walk_price(value, depth + 1, true, budget) {
                        return Some(price);
                    }
                }
            }
            for (key, value) in map {
                if budget.exhausted() {
                    break;
                }
                if PRICE_FIELDS.contains(&key.as_str()) || nested.contains(&key.as_str()) {
                    continue;
                }
                if let Some(price) = walk_price(value, depth + 1, false, budget) {
                    return Some(price);
                }
            }
            None
        }
        _ => None,
    }
}

// ── Number parsing ──────────────────────────────────────────────────────────

/// Keep only the digits of `text`. Decimal separators are discarded.
pub fn digits_to_price(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok().filter(|p| *p > 0)
}

/// Parse a human-formatted price such as `"1 299 ₽"` or `"1299.00"`.
pub fn parse_price_text(text: &str) -> Option<u64> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let normalized = if kept.contains('.') && kept.contains(',') {
        kept.replace(',', "")
    } else {
        kept.replace(',', ".")
    };
    let trimmed = normalized.trim_matches('.');
    trimmed.parse::<f64>().ok().and_then(float_to_price)
}

/// Coerce a JSON number or numeric string into a whole-unit price.
pub fn coerce_price(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(float_to_price),
        Value::String(s) => parse_price_text(s),
        _ => None,
    }
}

fn float_to_price(value: f64) -> Option<u64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let rounded = value.round();
    if rounded < 1.0 || rounded > u64::MAX as f64 {
        return None;
    }
    Some(rounded as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn test_metadata_wins_over_structured_data() {
        let d = doc(r#"
            <html><head>
            <meta itemprop="price" content="999">
            <script type="application/ld+json">{"@type":"Product","offers":{"price":888}}</script>
            </head><body></body></html>
        "#);
        assert_eq!(from_document(&d), Some(999));
    }

    #[test]
    fn test_metadata_strips_separators() {
        let d = doc(r#"<html><body><span itemprop="price">12 499 ₽</span></body></html>"#);
        assert_eq!(from_document(&d), Some(12499));
    }

    #[test]
    fn test_structured_data_skips_malformed_blocks() {
        let d = doc(r#"
            <html><head>
            <script type="application/ld+json">{not json</script>
            <script type="application/ld+json">{"@type":"Product","offers":[{"price":""},{"price":"3490.00"}]}</script>
            </head></html>
        "#);
        assert_eq!(from_document(&d), Some(3490));
    }

    #[test]
    fn test_structured_data_top_level_price_and_graph() {
        let d = doc(r#"
            <script type="application/ld+json">{"@graph":[{"@type":"WebSite"},{"@type":"Offer","price":1500}]}</script>
        "#);
        assert_eq!(from_document(&d), Some(1500));
    }

    #[test]
    fn test_widget_text_with_currency() {
        let d = doc(r#"
            <div data-widget="webPrice">ignored 5 ₽</div>
            <div data-widget="webCurrentPrice">
                <span>Цена с картой</span>
                <span>2 349 ₽</span>
                <span>3 000 ₽</span>
            </div>
        "#);
        assert_eq!(from_document(&d), Some(2349));
    }

    #[test]
    fn test_widget_falls_back_to_container_text() {
        let d = doc(r#"<div data-widget="webSale">4 100</div>"#);
        assert_eq!(from_document(&d), Some(4100));
    }

    #[test]
    fn test_document_without_price() {
        let d = doc("<html><body><h1>Нет цены</h1></body></html>");
        assert_eq!(from_document(&d), None);
    }

    #[test]
    fn test_html_nested_fragment() {
        let html = r#"<script>var s = {"price":{"price":1890,"currency":"RUB"}};</script>"#;
        assert_eq!(from_html(html), Some(1890));
    }

    #[test]
    fn test_html_takes_highest_price_field() {
        let html = r#"{"price": 990} {"price": 1290} {"price": 1100.6}"#;
        assert_eq!(from_html(html), Some(1290));
    }

    #[test]
    fn test_html_currency_suffix_after_entities() {
        let html = "<div>Итого 12&nbsp;345&nbsp;&#8381;</div>";
        assert_eq!(from_html(html), Some(12345));
    }

    #[test]
    fn test_html_escaped_quotes() {
        let html = r#"<div data-state="{&quot;price&quot;:{&quot;price&quot;:777}}"></div>"#;
        assert_eq!(from_html(html), Some(777));
    }

    #[test]
    fn test_page_prefers_document_over_regex() {
        let html = r#"<meta itemprop="price" content="500"><script>{"price": 9000}</script>"#;
        assert_eq!(from_page(html), Some(500));
    }

    #[test]
    fn test_json_composer_widget_state() {
        let composer = json!({
            "widgetStates": {
                "webGallery-1-default-1": "{\"images\":[\"a.jpg\"]}",
                "webPrice-3121879-default-1": "{\"isAvailable\":true,\"cardPrice\":\"1 150 ₽\",\"price\":\"1 299 ₽\",\"originalPrice\":\"2 000 ₽\"}"
            }
        });
        assert_eq!(from_json(&composer), Some(1299));
    }

    #[test]
    fn test_json_seller_response() {
        let seller = json!({
            "result": {
                "items": [{
                    "product_id": 1234567,
                    "price": {"price": "4590.0000", "old_price": "5200.0000"}
                }]
            }
        });
        assert_eq!(from_json(&seller), Some(4590));
    }

    #[test]
    fn test_json_rejects_non_positive() {
        assert_eq!(from_json(&json!({"price": 0})), None);
        assert_eq!(from_json(&json!({"price": -10, "finalPrice": 15})), Some(15));
        assert_eq!(from_json(&json!({"id": 1234567})), None);
    }

    #[test]
    fn test_json_depth_limit() {
        let mut node = json!({"price": 100});
        for _ in 0..10 {
            node = json!({ "inner": node });
        }
        assert_eq!(from_json(&node), None);

        let shallow = json!({"a": {"b": {"price": 100}}});
        assert_eq!(from_json(&shallow), Some(100));
    }

    #[test]
    fn test_json_budget_limit() {
        let mut items: Vec<Value> = (0..2000).map(|i| json!({ "id": i })).collect();
        items.push(json!({"price": 100}));
        assert_eq!(from_json(&json!({ "items": items })), None);

        let mut budget = ScanBudget::new();
        let early = json!([{"price": 55}, {"id": 1}]);
        assert_eq!(from_json_with_budget(&early, &mut budget), Some(55));
    }

    #[test]
    fn test_parse_price_text_variants() {
        assert_eq!(parse_price_text("1 299 ₽"), Some(1299));
        assert_eq!(parse_price_text("1299,60"), Some(1300));
        assert_eq!(parse_price_text("1,299.00"), Some(1299));
        assert_eq!(parse_price_text("бесплатно"), None);
        assert_eq!(parse_price_text("0"), None);
    }

    #[test]
    fn test_digits_to_price() {
        assert_eq!(digits_to_price("1 990,00"), Some(199000));
        assert_eq!(digits_to_price("—"), None);
        assert_eq!(digits_to_price("000"), None);
    }
}
