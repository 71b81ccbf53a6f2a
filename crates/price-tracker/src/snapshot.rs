//! Product-page snapshot: everything `track` needs, read from one page.

use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;
use url::Url;

use crate::extract::category::{extract_category_path, primary_category, CategorySources};
use crate::extract::{collapse_whitespace, price, selector};
use crate::types::ProductCandidate;

/// Facts read from a product page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSnapshot {
    pub id: Option<String>,
    pub url: String,
    pub title: String,
    pub image: Option<String>,
    pub price: Option<u64>,
    pub category_path: Vec<String>,
}

impl PageSnapshot {
    /// Read a fetched page.
    pub fn parse(url: &str, html: &str) -> Self {
        let doc = Html::parse_document(html);
        let title = parse_title(&doc);
        let price = price::from_document(&doc).or_else(|| price::from_html(html));
        let category_path = extract_category_path(
            CategorySources {
                document: Some(&doc),
                ..Default::default()
            },
            &title,
        );
        Self {
            id: parse_product_id(url),
            url: url.to_string(),
            image: parse_image(&doc, url),
            title,
            price,
            category_path,
        }
    }

    pub fn primary_category(&self) -> Option<&str> {
        primary_category(&self.category_path)
    }

    /// Candidate for `track`; `None` when the URL carries no product id.
    pub fn into_candidate(self) -> Option<ProductCandidate> {
        let category = self.primary_category().map(|s| s.to_string());
        Some(ProductCandidate {
            id: self.id?,
            title: self.title,
            url: self.url,
            image: self.image,
            current_price: self.price,
            target_price: None,
            category,
            category_path: self.category_path,
        })
    }
}

/// Marketplace product id embedded in a page URL.
///
/// Tries `/id/<digits>`, then `/product/<slug>-<digits>`, then the first run
/// of five or more digits in the path.
pub fn parse_product_id(url: &str) -> Option<String> {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    static PRODUCT_RE: OnceLock<Regex> = OnceLock::new();
    static DIGITS_RE: OnceLock<Regex> = OnceLock::new();

    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());

    let patterns = [
        ID_RE.get_or_init(|| Regex::new(r"id/(\d{5,})").expect("id regex is valid")),
        PRODUCT_RE.get_or_init(|| {
            Regex::new(r"product/[\w-]*?(\d{5,})/?").expect("product regex is valid")
        }),
        DIGITS_RE.get_or_init(|| Regex::new(r"(\d{5,})").expect("digits regex is valid")),
    ];
    patterns
        .iter()
        .find_map(|re| re.captures(&path).map(|c| c[1].to_string()))
}

fn parse_title(doc: &Html) -> String {
    if let Some(sel) = selector(r#"[data-widget="webProductHeading"] h1, h1, [itemprop="name"]"#) {
        if let Some(el) = doc.select(&sel).next() {
            return collapse_whitespace(&el.text().collect::<String>());
        }
    }
    selector("title")
        .and_then(|sel| doc.select(&sel).next().map(|el| el.text().collect::<String>()))
        .map(|t| collapse_whitespace(&t))
        .unwrap_or_default()
}

fn parse_image(doc: &Html, page_url: &str) -> Option<String> {
    if let Some(sel) = selector(r#"meta[property="og:image"]"#) {
        let og = doc
            .select(&sel)
            .filter_map(|el| el.value().attr("content"))
            .find(|c| !c.trim().is_empty());
        if let Some(content) = og {
            return Some(content.trim().to_string());
        }
    }
    let sel = selector("img")?;
    let src = doc.select(&sel).next()?.value().attr("src")?.trim();
    if src.is_empty() {
        return None;
    }
    match Url::parse(page_url).and_then(|base| base.join(src)) {
        Ok(absolute) => Some(absolute.to_string()),
        Err(_) => Some(src.to_string()),
    }
}
