//! Product-name hints used to score DOM candidates.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/products?/([^/?#]+)",
        r"/p/([^/?#]+)",
        r"/item/([^/?#]+)",
        r"/shop/([^/?#]+)",
        r"/buy/([^/?#]+)",
        r"/collections/[^/]+/products/([^/?#]+)",
        r"/productpage\.(\d+)\.html",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid url pattern"))
    .collect()
});

/// Headings and title-ish selectors checked when the URL carries no name.
pub const NAME_SELECTORS: &[&str] = &[
    "h1",
    ".product-title",
    ".product-name",
    "[data-testid*='product-name']",
    "[itemprop='name']",
    ".pdp-title",
];

const BOILERPLATE: &[&str] = &["cookie", "privacy", "terms", "shipping", "delivery"];

/// Derive a lowercase, space-separated name from the URL path.
pub fn from_url(raw_url: &str) -> Option<String> {
    let path = match Url::parse(raw_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => raw_url.to_string(),
    };

    let slug = URL_PATTERNS
        .iter()
        .filter_map(|re| re.captures(&path))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .next()
        .or_else(|| {
            path.trim_end_matches('/')
                .rsplit('/')
                .next()
                .map(|s| s.to_string())
        })?;

    let stem = match slug.rsplit_once('.') {
        Some((stem, ext)) if ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            stem
        }
        _ => slug.as_str(),
    };

    let name = clean(&stem.replace(['-', '_', '.'], " "));
    let has_letters = name.chars().any(|c| c.is_alphabetic());
    if name.len() < 3 || !has_letters {
        return None;
    }
    Some(name)
}

/// Pick a name from heading texts (in selector order) or, failing that, the
/// page title with its site suffix removed.
pub fn from_page(headings: &[String], title: &str) -> Option<String> {
    for text in headings {
        let text = text.trim();
        let lower = text.to_lowercase();
        if text.chars().count() < 3 || BOILERPLATE.iter().any(|b| lower.contains(b)) {
            continue;
        }
        return Some(clean(&lower));
    }

    let mut title = title.trim();
    for sep in [" | ", " - "] {
        if let Some((head, _)) = title.split_once(sep) {
            title = head;
        }
    }
    let title = clean(&title.to_lowercase());
    if title.len() < 3 {
        return None;
    }
    Some(title)
}

fn clean(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Name tokens long enough to count as keywords.
pub fn keywords(name: &str) -> Vec<String> {
    name.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() > 2)
        .collect()
}
