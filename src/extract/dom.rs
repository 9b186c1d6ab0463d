use crate::error::ExtractError;
use crate::extract::locale;
use crate::extract::scoring::{self, ScoredCandidate};
use crate::model::{ExtractionResult, PriceCandidate, Source};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Ordered from most to least specific. The overlap is deliberate: an element
/// matched by several selectors is kept once, under the first one.
pub const PRICE_SELECTORS: &[&str] = &[
    // Explicit price attributes
    "[data-price]",
    "[data-current-price]",
    "[data-product-price]",
    "[itemprop='price']",
    // Common price classes
    ".product-price",
    ".current-price",
    ".sale-price",
    ".price-current",
    ".final-price",
    ".price",
    // Class and id patterns
    "[class*='price']",
    "[class*='Price']",
    "[id*='price']",
    "[data-testid*='price']",
    // Currency widgets
    ".money",
    ".a-price",
    ".a-offscreen",
    ".amount",
    // Generic fallback
    "span",
    "strong",
    "b",
    "p",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "div",
];

const SKIP_TAGS: &[&str] = &["img", "image", "svg", "canvas", "picture", "video", "script", "style"];
const HIDDEN_ANCESTORS: &[&str] = &["script", "style", "noscript", "template", "head"];
const STRUCK_TAGS: &[&str] = &["del", "s", "strike"];
const STRUCK_CLASSES: &[&str] = &["strike", "was-price", "old-price", "compare-at", "price--compare"];

const FINANCING: &[&str] = &[
    "/mo",
    "per month",
    "monthly",
    "affirm",
    "klarna",
    "afterpay",
    "starting at",
    "as low as",
];
const FEE_WORDS: &[&str] = &[
    "fee", "tax", "shipping", "delivery", "cable", "adapter", "charger", "strap", "warranty",
];
const IMAGE_MARKERS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif", ".svg", "cdn."];

/// Elements with more text than this are containers, not price labels.
const MAX_ELEMENT_TEXT: usize = 300;
const CONTEXT_CHARS: usize = 200;

static APR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bapr\b").expect("valid apr pattern"));

/// Confidence reported for a DOM-derived price.
pub const DOM_CONFIDENCE: f64 = 0.6;

/// Collect every price-looking number in the rendered page.
pub fn extract_candidates(html: &str) -> Vec<PriceCandidate> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut sources = HashSet::new();
    let mut candidates = Vec::new();

    for selector_str in PRICE_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            tracing::warn!("Skipping unparsable selector {}", selector_str);
            continue;
        };

        for element in doc.select(&selector) {
            if !seen.insert(element.id()) {
                continue;
            }
            if !is_candidate_element(&element) {
                continue;
            }
            // A wrapper around an element we already took adds nothing new
            if element.descendants().any(|d| sources.contains(&d.id())) {
                continue;
            }

            let text = element_text(&element);
            if text.is_empty() || text.chars().count() > MAX_ELEMENT_TEXT {
                continue;
            }
            if !locale::has_currency_marker(&text) || is_noise_text(&text) {
                continue;
            }

            let context = element
                .parent()
                .and_then(ElementRef::wrap)
                .map(|parent| element_text(&parent))
                .unwrap_or_else(|| text.clone());
            let context: String = context.chars().take(CONTEXT_CHARS).collect();

            let lower = text.to_lowercase();
            let before = candidates.len();
            for parsed in locale::extract_all(&text) {
                if parsed.value < 10.0 && FEE_WORDS.iter().any(|w| lower.contains(w)) {
                    continue;
                }
                candidates.push(PriceCandidate {
                    value: parsed.value,
                    currency_hint: parsed.currency,
                    source_text: text.clone(),
                    selector: selector_str.to_string(),
                    context: context.clone(),
                });
            }
            if candidates.len() > before {
                sources.insert(element.id());
            }
        }
    }

    tracing::debug!("Collected {} DOM price candidates", candidates.len());
    candidates
}

/// Generate candidates from `html` and pick the best one for `name`.
pub fn extract(html: &str, name: &str, default_currency: &str) -> Result<ExtractionResult, ExtractError> {
    let candidates = extract_candidates(html);
    if candidates.is_empty() {
        return Err(ExtractError::NotFound(
            "no currency-marked text in page".to_string(),
        ));
    }

    let ScoredCandidate {
        candidate, score, ..
    } = scoring::select_best(&candidates, name).ok_or_else(|| {
        ExtractError::NotFound(format!(
            "none of {} DOM candidates survived scoring",
            candidates.len()
        ))
    })?;

    tracing::info!(
        "DOM candidate {} selected via {} (score {:.1})",
        candidate.value,
        candidate.selector,
        score
    );

    Ok(ExtractionResult {
        value: candidate.value,
        currency: candidate
            .currency_hint
            .unwrap_or_else(|| default_currency.to_string()),
        source: Source::Dom,
        confidence: DOM_CONFIDENCE,
        method_label: format!("dom:{}", candidate.selector),
        original_value: None,
    })
}

/// Visible text of the page body.
pub fn page_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    match Selector::parse("body") {
        Ok(sel) => doc
            .select(&sel)
            .next()
            .map(|body| element_text(&body))
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Text a shopper would see: hidden, struck-through and non-text children
/// are left out.
fn element_text(element: &ElementRef) -> String {
    let mut parts = Vec::new();
    collect_visible_text(element, &mut parts);
    parts
        .iter()
        .flat_map(|p| p.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn collect_visible_text<'a>(element: &ElementRef<'a>, out: &mut Vec<&'a str>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if !is_excluded(&child_el) {
                collect_visible_text(&child_el, out);
            }
        }
    }
}

fn is_excluded(element: &ElementRef) -> bool {
    let tag = element.value().name();
    SKIP_TAGS.contains(&tag)
        || HIDDEN_ANCESTORS.contains(&tag)
        || is_hidden(element)
        || is_struck(element)
}

fn is_candidate_element(element: &ElementRef) -> bool {
    if is_excluded(element) {
        return false;
    }
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .all(|a| !is_excluded(&a))
}

fn is_hidden(element: &ElementRef) -> bool {
    let el = element.value();
    if el.attr("hidden").is_some() || el.attr("aria-hidden") == Some("true") {
        return true;
    }
    el.attr("style")
        .map(|s| {
            let s = s.replace(' ', "").to_lowercase();
            s.contains("display:none") || s.contains("visibility:hidden")
        })
        .unwrap_or(false)
}

fn is_struck(element: &ElementRef) -> bool {
    let el = element.value();
    if STRUCK_TAGS.contains(&el.name()) {
        return true;
    }
    el.classes()
        .any(|c| STRUCK_CLASSES.iter().any(|s| c.to_lowercase().contains(s)))
}

fn is_noise_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    FINANCING.iter().any(|f| lower.contains(f))
        || APR.is_match(&lower)
        || IMAGE_MARKERS.iter().any(|m| lower.contains(m))
}
