//! Prices from structured payloads: XHR/fetch responses captured while the
//! page rendered, then JSON-LD and `__NEXT_DATA__` embedded in the HTML.

use crate::browser::CapturedResponse;
use crate::extract::locale;
use crate::model::{ExtractionResult, Source};
use serde_json::Value;

const PRICE_FIELDS: &[&str] = &[
    "price",
    "current_price",
    "currentPrice",
    "sale_price",
    "salePrice",
    "final_price",
    "finalPrice",
    "amount",
];
const ORIGINAL_FIELDS: &[&str] = &[
    "original_price",
    "originalPrice",
    "regular_price",
    "regularPrice",
    "list_price",
    "listPrice",
    "msrp",
    "compare_at_price",
];
const CURRENCY_FIELDS: &[&str] = &[
    "currency",
    "currency_code",
    "currencyCode",
    "priceCurrency",
    "currency_symbol",
];

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadPrice {
    pub value: f64,
    pub original: Option<f64>,
    pub currency: Option<String>,
    pub confidence: Option<f64>,
}

/// Depth-first search for the first object carrying a positive price field.
pub fn find_price(value: &Value) -> Option<PayloadPrice> {
    match value {
        Value::Object(map) => {
            let price = PRICE_FIELDS
                .iter()
                .filter_map(|f| map.get(*f))
                .filter_map(numeric)
                .find(|v| *v > 0.0);
            if let Some(price) = price {
                let original = ORIGINAL_FIELDS
                    .iter()
                    .filter_map(|f| map.get(*f))
                    .filter_map(numeric)
                    .find(|v| *v > 0.0);
                let currency = CURRENCY_FIELDS
                    .iter()
                    .filter_map(|f| map.get(*f))
                    .filter_map(|v| v.as_str())
                    .find_map(currency_code);
                let confidence = map
                    .get("confidence")
                    .and_then(|v| v.as_f64())
                    .filter(|c| *c > 0.0 && *c <= 1.0);
                return Some(PayloadPrice {
                    value: price,
                    original,
                    currency,
                    confidence,
                });
            }
            map.values().find_map(find_price)
        }
        Value::Array(items) => items.iter().find_map(find_price),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => locale::parse(s).map(|p| p.value),
        _ => None,
    }
}

fn currency_code(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() == 3 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(raw.to_uppercase());
    }
    locale::currency_for_symbol(raw)
}

/// Scan captured response bodies in arrival order.
pub fn from_responses(
    responses: &[CapturedResponse],
    default_currency: &str,
    default_confidence: f64,
) -> Option<ExtractionResult> {
    for response in responses {
        let Ok(body) = serde_json::from_str::<Value>(&response.body) else {
            tracing::trace!("Skipping non-JSON response from {}", response.url);
            continue;
        };
        if let Some(found) = find_price(&body) {
            tracing::info!("Price {} found in response from {}", found.value, response.url);
            return Some(to_result(found, "network_response", default_currency, default_confidence));
        }
    }
    None
}

/// Look for JSON-LD `Product` offers, then `__NEXT_DATA__`, in rendered HTML.
pub fn from_embedded_data(
    html: &str,
    default_currency: &str,
    default_confidence: f64,
) -> Option<ExtractionResult> {
    let doc = scraper::Html::parse_document(html);

    if let Ok(sel) = scraper::Selector::parse(r#"script[type="application/ld+json"]"#) {
        for el in doc.select(&sel) {
            let text: String = el.text().collect();
            let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            if let Some(found) = find_product(&parsed).and_then(|p| offers_price(p.get("offers")?)) {
                tracing::info!("Price {} found in JSON-LD Product data", found.value);
                return Some(to_result(found, "json_ld", default_currency, default_confidence));
            }
        }
    }

    if let Ok(sel) = scraper::Selector::parse("script#__NEXT_DATA__") {
        if let Some(el) = doc.select(&sel).next() {
            let text: String = el.text().collect();
            match serde_json::from_str::<Value>(&text) {
                Ok(parsed) => {
                    if let Some(found) = find_price(&parsed) {
                        tracing::info!("Price {} found in __NEXT_DATA__", found.value);
                        return Some(to_result(found, "next_data", default_currency, default_confidence));
                    }
                }
                Err(e) => tracing::warn!("Failed to parse __NEXT_DATA__: {}", e),
            }
        }
    }

    None
}

fn to_result(
    found: PayloadPrice,
    label: &str,
    default_currency: &str,
    default_confidence: f64,
) -> ExtractionResult {
    ExtractionResult {
        value: found.value,
        currency: found
            .currency
            .unwrap_or_else(|| default_currency.to_string()),
        source: Source::Network,
        confidence: found.confidence.unwrap_or(default_confidence),
        method_label: label.to_string(),
        original_value: found.original.filter(|o| *o > found.value),
    }
}

/// A `Product` node at the top level, in an array or in an `@graph`.
fn find_product(value: &Value) -> Option<&Value> {
    let is_product = |v: &Value| match v.get("@type") {
        Some(Value::String(t)) => t == "Product",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("Product")),
        _ => false,
    };

    if is_product(value) {
        return Some(value);
    }
    if let Some(items) = value.as_array() {
        return items.iter().find(|v| is_product(*v));
    }
    value
        .get("@graph")
        .and_then(|g| g.as_array())
        .and_then(|items| items.iter().find(|v| is_product(*v)))
}

/// Current and strikethrough price from an `offers` value (object or array).
fn offers_price(offers: &Value) -> Option<PayloadPrice> {
    if let Some(items) = offers.as_array() {
        return items.iter().find_map(offers_price);
    }

    let currency = offers
        .get("priceCurrency")
        .and_then(|v| v.as_str())
        .map(|s| s.to_uppercase());

    let direct = offers
        .get("price")
        .or_else(|| offers.get("lowPrice"))
        .and_then(numeric)
        .filter(|p| *p > 0.0);
    if let Some(value) = direct {
        return Some(PayloadPrice {
            value,
            original: offers.get("highPrice").and_then(numeric).filter(|h| *h > value),
            currency,
            confidence: None,
        });
    }

    let specs = offers.get("priceSpecification")?.as_array()?;
    let mut current = None;
    let mut strikethrough = None;
    let mut spec_currency = None;
    for spec in specs {
        let price = spec.get("price").and_then(numeric);
        let struck = spec
            .get("priceType")
            .and_then(|v| v.as_str())
            .map(|s| s.contains("StrikethroughPrice"))
            .unwrap_or(false);
        if struck {
            strikethrough = price;
        } else {
            current = price;
            if spec_currency.is_none() {
                spec_currency = spec
                    .get("priceCurrency")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_uppercase());
            }
        }
    }

    let value = current.filter(|p| *p > 0.0)?;
    Some(PayloadPrice {
        value,
        original: strikethrough.filter(|o| *o > value),
        currency: spec_currency.or(currency),
        confidence: None,
    })
}
