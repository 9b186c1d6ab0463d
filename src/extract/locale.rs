//! Locale-aware price text parsing.
//!
//! Handles US/UK grouping (`$1,234.56`), European grouping (`€1.234,56`),
//! bare symbol amounts (`$123.45`) and, as a last resort, any decimal token.

use regex::Regex;
use std::sync::LazyLock;

const SYMBOL: &str = r"US\$|CA\$|C\$|AU\$|A\$|R\$|\$|£|€|¥|₹|₩|CHF|USD|EUR|GBP|CAD|AUD|JPY|INR";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrice {
    pub value: f64,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Grouping {
    /// Commas group thousands, dot is decimal.
    Us,
    /// Dots or spaces group thousands, comma is decimal.
    European,
    /// No grouping; either separator may be the decimal point.
    Plain,
    /// Unknown shape, resolved by [`normalize_separators`].
    Guess,
}

struct Pattern {
    regex: Regex,
    grouping: Grouping,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    let build = |src: String, grouping| Pattern {
        regex: Regex::new(&src).expect("valid price pattern"),
        grouping,
    };
    vec![
        build(
            format!(r"(?:({SYMBOL})\s*)?\b(\d{{1,3}}(?:,\d{{3}})+(?:\.\d{{1,2}})?)\b"),
            Grouping::Us,
        ),
        build(
            format!(r"(?:({SYMBOL})\s*)?\b(\d{{1,3}}(?:[.\s]\d{{3}})+(?:,\d{{1,2}})?)\b"),
            Grouping::European,
        ),
        build(
            format!(r"({SYMBOL})\s*\b(\d+(?:[.,]\d{{1,2}})?)\b"),
            Grouping::Plain,
        ),
        build(r"()\b(\d+(?:[.,]\d+)*)\b".to_string(), Grouping::Guess),
    ]
});

static PREFIXED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"({SYMBOL})\s*(\d+(?:[.,\u{{a0}}\u{{202f}}]\d+)*)"))
        .expect("valid prefixed pattern")
});

static SUFFIXED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(\d+(?:[.,\u{{a0}}\u{{202f}}]\d+)*)\s*({SYMBOL})"))
        .expect("valid suffixed pattern")
});

static ISO_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(USD|EUR|GBP|CHF|CAD|AUD|JPY|INR|KRW)\b").expect("valid currency pattern")
});

/// Parse the first price in `text`.
///
/// Patterns are tried in a fixed order and the first one that matches wins;
/// results are never combined across patterns.
pub fn parse(text: &str) -> Option<ParsedPrice> {
    for pattern in PATTERNS.iter() {
        let Some(caps) = pattern.regex.captures(text) else {
            continue;
        };
        let raw = caps.get(2)?.as_str();
        let value = match pattern.grouping {
            Grouping::Us => raw.replace(',', "").parse().ok(),
            Grouping::European => raw
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == ',')
                .collect::<String>()
                .replace(',', ".")
                .parse()
                .ok(),
            Grouping::Plain => raw.replace(',', ".").parse().ok(),
            Grouping::Guess => normalize_separators(raw),
        };
        let Some(value) = value else {
            continue;
        };
        let currency = caps
            .get(1)
            .and_then(|m| currency_for_symbol(m.as_str()))
            .or_else(|| detect_currency(text));
        return Some(ParsedPrice { value, currency });
    }
    None
}

/// Every currency-marked amount in `text`, in document order.
///
/// Unlike [`parse`], a bare number without a symbol or ISO code next to it
/// is not reported.
pub fn extract_all(text: &str) -> Vec<ParsedPrice> {
    let mut found: Vec<(usize, usize, ParsedPrice)> = Vec::new();

    for caps in PREFIXED.captures_iter(text) {
        let (Some(sym), Some(num)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if let Some(value) = normalize_separators(num.as_str()) {
            found.push((
                num.start(),
                num.end(),
                ParsedPrice {
                    value,
                    currency: currency_for_symbol(sym.as_str()),
                },
            ));
        }
    }

    for caps in SUFFIXED.captures_iter(text) {
        let (Some(num), Some(sym)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let overlaps = found
            .iter()
            .any(|(start, end, _)| num.start() < *end && *start < num.end());
        if overlaps {
            continue;
        }
        if let Some(value) = normalize_separators(num.as_str()) {
            found.push((
                num.start(),
                num.end(),
                ParsedPrice {
                    value,
                    currency: currency_for_symbol(sym.as_str()),
                },
            ));
        }
    }

    found.sort_by_key(|(start, _, _)| *start);
    found
        .into_iter()
        .map(|(_, _, price)| price)
        .filter(|p| p.value > 0.0 && p.value <= 1_000_000.0)
        .collect()
}

/// Resolve a digit run that may contain `.`, `,` or narrow spaces.
///
/// A separator followed by exactly three digits groups thousands; otherwise
/// the last separator is the decimal point.
pub fn normalize_separators(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let Some(last_sep) = cleaned.rfind(['.', ',']) else {
        return cleaned.parse().ok();
    };
    let head: String = cleaned[..last_sep]
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    let tail = &cleaned[last_sep + 1..];

    let normalized = if tail.len() == 3 || tail.is_empty() {
        format!("{}{}", head, tail)
    } else {
        format!("{}.{}", head, tail)
    };

    normalized.parse().ok()
}

pub fn currency_for_symbol(symbol: &str) -> Option<String> {
    let code = match symbol.trim() {
        "$" | "US$" | "USD" => "USD",
        "€" | "EUR" => "EUR",
        "£" | "GBP" => "GBP",
        "CHF" => "CHF",
        "CA$" | "C$" | "CAD" => "CAD",
        "A$" | "AU$" | "AUD" => "AUD",
        "R$" => "BRL",
        "¥" | "JPY" => "JPY",
        "₹" | "INR" => "INR",
        "₩" | "KRW" => "KRW",
        _ => return None,
    };
    Some(code.to_string())
}

/// Currency mentioned anywhere in `text`, by ISO code or symbol.
pub fn detect_currency(text: &str) -> Option<String> {
    if let Some(m) = ISO_CODE.find(text) {
        return Some(m.as_str().to_string());
    }
    ["€", "£", "¥", "₹", "₩", "$"]
        .iter()
        .find(|sym| text.contains(**sym))
        .and_then(|sym| currency_for_symbol(sym))
}

/// Whether `text` carries any currency marker.
pub fn has_currency_marker(text: &str) -> bool {
    ["$", "€", "£", "¥", "₹", "₩"].iter().any(|s| text.contains(s)) || ISO_CODE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(int: u64, sep: char) -> String {
        let digits = int.to_string();
        let mut out = String::new();
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                out.push(sep);
            }
            out.push(c);
        }
        out
    }

    fn split(v: f64) -> (u64, u64) {
        let cents = (v * 100.0).round() as u64;
        (cents / 100, cents % 100)
    }

    fn us(v: f64) -> String {
        let (int, frac) = split(v);
        format!("${}.{:02}", group(int, ','), frac)
    }

    fn european(v: f64) -> String {
        let (int, frac) = split(v);
        format!("€{},{:02}", group(int, '.'), frac)
    }

    fn bare(v: f64) -> String {
        format!("${:.2}", v)
    }

    #[test]
    fn test_round_trip_all_formats() {
        let values = [
            0.5, 1.0, 9.99, 49.95, 123.45, 999.0, 1000.0, 1234.56, 99_999.99, 1_234_567.89,
        ];
        for v in values {
            for text in [us(v), european(v), bare(v)] {
                let parsed = parse(&text).unwrap_or_else(|| panic!("no price in {text}"));
                assert!(
                    (parsed.value - v).abs() < 1e-6,
                    "{text} parsed as {}",
                    parsed.value
                );
            }
        }
    }

    #[test]
    fn test_currency_from_symbol() {
        assert_eq!(parse("$1,234.56").unwrap().currency.as_deref(), Some("USD"));
        assert_eq!(parse("€1.234,56").unwrap().currency.as_deref(), Some("EUR"));
        assert_eq!(parse("£12.00").unwrap().currency.as_deref(), Some("GBP"));
        assert_eq!(parse("CHF 19.90").unwrap().currency.as_deref(), Some("CHF"));
    }

    #[test]
    fn test_currency_from_trailing_code() {
        let parsed = parse("49,90 EUR").unwrap();
        assert!((parsed.value - 49.9).abs() < 1e-9);
        assert_eq!(parsed.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_permissive_token_fallback() {
        let parsed = parse("Total 42").unwrap();
        assert_eq!(parsed.value, 42.0);
        assert_eq!(parsed.currency, None);
    }

    #[test]
    fn test_no_digits_is_not_found() {
        assert!(parse("Price on request").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn test_normalize_separators() {
        assert_eq!(normalize_separators("1,234.56"), Some(1234.56));
        assert_eq!(normalize_separators("1.234,56"), Some(1234.56));
        assert_eq!(normalize_separators("1,000"), Some(1000.0));
        assert_eq!(normalize_separators("1.234.567"), Some(1_234_567.0));
        assert_eq!(normalize_separators("23,99"), Some(23.99));
        assert_eq!(normalize_separators("19.9"), Some(19.9));
        assert_eq!(normalize_separators("250"), Some(250.0));
        assert_eq!(normalize_separators("..."), None);
    }

    #[test]
    fn test_extract_all_keeps_every_marked_amount() {
        let prices = extract_all("Was $129.99, now $99.99 (save 23%)");
        let values: Vec<f64> = prices.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![129.99, 99.99]);
    }

    #[test]
    fn test_extract_all_suffixed_symbol() {
        let prices = extract_all("Prix: 1.299,00 € TTC");
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].value, 1299.0);
        assert_eq!(prices[0].currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_extract_all_ignores_unmarked_numbers() {
        assert!(extract_all("Model 2024, 3 colors").is_empty());
    }
}
