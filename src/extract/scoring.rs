//! Contextual scoring of DOM price candidates.
//!
//! A score is a plain sum of independent rule contributions. It has no fixed
//! scale and only means something relative to other candidates scored
//! against the same product name. Rules do not read each other's output, so
//! any of them can be added or removed without touching the rest.

use crate::category::Category;
use crate::extract::product_name::keywords;
use crate::model::PriceCandidate;

/// Below this median, the median filter leaves candidates alone.
pub const MEDIAN_FILTER_THRESHOLD: f64 = 100.0;
/// Luxury items never sell for less than this; cheaper candidates are fees or accessories.
pub const LUXURY_PRICE_FLOOR: f64 = 50.0;

const PURCHASE_INTENT: &[&str] = &["add to cart", "add to bag", "buy now", "purchase", "checkout"];
const PRICE_TERMS: &[&str] = &["sale", "current", "price", "cost", "amount"];
const RELATED_CONTENT: &[&str] = &[
    "related",
    "recommended",
    "similar",
    "upgrade",
    "you might also like",
    "you may also like",
    "more from this collection",
    "customers also",
    "frequently bought",
];
const NEGATIVE_CONTEXT: &[&str] = &[
    "was ",
    "originally",
    "compare at",
    "list price",
    "rrp",
    "msrp",
    "regular price",
    "shipping",
    "delivery",
    "gift card",
    "per item",
    "bundle",
];
const HISTORICAL: &[&str] = &[
    "sold for",
    "selling",
    "units",
    "priced at",
    "launched at",
    "in 2019",
    "in 202",
    "last year",
    "history",
];
const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹', '₩'];

/// What a rule gets to look at.
pub struct ScoreInput<'a> {
    pub candidate: &'a PriceCandidate,
    /// Lowercased element text and context.
    pub text: String,
    /// Lowercased product name; empty when no hint is known.
    pub name: &'a str,
    pub keywords: &'a [String],
}

pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&ScoreInput) -> f64,
}

pub const RULES: &[Rule] = &[
    Rule { name: "keyword_hits", apply: keyword_hits },
    Rule { name: "keyword_coverage", apply: keyword_coverage },
    Rule { name: "exact_name", apply: exact_name },
    Rule { name: "selector_specificity", apply: selector_specificity },
    Rule { name: "purchase_intent", apply: purchase_intent },
    Rule { name: "price_terms", apply: price_terms },
    Rule { name: "currency_crowding", apply: currency_crowding },
    Rule { name: "related_content", apply: related_content },
    Rule { name: "negative_context", apply: negative_context },
    Rule { name: "historical", apply: historical },
    Rule { name: "unrelated_words", apply: unrelated_words },
];

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: PriceCandidate,
    pub score: f64,
    pub breakdown: Vec<(&'static str, f64)>,
}

pub fn score(candidate: &PriceCandidate, name: &str) -> ScoredCandidate {
    let name = name.trim().to_lowercase();
    let keywords = keywords(&name);
    let input = ScoreInput {
        candidate,
        text: format!("{} {}", candidate.source_text, candidate.context).to_lowercase(),
        name: &name,
        keywords: &keywords,
    };

    let mut total = 0.0;
    let mut breakdown = Vec::new();
    for rule in RULES {
        let points = (rule.apply)(&input);
        if points != 0.0 {
            breakdown.push((rule.name, points));
            total += points;
        }
    }

    ScoredCandidate {
        candidate: candidate.clone(),
        score: total,
        breakdown,
    }
}

/// Drop candidates that cannot be the product price.
///
/// With a median above [`MEDIAN_FILTER_THRESHOLD`], values under a tenth of
/// it or over ten times it are noise. Luxury products also lose everything
/// under [`LUXURY_PRICE_FLOOR`].
pub fn prefilter(candidates: &[PriceCandidate], name: &str) -> Vec<PriceCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut values: Vec<f64> = candidates.iter().map(|c| c.value).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let median = values[values.len() / 2];
    let luxury = !name.is_empty() && Category::classify(name) == Category::Luxury;

    candidates
        .iter()
        .filter(|c| {
            if median > MEDIAN_FILTER_THRESHOLD
                && (c.value < median * 0.1 || c.value > median * 10.0)
            {
                tracing::trace!("Median filter dropped {} (median {})", c.value, median);
                return false;
            }
            if luxury && c.value < LUXURY_PRICE_FLOOR {
                tracing::trace!("Luxury floor dropped {}", c.value);
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

/// Pick the highest-scoring candidate. Ties keep the earlier one, and a
/// winner must score above zero.
pub fn select_best(candidates: &[PriceCandidate], name: &str) -> Option<ScoredCandidate> {
    let survivors = prefilter(candidates, name);
    tracing::debug!(
        "Scoring {} of {} DOM candidates",
        survivors.len(),
        candidates.len()
    );

    let mut best: Option<ScoredCandidate> = None;
    for candidate in &survivors {
        let scored = score(candidate, name);
        tracing::trace!(
            "Candidate {} via {} scored {:.1}",
            scored.candidate.value,
            scored.candidate.selector,
            scored.score
        );
        if best.as_ref().map_or(true, |b| scored.score > b.score) {
            best = Some(scored);
        }
    }

    let best = best.filter(|b| b.score > 0.0)?;
    tracing::debug!(
        "Best DOM candidate {} scored {:.1}: {:?}",
        best.candidate.value,
        best.score,
        best.breakdown
    );
    Some(best)
}

fn keyword_hits(input: &ScoreInput) -> f64 {
    let hits = input
        .keywords
        .iter()
        .filter(|k| input.text.contains(k.as_str()))
        .count();
    15.0 * hits as f64
}

fn keyword_coverage(input: &ScoreInput) -> f64 {
    if input.keywords.is_empty() {
        return 0.0;
    }
    let hits = input
        .keywords
        .iter()
        .filter(|k| input.text.contains(k.as_str()))
        .count();
    let ratio = hits as f64 / input.keywords.len() as f64;
    if ratio >= 0.6 {
        ratio * 80.0
    } else {
        0.0
    }
}

fn exact_name(input: &ScoreInput) -> f64 {
    if input.name.len() > 2 && input.text.contains(input.name) {
        150.0
    } else {
        0.0
    }
}

fn selector_specificity(input: &ScoreInput) -> f64 {
    let selector = input.candidate.selector.as_str();
    match selector {
        "[data-price]" | "[data-current-price]" | "[data-product-price]" | "[itemprop='price']" => {
            20.0
        }
        ".product-price" | ".current-price" | ".sale-price" | ".price-current" | ".final-price" => {
            15.0
        }
        ".price" => 10.0,
        ".money" | ".a-price" | ".a-offscreen" | ".amount" => 8.0,
        s if s.contains("*=") => 6.0,
        _ => 1.0,
    }
}

fn purchase_intent(input: &ScoreInput) -> f64 {
    if PURCHASE_INTENT.iter().any(|p| input.text.contains(p)) {
        20.0
    } else {
        0.0
    }
}

fn price_terms(input: &ScoreInput) -> f64 {
    5.0 * PRICE_TERMS
        .iter()
        .filter(|t| input.text.contains(*t))
        .count() as f64
}

fn currency_crowding(input: &ScoreInput) -> f64 {
    let symbols = input
        .candidate
        .context
        .chars()
        .filter(|c| CURRENCY_SYMBOLS.contains(c))
        .count();
    match symbols {
        0..=2 => 25.0,
        3 => 0.0,
        _ => -50.0,
    }
}

fn related_content(input: &ScoreInput) -> f64 {
    -15.0
        * RELATED_CONTENT
            .iter()
            .filter(|p| input.text.contains(*p))
            .count() as f64
}

fn negative_context(input: &ScoreInput) -> f64 {
    if NEGATIVE_CONTEXT.iter().any(|p| input.text.contains(p)) {
        -30.0
    } else {
        0.0
    }
}

fn historical(input: &ScoreInput) -> f64 {
    if HISTORICAL.iter().any(|p| input.text.contains(p)) {
        -100.0
    } else {
        0.0
    }
}

fn unrelated_words(input: &ScoreInput) -> f64 {
    if input.name.is_empty() {
        return 0.0;
    }
    let unrelated = input
        .candidate
        .context
        .to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| w.chars().count() > 3 && !input.name.contains(*w))
        .count();
    -0.5 * unrelated as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(value: f64, selector: &str, text: &str, context: &str) -> PriceCandidate {
        PriceCandidate {
            value,
            currency_hint: Some("USD".to_string()),
            source_text: text.to_string(),
            selector: selector.to_string(),
            context: context.to_string(),
        }
    }

    #[test]
    fn test_product_context_beats_recommendation_grid() {
        let main = candidate(
            89.0,
            ".product-price",
            "$89.00",
            "Trail Runner 3 $89.00 Add to cart",
        );
        let grid = candidate(
            45.0,
            "[class*='price']",
            "$45.00",
            "You may also like Sock Pack $45.00 Cap $20.00 Bottle $12.00 Belt $30.00",
        );
        let best = select_best(&[grid, main.clone()], "trail runner 3").unwrap();
        assert_eq!(best.candidate, main);
        assert!(best.breakdown.iter().any(|(rule, _)| *rule == "exact_name"));
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let a = candidate(10.0, "span", "$10.00", "Mug $10.00");
        let b = candidate(12.0, "span", "$12.00", "Mug $12.00");
        let best = select_best(&[a.clone(), b], "").unwrap();
        assert_eq!(best.candidate, a);
    }

    #[test]
    fn test_median_filter_drops_outliers() {
        let cands = vec![
            candidate(450.0, ".price", "$450", "$450"),
            candidate(460.0, ".price", "$460", "$460"),
            candidate(5.0, ".price", "$5", "$5"),
            candidate(9000.0, ".price", "$9000", "$9000"),
            candidate(470.0, ".price", "$470", "$470"),
        ];
        let kept: Vec<f64> = prefilter(&cands, "").iter().map(|c| c.value).collect();
        assert_eq!(kept, vec![450.0, 460.0, 470.0]);
    }

    #[test]
    fn test_median_filter_idle_for_cheap_items() {
        let cands = vec![
            candidate(4.0, ".price", "$4", "$4"),
            candidate(45.0, ".price", "$45", "$45"),
            candidate(9.0, ".price", "$9", "$9"),
        ];
        assert_eq!(prefilter(&cands, "").len(), 3);
    }

    #[test]
    fn test_luxury_floor() {
        let cands = vec![
            candidate(25.0, ".price", "$25", "Dust bag $25"),
            candidate(1890.0, ".price", "$1,890", "Prada Galleria $1,890"),
        ];
        let kept = prefilter(&cands, "prada galleria handbag");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].value, 1890.0);
    }

    #[test]
    fn test_historical_context_is_heavily_penalised() {
        let now = candidate(59.0, ".price", "$59", "Blender Pro $59 add to cart");
        let then = candidate(99.0, ".price", "$99", "Blender Pro sold for $99 last year");
        let a = score(&now, "blender pro");
        let b = score(&then, "blender pro");
        assert!(a.score > b.score);
        assert!(b.breakdown.contains(&("historical", -100.0)));
    }

    #[test]
    fn test_nothing_survives_scoring() {
        let bad = candidate(
            30.0,
            "span",
            "$30",
            "Related: sold for $30 $31 $32 $33 in 2021",
        );
        assert!(select_best(&[bad], "desk lamp").is_none());
        assert!(select_best(&[], "desk lamp").is_none());
    }
}
