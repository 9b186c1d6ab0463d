//! Rejects price moves too extreme to be real.

use crate::category::Category;
use crate::model::TrackedTarget;

/// Slack for float error in the percent change, so a price exactly on a
/// window edge stays inside it.
const EDGE_TOLERANCE: f64 = 1e-9;

/// Allowed percent change `[min_drop, max_increase]` for a category.
pub fn window(category: Category) -> (f64, f64) {
    match category {
        Category::Luxury => (-80.0, 200.0),
        Category::Electronics => (-60.0, 100.0),
        Category::Fashion => (-70.0, 150.0),
        Category::Default => (-50.0, 100.0),
    }
}

/// Checks `new_value` against the target's last known price. Bounds are
/// inclusive and a target without a prior price always passes.
pub fn is_plausible(target: &TrackedTarget, new_value: f64) -> (bool, String) {
    let Some(previous) = target.current_price.filter(|p| *p > 0.0) else {
        return (true, "No previous price to compare".to_string());
    };

    let change = (new_value - previous) / previous * 100.0;
    let category = Category::classify(&target.name);
    let (min_drop, max_increase) = window(category);

    if change < min_drop - EDGE_TOLERANCE {
        return (
            false,
            format!("Price drop too extreme ({:.1}%). Possible scraping error.", change),
        );
    }
    if change > max_increase + EDGE_TOLERANCE {
        return (
            false,
            format!(
                "Price increase too extreme ({:.1}%). Possible scraping error.",
                change
            ),
        );
    }

    tracing::debug!(
        "Change of {:.1}% is within the {} window",
        change,
        category.as_str()
    );
    (true, format!("Price change {:.1}% is plausible", change))
}
