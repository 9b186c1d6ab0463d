use crate::error::{ExtractError, PriceWatchError};
use crate::model::{AlertKind, ArbitrationOutcome, PriceAlert, TrackedTarget};
use chrono::{DateTime, Utc};

pub fn format_outcome(target: &TrackedTarget, outcome: &ArbitrationOutcome) -> String {
    let mut out = String::new();

    out.push_str(&format!("## {} (#{})\n", target.name, target.id));
    let status = if outcome.confirmed {
        ""
    } else {
        " (unconfirmed)"
    };
    out.push_str(&format!(
        "- **Price:** {}{}\n",
        format_price(outcome.final_value, None, &outcome.currency),
        status
    ));
    out.push_str(&format!(
        "- **Source:** {} via {}\n",
        outcome.chosen_source, outcome.method_label
    ));
    out.push_str(&format!("- **Confidence:** {:.0}%\n", outcome.confidence * 100.0));
    if let Some(ref reason) = outcome.plausibility_reason {
        out.push_str(&format!("- **Rejected:** {}\n", reason));
    }

    if outcome.needs_feedback {
        out.push_str("\n### Methods disagree\n");
        if let Some(ref net) = outcome.network {
            out.push_str(&format!(
                "- Network: {} ({:.0}%)\n",
                format_price(net.value, net.original_value, &net.currency),
                net.confidence * 100.0
            ));
        }
        if let Some(ref vis) = outcome.vision {
            out.push_str(&format!(
                "- Vision: {} ({:.0}%)\n",
                format_price(vis.value, None, &vis.currency),
                vis.confidence * 100.0
            ));
        }
        out.push_str(&format!(
            "- Confirm with `pricewatch feedback {} --primary` or `--alternative`\n",
            target.id
        ));
    }

    if !outcome.triggered_alerts.is_empty() {
        out.push_str("\n### Alerts\n");
        for alert in &outcome.triggered_alerts {
            out.push_str(&format!("- {}\n", format_alert(alert)));
        }
    }

    out.push_str("\n### Reasoning\n");
    for reason in &outcome.reasons {
        out.push_str(&format!("- {}\n", reason));
    }

    out
}

pub fn format_check_error(target: &TrackedTarget, err: &PriceWatchError) -> String {
    let mut out = format!("## {} (#{})\n", target.name, target.id);
    match err {
        PriceWatchError::BothFailed {
            network,
            vision,
            next_retry_at,
        } => {
            out.push_str("- **Status:** no price\n");
            out.push_str(&format!("- **Network:** {}\n", describe_failure(network)));
            out.push_str(&format!("- **Vision:** {}\n", describe_failure(vision)));
            if let Some(at) = next_retry_at {
                out.push_str(&format!("- **Next retry:** {}\n", format_time(at)));
            }
        }
        other => out.push_str(&format!("- **Error:** {}\n", other)),
    }
    out
}

fn describe_failure(err: &ExtractError) -> String {
    match err {
        ExtractError::Timeout { after, .. } => format!("timed out after {}s", after.as_secs()),
        ExtractError::NotFound(detail) => format!("no data ({})", detail),
        other => other.to_string(),
    }
}

pub fn format_targets(targets: &[TrackedTarget]) -> String {
    if targets.is_empty() {
        return "No targets tracked yet. Add one with `pricewatch track <url>`.\n".to_string();
    }

    let mut out = format!("## Tracked targets ({})\n\n", targets.len());
    for (i, target) in targets.iter().enumerate() {
        out.push_str(&format!("### {}. {}\n", target.id, target.name));
        let currency = target.currency.as_deref().unwrap_or("USD");
        let price = match target.current_price {
            Some(price) => format_price(price, target.original_price, currency),
            None => "not checked yet".to_string(),
        };
        out.push_str(&format!("- **Price:** {}\n", price));
        if let Some(ref at) = target.last_checked {
            out.push_str(&format!("- **Checked:** {}\n", format_time(at)));
        }
        if target.retry.retry_count > 0 {
            let next = target
                .retry
                .next_retry_at
                .as_ref()
                .map(format_time)
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "- **Failures:** {} (next retry {})\n",
                target.retry.retry_count, next
            ));
        }
        let active: Vec<String> = target
            .alerts
            .iter()
            .filter(|a| a.active)
            .map(format_alert)
            .collect();
        if !active.is_empty() {
            out.push_str(&format!("- **Alerts:** {}\n", active.join("; ")));
        }
        out.push_str(&format!("- **URL:** {}\n", target.url));

        if i < targets.len() - 1 {
            out.push_str("\n---\n\n");
        }
    }
    out
}

pub fn format_alert(alert: &PriceAlert) -> String {
    match alert.kind {
        AlertKind::PriceDrop { target_price } => {
            format!("#{} price at or below {:.2}", alert.id, target_price)
        }
        AlertKind::PercentageDrop { percentage } => {
            format!("#{} discount of {:.0}% or more", alert.id, percentage)
        }
    }
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

pub fn format_price(price: f64, original: Option<f64>, currency: &str) -> String {
    let symbol = match currency {
        "USD" => "$",
        "CHF" => "CHF ",
        "EUR" => "€",
        "GBP" => "£",
        "JPY" => "¥",
        "INR" => "₹",
        _ => currency,
    };

    match original {
        Some(orig) if orig > price => {
            let discount = ((orig - price) / orig * 100.0).round() as u32;
            format!(
                "{}{:.2} ~~{}{:.2}~~ ({}% off)",
                symbol, price, symbol, orig, discount
            )
        }
        _ => format!("{}{:.2}", symbol, price),
    }
}
