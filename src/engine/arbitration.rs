//! Combines the network and vision results of one check into one decision.

use crate::error::ExtractError;
use crate::model::{ExtractionResult, Method};
use serde::Deserialize;

/// Which method wins a disagreement neither confidence margin settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchDefault {
    NonPrimary,
    Primary,
}

/// Tunable constants of the decision table. The margins are calibration
/// values, not derived from anything.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArbitrationPolicy {
    pub vision_primary_threshold: f64,
    pub network_primary_threshold: f64,
    pub vision_margin: f64,
    pub network_margin: f64,
    pub marketplace_vision_margin: f64,
    pub marketplace_network_margin: f64,
    pub mismatch_default: MismatchDefault,
    /// Match tolerance in percent below `tolerance_pivot`.
    pub tolerance_low: f64,
    /// Match tolerance in percent at or above `tolerance_pivot`.
    pub tolerance_high: f64,
    pub tolerance_pivot: f64,
    /// Domain fragments for which network is the primary method.
    pub marketplace_domains: Vec<String>,
}

impl Default for ArbitrationPolicy {
    fn default() -> Self {
        Self {
            vision_primary_threshold: 0.7,
            network_primary_threshold: 0.5,
            vision_margin: 0.05,
            network_margin: 0.1,
            marketplace_vision_margin: 0.15,
            marketplace_network_margin: 0.2,
            mismatch_default: MismatchDefault::NonPrimary,
            tolerance_low: 5.0,
            tolerance_high: 3.0,
            tolerance_pivot: 100.0,
            marketplace_domains: vec!["amazon.".to_string()],
        }
    }
}

impl ArbitrationPolicy {
    pub fn is_marketplace(&self, url: &str) -> bool {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_else(|| url.to_lowercase());
        self.marketplace_domains
            .iter()
            .any(|d| host.contains(&d.to_lowercase()))
    }

    /// Vision leads on ordinary shops, network on marketplaces.
    pub fn primary_method(&self, marketplace: bool) -> Method {
        if marketplace {
            Method::Network
        } else {
            Method::Vision
        }
    }

    fn primary_threshold(&self, method: Method) -> f64 {
        match method {
            Method::Network => self.network_primary_threshold,
            _ => self.vision_primary_threshold,
        }
    }

    fn margins(&self, marketplace: bool) -> (f64, f64) {
        if marketplace {
            (self.marketplace_vision_margin, self.marketplace_network_margin)
        } else {
            (self.vision_margin, self.network_margin)
        }
    }

    pub fn tolerance(&self, average: f64) -> f64 {
        if average >= self.tolerance_pivot {
            self.tolerance_high
        } else {
            self.tolerance_low
        }
    }
}

/// Percent difference relative to the average of both values.
pub fn percent_difference(a: f64, b: f64) -> f64 {
    let average = (a + b) / 2.0;
    if average <= 0.0 {
        return if a == b { 0.0 } else { 100.0 };
    }
    (a - b).abs() / average * 100.0
}

pub fn prices_match(a: f64, b: f64, policy: &ArbitrationPolicy) -> bool {
    percent_difference(a, b) <= policy.tolerance((a + b) / 2.0)
}

pub fn match_confidence(a: f64, b: f64) -> f64 {
    (1.0 - percent_difference(a, b) / 20.0).clamp(0.0, 1.0)
}

/// Branch of the decision table that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    PrimaryConfident,
    Agreement,
    SingleMethod,
    Mismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub chosen: ExtractionResult,
    pub confidence: f64,
    pub matched: bool,
    pub needs_feedback: bool,
    pub rule: Rule,
    pub method_label: String,
    pub reasons: Vec<String>,
}

/// Run the decision table. Fails only when neither branch produced a price;
/// the branch errors come back untouched in that case.
pub fn arbitrate(
    network: &Result<ExtractionResult, ExtractError>,
    vision: &Result<ExtractionResult, ExtractError>,
    marketplace: bool,
    policy: &ArbitrationPolicy,
) -> Result<Decision, (ExtractError, ExtractError)> {
    let primary = policy.primary_method(marketplace);
    let domain = if marketplace { "marketplace" } else { "standard" };
    let mut reasons = Vec::new();

    for (name, result) in [("network", network), ("vision", vision)] {
        match result {
            Ok(r) => reasons.push(format!(
                "{} found {:.2} {} ({}, confidence {:.2})",
                name, r.value, r.currency, r.method_label, r.confidence
            )),
            Err(e) => reasons.push(format!("{} failed: {}", name, e)),
        }
    }

    let decision = match (network, vision) {
        (Ok(net), Ok(vis)) => {
            let (primary_result, other_result) = match primary {
                Method::Network => (net, vis),
                _ => (vis, net),
            };
            let matched = prices_match(net.value, vis.value, policy);
            let diff = percent_difference(net.value, vis.value);

            if primary_result.confidence > policy.primary_threshold(primary) {
                reasons.push(format!(
                    "{} is primary on {} domains and confident ({:.2} > {:.2})",
                    primary,
                    domain,
                    primary_result.confidence,
                    policy.primary_threshold(primary)
                ));
                Decision {
                    chosen: primary_result.clone(),
                    confidence: primary_result.confidence,
                    matched,
                    needs_feedback: !matched,
                    rule: Rule::PrimaryConfident,
                    method_label: format!("{}_primary", primary),
                    reasons,
                }
            } else if matched {
                let confidence = match_confidence(net.value, vis.value);
                reasons.push(format!(
                    "Methods agree within {:.2}%, using {} value",
                    diff, primary
                ));
                Decision {
                    chosen: primary_result.clone(),
                    confidence,
                    matched: true,
                    needs_feedback: false,
                    rule: Rule::Agreement,
                    method_label: "hybrid_match".to_string(),
                    reasons,
                }
            } else {
                let (vision_margin, network_margin) = policy.margins(marketplace);
                let (chosen, why) = if vis.confidence > net.confidence + vision_margin {
                    (vis, format!("vision confidence leads by more than {:.2}", vision_margin))
                } else if net.confidence > vis.confidence + network_margin {
                    (net, format!("network confidence leads by more than {:.2}", network_margin))
                } else {
                    let fallback = match policy.mismatch_default {
                        MismatchDefault::NonPrimary => other_result,
                        MismatchDefault::Primary => primary_result,
                    };
                    (fallback, "no clear confidence lead, using default".to_string())
                };
                reasons.push(format!(
                    "Methods disagree by {:.2}%: {}, using {}",
                    diff, why, chosen.source
                ));
                let chosen_method = Method::from(chosen.source);
                Decision {
                    chosen: chosen.clone(),
                    confidence: chosen.confidence,
                    matched: false,
                    needs_feedback: true,
                    rule: Rule::Mismatch,
                    method_label: format!("{}_mismatch", chosen_method),
                    reasons,
                }
            }
        }
        (Ok(only), Err(_)) | (Err(_), Ok(only)) => {
            let method = Method::from(only.source);
            reasons.push(format!("Only {} produced a price", method));
            Decision {
                chosen: only.clone(),
                confidence: only.confidence,
                matched: false,
                needs_feedback: false,
                rule: Rule::SingleMethod,
                method_label: format!("{}_fallback", method),
                reasons,
            }
        }
        (Err(net_err), Err(vis_err)) => {
            return Err((net_err.clone(), vis_err.clone()));
        }
    };

    tracing::info!(
        "Arbitration chose {:.2} from {} ({})",
        decision.chosen.value,
        decision.chosen.source,
        decision.method_label
    );
    Ok(decision)
}
