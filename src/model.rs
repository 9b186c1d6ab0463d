use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TargetId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(TargetId)
    }
}

/// Where an extracted price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Network,
    Dom,
    Vision,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Network => "network",
            Source::Dom => "dom",
            Source::Vision => "vision",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extraction method a target can learn to prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Network,
    Vision,
    Hybrid,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Network => "network",
            Method::Vision => "vision",
            Method::Hybrid => "hybrid",
        }
    }

    /// The other single method. Hybrid maps to vision: the alternative
    /// reading shown for feedback is always the vision one.
    pub fn complement(&self) -> Method {
        match self {
            Method::Vision => Method::Network,
            Method::Network | Method::Hybrid => Method::Vision,
        }
    }
}

impl From<Source> for Method {
    fn from(source: Source) -> Self {
        match source {
            Source::Network | Source::Dom => Method::Network,
            Source::Vision => Method::Vision,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single number proposed as the product price, before selection.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCandidate {
    pub value: f64,
    pub currency_hint: Option<String>,
    pub source_text: String,
    pub selector: String,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub value: f64,
    pub currency: String,
    pub source: Source,
    pub confidence: f64,
    pub method_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_value: Option<f64>,
}

impl ExtractionResult {
    pub fn discount_percent(&self) -> Option<f64> {
        let original = self.original_value?;
        if original > self.value && original > 0.0 {
            Some((original - self.value) / original * 100.0)
        } else {
            None
        }
    }
}

/// One text-recognition attempt made by the vision ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionAttempt {
    pub region: Option<usize>,
    pub strategy: String,
    pub expansion: f64,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub raw_text: String,
    pub confidence: f64,
    pub success: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationOutcome {
    pub target_id: TargetId,
    pub final_value: f64,
    pub currency: String,
    pub chosen_source: Source,
    pub confidence: f64,
    pub matched: bool,
    pub method_label: String,
    pub reasons: Vec<String>,
    pub network: Option<ExtractionResult>,
    pub vision: Option<ExtractionResult>,
    /// Set when both methods produced values that disagree.
    pub needs_feedback: bool,
    /// False when the plausibility gate rejected the value.
    pub confirmed: bool,
    pub plausibility_reason: Option<String>,
    #[serde(default)]
    pub vision_attempts: Vec<RecognitionAttempt>,
    #[serde(default)]
    pub triggered_alerts: Vec<PriceAlert>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPreference {
    pub target_id: TargetId,
    pub preferred_method: Method,
    pub success_rate: f64,
    pub last_used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    pub last_failed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryPoint {
    pub target_id: TargetId,
    pub value: f64,
    pub currency: String,
    pub discount_percent: Option<f64>,
    pub original_value: Option<f64>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertKind {
    PriceDrop { target_price: f64 },
    PercentageDrop { percentage: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub id: u64,
    #[serde(flatten)]
    pub kind: AlertKind,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTarget {
    pub id: TargetId,
    pub url: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub original_price: Option<f64>,
    pub currency: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry: RetryState,
    #[serde(default)]
    pub alerts: Vec<PriceAlert>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl TrackedTarget {
    pub fn new(id: TargetId, url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            name: name.into(),
            current_price: None,
            original_price: None,
            currency: None,
            last_checked: None,
            retry: RetryState::default(),
            alerts: Vec::new(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// What gets written to a target after an accepted check.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub value: f64,
    pub currency: String,
    pub original_value: Option<f64>,
    pub discount_percent: Option<f64>,
    pub checked_at: DateTime<Utc>,
}
