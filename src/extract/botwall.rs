use serde::Serialize;

const BOT_PHRASES: &[&str] = &[
    "unfortunately we are unable",
    "access denied",
    "blocked",
    "bot detected",
    "please verify you are human",
    "security check",
    "cloudflare",
    "distil networks",
    "imperva",
    "akamai",
    "rate limit",
    "too many requests",
    "please wait",
    "checking your browser",
    "ddos protection",
    "captcha",
    "recaptcha",
    "hcaptcha",
    "turnstile",
];

const CAPTCHA_PHRASES: &[&str] = &[
    "captcha",
    "recaptcha",
    "hcaptcha",
    "turnstile",
    "verify you are human",
    "select all images",
    "click the checkbox",
];

const HTTP_BLOCK_PHRASES: &[&str] = &[
    "403 forbidden",
    "429 too many requests",
    "503 service unavailable",
    "maintenance",
    "under construction",
    "site temporarily unavailable",
];

/// Interstitial titles shown while a challenge is being solved.
pub const CHALLENGE_TITLES: &[&str] = &["Just a moment", "Attention Required"];

const BLOCK_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Captcha,
    HttpError,
    BotWall,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Captcha => "captcha",
            BlockType::HttpError => "http_error",
            BlockType::BotWall => "bot_wall",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotWallReport {
    pub is_blocked: bool,
    pub score: f64,
    pub block_type: Option<BlockType>,
    pub matched: Vec<String>,
}

impl BotWallReport {
    pub fn summary(&self) -> String {
        let kind = self.block_type.map(|t| t.as_str()).unwrap_or("none");
        format!(
            "{} (score {:.2}; matched: {})",
            kind,
            self.score,
            self.matched.join(", ")
        )
    }
}

/// Score a rendered page for signs that it is a block or challenge page
/// rather than the product.
pub fn detect(title: &str, text: &str) -> BotWallReport {
    let content = format!("{} {}", title, text).to_lowercase();
    let mut score: f64 = 0.0;
    let mut matched = Vec::new();
    let mut captcha_hits = 0;
    let mut http_hits = 0;

    for phrase in BOT_PHRASES {
        if content.contains(phrase) {
            score += 0.3;
            matched.push(phrase.to_string());
        }
    }
    for phrase in CAPTCHA_PHRASES {
        if content.contains(phrase) {
            score += 0.5;
            captcha_hits += 1;
            if !matched.iter().any(|m| m == phrase) {
                matched.push(phrase.to_string());
            }
        }
    }
    for phrase in HTTP_BLOCK_PHRASES {
        if content.contains(phrase) {
            score += 0.4;
            http_hits += 1;
            matched.push(phrase.to_string());
        }
    }

    if content.contains("javascript") && content.contains("disabled") {
        score += 0.2;
        matched.push("javascript disabled".to_string());
    }

    // Challenge pages carry very little text
    if text.chars().count() < 1000 && score > 0.0 {
        score += 0.2;
    }

    let score = score.min(1.0);
    let is_blocked = score > BLOCK_THRESHOLD;
    let block_type = if !is_blocked {
        None
    } else if captcha_hits > 0 {
        Some(BlockType::Captcha)
    } else if http_hits > 0 {
        Some(BlockType::HttpError)
    } else {
        Some(BlockType::BotWall)
    };

    if is_blocked {
        tracing::debug!("Bot wall detected: score {:.2}, matched {:?}", score, matched);
    }

    BotWallReport {
        is_blocked,
        score,
        block_type,
        matched,
    }
}

pub fn is_challenge_title(title: &str) -> bool {
    CHALLENGE_TITLES.iter().any(|t| title.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_product_page_passes() {
        let text = "Leather Tote Bag. Hand stitched in Italy. Add to cart. ".repeat(40);
        let report = detect("Leather Tote Bag | Shop", &text);
        assert!(!report.is_blocked);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.block_type, None);
    }

    #[test]
    fn test_captcha_page() {
        let report = detect(
            "Security Check",
            "Please verify you are human. Select all images with a bus.",
        );
        assert!(report.is_blocked);
        assert_eq!(report.block_type, Some(BlockType::Captcha));
        assert!(report.score <= 1.0);
    }

    #[test]
    fn test_http_block_page() {
        let report = detect("403 Forbidden", "403 Forbidden");
        assert!(report.is_blocked);
        assert_eq!(report.block_type, Some(BlockType::HttpError));
    }

    #[test]
    fn test_single_weak_phrase_on_long_page_is_not_blocked() {
        let text = format!("{} please wait while we load reviews", "x".repeat(2000));
        let report = detect("Product", &text);
        assert!((report.score - 0.3).abs() < 1e-9);
        assert!(!report.is_blocked);
    }

    #[test]
    fn test_challenge_title() {
        assert!(is_challenge_title("Just a moment..."));
        assert!(!is_challenge_title("Running Shoes"));
    }
}
