//! Screenshot-based price extraction.
//!
//! The detector proposes price regions; every region then gets a redundant
//! set of recognition attempts (several box expansions, several
//! preprocessing strategies) and the best-scoring attempt wins.

pub mod client;

use crate::error::{ExtractError, PriceWatchError};
use crate::extract::locale;
use crate::model::{ExtractionResult, RecognitionAttempt, Source};
use client::{
    BBox, Detection, HttpRegionDetector, HttpTextRecognizer, RegionDetector, TextRecognizer,
};
use std::sync::Arc;
use std::time::Duration;

const PREPROCESSING_STRATEGIES: &[&str] = &["default", "enhanced", "aggressive", "conservative"];
const PREPROCESSING_EXPANSION: f64 = 2.0;
/// An attempt above this confidence ends the expansion sweep for its region.
const EARLY_EXIT_CONFIDENCE: f64 = 0.8;
const REGION_BONUS: f64 = 1.2;
const SWEET_SPOT_BONUS: f64 = 1.1;
const SWEET_SPOT: (f64, f64) = (1.5, 2.5);

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub detection_threshold: f64,
    /// Deadline for the whole ensemble, detection included.
    pub timeout: Duration,
    pub default_currency: String,
}

/// Outcome of one ensemble run together with every attempt made.
#[derive(Debug)]
pub struct VisionReport {
    pub result: Result<ExtractionResult, ExtractError>,
    pub attempts: Vec<RecognitionAttempt>,
}

/// HTTP clients for both vision services.
pub struct VisionServices {
    pub detector: Arc<HttpRegionDetector>,
    pub recognizer: Arc<HttpTextRecognizer>,
}

impl VisionServices {
    pub fn connect(
        detector_url: &str,
        recognizer_url: &str,
        request_timeout: Duration,
    ) -> Result<Self, PriceWatchError> {
        Ok(Self {
            detector: Arc::new(HttpRegionDetector::new(detector_url, request_timeout)?),
            recognizer: Arc::new(HttpTextRecognizer::new(recognizer_url, request_timeout)?),
        })
    }

    /// Probe both services concurrently; (detector, recognizer).
    pub async fn health(&self) -> (Result<(), ExtractError>, Result<(), ExtractError>) {
        tokio::join!(self.detector.health(), self.recognizer.health())
    }
}

pub struct VisionEnsemble {
    detector: Arc<dyn RegionDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    settings: VisionSettings,
}

/// Box expansion factors to try, by detector confidence. Less certain boxes
/// get wider crops.
pub fn expansion_factors(detector_confidence: f64) -> &'static [f64] {
    if detector_confidence > 0.8 {
        &[1.0, 1.5, 2.0]
    } else if detector_confidence > 0.6 {
        &[1.5, 2.0, 2.5]
    } else {
        &[2.0, 2.5, 3.0, 3.5]
    }
}

/// Scale `bbox` around its center, clamped to the image when its size is known.
pub fn expand_bbox(bbox: BBox, factor: f64, image_size: Option<(u32, u32)>) -> BBox {
    let [x1, y1, x2, y2] = bbox;
    let (cx, cy) = ((x1 + x2) / 2.0, (y1 + y2) / 2.0);
    let (half_w, half_h) = ((x2 - x1) * factor / 2.0, (y2 - y1) * factor / 2.0);
    let (max_x, max_y) = image_size
        .map(|(w, h)| (w as f64, h as f64))
        .unwrap_or((f64::MAX, f64::MAX));
    [
        (cx - half_w).max(0.0),
        (cy - half_h).max(0.0),
        (cx + half_w).min(max_x),
        (cy + half_h).min(max_y),
    ]
}

/// Width and height from a PNG header.
pub fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    if bytes.len() < 24 || &bytes[..8] != SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    Some((width, height))
}

/// Ranking score of an attempt; zero for attempts without a usable value.
pub fn attempt_score(attempt: &RecognitionAttempt) -> f64 {
    if !attempt.success || attempt.value.map_or(true, |v| v <= 0.0) {
        return 0.0;
    }
    let mut score = attempt.confidence;
    if attempt.region.is_some() {
        score *= REGION_BONUS;
    }
    if attempt.expansion >= SWEET_SPOT.0 && attempt.expansion <= SWEET_SPOT.1 {
        score *= SWEET_SPOT_BONUS;
    }
    score
}

impl VisionEnsemble {
    pub fn new(
        detector: Arc<dyn RegionDetector>,
        recognizer: Arc<dyn TextRecognizer>,
        settings: VisionSettings,
    ) -> Self {
        Self {
            detector,
            recognizer,
            settings,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    pub async fn extract(&self, screenshot: &[u8]) -> VisionReport {
        let deadline = tokio::time::Instant::now() + self.settings.timeout;
        self.extract_until(screenshot, deadline).await
    }

    /// Like `extract`, but stops at `deadline` so a caller can share one
    /// budget between capturing the screenshot and the ensemble.
    pub async fn extract_until(
        &self,
        screenshot: &[u8],
        deadline: tokio::time::Instant,
    ) -> VisionReport {
        let mut attempts = Vec::new();
        let outcome = tokio::time::timeout_at(deadline, self.run(screenshot, &mut attempts)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Vision ensemble timed out after {:?} ({} attempts made)",
                    self.settings.timeout,
                    attempts.len()
                );
                Err(ExtractError::Timeout {
                    method: "vision ensemble",
                    after: self.settings.timeout,
                })
            }
        };
        VisionReport { result, attempts }
    }

    async fn run(
        &self,
        screenshot: &[u8],
        attempts: &mut Vec<RecognitionAttempt>,
    ) -> Result<ExtractionResult, ExtractError> {
        let detection = self
            .detector
            .detect(screenshot, self.settings.detection_threshold)
            .await?;
        if !detection.success {
            return Err(ExtractError::Service(
                detection
                    .error
                    .unwrap_or_else(|| "region detector reported failure".to_string()),
            ));
        }
        if detection.detections.is_empty() {
            return Err(ExtractError::NotFound(
                "no price regions detected".to_string(),
            ));
        }

        let image_size = png_dimensions(screenshot);
        for (index, region) in detection.detections.iter().enumerate() {
            self.run_region(screenshot, index, region, image_size, attempts)
                .await;
        }

        let any_region_success = attempts
            .iter()
            .any(|a| a.region.is_some() && attempt_score(a) > 0.0);
        if !any_region_success {
            tracing::debug!("No region-scoped attempt succeeded, trying full image");
            let attempt = self
                .attempt(screenshot, None, None, 0.0, "default", "full_image".to_string())
                .await;
            attempts.push(attempt);
        }

        for attempt in attempts.iter_mut() {
            attempt.score = attempt_score(attempt);
        }

        let mut best: Option<&RecognitionAttempt> = None;
        for attempt in attempts.iter().filter(|a| a.score > 0.0) {
            if best.map_or(true, |b| attempt.score > b.score) {
                best = Some(attempt);
            }
        }
        let best = best.ok_or_else(|| {
            ExtractError::NotFound(format!(
                "none of {} recognition attempts produced a price",
                attempts.len()
            ))
        })?;
        let value = best.value.ok_or_else(|| ExtractError::NotFound("empty winner".to_string()))?;

        // Full-image winners borrow the top region's detector confidence
        let detector_confidence = best
            .region
            .and_then(|i| detection.detections.get(i))
            .or_else(|| detection.detections.first())
            .map(|d| d.confidence)
            .unwrap_or(0.0);
        let confidence = ((detector_confidence + best.confidence) / 2.0).clamp(0.0, 1.0);

        tracing::info!(
            "Vision picked {} via {} (recognizer {:.2}, detector {:.2})",
            value,
            best.strategy,
            best.confidence,
            detector_confidence
        );

        Ok(ExtractionResult {
            value,
            currency: best
                .currency
                .clone()
                .unwrap_or_else(|| self.settings.default_currency.clone()),
            source: Source::Vision,
            confidence,
            method_label: format!("vision:{}", best.strategy),
            original_value: None,
        })
    }

    async fn run_region(
        &self,
        screenshot: &[u8],
        index: usize,
        region: &Detection,
        image_size: Option<(u32, u32)>,
        attempts: &mut Vec<RecognitionAttempt>,
    ) {
        for &factor in expansion_factors(region.confidence) {
            let bbox = expand_bbox(region.bbox, factor, image_size);
            let attempt = self
                .attempt(
                    screenshot,
                    Some(index),
                    Some(bbox),
                    factor,
                    "default",
                    format!("expansion_{:.1}x", factor),
                )
                .await;
            let confident = attempt.success
                && attempt.confidence > EARLY_EXIT_CONFIDENCE
                && attempt.value.is_some_and(|v| v > 0.0);
            attempts.push(attempt);
            if confident {
                tracing::debug!("Region {} settled at expansion {:.1}x", index, factor);
                break;
            }
        }

        let bbox = expand_bbox(region.bbox, PREPROCESSING_EXPANSION, image_size);
        for strategy in PREPROCESSING_STRATEGIES {
            let attempt = self
                .attempt(
                    screenshot,
                    Some(index),
                    Some(bbox),
                    PREPROCESSING_EXPANSION,
                    strategy,
                    format!("preprocessing_{}", strategy),
                )
                .await;
            attempts.push(attempt);
        }
    }

    async fn attempt(
        &self,
        screenshot: &[u8],
        region: Option<usize>,
        bbox: Option<BBox>,
        expansion: f64,
        strategy: &str,
        label: String,
    ) -> RecognitionAttempt {
        let attempt = match self.recognizer.recognize(screenshot, bbox, strategy).await {
            Ok(response) => {
                let parsed = locale::parse(&response.extracted_text);
                let value = response
                    .price
                    .filter(|p| *p > 0.0)
                    .or_else(|| parsed.as_ref().map(|p| p.value).filter(|v| *v > 0.0));
                let currency = response
                    .currency
                    .filter(|c| !c.is_empty())
                    .or_else(|| parsed.and_then(|p| p.currency));
                RecognitionAttempt {
                    region,
                    strategy: label,
                    expansion,
                    value,
                    currency,
                    raw_text: response.extracted_text,
                    confidence: response.confidence.clamp(0.0, 1.0),
                    success: response.success && value.is_some(),
                    score: 0.0,
                }
            }
            Err(e) => RecognitionAttempt {
                region,
                strategy: label,
                expansion,
                value: None,
                currency: None,
                raw_text: e.to_string(),
                confidence: 0.0,
                success: false,
                score: 0.0,
            },
        };
        tracing::debug!(
            "Attempt {} (region {:?}): value {:?}, confidence {:.2}, success {}",
            attempt.strategy,
            attempt.region,
            attempt.value,
            attempt.confidence,
            attempt.success
        );
        attempt
    }
}
