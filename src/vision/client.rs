//! Typed clients for the external region-detection and text-recognition
//! services.

use crate::error::ExtractError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `[x1, y1, x2, y2]` in image pixels.
pub type BBox = [f64; 4];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub detection_id: Option<u32>,
    pub bbox: BBox,
    pub confidence: f64,
    #[serde(default, rename = "class")]
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub total_detections: usize,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub extracted_text: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub strategies_tried: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DetectionRequest<'a> {
    image_data: &'a str,
    confidence_threshold: f64,
    return_crops: bool,
}

#[derive(Debug, Serialize)]
struct RecognitionRequest<'a> {
    image_data: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bbox: Option<BBox>,
    strategy: &'a str,
}

#[async_trait]
pub trait RegionDetector: Send + Sync {
    async fn detect(&self, image: &[u8], threshold: f64) -> Result<DetectionResponse, ExtractError>;
}

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize the price inside `bbox`, or anywhere in the image when `None`.
    async fn recognize(
        &self,
        image: &[u8],
        bbox: Option<BBox>,
        strategy: &str,
    ) -> Result<RecognitionResponse, ExtractError>;
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pricewatch/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn map_request_error(service: &'static str, timeout: Duration, e: reqwest::Error) -> ExtractError {
    if e.is_timeout() {
        ExtractError::Timeout {
            method: service,
            after: timeout,
        }
    } else {
        ExtractError::Service(format!("{} request failed: {}", service, e))
    }
}

async fn check_health(client: &reqwest::Client, base_url: &str) -> Result<(), ExtractError> {
    let url = format!("{}/health", base_url);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ExtractError::Service(format!("{}: {}", url, e)))?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(ExtractError::Service(format!(
            "{} returned HTTP {}",
            url,
            response.status()
        )))
    }
}

pub struct HttpRegionDetector {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRegionDetector {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub async fn health(&self) -> Result<(), ExtractError> {
        check_health(&self.client, &self.base_url).await
    }
}

#[async_trait]
impl RegionDetector for HttpRegionDetector {
    async fn detect(&self, image: &[u8], threshold: f64) -> Result<DetectionResponse, ExtractError> {
        let encoded = STANDARD.encode(image);
        let request = DetectionRequest {
            image_data: &encoded,
            confidence_threshold: threshold,
            return_crops: false,
        };

        let response = self
            .client
            .post(format!("{}/detect-prices", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error("region detector", self.timeout, e))?;

        if !response.status().is_success() {
            return Err(ExtractError::Service(format!(
                "region detector returned HTTP {}",
                response.status()
            )));
        }

        let body: DetectionResponse = response
            .json()
            .await
            .map_err(|e| map_request_error("region detector", self.timeout, e))?;
        tracing::debug!(
            "Detector found {} regions in {:.2}s",
            body.detections.len(),
            body.processing_time
        );
        Ok(body)
    }
}

pub struct HttpTextRecognizer {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTextRecognizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub async fn health(&self) -> Result<(), ExtractError> {
        check_health(&self.client, &self.base_url).await
    }
}

#[async_trait]
impl TextRecognizer for HttpTextRecognizer {
    async fn recognize(
        &self,
        image: &[u8],
        bbox: Option<BBox>,
        strategy: &str,
    ) -> Result<RecognitionResponse, ExtractError> {
        let encoded = STANDARD.encode(image);
        let request = RecognitionRequest {
            image_data: &encoded,
            bbox,
            strategy,
        };

        let response = self
            .client
            .post(format!("{}/extract-price", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error("text recognizer", self.timeout, e))?;

        if !response.status().is_success() {
            return Err(ExtractError::Service(format!(
                "text recognizer returned HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| map_request_error("text recognizer", self.timeout, e))
    }
}
