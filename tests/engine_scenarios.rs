//! End-to-end checks through `PriceEngine` with scripted renderer and
//! vision services.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use pricewatch::browser::{CapturedResponse, RenderSession, Renderer};
use pricewatch::engine::arbitration::ArbitrationPolicy;
use pricewatch::engine::preference::{
    MemoryPreferenceBacking, PreferenceBacking, PreferenceSettings,
};
use pricewatch::engine::{EngineSettings, PriceEngine};
use pricewatch::error::{ExtractError, PriceWatchError};
use pricewatch::extract::NetworkSettings;
use pricewatch::model::{
    AlertKind, Method, Source, TargetId, TargetPreference, TrackedTarget,
};
use pricewatch::store::{MemoryTargetStore, TargetStore};
use pricewatch::vision::client::{
    BBox, Detection, DetectionResponse, RecognitionResponse, RegionDetector, TextRecognizer,
};
use pricewatch::vision::VisionSettings;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EMPTY_PAGE: &str = "<html><head><title>Desk Lamp</title></head><body><p>Nothing here</p></body></html>";
const CAPTCHA_PAGE: &str = "<html><head><title>Security check</title></head><body>\
    <p>Please verify you are human. Complete the captcha to continue.</p></body></html>";

#[derive(Clone, Default)]
struct FakePage {
    responses: Vec<CapturedResponse>,
    response_delay: Duration,
    html: String,
    fail_load: bool,
    hang_load: bool,
    screenshot_delay: Duration,
}

impl FakePage {
    fn with_json(body: &str) -> Self {
        Self {
            responses: vec![CapturedResponse {
                url: "https://shop.example.com/api/product/1".to_string(),
                body: body.to_string(),
            }],
            html: EMPTY_PAGE.to_string(),
            ..Default::default()
        }
    }

    fn empty() -> Self {
        Self {
            html: EMPTY_PAGE.to_string(),
            ..Default::default()
        }
    }

    fn captcha() -> Self {
        Self {
            html: CAPTCHA_PAGE.to_string(),
            ..Default::default()
        }
    }
}

struct FakeRenderer {
    page: FakePage,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn open(&self) -> Result<Box<dyn RenderSession>, PriceWatchError> {
        Ok(Box::new(FakeSession {
            page: self.page.clone(),
        }))
    }
}

struct FakeSession {
    page: FakePage,
}

#[async_trait]
impl RenderSession for FakeSession {
    async fn install_traffic_observer(&self) -> Result<(), PriceWatchError> {
        Ok(())
    }

    async fn load(&self, url: &str) -> Result<(), PriceWatchError> {
        if self.page.hang_load {
            std::future::pending::<()>().await;
        }
        if self.page.fail_load {
            return Err(PriceWatchError::Render(format!("net::ERR_CONNECTION_RESET at {}", url)));
        }
        Ok(())
    }

    async fn wait_settled(&self) -> Result<(), PriceWatchError> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PriceWatchError> {
        tokio::time::sleep(self.page.screenshot_delay).await;
        Ok(b"screenshot".to_vec())
    }

    async fn query_text(&self, _selector: &str) -> Result<Vec<String>, PriceWatchError> {
        Ok(Vec::new())
    }

    async fn html(&self) -> Result<String, PriceWatchError> {
        Ok(self.page.html.clone())
    }

    async fn title(&self) -> Result<String, PriceWatchError> {
        Ok("Desk Lamp".to_string())
    }

    async fn captured_responses(&self) -> Result<Vec<CapturedResponse>, PriceWatchError> {
        tokio::time::sleep(self.page.response_delay).await;
        Ok(self.page.responses.clone())
    }

    async fn close(self: Box<Self>) -> Result<(), PriceWatchError> {
        Ok(())
    }
}

struct FakeDetector {
    confidence: Option<f64>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeDetector {
    fn region(confidence: f64) -> Self {
        Self {
            confidence: Some(confidence),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn nothing() -> Self {
        Self {
            confidence: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl RegionDetector for FakeDetector {
    async fn detect(&self, _: &[u8], _: f64) -> Result<DetectionResponse, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let detections = self
            .confidence
            .map(|confidence| {
                vec![Detection {
                    detection_id: Some(0),
                    bbox: [400.0, 300.0, 520.0, 340.0],
                    confidence,
                    class_name: Some("price".to_string()),
                }]
            })
            .unwrap_or_default();
        Ok(DetectionResponse {
            success: true,
            total_detections: detections.len(),
            detections,
            processing_time: 0.05,
            error: None,
        })
    }
}

struct FakeRecognizer {
    price: f64,
    confidence: f64,
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(
        &self,
        _: &[u8],
        _: Option<BBox>,
        strategy: &str,
    ) -> Result<RecognitionResponse, ExtractError> {
        Ok(RecognitionResponse {
            success: true,
            price: Some(self.price),
            currency: Some("USD".to_string()),
            extracted_text: format!("${:.2}", self.price),
            confidence: self.confidence,
            strategy: Some(strategy.to_string()),
            ..Default::default()
        })
    }
}

struct Harness {
    engine: PriceEngine,
    store: Arc<MemoryTargetStore>,
    preferences: Arc<MemoryPreferenceBacking>,
    detector: Arc<FakeDetector>,
}

const TARGET: TargetId = TargetId(1);

async fn harness(page: FakePage, detector: FakeDetector, recognizer: FakeRecognizer) -> Harness {
    harness_with(page, detector, recognizer, |_| {}).await
}

async fn harness_with(
    page: FakePage,
    detector: FakeDetector,
    recognizer: FakeRecognizer,
    edit: impl FnOnce(&mut TrackedTarget),
) -> Harness {
    let store = Arc::new(MemoryTargetStore::new());
    let mut target = TrackedTarget::new(
        TARGET,
        "https://shop.example.com/products/desk-lamp",
        "Desk Lamp",
    );
    edit(&mut target);
    store.insert(target).await;

    let preferences = Arc::new(MemoryPreferenceBacking::new());
    let detector = Arc::new(detector);
    let settings = EngineSettings {
        network: NetworkSettings {
            capture_window: Duration::ZERO,
            default_currency: "USD".to_string(),
            default_confidence: 0.8,
        },
        network_timeout: Duration::from_secs(20),
        render_timeout: Duration::from_secs(45),
        vision: VisionSettings {
            detection_threshold: 0.5,
            timeout: Duration::from_secs(30),
            default_currency: "USD".to_string(),
        },
        policy: ArbitrationPolicy::default(),
        preference: PreferenceSettings::default(),
    };
    let engine = PriceEngine::new(
        Arc::new(FakeRenderer { page }),
        detector.clone(),
        Arc::new(recognizer),
        store.clone(),
        preferences.clone(),
        settings,
    );
    Harness {
        engine,
        store,
        preferences,
        detector,
    }
}

async fn seed_preference(h: &Harness, method: Method, rate: f64) {
    h.preferences
        .save_preference(&TargetPreference {
            target_id: TARGET,
            preferred_method: method,
            success_rate: rate,
            last_used_at: Utc::now(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn agreeing_methods_use_primary_value() {
    let h = harness(
        FakePage::with_json(r#"{"product": {"price": 49.99, "confidence": 0.9}}"#),
        FakeDetector::region(0.9),
        FakeRecognizer {
            price: 49.95,
            confidence: 0.8,
        },
    )
    .await;

    let outcome = h.engine.check_price(TARGET).await.unwrap();
    assert_eq!(outcome.final_value, 49.95);
    assert_eq!(outcome.chosen_source, Source::Vision);
    assert!(outcome.matched);
    assert!(!outcome.needs_feedback);
    assert!(outcome.confirmed);
    assert_eq!(outcome.network.as_ref().unwrap().value, 49.99);
    assert!(!outcome.vision_attempts.is_empty());

    let history = h.store.history(TARGET).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].value, 49.95);

    let preference = h.preferences.load_preference(TARGET).await.unwrap().unwrap();
    assert_eq!(preference.preferred_method, Method::Hybrid);
    assert_eq!(preference.success_rate, 0.5);
}

#[tokio::test(start_paused = true)]
async fn network_timeout_falls_back_to_vision() {
    let mut page = FakePage::with_json(r#"{"price": 99.0}"#);
    page.response_delay = Duration::from_secs(60);
    let h = harness(
        page,
        FakeDetector::region(0.7),
        FakeRecognizer {
            price: 120.0,
            confidence: 0.8,
        },
    )
    .await;

    let outcome = h.engine.check_price(TARGET).await.unwrap();
    assert_eq!(outcome.final_value, 120.0);
    assert_eq!(outcome.chosen_source, Source::Vision);
    assert_eq!(outcome.method_label, "vision_fallback");
    assert!(outcome.network.is_none());
    assert!(outcome.reasons.iter().any(|r| r.contains("timed out")));
}

#[tokio::test]
async fn mismatch_prefers_confident_network() {
    let h = harness(
        FakePage::with_json(r#"{"price": 200.0, "confidence": 0.6}"#),
        FakeDetector::region(0.3),
        FakeRecognizer {
            price: 340.0,
            confidence: 0.5,
        },
    )
    .await;

    let outcome = h.engine.check_price(TARGET).await.unwrap();
    assert_eq!(outcome.final_value, 200.0);
    assert_eq!(outcome.chosen_source, Source::Network);
    assert!(!outcome.matched);
    assert!(outcome.needs_feedback);
    assert_eq!(outcome.vision.as_ref().unwrap().value, 340.0);
}

#[tokio::test]
async fn first_price_is_always_recorded() {
    let h = harness(
        FakePage::with_json(r#"{"price": 15.0}"#),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
    )
    .await;

    let outcome = h.engine.check_price(TARGET).await.unwrap();
    assert!(outcome.confirmed);
    assert_eq!(outcome.final_value, 15.0);
    assert_eq!(outcome.method_label, "network_fallback");

    let target = h.store.get_target(TARGET).await.unwrap();
    assert_eq!(target.current_price, Some(15.0));
    assert_eq!(h.store.history(TARGET).await.unwrap().len(), 1);
}

#[tokio::test]
async fn implausible_drop_is_not_recorded_but_resets_retry() {
    let h = harness_with(
        FakePage::with_json(r#"{"price": 1.0}"#),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
        |t| {
            t.current_price = Some(100.0);
            t.retry.mark_failed(Utc::now() - ChronoDuration::hours(2));
            t.retry.mark_failed(Utc::now() - ChronoDuration::hours(1));
        },
    )
    .await;

    let outcome = h.engine.check_price(TARGET).await.unwrap();
    assert!(!outcome.confirmed);
    assert!(outcome
        .plausibility_reason
        .as_deref()
        .unwrap()
        .starts_with("Price drop too extreme"));
    assert!(h.store.history(TARGET).await.unwrap().is_empty());

    let target = h.store.get_target(TARGET).await.unwrap();
    assert_eq!(target.current_price, Some(100.0));
    assert_eq!(target.retry.retry_count, 0);
    assert!(target.retry.next_retry_at.is_none());

    // Implausible results never create a preference
    assert!(h.preferences.load_preference(TARGET).await.unwrap().is_none());
}

#[tokio::test]
async fn alternative_feedback_switches_to_vision() {
    let h = harness(
        FakePage::empty(),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
    )
    .await;
    seed_preference(&h, Method::Network, 0.6).await;

    let method = h.engine.apply_feedback(TARGET, false, true).await.unwrap();
    assert_eq!(method, Method::Vision);

    let stored = h.preferences.load_preference(TARGET).await.unwrap().unwrap();
    assert_eq!(stored.preferred_method, Method::Vision);
    assert!((stored.success_rate - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn feedback_for_unknown_target_fails() {
    let h = harness(
        FakePage::empty(),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
    )
    .await;
    assert!(matches!(
        h.engine.apply_feedback(TargetId(404), true, false).await,
        Err(PriceWatchError::TargetNotFound(TargetId(404)))
    ));
}

#[tokio::test]
async fn both_failed_schedules_retry() {
    let h = harness(
        FakePage::empty(),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
    )
    .await;
    seed_preference(&h, Method::Hybrid, 0.5).await;

    let before = Utc::now();
    let (network, vision, next_retry_at) = match h.engine.check_price(TARGET).await {
        Err(PriceWatchError::BothFailed {
            network,
            vision,
            next_retry_at,
        }) => (network, vision, next_retry_at),
        other => panic!("expected BothFailed, got {:?}", other),
    };
    assert!(matches!(network, ExtractError::NotFound(_)));
    assert!(matches!(vision, ExtractError::NotFound(_)));
    assert!(next_retry_at.unwrap() >= before + ChronoDuration::minutes(10));

    let target = h.store.get_target(TARGET).await.unwrap();
    assert_eq!(target.retry.retry_count, 1);
    assert_eq!(target.retry.next_retry_at, next_retry_at);

    let preference = h.preferences.load_preference(TARGET).await.unwrap().unwrap();
    assert_eq!(preference.success_rate, 0.5);
}

#[tokio::test]
async fn load_failure_counts_as_both_failed() {
    let mut page = FakePage::with_json(r#"{"price": 10.0}"#);
    page.fail_load = true;
    let h = harness(
        page,
        FakeDetector::region(0.9),
        FakeRecognizer {
            price: 10.0,
            confidence: 0.9,
        },
    )
    .await;

    let err = h.engine.check_price(TARGET).await.unwrap_err();
    assert!(matches!(
        err,
        PriceWatchError::BothFailed {
            network: ExtractError::Render(_),
            vision: ExtractError::Render(_),
            ..
        }
    ));
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn trusted_preference_skips_arbitration() {
    let h = harness(
        FakePage::with_json(r#"{"price": 42.0}"#),
        FakeDetector::region(0.9),
        FakeRecognizer {
            price: 40.0,
            confidence: 0.9,
        },
    )
    .await;
    seed_preference(&h, Method::Network, 0.9).await;

    let outcome = h.engine.check_price(TARGET).await.unwrap();
    assert_eq!(outcome.final_value, 42.0);
    assert_eq!(outcome.method_label, "network_preferred");
    assert!(outcome.vision.is_none());
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);

    let preference = h.preferences.load_preference(TARGET).await.unwrap().unwrap();
    assert!((preference.success_rate - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn failing_preference_falls_through_to_arbitration() {
    let h = harness(
        FakePage::with_json(r#"{"price": 42.0}"#),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
    )
    .await;
    seed_preference(&h, Method::Vision, 0.9).await;

    let outcome = h.engine.check_price(TARGET).await.unwrap();
    assert_eq!(outcome.final_value, 42.0);
    assert_eq!(outcome.method_label, "network_fallback");
    assert!(outcome.reasons[0].starts_with("Preferred vision failed"));
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 2);

    // One step down for the failed preference, one step up for the check
    let preference = h.preferences.load_preference(TARGET).await.unwrap().unwrap();
    assert_eq!(preference.preferred_method, Method::Vision);
    assert!((preference.success_rate - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn failing_preference_is_not_penalized_when_both_fail() {
    let h = harness(
        FakePage::empty(),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
    )
    .await;
    seed_preference(&h, Method::Vision, 0.9).await;

    let err = h.engine.check_price(TARGET).await.unwrap_err();
    assert!(matches!(err, PriceWatchError::BothFailed { .. }));

    let preference = h.preferences.load_preference(TARGET).await.unwrap().unwrap();
    assert_eq!(preference.preferred_method, Method::Vision);
    assert!((preference.success_rate - 0.9).abs() < 1e-9);
    assert_eq!(h.store.get_target(TARGET).await.unwrap().retry.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn hung_page_load_hits_render_deadline() {
    let mut page = FakePage::with_json(r#"{"price": 10.0}"#);
    page.hang_load = true;
    let h = harness(
        page,
        FakeDetector::region(0.9),
        FakeRecognizer {
            price: 10.0,
            confidence: 0.9,
        },
    )
    .await;

    let checked = tokio::time::timeout(Duration::from_secs(3600), h.engine.check_price(TARGET))
        .await
        .expect("check should give up at the render deadline");
    match checked {
        Err(PriceWatchError::BothFailed {
            network: ExtractError::Timeout { method, after },
            vision: ExtractError::Timeout { .. },
            next_retry_at,
        }) => {
            assert_eq!(method, "render");
            assert_eq!(after, Duration::from_secs(45));
            assert!(next_retry_at.is_some());
        }
        other => panic!("expected render timeout, got {:?}", other),
    }
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.get_target(TARGET).await.unwrap().retry.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn screenshot_and_ensemble_share_the_vision_deadline() {
    let mut page = FakePage::with_json(r#"{"price": 30.0}"#);
    page.screenshot_delay = Duration::from_secs(25);
    let h = harness(
        page,
        FakeDetector::region(0.9).slow(Duration::from_secs(10)),
        FakeRecognizer {
            price: 30.0,
            confidence: 0.9,
        },
    )
    .await;

    let outcome = h.engine.check_price(TARGET).await.unwrap();
    assert_eq!(outcome.method_label, "network_fallback");
    assert!(outcome.vision.is_none());
    assert!(outcome
        .reasons
        .iter()
        .any(|r| r.contains("vision ensemble timed out")));
}

#[tokio::test]
async fn blocked_page_skips_dom_and_falls_back_to_vision() {
    let h = harness(
        FakePage::captcha(),
        FakeDetector::region(0.9),
        FakeRecognizer {
            price: 25.0,
            confidence: 0.9,
        },
    )
    .await;

    let outcome = h.engine.check_price(TARGET).await.unwrap();
    assert_eq!(outcome.method_label, "vision_fallback");
    assert_eq!(outcome.final_value, 25.0);
    assert!(outcome.network.is_none());
    assert!(outcome.reasons.iter().any(|r| r.contains("Page is blocked")));
}

#[tokio::test]
async fn blocked_page_without_vision_is_both_failed() {
    let h = harness(
        FakePage::captcha(),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
    )
    .await;

    let err = h.engine.check_price(TARGET).await.unwrap_err();
    assert!(matches!(
        err,
        PriceWatchError::BothFailed {
            network: ExtractError::Blocked(_),
            vision: ExtractError::NotFound(_),
            ..
        }
    ));
}

#[tokio::test]
async fn accepted_price_fires_alerts_once() {
    let h = harness(
        FakePage::with_json(r#"{"price": 45.0}"#),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
    )
    .await;
    h.store
        .add_alert(TARGET, AlertKind::PriceDrop { target_price: 50.0 })
        .await
        .unwrap();

    let first = h.engine.check_price(TARGET).await.unwrap();
    assert_eq!(first.triggered_alerts.len(), 1);
    let second = h.engine.check_price(TARGET).await.unwrap();
    assert!(second.triggered_alerts.is_empty());
}

#[tokio::test]
async fn due_retries_are_processed() {
    let h = harness_with(
        FakePage::with_json(r#"{"price": 30.0}"#),
        FakeDetector::nothing(),
        FakeRecognizer {
            price: 0.0,
            confidence: 0.0,
        },
        |t| t.retry.mark_failed(Utc::now() - ChronoDuration::hours(1)),
    )
    .await;
    let healthy = h
        .store
        .add_target("https://shop.example.com/products/chair", "Chair")
        .await
        .unwrap();

    let results = h.engine.process_due_retries(Utc::now()).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, TARGET);
    assert_eq!(results[0].1.as_ref().unwrap().final_value, 30.0);

    assert_eq!(h.store.get_target(TARGET).await.unwrap().retry.retry_count, 0);
    assert!(h.store.get_target(healthy.id).await.unwrap().current_price.is_none());
}
