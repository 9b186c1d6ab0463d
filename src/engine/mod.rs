//! The price check pipeline: render, extract concurrently, arbitrate, gate.

pub mod arbitration;
pub mod plausibility;
pub mod preference;
pub mod retry;

use crate::browser::{RenderSession, Renderer};
use crate::error::{ExtractError, PriceWatchError};
use crate::extract::{NetworkExtractor, NetworkSettings};
use crate::model::{
    ArbitrationOutcome, ExtractionResult, Method, PriceUpdate, RecognitionAttempt, TargetId,
    TrackedTarget,
};
use crate::store::TargetStore;
use crate::vision::client::{RegionDetector, TextRecognizer};
use crate::vision::{VisionEnsemble, VisionSettings};
use arbitration::{ArbitrationPolicy, Decision, Rule};
use chrono::{DateTime, Utc};
use preference::{PreferenceBacking, PreferenceSettings, PreferenceStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub network: NetworkSettings,
    /// Deadline for the whole network branch, DOM fallback included.
    pub network_timeout: Duration,
    /// Deadline for opening, loading and settling the page.
    pub render_timeout: Duration,
    pub vision: VisionSettings,
    pub policy: ArbitrationPolicy,
    pub preference: PreferenceSettings,
}

type BranchResult = Result<ExtractionResult, ExtractError>;

pub struct PriceEngine {
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn TargetStore>,
    preferences: PreferenceStore,
    network: NetworkExtractor,
    vision: VisionEnsemble,
    network_timeout: Duration,
    render_timeout: Duration,
    policy: ArbitrationPolicy,
    locks: std::sync::Mutex<HashMap<TargetId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PriceEngine {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        detector: Arc<dyn RegionDetector>,
        recognizer: Arc<dyn TextRecognizer>,
        store: Arc<dyn TargetStore>,
        preference_backing: Arc<dyn PreferenceBacking>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            renderer,
            store,
            preferences: PreferenceStore::new(preference_backing, settings.preference),
            network: NetworkExtractor::new(settings.network),
            vision: VisionEnsemble::new(detector, recognizer, settings.vision),
            network_timeout: settings.network_timeout,
            render_timeout: settings.render_timeout,
            policy: settings.policy,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TargetStore> {
        &self.store
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// Check one target and return the arbitrated price.
    ///
    /// Only a check where neither method produced a price is an error
    /// (`BothFailed`, carrying the next retry time). A rejected but extracted
    /// price comes back as an unconfirmed outcome.
    pub async fn check_price(&self, id: TargetId) -> Result<ArbitrationOutcome, PriceWatchError> {
        let lock = self.target_lock(id);
        let _guard = lock.lock().await;

        let target = self.store.get_target(id).await?;
        let marketplace = self.policy.is_marketplace(&target.url);
        tracing::info!(
            "Checking target {} ({}, {} domain)",
            id,
            target.url,
            if marketplace { "marketplace" } else { "standard" }
        );

        let mut preface = Vec::new();
        let mut failed_preference = None;
        if let Some(method) = self.preferences.trusted_method(id).await? {
            match self.run_preferred(&target, method).await {
                Ok((result, attempts)) => {
                    let decision = Decision {
                        confidence: result.confidence,
                        matched: false,
                        needs_feedback: false,
                        rule: Rule::SingleMethod,
                        method_label: format!("{}_preferred", method),
                        reasons: vec![format!(
                            "Trusted {} preference, skipped arbitration ({} found {:.2})",
                            method, result.method_label, result.value
                        )],
                        chosen: result.clone(),
                    };
                    let (network, vision) = match method {
                        Method::Network => (Some(result), None),
                        _ => (None, Some(result)),
                    };
                    return self
                        .finish(&target, decision, method, network, vision, attempts)
                        .await;
                }
                Err(e) => {
                    tracing::warn!("Preferred {} failed for target {}: {}", method, id, e);
                    failed_preference = Some(method);
                    preface.push(format!(
                        "Preferred {} failed ({}), running full arbitration",
                        method, e
                    ));
                }
            }
        }

        let (network, vision, attempts) = self.run_both(&target).await;

        match arbitration::arbitrate(&network, &vision, marketplace, &self.policy) {
            Ok(mut decision) => {
                // The preferred method is only penalized once the check
                // produced a price some other way
                if let Some(method) = failed_preference {
                    self.preferences
                        .record_outcome(id, method, false, Utc::now())
                        .await?;
                }
                preface.append(&mut decision.reasons);
                decision.reasons = preface;
                let learned = if decision.matched {
                    Method::Hybrid
                } else {
                    Method::from(decision.chosen.source)
                };
                self.finish(&target, decision, learned, network.ok(), vision.ok(), attempts)
                    .await
            }
            Err((network_err, vision_err)) => {
                let mut retry = target.retry.clone();
                retry.mark_failed(Utc::now());
                self.store.save_retry_state(id, &retry).await?;
                tracing::warn!(
                    "Both methods failed for target {}, retry #{} at {:?}",
                    id,
                    retry.retry_count,
                    retry.next_retry_at
                );
                Err(PriceWatchError::BothFailed {
                    network: network_err,
                    vision: vision_err,
                    next_retry_at: retry.next_retry_at,
                })
            }
        }
    }

    /// Apply user feedback on the last outcome and return the stored method.
    pub async fn apply_feedback(
        &self,
        id: TargetId,
        primary_confirmed: bool,
        alternative_confirmed: bool,
    ) -> Result<Method, PriceWatchError> {
        self.store.get_target(id).await?;
        self.preferences
            .apply_feedback(id, primary_confirmed, alternative_confirmed, Utc::now())
            .await
    }

    /// Re-check every target whose retry is due at `now`, one at a time.
    pub async fn process_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TargetId, Result<ArbitrationOutcome, PriceWatchError>)>, PriceWatchError>
    {
        let targets = self.store.list_targets().await?;
        let due = retry::due(&targets, now);
        tracing::info!("{} of {} targets due for retry", due.len(), targets.len());

        let mut results = Vec::with_capacity(due.len());
        for target in due {
            tracing::info!(
                "Retrying target {} ({}) after {} failures",
                target.id(),
                target.url(),
                target.retry_count()
            );
            results.push((target.id(), self.check_price(target.id()).await));
        }
        Ok(results)
    }

    fn target_lock(&self, id: TargetId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Open a session with the traffic observer installed and the page
    /// loaded and settled, all within the render deadline.
    async fn open_page(&self, url: &str) -> Result<Box<dyn RenderSession>, ExtractError> {
        let deadline = tokio::time::Instant::now() + self.render_timeout;
        let expired = || ExtractError::Timeout {
            method: "render",
            after: self.render_timeout,
        };

        let session = tokio::time::timeout_at(deadline, self.renderer.open())
            .await
            .map_err(|_| expired())??;
        let prepared = tokio::time::timeout_at(deadline, async {
            session.install_traffic_observer().await?;
            session.load(url).await?;
            session.wait_settled().await
        })
        .await;
        match prepared {
            Ok(Ok(())) => Ok(session),
            Ok(Err(e)) => {
                close(session).await;
                Err(e.into())
            }
            Err(_) => {
                close(session).await;
                Err(expired())
            }
        }
    }

    async fn run_both(&self, target: &TrackedTarget) -> (BranchResult, BranchResult, Vec<RecognitionAttempt>) {
        let session = match self.open_page(&target.url).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Could not render {}: {}", target.url, e);
                return (Err(e.clone()), Err(e), Vec::new());
            }
        };

        let (network, (vision, attempts)) = tokio::join!(
            self.network_branch(session.as_ref(), &target.url),
            self.vision_branch(session.as_ref()),
        );
        close(session).await;
        (network, vision, attempts)
    }

    async fn run_preferred(
        &self,
        target: &TrackedTarget,
        method: Method,
    ) -> Result<(ExtractionResult, Vec<RecognitionAttempt>), ExtractError> {
        tracing::info!("Using trusted {} preference for target {}", method, target.id);
        let session = self.open_page(&target.url).await?;
        let outcome = match method {
            Method::Network => self
                .network_branch(session.as_ref(), &target.url)
                .await
                .map(|r| (r, Vec::new())),
            _ => {
                let (result, attempts) = self.vision_branch(session.as_ref()).await;
                result.map(|r| (r, attempts))
            }
        };
        close(session).await;
        outcome
    }

    async fn network_branch(&self, session: &dyn RenderSession, url: &str) -> BranchResult {
        match tokio::time::timeout(self.network_timeout, self.network.extract(session, url)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractError::Timeout {
                method: "network extraction",
                after: self.network_timeout,
            }),
        }
    }

    async fn vision_branch(&self, session: &dyn RenderSession) -> (BranchResult, Vec<RecognitionAttempt>) {
        // One budget covers the screenshot and the ensemble
        let timeout = self.vision.timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let screenshot = match tokio::time::timeout_at(deadline, session.screenshot()).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return (Err(e.into()), Vec::new()),
            Err(_) => {
                return (
                    Err(ExtractError::Timeout {
                        method: "screenshot",
                        after: timeout,
                    }),
                    Vec::new(),
                )
            }
        };
        let report = self.vision.extract_until(&screenshot, deadline).await;
        (report.result, report.attempts)
    }

    /// Gate the decided price, persist what is accepted and update the
    /// retry and preference state.
    async fn finish(
        &self,
        target: &TrackedTarget,
        decision: Decision,
        learned: Method,
        network: Option<ExtractionResult>,
        vision: Option<ExtractionResult>,
        vision_attempts: Vec<RecognitionAttempt>,
    ) -> Result<ArbitrationOutcome, PriceWatchError> {
        let now = Utc::now();
        let chosen = &decision.chosen;
        let (plausible, reason) = plausibility::is_plausible(target, chosen.value);

        let mut triggered_alerts = Vec::new();
        if plausible {
            let update = PriceUpdate {
                value: chosen.value,
                currency: chosen.currency.clone(),
                original_value: chosen.original_value,
                discount_percent: chosen.discount_percent(),
                checked_at: now,
            };
            triggered_alerts = self.store.record_price(target.id, &update).await?;
        } else {
            tracing::warn!("Target {}: {}", target.id, reason);
        }

        // Extraction worked either way, so the retry schedule resets
        let mut retry = target.retry.clone();
        retry.mark_success();
        self.store.save_retry_state(target.id, &retry).await?;

        self.preferences
            .record_outcome(target.id, learned, plausible, now)
            .await?;

        Ok(ArbitrationOutcome {
            target_id: target.id,
            final_value: chosen.value,
            currency: chosen.currency.clone(),
            chosen_source: chosen.source,
            confidence: decision.confidence,
            matched: decision.matched,
            method_label: decision.method_label,
            reasons: decision.reasons,
            network,
            vision,
            needs_feedback: decision.needs_feedback,
            confirmed: plausible,
            plausibility_reason: (!plausible).then_some(reason),
            vision_attempts,
            triggered_alerts,
            checked_at: now,
        })
    }
}

async fn close(session: Box<dyn RenderSession>) {
    if let Err(e) = session.close().await {
        tracing::debug!("Failed to close render session: {}", e);
    }
}
