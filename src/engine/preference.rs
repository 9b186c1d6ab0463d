//! Per-target learned extraction method.
//!
//! `PreferenceStore` is the only writer of `TargetPreference`. Reads go
//! through an in-process cache that is filled from the backing storage on
//! first access; every mutation writes through to the backing storage while
//! the store's lock is held, so concurrent outcomes for a target never
//! interleave their read-modify-write.

use crate::error::PriceWatchError;
use crate::model::{Method, TargetId, TargetPreference};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreferenceSettings {
    /// A preference is trusted (single-method check) above this success rate.
    pub trust_threshold: f64,
    pub step: f64,
    /// Success rate a new preference starts from.
    pub neutral_rate: f64,
}

impl Default for PreferenceSettings {
    fn default() -> Self {
        Self {
            trust_threshold: 0.8,
            step: 0.1,
            neutral_rate: 0.5,
        }
    }
}

/// Persistence for preferences, keyed by target id.
#[async_trait]
pub trait PreferenceBacking: Send + Sync {
    async fn load_preference(
        &self,
        id: TargetId,
    ) -> Result<Option<TargetPreference>, PriceWatchError>;

    async fn save_preference(&self, preference: &TargetPreference) -> Result<(), PriceWatchError>;
}

#[derive(Default)]
pub struct MemoryPreferenceBacking {
    rows: std::sync::Mutex<HashMap<TargetId, TargetPreference>>,
}

impl MemoryPreferenceBacking {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceBacking for MemoryPreferenceBacking {
    async fn load_preference(
        &self,
        id: TargetId,
    ) -> Result<Option<TargetPreference>, PriceWatchError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| PriceWatchError::Storage("preference table poisoned".to_string()))?;
        Ok(rows.get(&id).cloned())
    }

    async fn save_preference(&self, preference: &TargetPreference) -> Result<(), PriceWatchError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| PriceWatchError::Storage("preference table poisoned".to_string()))?;
        rows.insert(preference.target_id, preference.clone());
        Ok(())
    }
}

pub struct PreferenceStore {
    backing: Arc<dyn PreferenceBacking>,
    cache: Mutex<HashMap<TargetId, TargetPreference>>,
    settings: PreferenceSettings,
}

fn step_rate(rate: f64, delta: f64) -> f64 {
    (rate + delta).clamp(0.0, 1.0)
}

impl PreferenceStore {
    pub fn new(backing: Arc<dyn PreferenceBacking>, settings: PreferenceSettings) -> Self {
        Self {
            backing,
            cache: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &PreferenceSettings {
        &self.settings
    }

    pub async fn get(&self, id: TargetId) -> Result<Option<TargetPreference>, PriceWatchError> {
        let mut cache = self.cache.lock().await;
        self.cached(&mut cache, id).await
    }

    /// The preferred method if it is trusted enough to skip arbitration.
    pub async fn trusted_method(&self, id: TargetId) -> Result<Option<Method>, PriceWatchError> {
        let preference = self.get(id).await?;
        Ok(preference
            .filter(|p| p.preferred_method != Method::Hybrid)
            .filter(|p| p.success_rate > self.settings.trust_threshold)
            .map(|p| p.preferred_method))
    }

    /// Move the success rate one step after a check.
    ///
    /// A successful outcome creates the preference at the neutral rate with
    /// `method` when none exists yet; failures never create one. An existing
    /// preference keeps its method.
    pub async fn record_outcome(
        &self,
        id: TargetId,
        method: Method,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<TargetPreference>, PriceWatchError> {
        let mut cache = self.cache.lock().await;
        let updated = match self.cached(&mut cache, id).await? {
            Some(mut preference) => {
                let delta = if succeeded {
                    self.settings.step
                } else {
                    -self.settings.step
                };
                preference.success_rate = step_rate(preference.success_rate, delta);
                preference.last_used_at = now;
                preference
            }
            None if succeeded => TargetPreference {
                target_id: id,
                preferred_method: method,
                success_rate: self.settings.neutral_rate,
                last_used_at: now,
            },
            None => return Ok(None),
        };

        self.write(&mut cache, updated.clone()).await?;
        tracing::debug!(
            "Preference for target {}: {} at {:.2}",
            id,
            updated.preferred_method,
            updated.success_rate
        );
        Ok(Some(updated))
    }

    /// Apply explicit user feedback on the last outcome and return the
    /// stored method afterwards.
    pub async fn apply_feedback(
        &self,
        id: TargetId,
        primary_confirmed: bool,
        alternative_confirmed: bool,
        now: DateTime<Utc>,
    ) -> Result<Method, PriceWatchError> {
        let mut cache = self.cache.lock().await;
        let mut preference = self
            .cached(&mut cache, id)
            .await?
            .unwrap_or_else(|| TargetPreference {
                target_id: id,
                preferred_method: Method::Hybrid,
                success_rate: self.settings.neutral_rate,
                last_used_at: now,
            });

        let step = self.settings.step;
        if primary_confirmed {
            preference.success_rate = step_rate(preference.success_rate, step);
        } else if alternative_confirmed {
            let previous = preference.preferred_method;
            preference.preferred_method = previous.complement();
            preference.success_rate = step_rate(preference.success_rate, step);
            tracing::info!(
                "Target {} switched from {} to {} after feedback",
                id,
                previous,
                preference.preferred_method
            );
        } else {
            preference.success_rate = step_rate(preference.success_rate, -step);
        }
        preference.last_used_at = now;

        let method = preference.preferred_method;
        self.write(&mut cache, preference).await?;
        Ok(method)
    }

    async fn cached(
        &self,
        cache: &mut HashMap<TargetId, TargetPreference>,
        id: TargetId,
    ) -> Result<Option<TargetPreference>, PriceWatchError> {
        if let Some(hit) = cache.get(&id) {
            return Ok(Some(hit.clone()));
        }
        let loaded = self.backing.load_preference(id).await?;
        if let Some(ref preference) = loaded {
            cache.insert(id, preference.clone());
        }
        Ok(loaded)
    }

    async fn write(
        &self,
        cache: &mut HashMap<TargetId, TargetPreference>,
        preference: TargetPreference,
    ) -> Result<(), PriceWatchError> {
        self.backing.save_preference(&preference).await?;
        cache.insert(preference.target_id, preference);
        Ok(())
    }
}
