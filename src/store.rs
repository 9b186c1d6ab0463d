//! Tracked targets, their price history and their learned preferences.

use crate::engine::preference::PreferenceBacking;
use crate::error::PriceWatchError;
use crate::model::{
    AlertKind, PriceAlert, PriceHistoryPoint, PriceUpdate, RetryState, TargetId,
    TargetPreference, TrackedTarget,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get_target(&self, id: TargetId) -> Result<TrackedTarget, PriceWatchError>;

    async fn list_targets(&self) -> Result<Vec<TrackedTarget>, PriceWatchError>;

    async fn add_target(&self, url: &str, name: &str) -> Result<TrackedTarget, PriceWatchError>;

    async fn add_alert(&self, id: TargetId, kind: AlertKind) -> Result<PriceAlert, PriceWatchError>;

    /// Store an accepted price: update the target, append a history row and
    /// return the alerts that fired because of it.
    async fn record_price(
        &self,
        id: TargetId,
        update: &PriceUpdate,
    ) -> Result<Vec<PriceAlert>, PriceWatchError>;

    async fn save_retry_state(&self, id: TargetId, state: &RetryState)
        -> Result<(), PriceWatchError>;

    async fn history(&self, id: TargetId) -> Result<Vec<PriceHistoryPoint>, PriceWatchError>;
}

/// Fire every active alert the new price satisfies. Fired alerts are
/// deactivated so each fires at most once.
pub fn evaluate_alerts(
    target: &mut TrackedTarget,
    value: f64,
    now: DateTime<Utc>,
) -> Vec<PriceAlert> {
    let original = target.original_price.filter(|o| *o > 0.0);
    let mut fired = Vec::new();
    for alert in target.alerts.iter_mut().filter(|a| a.active) {
        let hit = match alert.kind {
            AlertKind::PriceDrop { target_price } => value <= target_price,
            AlertKind::PercentageDrop { percentage } => original
                .map(|o| (o - value) / o * 100.0 >= percentage)
                .unwrap_or(false),
        };
        if hit {
            alert.active = false;
            alert.triggered_at = Some(now);
            fired.push(alert.clone());
        }
    }
    if !fired.is_empty() {
        tracing::info!("{} alert(s) fired for target {}", fired.len(), target.id);
    }
    fired
}

/// Table shared by both store implementations.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TargetTable {
    next_id: u64,
    next_alert_id: u64,
    targets: BTreeMap<TargetId, TrackedTarget>,
}

impl TargetTable {
    fn get(&self, id: TargetId) -> Result<&TrackedTarget, PriceWatchError> {
        self.targets.get(&id).ok_or(PriceWatchError::TargetNotFound(id))
    }

    fn get_mut(&mut self, id: TargetId) -> Result<&mut TrackedTarget, PriceWatchError> {
        self.targets
            .get_mut(&id)
            .ok_or(PriceWatchError::TargetNotFound(id))
    }

    fn insert(&mut self, url: &str, name: &str) -> TrackedTarget {
        self.next_id += 1;
        let target = TrackedTarget::new(TargetId(self.next_id), url, name);
        self.targets.insert(target.id, target.clone());
        target
    }

    fn add_alert(&mut self, id: TargetId, kind: AlertKind) -> Result<PriceAlert, PriceWatchError> {
        let alert_id = self.next_alert_id + 1;
        let target = self.get_mut(id)?;
        let alert = PriceAlert {
            id: alert_id,
            kind,
            active: true,
            created_at: Utc::now(),
            triggered_at: None,
        };
        target.alerts.push(alert.clone());
        self.next_alert_id = alert_id;
        Ok(alert)
    }

    fn apply_price(
        &mut self,
        id: TargetId,
        update: &PriceUpdate,
    ) -> Result<(PriceHistoryPoint, Vec<PriceAlert>), PriceWatchError> {
        let target = self.get_mut(id)?;
        target.current_price = Some(update.value);
        if update.original_value.is_some() {
            target.original_price = update.original_value;
        }
        target.currency = Some(update.currency.clone());
        target.last_checked = Some(update.checked_at);
        let fired = evaluate_alerts(target, update.value, update.checked_at);

        let point = PriceHistoryPoint {
            target_id: id,
            value: update.value,
            currency: update.currency.clone(),
            discount_percent: update.discount_percent,
            original_value: update.original_value,
            checked_at: update.checked_at,
        };
        Ok((point, fired))
    }
}

#[derive(Default)]
struct MemoryState {
    table: TargetTable,
    history: Vec<PriceHistoryPoint>,
}

/// Process-local store for tests and embedding.
#[derive(Default)]
pub struct MemoryTargetStore {
    state: Mutex<MemoryState>,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully built target, keeping its id.
    pub async fn insert(&self, target: TrackedTarget) {
        let mut state = self.state.lock().await;
        state.table.next_id = state.table.next_id.max(target.id.0);
        state.table.targets.insert(target.id, target);
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn get_target(&self, id: TargetId) -> Result<TrackedTarget, PriceWatchError> {
        self.state.lock().await.table.get(id).cloned()
    }

    async fn list_targets(&self) -> Result<Vec<TrackedTarget>, PriceWatchError> {
        Ok(self.state.lock().await.table.targets.values().cloned().collect())
    }

    async fn add_target(&self, url: &str, name: &str) -> Result<TrackedTarget, PriceWatchError> {
        Ok(self.state.lock().await.table.insert(url, name))
    }

    async fn add_alert(&self, id: TargetId, kind: AlertKind) -> Result<PriceAlert, PriceWatchError> {
        self.state.lock().await.table.add_alert(id, kind)
    }

    async fn record_price(
        &self,
        id: TargetId,
        update: &PriceUpdate,
    ) -> Result<Vec<PriceAlert>, PriceWatchError> {
        let mut state = self.state.lock().await;
        let (point, fired) = state.table.apply_price(id, update)?;
        state.history.push(point);
        Ok(fired)
    }

    async fn save_retry_state(
        &self,
        id: TargetId,
        retry: &RetryState,
    ) -> Result<(), PriceWatchError> {
        let mut state = self.state.lock().await;
        state.table.get_mut(id)?.retry = retry.clone();
        Ok(())
    }

    async fn history(&self, id: TargetId) -> Result<Vec<PriceHistoryPoint>, PriceWatchError> {
        let state = self.state.lock().await;
        state.table.get(id)?;
        Ok(state
            .history
            .iter()
            .filter(|p| p.target_id == id)
            .cloned()
            .collect())
    }
}

const TARGETS_FILE: &str = "targets.json";
const HISTORY_FILE: &str = "history.json";
const PREFERENCES_FILE: &str = "preferences.json";

/// Pretty-printed JSON files in one directory. Every call reads the files
/// it needs and rewrites the ones it changed; the lock serializes writers
/// within the process.
pub struct JsonFileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T, PriceWatchError> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(T::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            PriceWatchError::Storage(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PriceWatchError::Storage(format!("Corrupt store file {}: {}", path.display(), e))
        })
    }

    fn write<T: Serialize>(&self, file: &str, data: &T) -> Result<(), PriceWatchError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            PriceWatchError::Storage(format!("Failed to create data dir: {}", e))
        })?;
        let path = self.dir.join(file);
        let staged = self.dir.join(format!("{}.tmp", file));
        let content = serde_json::to_string_pretty(data)?;
        // Readers never see a half-written file
        std::fs::write(&staged, content)
            .and_then(|_| std::fs::rename(&staged, &path))
            .map_err(|e| {
                PriceWatchError::Storage(format!("Failed to write {}: {}", path.display(), e))
            })?;
        tracing::debug!("Saved {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl TargetStore for JsonFileStore {
    async fn get_target(&self, id: TargetId) -> Result<TrackedTarget, PriceWatchError> {
        let _guard = self.lock.lock().await;
        let table: TargetTable = self.read(TARGETS_FILE)?;
        table.get(id).cloned()
    }

    async fn list_targets(&self) -> Result<Vec<TrackedTarget>, PriceWatchError> {
        let _guard = self.lock.lock().await;
        let table: TargetTable = self.read(TARGETS_FILE)?;
        Ok(table.targets.into_values().collect())
    }

    async fn add_target(&self, url: &str, name: &str) -> Result<TrackedTarget, PriceWatchError> {
        let _guard = self.lock.lock().await;
        let mut table: TargetTable = self.read(TARGETS_FILE)?;
        let target = table.insert(url, name);
        self.write(TARGETS_FILE, &table)?;
        tracing::info!("Tracking target {}: {}", target.id, target.url);
        Ok(target)
    }

    async fn add_alert(&self, id: TargetId, kind: AlertKind) -> Result<PriceAlert, PriceWatchError> {
        let _guard = self.lock.lock().await;
        let mut table: TargetTable = self.read(TARGETS_FILE)?;
        let alert = table.add_alert(id, kind)?;
        self.write(TARGETS_FILE, &table)?;
        Ok(alert)
    }

    async fn record_price(
        &self,
        id: TargetId,
        update: &PriceUpdate,
    ) -> Result<Vec<PriceAlert>, PriceWatchError> {
        let _guard = self.lock.lock().await;
        let mut table: TargetTable = self.read(TARGETS_FILE)?;
        let (point, fired) = table.apply_price(id, update)?;
        let mut history: Vec<PriceHistoryPoint> = self.read(HISTORY_FILE)?;
        history.push(point);
        self.write(TARGETS_FILE, &table)?;
        self.write(HISTORY_FILE, &history)?;
        Ok(fired)
    }

    async fn save_retry_state(
        &self,
        id: TargetId,
        state: &RetryState,
    ) -> Result<(), PriceWatchError> {
        let _guard = self.lock.lock().await;
        let mut table: TargetTable = self.read(TARGETS_FILE)?;
        table.get_mut(id)?.retry = state.clone();
        self.write(TARGETS_FILE, &table)
    }

    async fn history(&self, id: TargetId) -> Result<Vec<PriceHistoryPoint>, PriceWatchError> {
        let _guard = self.lock.lock().await;
        let history: Vec<PriceHistoryPoint> = self.read(HISTORY_FILE)?;
        Ok(history.into_iter().filter(|p| p.target_id == id).collect())
    }
}

#[async_trait]
impl PreferenceBacking for JsonFileStore {
    async fn load_preference(
        &self,
        id: TargetId,
    ) -> Result<Option<TargetPreference>, PriceWatchError> {
        let _guard = self.lock.lock().await;
        let rows: Vec<TargetPreference> = self.read(PREFERENCES_FILE)?;
        Ok(rows.into_iter().find(|p| p.target_id == id))
    }

    async fn save_preference(&self, preference: &TargetPreference) -> Result<(), PriceWatchError> {
        let _guard = self.lock.lock().await;
        let mut rows: Vec<TargetPreference> = self.read(PREFERENCES_FILE)?;
        match rows.iter_mut().find(|p| p.target_id == preference.target_id) {
            Some(row) => *row = preference.clone(),
            None => rows.push(preference.clone()),
        }
        self.write(PREFERENCES_FILE, &rows)
    }
}
