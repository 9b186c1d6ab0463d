//! File-backed store round trips in a temporary data directory.

use chrono::Utc;
use pricewatch::engine::preference::{PreferenceBacking, PreferenceSettings, PreferenceStore};
use pricewatch::error::PriceWatchError;
use pricewatch::model::{AlertKind, Method, PriceUpdate, TargetId};
use pricewatch::store::{JsonFileStore, TargetStore};
use std::sync::Arc;

fn update(value: f64, original: Option<f64>) -> PriceUpdate {
    PriceUpdate {
        value,
        currency: "EUR".to_string(),
        original_value: original,
        discount_percent: original.map(|o| (o - value) / o * 100.0),
        checked_at: Utc::now(),
    }
}

#[tokio::test]
async fn targets_and_history_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("pricewatch");

    let store = JsonFileStore::new(data_dir.clone());
    let lamp = store
        .add_target("https://shop.example.com/products/desk-lamp", "desk lamp")
        .await
        .unwrap();
    let chair = store
        .add_target("https://shop.example.com/products/chair", "chair")
        .await
        .unwrap();
    assert_eq!(lamp.id, TargetId(1));
    assert_eq!(chair.id, TargetId(2));

    store
        .add_alert(lamp.id, AlertKind::PercentageDrop { percentage: 10.0 })
        .await
        .unwrap();
    let fired = store.record_price(lamp.id, &update(80.0, Some(100.0))).await.unwrap();
    assert_eq!(fired.len(), 1);

    let mut retry = lamp.retry.clone();
    retry.mark_failed(Utc::now());
    store.save_retry_state(chair.id, &retry).await.unwrap();

    assert!(data_dir.join("targets.json").exists());
    assert!(data_dir.join("history.json").exists());

    let reopened = JsonFileStore::new(data_dir);
    let targets = reopened.list_targets().await.unwrap();
    assert_eq!(targets.len(), 2);

    let lamp = reopened.get_target(TargetId(1)).await.unwrap();
    assert_eq!(lamp.current_price, Some(80.0));
    assert_eq!(lamp.original_price, Some(100.0));
    assert_eq!(lamp.currency.as_deref(), Some("EUR"));
    assert!(!lamp.alerts[0].active);
    assert!(lamp.alerts[0].triggered_at.is_some());

    let chair = reopened.get_target(TargetId(2)).await.unwrap();
    assert_eq!(chair.retry.retry_count, 1);

    let history = reopened.history(TargetId(1)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!((history[0].discount_percent.unwrap() - 20.0).abs() < 1e-9);
    assert!(reopened.history(TargetId(2)).await.unwrap().is_empty());

    let third = reopened.add_target("https://shop.example.com/p/3", "third").await.unwrap();
    assert_eq!(third.id, TargetId(3));
}

#[tokio::test]
async fn missing_target_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().to_path_buf());
    assert!(store.list_targets().await.unwrap().is_empty());
    assert!(matches!(
        store.record_price(TargetId(5), &update(1.0, None)).await,
        Err(PriceWatchError::TargetNotFound(TargetId(5)))
    ));
}

#[tokio::test]
async fn corrupt_file_is_a_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("targets.json"), "{ not json").unwrap();
    let store = JsonFileStore::new(dir.path().to_path_buf());
    assert!(matches!(
        store.list_targets().await,
        Err(PriceWatchError::Storage(_))
    ));
}

#[tokio::test]
async fn failed_target_write_leaves_history_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().to_path_buf());
    let lamp = store
        .add_target("https://shop.example.com/products/desk-lamp", "desk lamp")
        .await
        .unwrap();

    // A directory in the staging file's place makes the target write fail
    std::fs::create_dir_all(dir.path().join("targets.json.tmp").join("busy")).unwrap();

    let result = store.record_price(lamp.id, &update(40.0, None)).await;
    assert!(matches!(result, Err(PriceWatchError::Storage(_))));
    assert!(store.history(lamp.id).await.unwrap().is_empty());
    assert_eq!(store.get_target(lamp.id).await.unwrap().current_price, None);
}

#[tokio::test]
async fn preferences_persist_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let backing = Arc::new(JsonFileStore::new(dir.path().to_path_buf()));

    let preferences = PreferenceStore::new(backing.clone(), PreferenceSettings::default());
    preferences
        .record_outcome(TargetId(1), Method::Network, true, Utc::now())
        .await
        .unwrap();
    preferences
        .apply_feedback(TargetId(1), false, true, Utc::now())
        .await
        .unwrap();

    let stored = backing.load_preference(TargetId(1)).await.unwrap().unwrap();
    assert_eq!(stored.preferred_method, Method::Vision);
    assert!((stored.success_rate - 0.6).abs() < 1e-9);

    // A fresh store instance reads the persisted row
    let fresh = PreferenceStore::new(backing, PreferenceSettings::default());
    let loaded = fresh.get(TargetId(1)).await.unwrap().unwrap();
    assert_eq!(loaded.preferred_method, Method::Vision);
}
