//! Usage du kernel comme bibliothèque : règles et callbacks ajoutés par programme,
//! store et statut dérivé sans passer par le serveur.

use healthwatch_kernel::alerts::actions::CallbackAction;
use healthwatch_kernel::alerts::{AlertManager, AlertRule, Operator};
use healthwatch_kernel::health::NodeStatus;
use healthwatch_kernel::models::{MetricRecord, HEALTHY, UNHEALTHY};
use healthwatch_kernel::store::MetricStore;
use healthwatch_devkit::TestHarness;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

#[tokio::test]
async fn test_callback_action_from_embedding_code() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let manager = AlertManager::new();
    manager.add_rule(
        AlertRule::new("node_down", "clickhouse_status", Operator::Eq, UNHEALTHY)
            .with_cooldown(0)
            .with_action(Arc::new(CallbackAction::new(move |event| {
                sink.lock().unwrap().push(event.node_name.clone());
                Ok(true)
            }))),
    );

    let fired = manager.evaluate_metric("clickhouse_status", UNHEALTHY, "ch-01", "prod").await;
    assert_eq!(fired.len(), 1);
    assert!(manager.evaluate_metric("clickhouse_status", HEALTHY, "ch-01", "prod").await.is_empty());
    assert_eq!(*seen.lock().unwrap(), vec!["ch-01".to_string()]);
}

#[test]
fn test_store_latest_feeds_node_status() {
    let harness = TestHarness::new();
    let store = MetricStore::new(harness.metrics_dir());
    let now = OffsetDateTime::now_utc();
    store.write(&MetricRecord::new("clickhouse_status", HEALTHY, "ch-01", "prod").at(now)).unwrap();

    let latest = store.get_latest("prod", "ch-01", Some("clickhouse_status"));
    let status = NodeStatus::from_latest("prod", "ch-01", latest.last());
    assert!(status.is_healthy());
    assert_eq!(status.status_text, "healthy");
}
