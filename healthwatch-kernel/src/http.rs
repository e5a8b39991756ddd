/**
 * API REST HEALTHWATCH - Lecture seule sur le store, les alertes et la collecte
 *
 * RÔLE :
 * Expose l'état des clusters, l'historique et la timeline de santé de chaque
 * nœud, les règles et l'historique d'alertes, et un déclencheur de collecte.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, réponses JSON
 * - Routes : /health, /api/clusters/..., /api/alerts/..., POST /api/collect
 * - Un nœud = union des répertoires du store et de la topologie du provider
 * - Lectures du store sur le pool bloquant (spawn_blocking)
 * - Lecture du store qui échoue = résultat vide, jamais de 500
 *
 * SÉCURITÉ :
 * - Si une API key est configurée, header x-api-key obligatoire sauf sur /health
 * - Sans API key configurée, l'API est ouverte (déploiement interne)
 */

use crate::alerts::{AlertEvent, AlertManager, RuleView};
use crate::config::Settings;
use crate::health::{build_timeline, summarize, ClusterHealth, ClusterStatus, HealthSummary, HealthTimelineEntry, NodeStatus};
use crate::models::{MetricRecord, Node};
use crate::provider::ClusterProvider;
use crate::scheduler::{CollectionScheduler, CycleReport};
use crate::store::MetricStore;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{error, warn};

const DEFAULT_HOURS: u32 = 24;
const MAX_HOURS: u32 = 24 * 31;
const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MetricStore>,
    pub alerts: Arc<AlertManager>,
    pub provider: Arc<dyn ClusterProvider>,
    pub scheduler: Option<Arc<CollectionScheduler>>,
    pub health_metric: String,
    pub api_key: Option<String>,
}

impl AppState {
    /// État du serveur ; le scheduler n'est exposé que si la collecte est activée
    pub fn from_settings(
        settings: &Settings,
        store: Arc<MetricStore>,
        alerts: Arc<AlertManager>,
        provider: Arc<dyn ClusterProvider>,
        scheduler: Arc<CollectionScheduler>,
    ) -> Self {
        Self {
            store,
            alerts,
            provider,
            scheduler: settings.collection.enabled.then_some(scheduler),
            health_metric: settings.collection.metric_name.clone(),
            api_key: settings.web.api_key.clone(),
        }
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }
    let Some(expected) = app.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!("[http] rejected request to {} (bad or missing x-api-key)", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/clusters", get(get_clusters))
        .route("/api/clusters/{cluster}", get(get_cluster))
        .route("/api/clusters/{cluster}/nodes/{node}", get(get_node))
        .route("/api/clusters/{cluster}/nodes/{node}/history", get(get_node_history))
        .route("/api/clusters/{cluster}/nodes/{node}/timeline", get(get_node_timeline))
        .route("/api/alerts/rules", get(get_alert_rules))
        .route("/api/alerts/rules/{name}", get(get_alert_rule).delete(delete_alert_rule))
        .route("/api/alerts/history", get(get_alert_history).delete(clear_alert_history))
        .route("/api/collect", post(trigger_collect))
        .with_state(app_state.clone())
        .layer(middleware::from_fn_with_state(app_state, require_api_key))
}

// --- vues ---

#[derive(Serialize)]
struct ClusterView {
    name: String,
    status: ClusterHealth,
    color: &'static str,
    total_nodes: usize,
    healthy_nodes: usize,
    down_nodes: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    last_check: Option<OffsetDateTime>,
}

fn to_view(c: &ClusterStatus) -> ClusterView {
    ClusterView {
        name: c.name.clone(),
        status: c.status,
        color: c.color,
        total_nodes: c.total_nodes,
        healthy_nodes: c.healthy_nodes,
        down_nodes: c.down_nodes,
        last_check: c.last_check,
    }
}

#[derive(Serialize)]
struct NodeView {
    #[serde(flatten)]
    status: NodeStatus,
    config: Option<Node>,
}

#[derive(Serialize)]
struct HistoryView {
    cluster_name: String,
    node_name: String,
    hours: u32,
    metric: Option<String>,
    data: Vec<MetricRecord>,
}

#[derive(Serialize)]
struct TimelineView {
    cluster_name: String,
    node_name: String,
    hours: u32,
    metric: String,
    timeline: Vec<HealthTimelineEntry>,
    summary: HealthSummary,
}

#[derive(Debug, Deserialize)]
struct WindowParams {
    hours: Option<u32>,
    metric: Option<String>,
}

impl WindowParams {
    fn hours(&self) -> u32 {
        self.hours.unwrap_or(DEFAULT_HOURS).clamp(1, MAX_HOURS)
    }
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

// --- agrégation store + provider ---

fn cluster_names(app: &AppState) -> Vec<String> {
    let mut names: BTreeSet<String> = app.store.list_clusters().into_iter().collect();
    names.extend(app.provider.get_clusters().into_iter().map(|c| c.name));
    names.into_iter().collect()
}

/// None si le cluster n'existe ni sur disque ni dans la topologie
fn cluster_nodes(app: &AppState, cluster: &str) -> Option<Vec<String>> {
    let configured = app.provider.get_cluster(cluster);
    let mut nodes: BTreeSet<String> = app.store.list_nodes(cluster).into_iter().collect();
    if nodes.is_empty() && configured.is_none() {
        return None;
    }
    if let Some(c) = configured {
        nodes.extend(c.nodes.into_iter().map(|n| n.name));
    }
    Some(nodes.into_iter().collect())
}

fn node_status(app: &AppState, cluster: &str, node: &str) -> NodeStatus {
    let latest = app.store.get_latest(cluster, node, Some(&app.health_metric));
    NodeStatus::from_latest(cluster, node, latest.last())
}

fn cluster_status(app: &AppState, cluster: &str, nodes: &[String]) -> ClusterStatus {
    let statuses = nodes.iter().map(|n| node_status(app, cluster, n)).collect();
    ClusterStatus::from_nodes(cluster, statuses)
}

fn window(app: &AppState, cluster: &str, node: &str, hours: u32, metric: Option<&str>) -> Vec<MetricRecord> {
    let end = OffsetDateTime::now_utc();
    app.store.query(cluster, node, end - Duration::hours(i64::from(hours)), end, metric)
}

/// Exécute une lecture du store (I/O fichiers synchrones) hors des workers async
async fn read_store<T, F>(app: &AppState, read: F) -> T
where
    T: Default + Send + 'static,
    F: FnOnce(&AppState) -> T + Send + 'static,
{
    let app = app.clone();
    match tokio::task::spawn_blocking(move || read(&app)).await {
        Ok(value) => value,
        Err(e) => {
            error!("[http] store read task failed: {}", e);
            T::default()
        }
    }
}

// --- handlers ---

// GET /health
async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    let collecting = app.scheduler.as_ref().map(|s| s.is_running()).unwrap_or(false);
    Json(serde_json::json!({ "status": "ok", "collection_running": collecting }))
}

// GET /api/clusters
async fn get_clusters(State(app): State<AppState>) -> Json<Vec<ClusterView>> {
    let list = read_store(&app, |app| {
        cluster_names(app)
            .iter()
            .filter_map(|name| cluster_nodes(app, name).map(|nodes| cluster_status(app, name, &nodes)))
            .map(|c| to_view(&c))
            .collect()
    })
    .await;
    Json(list)
}

// GET /api/clusters/{cluster}
async fn get_cluster(State(app): State<AppState>, Path(cluster): Path<String>) -> Result<Json<ClusterStatus>, StatusCode> {
    let status = read_store(&app, move |app| cluster_nodes(app, &cluster).map(|nodes| cluster_status(app, &cluster, &nodes))).await;
    status.map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /api/clusters/{cluster}/nodes/{node}
async fn get_node(
    State(app): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
) -> Result<Json<NodeView>, StatusCode> {
    let view = read_store(&app, move |app| {
        let nodes = cluster_nodes(app, &cluster)?;
        if !nodes.contains(&node) {
            return None;
        }
        let config = app.provider.get_cluster(&cluster).and_then(|c| c.get_node(&node).cloned());
        Some(NodeView { status: node_status(app, &cluster, &node), config })
    })
    .await;
    view.map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /api/clusters/{cluster}/nodes/{node}/history?hours=24&metric=
async fn get_node_history(
    State(app): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
    Query(params): Query<WindowParams>,
) -> Json<HistoryView> {
    let hours = params.hours();
    let (c, n, metric) = (cluster.clone(), node.clone(), params.metric.clone());
    let data = read_store(&app, move |app| window(app, &c, &n, hours, metric.as_deref())).await;
    Json(HistoryView { cluster_name: cluster, node_name: node, hours, metric: params.metric, data })
}

// GET /api/clusters/{cluster}/nodes/{node}/timeline?hours=24&metric=
async fn get_node_timeline(
    State(app): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
    Query(params): Query<WindowParams>,
) -> Json<TimelineView> {
    let hours = params.hours();
    let metric = params.metric.clone().unwrap_or_else(|| app.health_metric.clone());
    let (c, n, m) = (cluster.clone(), node.clone(), metric.clone());
    let records = read_store(&app, move |app| window(app, &c, &n, hours, Some(&m))).await;
    let timeline = build_timeline(&records);
    let summary = summarize(&cluster, &node, &timeline);
    Json(TimelineView { cluster_name: cluster, node_name: node, hours, metric, timeline, summary })
}

// GET /api/alerts/rules
async fn get_alert_rules(State(app): State<AppState>) -> Json<Vec<RuleView>> {
    Json(app.alerts.get_all_rules())
}

// GET /api/alerts/rules/{name}
async fn get_alert_rule(State(app): State<AppState>, Path(name): Path<String>) -> Result<Json<RuleView>, StatusCode> {
    app.alerts.get_rule(&name).map(Json).ok_or(StatusCode::NOT_FOUND)
}

// DELETE /api/alerts/rules/{name}
async fn delete_alert_rule(State(app): State<AppState>, Path(name): Path<String>) -> StatusCode {
    if app.alerts.remove_rule(&name) { StatusCode::NO_CONTENT } else { StatusCode::NOT_FOUND }
}

// GET /api/alerts/history?limit=100
async fn get_alert_history(State(app): State<AppState>, Query(params): Query<LimitParams>) -> Json<Vec<AlertEvent>> {
    Json(app.alerts.get_alert_history(params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)))
}

// DELETE /api/alerts/history
async fn clear_alert_history(State(app): State<AppState>) -> StatusCode {
    app.alerts.clear_alert_history();
    StatusCode::NO_CONTENT
}

// POST /api/collect
async fn trigger_collect(State(app): State<AppState>) -> Result<Json<CycleReport>, StatusCode> {
    let scheduler = app.scheduler.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(scheduler.trigger_collection().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertRule, Operator};
    use crate::collector::PingCollectorFactory;
    use crate::config::CollectionConf;
    use crate::models::{HEALTHY, UNHEALTHY};
    use crate::provider::FileClusterProvider;
    use axum::body::{to_bytes, Body};
    use healthwatch_devkit::{closed_port, ClusterFixture, TestHarness};
    use tower::ServiceExt;

    struct Fixture {
        _harness: TestHarness,
        state: AppState,
    }

    fn fixture(api_key: Option<&str>) -> Fixture {
        let harness = TestHarness::new();
        let provider = Arc::new(
            FileClusterProvider::new(harness.write_clusters(&[
                ClusterFixture::new("prod").node("ch-01", "127.0.0.1").node("ch-02", "127.0.0.1"),
            ]))
            .unwrap(),
        );
        let store = Arc::new(MetricStore::new(harness.metrics_dir()));
        let now = OffsetDateTime::now_utc();
        for (i, v) in [HEALTHY, HEALTHY, UNHEALTHY, UNHEALTHY, HEALTHY].into_iter().enumerate() {
            let ts = now - Duration::minutes(10 - i as i64);
            store.write(&MetricRecord::new("clickhouse_status", v, "ch-01", "prod").at(ts)).unwrap();
        }
        store.write(&MetricRecord::new("clickhouse_status", UNHEALTHY, "ch-02", "prod").at(now - Duration::minutes(1))).unwrap();
        store.write(&MetricRecord::new("clickhouse_status", HEALTHY, "old-node", "legacy").at(now - Duration::minutes(2))).unwrap();

        let state = AppState {
            store,
            alerts: Arc::new(AlertManager::new()),
            provider,
            scheduler: None,
            health_metric: "clickhouse_status".into(),
            api_key: api_key.map(str::to_string),
        };
        Fixture { _harness: harness, state }
    }

    async fn call(state: &AppState, method: &str, uri: &str, key: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        let response = build_router(state.clone()).oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let f = fixture(Some("k"));
        let (status, body) = call(&f.state, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_api_key_enforced() {
        let f = fixture(Some("k"));
        assert_eq!(call(&f.state, "GET", "/api/clusters", None).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(call(&f.state, "GET", "/api/clusters", Some("wrong")).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(call(&f.state, "GET", "/api/clusters", Some("k")).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cluster_list_merges_store_and_provider() {
        let f = fixture(None);
        let (status, body) = call(&f.state, "GET", "/api/clusters", None).await;
        assert_eq!(status, StatusCode::OK);
        let clusters = body.as_array().unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0]["name"], "legacy");
        assert_eq!(clusters[1]["name"], "prod");
        assert_eq!(clusters[1]["status"], "unstable");
        assert_eq!(clusters[1]["color"], "yellow");
        assert_eq!(clusters[1]["down_nodes"], 1);
    }

    #[tokio::test]
    async fn test_cluster_detail_and_not_found() {
        let f = fixture(None);
        let (status, body) = call(&f.state, "GET", "/api/clusters/prod", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(body["nodes"][0]["status_text"], "healthy");
        assert_eq!(body["nodes"][0]["status"], 1);

        assert_eq!(call(&f.state, "GET", "/api/clusters/nope", None).await.0, StatusCode::NOT_FOUND);
        assert_eq!(call(&f.state, "GET", "/api/clusters/prod/nodes/ghost", None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_node_detail_includes_config() {
        let f = fixture(None);
        let (status, body) = call(&f.state, "GET", "/api/clusters/prod/nodes/ch-02", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_name"], "ch-02");
        assert_eq!(body["cluster_name"], "prod");
        assert_eq!(body["status_text"], "down");
        assert_eq!(body["config"]["host"], "127.0.0.1");
    }

    #[tokio::test]
    async fn test_history_and_timeline() {
        let f = fixture(None);
        let (status, body) = call(&f.state, "GET", "/api/clusters/prod/nodes/ch-01/history?hours=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 5);

        let (_, body) = call(&f.state, "GET", "/api/clusters/prod/nodes/ch-01/timeline?hours=2", None).await;
        assert_eq!(body["timeline"].as_array().unwrap().len(), 5);
        assert_eq!(body["timeline"][2]["change_type"], "failed");
        assert_eq!(body["summary"]["availability_percent"], 60.0);
        assert_eq!(body["summary"]["current_status"], "healthy");
    }

    #[tokio::test]
    async fn test_unknown_node_history_is_empty() {
        let f = fixture(None);
        let (status, body) = call(&f.state, "GET", "/api/clusters/x/nodes/y/timeline", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["timeline"].as_array().unwrap().is_empty());
        assert_eq!(body["summary"]["availability_percent"], 0.0);
        assert!(body["summary"]["current_status"].is_null());
    }

    #[tokio::test]
    async fn test_alert_endpoints() {
        let f = fixture(None);
        f.state.alerts.add_rule(AlertRule::new("node_down", "clickhouse_status", Operator::Eq, 0.0));
        f.state.alerts.evaluate_metric("clickhouse_status", 0.0, "ch-02", "prod").await;

        let (_, rules) = call(&f.state, "GET", "/api/alerts/rules", None).await;
        assert_eq!(rules[0]["name"], "node_down");
        assert_eq!(rules[0]["operator"], "==");

        let (_, history) = call(&f.state, "GET", "/api/alerts/history?limit=5", None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["node_name"], "ch-02");

        let (status, rule) = call(&f.state, "GET", "/api/alerts/rules/node_down", None).await;
        assert_eq!((status, rule["cooldown_seconds"].as_u64()), (StatusCode::OK, Some(300)));
        assert_eq!(call(&f.state, "DELETE", "/api/alerts/history", None).await.0, StatusCode::NO_CONTENT);
        assert!(f.state.alerts.get_alert_history(5).is_empty());
        assert_eq!(call(&f.state, "DELETE", "/api/alerts/rules/node_down", None).await.0, StatusCode::NO_CONTENT);
        assert_eq!(call(&f.state, "GET", "/api/alerts/rules/node_down", None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_collect_unavailable_when_collection_disabled() {
        let f = fixture(None);
        let port = closed_port().await.unwrap();
        let mut settings = Settings::default();
        settings.collection.enabled = false;
        settings.collection.port = port;
        let scheduler = Arc::new(CollectionScheduler::new(
            Arc::clone(&f.state.provider),
            Arc::new(PingCollectorFactory::new("clickhouse_status")),
            Arc::clone(&f.state.store),
            Arc::clone(&f.state.alerts),
            settings.collection.clone(),
        ));

        let disabled = AppState::from_settings(
            &settings,
            Arc::clone(&f.state.store),
            Arc::clone(&f.state.alerts),
            Arc::clone(&f.state.provider),
            Arc::clone(&scheduler),
        );
        assert_eq!(call(&disabled, "POST", "/api/collect", None).await.0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(scheduler.cycles_completed(), 0);

        settings.collection.enabled = true;
        let enabled = AppState::from_settings(
            &settings,
            Arc::clone(&f.state.store),
            Arc::clone(&f.state.alerts),
            Arc::clone(&f.state.provider),
            Arc::clone(&scheduler),
        );
        assert!(enabled.scheduler.is_some());
        assert_eq!(enabled.health_metric, "clickhouse_status");
    }

    #[tokio::test]
    async fn test_collect_endpoint() {
        let mut f = fixture(None);
        assert_eq!(call(&f.state, "POST", "/api/collect", None).await.0, StatusCode::SERVICE_UNAVAILABLE);

        let port = closed_port().await.unwrap();
        let settings = CollectionConf { port, timeout_seconds: 1, ..CollectionConf::default() };
        f.state.scheduler = Some(Arc::new(CollectionScheduler::new(
            Arc::clone(&f.state.provider),
            Arc::new(PingCollectorFactory::new("clickhouse_status")),
            Arc::clone(&f.state.store),
            Arc::clone(&f.state.alerts),
            settings,
        )));
        let (status, report) = call(&f.state, "POST", "/api/collect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["nodes"], 2);
        assert_eq!(report["unhealthy"], 2);
        assert_eq!(report["records_written"], 2);
    }
}
