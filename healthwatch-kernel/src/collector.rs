/**
 * COLLECTEURS - Sondes de santé des nœuds
 *
 * RÔLE :
 * Transforme "ce nœud répond-il ?" en une MetricRecord 1 (healthy) ou 0 (down).
 *
 * FONCTIONNEMENT :
 * - PingCollector : GET http://<host>:<port>/ping, sain si 2xx + corps "Ok."
 * - Toute erreur (refus, DNS, timeout, statut, corps) = mesure 0, jamais d'Err
 * - Timeout double : celui du client HTTP et un tokio::time::timeout englobant
 * - CollectorFactory : le scheduler crée un collecteur par nœud et par cycle
 *
 * UTILITÉ DANS HEALTHWATCH :
 * 🎯 Scheduler : une sonde par nœud, lancées en parallèle
 * 🎯 Tests : fabrique remplaçable par des collecteurs factices
 */

use crate::models::{MetricRecord, HEALTHY, UNHEALTHY};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_METRIC: &str = "clickhouse_status";
pub const PING_PATH: &str = "/ping";
pub const HEALTHY_BODY: &str = "Ok.";

#[async_trait]
pub trait Collector: Send + Sync {
    fn metric_name(&self) -> &str;

    /// Ne retourne jamais d'erreur : un échec devient une mesure UNHEALTHY
    async fn collect(&self, node_name: &str, cluster_name: &str) -> MetricRecord;
}

pub trait CollectorFactory: Send + Sync {
    fn create(&self, host: &str, port: u16, timeout: Duration) -> Arc<dyn Collector>;
}

/// Corps attendu : "Ok." éventuellement suivi d'un seul saut de ligne
pub fn is_healthy_body(body: &str) -> bool {
    let body = body
        .strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body);
    body == HEALTHY_BODY
}

pub struct PingCollector {
    host: String,
    port: u16,
    timeout: Duration,
    metric_name: String,
    client: reqwest::Client,
}

impl PingCollector {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).connect_timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("[collector] http client build failed ({}), using defaults", e);
                reqwest::Client::new()
            }
        };
        Self {
            host: host.to_string(),
            port,
            timeout,
            metric_name: DEFAULT_METRIC.to_string(),
            client,
        }
    }

    pub fn with_metric_name(mut self, metric_name: &str) -> Self {
        self.metric_name = metric_name.to_string();
        self
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, PING_PATH)
    }

    async fn probe(&self) -> bool {
        let url = self.url();
        let request = async {
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                debug!("[collector] {} answered {}", url, status);
                return Ok(false);
            }
            let body = response.text().await?;
            Ok::<bool, reqwest::Error>(is_healthy_body(&body))
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                debug!("[collector] {} unreachable: {}", url, e);
                false
            }
            Err(_) => {
                debug!("[collector] {} timed out after {:?}", url, self.timeout);
                false
            }
        }
    }
}

#[async_trait]
impl Collector for PingCollector {
    fn metric_name(&self) -> &str {
        &self.metric_name
    }

    async fn collect(&self, node_name: &str, cluster_name: &str) -> MetricRecord {
        let value = if self.probe().await { HEALTHY } else { UNHEALTHY };
        MetricRecord::new(&self.metric_name, value, node_name, cluster_name).with_tag("host", &self.host)
    }
}

pub struct PingCollectorFactory {
    metric_name: String,
}

impl PingCollectorFactory {
    pub fn new(metric_name: &str) -> Self {
        Self { metric_name: metric_name.to_string() }
    }
}

impl CollectorFactory for PingCollectorFactory {
    fn create(&self, host: &str, port: u16, timeout: Duration) -> Arc<dyn Collector> {
        Arc::new(PingCollector::new(host, port, timeout).with_metric_name(&self.metric_name))
    }
}
