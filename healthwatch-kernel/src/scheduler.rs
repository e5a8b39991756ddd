/**
 * SCHEDULER DE COLLECTE - Boucle périodique du moniteur
 *
 * RÔLE :
 * Un cycle = sonder tous les nœuds de tous les clusters, persister les mesures,
 * puis passer chaque mesure au moteur d'alertes.
 *
 * FONCTIONNEMENT :
 * - start() : tâche tokio avec interval, premier cycle immédiat
 * - trigger_collection() : cycle à la demande (API, mode one-shot)
 * - Collecte parallèle (join_all) ou séquentielle selon la config
 * - Chaque sonde est bornée à timeout + 1s : un nœud bloqué devient une mesure 0
 * - Écriture du lot sur le pool bloquant (spawn_blocking), le store est synchrone
 * - stop() : signal via watch, le cycle en cours se termine avant l'arrêt
 */

use crate::alerts::AlertManager;
use crate::collector::CollectorFactory;
use crate::config::CollectionConf;
use crate::models::{MetricRecord, Node, UNHEALTHY};
use crate::provider::ClusterProvider;
use crate::store::{BatchReport, MetricStore};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Marge au-delà du timeout propre au collecteur
const COLLECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub clusters: usize,
    pub nodes: usize,
    pub records_written: usize,
    pub write_failures: usize,
    pub unhealthy: usize,
    pub alerts: usize,
    pub duration_ms: u64,
}

impl CycleReport {
    /// Tous les nœuds sains et toutes les mesures persistées (code retour du mode `collect`)
    pub fn is_success(&self) -> bool {
        self.unhealthy == 0 && self.write_failures == 0
    }
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct CollectionScheduler {
    provider: Arc<dyn ClusterProvider>,
    factory: Arc<dyn CollectorFactory>,
    store: Arc<MetricStore>,
    alerts: Arc<AlertManager>,
    settings: CollectionConf,
    running: Mutex<Option<RunningLoop>>,
    cycles_completed: AtomicU64,
}

impl CollectionScheduler {
    pub fn new(
        provider: Arc<dyn ClusterProvider>,
        factory: Arc<dyn CollectorFactory>,
        store: Arc<MetricStore>,
        alerts: Arc<AlertManager>,
        settings: CollectionConf,
    ) -> Self {
        Self {
            provider,
            factory,
            store,
            alerts,
            settings,
            running: Mutex::new(None),
            cycles_completed: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::SeqCst)
    }

    async fn collect_node(&self, cluster_name: &str, node: &Node) -> MetricRecord {
        let timeout = Duration::from_secs(self.settings.timeout_seconds);
        let collector = self.factory.create(&node.host, self.settings.port, timeout);
        match tokio::time::timeout(timeout + COLLECT_GRACE, collector.collect(&node.name, cluster_name)).await {
            Ok(record) => record,
            Err(_) => {
                warn!("[scheduler] {}/{} did not answer within {:?}", cluster_name, node.name, timeout + COLLECT_GRACE);
                MetricRecord::new(collector.metric_name(), UNHEALTHY, &node.name, cluster_name)
            }
        }
    }

    /// Un cycle complet : collecte, persistance, alertes
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        if let Err(e) = self.provider.refresh() {
            warn!("[scheduler] provider refresh failed, keeping previous topology: {}", e);
        }
        let clusters = self.provider.get_clusters();
        let targets: Vec<(&str, &Node)> = clusters
            .iter()
            .flat_map(|c| c.nodes.iter().map(move |n| (c.name.as_str(), n)))
            .collect();

        let records: Vec<MetricRecord> = if self.settings.parallel {
            join_all(targets.iter().map(|(cluster, node)| self.collect_node(cluster, node))).await
        } else {
            let mut records = Vec::with_capacity(targets.len());
            for (cluster, node) in &targets {
                records.push(self.collect_node(cluster, node).await);
            }
            records
        };

        for record in &records {
            let state = if record.is_healthy() { "healthy" } else { "down" };
            info!("[collect] {}: {} = {} ({})", record.node_key(), record.metric_name, record.value, state);
        }

        let store = Arc::clone(&self.store);
        let batch = records.clone();
        let written = match tokio::task::spawn_blocking(move || store.write_batch(&batch)).await {
            Ok(report) => report,
            Err(e) => {
                error!("[scheduler] store write task failed: {}", e);
                BatchReport { written: 0, failed: records.len() }
            }
        };

        let mut alerts = 0;
        for record in &records {
            alerts += self
                .alerts
                .evaluate_metric(&record.metric_name, record.value, &record.node_name, &record.cluster_name)
                .await
                .len();
        }

        let report = CycleReport {
            clusters: clusters.len(),
            nodes: records.len(),
            records_written: written.written,
            write_failures: written.failed,
            unhealthy: records.iter().filter(|r| !r.is_healthy()).count(),
            alerts,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
        info!(
            "[scheduler] cycle done: {} nodes, {} unhealthy, {} written, {} failed, {} alerts in {}ms",
            report.nodes, report.unhealthy, report.records_written, report.write_failures, report.alerts, report.duration_ms
        );
        report
    }

    pub async fn trigger_collection(&self) -> CycleReport {
        info!("[scheduler] manual collection triggered");
        self.run_cycle().await
    }

    /// Lance la boucle périodique ; sans effet si elle tourne déjà
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock();
        if running.is_some() {
            warn!("[scheduler] already running");
            return;
        }

        let (shutdown, mut stop_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let period = Duration::from_secs(self.settings.interval_seconds);
        info!("[scheduler] starting collection every {:?}", period);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        this.run_cycle().await;
                    }
                }
            }
            info!("[scheduler] collection loop stopped");
        });

        *running = Some(RunningLoop { shutdown, handle });
    }

    /// Arrête la boucle après le cycle en cours
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(RunningLoop { shutdown, handle }) = running {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                error!("[scheduler] collection loop ended abnormally: {}", e);
            }
        }
    }
}
