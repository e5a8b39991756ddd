/**
 * HEALTHWATCH KERNEL - Point d'entrée du moniteur de santé de clusters
 *
 * RÔLE : Orchestration de tous les modules : config, provider, store, alertes,
 * scheduler de collecte et API HTTP.
 *
 * MODES :
 * - `healthwatch-kernel`         : collecte périodique + API (mode serveur)
 * - `healthwatch-kernel collect` : un seul cycle, code retour 1 si un nœud est down
 *
 * UTILITÉ : Surveiller des nœuds (ClickHouse /ping) et garder un historique horaire
 * consultable, avec alertes à seuil.
 */

use healthwatch_kernel::alerts::AlertManager;
use healthwatch_kernel::collector::PingCollectorFactory;
use healthwatch_kernel::config::load_config;
use healthwatch_kernel::http::{self, AppState};
use healthwatch_kernel::provider::create_provider;
use healthwatch_kernel::scheduler::CollectionScheduler;
use healthwatch_kernel::store::MetricStore;

use anyhow::Context;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("healthwatch_kernel=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("[kernel] cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("[kernel] shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    init_tracing();

    let one_shot = std::env::args().nth(1).as_deref() == Some("collect");

    let settings = load_config().await.context("invalid configuration")?;

    // topologie
    let provider = create_provider(&settings.cluster_provider).context("cannot build cluster provider")?;
    let clusters = provider.get_clusters();
    info!(
        "[kernel] {} provider: {} clusters, {} nodes",
        provider.kind(),
        clusters.len(),
        clusters.iter().map(|c| c.nodes.len()).sum::<usize>()
    );

    // stockage et alertes
    let store = Arc::new(MetricStore::new(&settings.storage.metrics_dir));
    let alerts = Arc::new(AlertManager::new());
    alerts
        .load_rules_from_file(&settings.alerts.rules_file)
        .context("invalid alert rules")?;

    let scheduler = Arc::new(CollectionScheduler::new(
        Arc::clone(&provider),
        Arc::new(PingCollectorFactory::new(&settings.collection.metric_name)),
        Arc::clone(&store),
        Arc::clone(&alerts),
        settings.collection.clone(),
    ));

    if one_shot {
        let report = scheduler.trigger_collection().await;
        println!(
            "collected {} nodes: {} unhealthy, {} written, {} write failures, {} alerts",
            report.nodes, report.unhealthy, report.records_written, report.write_failures, report.alerts
        );
        return Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    if settings.collection.enabled {
        scheduler.start();
    } else {
        info!("[kernel] periodic collection disabled");
    }

    if settings.web.api_key.is_none() {
        warn!("[kernel] no API key configured, API is open");
    }

    // sans collecte configurée, POST /api/collect répond 503
    let app_state = AppState::from_settings(&settings, store, alerts, provider, Arc::clone(&scheduler));
    let app = http::build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", settings.web.host, settings.web.port)
        .parse()
        .context("invalid web.host / web.port")?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("cannot bind {addr}"))?;
    info!("[kernel] listening on http://{addr}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    scheduler.stop().await;
    info!("[kernel] stopped");
    Ok(ExitCode::SUCCESS)
}
