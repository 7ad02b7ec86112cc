// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use estate_metrics::config::{Backend, Settings};
use estate_metrics::db::{
    Connector, DockerProcess, DocumentBackend, DocumentStore, ElasticConnector, EmbeddedProcess,
    ProcessManager, SqliteConnector, StorageConnection,
};
use estate_metrics::pipeline::{RegionConfig, RegionPipeline, Scheduler};
use estate_metrics::scraper::{CachedSource, FileCache, HttpListingSource, ListingSource};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "estate_metrics=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::parse();
    info!(backend = ?settings.backend, dev_mode = settings.dev_mode, "starting estate-metrics");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let source = listing_source(&settings)?;

    match settings.backend {
        Backend::Elastic => {
            let process = DockerProcess::new(settings.container.clone(), &settings.elastic_url)
                .context("failed to build docker process manager")?;
            let connector = ElasticConnector::new(settings.elastic_url.clone());
            run(&settings, connector, Arc::new(process), source, cancel).await
        }
        Backend::Sqlite => {
            let connector = SqliteConnector::new(settings.sqlite_path.clone());
            run(&settings, connector, Arc::new(EmbeddedProcess), source, cancel).await
        }
    }
}

fn listing_source(settings: &Settings) -> Result<Arc<dyn ListingSource>> {
    let http = HttpListingSource::new().context("failed to build http client")?;
    Ok(match settings.cache_ttl() {
        Some(ttl) => {
            info!(dir = %settings.cache_dir.display(), "feed cache enabled");
            Arc::new(CachedSource::new(http, FileCache::new(&settings.cache_dir, ttl)))
        }
        None => Arc::new(http),
    })
}

async fn run<C>(
    settings: &Settings,
    connector: C,
    process: Arc<dyn ProcessManager>,
    source: Arc<dyn ListingSource>,
    cancel: CancellationToken,
) -> Result<()>
where
    C: Connector,
    C::Client: DocumentBackend,
{
    let conn = StorageConnection::new(connector, process, settings.connection(), cancel.child_token());
    let store = DocumentStore::new(conn.clone(), settings.store());
    let pipeline = Arc::new(
        RegionPipeline::new(store, source, settings.pipeline(), cancel.child_token())
            .with_decorator(settings.decorator()),
    );

    if let Some(path) = &settings.register {
        for config in read_region_configs(path)? {
            let region = config.region.clone();
            pipeline
                .register_region(config)
                .await
                .with_context(|| format!("failed to register region {region}"))?;
        }
    }

    let scheduler = Scheduler::new(Arc::clone(&pipeline), settings.schedule(), cancel.child_token());
    if settings.run_once {
        let report = scheduler.run_batch().await;
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(error = %e, "could not render batch report"),
        }
        if report.failed() > 0 {
            error!(failed = report.failed(), "some regions failed");
        }
    } else {
        scheduler.run().await;
    }

    conn.close().await;
    info!("shutdown complete");
    Ok(())
}

/// One config object or an array of them.
fn read_region_configs(path: &Path) -> Result<Vec<RegionConfig>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let configs = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<RegionConfig>, _>>()?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(configs)
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
    cancel.cancel();
}
