//! Flotilla Host: boots a headless engine group and serves its status
//!
//! Boot order: main engine created, module tree initialized through
//! `init_multi_engine`, main engine run, configured forks created and run.
//! Routes of failed modules are disabled after each init phase.
//! The API under `/v1` only reads.
pub mod config;
pub mod demo;
pub mod handlers;
pub mod metrics;
pub mod middleware;

use axum::{routing::get, Router};
use config::HostConfig;
use flotilla_core::{FlotillaError, InitReport, Module};
use flotilla_engine::{EngineGroup, HeadlessRuntime, LaunchConfig};
use metrics::HostMetrics;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("HOST/config: {0}")]
    Config(String),

    #[error("HOST/metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("HOST/io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] FlotillaError),
}

#[derive(Clone)]
pub struct AppState {
    pub group: Arc<Mutex<EngineGroup>>,
    pub main_label: Arc<str>,
    pub metrics: Arc<HostMetrics>,
}

/// Build the engine group described by `config` and bring it up.
pub async fn boot(config: &HostConfig) -> Result<AppState, HostError> {
    boot_with(config, demo::app_root()).await
}

/// Same as [`boot`], with `root` as the main engine's module tree.
pub async fn boot_with(config: &HostConfig, root: Arc<dyn Module>) -> Result<AppState, HostError> {
    let main = config.main_engine.label.clone();
    let mut group = EngineGroup::new(Arc::new(HeadlessRuntime::new()))
        .with_config(config.coordinator.clone());

    group.create(main.clone(), config.main_engine.allow_headless)?;
    let report = group.init_multi_engine(&main, root).await?;
    degrade(&group, &main, &report)?;

    let mut launch = LaunchConfig::new();
    launch.initial_route = config.main_engine.initial_route.clone();
    group.run(&main, Some(launch)).await?;
    if config.coordinator.preboot {
        let report = group.complete_async_init(&main).await?;
        degrade(&group, &main, &report)?;
    }

    for request in &config.forks {
        let label = group.fork(&main, request.clone())?;
        group.run(&label, None).await?;
    }
    tracing::info!(engines = ?group.live_labels(), "engine group up");

    Ok(AppState {
        group: Arc::new(Mutex::new(group)),
        main_label: Arc::from(main),
        metrics: Arc::new(HostMetrics::new()?),
    })
}

/// Disable the routes of modules that failed so far on `label`.
fn degrade(group: &EngineGroup, label: &str, report: &InitReport) -> Result<(), HostError> {
    if report.failures.is_empty() {
        return Ok(());
    }
    let disabled = group.disable_failed_routes(label)?;
    tracing::warn!(engine = %label, failed = ?report.failed_modules(), disabled = ?disabled, "running degraded");
    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handlers::health))
        .route("/v1/engines", get(handlers::list_engines))
        .route("/v1/engines/{label}", get(handlers::get_engine))
        .route("/v1/engines/{label}/routes", get(handlers::engine_routes))
        .route("/v1/init-report", get(handlers::init_report))
        .route("/metrics", get(handlers::metrics))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::count_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(config: HostConfig) -> Result<(), HostError> {
    let state = boot(&config).await?;
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&config.addr).await?;

    tracing::info!("Flotilla host listening on {}", config.addr);
    axum::serve(listener, app).await?;
    Ok(())
}
