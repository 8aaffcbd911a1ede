use eyre::WrapErr;
use listing_classifier::{
    api::{self, AppState},
    audit::DecisionLog,
    config,
    engine::EngineHandle,
    jobs::JobQueue,
    pipeline::Pipeline,
    rollout::RolloutIntegrator,
    security::AuthState,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "classifier.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let engine = config::load_engine().wrap_err("failed to load taxonomy or rules")?;
    let summary = engine.summary();
    info!(
        target = "classifier.engine",
        taxonomy = %summary.taxonomy_version,
        rules = %summary.rules_version,
        categories = summary.categories,
        keywords = summary.keywords,
        "engine ready"
    );

    let rollout = config::rollout_policy().wrap_err("invalid rollout policy")?;
    let integrator = RolloutIntegrator::new(EngineHandle::new(engine), rollout);
    let pipeline = Pipeline::new(integrator, DecisionLog::default(), *config::MAX_BATCH);
    let (queue, _worker) = JobQueue::spawn(
        pipeline.clone(),
        *config::QUEUE_CAPACITY,
        *config::JOB_RETENTION,
    );
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install prometheus recorder")?;

    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(api::openapi_document()),
        prometheus_handle,
        metrics_key: config::METRICS_KEY.clone(),
    };
    let app = api::router(state, AuthState::from_env(), *config::REQUEST_MAX_BYTES);

    let addr: SocketAddr = ([0, 0, 0, 0], *config::PORT).into();
    info!(target = "classifier.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
