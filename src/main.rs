use anyhow::Context;
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    Method,
};
use cast_agent::{
    config::AgentConfig,
    core::{logging::init_logging, FactsProvider},
    routes::create_router,
    AppState, AGENT_VERSION,
};
use dotenv::dotenv;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AgentConfig::from_env().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(
        version = AGENT_VERSION,
        data_root = %config.data_root.display(),
        "Starting cast-agent"
    );

    let facts = FactsProvider::new(config.facts_ttl);
    let state = AppState::build(config.clone(), facts).context("Failed to assemble agent")?;

    if let Err(e) = state.ca.init().await {
        warn!(error = %e, "Certificate authority is not initialized; signing will fail");
    }

    if let Some(retention) = config.job_retention {
        info!(
            retention_secs = retention.as_secs(),
            interval_secs = config.sweep_interval.as_secs(),
            "Finished-job retention enabled"
        );
        state.jobs.spawn_sweeper(retention, config.sweep_interval);
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([ACCEPT, CONTENT_TYPE]);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(address = %addr, "Control API listening");
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
