//! demand-radar :: Binary Entrypoint
//! Loads config, wires providers + extraction backend + orchestrator, and
//! serves the task API with `/metrics` alongside.

use demand_radar::config::{ExtractionConfig, SourcesConfig};
use demand_radar::metrics::Metrics;
use demand_radar::{build_orchestrator, router, AppState};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logs are on in dev builds or when `RADAR_LOG=1`.
/// `LOG_FORMAT=json` switches to JSON lines.
fn enable_tracing() {
    let flag = std::env::var("RADAR_LOG").ok().is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(flag || is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("demand_radar=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: the shuttle runtime may already have installed a subscriber
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_tracing();

    let sources = SourcesConfig::load_default()?;
    let extraction = ExtractionConfig::load_default()?;

    let metrics = Metrics::init(sources.pipeline.top_k)?;
    let orchestrator = build_orchestrator(&sources, &extraction)?;

    let app = router(AppState::new(orchestrator)).merge(metrics.router());

    Ok(app.into())
}
