//! Phishing risk service: binary entrypoint.
//! Boots the Axum HTTP server with the engine routes and `/metrics`.

use phishing_risk_engine::{app, logging, run_quick_probe, ENV_QUICK_PROBE};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    logging::init_tracing();

    if std::env::var(ENV_QUICK_PROBE).is_ok_and(|v| v == "1") {
        if let Err(e) = run_quick_probe().await {
            tracing::warn!(error = ?e, "engine quick probe didn't run");
        }
    }

    let router = app().await?;
    Ok(router.into())
}
