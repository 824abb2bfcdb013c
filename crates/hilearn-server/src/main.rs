mod config;

use std::sync::Arc;

use tracing::info;

use hilearn_api::auth::{AppState, AppStateInner, ensure_admin};
use hilearn_api::routes::router;
use hilearn_db::Database;
use hilearn_gateway::connection::GatewayTimings;
use hilearn_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hilearn=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);

    if let Some(admin) = &config.admin {
        let db = db.clone();
        let (email, password, name) = (admin.email.clone(), admin.password.clone(), admin.name.clone());
        tokio::task::spawn_blocking(move || ensure_admin(&db, &email, &password, &name)).await??;
    }

    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::new(),
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
        token_ttl_days: config.token_ttl_days,
        gateway_timings: GatewayTimings::default(),
    });

    let app = router(state);

    info!("HiLearn server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {}", e);
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
