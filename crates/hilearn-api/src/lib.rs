pub mod auth;
pub mod chat;
pub mod error;
pub mod gateway_ws;
pub mod middleware;
pub mod notifications;
pub mod routes;
pub mod users;

use std::sync::Arc;

use tracing::error;

use hilearn_db::Database;

use crate::error::ApiError;

/// Run a blocking DB closure off the async runtime.
pub(crate) async fn run_db<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(db.as_ref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("join error: {}", e))
        })?
        .map_err(|e| {
            error!("DB error: {:#}", e);
            ApiError::Internal(e)
        })
}
