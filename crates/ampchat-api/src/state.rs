use std::sync::Arc;

use ampchat_crypto::TokenCodec;
use ampchat_db::Database;
use tracing::error;

use crate::config::FeedSettings;
use crate::error::AccessError;
use crate::origin::OriginGuard;

pub type AppState = Arc<AppStateInner>;

/// Everything a request needs. Read-only after startup.
pub struct AppStateInner {
    pub db: Database,
    pub codec: TokenCodec,
    pub guard: OriginGuard,
    pub feed: FeedSettings,
}

/// Run a blocking DB call off the async runtime.
pub async fn run_blocking<F, T>(state: &AppState, f: F) -> Result<T, AccessError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            AccessError::Storage(anyhow::anyhow!("blocking task failed: {}", e))
        })?
        .map_err(AccessError::Storage)
}
