use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ampchat_api::config::AppConfig;
use ampchat_api::origin::{AllowList, OriginGuard};
use ampchat_api::routes::request_span;
use ampchat_api::{AppState, AppStateInner};
use ampchat_crypto::TokenCodec;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ampchat=debug,ampchat_api=debug,ampchat_db=info,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    if config.secret_is_placeholder() {
        eprintln!("FATAL: AMPCHAT_AMP_SECRET is still a placeholder.");
        eprintln!("       Set a random secret shared with the email renderer and restart.");
        std::process::exit(1);
    }
    match config.amp_secret.as_deref() {
        Some(secret) => info!("AMP secret configured, length={}", secret.len()),
        None => warn!("No AMP secret configured (AMPCHAT_AMP_SECRET / AMP_SECRET); every token will be refused"),
    }

    // Init database
    let db = ampchat_db::Database::open(&PathBuf::from(&config.db_path))?;

    let allow = AllowList::new(config.allowed_domains());
    info!("AMP senders allowed from: {}", allow.domains().join(", "));

    let state: AppState = Arc::new(AppStateInner {
        db,
        codec: TokenCodec::new(config.amp_secret.as_deref()),
        guard: OriginGuard::new(allow),
        feed: config.feed.clone(),
    });

    let app = ampchat_api::router(state)
        .layer(TraceLayer::new_for_http().make_span_with(request_span));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("AMP chat bridge listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
