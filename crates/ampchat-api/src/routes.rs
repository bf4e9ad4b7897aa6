use axum::{
    Router,
    extract::Request,
    middleware,
    routing::{get, post},
};
use tracing::Span;

use crate::origin::{enforce_origin, preflight};
use crate::state::AppState;
use crate::{feed, reply};

/// All HTTP routes. The AMP endpoints sit behind the origin guard; `/health`
/// does not.
pub fn router(state: AppState) -> Router {
    let amp_routes = Router::new()
        .route("/chat/{chat_id}", get(feed::get_chat_feed).options(preflight))
        .route("/chat/{chat_id}/reply", post(reply::post_chat_reply).options(preflight))
        .layer(middleware::from_fn_with_state(state.clone(), enforce_origin))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .nest("/amp", amp_routes)
}

async fn health() -> &'static str {
    "ok"
}

/// Span for `TraceLayer::make_span_with`. Records the path only: the query
/// string carries capability tokens and must stay out of the logs.
pub fn request_span(req: &Request) -> Span {
    tracing::debug_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
    )
}
