use ampchat_crypto::CapabilityToken;
use ampchat_db::models::EmailClick;
use ampchat_types::api::{ReplyQuery, ReplyRequest, ReplyResponse};
use std::convert::Infallible;

use axum::{
    Form, Json,
    extract::{FromRequest, Multipart, Path, Query, Request, State, rejection::QueryRejection},
    http::{StatusCode, header::CONTENT_TYPE},
};
use tracing::{error, info, warn};

use crate::access::{self, ChatGrant};
use crate::error::AccessError;
use crate::state::{AppState, run_blocking};

/// Longest reply accepted from the email form, in characters.
pub const MAX_REPLY_CHARS: usize = 10_000;

/// `replied_via` marker written to the email tracking record.
const REPLY_CHANNEL: &str = "amp";

const REPLY_CLICK: EmailClick<'static> = EmailClick {
    link_url: "amp://reply",
    link_position: "amp_reply_form",
    action: "amp_reply",
};

/// POST /amp/chat/{chat_id}/reply: post a reply from the email's inline form.
///
/// The token is not consumed; the same link can send any number of replies
/// until it expires.
pub async fn post_chat_reply(
    State(state): State<AppState>,
    Path(raw_chat_id): Path<String>,
    query: Result<Query<ReplyQuery>, QueryRejection>,
    ReplyBody(body): ReplyBody,
) -> (StatusCode, Json<ReplyResponse>) {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let now = chrono::Utc::now().timestamp();

    match submit(&state, &raw_chat_id, query, body, now).await {
        Ok(()) => (StatusCode::OK, Json(ReplyResponse::sent())),
        Err(e) => {
            match &e {
                AccessError::Storage(inner) => error!("AMP reply to chat {} failed: {}", raw_chat_id, inner),
                other => warn!("AMP reply to chat {} rejected: {}", raw_chat_id, other),
            }
            (e.status(), Json(ReplyResponse::rejected(e.reply_message())))
        }
    }
}

async fn submit(
    state: &AppState,
    raw_chat_id: &str,
    query: ReplyQuery,
    body: ReplyRequest,
    now: i64,
) -> Result<(), AccessError> {
    let chat_id = access::parse_chat_id(raw_chat_id)?;
    let token = CapabilityToken::parse(
        query.rt.as_deref(),
        query.uid.as_deref(),
        query.exp.as_deref(),
        chat_id,
    )?;
    let grant = access::verify_token(&state.codec, &token, chat_id, now)?;

    let text = validate_body(&body.message)?.to_string();
    let ChatGrant { user_id, chat_id } = access::check_membership(state, grant).await?;

    let message_id = run_blocking(state, move |db| db.insert_chat_message(chat_id, user_id, &text)).await?;

    let tracking_id = query.tid.as_deref().and_then(|raw| match raw.trim().parse::<u64>() {
        Ok(id) if id != 0 => Some(id),
        _ => {
            warn!("Ignoring unparseable email tracking id {:?}", raw);
            None
        }
    });

    if let Some(tracking_id) = tracking_id {
        record_reply(state, tracking_id).await;
    }

    info!(
        channel = REPLY_CHANNEL,
        chat_id,
        user_id,
        message_id,
        tracking_id = ?tracking_id,
        "Chat reply received"
    );
    Ok(())
}

/// Reply form body. AMP `action-xhr` forms post `multipart/form-data`, older
/// clients post urlencoded fields, and tooling posts JSON. An unreadable body
/// is treated as an empty one.
#[derive(Debug, Default)]
pub struct ReplyBody(pub ReplyRequest);

impl<S> FromRequest<S> for ReplyBody
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let body = if content_type.starts_with("application/x-www-form-urlencoded") {
            Form::<ReplyRequest>::from_request(req, state).await.map(|Form(b)| b).ok()
        } else if content_type.starts_with("multipart/form-data") {
            match Multipart::from_request(req, state).await {
                Ok(multipart) => Some(read_multipart(multipart).await),
                Err(_) => None,
            }
        } else {
            Json::<ReplyRequest>::from_request(req, state).await.map(|Json(b)| b).ok()
        };

        Ok(Self(body.unwrap_or_default()))
    }
}

async fn read_multipart(mut multipart: Multipart) -> ReplyRequest {
    let mut request = ReplyRequest::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("message") {
            if let Ok(text) = field.text().await {
                request.message = text;
            }
            break;
        }
    }
    request
}

/// Trimmed reply text, or the reason it cannot be sent.
pub fn validate_body(raw: &str) -> Result<&str, AccessError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(AccessError::EmptyMessageBody);
    }
    let chars = text.chars().count();
    if chars > MAX_REPLY_CHARS {
        return Err(AccessError::MessageTooLong(chars));
    }
    Ok(text)
}

/// Telemetry only. The message is already committed, so failures here are
/// logged and otherwise ignored.
async fn record_reply(state: &AppState, tracking_id: u64) {
    let result = run_blocking(state, move |db| {
        let found = db.mark_email_replied(tracking_id, REPLY_CHANNEL)?;
        if found {
            db.record_email_click(tracking_id, &REPLY_CLICK)?;
        }
        Ok(found)
    })
    .await;

    match result {
        Ok(true) => {}
        Ok(false) => warn!("Email tracking record {} not found", tracking_id),
        Err(e) => warn!("Failed to update email tracking {}: {}", tracking_id, e),
    }
}
