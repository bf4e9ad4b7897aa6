use std::collections::HashMap;

use ampchat_crypto::CapabilityToken;
use ampchat_db::models::{MessageRow, UserRow};
use ampchat_types::api::{ChatFeedQuery, ChatFeedResponse, FeedItem};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use tracing::{debug, error, warn};

use crate::access::{self, ChatGrant};
use crate::config::FeedSettings;
use crate::error::AccessError;
use crate::state::{AppState, run_blocking};

/// GET /amp/chat/{chat_id}: earlier messages for the email's conversation view.
///
/// Always answers 200. A caller without access gets the same empty payload no
/// matter why, so a bad token looks exactly like an empty chat.
pub async fn get_chat_feed(
    State(state): State<AppState>,
    Path(raw_chat_id): Path<String>,
    query: Result<Query<ChatFeedQuery>, QueryRejection>,
) -> Json<ChatFeedResponse> {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let now = chrono::Utc::now().timestamp();

    match build_feed(&state, &raw_chat_id, query, now).await {
        Ok(feed) => Json(feed),
        Err(AccessError::Storage(e)) => {
            error!("AMP feed for chat {} failed: {}", raw_chat_id, e);
            Json(ChatFeedResponse::empty())
        }
        Err(e) => {
            debug!("AMP feed for chat {} denied: {}", raw_chat_id, e);
            Json(ChatFeedResponse::empty())
        }
    }
}

async fn build_feed(
    state: &AppState,
    raw_chat_id: &str,
    query: ChatFeedQuery,
    now: i64,
) -> Result<ChatFeedResponse, AccessError> {
    let chat_id = access::parse_chat_id(raw_chat_id)?;
    let token = CapabilityToken::parse(
        query.rt.as_deref(),
        query.uid.as_deref(),
        query.exp.as_deref(),
        chat_id,
    )?;
    let grant = access::resolve(state, &token, chat_id, now).await?;

    let exclude = parse_optional_id(query.exclude.as_deref());
    let since = parse_optional_id(query.since.as_deref()).unwrap_or(0);

    let ChatGrant { chat_id, .. } = grant;
    let limit = state.feed.limit;
    let (rows, users) = run_blocking(state, move |db| {
        let rows = db.get_recent_messages(chat_id, limit, exclude)?;

        let mut user_ids: Vec<u64> = rows.iter().map(|r| r.user_id).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let users = db.get_users_by_ids(&user_ids)?;

        Ok((rows, users))
    })
    .await?;

    Ok(ChatFeedResponse {
        items: to_items(rows, users, since, &state.feed),
        chat_id,
        since_id: since,
        can_reply: true,
    })
}

/// Rows arrive newest first; the email lists them oldest first.
fn to_items(rows: Vec<MessageRow>, users: Vec<UserRow>, since: u64, settings: &FeedSettings) -> Vec<FeedItem> {
    let people: HashMap<u64, (String, String)> = users
        .into_iter()
        .map(|u| {
            let id = u.id;
            (id, (display_name(&u, settings), avatar(&u, settings)))
        })
        .collect();

    rows.into_iter()
        .rev()
        .map(|row| {
            let (from_user, from_image) = people.get(&row.user_id).cloned().unwrap_or_else(|| {
                (settings.default_name.clone(), settings.default_image.clone())
            });
            FeedItem {
                id: row.id,
                chatid: row.chat_id,
                userid: row.user_id,
                date: to_rfc3339(&row),
                message: row.message,
                from_user,
                from_image,
                is_new: since > 0 && row.id > since,
            }
        })
        .collect()
}

fn display_name(user: &UserRow, settings: &FeedSettings) -> String {
    if let Some(full) = user.fullname.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        return full.to_string();
    }
    let joined = format!(
        "{} {}",
        user.firstname.as_deref().unwrap_or_default(),
        user.lastname.as_deref().unwrap_or_default()
    );
    let joined = joined.trim();
    if joined.is_empty() {
        settings.default_name.clone()
    } else {
        joined.to_string()
    }
}

fn avatar(user: &UserRow, settings: &FeedSettings) -> String {
    user.image_url
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(settings.default_image.as_str())
        .to_string()
}

fn to_rfc3339(row: &MessageRow) -> String {
    // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
    chrono::NaiveDateTime::parse_from_str(&row.created_at, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc().to_rfc3339())
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message {}: {}", row.created_at, row.id, e);
            row.created_at.clone()
        })
}

fn parse_optional_id(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse::<u64>().ok()).filter(|id| *id != 0)
}
