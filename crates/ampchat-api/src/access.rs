use ampchat_crypto::{CapabilityToken, TokenCodec};
use tracing::debug;

use crate::error::AccessError;
use crate::state::{AppState, run_blocking};

/// A verified right for one user to read and post in one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatGrant {
    pub user_id: u64,
    pub chat_id: u64,
}

/// Pure token checks, in the order the reply form reports them:
/// signature and expiry first, then the chat the token was minted for.
///
/// Over HTTP the token's chat id is taken from the path, so a link for
/// another chat already fails the signature. The explicit comparison guards
/// callers that build a `CapabilityToken` themselves.
pub fn verify_token(
    codec: &TokenCodec,
    token: &CapabilityToken,
    path_chat_id: u64,
    now: i64,
) -> Result<ChatGrant, AccessError> {
    if !codec.verify_token(token, now) {
        return if codec.signature_matches(token) {
            debug!("Expired AMP token for user {} (exp={}, now={})", token.user_id, token.expiry, now);
            Err(AccessError::ExpiredToken)
        } else {
            debug!(
                "AMP signature mismatch for user {} chat {} (len={})",
                token.user_id,
                token.chat_id,
                token.signature.len()
            );
            Err(AccessError::InvalidSignature)
        };
    }

    if token.chat_id != path_chat_id {
        return Err(AccessError::ChatIdMismatch {
            token: token.chat_id,
            path: path_chat_id,
        });
    }

    Ok(ChatGrant {
        user_id: token.user_id,
        chat_id: token.chat_id,
    })
}

/// Roster check for an already verified grant. Users who no longer exist are
/// refused as well.
pub async fn check_membership(state: &AppState, grant: ChatGrant) -> Result<ChatGrant, AccessError> {
    let ChatGrant { user_id, chat_id } = grant;
    let (exists, member) = run_blocking(state, move |db| {
        let exists = db.user_exists(user_id)?;
        let member = exists && db.is_chat_member(chat_id, user_id)?;
        Ok((exists, member))
    })
    .await?;

    if !exists {
        return Err(AccessError::UnknownUser(user_id));
    }
    if !member {
        return Err(AccessError::NotAMember(user_id));
    }
    Ok(grant)
}

/// Full decision: valid token, matching chat, user on the roster.
pub async fn resolve(
    state: &AppState,
    token: &CapabilityToken,
    path_chat_id: u64,
    now: i64,
) -> Result<ChatGrant, AccessError> {
    let grant = verify_token(&state.codec, token, path_chat_id, now)?;
    check_membership(state, grant).await
}

/// Chat id from the URL path; anything non-numeric cannot carry a valid token.
pub fn parse_chat_id(raw: &str) -> Result<u64, AccessError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0 && i64::try_from(*id).is_ok())
        .ok_or(AccessError::Token(ampchat_crypto::TokenError::Malformed("chat")))
}
