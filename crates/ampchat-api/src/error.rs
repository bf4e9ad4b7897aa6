use ampchat_crypto::TokenError;
use axum::http::StatusCode;
use thiserror::Error;

/// Why a request was refused. The variants are for logs; callers only ever
/// see the collapsed form from `reply_message`, or nothing at all on reads.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("token unusable: {0}")]
    Token(#[from] TokenError),
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("token expired")]
    ExpiredToken,
    #[error("token minted for chat {token} used on chat {path}")]
    ChatIdMismatch { token: u64, path: u64 },
    #[error("user {0} is not on the roster")]
    NotAMember(u64),
    #[error("user {0} does not exist")]
    UnknownUser(u64),
    #[error("message body is empty")]
    EmptyMessageBody,
    #[error("message body has {0} characters")]
    MessageTooLong(usize),
    #[error("sender {0:?} is not allowed")]
    ForbiddenOrigin(String),
    #[error("storage: {0}")]
    Storage(anyhow::Error),
}

impl AccessError {
    /// Text shown in the email's reply form.
    pub fn reply_message(&self) -> &'static str {
        match self {
            Self::Token(_) => "Missing or invalid token",
            // Expired and forged tokens read the same.
            Self::InvalidSignature | Self::ExpiredToken => "Invalid token",
            Self::ChatIdMismatch { .. } => "Token does not match this conversation",
            Self::NotAMember(_) | Self::UnknownUser(_) => "You are not a member of this conversation.",
            Self::EmptyMessageBody => "Please enter a message.",
            Self::MessageTooLong(_) => "Message is too long. Please keep it under 10,000 characters.",
            Self::ForbiddenOrigin(_) => "Sender not allowed",
            Self::Storage(_) => "Failed to send message. Please try again in the app.",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ForbiddenOrigin(_) => StatusCode::FORBIDDEN,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
