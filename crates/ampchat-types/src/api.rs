use serde::{Deserialize, Serialize};

// -- Query strings --

/// Query accepted by `GET /amp/chat/{id}`. Every field is optional and kept as
/// raw text so that a bad link degrades to an empty feed instead of a 400.
#[derive(Debug, Default, Deserialize)]
pub struct ChatFeedQuery {
    pub rt: Option<String>,
    pub uid: Option<String>,
    pub exp: Option<String>,
    /// Message already shown statically in the email body.
    pub exclude: Option<String>,
    /// Messages newer than this id are flagged `isNew`.
    pub since: Option<String>,
}

/// Query accepted by `POST /amp/chat/{id}/reply`.
#[derive(Debug, Default, Deserialize)]
pub struct ReplyQuery {
    pub rt: Option<String>,
    pub uid: Option<String>,
    pub exp: Option<String>,
    /// Email tracking record id of the notification that carried the form.
    pub tid: Option<String>,
}

// -- Feed --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFeedResponse {
    pub items: Vec<FeedItem>,
    pub chat_id: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub since_id: u64,
    pub can_reply: bool,
}

impl ChatFeedResponse {
    /// The payload every unauthorized caller gets.
    pub fn empty() -> Self {
        Self {
            items: vec![],
            chat_id: 0,
            since_id: 0,
            can_reply: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: u64,
    pub chatid: u64,
    pub userid: u64,
    pub message: String,
    pub date: String,
    #[serde(rename = "fromUser")]
    pub from_user: String,
    #[serde(rename = "fromImage")]
    pub from_image: String,
    #[serde(rename = "isNew")]
    pub is_new: bool,
}

// -- Reply --

#[derive(Debug, Default, Deserialize)]
pub struct ReplyRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyResponse {
    pub success: bool,
    pub message: String,
}

impl ReplyResponse {
    pub fn sent() -> Self {
        Self {
            success: true,
            message: "Message sent!".to_string(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_feed_shape() {
        let json = serde_json::to_value(ChatFeedResponse::empty()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "items": [], "chatId": 0, "canReply": false })
        );
    }

    #[test]
    fn feed_item_field_names() {
        let item = FeedItem {
            id: 3,
            chatid: 1,
            userid: 2,
            message: "hi".into(),
            date: "2026-01-01T00:00:00Z".into(),
            from_user: "Ann".into(),
            from_image: "https://img/ann.png".into(),
            is_new: true,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["fromUser"], "Ann");
        assert_eq!(json["fromImage"], "https://img/ann.png");
        assert_eq!(json["isNew"], true);
        assert_eq!(json["chatid"], 1);
    }

    #[test]
    fn reply_request_tolerates_missing_message() {
        let req: ReplyRequest = serde_json::from_str("{}").unwrap();
        assert!(req.message.is_empty());
    }
}
