//! Telegram Bot API types.
//!
//! Only the fields the ingestion path reads are modelled; everything else in
//! the payloads is ignored.

use serde::{Deserialize, Serialize};

/// Envelope around every Bot API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
    pub parameters: Option<ResponseParameters>,
}

/// Extra information attached to some failed requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseParameters {
    /// Seconds to wait before repeating a flood-limited request.
    pub retry_after: Option<u64>,
}

/// A Telegram user or bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

/// A chat: private, group, supergroup or channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl Chat {
    #[must_use]
    pub fn is_channel(&self) -> bool {
        self.chat_type == "channel"
    }
}

/// A message or channel post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    /// Unix seconds.
    pub date: i64,
    pub chat: Chat,
    pub text: Option<String>,
    /// Caption of media messages, used when there is no `text`.
    pub caption: Option<String>,
}

impl Message {
    /// Text body, falling back to the media caption.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

/// One entry of a `getUpdates` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
}

impl Update {
    /// The new message carried by this update, if any.
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        self.channel_post.or(self.message)
    }
}

/// Update kinds the source asks for.
pub const ALLOWED_UPDATES: [&str; 2] = ["message", "channel_post"];

/// Body of a `getUpdates` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Long-poll timeout in seconds; zero returns immediately.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_updates: Option<Vec<String>>,
}

impl GetUpdatesRequest {
    /// Request for message updates starting at `offset`.
    #[must_use]
    pub fn messages(offset: Option<i64>, limit: u32, timeout: u32) -> Self {
        Self {
            offset,
            limit: Some(limit),
            timeout: Some(timeout),
            allowed_updates: Some(ALLOWED_UPDATES.iter().map(|s| (*s).to_string()).collect()),
        }
    }
}

/// Target of a `getChat` call: a numeric id or `@username`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Username(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GetChatRequest {
    pub chat_id: ChatId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_post_update_parses() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 10,
            "channel_post": {
                "message_id": 5,
                "date": 1_718_020_800,
                "chat": { "id": -1001, "type": "channel", "title": "News", "username": "news" },
                "caption": "photo caption",
                "photo": [{ "file_id": "x" }]
            }
        }))
        .unwrap();

        let message = update.into_message().unwrap();
        assert!(message.chat.is_channel());
        assert_eq!(message.body(), Some("photo caption"));
    }

    #[test]
    fn unrelated_update_has_no_message() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 11,
            "callback_query": { "id": "q" }
        }))
        .unwrap();
        assert!(update.into_message().is_none());
    }

    #[test]
    fn get_updates_request_omits_unset_fields() {
        let request = GetUpdatesRequest::messages(None, 100, 0);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "limit": 100, "timeout": 0, "allowed_updates": ["message", "channel_post"] })
        );
    }

    #[test]
    fn chat_id_serializes_untagged() {
        assert_eq!(
            serde_json::to_value(GetChatRequest { chat_id: ChatId::Id(-100) }).unwrap(),
            json!({ "chat_id": -100 })
        );
        assert_eq!(
            serde_json::to_value(GetChatRequest { chat_id: ChatId::Username("@news".into()) })
                .unwrap(),
            json!({ "chat_id": "@news" })
        );
    }
}
