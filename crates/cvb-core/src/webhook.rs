//! Inbound `chat.message.sent` webhook payload.
//!
//! Only the fields the bot consumes are modelled. Ids arrive as strings or
//! numbers depending on the event version, so both are accepted.

use serde::{Deserialize, Deserializer};

use crate::domain::UserId;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatMessageEvent {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub broadcaster: Option<EventUser>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EventUser {
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
}

impl ChatMessageEvent {
    pub fn from_slice(body: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn broadcaster_id(&self) -> Option<UserId> {
        self.broadcaster
            .as_ref()
            .and_then(|b| b.user_id.as_deref())
            .filter(|id| !id.is_empty())
            .map(UserId::from)
    }

    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
