use serde::{Deserialize, Serialize};

/// Author of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    /// Any role this client does not render specially, such as `system`.
    #[serde(other)]
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Other => "other",
        }
    }
}

/// A message as returned by the durable store.
///
/// Assistant text may be a serialized `{"parts":[...]}` payload produced by a
/// streamed turn; decoding that form is the display layer's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub role: Role,
    #[serde(rename = "content", default)]
    pub text: String,
    #[serde(
        rename = "timestampMillis",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp_millis: Option<i64>,
}

impl PersistedMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp_millis: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_timestamp(mut self, timestamp_millis: i64) -> Self {
        self.timestamp_millis = Some(timestamp_millis);
        self
    }
}

/// Conversation record returned by the list/get endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub bot_name: Option<String>,
    #[serde(default)]
    pub messages: Vec<PersistedMessage>,
    #[serde(default)]
    pub parent_conversation_id: Option<String>,
    #[serde(default)]
    pub created_at_millis: Option<i64>,
    #[serde(default)]
    pub participant1: Option<String>,
    #[serde(default)]
    pub participant2: Option<String>,
}

impl Conversation {
    /// Direct conversations are the bot-to-participant threads.
    pub fn is_direct(&self) -> bool {
        self.participant1.is_some() && self.participant2.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{Conversation, PersistedMessage, Role};

    #[test]
    fn unknown_roles_decode_as_other() {
        let message: PersistedMessage =
            serde_json::from_str(r#"{"role":"system","content":"be brief"}"#)
                .expect("decode system message");
        assert_eq!(message.role, Role::Other);
        assert_eq!(message.timestamp_millis, None);
    }

    #[test]
    fn conversation_accepts_camel_case_fields_and_nulls() {
        let conversation: Conversation = serde_json::from_str(
            r#"{
                "id": "c1",
                "name": "Chat",
                "providerId": null,
                "messages": [{"role":"user","content":"hi","timestampMillis":17}],
                "participant1": "user",
                "participant2": "helper"
            }"#,
        )
        .expect("decode conversation");

        assert_eq!(conversation.provider_id, None);
        assert_eq!(
            conversation.messages,
            vec![PersistedMessage::user("hi").with_timestamp(17)]
        );
        assert!(conversation.is_direct());
    }
}
