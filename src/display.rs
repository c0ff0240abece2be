//! Display-side decoding of persisted messages and the overlay merge rule.
//!
//! Persisted assistant text is either plain text or a structured
//! `{"parts":[{"type":..,"content":..}]}` payload written by the daemon for
//! streamed turns. Both, and the live/overlay state of an in-flight turn,
//! come out of this module as the same [`DisplayMessage`] shape.

use daemon_api::{Fragment, FragmentKind, PersistedMessage, Role};
use serde::{Deserialize, Serialize};

use crate::accumulator::PartialMessage;

/// Literal prefix marking a structured persisted payload.
pub const STRUCTURED_PREFIX: &str = "{\"parts\":";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayBody {
    PlainText(String),
    Structured(Vec<Fragment>),
}

impl DisplayBody {
    /// Plain-text rendering; reasoning is omitted and tool output is fenced.
    pub fn to_plain_text(&self) -> String {
        match self {
            Self::PlainText(text) => text.clone(),
            Self::Structured(parts) => flatten_fragments(parts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub role: Role,
    pub body: DisplayBody,
    pub timestamp_millis: Option<i64>,
}

impl DisplayMessage {
    pub fn structured(role: Role, parts: Vec<Fragment>) -> Self {
        Self {
            role,
            body: DisplayBody::Structured(parts),
            timestamp_millis: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StructuredPayload {
    parts: Vec<Fragment>,
}

#[derive(Serialize)]
struct StructuredPayloadRef<'a> {
    parts: &'a [Fragment],
}

/// Speculatively parse a structured payload.
///
/// Returns `None` when the prefix does not match, the JSON is malformed, or
/// any part fails the `{type, content}` shape.
pub fn decode_structured(text: &str) -> Option<Vec<Fragment>> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with(STRUCTURED_PREFIX) {
        return None;
    }

    match serde_json::from_str::<StructuredPayload>(trimmed) {
        Ok(payload) => Some(payload.parts),
        Err(error) => {
            tracing::debug!(%error, "structured payload failed to decode; showing as plain text");
            None
        }
    }
}

/// Decode one persisted message for display. Only assistant messages are
/// eligible for the structured form.
pub fn decode_persisted(message: &PersistedMessage) -> DisplayMessage {
    let structured = if message.role == Role::Assistant {
        decode_structured(&message.text)
    } else {
        None
    };

    DisplayMessage {
        role: message.role,
        body: match structured {
            Some(parts) => DisplayBody::Structured(parts),
            None => DisplayBody::PlainText(message.text.clone()),
        },
        timestamp_millis: message.timestamp_millis,
    }
}

/// Encode a turn into the persisted structured text form, reasoning first.
pub fn encode_structured(message: &PartialMessage) -> Result<String, serde_json::Error> {
    let parts = message.to_fragments();
    serde_json::to_string(&StructuredPayloadRef { parts: &parts })
}

/// Flatten structured text to plain text; other text is returned unchanged.
pub fn flatten_structured(text: &str) -> String {
    match decode_structured(text) {
        Some(parts) => flatten_fragments(&parts),
        None => text.to_string(),
    }
}

fn flatten_fragments(parts: &[Fragment]) -> String {
    let mut out = String::new();
    for part in parts {
        match part.kind {
            FragmentKind::Reasoning => {}
            FragmentKind::Answer => out.push_str(&part.text),
            FragmentKind::Tool => {
                out.push_str("\n[Tool]\n");
                out.push_str(&part.text);
                out.push('\n');
            }
        }
    }
    out
}

/// Merge a transient turn into the durable message list.
///
/// The overlay only ever stands in for the trailing assistant turn: the
/// messages after the last user message must all be assistant messages and
/// number at most `max_trailing_assistant`, otherwise the durable list is
/// shown as-is. An empty overlay is never shown.
pub fn merge_overlay(
    history: &[PersistedMessage],
    overlay: Option<&PartialMessage>,
    max_trailing_assistant: usize,
) -> Vec<DisplayMessage> {
    let mut merged: Vec<DisplayMessage> = history.iter().map(decode_persisted).collect();
    let Some(overlay) = overlay.filter(|overlay| !overlay.is_empty()) else {
        return merged;
    };

    let start = history
        .iter()
        .rposition(|message| message.role == Role::User)
        .map_or(0, |index| index + 1);
    let trailing = &history[start..];
    if trailing.len() > max_trailing_assistant
        || trailing.iter().any(|message| message.role != Role::Assistant)
    {
        return merged;
    }

    merged.truncate(start);
    merged.push(DisplayMessage::structured(
        Role::Assistant,
        overlay.to_fragments(),
    ));
    merged
}
