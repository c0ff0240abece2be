use serde::{Deserialize, Serialize};

/// Kind of streamed content carried by one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    Reasoning,
    Tool,
    Answer,
}

/// One decoded unit of streamed content.
///
/// The serialized form is the wire shape `{"type": ..., "content": ...}`,
/// which is also the element shape of persisted structured `parts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(rename = "type")]
    pub kind: FragmentKind,
    #[serde(rename = "content")]
    pub text: String,
}

impl Fragment {
    pub fn new(kind: FragmentKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::new(FragmentKind::Reasoning, text)
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self::new(FragmentKind::Tool, text)
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self::new(FragmentKind::Answer, text)
    }
}

/// Decode one SSE payload into a fragment.
///
/// Malformed or unrecognized payloads yield `None`; an unknown record must
/// never abort an otherwise healthy stream.
pub fn decode_fragment(payload: &str) -> Option<Fragment> {
    match serde_json::from_str::<Fragment>(payload) {
        Ok(fragment) => Some(fragment),
        Err(error) => {
            tracing::debug!(%error, payload_len = payload.len(), "skipping undecodable stream payload");
            None
        }
    }
}
