//! Folding of streamed fragments into one structured partial message.

use std::sync::Arc;

use daemon_api::{Fragment, FragmentKind};
use serde::{Deserialize, Serialize};

/// Displayable block kind within an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartKind {
    Tool,
    Answer,
}

impl From<PartKind> for FragmentKind {
    fn from(kind: PartKind) -> Self {
        match kind {
            PartKind::Tool => FragmentKind::Tool,
            PartKind::Answer => FragmentKind::Answer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub kind: PartKind,
    pub text: String,
}

impl Part {
    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            kind: PartKind::Tool,
            text: text.into(),
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            kind: PartKind::Answer,
            text: text.into(),
        }
    }
}

/// In-progress reconstruction of one streamed agent turn.
///
/// Invariants: `parts` never holds two adjacent answer parts, and
/// `reasoning_text` only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialMessage {
    pub reasoning_text: String,
    pub parts: Vec<Part>,
}

impl PartialMessage {
    pub fn is_empty(&self) -> bool {
        self.reasoning_text.is_empty() && self.parts.is_empty()
    }

    /// Apply one fragment using the merge policy.
    pub fn apply(&mut self, fragment: Fragment) {
        match fragment.kind {
            FragmentKind::Reasoning => self.reasoning_text.push_str(&fragment.text),
            FragmentKind::Tool => self.parts.push(Part::tool(fragment.text)),
            FragmentKind::Answer => match self.parts.last_mut() {
                Some(last) if last.kind == PartKind::Answer => last.text.push_str(&fragment.text),
                _ => self.parts.push(Part::answer(fragment.text)),
            },
        }
    }

    /// Ordered display fragments: reasoning first (when present), then parts.
    pub fn to_fragments(&self) -> Vec<Fragment> {
        let reasoning = (!self.reasoning_text.is_empty())
            .then(|| Fragment::reasoning(self.reasoning_text.clone()));
        reasoning
            .into_iter()
            .chain(
                self.parts
                    .iter()
                    .map(|part| Fragment::new(part.kind.into(), part.text.clone())),
            )
            .collect()
    }
}

/// Frozen copy of a finished turn, kept until durable history catches up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedSnapshot {
    pub conversation_id: String,
    pub reasoning_text: String,
    pub parts: Vec<Part>,
}

impl StreamedSnapshot {
    pub fn message(&self) -> PartialMessage {
        PartialMessage {
            reasoning_text: self.reasoning_text.clone(),
            parts: self.parts.clone(),
        }
    }
}

/// Published state after one fold step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSnapshot {
    /// Number of fragments applied so far.
    pub version: u64,
    pub message: Arc<PartialMessage>,
}

/// Single-writer owner of the partial message for one outstanding send.
///
/// Every [`apply`](Self::apply) returns an immutable snapshot readers can hold
/// without observing later mutation.
#[derive(Debug)]
pub struct StreamAccumulator {
    conversation_id: String,
    message: PartialMessage,
    version: u64,
}

impl StreamAccumulator {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message: PartialMessage::default(),
            version: 0,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn message(&self) -> &PartialMessage {
        &self.message
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn apply(&mut self, fragment: Fragment) -> LiveSnapshot {
        self.message.apply(fragment);
        self.version += 1;
        self.snapshot()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            version: self.version,
            message: Arc::new(self.message.clone()),
        }
    }

    /// Freeze the accumulated turn. Empty turns produce no snapshot.
    pub fn finish(self) -> Option<StreamedSnapshot> {
        if self.message.is_empty() {
            return None;
        }

        Some(StreamedSnapshot {
            conversation_id: self.conversation_id,
            reasoning_text: self.message.reasoning_text,
            parts: self.message.parts,
        })
    }
}
