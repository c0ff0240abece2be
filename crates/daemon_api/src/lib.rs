//! Transport-only client primitives for the conversational-agent daemon.
//!
//! This crate owns request building, SSE framing, fragment decoding and the
//! durable-store wire types. It intentionally contains no reconciliation or
//! presentation state; that lives in `daemon_chat`.
//!
//! Stream decoding is two-staged: [`SseFrameParser`] turns arbitrary byte
//! chunks into `data:` payloads, and [`decode_fragment`] turns each payload
//! into a typed [`Fragment`], skipping anything it does not recognize.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod messages;
pub mod sse;
pub mod url;

pub use client::{CancellationSignal, DaemonApiClient, StreamSummary};
pub use config::DaemonApiConfig;
pub use error::DaemonApiError;
pub use events::{decode_fragment, Fragment, FragmentKind};
pub use messages::{Conversation, PersistedMessage, Role};
pub use sse::SseFrameParser;
pub use crate::url::normalize_base_url;
