//! Streaming response engine for a daemon-backed chat client.
//!
//! A send streams Server-Sent Events from the daemon; [`daemon_api`] turns
//! the byte stream into typed [`Fragment`]s, the [`StreamAccumulator`] folds
//! them into one structured [`PartialMessage`], and the [`Reconciler`] keeps
//! that transient turn on screen until the durable store has persisted it.
//!
//! # Public API Overview
//! - Drive conversations through [`Reconciler::send`], [`Reconciler::load`],
//!   and [`Reconciler::close`]; observe them via [`Reconciler::subscribe`].
//! - Decode persisted assistant text with [`decode_persisted`] and render the
//!   in-flight overlay with [`merge_overlay`].
//! - Swap the network for fakes through [`StreamTransport`] and
//!   [`DurableStore`].

pub mod accumulator;
pub mod config;
pub mod display;
pub mod logging;
pub mod reconcile;
pub mod store;

/// Wire-level types re-exported from the transport crate.
pub use daemon_api::{
    CancellationSignal, Conversation, DaemonApiClient, DaemonApiConfig, DaemonApiError, Fragment,
    FragmentKind, PersistedMessage, Role,
};

/// Fragment folding.
pub use crate::accumulator::{
    LiveSnapshot, Part, PartKind, PartialMessage, StreamAccumulator, StreamedSnapshot,
};
/// Environment configuration and policy constants.
pub use crate::config::{ConfigError, EnvConfig, ReconcilePolicy};
/// Structured persistence and overlay presentation.
pub use crate::display::{
    decode_persisted, decode_structured, encode_structured, flatten_structured, merge_overlay,
    DisplayBody, DisplayMessage, STRUCTURED_PREFIX,
};
/// Conversation state machine.
pub use crate::reconcile::{ConversationView, Phase, ReconcileError, Reconciler, ERROR_REPLY};
/// Transport and store seams.
pub use crate::store::{DurableStore, StreamTransport};
