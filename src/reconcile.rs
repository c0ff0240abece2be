//! Per-conversation reconciliation of streamed turns against durable history.
//!
//! Each conversation moves through `Idle -> Streaming -> AwaitingConfirmation
//! -> Idle`. While a turn streams, the live partial message is shown in place
//! of the trailing assistant reply; once the stream ends the frozen snapshot
//! stays on screen until the durable store reports a grown message list or the
//! poll ceiling elapses. Every state change is published as an immutable
//! [`ConversationView`] on a `watch` channel.
//!
//! Spawned tasks carry the generation they were started for and check it
//! under the slot lock before touching state, so work left over from a
//! superseded send or a closed conversation is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use daemon_api::{CancellationSignal, DaemonApiError, Fragment, PersistedMessage, Role};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::accumulator::{PartialMessage, StreamAccumulator, StreamedSnapshot};
use crate::config::ReconcilePolicy;
use crate::display::{merge_overlay, DisplayMessage};
use crate::store::{DurableStore, StreamTransport};

/// Assistant text shown locally when a send fails before completing.
pub const ERROR_REPLY: &str = "Error: request failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Streaming,
    AwaitingConfirmation,
}

/// What a conversation view renders. Identical in shape across phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    pub conversation_id: String,
    pub phase: Phase,
    /// Bumped on every publish for this conversation slot.
    pub version: u64,
    pub messages: Vec<DisplayMessage>,
}

impl ConversationView {
    pub fn empty(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            phase: Phase::Idle,
            version: 0,
            messages: Vec::new(),
        }
    }

    /// Messages after the last user message.
    pub fn trailing_reply(&self) -> &[DisplayMessage] {
        let start = self
            .messages
            .iter()
            .rposition(|message| message.role == Role::User)
            .map_or(0, |index| index + 1);
        &self.messages[start..]
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to load conversation {conversation_id}: {source}")]
    Load {
        conversation_id: String,
        #[source]
        source: DaemonApiError,
    },

    #[error("conversation {conversation_id} was closed")]
    Closed { conversation_id: String },

    #[error("send requires a running tokio runtime")]
    NoRuntime,

    #[error("reconciler has been shut down")]
    ShutDown,
}

struct ActiveStream {
    cancel: CancellationSignal,
    handle: JoinHandle<()>,
}

struct ConversationSlot {
    conversation_id: String,
    /// Identifies this slot instance across close/reopen.
    epoch: u64,
    /// Generation of the most recent send; zero before any send.
    generation: u64,
    phase: Phase,
    history: Vec<PersistedMessage>,
    live: Option<StreamAccumulator>,
    overlay: Option<StreamedSnapshot>,
    /// Durable message count expected once the user's message is saved.
    baseline: usize,
    /// Trailing history entries that exist only locally: an unsaved user
    /// message and the error reply of a failed send.
    local_only: usize,
    stream: Option<ActiveStream>,
    poll: Option<JoinHandle<()>>,
    version: u64,
    sender: watch::Sender<Arc<ConversationView>>,
}

impl ConversationSlot {
    fn new(conversation_id: &str, epoch: u64) -> Self {
        let (sender, _) = watch::channel(Arc::new(ConversationView::empty(conversation_id)));
        Self {
            conversation_id: conversation_id.to_string(),
            epoch,
            generation: 0,
            phase: Phase::Idle,
            history: Vec::new(),
            live: None,
            overlay: None,
            baseline: 0,
            local_only: 0,
            stream: None,
            poll: None,
            version: 0,
            sender,
        }
    }

    fn current(&self) -> Arc<ConversationView> {
        Arc::clone(&*self.sender.borrow())
    }

    fn visible_overlay(&self) -> Option<PartialMessage> {
        match self.phase {
            Phase::Idle => None,
            Phase::Streaming => self.live.as_ref().map(|live| live.message().clone()),
            Phase::AwaitingConfirmation => self.overlay.as_ref().map(StreamedSnapshot::message),
        }
    }

    fn publish(&mut self, policy: &ReconcilePolicy) -> Arc<ConversationView> {
        let overlay = self.visible_overlay();
        self.version += 1;
        let view = Arc::new(ConversationView {
            conversation_id: self.conversation_id.clone(),
            phase: self.phase,
            version: self.version,
            messages: merge_overlay(
                &self.history,
                overlay.as_ref(),
                policy.max_trailing_assistant,
            ),
        });
        self.sender.send_replace(Arc::clone(&view));
        view
    }

    /// Stops polling, abandons any running stream, and drops transient state.
    /// Idempotent.
    fn retire(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
        if let Some(stream) = self.stream.take() {
            stream.cancel.store(true, Ordering::SeqCst);
            stream.handle.abort();
        }
        self.live = None;
        self.overlay = None;
        self.phase = Phase::Idle;
    }
}

enum PollOutcome {
    Confirmed,
    Pending,
    Stale,
}

/// Owns every open conversation's stream, overlay, and poll task.
pub struct Reconciler {
    transport: Arc<dyn StreamTransport>,
    store: Arc<dyn DurableStore>,
    policy: ReconcilePolicy,
    slots: Mutex<HashMap<String, ConversationSlot>>,
    next_generation: AtomicU64,
    shut_down: AtomicBool,
}

impl Reconciler {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        store: Arc<dyn DurableStore>,
        policy: ReconcilePolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            store,
            policy,
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Opens the conversation if needed and returns a receiver of its views.
    ///
    /// The channel closes when the conversation is closed.
    pub fn subscribe(&self, conversation_id: &str) -> watch::Receiver<Arc<ConversationView>> {
        let mut slots = self.lock_slots();
        self.slot_entry(&mut slots, conversation_id)
            .sender
            .subscribe()
    }

    /// Latest published view, or an empty idle view for unopened conversations.
    pub fn view(&self, conversation_id: &str) -> Arc<ConversationView> {
        self.lock_slots()
            .get(conversation_id)
            .map(ConversationSlot::current)
            .unwrap_or_else(|| Arc::new(ConversationView::empty(conversation_id)))
    }

    pub fn phase(&self, conversation_id: &str) -> Phase {
        self.lock_slots()
            .get(conversation_id)
            .map_or(Phase::Idle, |slot| slot.phase)
    }

    /// Fetches durable history once and publishes it.
    ///
    /// While a turn is in flight a durable list shorter than the local
    /// baseline is ignored so the just-sent user message stays visible.
    pub async fn load(&self, conversation_id: &str) -> Result<Arc<ConversationView>, ReconcileError> {
        self.ensure_running()?;
        let epoch = {
            let mut slots = self.lock_slots();
            self.slot_entry(&mut slots, conversation_id).epoch
        };

        let messages = self
            .store
            .conversation_messages(conversation_id)
            .await
            .map_err(|source| ReconcileError::Load {
                conversation_id: conversation_id.to_string(),
                source,
            })?;

        let mut slots = self.lock_slots();
        let Some(slot) = slots
            .get_mut(conversation_id)
            .filter(|slot| slot.epoch == epoch)
        else {
            return Err(ReconcileError::Closed {
                conversation_id: conversation_id.to_string(),
            });
        };

        if slot.phase == Phase::Idle || messages.len() >= slot.baseline {
            slot.history = messages;
            slot.local_only = 0;
        }
        tracing::debug!(
            conversation_id,
            messages = slot.history.len(),
            "conversation loaded"
        );
        Ok(slot.publish(&self.policy))
    }

    /// Starts a streamed turn and returns its generation.
    ///
    /// Any in-flight stream or poll for the conversation is abandoned first.
    /// The user's message is shown immediately.
    pub fn send(self: &Arc<Self>, conversation_id: &str, text: &str) -> Result<u64, ReconcileError> {
        self.ensure_running()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ReconcileError::NoRuntime)?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));

        let mut slots = self.lock_slots();
        let slot = self.slot_entry(&mut slots, conversation_id);
        slot.retire();
        slot.generation = generation;
        slot.history.push(PersistedMessage::user(text));
        slot.baseline = slot.history.len().saturating_sub(slot.local_only);
        slot.live = Some(StreamAccumulator::new(conversation_id));
        slot.phase = Phase::Streaming;
        slot.publish(&self.policy);

        let handle = runtime.spawn(Arc::clone(self).run_stream(
            conversation_id.to_string(),
            text.to_string(),
            generation,
            Arc::clone(&cancel),
        ));
        slot.stream = Some(ActiveStream { cancel, handle });

        tracing::info!(
            conversation_id,
            generation,
            baseline = slot.baseline,
            "send started"
        );
        Ok(generation)
    }

    /// Tears the conversation down: the network read is abandoned, polling
    /// stops, and subscribers see their channel close.
    pub fn close(&self, conversation_id: &str) {
        let removed = self.lock_slots().remove(conversation_id);
        if let Some(mut slot) = removed {
            slot.retire();
            tracing::info!(conversation_id, generation = slot.generation, "conversation closed");
        }
    }

    /// Closes every conversation and rejects further loads and sends.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let drained: Vec<ConversationSlot> = self
            .lock_slots()
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        let count = drained.len();
        for mut slot in drained {
            slot.retire();
        }
        tracing::info!(conversations = count, "reconciler shut down");
    }

    async fn run_stream(
        self: Arc<Self>,
        conversation_id: String,
        text: String,
        generation: u64,
        cancel: CancellationSignal,
    ) {
        let mut on_fragment =
            |fragment: Fragment| self.apply_fragment(&conversation_id, generation, fragment);
        let result = self
            .transport
            .stream(&conversation_id, &text, &cancel, &mut on_fragment)
            .await;

        match result {
            Ok(()) => self.finish_stream(&conversation_id, generation),
            Err(error) if error.is_cancelled() => {
                tracing::debug!(
                    conversation_id = conversation_id.as_str(),
                    generation,
                    "stream cancelled"
                );
            }
            Err(error) => self.fail_stream(&conversation_id, generation, error).await,
        }
    }

    fn apply_fragment(&self, conversation_id: &str, generation: u64, fragment: Fragment) {
        let mut slots = self.lock_slots();
        let Some(slot) = live_slot(&mut slots, conversation_id, generation) else {
            return;
        };
        if slot.phase != Phase::Streaming {
            return;
        }
        let Some(live) = slot.live.as_mut() else {
            return;
        };

        let snapshot = live.apply(fragment);
        tracing::trace!(
            conversation_id,
            generation,
            version = snapshot.version,
            "fragment applied"
        );
        slot.publish(&self.policy);
    }

    fn finish_stream(self: &Arc<Self>, conversation_id: &str, generation: u64) {
        let mut slots = self.lock_slots();
        let Some(slot) = live_slot(&mut slots, conversation_id, generation) else {
            return;
        };

        slot.stream = None;
        slot.overlay = slot.live.take().and_then(StreamAccumulator::finish);
        slot.phase = Phase::AwaitingConfirmation;
        slot.publish(&self.policy);

        tracing::info!(
            conversation_id,
            generation,
            has_overlay = slot.overlay.is_some(),
            "stream finished; awaiting confirmation"
        );

        slot.poll = Some(tokio::spawn(Arc::clone(self).run_poll(
            conversation_id.to_string(),
            generation,
            slot.baseline,
        )));
    }

    async fn fail_stream(&self, conversation_id: &str, generation: u64, error: DaemonApiError) {
        tracing::warn!(conversation_id, generation, %error, "stream failed");
        {
            let mut slots = self.lock_slots();
            let Some(slot) = live_slot(&mut slots, conversation_id, generation) else {
                return;
            };
            slot.stream = None;
            slot.live = None;
            slot.phase = Phase::Idle;
            slot.history.push(PersistedMessage::assistant(ERROR_REPLY));
            slot.local_only += 1;
            slot.publish(&self.policy);
        }

        match self.store.conversation_messages(conversation_id).await {
            Ok(mut messages) => {
                let mut slots = self.lock_slots();
                let Some(slot) = live_slot(&mut slots, conversation_id, generation) else {
                    return;
                };
                if messages.len() < slot.baseline {
                    // The send was rejected before the user's message was saved.
                    slot.local_only = slot.history.len().saturating_sub(messages.len());
                    return;
                }
                slot.local_only = 0;
                if messages.last().map(|message| message.role) != Some(Role::Assistant) {
                    messages.push(PersistedMessage::assistant(ERROR_REPLY));
                    slot.local_only = 1;
                }
                slot.history = messages;
                slot.publish(&self.policy);
            }
            Err(error) => {
                tracing::warn!(conversation_id, generation, %error, "refresh after failed send failed");
            }
        }
    }

    async fn run_poll(self: Arc<Self>, conversation_id: String, generation: u64, baseline: usize) {
        let policy = self.policy;
        let polling = async {
            let mut ticker = tokio::time::interval(policy.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.store.conversation_messages(&conversation_id).await {
                    Ok(messages) => {
                        match self.apply_poll(&conversation_id, generation, baseline, messages) {
                            PollOutcome::Confirmed | PollOutcome::Stale => return,
                            PollOutcome::Pending => {}
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            conversation_id = conversation_id.as_str(),
                            generation,
                            %error,
                            "durable store query failed; will retry"
                        );
                    }
                }
            }
        };

        if tokio::time::timeout(policy.poll_ceiling, polling).await.is_err() {
            self.expire_overlay(&conversation_id, generation);
        }
    }

    fn apply_poll(
        &self,
        conversation_id: &str,
        generation: u64,
        baseline: usize,
        messages: Vec<PersistedMessage>,
    ) -> PollOutcome {
        let mut slots = self.lock_slots();
        let Some(slot) = live_slot(&mut slots, conversation_id, generation) else {
            return PollOutcome::Stale;
        };
        if slot.phase != Phase::AwaitingConfirmation {
            return PollOutcome::Stale;
        }

        if messages.len() < baseline {
            return PollOutcome::Pending;
        }

        let confirmed = messages.len() > baseline;
        let changed = slot.history != messages;
        slot.history = messages;
        slot.local_only = 0;

        if confirmed {
            slot.poll = None;
            slot.overlay = None;
            slot.phase = Phase::Idle;
            slot.publish(&self.policy);
            tracing::info!(
                conversation_id,
                generation,
                messages = slot.history.len(),
                "turn confirmed by durable store"
            );
            return PollOutcome::Confirmed;
        }

        if changed {
            slot.publish(&self.policy);
        }
        PollOutcome::Pending
    }

    fn expire_overlay(&self, conversation_id: &str, generation: u64) {
        let mut slots = self.lock_slots();
        let Some(slot) = live_slot(&mut slots, conversation_id, generation) else {
            return;
        };
        if slot.phase != Phase::AwaitingConfirmation {
            return;
        }

        slot.poll = None;
        slot.overlay = None;
        slot.phase = Phase::Idle;
        slot.publish(&self.policy);
        tracing::debug!(conversation_id, generation, "confirmation timed out; overlay cleared");
    }

    fn ensure_running(&self) -> Result<(), ReconcileError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ReconcileError::ShutDown);
        }
        Ok(())
    }

    fn slot_entry<'a>(
        &self,
        slots: &'a mut HashMap<String, ConversationSlot>,
        conversation_id: &str,
    ) -> &'a mut ConversationSlot {
        slots
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                let epoch = self.next_generation.fetch_add(1, Ordering::SeqCst);
                ConversationSlot::new(conversation_id, epoch)
            })
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, ConversationSlot>> {
        lock_unpoisoned(&self.slots)
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        for slot in lock_unpoisoned(&self.slots).values_mut() {
            slot.retire();
        }
    }
}

fn live_slot<'a>(
    slots: &'a mut HashMap<String, ConversationSlot>,
    conversation_id: &str,
    generation: u64,
) -> Option<&'a mut ConversationSlot> {
    slots
        .get_mut(conversation_id)
        .filter(|slot| slot.generation == generation)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
