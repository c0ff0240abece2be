#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use daemon_chat::{
    CancellationSignal, ConversationView, DaemonApiError, DurableStore, Fragment,
    PersistedMessage, Phase, StreamTransport,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Upper bound for any single wait in paused-clock tests.
pub const WAIT_LIMIT: Duration = Duration::from_secs(600);

pub enum StreamStep {
    Fragment(Fragment),
    Finish,
    Fail(String),
}

/// Test-side handle feeding one scripted stream.
pub struct StreamController {
    sender: mpsc::UnboundedSender<StreamStep>,
}

impl StreamController {
    pub fn fragment(&self, fragment: Fragment) {
        let _ = self.sender.send(StreamStep::Fragment(fragment));
    }

    pub fn finish(&self) {
        let _ = self.sender.send(StreamStep::Finish);
    }

    pub fn fail(&self, message: &str) {
        let _ = self.sender.send(StreamStep::Fail(message.to_string()));
    }
}

pub struct RecordedSend {
    pub conversation_id: String,
    pub message: String,
    pub cancellation: CancellationSignal,
}

/// Transport whose streams are driven step by step from the test.
#[derive(Default)]
pub struct FakeTransport {
    scripts: Mutex<VecDeque<mpsc::UnboundedReceiver<StreamStep>>>,
    sends: Mutex<Vec<RecordedSend>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the script for the next `stream` call.
    pub fn script(&self) -> StreamController {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.scripts
            .lock()
            .expect("lock scripts")
            .push_back(receiver);
        StreamController { sender }
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().expect("lock sends").len()
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sends
            .lock()
            .expect("lock sends")
            .iter()
            .map(|send| (send.conversation_id.clone(), send.message.clone()))
            .collect()
    }

    pub fn was_cancelled(&self, index: usize) -> bool {
        self.sends.lock().expect("lock sends")[index]
            .cancellation
            .load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn stream(
        &self,
        conversation_id: &str,
        message: &str,
        cancellation: &CancellationSignal,
        on_fragment: &mut (dyn FnMut(Fragment) + Send),
    ) -> Result<(), DaemonApiError> {
        self.sends.lock().expect("lock sends").push(RecordedSend {
            conversation_id: conversation_id.to_string(),
            message: message.to_string(),
            cancellation: Arc::clone(cancellation),
        });
        let receiver = self.scripts.lock().expect("lock scripts").pop_front();
        let Some(mut receiver) = receiver else {
            return Err(DaemonApiError::Unknown("no scripted stream".to_string()));
        };

        while let Some(step) = receiver.recv().await {
            if cancellation.load(Ordering::SeqCst) {
                return Err(DaemonApiError::Cancelled);
            }
            match step {
                StreamStep::Fragment(fragment) => on_fragment(fragment),
                StreamStep::Finish => return Ok(()),
                StreamStep::Fail(message) => return Err(DaemonApiError::Unknown(message)),
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
enum StoreReply {
    Messages(Vec<PersistedMessage>),
    Fail(String),
}

/// Durable store answering from a queue; the last reply repeats forever.
#[derive(Default)]
pub struct FakeStore {
    replies: Mutex<VecDeque<StoreReply>>,
    calls: Mutex<Vec<Instant>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, messages: Vec<PersistedMessage>) -> &Self {
        self.replies
            .lock()
            .expect("lock replies")
            .push_back(StoreReply::Messages(messages));
        self
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.replies
            .lock()
            .expect("lock replies")
            .push_back(StoreReply::Fail(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().expect("lock calls").len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().expect("lock calls").clone()
    }
}

#[async_trait]
impl DurableStore for FakeStore {
    async fn conversation_messages(
        &self,
        _conversation_id: &str,
    ) -> Result<Vec<PersistedMessage>, DaemonApiError> {
        self.calls.lock().expect("lock calls").push(Instant::now());
        let reply = {
            let mut replies = self.replies.lock().expect("lock replies");
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        };

        match reply {
            Some(StoreReply::Messages(messages)) => Ok(messages),
            Some(StoreReply::Fail(message)) => Err(DaemonApiError::Unknown(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// Waits until a published view satisfies `predicate`.
pub async fn wait_for_view<F>(
    views: &mut watch::Receiver<Arc<ConversationView>>,
    mut predicate: F,
) -> Arc<ConversationView>
where
    F: FnMut(&ConversationView) -> bool,
{
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let view = Arc::clone(&*views.borrow_and_update());
            if predicate(&view) {
                return view;
            }
            views.changed().await.expect("view channel closed");
        }
    })
    .await
    .expect("view condition not reached")
}

pub async fn wait_for_phase(
    views: &mut watch::Receiver<Arc<ConversationView>>,
    phase: Phase,
) -> Arc<ConversationView> {
    wait_for_view(views, |view| view.phase == phase).await
}
