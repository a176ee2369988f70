//! In-memory claim store, scripted notification source and a failing classifier.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use feedsense_core::{
    Classifier, ClassifierError, Feedback, VaderClassifier, ListenError, Sentiment, WorkerError,
};
use feedsense_db::{ClaimStore, ClaimedBatch};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::listener::{NotificationSource, Subscriber};

#[derive(Default)]
struct MemoryState {
    rows: Vec<Feedback>,
    locked: HashSet<Uuid>,
    claim_failures: VecDeque<WorkerError>,
    record_failures: VecDeque<WorkerError>,
}

/// Claim store with skip-locked semantics over a vector of rows.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    record_calls: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, message: Option<&str>) -> Uuid {
        let mut state = self.state.lock().unwrap();
        let id = Uuid::new_v4();
        let created_at = Utc::now() + chrono::Duration::microseconds(state.rows.len() as i64);
        state.rows.push(Feedback {
            id,
            message: message.map(str::to_string),
            created_at,
            sentiment: None,
            sentiment_version: None,
            sentiment_updated_at: None,
        });
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Feedback> {
        let state = self.state.lock().unwrap();
        state.rows.iter().find(|f| f.id == id).cloned()
    }

    pub fn get_all(&self) -> Vec<Feedback> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn pending_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.rows.iter().filter(|f| f.is_pending()).count()
    }

    pub fn locked_ids(&self) -> HashSet<Uuid> {
        self.state.lock().unwrap().locked.clone()
    }

    pub fn record_calls(&self) -> usize {
        self.record_calls.load(Ordering::SeqCst)
    }

    /// The next `claim_batch` call fails with `err`.
    pub fn fail_next_claim(&self, err: WorkerError) {
        self.state.lock().unwrap().claim_failures.push_back(err);
    }

    /// The next `record_result` call fails with `err`.
    pub fn fail_next_record(&self, err: WorkerError) {
        self.state.lock().unwrap().record_failures.push_back(err);
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn claim_batch(&self, limit: i64) -> Result<Box<dyn ClaimedBatch>, WorkerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.claim_failures.pop_front() {
            return Err(err);
        }

        let mut candidates: Vec<Feedback> = state
            .rows
            .iter()
            .filter(|f| f.is_pending() && !state.locked.contains(&f.id))
            .cloned()
            .collect();
        candidates.sort_by_key(|f| f.created_at);
        candidates.truncate(limit.max(0) as usize);

        for item in &candidates {
            state.locked.insert(item.id);
        }

        Ok(Box::new(MemoryBatch {
            store: self.clone(),
            items: candidates,
            staged: Vec::new(),
        }))
    }
}

struct MemoryBatch {
    store: MemoryStore,
    items: Vec<Feedback>,
    staged: Vec<(Uuid, Sentiment)>,
}

#[async_trait]
impl ClaimedBatch for MemoryBatch {
    fn items(&self) -> &[Feedback] {
        &self.items
    }

    async fn record_result(&mut self, id: Uuid, sentiment: &Sentiment) -> Result<(), WorkerError> {
        if let Some(err) = self.store.state.lock().unwrap().record_failures.pop_front() {
            return Err(err);
        }
        if !self.items.iter().any(|f| f.id == id) {
            return Err(WorkerError::Database(sqlx::Error::RowNotFound));
        }
        self.store.record_calls.fetch_add(1, Ordering::SeqCst);
        self.staged.push((id, sentiment.clone()));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), WorkerError> {
        let staged = std::mem::take(&mut self.staged);
        let mut state = self.store.state.lock().unwrap();
        let now = Utc::now();
        for (id, sentiment) in staged {
            if let Some(row) = state.rows.iter_mut().find(|f| f.id == id) {
                row.sentiment_version = Some(sentiment.model.clone());
                row.sentiment = Some(sentiment);
                row.sentiment_updated_at = Some(now);
            }
        }
        drop(state);
        Ok(())
    }
}

impl Drop for MemoryBatch {
    fn drop(&mut self) {
        let mut state = self.store.state.lock().unwrap();
        for item in &self.items {
            state.locked.remove(&item.id);
        }
    }
}

/// VADER classifier that fails on one marker text.
pub struct FailingClassifier {
    inner: VaderClassifier,
}

impl FailingClassifier {
    pub const POISON: &'static str = "__poison__";

    pub fn new() -> Self {
        Self {
            inner: VaderClassifier::new(),
        }
    }
}

impl Classifier for FailingClassifier {
    fn model(&self) -> &str {
        self.inner.model()
    }

    fn classify(&self, text: Option<&str>) -> Result<Sentiment, ClassifierError> {
        if text == Some(Self::POISON) {
            return Err(ClassifierError::Failed("poisoned input".into()));
        }
        self.inner.classify(text)
    }
}

#[derive(Debug)]
pub enum ScriptedEvent {
    Notify,
    Disconnect,
}

/// Events waiting for the next poll. A `Disconnect` found while draining a notification burst
/// is parked in `deferred` and reported on the following poll.
struct ScriptedQueue {
    rx: mpsc::UnboundedReceiver<ScriptedEvent>,
    deferred: Option<ScriptedEvent>,
}

/// Subscriber whose notifications are pushed by the test through [`ScriptedSubscriber::send`].
#[derive(Clone)]
pub struct ScriptedSubscriber {
    tx: mpsc::UnboundedSender<ScriptedEvent>,
    queue: Arc<tokio::sync::Mutex<ScriptedQueue>>,
    subscriptions: Arc<AtomicUsize>,
    subscribe_failures: Arc<AtomicUsize>,
}

impl ScriptedSubscriber {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            queue: Arc::new(tokio::sync::Mutex::new(ScriptedQueue { rx, deferred: None })),
            subscriptions: Arc::new(AtomicUsize::new(0)),
            subscribe_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn send(&self, event: ScriptedEvent) {
        self.tx.send(event).expect("scripted receiver dropped");
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// The next `n` subscribe attempts fail.
    pub fn fail_subscribes(&self, n: usize) {
        self.subscribe_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Subscriber for ScriptedSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn NotificationSource>, ListenError> {
        let remaining = self.subscribe_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.subscribe_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ListenError::Subscribe {
                channel: channel.to_string(),
                reason: "scripted failure".into(),
            });
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            queue: self.queue.clone(),
        }))
    }
}

struct ScriptedSource {
    queue: Arc<tokio::sync::Mutex<ScriptedQueue>>,
}

#[async_trait]
impl NotificationSource for ScriptedSource {
    async fn poll(&mut self, timeout: Duration) -> Result<bool, ListenError> {
        let mut queue = self.queue.lock().await;
        let event = match queue.deferred.take() {
            Some(event) => event,
            None => match tokio::time::timeout(timeout, queue.rx.recv()).await {
                Err(_) => return Ok(false),
                Ok(None) => std::future::pending::<ScriptedEvent>().await,
                Ok(Some(event)) => event,
            },
        };

        match event {
            ScriptedEvent::Disconnect => Err(ListenError::Disconnected("scripted disconnect".into())),
            ScriptedEvent::Notify => {
                while let Ok(next) = queue.rx.try_recv() {
                    if let ScriptedEvent::Disconnect = next {
                        queue.deferred = Some(next);
                        break;
                    }
                }
                Ok(true)
            }
        }
    }
}
