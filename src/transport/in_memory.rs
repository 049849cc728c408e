//! In-memory broker for testing and single-process scenarios.
//!
//! Topics fan out to every subscription that exists when a message is
//! published. Each subscription keeps its own queue with peek-lock
//! semantics: delivered messages are locked until acked, abandoned or
//! rejected. Abandoned messages go back to the queue with their delivery
//! count incremented, and are dead-lettered once the count reaches the
//! broker's max delivery count.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Broker, Connection, Credentials, LeaseRenewer, Message, Receiver, ReceiverTarget};
use crate::error::TransportError;

/// Deliveries allowed before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// One entry in a subscription's operation journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A `receive_batch` call returned `count` messages.
    Receive { count: usize },
    Ack(String),
    Abandon(String),
    Reject { id: String, reason: String },
}

/// Receivers and lease renewers opening and closing, broker-wide, in order.
///
/// Renewers are numbered from 1 in the order they are created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    RenewerOpened(usize),
    ReceiverOpened(ReceiverTarget),
    ReceiverClosed(ReceiverTarget),
    RenewerClosed(usize),
}

/// In-memory broker.
///
/// Cheap to clone; clones share state, so a test can keep one handle to
/// publish and inspect while the app owns another.
///
/// ## Example
///
/// ```
/// use topic_consumer::transport::{InMemoryBroker, Message};
///
/// let broker = InMemoryBroker::new();
/// broker.create_subscription("task-created", "audit");
///
/// let delivered = broker.publish("task-created", Message::with_string_body("m-1", "{}"));
/// assert_eq!(delivered, 1);
/// assert_eq!(broker.pending("task-created", "audit"), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<BrokerState>,
    max_delivery_count: AtomicU32,
    require_credentials: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    renewers: AtomicUsize,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<ReceiverTarget, SubscriptionState>,
    lifecycle: Vec<Lifecycle>,
    fail_connect: Option<TransportError>,
    fail_open_receiver: Option<TransportError>,
}

#[derive(Default)]
struct SubscriptionState {
    available: VecDeque<Message>,
    locked: HashMap<String, Message>,
    completed: Vec<String>,
    dead_lettered: Vec<(Message, String)>,
    journal: Vec<Operation>,
    injected_failures: VecDeque<TransportError>,
    lost_lease: Option<String>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn max_delivery_count(&self) -> u32 {
        match self.max_delivery_count.load(Ordering::SeqCst) {
            0 => DEFAULT_MAX_DELIVERY_COUNT,
            n => n,
        }
    }
}

impl BrokerState {
    fn subscription(&mut self, target: &ReceiverTarget) -> &mut SubscriptionState {
        let groups = self.topics.entry(target.stream.clone()).or_default();
        if !groups.contains(&target.group) {
            groups.push(target.group.clone());
        }
        self.subscriptions.entry(target.clone()).or_default()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change how many deliveries are allowed before dead-lettering.
    pub fn set_max_delivery_count(&self, count: u32) {
        self.inner.max_delivery_count.store(count, Ordering::SeqCst);
    }

    /// Make `connect` fail with `Unauthorized` when given `Credentials::None`.
    pub fn require_credentials(&self) {
        self.inner.require_credentials.store(true, Ordering::SeqCst);
    }

    /// Create a subscription on a topic. Only existing subscriptions receive
    /// published messages. Creating it twice is a no-op.
    pub fn create_subscription(&self, topic: &str, group: &str) {
        self.inner
            .state()
            .subscription(&ReceiverTarget::new(topic, group));
    }

    /// Publish a message to every subscription of `topic`. Returns how many
    /// subscriptions received it.
    pub fn publish(&self, topic: &str, message: Message) -> usize {
        let mut state = self.inner.state();
        let groups = state.topics.get(topic).cloned().unwrap_or_default();
        for group in &groups {
            let target = ReceiverTarget::new(topic, group.as_str());
            state
                .subscription(&target)
                .available
                .push_back(message.clone());
        }
        groups.len()
    }

    /// Publish a JSON body.
    pub fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        id: &str,
        body: &T,
    ) -> Result<usize, serde_json::Error> {
        Ok(self.publish(topic, Message::json(id, body)?))
    }

    /// Messages waiting to be delivered.
    pub fn pending(&self, topic: &str, group: &str) -> usize {
        self.read(topic, group, |sub| sub.available.len())
    }

    /// Messages delivered but not yet settled.
    pub fn in_flight(&self, topic: &str, group: &str) -> usize {
        self.read(topic, group, |sub| sub.locked.len())
    }

    /// IDs of completed messages, in completion order.
    pub fn completed(&self, topic: &str, group: &str) -> Vec<String> {
        self.read(topic, group, |sub| sub.completed.clone())
    }

    /// Dead-lettered messages with their reasons.
    pub fn dead_lettered(&self, topic: &str, group: &str) -> Vec<(Message, String)> {
        self.read(topic, group, |sub| sub.dead_lettered.clone())
    }

    /// Everything receivers did on a subscription, in order.
    pub fn journal(&self, topic: &str, group: &str) -> Vec<Operation> {
        self.read(topic, group, |sub| sub.journal.clone())
    }

    /// Number of `receive_batch` calls served for a subscription.
    pub fn receive_calls(&self, topic: &str, group: &str) -> usize {
        self.read(topic, group, |sub| {
            sub.journal
                .iter()
                .filter(|op| matches!(op, Operation::Receive { .. }))
                .count()
        })
    }

    /// Make the next `receive_batch` on a subscription fail with `error`.
    pub fn fail_next_receive(&self, topic: &str, group: &str, error: TransportError) {
        self.inner
            .state()
            .subscription(&ReceiverTarget::new(topic, group))
            .injected_failures
            .push_back(error);
    }

    /// Make the lease renewer of a subscription's receiver fail with
    /// `reason`. Locked messages go back to the queue and the next
    /// `receive_batch` reports `TransportError::LeaseRenewal`.
    pub fn fail_lease_renewal(&self, topic: &str, group: &str, reason: &str) {
        self.inner
            .state()
            .subscription(&ReceiverTarget::new(topic, group))
            .lost_lease = Some(reason.to_string());
    }

    /// Make the next `open_receiver` fail with `error`.
    pub fn fail_next_open_receiver(&self, error: TransportError) {
        self.inner.state().fail_open_receiver = Some(error);
    }

    /// Receivers and renewers opened and closed so far.
    pub fn lifecycle(&self) -> Vec<Lifecycle> {
        self.inner.state().lifecycle.clone()
    }

    /// Make the next `connect` fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.inner.state().fail_connect = Some(error);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    fn read<T: Default>(
        &self,
        topic: &str,
        group: &str,
        f: impl FnOnce(&SubscriptionState) -> T,
    ) -> T {
        self.inner
            .state()
            .subscriptions
            .get(&ReceiverTarget::new(topic, group))
            .map(f)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        if let Some(err) = self.inner.state().fail_connect.take() {
            return Err(err);
        }
        if *credentials == Credentials::None && self.inner.require_credentials.load(Ordering::SeqCst)
        {
            return Err(TransportError::Unauthorized(
                "no credentials configured".into(),
            ));
        }

        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryConnection {
            inner: Arc::clone(&self.inner),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct InMemoryConnection {
    inner: Arc<Inner>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn lease_renewer(
        &self,
        max_duration: Duration,
    ) -> Result<Arc<dyn LeaseRenewer>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("connection".into()));
        }
        let id = self.inner.renewers.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state().lifecycle.push(Lifecycle::RenewerOpened(id));
        Ok(Arc::new(InMemoryLeaseRenewer {
            inner: Arc::clone(&self.inner),
            id,
            max_duration,
        }))
    }

    async fn open_receiver(
        &self,
        target: &ReceiverTarget,
        renewer: Arc<dyn LeaseRenewer>,
    ) -> Result<Arc<dyn Receiver>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("connection".into()));
        }
        {
            let mut state = self.inner.state();
            if let Some(err) = state.fail_open_receiver.take() {
                return Err(err);
            }
            state.subscription(target);
            state.lifecycle.push(Lifecycle::ReceiverOpened(target.clone()));
        }
        Ok(Arc::new(InMemoryReceiver {
            inner: Arc::clone(&self.inner),
            connection_closed: Arc::clone(&self.closed),
            target: target.clone(),
            _renewer: renewer,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Closed("connection already closed".into()));
        }
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Locks never expire in memory, so renewing is a no-op.
struct InMemoryLeaseRenewer {
    inner: Arc<Inner>,
    id: usize,
    max_duration: Duration,
}

#[async_trait]
impl LeaseRenewer for InMemoryLeaseRenewer {
    fn max_duration(&self) -> Duration {
        self.max_duration
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner
            .state()
            .lifecycle
            .push(Lifecycle::RenewerClosed(self.id));
        Ok(())
    }
}

struct InMemoryReceiver {
    inner: Arc<Inner>,
    connection_closed: Arc<AtomicBool>,
    target: ReceiverTarget,
    _renewer: Arc<dyn LeaseRenewer>,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(format!("receiver {}", self.target)));
        }
        if self.connection_closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("connection".into()));
        }
        Ok(())
    }

    fn settle(
        &self,
        message: &Message,
        op: Operation,
        apply: impl FnOnce(&mut SubscriptionState, Message, u32),
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let max_delivery_count = self.inner.max_delivery_count();
        let mut state = self.inner.state();
        let sub = state.subscription(&self.target);
        let locked = sub
            .locked
            .remove(&message.id)
            .ok_or_else(|| TransportError::Settle {
                message_id: message.id.clone(),
                reason: "message lock lost".into(),
            })?;
        sub.journal.push(op);
        apply(sub, locked, max_delivery_count);
        Ok(())
    }
}

#[async_trait]
impl Receiver for InMemoryReceiver {
    async fn receive_batch(
        &self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Message>, TransportError> {
        let deadline = Instant::now() + max_wait;

        loop {
            self.ensure_open()?;
            {
                let mut state = self.inner.state();
                let sub = state.subscription(&self.target);

                if let Some(err) = sub.injected_failures.pop_front() {
                    return Err(err);
                }
                if let Some(reason) = sub.lost_lease.take() {
                    let expired: Vec<Message> = sub.locked.drain().map(|(_, m)| m).collect();
                    sub.available.extend(expired);
                    return Err(TransportError::LeaseRenewal(reason));
                }

                let take = max_count.min(sub.available.len());
                if take > 0 || Instant::now() >= deadline {
                    let mut batch = Vec::with_capacity(take);
                    for mut message in sub.available.drain(..take) {
                        message.delivery_count += 1;
                        sub.locked.insert(message.id.clone(), message.clone());
                        batch.push(message);
                    }
                    sub.journal.push(Operation::Receive { count: batch.len() });
                    return Ok(batch);
                }
            }

            // Small sleep to avoid busy-waiting
            tokio::time::sleep(POLL_INTERVAL.min(max_wait)).await;
        }
    }

    async fn ack(&self, message: &Message) -> Result<(), TransportError> {
        self.settle(message, Operation::Ack(message.id.clone()), |sub, locked, _| {
            sub.completed.push(locked.id);
        })
    }

    async fn abandon(&self, message: &Message) -> Result<(), TransportError> {
        self.settle(
            message,
            Operation::Abandon(message.id.clone()),
            |sub, locked, max_delivery_count| {
                if locked.delivery_count >= max_delivery_count {
                    sub.dead_lettered
                        .push((locked, "MaxDeliveryCountExceeded".to_string()));
                } else {
                    sub.available.push_back(locked);
                }
            },
        )
    }

    async fn reject(&self, message: &Message, reason: &str) -> Result<(), TransportError> {
        self.settle(
            message,
            Operation::Reject {
                id: message.id.clone(),
                reason: reason.to_string(),
            },
            |sub, locked, _| {
                sub.dead_lettered.push((locked, reason.to_string()));
            },
        )
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.inner
            .state()
            .lifecycle
            .push(Lifecycle::ReceiverClosed(self.target.clone()));
        Ok(())
    }
}
