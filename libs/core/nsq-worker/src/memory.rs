//! In-process [`ConsumerClient`] for local development and tests.
//!
//! Behaves like an NSQ consumer from the worker's point of view: handlers run
//! on `concurrency` tasks, nothing is delivered before a lookupd connection,
//! a max-in-flight of 0 pauses delivery, requeued messages come back after
//! their delay with one more attempt, and messages past `max_attempts` are
//! finished without reaching the handler. Connection failures can be
//! scripted with [`InMemoryConsumer::fail_next_connects`].

use crate::client::{ConsumerClient, DeliveredMessage, MessageHandler};
use crate::config::{
    exceeds_max_attempts, validate_channel_name, validate_topic_name, ConsumerConfig,
};
use crate::error::NsqError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What happened to a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finished { id: u64, attempts: u16 },
    Requeued { id: u64, attempts: u16, delay: Duration },
    GaveUp { id: u64, attempts: u16 },
}

#[derive(Debug, Clone, Copy)]
struct Gate {
    connected: bool,
    max_in_flight: u32,
    stopped: bool,
}

impl Gate {
    fn is_open(&self) -> bool {
        self.connected && self.max_in_flight > 0 && !self.stopped
    }
}

#[derive(Default)]
struct State {
    handlers_added: bool,
    lookupd: Vec<String>,
    connect_attempts: usize,
    scripted_failures: VecDeque<String>,
    max_in_flight_changes: Vec<u32>,
    outcomes: Vec<Outcome>,
    workers: Vec<JoinHandle<()>>,
}

struct Inner {
    topic: String,
    channel: String,
    config: ConsumerConfig,
    queue_tx: mpsc::UnboundedSender<InMemoryMessage>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InMemoryMessage>>,
    gate: watch::Sender<Gate>,
    recorded: watch::Sender<usize>,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, outcome: Outcome) {
        let count = {
            let mut state = self.state();
            state.outcomes.push(outcome);
            state.outcomes.len()
        };
        self.recorded.send_replace(count);
    }

    fn is_stopped(&self) -> bool {
        self.gate.borrow().stopped
    }

    fn enqueue(self: &Arc<Self>, id: u64, body: Vec<u8>, attempts: u16) {
        let message = InMemoryMessage {
            id,
            body,
            attempts,
            consumer: Arc::downgrade(self),
        };
        // the receiver lives as long as `self`
        let _ = self.queue_tx.send(message);
    }
}

/// Message delivered by [`InMemoryConsumer`].
pub struct InMemoryMessage {
    id: u64,
    body: Vec<u8>,
    attempts: u16,
    consumer: Weak<Inner>,
}

#[async_trait]
impl DeliveredMessage for InMemoryMessage {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn attempts(&self) -> u16 {
        self.attempts
    }

    async fn finish(self) {
        if let Some(inner) = self.consumer.upgrade() {
            inner.record(Outcome::Finished {
                id: self.id,
                attempts: self.attempts,
            });
        }
    }

    async fn requeue_without_backoff(self, delay: Duration) {
        let Some(inner) = self.consumer.upgrade() else {
            return;
        };

        inner.record(Outcome::Requeued {
            id: self.id,
            attempts: self.attempts,
            delay,
        });

        let id = self.id;
        let attempts = self.attempts.saturating_add(1);
        let body = self.body;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.is_stopped() {
                inner.enqueue(id, body, attempts);
            }
        });
    }
}

/// In-process consumer. Cloning yields another handle to the same consumer.
#[derive(Clone)]
pub struct InMemoryConsumer {
    inner: Arc<Inner>,
}

impl InMemoryConsumer {
    /// Enqueue a message for delivery. Returns its id.
    pub fn publish(&self, body: impl Into<Vec<u8>>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.enqueue(id, body.into(), 1);
        id
    }

    /// Make the next `count` lookupd connections fail with `reason`.
    pub fn fail_next_connects(&self, count: usize, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.inner.state();
        state
            .scripted_failures
            .extend(std::iter::repeat(reason).take(count));
    }

    /// Outcomes recorded so far, in order.
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.inner.state().outcomes.clone()
    }

    /// Wait until at least `count` outcomes are recorded.
    pub async fn wait_for_outcomes(&self, count: usize) -> Vec<Outcome> {
        let mut recorded = self.inner.recorded.subscribe();
        // the sender lives as long as `self`
        let _ = recorded.wait_for(|n| *n >= count).await;
        self.outcomes()
    }

    /// Lookupd connection attempts, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.inner.state().connect_attempts
    }

    /// Lookupd addresses successfully added.
    pub fn lookupd_addresses(&self) -> Vec<String> {
        self.inner.state().lookupd.clone()
    }

    /// Current in-flight ceiling.
    pub fn max_in_flight(&self) -> u32 {
        self.inner.gate.borrow().max_in_flight
    }

    /// Every value passed to `change_max_in_flight`, in order.
    pub fn max_in_flight_changes(&self) -> Vec<u32> {
        self.inner.state().max_in_flight_changes.clone()
    }

    /// Number of handler tasks registered.
    pub fn handler_tasks(&self) -> usize {
        self.inner.state().workers.len()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.gate.borrow().connected
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }
}

#[async_trait]
impl ConsumerClient for InMemoryConsumer {
    type Message = InMemoryMessage;

    fn create(topic: &str, channel: &str, config: ConsumerConfig) -> Result<Self, NsqError> {
        validate_topic_name(topic)?;
        validate_channel_name(channel)?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (gate, _) = watch::channel(Gate {
            connected: false,
            max_in_flight: config.max_in_flight,
            stopped: false,
        });
        let (recorded, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(Inner {
                topic: topic.to_string(),
                channel: channel.to_string(),
                config,
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                gate,
                recorded,
                next_id: AtomicU64::new(0),
                state: Mutex::new(State::default()),
            }),
        })
    }

    fn add_concurrent_handlers(
        &self,
        handler: Arc<dyn MessageHandler<InMemoryMessage>>,
        concurrency: usize,
    ) -> Result<(), NsqError> {
        let gate = *self.inner.gate.borrow();
        if gate.stopped {
            return Err(NsqError::Stopped);
        }
        if gate.connected {
            return Err(NsqError::AlreadyConnected);
        }

        let mut state = self.inner.state();
        state.handlers_added = true;
        for _ in 0..concurrency {
            let task = tokio::spawn(run_handler(self.inner.clone(), handler.clone()));
            state.workers.push(task);
        }

        debug!(
            topic = %self.inner.topic,
            channel = %self.inner.channel,
            concurrency,
            "In-memory handlers registered"
        );
        Ok(())
    }

    async fn connect_to_lookupd(&self, address: &str) -> Result<(), NsqError> {
        {
            let mut state = self.inner.state();
            state.connect_attempts += 1;

            if self.inner.is_stopped() {
                return Err(NsqError::Stopped);
            }
            if !state.handlers_added {
                return Err(NsqError::NoHandlers);
            }
            if let Some(reason) = state.scripted_failures.pop_front() {
                return Err(NsqError::Lookupd(reason));
            }
            if !state.lookupd.iter().any(|known| known == address) {
                state.lookupd.push(address.to_string());
            }
        }

        self.inner.gate.send_if_modified(|gate| {
            let changed = !gate.connected;
            gate.connected = true;
            changed
        });
        Ok(())
    }

    async fn change_max_in_flight(&self, max_in_flight: u32) {
        self.inner.state().max_in_flight_changes.push(max_in_flight);
        self.inner.gate.send_modify(|gate| gate.max_in_flight = max_in_flight);
    }

    async fn stop(&self) {
        self.inner.gate.send_modify(|gate| gate.stopped = true);

        let workers = std::mem::take(&mut self.inner.state().workers);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "In-memory handler task failed");
            }
        }
    }
}

enum Received {
    Message(InMemoryMessage),
    GateChanged,
    Closed,
}

/// Wait until delivery is allowed. Returns false once the consumer stops.
async fn wait_until_open(gate: &mut watch::Receiver<Gate>) -> bool {
    loop {
        let current = *gate.borrow_and_update();
        if current.stopped {
            return false;
        }
        if current.is_open() {
            return true;
        }
        if gate.changed().await.is_err() {
            return false;
        }
    }
}

async fn run_handler(inner: Arc<Inner>, handler: Arc<dyn MessageHandler<InMemoryMessage>>) {
    let mut gate = inner.gate.subscribe();

    loop {
        if !wait_until_open(&mut gate).await {
            break;
        }

        let received = {
            let mut queue = inner.queue_rx.lock().await;
            tokio::select! {
                biased;
                _ = gate.changed() => Received::GateChanged,
                message = queue.recv() => match message {
                    Some(message) => Received::Message(message),
                    None => Received::Closed,
                },
            }
        };

        let message = match received {
            Received::Message(message) => message,
            Received::GateChanged => continue,
            Received::Closed => break,
        };

        let max_attempts = inner.config.max_attempts;
        if exceeds_max_attempts(message.attempts, max_attempts) {
            warn!(
                id = message.id,
                attempts = message.attempts,
                max_attempts,
                "Message exceeded max attempts, giving up"
            );
            inner.record(Outcome::GaveUp {
                id: message.id,
                attempts: message.attempts,
            });
            continue;
        }

        if let Err(e) = handler.handle_message(message).await {
            debug!(error = %e, "Handler returned error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::ProcessingError;
    use std::sync::atomic::AtomicUsize;

    struct Acker;

    #[async_trait]
    impl MessageHandler<InMemoryMessage> for Acker {
        async fn handle_message(&self, message: InMemoryMessage) -> Result<(), ProcessingError> {
            message.finish().await;
            Ok(())
        }
    }

    struct Requeuer {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler<InMemoryMessage> for Requeuer {
        async fn handle_message(&self, message: InMemoryMessage) -> Result<(), ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            message.requeue_without_backoff(self.delay).await;
            Err(ProcessingError::failed("nope"))
        }
    }

    fn consumer(max_attempts: u16) -> InMemoryConsumer {
        InMemoryConsumer::create(
            "orders",
            "billing",
            ConsumerConfig {
                max_attempts,
                max_in_flight: 10,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_rejects_invalid_names() {
        let config = ConsumerConfig::default();
        assert!(matches!(
            InMemoryConsumer::create("bad topic", "billing", config.clone()),
            Err(NsqError::InvalidTopic(_))
        ));
        assert!(matches!(
            InMemoryConsumer::create("orders", "", config),
            Err(NsqError::InvalidChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_requires_handlers() {
        let consumer = consumer(5);
        let err = consumer.connect_to_lookupd("http://lookupd:4161").await.unwrap_err();
        assert!(matches!(err, NsqError::NoHandlers));
        assert_eq!(consumer.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_per_address() {
        let consumer = consumer(5);
        consumer.add_concurrent_handlers(Arc::new(Acker), 1).unwrap();

        consumer.connect_to_lookupd("http://a:4161").await.unwrap();
        consumer.connect_to_lookupd("http://a:4161").await.unwrap();
        consumer.connect_to_lookupd("http://b:4161").await.unwrap();

        assert_eq!(
            consumer.lookupd_addresses(),
            vec!["http://a:4161".to_string(), "http://b:4161".to_string()]
        );
        assert_eq!(consumer.connect_attempts(), 3);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let consumer = consumer(5);
        consumer.add_concurrent_handlers(Arc::new(Acker), 1).unwrap();
        consumer.fail_next_connects(2, "connection refused");

        for _ in 0..2 {
            let err = consumer.connect_to_lookupd("http://a:4161").await.unwrap_err();
            assert!(err.is_transient());
        }
        consumer.connect_to_lookupd("http://a:4161").await.unwrap();
        assert!(consumer.is_connected());
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_handlers_rejected_after_connect() {
        let consumer = consumer(5);
        consumer.add_concurrent_handlers(Arc::new(Acker), 1).unwrap();
        consumer.connect_to_lookupd("http://a:4161").await.unwrap();

        let err = consumer
            .add_concurrent_handlers(Arc::new(Acker), 1)
            .unwrap_err();
        assert!(matches!(err, NsqError::AlreadyConnected));
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_nothing_delivered_before_connect() {
        let consumer = consumer(5);
        consumer.add_concurrent_handlers(Arc::new(Acker), 2).unwrap();
        assert_eq!(consumer.handler_tasks(), 2);

        let id = consumer.publish("early");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(consumer.outcomes().is_empty());

        consumer.connect_to_lookupd("http://a:4161").await.unwrap();
        let outcomes = consumer.wait_for_outcomes(1).await;
        assert_eq!(outcomes, vec![Outcome::Finished { id, attempts: 1 }]);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_zero_max_in_flight_pauses_delivery() {
        let consumer = consumer(5);
        consumer.add_concurrent_handlers(Arc::new(Acker), 1).unwrap();
        consumer.connect_to_lookupd("http://a:4161").await.unwrap();

        consumer.change_max_in_flight(0).await;
        consumer.publish("paused");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(consumer.outcomes().is_empty());

        consumer.change_max_in_flight(4).await;
        consumer.wait_for_outcomes(1).await;
        assert_eq!(consumer.max_in_flight_changes(), vec![0, 4]);
        assert_eq!(consumer.max_in_flight(), 4);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_requeue_redelivers_until_max_attempts() {
        let consumer = consumer(2);
        let requeuer = Arc::new(Requeuer {
            delay: Duration::from_millis(1),
            calls: AtomicUsize::new(0),
        });
        consumer
            .add_concurrent_handlers(requeuer.clone(), 1)
            .unwrap();
        consumer.connect_to_lookupd("http://a:4161").await.unwrap();

        let id = consumer.publish("flaky");
        let outcomes = consumer.wait_for_outcomes(3).await;

        assert_eq!(
            outcomes,
            vec![
                Outcome::Requeued { id, attempts: 1, delay: Duration::from_millis(1) },
                Outcome::Requeued { id, attempts: 2, delay: Duration::from_millis(1) },
                Outcome::GaveUp { id, attempts: 3 },
            ]
        );
        assert_eq!(requeuer.calls.load(Ordering::SeqCst), 2);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_rejects_further_connects() {
        let consumer = consumer(5);
        consumer.add_concurrent_handlers(Arc::new(Acker), 3).unwrap();
        consumer.stop().await;

        assert!(consumer.is_stopped());
        assert_eq!(consumer.handler_tasks(), 0);
        let err = consumer.connect_to_lookupd("http://a:4161").await.unwrap_err();
        assert!(matches!(err, NsqError::Stopped));
    }
}
