//! Worker trait and the subscriber that drives a set of workers.

use crate::handler::Handler;
use crate::subscription::Subscription;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A queue backend consuming one subscription.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Backend error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Register `handler` and keep the consumer connected until stopped.
    ///
    /// Blocks the calling task; run it on its own task.
    async fn consume(&self, handler: Arc<dyn Handler>) -> Result<(), Self::Error>;

    /// Stop consuming. `consume` returns once the backend has shut down.
    async fn stop(&self) -> Result<(), Self::Error>;
}

/// Runs one worker per subscription.
///
/// # Example
///
/// ```rust,ignore
/// let subscriber = Subscriber::new(subscriptions, |sub| {
///     NsqWorker::<InMemoryConsumer>::new(&config, sub)
/// })?;
///
/// subscriber.start();
/// shutdown_signal().await;
/// subscriber.stop().await?;
/// ```
pub struct Subscriber<W: Worker> {
    workers: Vec<(Subscription, Arc<W>)>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<W: Worker> Subscriber<W> {
    /// Build a worker for every subscription.
    ///
    /// Fails on the first subscription the factory rejects.
    pub fn new<F, E>(subscriptions: Vec<Subscription>, mut factory: F) -> Result<Self, E>
    where
        F: FnMut(&Subscription) -> Result<W, E>,
    {
        let mut workers = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let worker = factory(&subscription)?;
            workers.push((subscription, Arc::new(worker)));
        }

        Ok(Self {
            workers,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Workers in subscription order.
    pub fn workers(&self) -> impl Iterator<Item = &Arc<W>> {
        self.workers.iter().map(|(_, worker)| worker)
    }

    /// Spawn `consume` for every worker on its own task.
    ///
    /// Calling `start` while tasks are already running does nothing.
    pub fn start(&self) {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !tasks.is_empty() {
            warn!("Subscriber already started");
            return;
        }

        for (subscription, worker) in &self.workers {
            let worker = worker.clone();
            let handler = subscription.handler.clone();
            let topic = subscription.topic.clone();
            let channel = subscription.name.clone();

            info!(topic = %topic, channel = %channel, "Starting subscription");

            tasks.push(tokio::spawn(async move {
                match worker.consume(handler).await {
                    Ok(()) => info!(topic = %topic, channel = %channel, "Subscription finished"),
                    Err(e) => {
                        error!(topic = %topic, channel = %channel, error = %e, "Subscription failed")
                    }
                }
            }));
        }
    }

    /// Stop every worker and wait for their tasks.
    ///
    /// All workers are stopped even if one fails; the first error is returned.
    pub async fn stop(&self) -> Result<(), W::Error> {
        let mut first_error = None;

        for (subscription, worker) in &self.workers {
            if let Err(e) = worker.stop().await {
                error!(
                    topic = %subscription.topic,
                    channel = %subscription.name,
                    error = %e,
                    "Failed to stop worker"
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        let tasks = {
            let mut guard = match self.tasks.lock() {
                Ok(tasks) => tasks,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Subscription task panicked");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoOpHandler;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Debug, thiserror::Error)]
    #[error("fake worker error: {0}")]
    struct FakeError(String);

    struct FakeWorker {
        consumed: AtomicUsize,
        stopped: AtomicBool,
        stop_signal: Notify,
    }

    impl FakeWorker {
        fn new() -> Self {
            Self {
                consumed: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
                stop_signal: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl Worker for FakeWorker {
        type Error = FakeError;

        async fn consume(&self, _handler: Arc<dyn Handler>) -> Result<(), FakeError> {
            self.consumed.fetch_add(1, Ordering::SeqCst);
            self.stop_signal.notified().await;
            Ok(())
        }

        async fn stop(&self) -> Result<(), FakeError> {
            self.stopped.store(true, Ordering::SeqCst);
            self.stop_signal.notify_one();
            Ok(())
        }
    }

    fn subscriptions(n: usize) -> Vec<Subscription> {
        (0..n)
            .map(|i| Subscription::new(format!("topic-{i}"), "channel", Arc::new(NoOpHandler)))
            .collect()
    }

    #[test]
    fn test_new_propagates_factory_error() {
        let result = Subscriber::<FakeWorker>::new(subscriptions(2), |sub| {
            if sub.topic == "topic-1" {
                Err(FakeError("rejected".to_string()))
            } else {
                Ok(FakeWorker::new())
            }
        });

        let err = result.err().expect("factory error should surface");
        assert_eq!(err.to_string(), "fake worker error: rejected");
    }

    #[tokio::test]
    async fn test_start_and_stop_all_workers() {
        let subscriber =
            Subscriber::new(subscriptions(3), |_| Ok::<_, FakeError>(FakeWorker::new())).unwrap();
        assert_eq!(subscriber.len(), 3);

        subscriber.start();
        subscriber.start();

        // let the spawned consume calls register
        for _ in 0..50 {
            if subscriber
                .workers()
                .all(|w| w.consumed.load(Ordering::SeqCst) == 1)
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        subscriber.stop().await.unwrap();

        for worker in subscriber.workers() {
            assert_eq!(worker.consumed.load(Ordering::SeqCst), 1);
            assert!(worker.stopped.load(Ordering::SeqCst));
        }
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let subscriber =
            Subscriber::new(subscriptions(1), |_| Ok::<_, FakeError>(FakeWorker::new())).unwrap();
        subscriber.stop().await.unwrap();
        assert!(subscriber
            .workers()
            .all(|w| w.stopped.load(Ordering::SeqCst)));
    }
}
