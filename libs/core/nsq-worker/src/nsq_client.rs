//! [`ConsumerClient`] backed by the `tokio-nsq` crate.
//!
//! One dispatch task owns the `tokio-nsq` consumer and fans deliveries out to
//! at most `concurrency` handler tasks. Lookupd addresses and the in-flight
//! ceiling live in a watch channel; whenever either changes the dispatch task
//! rebuilds the consumer with the new settings. A ceiling of 0 drops the
//! consumer entirely, which pauses delivery. Handler tasks are drained before
//! a consumer is dropped, so stopping waits for in-flight messages.

use crate::client::{ConsumerClient, DeliveredMessage, MessageHandler};
use crate::config::{
    exceeds_max_attempts, validate_channel_name, validate_topic_name, ConsumerConfig,
};
use crate::error::NsqError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use ::tokio_nsq::{
    NSQChannel, NSQConsumer, NSQConsumerConfig, NSQConsumerConfigSources,
    NSQConsumerLookupConfig, NSQMessage, NSQRequeueDelay, NSQTopic,
};
use tracing::{debug, info, warn};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Message delivered by [`TokioNsqConsumer`].
pub struct NsqMessage(NSQMessage);

#[async_trait]
impl DeliveredMessage for NsqMessage {
    fn body(&self) -> &[u8] {
        &self.0.body
    }

    fn attempts(&self) -> u16 {
        self.0.attempt
    }

    async fn finish(self) {
        self.0.finish().await;
    }

    async fn requeue_without_backoff(self, delay: Duration) {
        self.0.requeue(NSQRequeueDelay::CustomDelay(delay)).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    addresses: HashSet<String>,
    max_in_flight: u32,
}

impl Settings {
    /// A consumer is only built with somewhere to look and room to receive.
    fn is_active(&self) -> bool {
        self.max_in_flight > 0 && !self.addresses.is_empty()
    }
}

#[derive(Default)]
struct Registration {
    dispatcher: Option<JoinHandle<()>>,
}

/// NSQ consumer discovering producers through nsqlookupd.
pub struct TokioNsqConsumer {
    topic: Arc<NSQTopic>,
    channel: Arc<NSQChannel>,
    config: ConsumerConfig,
    http: reqwest::Client,
    settings: watch::Sender<Settings>,
    shutdown: watch::Sender<bool>,
    registration: Mutex<Registration>,
}

impl TokioNsqConsumer {
    fn registration(&self) -> MutexGuard<'_, Registration> {
        self.registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn ping(&self, address: &str) -> Result<(), NsqError> {
        let url = format!("{}/ping", address.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(NsqError::lookupd)?;

        if !response.status().is_success() {
            return Err(NsqError::Lookupd(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Prefix `http://` when the address carries no scheme.
fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

#[async_trait]
impl ConsumerClient for TokioNsqConsumer {
    type Message = NsqMessage;

    fn create(topic: &str, channel: &str, config: ConsumerConfig) -> Result<Self, NsqError> {
        validate_topic_name(topic)?;
        validate_channel_name(channel)?;

        let nsq_topic =
            NSQTopic::new(topic).ok_or_else(|| NsqError::InvalidTopic(topic.to_string()))?;
        let nsq_channel =
            NSQChannel::new(channel).ok_or_else(|| NsqError::InvalidChannel(channel.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .map_err(|e| NsqError::Config(e.to_string()))?;

        let (settings, _) = watch::channel(Settings {
            addresses: HashSet::new(),
            max_in_flight: config.max_in_flight,
        });
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            topic: nsq_topic,
            channel: nsq_channel,
            config,
            http,
            settings,
            shutdown,
            registration: Mutex::new(Registration::default()),
        })
    }

    fn add_concurrent_handlers(
        &self,
        handler: Arc<dyn MessageHandler<NsqMessage>>,
        concurrency: usize,
    ) -> Result<(), NsqError> {
        if self.is_stopped() {
            return Err(NsqError::Stopped);
        }
        if !self.settings.borrow().addresses.is_empty() {
            return Err(NsqError::AlreadyConnected);
        }

        let mut registration = self.registration();
        if registration.dispatcher.is_some() {
            return Err(NsqError::Config(
                "handlers are already registered".to_string(),
            ));
        }

        let dispatcher = Dispatcher {
            topic: self.topic.clone(),
            channel: self.channel.clone(),
            max_attempts: self.config.max_attempts,
            handler,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
        };
        registration.dispatcher = Some(tokio::spawn(
            dispatcher.run(self.settings.subscribe(), self.shutdown.subscribe()),
        ));
        Ok(())
    }

    async fn connect_to_lookupd(&self, address: &str) -> Result<(), NsqError> {
        if self.is_stopped() {
            return Err(NsqError::Stopped);
        }
        if self.registration().dispatcher.is_none() {
            return Err(NsqError::NoHandlers);
        }

        let address = normalize_address(address);
        if self.settings.borrow().addresses.contains(&address) {
            return Ok(());
        }

        self.ping(&address).await?;

        self.settings
            .send_if_modified(|settings| settings.addresses.insert(address.clone()));
        info!(lookupd = %address, "Connected to nsqlookupd");
        Ok(())
    }

    async fn change_max_in_flight(&self, max_in_flight: u32) {
        self.settings.send_if_modified(|settings| {
            let changed = settings.max_in_flight != max_in_flight;
            settings.max_in_flight = max_in_flight;
            changed
        });
    }

    async fn stop(&self) {
        self.shutdown.send_replace(true);

        let dispatcher = self.registration().dispatcher.take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "NSQ dispatch task failed");
            }
        }
    }
}

enum Event {
    Message(Option<NSQMessage>),
    Reconfigure,
    Shutdown,
}

struct Dispatcher {
    topic: Arc<NSQTopic>,
    channel: Arc<NSQChannel>,
    max_attempts: u16,
    handler: Arc<dyn MessageHandler<NsqMessage>>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    fn build(&self, settings: &Settings) -> Option<NSQConsumer> {
        if !settings.is_active() {
            return None;
        }

        let consumer = NSQConsumerConfig::new(self.topic.clone(), self.channel.clone())
            .set_max_in_flight(settings.max_in_flight)
            .set_sources(NSQConsumerConfigSources::Lookup(
                NSQConsumerLookupConfig::new().set_addresses(settings.addresses.clone()),
            ))
            .build();
        Some(consumer)
    }

    async fn run(mut self, mut settings: watch::Receiver<Settings>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let current = settings.borrow_and_update().clone();
            let mut consumer = self.build(&current);
            debug!(
                lookupd = current.addresses.len(),
                max_in_flight = current.max_in_flight,
                active = consumer.is_some(),
                "NSQ consumer configured"
            );

            loop {
                let event = tokio::select! {
                    _ = shutdown.wait_for(|stopped| *stopped) => Event::Shutdown,
                    changed = settings.changed() => match changed {
                        Ok(()) => Event::Reconfigure,
                        Err(_) => Event::Shutdown,
                    },
                    message = next_message(&mut consumer) => Event::Message(message),
                };

                match event {
                    Event::Shutdown => {
                        self.drain().await;
                        return;
                    }
                    Event::Reconfigure => {
                        self.drain().await;
                        break;
                    }
                    Event::Message(Some(message)) => self.dispatch(message).await,
                    Event::Message(None) => {
                        warn!("NSQ consumer closed, waiting for new settings");
                        consumer = None;
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, message: NSQMessage) {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return;
        };
        while let Some(result) = self.tasks.try_join_next() {
            log_task_failure(result);
        }

        if exceeds_max_attempts(message.attempt, self.max_attempts) {
            warn!(
                attempts = message.attempt,
                max_attempts = self.max_attempts,
                "Message exceeded max attempts, giving up"
            );
            message.finish().await;
            return;
        }

        let handler = self.handler.clone();
        self.tasks.spawn(async move {
            if let Err(e) = handler.handle_message(NsqMessage(message)).await {
                debug!(error = %e, "Handler returned error");
            }
            drop(permit);
        });
    }

    /// Wait for every running handler task.
    async fn drain(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            log_task_failure(result);
        }
    }
}

fn log_task_failure(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "NSQ handler task failed");
    }
}

async fn next_message(consumer: &mut Option<NSQConsumer>) -> Option<NSQMessage> {
    match consumer {
        Some(consumer) => consumer.consume_filtered().await,
        None => std::future::pending().await,
    }
}
