//! NSQ consumer adapter for `messaging` handlers.
//!
//! Each [`NsqWorker`] binds one [`Subscription`](messaging::Subscription) to an
//! NSQ topic/channel, discovers producers through nsqlookupd and keeps trying
//! to reach lookupd until it is stopped.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌─────────────┐    ┌────────────┐    ┌───────────┐
//! │  nsqlookupd  │───▶│ Consumer    │───▶│ Middleware │───▶│  Handler  │
//! │  (discovery) │    │ (client)    │    │ finish /   │    │ (yours)   │
//! └──────────────┘    └─────────────┘    │ requeue 1m │    └───────────┘
//!        ▲                               └────────────┘
//!        │ connect loop (retry budget, reconnect interval)
//! ┌──────────────┐
//! │  NsqWorker   │
//! └──────────────┘
//! ```
//!
//! # Backends
//!
//! The worker talks to NSQ through the [`ConsumerClient`] trait.
//!
//! - [`InMemoryConsumer`]: in-process queue for local runs and tests
//! - `TokioNsqConsumer`: real NSQ via `tokio-nsq` (feature `tokio-nsq`)
//!
//! # Example
//!
//! ```rust,ignore
//! use core_config::NsqConfig;
//! use messaging::{handler_fn, Subscription};
//! use nsq_worker::{InMemoryConsumer, NsqWorker};
//!
//! let config = NsqConfig::new("http://nsqlookupd:4161").with_retry(3);
//! let handler = Arc::new(handler_fn("audit", |msg| async move {
//!     tracing::info!(bytes = msg.body.len(), "audit event");
//!     Ok(())
//! }));
//! let subscription = Subscription::new("events", "audit", handler.clone());
//!
//! let worker = NsqWorker::<InMemoryConsumer>::new(&config, &subscription)?;
//! worker.consume(handler).await?;
//! ```

mod client;
mod config;
mod error;
pub mod memory;
pub mod metrics;
mod middleware;
#[cfg(feature = "tokio-nsq")]
mod nsq_client;
mod retry;
mod worker;

pub use client::{ConsumerClient, DeliveredMessage, MessageHandler};
pub use config::{is_valid_name, validate_channel_name, validate_topic_name, ConsumerConfig};
pub use error::NsqError;
pub use memory::{InMemoryConsumer, InMemoryMessage, Outcome};
pub use metrics::NsqMetrics;
pub use middleware::{Middleware, REQUEUE_DELAY};
#[cfg(feature = "tokio-nsq")]
pub use nsq_client::{NsqMessage, TokioNsqConsumer};
pub use retry::{ConnectRetry, RetryDecision};
pub use worker::{normalize_concurrency, NsqWorker, WorkerState};

// Re-export from messaging
pub use messaging::{Handler, Message, ProcessingError, Subscription};
