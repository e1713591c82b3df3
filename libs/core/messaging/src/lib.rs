//! Common messaging abstractions for pub/sub consumers.
//!
//! This library provides backend-agnostic traits and types for consuming
//! messages from a queue:
//! - **Message**: payload, attempt count and content type of a delivery
//! - **Handler**: what the application does with a message
//! - **Subscription**: topic/channel plus consumer tuning
//! - **Worker / Subscriber**: lifecycle of one or many consumers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────────────────┐
//! │   Your Code     │     │           Backends           │
//! │                 │     │                              │
//! │  ┌───────────┐  │     │  ┌────────────────────────┐  │
//! │  │  Handler  │──│─────│─▶│ nsq-worker (NsqWorker) │  │
//! │  └───────────┘  │     │  └────────────────────────┘  │
//! │  ┌───────────┐  │     │              ▲               │
//! │  │Subscriber │──│─────│──────────────┘               │
//! │  └───────────┘  │     │     Worker trait             │
//! └─────────────────┘     └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use messaging::{handler_fn, Message, Subscriber, Subscription};
//!
//! let handler = Arc::new(handler_fn("orders", |msg: Message| async move {
//!     let order: Order = msg.json()?;
//!     tracing::info!(id = %order.id, "order received");
//!     Ok(())
//! }));
//!
//! let subscriptions = vec![
//!     Subscription::new("orders", "billing", handler).with_concurrency(4),
//! ];
//!
//! let subscriber = Subscriber::new(subscriptions, |sub| NsqWorker::new(&config, sub))?;
//! subscriber.start();
//! ```

mod error;
mod handler;
mod message;
mod subscription;
mod worker;

pub use error::ProcessingError;
pub use handler::{handler_fn, FailingHandler, Handler, HandlerFn, NoOpHandler};
pub use message::Message;
pub use subscription::Subscription;
pub use worker::{Subscriber, Worker};

// Re-exported so implementors don't need their own dependency.
pub use async_trait::async_trait;
