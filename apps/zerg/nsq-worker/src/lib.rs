//! NSQ Worker Service
//!
//! Consumes one NSQ topic/channel and hands every message to a handler.
//!
//! ## Architecture
//!
//! ```text
//! nsqlookupd (NSQ_LOOKUPD_URL)
//!   ↓ (discovers nsqd nodes for NSQ_TOPIC)
//! NsqWorker (channel: NSQ_CHANNEL)
//!   ↓ (finish on success, requeue after 1m on failure)
//! LoggingHandler
//! ```
//!
//! ## Features
//!
//! - `nsq`: consume from a real NSQ cluster through `tokio-nsq`; without it
//!   the service runs against the in-memory client
//! - Health check endpoints for Kubernetes liveness and readiness
//! - Prometheus metrics
//! - Graceful shutdown on SIGINT/SIGTERM

pub mod config;
pub mod handlers;
pub mod health;

use crate::config::Config;
use crate::handlers::LoggingHandler;
use crate::health::{HealthServer, HealthState, SubscriptionStatus};
use core_config::{Environment, FromEnv};
use eyre::{Result, WrapErr};
use messaging::{Handler, Subscriber};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use nsq_worker::NsqWorker;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[cfg(feature = "nsq")]
type Backend = nsq_worker::TokioNsqConsumer;

#[cfg(not(feature = "nsq"))]
type Backend = nsq_worker::InMemoryConsumer;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Subsequent calls return the same handle.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder");
            info!("Prometheus metrics initialized");
            handle
        })
        .clone()
}

/// Run the NSQ worker
///
/// 1. Sets up error reports and structured logging (JSON for prod, pretty for dev)
/// 2. Loads NSQ and subscription settings from the environment
/// 3. Starts the health server and one worker per subscription
/// 4. Stops every worker on SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if configuration is missing or invalid, or if a worker
/// cannot be created.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let metrics_handle = init_metrics();

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?environment,
        "Starting NSQ worker service"
    );

    let config = Config::from_env().wrap_err("Failed to load configuration")?;

    if cfg!(not(feature = "nsq")) {
        info!("Built without the `nsq` feature, using the in-memory consumer");
    }

    let handler: Arc<dyn Handler> = Arc::new(LoggingHandler);
    let subscriptions = vec![config.subscription.subscription(handler)];

    let subscriber = Arc::new(
        Subscriber::new(subscriptions, |sub| {
            NsqWorker::<Backend>::new(&config.nsq, sub)
        })
        .wrap_err("Failed to create NSQ worker")?,
    );

    info!(
        lookupd = %config.nsq.lookupd_url,
        topic = %config.subscription.topic,
        channel = %config.subscription.channel,
        subscriptions = subscriber.len(),
        "Workers created"
    );

    let workers = subscriber.clone();
    let health_state = HealthState::new(move || {
        workers
            .workers()
            .map(|worker| SubscriptionStatus::new(worker.topic(), worker.channel(), worker.state()))
            .collect()
    });
    let health_server =
        HealthServer::new(config.health_port, health_state).with_metrics(metrics_handle);
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!(error = %e, "Health server failed");
        }
    });

    subscriber.start();

    shutdown_signal().await?;

    subscriber
        .stop()
        .await
        .wrap_err("Failed to stop NSQ workers")?;

    info!("NSQ worker service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
