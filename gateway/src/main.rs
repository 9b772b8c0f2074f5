//! Accounting gateway binary
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (events printed to stdout)
//! cargo run
//!
//! # Forward to an event bus with debug output
//! ACCT_PUBLISHER_URL=http://bus:8080/events ACCT_LOG_LEVEL=debug cargo run
//! ```
//!
//! ## Environment Variables
//!
//! - `ACCT_BIND_ADDR`: UDP accounting address (default: "0.0.0.0:1813")
//! - `ACCT_SHARED_SECRET`: RADIUS shared secret
//! - `ACCT_METRICS_ADDR`: Metrics server address (default: "0.0.0.0:9090")
//! - `ACCT_PUBLISHER_URL`: Event bus endpoint (default: stdout)
//! - `ACCT_DLQ_URL`: Dead-letter endpoint (default: error log)
//! - `ACCT_LOG_LEVEL`: Log level (default: "info")
//! - `ACCT_LOG_FORMAT`: "json" or "pretty"

use acct_gateway::accounting::AccountingOrchestrator;
use acct_gateway::codec::AttributeCodec;
use acct_gateway::config::{Config, LogFormat};
use acct_gateway::metrics::Metrics;
use acct_gateway::metrics_server::MetricsServer;
use acct_gateway::publish::{
    DeadLetterSink, LogDeadLetterSink, Publisher, StdoutPublisher, WebhookPublisher,
};
use acct_gateway::rate_limiter::RateLimiter;
use acct_gateway::resilience::{CircuitBreaker, Delivery, FailedMessageStore, RetryScheduler};
use acct_gateway::server::AccountingServer;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!(
        bind_addr = %config.bind_addr,
        metrics_addr = %config.metrics_addr,
        failure_threshold = config.failure_threshold,
        max_queue_size = config.max_queue_size,
        rate_limit_tps = config.rate_limit_tps,
        "Starting accounting gateway"
    );

    let metrics = Metrics::init()?;

    let publisher: Arc<dyn Publisher> = match &config.publisher_url {
        Some(url) => {
            let webhook = WebhookPublisher::new(url.as_str())?;
            info!(url = webhook.url(), "Publishing to event bus webhook");
            Arc::new(webhook)
        }
        None => {
            info!("No ACCT_PUBLISHER_URL set, publishing to stdout");
            Arc::new(StdoutPublisher::new())
        }
    };
    let dead_letter: Arc<dyn DeadLetterSink> = match &config.dlq_url {
        Some(url) => {
            let webhook = WebhookPublisher::new(url.as_str())?;
            info!(url = webhook.url(), "Dead-lettering to webhook");
            Arc::new(webhook)
        }
        None => Arc::new(LogDeadLetterSink::new()),
    };
    info!(
        publisher = publisher.name(),
        dead_letter = dead_letter.name(),
        "Delivery targets configured"
    );

    let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker()));
    let store = Arc::new(
        FailedMessageStore::new(config.max_queue_size)
            .with_size_gauge(metrics.failed_store_size.clone()),
    );
    let delivery = Arc::new(
        Delivery::new(publisher, dead_letter, breaker, store)
            .with_publish_timeout(config.publish_timeout()),
    );

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_tps,
        config.rate_limit_policy,
    ));
    let orchestrator = Arc::new(
        AccountingOrchestrator::new(
            AttributeCodec::new(config.shared_secret.clone().into_bytes()),
            limiter,
            Arc::clone(&delivery),
        )
        .with_open_circuit_ack(config.open_circuit_ack),
    );

    let retry = RetryScheduler::new(Arc::clone(&delivery), config.retry()).spawn();
    let metrics_handle = MetricsServer::start(config.metrics_addr, Arc::clone(&delivery));

    // A packet may spend one publish timeout on the bus and one on the DLQ
    let server = AccountingServer::bind(config.bind_addr, orchestrator)
        .await?
        .with_drain_timeout(config.publish_timeout() * 2);
    server.run_until(shutdown_signal()).await?;

    retry.shutdown().await;
    metrics_handle.abort();
    if let Err(e) = delivery.shutdown().await {
        tracing::error!(error = %e, "Error during publisher shutdown");
    }

    info!("Accounting gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
