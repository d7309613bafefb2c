//! Daemon wiring for workmgrd.
//!
//! Builds the AMQP broker from the configuration, converts SIGINT and SIGTERM
//! into the publish loop's shutdown signal and runs the loop to completion.

use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

use crate::amqp::AmqpBroker;
use crate::config::Config;
use crate::publish_loop::{LoopStats, PublishLoop, TokioTimer};

/// Start the daemon with the provided configuration.
///
/// Returns once a termination signal has been received and the loop has
/// finished its current wait.
///
/// # Errors
///
/// Fails before any cycle runs if the connection string is not a valid AMQP
/// URI. Broker failures at run time are retried and never returned.
pub async fn run(config: Config) -> anyhow::Result<LoopStats> {
    let broker = AmqpBroker::new(&config.connection_string)?;
    tracing::info!(
        broker = %broker.endpoint(),
        work_queue = %config.work_queue,
        status_queue = %config.status_queue,
        "Broker configured"
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    forward_termination_signals(shutdown_tx);

    let publish_loop = PublishLoop::new(Arc::new(config), broker, TokioTimer);
    Ok(publish_loop.run(shutdown_rx).await)
}

/// Convert SIGINT and SIGTERM into a shutdown signal.
fn forward_termination_signals(shutdown_tx: watch::Sender<()>) {
    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGINT handler");
                let _ = shutdown_tx.send(());
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                let _ = shutdown_tx.send(());
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
        let _ = shutdown_tx.send(());
    });
}
