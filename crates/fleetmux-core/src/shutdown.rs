//! Graceful shutdown coordination.
//!
//! Watchers subscribe to a broadcast channel and finish their current tick
//! on signal. Shutdown never interrupts a store write: cancellation is
//! cooperative and the coordinator falls back to aborting tasks only after
//! the grace period.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};

use crate::Result;

/// Shutdown signal broadcast to all watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Finish the current tick, then stop.
    Graceful,
    /// Grace period exceeded; tasks are being aborted.
    Force,
}

/// Coordinates shutdown across detector watchers and background tasks.
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    grace: Duration,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
            grace,
        }
    }

    /// Subscribe; watchers listen for the signal in their poll loops.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Register a background task to be reaped on shutdown.
    pub async fn register_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().await.push(task);
    }

    /// Broadcast graceful shutdown, wait out the grace period, then abort
    /// whatever is still running.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");
        let _ = self.shutdown_tx.send(ShutdownSignal::Graceful);

        let drained = tokio::time::timeout(self.grace, async {
            let mut tasks = self.tasks.lock().await;
            for task in tasks.drain(..) {
                let _ = task.await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!("grace period exceeded, aborting remaining tasks");
            let _ = self.shutdown_tx.send(ShutdownSignal::Force);
            let mut tasks = self.tasks.lock().await;
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        tracing::info!("shutdown complete");
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Receivers that fire when SIGINT / SIGTERM arrive.
pub async fn signal_channels() -> Result<(broadcast::Receiver<()>, broadcast::Receiver<()>)> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| crate::Error::IoError(format!("failed to install SIGINT handler: {e}")))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| crate::Error::IoError(format!("failed to install SIGTERM handler: {e}")))?;

        let (sigint_tx, sigint_rx) = broadcast::channel(1);
        let (sigterm_tx, sigterm_rx) = broadcast::channel(1);

        tokio::spawn(async move {
            let _ = sigint.recv().await;
            tracing::info!("received SIGINT");
            let _ = sigint_tx.send(());
        });
        tokio::spawn(async move {
            let _ = sigterm.recv().await;
            tracing::info!("received SIGTERM");
            let _ = sigterm_tx.send(());
        });

        Ok((sigint_rx, sigterm_rx))
    }

    #[cfg(not(unix))]
    {
        let (sigint_tx, sigint_rx) = broadcast::channel(1);
        let (sigterm_tx, sigterm_rx) = broadcast::channel(1);

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received ctrl-c");
            let _ = sigint_tx.send(());
            let _ = sigterm_tx.send(());
        });

        Ok((sigint_rx, sigterm_rx))
    }
}
