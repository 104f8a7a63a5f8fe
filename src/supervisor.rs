//! Supervisor (C8): start, graceful shutdown, cancellation propagation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;
use crate::reconciler::Reconciler;
use crate::transport::Transport;

pub struct Supervisor {
    shutdown: CancellationToken,
    reconciler_task: Mutex<Option<tokio::task::JoinHandle<Vec<BrokerError>>>>,
}

impl Supervisor {
    /// Spawns the reconciler loop. `transport` is shared (cloned) across
    /// every worker the reconciler creates.
    pub fn start(
        config_location: String,
        reload_interval: Duration,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let reconciler = Reconciler::new(config_location, reload_interval, transport);

        let token = shutdown.clone();
        let reconciler_task = tokio::spawn(reconciler.run(token));

        Self {
            shutdown,
            reconciler_task: Mutex::new(Some(reconciler_task)),
        }
    }

    /// Blocks until either a shutdown signal (SIGINT/SIGTERM) arrives or
    /// `close` is called by another path, then tears everything down.
    pub async fn wait_for_shutdown_signal(&self) {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("received shutdown signal");
        }
    }

    /// Idempotent: cancels the root token and joins the reconciler task,
    /// which tears down every active worker before returning. Collects any
    /// non-cancellation error observed during wind-down into a single
    /// joined error. Calling `close` more than once is safe; the second
    /// call simply observes the task is already gone and returns `Ok(())`.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.shutdown.cancel();

        let task = self.reconciler_task.lock().await.take();
        match task {
            None => Ok(()),
            Some(task) => match task.await {
                Ok(errors) if errors.is_empty() => Ok(()),
                Ok(errors) => {
                    let joined = errors
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; ");
                    Err(BrokerError::Shutdown(joined).into())
                }
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(BrokerError::Shutdown(e.to_string()).into()),
            },
        }
    }
}
