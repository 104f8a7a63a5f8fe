//! The runtime projection of a binding: a queue, a harness task, and the
//! ingress handle that feeds the queue. Owned exclusively by the
//! reconciler (§5 shared-resource policy) once created.

use tokio::task::JoinHandle;

use crate::error::BrokerError;
use crate::socket_ingress::IngressHandle;
use crate::transport::SubscriptionHandle;

pub enum IngressKind {
    Bus(SubscriptionHandle),
    Socket(IngressHandle),
}

pub struct WorkerHandle {
    pub input_subject: String,
    ingress: IngressKind,
    harness_task: JoinHandle<Result<(), BrokerError>>,
}

impl WorkerHandle {
    pub fn new(
        input_subject: String,
        ingress: IngressKind,
        harness_task: JoinHandle<Result<(), BrokerError>>,
    ) -> Self {
        Self {
            input_subject,
            ingress,
            harness_task,
        }
    }

    /// Tears the worker down: cancels the ingress handle first (so no new
    /// writer can race the queue close), then drops it (which, once the
    /// ingress task and every connection task it spawned unwind, drops the
    /// last queue sender and closes the queue — the harness loop's sole
    /// shutdown signal, per §5), then waits for the harness task to exit,
    /// bounded by `grace`. Returns the non-cancel error observed, if any,
    /// so callers winding down the whole process can surface it.
    pub async fn shutdown(self, grace: std::time::Duration) -> Result<(), BrokerError> {
        let WorkerHandle {
            input_subject,
            ingress,
            harness_task,
        } = self;

        drop(ingress);

        match tokio::time::timeout(grace, harness_task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                tracing::warn!(%input_subject, error = %e, "harness task exited with an error during shutdown");
                Err(BrokerError::Shutdown(format!(
                    "worker {input_subject} exited with an error: {e}"
                )))
            }
            Ok(Err(e)) => {
                tracing::warn!(%input_subject, error = %e, "harness task panicked during shutdown");
                Err(BrokerError::Shutdown(format!(
                    "worker {input_subject} panicked: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!(%input_subject, "harness task did not exit within the shutdown grace period");
                Err(BrokerError::Shutdown(format!(
                    "worker {input_subject} did not exit within the shutdown grace period"
                )))
            }
        }
    }
}
