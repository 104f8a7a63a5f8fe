//! Transport Adapter (C3): subscribe/publish on named subjects.
//!
//! `Transport` is a trait rather than a concrete `async_nats::Client`
//! wrapper so that the reconciler and harness can be exercised in tests
//! against an in-memory double, the way `wagi`'s `lib.rs` tests build the
//! production `RoutingTable` against fixture data instead of live infra.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::BrokerError;

/// Owning-handle for a subscription. Dropping it stops further delivery
/// promptly (best-effort), per §4.3.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Subscribes to `subject`; every inbound payload is sent to `tx`.
    /// Ordering is preserved per subject; no ordering across subjects.
    async fn subscribe(
        &self,
        subject: &str,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<SubscriptionHandle, BrokerError>;

    /// Publishes `data` on `subject`. Safe to call concurrently from
    /// multiple workers.
    async fn publish(&self, subject: &str, data: Vec<u8>) -> Result<(), BrokerError>;
}

/// Production [`Transport`] backed by NATS connections. The subscriber and
/// publisher sides are kept as distinct connections (mirroring
/// `original_source/cmd/root.go`'s separate `nats-sub-url`/`nats-pub-url`
/// flags), since operators may route inbound and outbound traffic through
/// different clusters or credentials.
#[derive(Clone)]
pub struct NatsTransport {
    sub_client: async_nats::Client,
    pub_client: async_nats::Client,
    /// Prepended to every subject published, as in `{prefix}.solana`
    /// (`original_source/cmd/root.go`'s `--prefix` flag). Empty by default.
    publish_prefix: String,
}

impl NatsTransport {
    pub fn new(sub_client: async_nats::Client, pub_client: async_nats::Client) -> Self {
        Self {
            sub_client,
            pub_client,
            publish_prefix: String::new(),
        }
    }

    pub fn with_publish_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.publish_prefix = prefix.into();
        self
    }

    fn prefixed(&self, subject: &str) -> String {
        apply_prefix(&self.publish_prefix, subject)
    }
}

fn apply_prefix(prefix: &str, subject: &str) -> String {
    if prefix.is_empty() {
        subject.to_owned()
    } else {
        format!("{prefix}.{subject}")
    }
}

#[async_trait]
impl Transport for NatsTransport {
    #[tracing::instrument(level = "info", skip(self, tx))]
    async fn subscribe(
        &self,
        subject: &str,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<SubscriptionHandle, BrokerError> {
        use futures::StreamExt;

        let mut subscriber =
            self.sub_client
                .subscribe(subject.to_owned())
                .await
                .map_err(|e| BrokerError::Subscribe {
                    input_subject: subject.to_owned(),
                    subject: subject.to_owned(),
                    source: e.into(),
                })?;

        let subject_owned = subject.to_owned();
        let task = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                // A full queue applies back-pressure all the way to the
                // bus, per §5; `send` suspends until there is room.
                if tx.send(message.payload.to_vec()).await.is_err() {
                    break;
                }
            }
            tracing::debug!(subject = %subject_owned, "subscription ended");
        });

        Ok(SubscriptionHandle::new(task))
    }

    #[tracing::instrument(level = "debug", skip(self, data))]
    async fn publish(&self, subject: &str, data: Vec<u8>) -> Result<(), BrokerError> {
        let subject = self.prefixed(subject);
        self.pub_client
            .publish(subject.clone(), data.into())
            .await
            .map_err(|e| BrokerError::Publish {
                subject,
                source: e.into(),
            })
    }
}
