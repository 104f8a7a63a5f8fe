//! Reconciler (C7): periodically re-reads the config and drives add/remove/
//! replace of bindings, owning the per-binding worker lifecycles.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use wasmtime::Engine;

use crate::config::{InputKind, StreamBinding};
use crate::error::BrokerError;
use crate::module_cache::ModuleCache;
use crate::socket_ingress;
use crate::transport::Transport;
use crate::worker::{IngressKind, WorkerHandle};
use crate::{artifact, harness};

const WORKER_QUEUE_CAPACITY: usize = 100;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct ActiveWorker {
    binding: StreamBinding,
    handle: WorkerHandle,
}

pub struct Reconciler {
    config_location: String,
    reload_interval: Duration,
    transport: Arc<dyn Transport>,
    engine: Engine,
    module_cache: ModuleCache,
    active: HashMap<String, ActiveWorker>,
}

impl Reconciler {
    pub fn new(
        config_location: String,
        reload_interval: Duration,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let engine = Engine::default();
        let module_cache = ModuleCache::new(engine.clone());
        Self {
            config_location,
            reload_interval,
            transport,
            engine,
            module_cache,
            active: HashMap::new(),
        }
    }

    /// Runs the reconcile loop until `shutdown` resolves. The first tick
    /// fires immediately; subsequent ticks fire every `reload_interval`
    /// (§4.7's "initial tick" note). Returns the non-cancel errors
    /// observed while tearing every worker down at the end, for the
    /// supervisor to surface from `close()`.
    pub async fn run(mut self, shutdown: tokio_util::sync::CancellationToken) -> Vec<BrokerError> {
        let mut interval = tokio::time::interval(self.reload_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }
        self.shutdown_all().await
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn tick(&mut self) {
        let previous_snapshot: HashMap<String, StreamBinding> = self
            .active
            .iter()
            .map(|(k, w)| (k.clone(), w.binding.clone()))
            .collect();

        let loaded = match crate::config::load(&self.config_location, &previous_snapshot).await {
            Ok(bindings) => bindings,
            Err(e) => {
                tracing::warn!(error = %e, "config reload failed, keeping existing bindings until next tick");
                return;
            }
        };

        let new_keys: HashSet<String> =
            loaded.iter().map(|b| b.input_subject.clone()).collect();

        self.remove_disappeared(&new_keys).await;
        self.add_or_replace(loaded, &previous_snapshot).await;
    }

    async fn remove_disappeared(&mut self, new_keys: &HashSet<String>) {
        let stale: Vec<String> = self
            .active
            .keys()
            .filter(|k| !new_keys.contains(*k))
            .cloned()
            .collect();

        for key in stale {
            if let Some(worker) = self.active.remove(&key) {
                tracing::info!(input_subject = %key, "removing worker for binding no longer present in config");
                let _ = worker.handle.shutdown(SHUTDOWN_GRACE).await;
            }
        }
    }

    async fn add_or_replace(
        &mut self,
        loaded: Vec<StreamBinding>,
        previous_snapshot: &HashMap<String, StreamBinding>,
    ) {
        for binding in loaded {
            let key = binding.input_subject.clone();

            let needs_replace = self
                .active
                .get(&key)
                .map(|w| w.binding.requires_replacement(&binding))
                .unwrap_or(false);
            let is_new = !self.active.contains_key(&key);

            if !is_new && !needs_replace {
                continue;
            }

            let previous = previous_snapshot.get(&key);
            let mut resolved = binding.clone();
            if let Err(e) = artifact::resolve(&mut resolved, previous).await {
                tracing::warn!(input_subject = %key, error = %e, "artifact resolution failed, will retry next tick");
                continue;
            }

            match self.spawn_worker(resolved.clone()).await {
                Ok(handle) => {
                    if let Some(old) = self.active.remove(&key) {
                        tracing::info!(input_subject = %key, "replacing worker for changed binding");
                        let _ = old.handle.shutdown(SHUTDOWN_GRACE).await;
                    } else {
                        tracing::info!(input_subject = %key, "starting worker for new binding");
                    }
                    self.active.insert(
                        key,
                        ActiveWorker {
                            binding: resolved,
                            handle,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(input_subject = %key, error = %e, "failed to start worker, will retry next tick");
                }
            }
        }
    }

    async fn spawn_worker(&self, binding: StreamBinding) -> Result<WorkerHandle, BrokerError> {
        let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);

        let ingress = match binding.input_kind {
            InputKind::Bus => {
                let handle = self
                    .transport
                    .subscribe(&binding.input_subject, tx)
                    .await?;
                IngressKind::Bus(handle)
            }
            InputKind::UnixSocket => {
                let path = PathBuf::from(&binding.input_subject);
                let handle =
                    socket_ingress::listen(binding.input_subject.clone(), path, tx).await?;
                IngressKind::Socket(handle)
            }
        };

        let harness_task = tokio::spawn(harness::run(
            binding.clone(),
            self.engine.clone(),
            self.module_cache.clone(),
            rx,
            self.transport.clone(),
        ));

        Ok(WorkerHandle::new(
            binding.input_subject.clone(),
            ingress,
            harness_task,
        ))
    }

    async fn shutdown_all(&mut self) -> Vec<BrokerError> {
        let workers: Vec<ActiveWorker> = self.active.drain().map(|(_, w)| w).collect();
        let mut errors = Vec::new();
        for worker in workers {
            if let Err(e) = worker.handle.shutdown(SHUTDOWN_GRACE).await {
                errors.push(e);
            }
        }
        errors
    }
}
