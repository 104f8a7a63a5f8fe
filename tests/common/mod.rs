//! Shared test fixtures: an in-memory `Transport` double and a few
//! hand-assembled guest modules standing in for operator-supplied Wasm.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wasm_stream_broker::error::BrokerError;
use wasm_stream_broker::transport::{SubscriptionHandle, Transport};

/// A `Transport` backed by in-process channels, so the reconciler and
/// harness can be exercised end to end without a live NATS server.
pub struct InMemoryTransport {
    inboxes: Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            inboxes: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Simulates an inbound bus message. Returns `false` if nothing is
    /// subscribed to `subject` (including a subscription that has since
    /// been torn down).
    pub async fn deliver(&self, subject: &str, data: Vec<u8>) -> bool {
        let tx = self.inboxes.lock().unwrap().get(subject).cloned();
        match tx {
            Some(tx) => tx.send(data).await.is_ok(),
            None => false,
        }
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn subscribe(
        &self,
        subject: &str,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<SubscriptionHandle, BrokerError> {
        let (relay_tx, mut relay_rx) = mpsc::channel::<Vec<u8>>(100);
        self.inboxes
            .lock()
            .unwrap()
            .insert(subject.to_owned(), relay_tx);

        // Owns the real worker-queue sender; aborting this task (which
        // happens when the returned handle is dropped) drops `tx` and
        // closes the worker's queue, exactly as `NatsTransport` does.
        let task = tokio::spawn(async move {
            while let Some(msg) = relay_rx.recv().await {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        Ok(SubscriptionHandle::new(task))
    }

    async fn publish(&self, subject: &str, data: Vec<u8>) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((subject.to_owned(), data));
        Ok(())
    }
}

/// Shared `malloc`: grows linear memory, if needed, so that the fixed
/// scratch offset (64 KiB) plus the requested size fits, then hands back
/// that offset. Real guests are expected to do the same rather than rely
/// on a pre-sized memory section; these fixtures start at a single page
/// to exercise that growth path instead of over-declaring memory upfront.
const MALLOC_THAT_GROWS_MEMORY: &str = r#"
  (func (export "malloc") (param $size i32) (result i32)
    (local $needed_pages i32)
    (local $grow_by i32)
    (local.set $needed_pages
      (i32.div_u
        (i32.add (i32.add (i32.const 65536) (local.get $size)) (i32.const 65535))
        (i32.const 65536)))
    (local.set $grow_by (i32.sub (local.get $needed_pages) (memory.size)))
    (if (i32.gt_s (local.get $grow_by) (i32.const 0))
      (then (drop (memory.grow (local.get $grow_by)))))
    i32.const 65536)
"#;

/// Minimal guest ABI: `malloc` grows memory to fit the requested scratch
/// region, `process` returns `len` unchanged, so whatever the host wrote
/// into the scratch region comes back out verbatim.
pub fn identity_wat() -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  {malloc}
  (func (export "process") (param $ptr i32) (param $len i32) (result i32)
    local.get $len))"#,
        malloc = MALLOC_THAT_GROWS_MEMORY
    )
}

/// Ignores its input and always emits a fixed segment-array payload, to
/// exercise the publisher's fan-out path end to end.
pub fn segmenting_wat() -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  (data (i32.const 0) "[{{\"suffix\":\"x\",\"data\":\"1\"}},{{\"suffix\":\"y\",\"data\":\"2\"}}]")
  {malloc}
  (func (export "process") (param $ptr i32) (param $len i32) (result i32)
    (memory.copy (local.get $ptr) (i32.const 0) (i32.const 53))
    i32.const 53))"#,
        malloc = MALLOC_THAT_GROWS_MEMORY
    )
}

/// Always reports "nothing to publish".
pub fn dropping_wat() -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  {malloc}
  (func (export "process") (param $ptr i32) (param $len i32) (result i32)
    i32.const 0))"#,
        malloc = MALLOC_THAT_GROWS_MEMORY
    )
}

/// Compiles `wat_src` and writes the resulting bytes to a fresh `.wasm`
/// file inside `dir`, returning its path.
pub fn write_wat_module(dir: &std::path::Path, name: &str, wat_src: &str) -> PathBuf {
    let bytes = wat::parse_str(wat_src).expect("test wat module should assemble");
    let path = dir.join(format!("{name}.wasm"));
    std::fs::write(&path, bytes).expect("write test wasm module");
    path
}
