//! End-to-end harness scenarios (spec seed tests 1-3): a single worker
//! pulling frames off its queue and running them through a guest module.

mod common;

use std::sync::Arc;

use tokio::sync::mpsc;
use wasmtime::Engine;

use common::InMemoryTransport;
use wasm_stream_broker::config::{ArtifactKind, InputKind, StreamBinding};
use wasm_stream_broker::harness;
use wasm_stream_broker::module_cache::ModuleCache;

fn binding(input_subject: &str, output_subject: &str, local_path: std::path::PathBuf) -> StreamBinding {
    StreamBinding {
        input_subject: input_subject.to_owned(),
        output_subject: output_subject.to_owned(),
        artifact_ref: local_path.display().to_string(),
        artifact_kind: ArtifactKind::Local,
        input_kind: InputKind::Bus,
        env: Vec::new(),
        local_path: Some(local_path),
    }
}

#[tokio::test]
async fn identity_module_round_trips_a_single_message() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = common::write_wat_module(dir.path(), "identity", &common::identity_wat());

    let engine = Engine::default();
    let module_cache = ModuleCache::new(engine.clone());
    let transport = Arc::new(InMemoryTransport::new());
    let (tx, rx) = mpsc::channel(8);

    let binding = binding("a.in", "a.out", module_path);
    let task = tokio::spawn(harness::run(
        binding,
        engine,
        module_cache,
        rx,
        transport.clone(),
    ));

    tx.send(b"hello".to_vec()).await.unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    assert_eq!(
        transport.published(),
        vec![("a.out".to_owned(), b"hello".to_vec())]
    );
}

#[tokio::test]
async fn segmenting_module_fans_out_two_publishes_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = common::write_wat_module(dir.path(), "segmenting", &common::segmenting_wat());

    let engine = Engine::default();
    let module_cache = ModuleCache::new(engine.clone());
    let transport = Arc::new(InMemoryTransport::new());
    let (tx, rx) = mpsc::channel(8);

    let binding = binding("a.in", "a.out", module_path);
    let task = tokio::spawn(harness::run(
        binding,
        engine,
        module_cache,
        rx,
        transport.clone(),
    ));

    tx.send(b"anything".to_vec()).await.unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    assert_eq!(
        transport.published(),
        vec![
            ("a.out.x".to_owned(), b"\"1\"".to_vec()),
            ("a.out.y".to_owned(), b"\"2\"".to_vec()),
        ]
    );
}

#[tokio::test]
async fn dropping_module_produces_no_publish() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = common::write_wat_module(dir.path(), "dropping", &common::dropping_wat());

    let engine = Engine::default();
    let module_cache = ModuleCache::new(engine.clone());
    let transport = Arc::new(InMemoryTransport::new());
    let (tx, rx) = mpsc::channel(8);

    let binding = binding("a.in", "a.out", module_path);
    let task = tokio::spawn(harness::run(
        binding,
        engine,
        module_cache,
        rx,
        transport.clone(),
    ));

    tx.send(b"anything".to_vec()).await.unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn oversized_message_is_dropped_before_touching_guest_memory() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = common::write_wat_module(dir.path(), "identity-cap", &common::identity_wat());

    let engine = Engine::default();
    let module_cache = ModuleCache::new(engine.clone());
    let transport = Arc::new(InMemoryTransport::new());
    let (tx, rx) = mpsc::channel(8);

    let binding = binding("a.in", "a.out", module_path);
    let task = tokio::spawn(harness::run(
        binding,
        engine,
        module_cache,
        rx,
        transport.clone(),
    ));

    let oversized = vec![0u8; harness::DEFAULT_SCRATCH_CAP as usize + 1];
    tx.send(oversized).await.unwrap();
    tx.send(b"fits".to_vec()).await.unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    assert_eq!(
        transport.published(),
        vec![("a.out".to_owned(), b"fits".to_vec())]
    );
}
