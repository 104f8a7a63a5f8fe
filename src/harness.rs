//! Wasm Harness (C5): owns one sandboxed module instance per binding and
//! translates the host-side byte queue into guest `process` invocations.
//!
//! The guest ABI (`memory`, `malloc`, `process`, optional `free`) and the
//! reused-scratch-region contract are described in SPEC_FULL.md §4.5/§6.2.
//! Grounded in `wasm_runner.rs`'s `new_store_and_engine`/`prepare_wasm_instance`
//! split and in `original_source/internal/wasm_runner.go`'s fixed allocate-
//! once-reuse-always buffer strategy.

use std::sync::Arc;

use tokio::sync::mpsc;
use wasmtime::{Engine, Instance, Memory, Store, TypedFunc};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::WasiCtxBuilder;

use crate::config::StreamBinding;
use crate::error::BrokerError;
use crate::module_cache::ModuleCache;
use crate::publisher;
use crate::transport::Transport;

/// Default scratch-region size when a binding does not otherwise specify
/// one; §4.5 allows implementations to pick a fixed default.
pub const DEFAULT_SCRATCH_CAP: i32 = 1024 * 1024;

/// After this many consecutive guest traps, the harness re-instantiates the
/// module (cheap relative to recompiling) instead of continuing to trust a
/// possibly-corrupted instance.
const MAX_CONSECUTIVE_TRAPS: u32 = 5;

struct Instantiated {
    store: Store<WasiP1Ctx>,
    #[allow(dead_code)]
    instance: Instance,
    memory: Memory,
    process_func: TypedFunc<(i32, i32), i32>,
    scratch_ptr: i32,
    scratch_cap: i32,
}

fn instantiate(
    engine: &Engine,
    module_cache: &ModuleCache,
    binding: &StreamBinding,
) -> Result<Instantiated, BrokerError> {
    let local_path = binding.local_path.as_ref().ok_or_else(|| {
        BrokerError::WasmCompile {
            input_subject: binding.input_subject.clone(),
            local_path: Default::default(),
            source: anyhow::anyhow!("binding has no resolved local_path (I2 violated)"),
        }
    })?;

    let module = module_cache
        .compile(local_path)
        .map_err(|source| BrokerError::WasmCompile {
            input_subject: binding.input_subject.clone(),
            local_path: local_path.clone(),
            source,
        })?;

    let mut linker = wasmtime::Linker::new(engine);
    preview1::add_to_linker_sync(&mut linker, |ctx: &mut WasiP1Ctx| ctx).map_err(|source| {
        BrokerError::WasmInstantiate {
            input_subject: binding.input_subject.clone(),
            source,
        }
    })?;

    let mut wasi_builder = WasiCtxBuilder::new();
    for (k, v) in &binding.env {
        wasi_builder.env(k, v);
    }
    let wasi_ctx = wasi_builder.build_p1();

    let mut store = Store::new(engine, wasi_ctx);
    let instance = linker
        .instantiate(&mut store, &module)
        .map_err(|source| BrokerError::WasmInstantiate {
            input_subject: binding.input_subject.clone(),
            source,
        })?;

    let memory = instance
        .get_memory(&mut store, "memory")
        .ok_or_else(|| BrokerError::WasmInstantiate {
            input_subject: binding.input_subject.clone(),
            source: anyhow::anyhow!("module does not export 'memory'"),
        })?;

    let malloc_func = instance
        .get_typed_func::<i32, i32>(&mut store, "malloc")
        .map_err(|source| BrokerError::WasmInstantiate {
            input_subject: binding.input_subject.clone(),
            source,
        })?;

    let process_func = instance
        .get_typed_func::<(i32, i32), i32>(&mut store, "process")
        .map_err(|source| BrokerError::WasmInstantiate {
            input_subject: binding.input_subject.clone(),
            source,
        })?;

    let scratch_cap = DEFAULT_SCRATCH_CAP;
    let scratch_ptr = malloc_func
        .call(&mut store, scratch_cap)
        .map_err(|source| BrokerError::WasmInstantiate {
            input_subject: binding.input_subject.clone(),
            source,
        })?;

    check_scratch_bounds(&memory, &store, scratch_ptr, scratch_cap, &binding.input_subject)?;

    Ok(Instantiated {
        store,
        instance,
        memory,
        process_func,
        scratch_ptr,
        scratch_cap,
    })
}

fn check_scratch_bounds(
    memory: &Memory,
    store: &Store<WasiP1Ctx>,
    scratch_ptr: i32,
    scratch_cap: i32,
    input_subject: &str,
) -> Result<(), BrokerError> {
    let memory_size = memory.data_size(store) as i64;
    if scratch_ptr < 0 || (scratch_ptr as i64) + (scratch_cap as i64) > memory_size {
        return Err(BrokerError::MemoryBounds {
            input_subject: input_subject.to_owned(),
            len: scratch_cap as usize,
        });
    }
    Ok(())
}

enum ProcessOutcome {
    Dropped,
    Output(Vec<u8>),
}

fn process_one(
    state: &mut Instantiated,
    input_subject: &str,
    msg: &[u8],
) -> Result<ProcessOutcome, BrokerError> {
    if msg.len() as i32 > state.scratch_cap {
        // P5: oversized messages are dropped and never written into guest
        // memory.
        tracing::warn!(input_subject, len = msg.len(), cap = state.scratch_cap, "dropping oversized message");
        return Ok(ProcessOutcome::Dropped);
    }

    check_scratch_bounds(
        &state.memory,
        &state.store,
        state.scratch_ptr,
        state.scratch_cap,
        input_subject,
    )?;

    state
        .memory
        .write(&mut state.store, state.scratch_ptr as usize, msg)
        .map_err(|source| {
            tracing::warn!(input_subject, error = %source, "failed writing message into guest memory");
            BrokerError::MemoryBounds {
                input_subject: input_subject.to_owned(),
                len: msg.len(),
            }
        })?;

    let result_len = state
        .process_func
        .call(&mut state.store, (state.scratch_ptr, msg.len() as i32))
        .map_err(|source| BrokerError::WasmTrap {
            input_subject: input_subject.to_owned(),
            source,
        })?;

    if result_len == 0 {
        return Ok(ProcessOutcome::Dropped);
    }
    if result_len < 0 {
        tracing::warn!(input_subject, result_len, "guest returned negative length, treating as error");
        return Ok(ProcessOutcome::Dropped);
    }

    let data = state
        .memory
        .data(&state.store)
        .get(state.scratch_ptr as usize..(state.scratch_ptr + result_len) as usize)
        .ok_or_else(|| BrokerError::MemoryBounds {
            input_subject: input_subject.to_owned(),
            len: result_len as usize,
        })?
        .to_vec();

    Ok(ProcessOutcome::Output(data))
}

/// Drives one worker's harness loop: pulls frames off `rx` until it closes,
/// runs each through the guest, and republishes the result via the Segment
/// Publisher (C6). Exits (and drops the instance) when `rx` is closed.
#[tracing::instrument(level = "info", skip_all, fields(input_subject = %binding.input_subject))]
pub async fn run(
    binding: StreamBinding,
    engine: Engine,
    module_cache: ModuleCache,
    mut rx: mpsc::Receiver<Vec<u8>>,
    transport: Arc<dyn Transport>,
) -> Result<(), BrokerError> {
    let mut state = instantiate(&engine, &module_cache, &binding)?;
    let mut consecutive_traps: u32 = 0;

    while let Some(msg) = rx.recv().await {
        let outcome = process_one(&mut state, &binding.input_subject, &msg);

        match outcome {
            Ok(ProcessOutcome::Dropped) => {
                consecutive_traps = 0;
            }
            Ok(ProcessOutcome::Output(bytes)) => {
                consecutive_traps = 0;
                publisher::publish_result(transport.as_ref(), &binding.output_subject, &bytes)
                    .await;
            }
            Err(e) => {
                tracing::warn!(input_subject = %binding.input_subject, error = %e, "dropping message after harness fault");
                consecutive_traps += 1;
                if consecutive_traps >= MAX_CONSECUTIVE_TRAPS {
                    tracing::warn!(input_subject = %binding.input_subject, "re-instantiating module after repeated traps");
                    match instantiate(&engine, &module_cache, &binding) {
                        Ok(fresh) => {
                            state = fresh;
                            consecutive_traps = 0;
                        }
                        Err(e) => {
                            tracing::error!(input_subject = %binding.input_subject, error = %e, "failed to re-instantiate module, will keep retrying per message");
                        }
                    }
                }
            }
        }
    }

    tracing::debug!(input_subject = %binding.input_subject, "harness loop exiting, queue closed");
    Ok(())
}
