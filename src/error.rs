//! Error taxonomy for the broker. Variants correspond to the "Kind" column
//! of the error handling table: each carries enough context that a log line
//! built from `{}` is self-sufficient without cross-referencing the caller.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("failed to fetch config from {location}: {source}")]
    ConfigFetch {
        location: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to parse config body as JSON: {source}")]
    ConfigParse {
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to fetch wasm artifact for binding {input_subject} ({artifact_ref}): {source}")]
    ArtifactFetch {
        input_subject: String,
        artifact_ref: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to subscribe binding {input_subject} to subject {subject}: {source}")]
    Subscribe {
        input_subject: String,
        subject: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to bind unix socket {path} for binding {input_subject}: {source}")]
    SocketBind {
        input_subject: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile wasm module for binding {input_subject} ({local_path}): {source}")]
    WasmCompile {
        input_subject: String,
        local_path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to instantiate wasm module for binding {input_subject}: {source}")]
    WasmInstantiate {
        input_subject: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("guest trap while processing message on binding {input_subject}: {source}")]
    WasmTrap {
        input_subject: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("message of {len} bytes exceeds or violates scratch region bounds for binding {input_subject}")]
    MemoryBounds { input_subject: String, len: usize },

    #[error("failed to publish on subject {subject}: {source}")]
    Publish {
        subject: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error(s) during shutdown: {0}")]
    Shutdown(String),
}
