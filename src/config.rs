//! Config Source (C1): fetches the declarative binding list from a local
//! path or a remote URL and parses it into [`StreamBinding`]s.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::BrokerError;

/// Kind of Wasm artifact reference. Only `Ipfs` triggers download+caching
/// (see the Artifact Resolver, C2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Local,
    Ipfs,
}

impl Default for ArtifactKind {
    fn default() -> Self {
        ArtifactKind::Local
    }
}

/// Selects the ingress used to feed a binding's worker queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputKind {
    Bus,
    UnixSocket,
}

impl InputKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "bus" => Some(InputKind::Bus),
            "unix_socket" => Some(InputKind::UnixSocket),
            _ => None,
        }
    }
}

/// One row of the configuration document, as it appears on the wire (§6.1).
#[derive(Clone, Debug, Deserialize)]
pub struct RawBindingConfig {
    pub input: String,
    pub output: String,
    pub file: String,
    #[serde(rename = "type", default)]
    pub artifact_kind: ArtifactKind,
    #[serde(default = "default_input_type")]
    pub input_type: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_input_type() -> String {
    "bus".to_owned()
}

/// The unit of configuration and of reconciliation. `input_subject` is the
/// binding's identity key (I1: at most one active worker per subject).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamBinding {
    pub input_subject: String,
    pub output_subject: String,
    pub artifact_ref: String,
    pub artifact_kind: ArtifactKind,
    pub input_kind: InputKind,
    pub env: Vec<(String, String)>,
    /// Resolved, on-disk path to the Wasm module. `None` until the
    /// Artifact Resolver (C2) runs; I2 requires it to be populated and
    /// readable before the harness starts.
    pub local_path: Option<std::path::PathBuf>,
}

impl StreamBinding {
    fn from_raw(raw: RawBindingConfig) -> Result<Self, String> {
        let input_kind = InputKind::parse(&raw.input_type)
            .ok_or_else(|| format!("unknown input_type '{}'", raw.input_type))?;
        let mut env: Vec<(String, String)> = raw.env.into_iter().collect();
        env.sort();
        Ok(StreamBinding {
            input_subject: raw.input,
            output_subject: raw.output,
            artifact_ref: raw.file,
            artifact_kind: raw.artifact_kind,
            input_kind,
            env,
            local_path: None,
        })
    }

    /// Fields other than `input_subject` and `local_path` that, if changed
    /// across a reload, should cause the reconciler to replace the worker
    /// (see DESIGN.md's Open Question decision for §4.7).
    pub fn requires_replacement(&self, other: &StreamBinding) -> bool {
        self.artifact_ref != other.artifact_ref
            || self.artifact_kind != other.artifact_kind
            || self.input_kind != other.input_kind
            || self.env != other.env
    }
}

fn is_remote(location: &str) -> bool {
    match url::Url::parse(location) {
        Ok(u) => (u.scheme() == "http" || u.scheme() == "https") && u.host().is_some(),
        Err(_) => false,
    }
}

async fn fetch_body(location: &str) -> Result<Vec<u8>, BrokerError> {
    if is_remote(location) {
        let resp = reqwest::get(location)
            .await
            .map_err(|e| BrokerError::ConfigFetch {
                location: location.to_owned(),
                source: e.into(),
            })?;
        if !resp.status().is_success() {
            return Err(BrokerError::ConfigFetch {
                location: location.to_owned(),
                source: anyhow::anyhow!("unexpected status {}", resp.status()),
            });
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| BrokerError::ConfigFetch {
                location: location.to_owned(),
                source: e.into(),
            })
    } else {
        tokio::fs::read(location)
            .await
            .map_err(|e| BrokerError::ConfigFetch {
                location: location.to_owned(),
                source: e.into(),
            })
    }
}

/// Loads and parses the binding list from `location`. `previous_bindings`
/// is consulted only by the Artifact Resolver downstream; it is accepted
/// here so implementations can thread it through unchanged, but `load`
/// itself does not need it for parsing.
#[tracing::instrument(level = "info", skip(previous_bindings))]
pub async fn load(
    location: &str,
    previous_bindings: &HashMap<String, StreamBinding>,
) -> Result<Vec<StreamBinding>, BrokerError> {
    let _ = previous_bindings;
    let body = fetch_body(location).await?;

    let raw: Vec<RawBindingConfig> =
        serde_json::from_slice(&body).map_err(|source| BrokerError::ConfigParse { source })?;

    let mut bindings = Vec::with_capacity(raw.len());
    for entry in raw {
        let input = entry.input.clone();
        match StreamBinding::from_raw(entry) {
            Ok(b) => bindings.push(b),
            Err(reason) => {
                tracing::warn!(input_subject = %input, reason, "skipping binding with unrecognised configuration");
            }
        }
    }
    Ok(bindings)
}
