//! Artifact Resolver (C2): resolves a binding's `artifact_ref` to a local,
//! readable path, downloading and caching remote (`ipfs`) artifacts.
//!
//! Grounded in `handler_loader/module_loader.rs`'s `load_from_oci`: hash the
//! reference to a stable cache file name and only fetch if that file is not
//! already present.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::{ArtifactKind, StreamBinding};
use crate::error::BrokerError;

fn cache_dir() -> PathBuf {
    std::env::temp_dir().join("wasm-stream-broker")
}

fn cache_file_name(artifact_ref: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(artifact_ref.as_bytes());
    format!("{:x}.wasm", hasher.finalize())
}

/// Resolves `binding.local_path`, mutating it in place. `previous` is the
/// binding's predecessor from the last reconcile pass, if any, consulted to
/// satisfy I3 (reuse `local_path` when `artifact_ref` is unchanged).
#[tracing::instrument(level = "info", skip(previous), fields(input_subject = %binding.input_subject))]
pub async fn resolve(
    binding: &mut StreamBinding,
    previous: Option<&StreamBinding>,
) -> Result<(), BrokerError> {
    match binding.artifact_kind {
        ArtifactKind::Local => {
            binding.local_path = Some(PathBuf::from(&binding.artifact_ref));
            Ok(())
        }
        ArtifactKind::Ipfs => {
            if let Some(prev) = previous {
                if prev.artifact_ref == binding.artifact_ref && prev.local_path.is_some() {
                    tracing::debug!("reusing previously downloaded artifact");
                    binding.local_path = prev.local_path.clone();
                    return Ok(());
                }
            }
            let path = download(&binding.artifact_ref).await.map_err(|source| {
                BrokerError::ArtifactFetch {
                    input_subject: binding.input_subject.clone(),
                    artifact_ref: binding.artifact_ref.clone(),
                    source,
                }
            })?;
            binding.local_path = Some(path);
            Ok(())
        }
    }
}

async fn download(artifact_ref: &str) -> anyhow::Result<PathBuf> {
    let dir = cache_dir();
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(cache_file_name(artifact_ref));

    if path.is_file() {
        tracing::debug!(path = %path.display(), "artifact already cached on disk");
        return Ok(path);
    }

    tracing::info!(artifact_ref, "downloading wasm artifact");
    let resp = reqwest::get(artifact_ref).await?;
    if !resp.status().is_success() {
        anyhow::bail!("unexpected status {} fetching {}", resp.status(), artifact_ref);
    }
    let bytes = resp.bytes().await?;
    safely_write(&path, &bytes).await?;
    Ok(path)
}

async fn safely_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, content).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputKind;

    fn local_binding(input_subject: &str, artifact_ref: &str) -> StreamBinding {
        StreamBinding {
            input_subject: input_subject.to_owned(),
            output_subject: format!("{input_subject}.out"),
            artifact_ref: artifact_ref.to_owned(),
            artifact_kind: ArtifactKind::Local,
            input_kind: InputKind::Bus,
            env: Vec::new(),
            local_path: None,
        }
    }

    #[test]
    fn cache_file_name_is_stable_and_content_addressed() {
        let a = cache_file_name("ipfs://bafy123");
        let b = cache_file_name("ipfs://bafy123");
        let c = cache_file_name("ipfs://bafy456");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".wasm"));
    }

    #[tokio::test]
    async fn resolve_local_kind_uses_artifact_ref_directly() {
        let mut binding = local_binding("a.in", "./modules/a.wasm");
        resolve(&mut binding, None).await.unwrap();
        assert_eq!(
            binding.local_path,
            Some(PathBuf::from("./modules/a.wasm"))
        );
    }

    #[tokio::test]
    async fn resolve_reuses_previous_local_path_for_an_unchanged_ipfs_ref() {
        let mut previous = local_binding("a.in", "ipfs://bafy123");
        previous.artifact_kind = ArtifactKind::Ipfs;
        previous.local_path = Some(PathBuf::from("/tmp/cached/already-downloaded.wasm"));

        let mut next = local_binding("a.in", "ipfs://bafy123");
        next.artifact_kind = ArtifactKind::Ipfs;

        resolve(&mut next, Some(&previous)).await.unwrap();
        assert_eq!(next.local_path, previous.local_path);
    }
}
