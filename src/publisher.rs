//! Segment Publisher (C6): interprets harness output as either an opaque
//! payload or a `{suffix, data}` fan-out array and republishes accordingly.

use serde::Deserialize;
use serde_json::Value;

use crate::transport::Transport;

#[derive(Debug, Deserialize)]
pub struct Segment {
    pub suffix: String,
    pub data: Value,
}

/// Publishes `bytes` on `base_subject`, fanning out to `base_subject.suffix`
/// per segment if `bytes` decodes as a segment array (§4.6). Per-segment
/// and opaque-publish failures are logged; they never abort the caller.
pub async fn publish_result(transport: &dyn Transport, base_subject: &str, bytes: &[u8]) {
    match serde_json::from_slice::<Vec<Segment>>(bytes) {
        Ok(segments) => {
            for segment in segments {
                let subject = format!("{}.{}", base_subject, segment.suffix);
                match serde_json::to_vec(&segment.data) {
                    Ok(encoded) => {
                        if let Err(e) = transport.publish(&subject, encoded).await {
                            tracing::warn!(subject = %subject, error = %e, "failed to publish segment");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(subject = %subject, error = %e, "failed to encode segment data");
                    }
                }
            }
        }
        Err(_) => {
            if let Err(e) = transport.publish(base_subject, bytes.to_vec()).await {
                tracing::warn!(subject = %base_subject, error = %e, "failed to publish opaque message");
            }
        }
    }
}
