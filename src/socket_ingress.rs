//! Unix-socket Ingress (C4): an alternative to the bus for bindings whose
//! `input_kind` is `unix_socket`. Framing is a fixed 10-ASCII-digit decimal
//! length prefix followed by exactly that many payload bytes (§6.4).

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::BrokerError;

const FRAME_LEN_WIDTH: usize = 10;

/// Tears down the accept loop and every connection it has spawned. A
/// detached per-connection task holds its own clone of the worker-queue
/// sender, so the queue would otherwise stay open (and the harness task
/// alive) for as long as any client connection lingers.
pub struct IngressHandle {
    accept_task: JoinHandle<()>,
    connections: Arc<Mutex<Vec<AbortHandle>>>,
}

impl IngressHandle {
    fn new(accept_task: JoinHandle<()>, connections: Arc<Mutex<Vec<AbortHandle>>>) -> Self {
        Self {
            accept_task,
            connections,
        }
    }
}

impl Drop for IngressHandle {
    fn drop(&mut self) {
        self.accept_task.abort();
        for handle in self.connections.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

/// Binds `path`, removing a stale socket file left behind by a previous run,
/// and spawns the accept loop. Each connection is handled on its own task;
/// a malformed frame terminates only that connection.
#[tracing::instrument(level = "info", skip(tx), fields(input_subject))]
pub async fn listen(
    input_subject: String,
    path: PathBuf,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<IngressHandle, BrokerError> {
    remove_stale_socket(&path).map_err(|source| BrokerError::SocketBind {
        input_subject: input_subject.clone(),
        path: path.clone(),
        source,
    })?;

    let listener = UnixListener::bind(&path).map_err(|source| BrokerError::SocketBind {
        input_subject: input_subject.clone(),
        path: path.clone(),
        source,
    })?;

    let connections: Arc<Mutex<Vec<AbortHandle>>> = Arc::new(Mutex::new(Vec::new()));
    let connections_for_loop = connections.clone();

    let accept_task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let tx = tx.clone();
                    let input_subject = input_subject.clone();
                    let handle = tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &tx).await {
                            tracing::warn!(%input_subject, error = %e, "unix-socket connection closed with error");
                        }
                    });

                    let mut connections = connections_for_loop.lock().unwrap();
                    connections.retain(|h| !h.is_finished());
                    connections.push(handle.abort_handle());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unix-socket accept failed");
                    break;
                }
            }
        }
    });

    Ok(IngressHandle::new(accept_task, connections))
}

fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) | Err(_) => Ok(()),
    }
}

fn parse_frame_len(len_buf: &[u8; FRAME_LEN_WIDTH]) -> anyhow::Result<usize> {
    let len_str = std::str::from_utf8(len_buf)?;
    len_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("malformed frame length '{}'", len_str))
}

async fn handle_connection(
    mut stream: UnixStream,
    tx: &mpsc::Sender<Vec<u8>>,
) -> anyhow::Result<()> {
    loop {
        let mut len_buf = [0u8; FRAME_LEN_WIDTH];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let len = parse_frame_len(&len_buf)?;

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;

        if tx.send(payload).await.is_err() {
            return Ok(());
        }
    }
}
