//! Cross-process election: the first process to claim an [`ApplicationId`] becomes the
//! primary and listens for one-line commands; later processes become short-lived
//! clients that forward a single line and exit.
//!
//! The claim is an exclusive lock on `<runtime>/<id>.lock`. The primary then listens on
//! a loopback port and publishes it in `<runtime>/<id>.port`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const ACK: &str = "ack";
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out delivering message to the running instance")]
    Timeout,
    #[error("Peer protocol error: {0}")]
    Protocol(String),
}

/// Deterministic identity for one (data directory, version) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationId(String);

impl ApplicationId {
    pub fn from_path_and_version(path: &Path, version: &str) -> Self {
        let mut ctx = md5::Context::new();
        ctx.consume(path.to_string_lossy().as_bytes());
        ctx.consume([0u8]);
        ctx.consume(version.as_bytes());
        Self(format!("quarry-{:x}", ctx.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub enum PeerRole {
    Primary(PeerServer),
    Secondary(PeerClient),
}

pub struct LocalPeer;

impl LocalPeer {
    /// Tries to become the primary for `id`. Files are placed under `runtime_dir`.
    pub async fn claim(id: &ApplicationId, runtime_dir: &Path) -> Result<PeerRole, PeerError> {
        std::fs::create_dir_all(runtime_dir)?;
        let lock_path = runtime_dir.join(format!("{id}.lock"));
        let port_path = runtime_dir.join(format!("{id}.port"));

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            tracing::debug!(%id, "application id already claimed, acting as client");
            return Ok(PeerRole::Secondary(PeerClient { port_path }));
        }

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        write_port_file(&port_path, addr.port())?;
        tracing::debug!(%id, %addr, "claimed application id");

        let (tx, rx) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(listener, tx));

        Ok(PeerRole::Primary(PeerServer {
            _lock: lock_file,
            port_path,
            addr,
            messages: rx,
            accept_task,
        }))
    }
}

fn write_port_file(path: &Path, port: u16) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(port.to_string().as_bytes())?;
    file.sync_all()
}

pub struct PeerServer {
    _lock: File,
    port_path: PathBuf,
    addr: SocketAddr,
    messages: mpsc::UnboundedReceiver<String>,
    accept_task: JoinHandle<()>,
}

impl PeerServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next line received from a client, in arrival order.
    pub async fn recv(&mut self) -> Option<String> {
        self.messages.recv().await
    }

    /// Takes every line already received without waiting for more.
    pub fn drain_pending(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.messages.try_recv() {
            lines.push(line);
        }
        lines
    }
}

impl Drop for PeerServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = std::fs::remove_file(&self.port_path);
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<String>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("peer accept failed: {e}");
                continue;
            }
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, tx).await {
                tracing::warn!(%peer, "dropping peer connection: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    tx: mpsc::UnboundedSender<String>,
) -> Result<(), PeerError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    let n = tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| PeerError::Timeout)??;
    if n == 0 {
        return Err(PeerError::Protocol("connection closed before a message".into()));
    }
    let message = line.trim_end_matches(['\r', '\n']).to_string();
    tx.send(message)
        .map_err(|_| PeerError::Protocol("primary is shutting down".into()))?;
    write.write_all(format!("{ACK}\n").as_bytes()).await?;
    write.flush().await?;
    Ok(())
}

pub struct PeerClient {
    port_path: PathBuf,
}

impl PeerClient {
    /// Delivers one line to the primary and waits for its acknowledgement.
    pub async fn send_message(&self, message: &str, timeout: Duration) -> Result<(), PeerError> {
        if message.contains(['\n', '\r']) {
            return Err(PeerError::Protocol(
                "messages must be a single line".into(),
            ));
        }
        tokio::time::timeout(timeout, self.deliver(message))
            .await
            .map_err(|_| PeerError::Timeout)?
    }

    async fn deliver(&self, message: &str) -> Result<(), PeerError> {
        // The primary publishes its port right after taking the lock; poll until it shows up.
        let stream = loop {
            if let Some(port) = read_port_file(&self.port_path) {
                match TcpStream::connect(("127.0.0.1", port)).await {
                    Ok(stream) => break stream,
                    Err(e) => tracing::debug!(port, "peer connect failed, retrying: {e}"),
                }
            }
            tokio::time::sleep(PORT_POLL_INTERVAL).await;
        };

        let (read, mut write) = stream.into_split();
        write.write_all(format!("{message}\n").as_bytes()).await?;
        write.flush().await?;

        let mut reader = BufReader::new(read);
        let mut reply = String::new();
        reader.read_line(&mut reply).await?;
        if reply.trim_end() != ACK {
            return Err(PeerError::Protocol(format!(
                "unexpected reply {:?}",
                reply.trim_end()
            )));
        }
        Ok(())
    }
}

fn read_port_file(path: &Path) -> Option<u16> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_deterministic_and_version_sensitive() {
        let a = ApplicationId::from_path_and_version(Path::new("/srv/quarry"), "1.0.0");
        let b = ApplicationId::from_path_and_version(Path::new("/srv/quarry"), "1.0.0");
        let c = ApplicationId::from_path_and_version(Path::new("/srv/quarry"), "1.0.1");
        let d = ApplicationId::from_path_and_version(Path::new("/srv/other"), "1.0.0");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.as_str().starts_with("quarry-"));
    }

    #[test]
    fn identity_is_the_md5_of_path_and_version() {
        let id = ApplicationId::from_path_and_version(Path::new("/srv/quarry"), "1.0.0");
        assert_eq!(id.as_str(), "quarry-5cc00de823da3fd56caab881903741b4");
    }
}
