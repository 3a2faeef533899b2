//! Client side of one connection to a product socket.
//!
//! `close()` is idempotent by contract: closing twice, or closing after the
//! peer already reset the connection, is a success. Nothing here inspects
//! OS error codes to decide whether a socket was "already closed".
//!
//! `receive` is cancel safe: bytes of a unit that arrived before a timeout
//! stay buffered on the controller and the next call resumes from them.

use std::path::PathBuf;
use std::time::Duration;

use rigging_core::{Family, Protocol, SocketAddress};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket, UnixDatagram, UnixStream};

use crate::error::{connection_err, SocketError};
use crate::framing::{datagram_buffer, datagram_payload, Framing};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8 * 1024;

enum Connection {
    Unix(UnixStream),
    Tcp(TcpStream),
    UnixDatagram(UnixDatagram),
    Udp(UdpSocket),
}

pub struct SocketController {
    address: SocketAddress,
    framing: Framing,
    connect_timeout: Duration,
    reply_path: Option<PathBuf>,
    connection: Option<Connection>,
    /// Stream bytes received but not yet returned as a unit.
    pending: Vec<u8>,
}

impl std::fmt::Debug for SocketController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketController")
            .field("address", &self.address)
            .field("framing", &self.framing)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl SocketController {
    pub fn new(address: SocketAddress, framing: Framing) -> Self {
        Self {
            address,
            framing,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reply_path: None,
            connection: None,
            pending: Vec::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bind local datagram clients here so the peer can answer.
    pub fn with_reply_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.reply_path = Some(path.into());
        self
    }

    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub async fn connect(&mut self) -> Result<(), SocketError> {
        if self.connection.is_some() {
            return Ok(());
        }
        let label = self.address.to_string();
        let attempt = tokio::time::timeout(self.connect_timeout, self.open());
        let connection = match attempt.await {
            Ok(result) => result.map_err(|e| connection_err(&label, e))?,
            Err(_) => {
                return Err(connection_err(
                    &label,
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", self.connect_timeout),
                    ),
                ))
            }
        };
        tracing::debug!(address = %label, "socket connected");
        self.pending.clear();
        self.connection = Some(connection);
        Ok(())
    }

    async fn open(&self) -> std::io::Result<Connection> {
        let location = self.address.location();
        match (self.address.family(), self.address.protocol()) {
            (Family::Local, Protocol::Stream) => {
                Ok(Connection::Unix(UnixStream::connect(location).await?))
            }
            (Family::Network, Protocol::Stream) => {
                Ok(Connection::Tcp(TcpStream::connect(location).await?))
            }
            (Family::Local, Protocol::Datagram) => {
                let socket = match &self.reply_path {
                    Some(path) => {
                        remove_node(path);
                        UnixDatagram::bind(path)?
                    }
                    None => UnixDatagram::unbound()?,
                };
                socket.connect(location)?;
                Ok(Connection::UnixDatagram(socket))
            }
            (Family::Network, Protocol::Datagram) => {
                let bind_addr = if location.starts_with('[') { "[::]:0" } else { "0.0.0.0:0" };
                let socket = UdpSocket::bind(bind_addr).await?;
                socket.connect(location).await?;
                Ok(Connection::Udp(socket))
            }
        }
    }

    /// Send one complete unit; returns the payload length.
    pub async fn send(&mut self, payload: &[u8]) -> Result<usize, SocketError> {
        let label = self.address.to_string();
        let framing = self.framing;
        let connection = self.connection_mut()?;
        match connection {
            Connection::Unix(stream) => {
                let wire = framing.encode(payload)?;
                stream.write_all(&wire).await.map_err(|e| connection_err(&label, e))?;
                stream.flush().await.map_err(|e| connection_err(&label, e))?;
            }
            Connection::Tcp(stream) => {
                let wire = framing.encode(payload)?;
                stream.write_all(&wire).await.map_err(|e| connection_err(&label, e))?;
                stream.flush().await.map_err(|e| connection_err(&label, e))?;
            }
            Connection::UnixDatagram(socket) => {
                let sent = socket.send(payload).await.map_err(|e| connection_err(&label, e))?;
                check_whole_datagram(sent, payload.len(), &label)?;
            }
            Connection::Udp(socket) => {
                let sent = socket.send(payload).await.map_err(|e| connection_err(&label, e))?;
                check_whole_datagram(sent, payload.len(), &label)?;
            }
        }
        Ok(payload.len())
    }

    /// Read one complete unit within `timeout`.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, SocketError> {
        let label = self.address.to_string();
        match tokio::time::timeout(timeout, self.receive_unit(&label)).await {
            Ok(result) => result,
            Err(_) => Err(SocketError::Timeout {
                address: label,
                waited: timeout,
            }),
        }
    }

    async fn receive_unit(&mut self, label: &str) -> Result<Vec<u8>, SocketError> {
        let framing = self.framing;
        let Self {
            connection, pending, ..
        } = self;
        let connection = connection
            .as_mut()
            .ok_or_else(|| SocketError::NotConnected(label.to_string()))?;

        match connection {
            Connection::Unix(stream) => read_unit(stream, pending, framing, label).await,
            Connection::Tcp(stream) => read_unit(stream, pending, framing, label).await,
            Connection::UnixDatagram(socket) => {
                let mut buf = datagram_buffer();
                let n = socket.recv(&mut buf).await.map_err(|e| connection_err(label, e))?;
                datagram_payload(&buf, n, label)
            }
            Connection::Udp(socket) => {
                let mut buf = datagram_buffer();
                let n = socket.recv(&mut buf).await.map_err(|e| connection_err(label, e))?;
                datagram_payload(&buf, n, label)
            }
        }
    }

    /// Send then wait for the reply unit.
    pub async fn request(&mut self, payload: &[u8], timeout: Duration) -> Result<Vec<u8>, SocketError> {
        self.send(payload).await?;
        self.receive(timeout).await
    }

    /// Release the connection. Never fails.
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            match connection {
                Connection::Unix(mut stream) => {
                    let _ = stream.shutdown().await;
                }
                Connection::Tcp(mut stream) => {
                    let _ = stream.shutdown().await;
                }
                Connection::UnixDatagram(_) | Connection::Udp(_) => {}
            }
            tracing::debug!(address = %self.address, "socket closed");
        }
        self.pending.clear();
        if let Some(path) = &self.reply_path {
            remove_node(path);
        }
    }

    /// Teardown helper: drain one pending stream unit (outcome ignored), then close.
    pub async fn flush_and_close(&mut self, timeout: Duration) {
        if self.address.protocol() == Protocol::Stream && self.connection.is_some() {
            if let Err(err) = self.receive(timeout).await {
                tracing::trace!(address = %self.address, error = %err, "nothing to flush before close");
            }
        }
        self.close().await;
    }

    fn connection_mut(&mut self) -> Result<&mut Connection, SocketError> {
        let label = self.address.to_string();
        self.connection
            .as_mut()
            .ok_or(SocketError::NotConnected(label))
    }
}

impl Drop for SocketController {
    fn drop(&mut self) {
        if let Some(path) = &self.reply_path {
            remove_node(path);
        }
    }
}

/// Decode from `pending` first and read more only when it holds no whole
/// unit. Each read is cancel safe, so a timeout never loses bytes.
async fn read_unit<S>(
    stream: &mut S,
    pending: &mut Vec<u8>,
    framing: Framing,
    label: &str,
) -> Result<Vec<u8>, SocketError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(unit) = framing.decode(pending, label)? {
            return Ok(unit);
        }
        let n = stream.read(&mut chunk).await.map_err(|e| connection_err(label, e))?;
        if n == 0 {
            return framing.finish(pending, label)?.ok_or_else(|| {
                connection_err(
                    label,
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed the connection"),
                )
            });
        }
        pending.extend_from_slice(&chunk[..n]);
    }
}

fn check_whole_datagram(sent: usize, expected: usize, label: &str) -> Result<(), SocketError> {
    if sent == expected {
        Ok(())
    } else {
        Err(SocketError::Protocol(format!(
            "datagram truncated on {label}: sent {sent} of {expected} bytes"
        )))
    }
}

fn remove_node(path: &std::path::Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to remove socket node"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn connect_to_missing_socket_is_connection_error() {
        let dir = TempDir::new().unwrap();
        let mut controller = SocketController::new(
            SocketAddress::local(dir.path().join("absent.sock"), Protocol::Stream),
            Framing::LengthPrefixedLe,
        );
        let err = controller.connect().await.unwrap_err();
        assert!(matches!(err, SocketError::Connection { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let mut controller = SocketController::new(
            SocketAddress::network("127.0.0.1:9", Protocol::Stream),
            Framing::Newline,
        );
        assert!(matches!(
            controller.send(b"x").await,
            Err(SocketError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn stream_send_writes_one_length_prefixed_unit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wdb");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut wire = Vec::new();
            stream.read_to_end(&mut wire).await.unwrap();
            wire
        });

        let mut controller =
            SocketController::new(SocketAddress::local(&path, Protocol::Stream), Framing::LengthPrefixedLe);
        controller.connect().await.unwrap();
        controller.send(b"global sql SELECT 1").await.unwrap();
        controller.close().await;

        let wire = server.await.unwrap();
        assert_eq!(&wire[..4], &19u32.to_le_bytes());
        assert_eq!(&wire[4..], b"global sql SELECT 1");
    }

    #[tokio::test]
    async fn close_twice_and_after_peer_reset_never_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("peer");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut controller =
            SocketController::new(SocketAddress::local(&path, Protocol::Stream), Framing::Newline);
        controller.connect().await.unwrap();
        server.await.unwrap();

        controller.close().await;
        controller.close().await;
        assert!(!controller.is_connected());
    }
}
