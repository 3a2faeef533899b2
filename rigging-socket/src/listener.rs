//! Interception listener ("MITM") standing in for a real daemon endpoint.
//!
//! # Lifecycle
//!
//! 1. [`InterceptListener::start`] binds the address before returning, so a
//!    daemon started afterwards always finds the endpoint in place.
//! 2. The accept/read loop runs as its own tokio task. Every received unit
//!    is pushed onto the queue first and then, when `forward_to` is set,
//!    relayed to the real endpoint.
//! 3. [`InterceptListener::shutdown`] stops the loop, aborts per-connection
//!    relays and waits for all of them to finish before releasing the bind
//!    address (and removing the socket node for local addresses).
//!
//! A live local node at the address is a bind conflict; a stale node left by
//! a crashed process is removed before binding. With
//! [`InterceptSpec::take_over`] a live node owned by the daemon is instead
//! moved to the local `forward_to` path, the listener binds in its place,
//! and the daemon's node is moved back on shutdown.

use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixDatagram as StdUnixDatagram, UnixStream as StdUnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rigging_core::{Family, Protocol, SocketAddress};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UdpSocket, UnixDatagram, UnixListener};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};

use crate::controller::SocketController;
use crate::error::{io_err, SocketError};
use crate::framing::{datagram_buffer, datagram_payload, Framing};
use crate::observer::{self, QueueItem, QueueObserver, QueueSender};

/// Declarative description of one interception point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptSpec {
    /// Address the listener impersonates.
    pub address: SocketAddress,
    #[serde(default)]
    pub framing: Framing,
    /// Real endpoint to relay to; `None` is pure observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_to: Option<SocketAddress>,
    /// Stream relays wait this long for a reply to pass back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_timeout_ms: Option<u64>,
    /// Queue capacity; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// Displace a live node at `address` to the local `forward_to` path
    /// instead of failing with a bind conflict.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub take_over: bool,
}

impl InterceptSpec {
    pub fn observe(address: SocketAddress) -> Self {
        Self {
            address,
            framing: Framing::default(),
            forward_to: None,
            reply_timeout_ms: None,
            capacity: None,
            take_over: false,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn forwarding_to(mut self, upstream: SocketAddress) -> Self {
        self.forward_to = Some(upstream);
        self
    }

    pub fn taking_over(mut self) -> Self {
        self.take_over = true;
        self
    }

    /// Where a displaced daemon node goes: the local relay target, if any.
    fn displacement_path(&self) -> Option<&Path> {
        self.forward_to
            .as_ref()
            .and_then(SocketAddress::path)
            .filter(|target| Some(*target) != self.address.path())
    }
}

/// A daemon-owned node moved aside while the listener holds its address.
#[derive(Debug)]
struct DisplacedNode {
    original: PathBuf,
    moved_to: PathBuf,
}

struct Running {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Shared state of one running relay.
struct RelayContext {
    label: String,
    framing: Framing,
    forward_to: Option<SocketAddress>,
    reply_timeout: Option<Duration>,
    queue: QueueSender,
}

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

enum StreamListener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl StreamListener {
    async fn accept(&self) -> std::io::Result<(Box<dyn AsyncStream>, String)> {
        match self {
            StreamListener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), "unix-peer".to_string()))
            }
            StreamListener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Box::new(stream), peer.to_string()))
            }
        }
    }
}

enum DatagramSocket {
    Unix(UnixDatagram),
    Udp(UdpSocket),
}

impl DatagramSocket {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, Option<String>)> {
        match self {
            DatagramSocket::Unix(socket) => {
                let (n, peer) = socket.recv_from(buf).await?;
                let peer = peer.as_pathname().map(|p| p.display().to_string());
                Ok((n, peer))
            }
            DatagramSocket::Udp(socket) => {
                let (n, peer) = socket.recv_from(buf).await?;
                Ok((n, Some(peer.to_string())))
            }
        }
    }
}

enum Bound {
    Stream(StreamListener),
    Datagram(DatagramSocket),
}

pub struct InterceptListener {
    spec: InterceptSpec,
    bound_address: Option<SocketAddress>,
    queue: Option<QueueSender>,
    observer: Option<QueueObserver>,
    running: Option<Running>,
    owned_node: Option<PathBuf>,
    displaced: Option<DisplacedNode>,
}

impl std::fmt::Debug for InterceptListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptListener")
            .field("address", &self.address())
            .field("running", &self.running.is_some())
            .finish()
    }
}

impl InterceptListener {
    pub fn new(spec: InterceptSpec) -> Self {
        let (queue, observer) = observer::channel(&spec.address.to_string(), spec.capacity);
        Self {
            spec,
            bound_address: None,
            queue: Some(queue),
            observer: Some(observer),
            running: None,
            owned_node: None,
            displaced: None,
        }
    }

    pub fn spec(&self) -> &InterceptSpec {
        &self.spec
    }

    /// Address in effect: the resolved bind (e.g. an ephemeral port) once started.
    pub fn address(&self) -> &SocketAddress {
        self.bound_address.as_ref().unwrap_or(&self.spec.address)
    }

    pub fn family(&self) -> Family {
        self.spec.address.family()
    }

    /// Hand out the queue's single observer; later calls return `None`.
    pub fn observer(&mut self) -> Option<QueueObserver> {
        self.observer.take()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind and begin accepting.
    pub async fn start(&mut self) -> Result<(), SocketError> {
        if self.running.is_some() {
            return Err(SocketError::Protocol(format!(
                "listener already running on {}",
                self.spec.address
            )));
        }
        let Some(queue) = self.queue.take() else {
            return Err(SocketError::Protocol(format!(
                "listener on {} cannot be restarted after shutdown",
                self.spec.address
            )));
        };

        let bound = match self.bind().await {
            Ok(bound) => bound,
            Err(err) => {
                self.queue = Some(queue);
                return Err(err);
            }
        };

        let ctx = Arc::new(RelayContext {
            label: self.address().to_string(),
            framing: self.spec.framing,
            forward_to: self.spec.forward_to.clone(),
            reply_timeout: self.spec.reply_timeout_ms.map(Duration::from_millis),
            queue,
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = match bound {
            Bound::Stream(listener) => tokio::spawn(serve_stream(listener, ctx, shutdown_rx)),
            Bound::Datagram(socket) => tokio::spawn(serve_datagram(socket, ctx, shutdown_rx)),
        };

        tracing::info!(
            address = %self.address(),
            forward_to = ?self.spec.forward_to.as_ref().map(ToString::to_string),
            "intercept listener started",
        );
        self.running = Some(Running {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    async fn bind(&mut self) -> Result<Bound, SocketError> {
        let address = self.spec.address.clone();
        let label = address.to_string();
        let location = address.location();

        let bound = match (address.family(), address.protocol()) {
            (Family::Local, protocol) => {
                let path = Path::new(location);
                self.prepare_node_for_bind(path, &label)?;
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| io_err(&label, e))?;
                }
                let bound = match protocol {
                    Protocol::Stream => UnixListener::bind(path)
                        .map(|l| Bound::Stream(StreamListener::Unix(l))),
                    Protocol::Datagram => UnixDatagram::bind(path)
                        .map(|s| Bound::Datagram(DatagramSocket::Unix(s))),
                };
                let bound = match bound {
                    Ok(bound) => bound,
                    Err(err) => {
                        if let Err(restore) = self.restore_displaced() {
                            tracing::error!(error = %restore, "failed to move displaced node back");
                        }
                        return Err(bind_err(&label, err));
                    }
                };
                self.owned_node = Some(path.to_path_buf());
                self.bound_address = Some(address.clone());
                bound
            }
            (Family::Network, Protocol::Stream) => {
                let listener = TcpListener::bind(location)
                    .await
                    .map_err(|e| bind_err(&label, e))?;
                let local = listener.local_addr().map_err(|e| io_err(&label, e))?;
                self.bound_address = Some(SocketAddress::network(local.to_string(), Protocol::Stream));
                Bound::Stream(StreamListener::Tcp(listener))
            }
            (Family::Network, Protocol::Datagram) => {
                let socket = UdpSocket::bind(location)
                    .await
                    .map_err(|e| bind_err(&label, e))?;
                let local = socket.local_addr().map_err(|e| io_err(&label, e))?;
                self.bound_address =
                    Some(SocketAddress::network(local.to_string(), Protocol::Datagram));
                Bound::Datagram(DatagramSocket::Udp(socket))
            }
        };
        Ok(bound)
    }

    /// Refuse live nodes (or displace them when taking over), clear stale
    /// ones, and never touch anything that is not a socket.
    fn prepare_node_for_bind(&mut self, path: &Path, label: &str) -> Result<(), SocketError> {
        match inspect_node(path, label)? {
            Node::Absent => Ok(()),
            Node::Stale => remove_stale_node(path, label),
            Node::Live => {
                let Some(aside) = self.spec.take_over.then(|| self.spec.displacement_path()).flatten()
                else {
                    return Err(SocketError::BindConflict {
                        address: label.to_string(),
                    });
                };
                match inspect_node(aside, label)? {
                    Node::Absent => {}
                    Node::Stale => remove_stale_node(aside, label)?,
                    Node::Live => {
                        return Err(SocketError::BindConflict {
                            address: format!("{label} (relay target {} is live too)", aside.display()),
                        })
                    }
                }
                if let Some(parent) = aside.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| io_err(label, e))?;
                }
                std::fs::rename(path, aside).map_err(|e| io_err(label, e))?;
                tracing::info!(
                    socket = %path.display(),
                    moved_to = %aside.display(),
                    "took over live daemon socket",
                );
                self.displaced = Some(DisplacedNode {
                    original: path.to_path_buf(),
                    moved_to: aside.to_path_buf(),
                });
                Ok(())
            }
        }
    }

    fn restore_displaced(&mut self) -> Result<(), SocketError> {
        let Some(node) = self.displaced.take() else {
            return Ok(());
        };
        match std::fs::rename(&node.moved_to, &node.original) {
            Ok(()) => {
                tracing::info!(socket = %node.original.display(), "daemon socket moved back");
                Ok(())
            }
            // The daemon exited and cleaned up after itself.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(node.original.display(), err)),
        }
    }

    /// Stop accepting, wait for the loop to exit and release the address.
    ///
    /// Safe to call more than once and on a listener that never started.
    pub async fn shutdown(&mut self) -> Result<(), SocketError> {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
            if let Err(err) = running.handle.await {
                if !err.is_cancelled() {
                    tracing::error!(address = %self.address(), error = %err, "listener task panicked");
                }
            }
            tracing::info!(address = %self.address(), "intercept listener stopped");
        }
        self.release_node()
    }

    fn release_node(&mut self) -> Result<(), SocketError> {
        if let Some(path) = self.owned_node.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(path.display(), err)),
            }
        }
        self.restore_displaced()
    }
}

impl Drop for InterceptListener {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
            running.handle.abort();
            tracing::warn!(address = %self.address(), "intercept listener dropped without shutdown");
        }
        if let Err(err) = self.release_node() {
            tracing::warn!(error = %err, "failed to remove listener socket node");
        }
    }
}

// ---------------------------------------------------------------------------
// Relay loops
// ---------------------------------------------------------------------------

async fn serve_stream(
    listener: StreamListener,
    ctx: Arc<RelayContext>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(address = %ctx.label, peer = %peer, "connection accepted");
                        connections.spawn(relay_connection(stream, peer, ctx.clone()));
                    }
                    Err(err) => {
                        tracing::warn!(address = %ctx.label, error = %err, "accept failed");
                    }
                }
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                match finished {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => tracing::warn!(address = %ctx.label, error = %err, "relay connection error"),
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => tracing::error!(address = %ctx.label, error = %err, "relay task panicked"),
                }
            }
        }
    }

    connections.shutdown().await;
}

async fn relay_connection(
    stream: Box<dyn AsyncStream>,
    peer: String,
    ctx: Arc<RelayContext>,
) -> Result<(), SocketError> {
    let mut downstream = BufReader::new(stream);
    let mut upstream: Option<SocketController> = None;

    while let Some(frame) = ctx.framing.read_frame(&mut downstream, &ctx.label).await? {
        enqueue(&ctx, frame.clone(), Some(peer.clone())).await;

        let Some(target) = &ctx.forward_to else {
            continue;
        };
        // Capture never depends on the real endpoint being reachable.
        let reply = match forward_frame(&ctx, &mut upstream, target, &frame).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(address = %ctx.label, error = %err, "stream forward failed");
                if let Some(mut broken) = upstream.take() {
                    broken.close().await;
                }
                continue;
            }
        };
        if let Some(reply) = reply {
            let wire = ctx.framing.encode(&reply)?;
            downstream
                .write_all(&wire)
                .await
                .map_err(|e| io_err(&ctx.label, e))?;
            downstream.flush().await.map_err(|e| io_err(&ctx.label, e))?;
        }
    }

    if let Some(mut upstream) = upstream {
        upstream.close().await;
    }
    Ok(())
}

/// Relay one frame upstream, connecting on first use, and collect the reply
/// when a reply window is configured.
async fn forward_frame(
    ctx: &RelayContext,
    upstream: &mut Option<SocketController>,
    target: &SocketAddress,
    frame: &[u8],
) -> Result<Option<Vec<u8>>, SocketError> {
    if upstream.is_none() {
        let mut controller = SocketController::new(target.clone(), ctx.framing);
        controller.connect().await?;
        *upstream = Some(controller);
    }
    let Some(controller) = upstream.as_mut() else {
        return Ok(None);
    };
    controller.send(frame).await?;

    let Some(window) = ctx.reply_timeout else {
        return Ok(None);
    };
    match controller.receive(window).await {
        Ok(reply) => Ok(Some(reply)),
        Err(SocketError::Timeout { .. }) => {
            tracing::debug!(address = %ctx.label, "no upstream reply within window");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

async fn serve_datagram(
    socket: DatagramSocket,
    ctx: Arc<RelayContext>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut buf = datagram_buffer();
    let mut upstream: Option<SocketController> = None;

    loop {
        let (payload, peer) = tokio::select! {
            _ = &mut shutdown_rx => break,
            received = socket.recv(&mut buf) => match received {
                Ok((n, peer)) => match datagram_payload(&buf, n, &ctx.label) {
                    Ok(payload) => (payload, peer),
                    Err(err) => {
                        tracing::error!(address = %ctx.label, error = %err, "datagram discarded");
                        continue;
                    }
                },
                Err(err) => {
                    tracing::warn!(address = %ctx.label, error = %err, "datagram receive failed");
                    continue;
                }
            },
        };

        // A full queue nobody reads must not keep shutdown waiting.
        let item = QueueItem::new(payload.clone(), peer);
        tokio::select! {
            _ = &mut shutdown_rx => {
                tracing::warn!(address = %ctx.label, "queue full at shutdown; last datagram not queued");
                break;
            }
            pushed = ctx.queue.push(item) => {
                if pushed.is_err() {
                    tracing::debug!(address = %ctx.label, "observer gone; item not queued");
                }
            }
        }

        if let Some(target) = &ctx.forward_to {
            if let Err(err) = forward_datagram(&mut upstream, target, ctx.framing, &payload).await {
                tracing::warn!(address = %ctx.label, error = %err, "datagram forward failed");
                upstream = None;
            }
        }
    }

    if let Some(mut upstream) = upstream {
        upstream.close().await;
    }
}

async fn forward_datagram(
    upstream: &mut Option<SocketController>,
    target: &SocketAddress,
    framing: Framing,
    payload: &[u8],
) -> Result<(), SocketError> {
    if upstream.is_none() {
        let mut controller = SocketController::new(target.clone(), framing);
        controller.connect().await?;
        *upstream = Some(controller);
    }
    match upstream.as_mut() {
        Some(controller) => controller.send(payload).await.map(|_| ()),
        None => Ok(()),
    }
}

async fn enqueue(ctx: &RelayContext, payload: Vec<u8>, peer: Option<String>) {
    if ctx.queue.push(QueueItem::new(payload, peer)).await.is_err() {
        tracing::debug!(address = %ctx.label, "observer gone; item not queued");
    }
}

// ---------------------------------------------------------------------------
// Bind helpers
// ---------------------------------------------------------------------------

enum Node {
    Absent,
    Stale,
    Live,
}

fn inspect_node(path: &Path, label: &str) -> Result<Node, SocketError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Node::Absent),
        Err(err) => return Err(io_err(label, err)),
    };
    if !metadata.file_type().is_socket() {
        return Err(io_err(
            label,
            std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} exists and is not a socket node", path.display()),
            ),
        ));
    }
    Ok(if node_is_live(path) { Node::Live } else { Node::Stale })
}

fn remove_stale_node(path: &Path, label: &str) -> Result<(), SocketError> {
    tracing::warn!(socket = %path.display(), "removing stale socket node before bind");
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(label, err)),
    }
}

fn node_is_live(path: &Path) -> bool {
    if StdUnixStream::connect(path).is_ok() {
        return true;
    }
    StdUnixDatagram::unbound()
        .and_then(|socket| socket.connect(path))
        .is_ok()
}

fn bind_err(label: &str, err: std::io::Error) -> SocketError {
    if err.kind() == ErrorKind::AddrInUse {
        SocketError::BindConflict {
            address: label.to_string(),
        }
    } else {
        io_err(label, err)
    }
}
