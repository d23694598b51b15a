//! Live connections and their read loop.
//!
//! Every connection runs two tasks: the read loop below (decode, parse,
//! dispatch, heartbeat) and the writer task from [`crate::writer`].
//! [`Connection`] is the cloneable handle to both.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ─► Connected ─► Closing ─► Disconnected
//! ```
//!
//! `Closing` is entered by [`Connection::close`], by the peer closing the
//! socket, or by a connection-fatal error. The writer drains what was
//! already queued, the socket is shut down, and the state becomes
//! `Disconnected`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ConnectorError, Result};
use crate::idle::IdleMonitor;
use crate::iso::MessageFactory;
use crate::pipeline::Pipeline;
use crate::writer::{spawn_writer_task, WriteCompletion, WriterContext, WriterHandle};

/// Read buffer size (64KB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound on flushing queued writes while closing.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// State of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Disconnected,
}

impl ConnectionState {
    /// Whether the connection is going or gone.
    pub fn is_closing(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Disconnected)
    }
}

/// Resolves once `state` reaches `Closing` or later, or its sender is gone.
pub(crate) async fn closing(state: &mut watch::Receiver<ConnectionState>) {
    // `watch::Ref` is !Send; never keep it past this await
    let _ = state.wait_for(ConnectionState::is_closing).await;
}

/// Lifecycle and error notifications published by a connector.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection was established.
    Connected {
        connection_id: u64,
        peer_addr: Option<SocketAddr>,
    },
    /// A connection finished closing.
    Closed { connection_id: u64 },
    /// An error occurred on a connection. Parse errors leave the
    /// connection open; every other error is followed by `Closed`.
    Error {
        connection_id: u64,
        error: Arc<ConnectorError>,
    },
}

struct Inner<M> {
    id: u64,
    peer_addr: Option<SocketAddr>,
    writer: WriterHandle<M>,
    state: watch::Sender<ConnectionState>,
}

/// Handle to one live socket.
///
/// Cheap to clone; clones share the same socket and state.
pub struct Connection<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for Connection<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M> fmt::Debug for Connection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl<M> Connection<M> {
    fn new(
        id: u64,
        peer_addr: Option<SocketAddr>,
        writer: WriterHandle<M>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                writer,
                state,
            }),
        }
    }

    /// Identifier, unique within the connector.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Remote address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether messages can be sent.
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Messages queued but not yet written.
    pub fn pending_writes(&self) -> usize {
        self.inner.writer.pending_count()
    }

    /// Queue a message for writing.
    ///
    /// Fails immediately with `ConnectionClosed` when the connection is
    /// closing and with `NotWritable` when the write queue is full.
    pub fn send(&self, message: M) -> Result<WriteCompletion> {
        if self.state().is_closing() {
            return Err(ConnectorError::ConnectionClosed);
        }
        self.inner.writer.try_send(message)
    }

    /// Queue a message and wait until it was written, at most `timeout`.
    pub async fn send_and_wait(&self, message: M, timeout: Duration) -> Result<()> {
        self.send(message)?.wait_timeout(timeout).await
    }

    /// Start closing. Queued messages are still written.
    pub fn close(&self) {
        let changed = self.inner.state.send_if_modified(|state| {
            if state.is_closing() {
                false
            } else {
                *state = ConnectionState::Closing;
                true
            }
        });
        if changed {
            tracing::debug!(connection = self.inner.id, "Closing connection");
        }
    }

    /// Wait until the connection is fully closed.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await;
    }

    /// Close and wait, at most `timeout`.
    pub async fn close_and_wait(&self, timeout: Duration) -> Result<()> {
        self.close();
        tokio::time::timeout(timeout, self.closed())
            .await
            .map_err(|_| ConnectorError::Timeout)
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
    }

    /// Connection whose outbound messages land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(
        id: u64,
    ) -> (
        Self,
        tokio::sync::mpsc::Receiver<crate::writer::OutboundMessage<M>>,
    ) {
        let (writer, rx) = crate::writer::test_channel(16);
        let (state, _) = watch::channel(ConnectionState::Connected);
        (Self::new(id, None, writer, state), rx)
    }
}

/// Start the reader and writer tasks for a socket.
pub(crate) fn spawn_connection<F, R, W>(
    pipeline: Arc<Pipeline<F>>,
    reader: R,
    writer: W,
    peer_addr: Option<SocketAddr>,
) -> Connection<F::Message>
where
    F: MessageFactory,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = pipeline.next_connection_id();
    let idle = Arc::new(IdleMonitor::new());
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

    let ctx = WriterContext {
        connection_id: id,
        factory: pipeline.factory().clone(),
        codec: pipeline.codec(),
        idle: idle.clone(),
        logger: pipeline.logger(),
    };
    let (writer_handle, writer_task) =
        spawn_writer_task(writer, ctx, &pipeline.config().writer_config(), state_rx);

    let connection = Connection::new(id, peer_addr, writer_handle, state_tx);
    connection.set_state(ConnectionState::Connected);

    tracing::debug!(connection = id, peer = ?peer_addr, "Connection established");
    pipeline.publish(ConnectionEvent::Connected {
        connection_id: id,
        peer_addr,
    });

    tokio::spawn(run(pipeline, connection.clone(), reader, writer_task, idle));
    connection
}

/// Drive a connection from established to disconnected.
async fn run<F, R>(
    pipeline: Arc<Pipeline<F>>,
    connection: Connection<F::Message>,
    mut reader: R,
    writer_task: JoinHandle<Result<()>>,
    idle: Arc<IdleMonitor>,
) where
    F: MessageFactory,
    R: AsyncRead + Unpin,
{
    let id = connection.id();
    let mut writer_task = Some(writer_task);

    if let Err(e) = read_loop(&pipeline, &connection, &mut reader, &mut writer_task, &idle).await {
        tracing::error!(connection = id, "Connection error: {}", e);
        pipeline.publish(ConnectionEvent::Error {
            connection_id: id,
            error: Arc::new(e),
        });
    }

    connection.close();
    if let Some(mut task) = writer_task {
        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::debug!(connection = id, "Writer stopped: {}", e),
            Ok(Err(e)) => tracing::error!(connection = id, "Writer task failed: {}", e),
            Err(_) => {
                tracing::warn!(connection = id, "Writer did not drain in time");
                task.abort();
            }
        }
    }
    drop(reader);

    connection.set_state(ConnectionState::Disconnected);
    tracing::debug!(connection = id, "Connection closed");
    pipeline.publish(ConnectionEvent::Closed { connection_id: id });
}

/// Read frames until the peer closes, the connection is closed locally,
/// the writer fails, or a connection-fatal error occurs.
async fn read_loop<F, R>(
    pipeline: &Pipeline<F>,
    connection: &Connection<F::Message>,
    reader: &mut R,
    writer_task: &mut Option<JoinHandle<Result<()>>>,
    idle: &IdleMonitor,
) -> Result<()>
where
    F: MessageFactory,
    R: AsyncRead + Unpin,
{
    let mut decoder = pipeline.codec().decoder();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut state = connection.subscribe_state();
    let heartbeat = pipeline.config().heartbeat_interval();

    loop {
        let deadline = heartbeat.map(|window| idle.deadline(window));

        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    tracing::debug!(connection = connection.id(), "Peer closed connection");
                    return Ok(());
                }
                idle.record_activity();

                // Sequential: a message is fully dispatched before the next one is parsed
                for body in decoder.push(&buf[..n])? {
                    pipeline.handle_frame(connection, body)?;
                }
            }
            _ = sleep_until(deadline) => {
                if let Some(window) = heartbeat {
                    if idle.is_idle(window) {
                        pipeline.send_heartbeat(connection, idle);
                    }
                }
            }
            _ = closing(&mut state) => {
                return Ok(());
            }
            result = writer_finished(writer_task) => {
                return result;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolves when the writer task ends; never resolves once it was reaped.
async fn writer_finished(task: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    let Some(handle) = task.as_mut() else {
        return std::future::pending().await;
    };
    let result = handle.await;
    *task = None;
    result.unwrap_or_else(|e| Err(ConnectorError::Io(std::io::Error::other(e))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
    use tokio::sync::broadcast;

    use crate::codec::{FieldMessage, MsgPackMessageFactory};
    use crate::config::ConnectorConfig;
    use crate::handler::listener_fn;
    use crate::iso::{FieldValue, IsoMessage};
    use crate::protocol::FrameCodec;

    struct Peer {
        stream: DuplexStream,
        codec: FrameCodec,
        decoder: crate::protocol::FrameBuffer,
        factory: MsgPackMessageFactory,
        buf: Vec<u8>,
    }

    impl Peer {
        fn new(stream: DuplexStream, codec: FrameCodec) -> Self {
            Self {
                stream,
                codec,
                decoder: codec.decoder(),
                factory: MsgPackMessageFactory::new(),
                buf: vec![0u8; 4096],
            }
        }

        async fn send(&mut self, message: &FieldMessage) {
            let body = self.factory.serialize(message).unwrap();
            self.send_body(&body).await;
        }

        async fn send_body(&mut self, body: &[u8]) {
            let frame = self.codec.build_frame(body).unwrap();
            self.stream.write_all(&frame).await.unwrap();
        }

        async fn recv(&mut self) -> FieldMessage {
            loop {
                let n = self.stream.read(&mut self.buf).await.unwrap();
                assert!(n > 0, "unexpected EOF");
                let bodies = self.decoder.push(&self.buf[..n]).unwrap();
                assert!(bodies.len() <= 1, "expected a single frame");
                if let Some(body) = bodies.first() {
                    return self.factory.parse(body).unwrap();
                }
            }
        }
    }

    fn start(
        config: ConnectorConfig,
    ) -> (
        Arc<Pipeline<MsgPackMessageFactory>>,
        Connection<FieldMessage>,
        Peer,
        broadcast::Receiver<ConnectionEvent>,
    ) {
        let codec = config.frame_codec();
        let pipeline = Arc::new(Pipeline::new(config, MsgPackMessageFactory::new()));
        pipeline.init().unwrap();
        let events = pipeline.subscribe();

        let (local, remote) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let connection = spawn_connection(pipeline.clone(), reader, writer, None);
        (pipeline, connection, Peer::new(remote, codec), events)
    }

    fn echo_back(pipeline: &Pipeline<MsgPackMessageFactory>) {
        pipeline.chain().add_listener(listener_fn(
            |m: &FieldMessage| m.mti() == 0x0200,
            |connection, m| {
                connection.send(m.clone().with_field(39, FieldValue::numeric(0, 2)))?;
                Ok(false)
            },
        ));
    }

    #[tokio::test]
    async fn test_dispatches_inbound_messages() {
        let (pipeline, connection, mut peer, _events) = start(ConnectorConfig::default());
        echo_back(&pipeline);
        assert!(connection.is_active());

        peer.send(&FieldMessage::new(0x0200).with_field(11, FieldValue::numeric(1, 6)))
            .await;

        let reply = peer.recv().await;
        assert_eq!(reply.mti(), 0x0200);
        assert_eq!(reply.field(39), Some(&FieldValue::numeric(0, 2)));
    }

    #[tokio::test]
    async fn test_peer_close_disconnects() {
        let (_pipeline, connection, peer, mut events) = start(ConnectorConfig::default());
        drop(peer);

        connection.closed().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(matches!(connection.send(FieldMessage::new(0x0200)), Err(ConnectorError::ConnectionClosed)));

        loop {
            if let ConnectionEvent::Closed { connection_id } = events.recv().await.unwrap() {
                assert_eq!(connection_id, connection.id());
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_local_close_shuts_socket() {
        let (_pipeline, connection, mut peer, _events) = start(ConnectorConfig::default());

        connection.close_and_wait(Duration::from_secs(1)).await.unwrap();

        let mut rest = Vec::new();
        peer.stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_keeps_connection_open() {
        let config = ConnectorConfig::builder().reply_on_error(true).build();
        let (pipeline, connection, mut peer, mut events) = start(config);
        echo_back(&pipeline);

        peer.send_body(b"\xc1garbage").await;
        let reject = peer.recv().await;
        assert_eq!(reject.mti(), 0x0644);
        assert_eq!(reject.field(24), Some(&FieldValue::numeric(650, 3)));
        let detail = reject.field(44).unwrap().to_string();
        assert!(detail.chars().count() <= 25);

        loop {
            match events.recv().await.unwrap() {
                ConnectionEvent::Connected { .. } => continue,
                ConnectionEvent::Error { error, .. } => {
                    assert!(matches!(*error, ConnectorError::Parse(_)));
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        peer.send(&FieldMessage::new(0x0200)).await;
        assert_eq!(peer.recv().await.mti(), 0x0200);
        assert!(connection.is_active());
    }

    #[tokio::test]
    async fn test_parse_error_without_reply() {
        let (pipeline, _connection, mut peer, _events) = start(ConnectorConfig::default());
        echo_back(&pipeline);

        peer.send_body(b"\xc1garbage").await;
        peer.send(&FieldMessage::new(0x0200)).await;

        // The first frame back is the answer to the valid message
        assert_eq!(peer.recv().await.mti(), 0x0200);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let config = ConnectorConfig::builder().max_frame_length(16).build();
        let (_pipeline, connection, mut peer, _events) = start(config);

        peer.stream.write_all(&[0x01, 0x00]).await.unwrap();

        connection.closed().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_fail_fast_listener_closes_connection() {
        let (pipeline, connection, mut peer, _events) = start(ConnectorConfig::default());
        pipeline.chain().add_listener(listener_fn(
            |_: &FieldMessage| true,
            |_, _| Err(ConnectorError::listener("rejected")),
        ));

        peer.send(&FieldMessage::new(0x0200)).await;
        connection.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_after_idle_window() {
        let config = ConnectorConfig::builder()
            .add_echo_message_listener(true)
            .idle_timeout_secs(30)
            .build();
        let (_pipeline, connection, mut peer, _events) = start(config);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(connection.pending_writes(), 0);

        let echo = peer.recv().await;
        assert_eq!(echo.mti(), 0x0800);
        let first = Instant::now();

        // Exactly one echo per idle window
        let quiet = tokio::time::timeout(Duration::from_secs(29), peer.recv()).await;
        assert!(quiet.is_err(), "second frame within the idle window");

        assert_eq!(peer.recv().await.mti(), 0x0800);
        assert!(first.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_postpones_heartbeat() {
        let config = ConnectorConfig::builder()
            .add_echo_message_listener(true)
            .idle_timeout_secs(30)
            .build();
        let (pipeline, _connection, mut peer, _events) = start(config);
        echo_back(&pipeline);

        tokio::time::sleep(Duration::from_secs(20)).await;
        peer.send(&FieldMessage::new(0x0200)).await;
        assert_eq!(peer.recv().await.mti(), 0x0200);
        let answered = Instant::now();

        // Next frame is the heartbeat, a full window after the last activity
        assert_eq!(peer.recv().await.mti(), 0x0800);
        assert!(answered.elapsed() >= Duration::from_secs(29));
    }

    #[tokio::test]
    async fn test_answers_peer_echo() {
        let config = ConnectorConfig::builder()
            .add_echo_message_listener(true)
            .build();
        let (_pipeline, _connection, mut peer, _events) = start(config);

        peer.send(&FieldMessage::new(0x0800)).await;
        assert_eq!(peer.recv().await.mti(), 0x0810);
    }
}
