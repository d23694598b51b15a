//! ISO8583 client connector.
//!
//! [`Iso8583Client`] keeps one connection to a server and re-establishes
//! it after unexpected closes:
//! 1. `init()` validates the configuration and registers built-in listeners
//! 2. `connect()` / `connect_async()` open the socket
//! 3. on close, the reconnect task waits `reconnect_interval_ms` and
//!    connects again, indefinitely, until `disconnect()`
//!
//! # Example
//!
//! ```ignore
//! use iso8583_connector::codec::{FieldMessage, MsgPackMessageFactory};
//! use iso8583_connector::config::ClientConfig;
//! use iso8583_connector::Iso8583Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Iso8583Client::new(
//!         "127.0.0.1:9876".parse()?,
//!         ClientConfig::default(),
//!         MsgPackMessageFactory::new(),
//!     );
//!     client.init()?;
//!     client.connect().await?;
//!
//!     client.send(FieldMessage::new(0x0200))?.wait().await?;
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionEvent};
use crate::error::{ConnectorError, Result};
use crate::handler::ListenerRef;
use crate::iso::MessageFactory;
use crate::pipeline::Pipeline;
use crate::reconnect::ReconnectController;
use crate::transport;
use crate::writer::WriteCompletion;

/// How long `disconnect()` waits for the connection to close.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct ClientInner<F: MessageFactory> {
    addr: SocketAddr,
    pipeline: Arc<Pipeline<F>>,
    reconnect: ReconnectController,
    connection: Mutex<Option<Connection<F::Message>>>,
    wakeup: Arc<Notify>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl<F: MessageFactory> ClientInner<F> {
    fn current(&self) -> MutexGuard<'_, Option<Connection<F::Message>>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a socket and make it the current connection.
    async fn connect_once(self: &Arc<Self>) -> Result<Connection<F::Message>> {
        let stream = transport::connect(self.addr).await?;
        let connection = self.pipeline.attach(stream);

        if !self.reconnect.on_connected() {
            // Disconnect requested while connecting
            connection.close();
            return Err(ConnectorError::ConnectionClosed);
        }

        {
            let mut current = self.current();
            if let Some(existing) = current.as_ref().filter(|c| c.is_active()) {
                // Lost a race with another connect; keep the live one
                let existing = existing.clone();
                drop(current);
                connection.close();
                return Ok(existing);
            }
            if let Some(stale) = current.replace(connection.clone()) {
                stale.close();
            }
        }
        tracing::info!(addr = %self.addr, connection = connection.id(), "Client connected");

        self.watch_close(connection.clone());
        Ok(connection)
    }

    /// Schedule a reconnect once `connection` closes, unless it was
    /// replaced or taken by `disconnect()` in the meantime.
    fn watch_close(self: &Arc<Self>, connection: Connection<F::Message>) {
        let client = Arc::downgrade(self);
        tokio::spawn(async move {
            connection.closed().await;
            let Some(inner) = client.upgrade() else {
                return;
            };

            let was_current = {
                let mut current = inner.current();
                let matches = current.as_ref().map(Connection::id) == Some(connection.id());
                if matches {
                    *current = None;
                }
                matches
            };
            if was_current {
                tracing::info!(addr = %inner.addr, connection = connection.id(), "Client connection closed");
                inner.schedule_reconnect();
            }
        });
    }

    fn schedule_reconnect(&self) {
        if self.reconnect.on_closed().is_some() {
            self.wakeup.notify_one();
        }
    }

    fn ensure_reconnect_task(self: &Arc<Self>) {
        let mut task = self.reconnect_task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        *task = Some(tokio::spawn(reconnect_loop(
            Arc::downgrade(self),
            self.wakeup.clone(),
            self.reconnect.interval(),
        )));
    }

    fn stop_reconnect_task(&self) {
        if let Some(task) = self.reconnect_task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

/// Reconnect timer: waits for a scheduled reconnect, sleeps the interval,
/// then connects. Failed attempts schedule the next one directly.
async fn reconnect_loop<F: MessageFactory>(client: Weak<ClientInner<F>>, wakeup: Arc<Notify>, interval: Duration) {
    let mut retry = false;
    loop {
        if !retry {
            wakeup.notified().await;
        }
        tokio::time::sleep(interval).await;

        let Some(inner) = client.upgrade() else {
            break;
        };
        if !inner.reconnect.begin_attempt() {
            retry = false;
            continue;
        }

        tracing::debug!(addr = %inner.addr, "Reconnecting");
        retry = match inner.connect_once().await {
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(addr = %inner.addr, "Reconnect failed: {}", e);
                inner.reconnect.on_closed().is_some()
            }
        };
    }
}

/// Client side of an ISO8583 link.
pub struct Iso8583Client<F: MessageFactory> {
    inner: Arc<ClientInner<F>>,
}

impl<F: MessageFactory> Iso8583Client<F> {
    /// Create a client for the server at `addr`. Nothing happens on the
    /// network until `connect()`.
    pub fn new(addr: SocketAddr, config: ClientConfig, factory: F) -> Self {
        let reconnect = ReconnectController::new(config.reconnect_interval());
        Self {
            inner: Arc::new(ClientInner {
                addr,
                pipeline: Arc::new(Pipeline::new(config.connector, factory)),
                reconnect,
                connection: Mutex::new(None),
                wakeup: Arc::new(Notify::new()),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    /// Validate the configuration and register built-in listeners.
    pub fn init(&self) -> Result<()> {
        self.inner.pipeline.init()
    }

    /// Server address.
    pub fn server_addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Connect and wait for the connection.
    ///
    /// Returns the existing connection when already connected. On failure
    /// the error is returned and a reconnect is scheduled.
    pub async fn connect(&self) -> Result<Connection<F::Message>> {
        self.inner.pipeline.ensure_initialized()?;
        if let Some(connection) = self.connection().filter(Connection::is_active) {
            return Ok(connection);
        }

        self.inner.reconnect.request_connect();
        self.inner.ensure_reconnect_task();

        match self.inner.connect_once().await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                tracing::warn!(addr = %self.inner.addr, "Connect failed: {}", e);
                self.inner.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Start connecting without waiting. Failures are retried in the
    /// background. Must be called from within a tokio runtime.
    pub fn connect_async(&self) -> Result<()> {
        self.inner.pipeline.ensure_initialized()?;
        if self.is_connected() {
            return Ok(());
        }

        self.inner.reconnect.request_connect();
        self.inner.ensure_reconnect_task();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.connect_once().await {
                tracing::warn!(addr = %inner.addr, "Connect failed: {}", e);
                inner.schedule_reconnect();
            }
        });
        Ok(())
    }

    /// Whether a connection is established.
    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|c| c.is_active())
    }

    /// Current connection, if any.
    pub fn connection(&self) -> Option<Connection<F::Message>> {
        self.inner.current().clone()
    }

    /// Queue a message on the current connection.
    pub fn send(&self, message: F::Message) -> Result<WriteCompletion> {
        match self.connection() {
            Some(connection) if connection.is_active() => connection.send(message),
            _ => Err(ConnectorError::NotConnected),
        }
    }

    /// Queue a message and wait until it was written, at most `timeout`.
    pub async fn send_and_wait(&self, message: F::Message, timeout: Duration) -> Result<()> {
        self.send(message)?.wait_timeout(timeout).await
    }

    /// Append a listener to the dispatch chain.
    pub fn add_message_listener(&self, listener: ListenerRef<F::Message>) {
        self.inner.pipeline.chain().add_listener(listener);
    }

    /// Remove a listener previously added. Returns whether it was found.
    pub fn remove_message_listener(&self, listener: &ListenerRef<F::Message>) -> bool {
        self.inner.pipeline.chain().remove_listener(listener)
    }

    /// Connection lifecycle and error events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.pipeline.subscribe()
    }

    /// Close the connection without reconnecting, waiting for it to close.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.reconnect.request_disconnect();

        let connection = self.inner.current().take();
        if let Some(connection) = connection {
            tracing::info!(addr = %self.inner.addr, connection = connection.id(), "Client disconnecting");
            connection.close_and_wait(DEFAULT_DISCONNECT_TIMEOUT).await?;
        }
        Ok(())
    }

    /// Disconnect and stop the reconnect task. Errors are logged.
    pub async fn shutdown(&self) {
        if let Err(e) = self.disconnect().await {
            tracing::warn!(addr = %self.inner.addr, "Error while disconnecting: {}", e);
        }
        self.inner.stop_reconnect_task();
    }
}

impl<F: MessageFactory> Drop for Iso8583Client<F> {
    fn drop(&mut self) {
        self.inner.reconnect.request_disconnect();
        if let Some(connection) = self.inner.current().take() {
            connection.close();
        }
        self.inner.stop_reconnect_task();
    }
}
