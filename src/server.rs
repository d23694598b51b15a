//! ISO8583 server connector.
//!
//! [`Iso8583Server`] accepts any number of client connections. All of
//! them share the server's configuration, message factory and listener
//! chain; each runs its own read and writer tasks, so a misbehaving peer
//! only ever closes its own connection.
//!
//! # Example
//!
//! ```ignore
//! use iso8583_connector::codec::{FieldMessage, MsgPackMessageFactory};
//! use iso8583_connector::config::ServerConfig;
//! use iso8583_connector::handler::listener_fn;
//! use iso8583_connector::iso::{FieldValue, IsoMessage, MessageFactory};
//! use iso8583_connector::Iso8583Server;
//!
//! let server = Iso8583Server::new(
//!     "0.0.0.0:9876".parse()?,
//!     ServerConfig::builder().add_echo_message_listener(true).build(),
//!     MsgPackMessageFactory::new(),
//! );
//! server.add_message_listener(listener_fn(
//!     |m: &FieldMessage| m.mti() == 0x0200,
//!     |connection, m| {
//!         let response = MsgPackMessageFactory::new().create_response(m);
//!         connection.send(response.with_field(39, FieldValue::numeric(0, 2)))?;
//!         Ok(false)
//!     },
//! ));
//! server.init()?;
//! server.start().await?;
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionEvent};
use crate::error::Result;
use crate::handler::ListenerRef;
use crate::iso::MessageFactory;
use crate::pipeline::Pipeline;
use crate::transport;

/// How long `stop()` waits for each connection to close.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Listening {
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

struct ServerInner<F: MessageFactory> {
    addr: SocketAddr,
    pipeline: Arc<Pipeline<F>>,
    listening: Mutex<Listening>,
    connections: Mutex<HashMap<u64, Connection<F::Message>>>,
}

impl<F: MessageFactory> ServerInner<F> {
    fn listening(&self) -> MutexGuard<'_, Listening> {
        self.listening.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<u64, Connection<F::Message>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember a connection until it closes.
    fn track(self: &Arc<Self>, connection: Connection<F::Message>) {
        self.connections().insert(connection.id(), connection.clone());

        let server: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            connection.closed().await;
            if let Some(inner) = server.upgrade() {
                inner.connections().remove(&connection.id());
            }
        });
    }
}

async fn accept_loop<F: MessageFactory>(server: Weak<ServerInner<F>>, listener: TcpListener) {
    loop {
        match transport::accept(&listener).await {
            Ok((stream, peer)) => {
                let Some(inner) = server.upgrade() else {
                    break;
                };
                let connection = inner.pipeline.attach(stream);
                tracing::debug!(connection = connection.id(), peer = %peer, "Accepted connection");
                inner.track(connection);
            }
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Server side of an ISO8583 link.
pub struct Iso8583Server<F: MessageFactory> {
    inner: Arc<ServerInner<F>>,
}

impl<F: MessageFactory> Iso8583Server<F> {
    /// Create a server that will listen on `addr`.
    pub fn new(addr: SocketAddr, config: ServerConfig, factory: F) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                addr,
                pipeline: Arc::new(Pipeline::new(config, factory)),
                listening: Mutex::new(Listening::default()),
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validate the configuration and register built-in listeners.
    pub fn init(&self) -> Result<()> {
        self.inner.pipeline.init()
    }

    /// Bind and start accepting connections. Returns the bound address.
    ///
    /// Calling `start()` on a started server returns its address.
    pub async fn start(&self) -> Result<SocketAddr> {
        self.inner.pipeline.ensure_initialized()?;
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let listener = transport::bind(self.inner.addr).await?;
        let local_addr = listener.local_addr()?;

        let mut listening = self.inner.listening();
        if let Some(addr) = listening.local_addr {
            // Lost a race with a concurrent start()
            return Ok(addr);
        }
        listening.local_addr = Some(local_addr);
        listening.accept_task = Some(tokio::spawn(accept_loop(Arc::downgrade(&self.inner), listener)));

        tracing::info!(addr = %local_addr, "Server started");
        Ok(local_addr)
    }

    /// Bound address while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.listening().local_addr
    }

    /// Whether the server is accepting connections.
    pub fn is_started(&self) -> bool {
        self.inner
            .listening()
            .accept_task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections().len()
    }

    /// Snapshot of the open connections.
    pub fn connections(&self) -> Vec<Connection<F::Message>> {
        self.inner.connections().values().cloned().collect()
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

    /// Stop accepting and close every connection.
    pub async fn stop(&self) -> Result<()> {
        let accept_task = {
            let mut listening = self.inner.listening();
            listening.local_addr = None;
            listening.accept_task.take()
        };
        if let Some(task) = accept_task {
            task.abort();
            // Make sure the listening socket is released
            let _ = task.await;
        }

        let connections: Vec<_> = self.inner.connections().drain().map(|(_, c)| c).collect();
        let mut result = Ok(());
        for connection in &connections {
            connection.close();
        }
        for connection in connections {
            if let Err(e) = connection.close_and_wait(DEFAULT_STOP_TIMEOUT).await {
                tracing::warn!(connection = connection.id(), "Connection did not close: {}", e);
                result = Err(e);
            }
        }

        tracing::info!(addr = %self.inner.addr, "Server stopped");
        result
    }

    /// Stop the server. Errors are logged.
    pub async fn shutdown(&self) {
        if let Err(e) = self.stop().await {
            tracing::warn!(addr = %self.inner.addr, "Error while stopping server: {}", e);
        }
    }
}

impl<F: MessageFactory> Drop for Iso8583Server<F> {
    fn drop(&mut self) {
        if let Some(task) = self.inner.listening().accept_task.take() {
            task.abort();
        }
        for (_, connection) in self.inner.connections().drain() {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackMessageFactory;
    use crate::error::ConnectorError;

    fn server() -> Iso8583Server<MsgPackMessageFactory> {
        Iso8583Server::new(
            "127.0.0.1:0".parse().unwrap(),
            ServerConfig::default(),
            MsgPackMessageFactory::new(),
        )
    }

    async fn wait_for_count(server: &Iso8583Server<MsgPackMessageFactory>, count: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while server.connection_count() != count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_requires_init() {
        let server = server();
        assert!(matches!(server.start().await, Err(ConnectorError::NotInitialized)));
        assert!(!server.is_started());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let server = server();
        server.init().unwrap();

        let addr = server.start().await.unwrap();
        assert!(server.is_started());
        assert_eq!(server.local_addr(), Some(addr));
        assert_eq!(server.start().await.unwrap(), addr);

        server.stop().await.unwrap();
        assert!(!server.is_started());
        assert_eq!(server.local_addr(), None);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_tracks_connections() {
        let server = server();
        server.init().unwrap();
        let addr = server.start().await.unwrap();
        let mut events = server.subscribe();

        let socket = tokio::net::TcpStream::connect(addr).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Connected { .. }));
        wait_for_count(&server, 1).await;

        drop(socket);
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Closed { .. }));
        wait_for_count(&server, 0).await;

        server.shutdown().await;
    }
}
