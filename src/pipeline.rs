//! Per-connector processing pipeline shared by client and server.
//!
//! Holds what every connection of a connector needs: configuration,
//! message factory, frame codec, listener chain and event channel. Frames
//! coming out of a connection's read loop go through
//! [`Pipeline::handle_frame`]: parse, log, dispatch, or reject on parse
//! failure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::config::ConnectorConfig;
use crate::connection::{spawn_connection, Connection, ConnectionEvent};
use crate::error::{ConnectorError, ParseError, Result};
use crate::handler::{echo_request, DispatchChain, EchoMessageListener, ParseErrorResponder};
use crate::idle::IdleMonitor;
use crate::iso::MessageFactory;
use crate::logging::{Direction, MessageLogger};
use crate::protocol::FrameCodec;

/// Capacity of the connection event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub(crate) struct Pipeline<F: MessageFactory> {
    config: Arc<ConnectorConfig>,
    factory: Arc<F>,
    codec: FrameCodec,
    chain: DispatchChain<F::Message>,
    logger: Option<Arc<MessageLogger>>,
    responder: Option<ParseErrorResponder<F>>,
    events: broadcast::Sender<ConnectionEvent>,
    next_id: AtomicU64,
    initialized: AtomicBool,
}

impl<F: MessageFactory> Pipeline<F> {
    pub(crate) fn new(config: ConnectorConfig, factory: F) -> Self {
        let factory = Arc::new(factory);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            codec: config.frame_codec(),
            chain: DispatchChain::new(config.fail_on_listener_error),
            logger: MessageLogger::from_config(&config).map(Arc::new),
            responder: config
                .reply_on_error
                .then(|| ParseErrorResponder::new(factory.clone())),
            config: Arc::new(config),
            factory,
            events,
            next_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
        }
    }

    /// Validate the configuration and register built-in listeners.
    /// Repeated calls are no-ops.
    pub(crate) fn init(&self) -> Result<()> {
        self.config.validate()?;
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.config.add_echo_message_listener {
            self.chain.insert_first(Arc::new(EchoMessageListener::new(
                self.factory.clone(),
                self.config.echo_match,
            )));
        }
        Ok(())
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ConnectorError::NotInitialized)
        }
    }

    pub(crate) fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub(crate) fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    pub(crate) fn codec(&self) -> FrameCodec {
        self.codec
    }

    pub(crate) fn chain(&self) -> &DispatchChain<F::Message> {
        &self.chain
    }

    pub(crate) fn logger(&self) -> Option<Arc<MessageLogger>> {
        self.logger.clone()
    }

    pub(crate) fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Wrap an accepted or connected socket in a [`Connection`].
    pub(crate) fn attach(self: &Arc<Self>, stream: TcpStream) -> Connection<F::Message> {
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        spawn_connection(self.clone(), reader, writer, peer_addr)
    }

    /// Parse one frame body and dispatch the message.
    ///
    /// Parse failures are handled here and never returned; dispatch errors
    /// (fail-fast mode) are returned and close the connection.
    pub(crate) fn handle_frame(&self, connection: &Connection<F::Message>, body: Bytes) -> Result<()> {
        match self.factory.parse(&body) {
            Ok(message) => {
                if let Some(logger) = &self.logger {
                    logger.log(connection.id(), Direction::Inbound, &message);
                }
                self.chain.dispatch(connection, &message)
            }
            Err(error) => {
                self.handle_parse_error(connection, error);
                Ok(())
            }
        }
    }

    fn handle_parse_error(&self, connection: &Connection<F::Message>, error: ParseError) {
        tracing::warn!(connection = connection.id(), "Can't parse message: {}", error);

        if let Some(responder) = &self.responder {
            if let Err(e) = responder.respond(connection, &error) {
                tracing::warn!(connection = connection.id(), "Can't send reject message: {}", e);
            }
        }

        self.publish(ConnectionEvent::Error {
            connection_id: connection.id(),
            error: Arc::new(ConnectorError::Parse(error)),
        });
    }

    /// Queue an echo request after an idle window.
    pub(crate) fn send_heartbeat(&self, connection: &Connection<F::Message>, idle: &IdleMonitor) {
        match connection.send(echo_request(self.factory.as_ref())) {
            Ok(_) => {
                idle.record_activity();
                tracing::trace!(connection = connection.id(), "Sent heartbeat");
            }
            Err(e) => {
                tracing::warn!(connection = connection.id(), "Can't send heartbeat: {}", e);
            }
        }
    }
}
