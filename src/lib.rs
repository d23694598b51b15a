//! # iso8583-connector
//!
//! TCP client and server connectors for ISO8583 financial messaging.
//!
//! The crate handles everything between the socket and the application:
//! length-field framing, message parsing through a pluggable
//! [`MessageFactory`](iso::MessageFactory), ordered listener dispatch,
//! echo heartbeats on idle links, administrative rejects for unparseable
//! input, and automatic client reconnection.
//!
//! ## Architecture
//!
//! ```text
//! socket ─► FrameBuffer ─► MessageFactory::parse ─► DispatchChain ─► listeners
//!                                                                      │
//! socket ◄─ writer task (FrameCodec, batching) ◄── Connection::send ◄──┘
//! ```
//!
//! Each connection runs one read task and one writer task. Messages of a
//! connection are dispatched strictly in order; connections run in
//! parallel.
//!
//! ## Example
//!
//! ```ignore
//! use iso8583_connector::codec::{FieldMessage, MsgPackMessageFactory};
//! use iso8583_connector::config::{ClientConfig, ServerConfig};
//! use iso8583_connector::handler::listener_fn;
//! use iso8583_connector::iso::IsoMessage;
//! use iso8583_connector::{Iso8583Client, Iso8583Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Iso8583Server::new(
//!         "127.0.0.1:0".parse()?,
//!         ServerConfig::builder().add_echo_message_listener(true).build(),
//!         MsgPackMessageFactory::new(),
//!     );
//!     server.init()?;
//!     let addr = server.start().await?;
//!
//!     let client = Iso8583Client::new(addr, ClientConfig::default(), MsgPackMessageFactory::new());
//!     client.add_message_listener(listener_fn(
//!         |m: &FieldMessage| m.mti() == 0x0810,
//!         |_connection, _m| Ok(false),
//!     ));
//!     client.init()?;
//!     client.connect().await?;
//!     client.send(FieldMessage::new(0x0800))?.wait().await?;
//!
//!     client.shutdown().await;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod iso;
pub mod logging;
pub mod protocol;
pub mod reconnect;
pub mod transport;

mod client;
mod connection;
mod idle;
mod pipeline;
mod server;
mod writer;

pub use client::{Iso8583Client, DEFAULT_DISCONNECT_TIMEOUT};
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use error::{ConnectorError, ParseError, Result};
pub use idle::IdleMonitor;
pub use server::{Iso8583Server, DEFAULT_STOP_TIMEOUT};
pub use writer::{WriteCompletion, WriterConfig};
