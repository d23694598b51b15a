//! Codec module - reference message factory.
//!
//! - [`MsgPackMessageFactory`] - [`FieldMessage`] values as MessagePack
//!   maps via `rmp-serde`
//!
//! # Design
//!
//! Real deployments bring their own ISO8583 field codec by implementing
//! [`MessageFactory`](crate::iso::MessageFactory). The factory here keeps
//! the connector usable end-to-end without one.

mod msgpack;

pub use msgpack::{FieldMessage, MsgPackMessageFactory};
