//! Message abstraction consumed by the connector.
//!
//! The connector never looks inside a message beyond its MTI and the few
//! fields it writes itself (reject reason code and diagnostic text).
//! Everything else is the business of the [`MessageFactory`]
//! implementation plugged into the connector.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::mti::{mti_value, Iso8583Version, MessageClass, MessageFunction, MessageOrigin};
use crate::error::{ParseError, Result};

/// Value of a single ISO8583 data element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Fixed-width numeric, zero padded to `length` digits.
    Numeric { value: u64, length: usize },
    /// Fixed-width alphanumeric, space padded to `length` characters.
    Alpha { value: String, length: usize },
    /// Variable length with two-digit length prefix.
    LlVar(String),
    /// Variable length with three-digit length prefix.
    LllVar(String),
    /// Raw binary element.
    Binary(Vec<u8>),
}

impl FieldValue {
    /// Numeric element.
    pub fn numeric(value: u64, length: usize) -> Self {
        FieldValue::Numeric { value, length }
    }

    /// LLVAR element.
    pub fn llvar(value: impl Into<String>) -> Self {
        FieldValue::LlVar(value.into())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Numeric { value, length } => write!(f, "{:0width$}", value, width = length),
            FieldValue::Alpha { value, length } => write!(f, "{:<width$}", value, width = length),
            FieldValue::LlVar(value) | FieldValue::LllVar(value) => f.write_str(value),
            FieldValue::Binary(bytes) => {
                for b in bytes {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// An ISO8583 message as seen by the connector.
pub trait IsoMessage: fmt::Debug + Send + Sync + 'static {
    /// Message type indicator, e.g. `0x0200`.
    fn mti(&self) -> u16;

    /// Data element by number (2..=128).
    fn field(&self, index: u8) -> Option<&FieldValue>;

    /// Set or replace a data element.
    fn set_field(&mut self, index: u8, value: FieldValue);

    /// Numbers of all present data elements, ascending.
    fn field_indices(&self) -> Vec<u8>;

    /// Whether a data element is present.
    fn has_field(&self, index: u8) -> bool {
        self.field(index).is_some()
    }
}

/// Creates, parses and serializes messages.
///
/// This is the only door between the connector and the field codec. All
/// four operations are called from connection tasks, so implementations
/// must be cheap and non-blocking.
pub trait MessageFactory: Send + Sync + 'static {
    /// Message type produced by this factory.
    type Message: IsoMessage;

    /// ISO version used for messages synthesized by the connector.
    fn iso_version(&self) -> Iso8583Version {
        Iso8583Version::V1987
    }

    /// Empty message of the given type.
    fn new_message(&self, mti: u16) -> Self::Message;

    /// Empty message built from MTI components and [`iso_version`](Self::iso_version).
    fn new_message_of(
        &self,
        class: MessageClass,
        function: MessageFunction,
        origin: MessageOrigin,
    ) -> Self::Message {
        self.new_message(mti_value(self.iso_version(), class, function, origin))
    }

    /// Response to the given request.
    fn create_response(&self, request: &Self::Message) -> Self::Message;

    /// Parse a frame body.
    fn parse(&self, bytes: &[u8]) -> std::result::Result<Self::Message, ParseError>;

    /// Serialize a message into a frame body.
    fn serialize(&self, message: &Self::Message) -> Result<Bytes>;
}
