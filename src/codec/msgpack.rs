//! MsgPack-backed message factory using `rmp-serde`.
//!
//! This is not an ISO8583 bitmap codec. It stores the MTI and a map of
//! numbered fields and ships them as MessagePack, which is enough to run
//! client and server against each other, in tests and in demos. Production
//! deployments plug in a real field codec through
//! [`MessageFactory`](crate::iso::MessageFactory).
//!
//! # Example
//!
//! ```
//! use iso8583_connector::codec::MsgPackMessageFactory;
//! use iso8583_connector::iso::{FieldValue, IsoMessage, MessageFactory};
//!
//! let factory = MsgPackMessageFactory::new();
//! let mut request = factory.new_message(0x0200);
//! request.set_field(11, FieldValue::numeric(123456, 6));
//!
//! let bytes = factory.serialize(&request).unwrap();
//! let parsed = factory.parse(&bytes).unwrap();
//! assert_eq!(parsed.mti(), 0x0200);
//!
//! let response = factory.create_response(&parsed);
//! assert_eq!(response.mti(), 0x0210);
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, ParseError, Result};
use crate::iso::{FieldValue, Iso8583Version, IsoMessage, MessageFactory};

/// Difference between a request MTI and its response MTI.
const RESPONSE_OFFSET: u16 = 0x0010;

/// Message holding an MTI and numbered fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldMessage {
    mti: u16,
    fields: BTreeMap<u8, FieldValue>,
}

impl FieldMessage {
    /// Empty message of the given type.
    pub fn new(mti: u16) -> Self {
        Self {
            mti,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, index: u8, value: FieldValue) -> Self {
        self.fields.insert(index, value);
        self
    }
}

impl IsoMessage for FieldMessage {
    fn mti(&self) -> u16 {
        self.mti
    }

    fn field(&self, index: u8) -> Option<&FieldValue> {
        self.fields.get(&index)
    }

    fn set_field(&mut self, index: u8, value: FieldValue) {
        self.fields.insert(index, value);
    }

    fn field_indices(&self) -> Vec<u8> {
        self.fields.keys().copied().collect()
    }
}

/// Message factory serializing [`FieldMessage`] as MessagePack maps.
#[derive(Debug, Clone, Default)]
pub struct MsgPackMessageFactory {
    version: Iso8583Version,
}

impl MsgPackMessageFactory {
    /// Factory producing ISO 8583:1987 messages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory producing messages of the given ISO version.
    pub fn with_version(version: Iso8583Version) -> Self {
        Self { version }
    }
}

impl MessageFactory for MsgPackMessageFactory {
    type Message = FieldMessage;

    fn iso_version(&self) -> Iso8583Version {
        self.version
    }

    fn new_message(&self, mti: u16) -> FieldMessage {
        FieldMessage::new(mti)
    }

    /// Response type is the request type with the function digit bumped
    /// (`0x0800` → `0x0810`); all request fields are copied.
    fn create_response(&self, request: &FieldMessage) -> FieldMessage {
        FieldMessage {
            mti: request.mti + RESPONSE_OFFSET,
            fields: request.fields.clone(),
        }
    }

    fn parse(&self, bytes: &[u8]) -> std::result::Result<FieldMessage, ParseError> {
        rmp_serde::from_slice(bytes).map_err(|e| ParseError::new(e.to_string()))
    }

    fn serialize(&self, message: &FieldMessage) -> Result<Bytes> {
        // Struct-as-map keeps the format readable by other MessagePack peers
        rmp_serde::to_vec_named(message)
            .map(Bytes::from)
            .map_err(|e| ConnectorError::Encode(e.to_string()))
    }
}
