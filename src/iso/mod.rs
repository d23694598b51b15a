//! ISO8583 message model.
//!
//! - [`mti`] - message type indicator components and arithmetic
//! - [`IsoMessage`] / [`MessageFactory`] - the narrow interface to the
//!   external field codec

pub mod mti;

mod message;

pub use message::{FieldValue, IsoMessage, MessageFactory};
pub use mti::{mti_value, Iso8583Version, MessageClass, MessageFunction, MessageOrigin};
