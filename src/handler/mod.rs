//! Handler module - inbound message dispatch.
//!
//! Provides:
//! - [`MessageListener`] - predicate + handler pair, [`listener_fn`] for closures
//! - [`DispatchChain`] - ordered listeners with fail-fast / fail-safe dispatch
//! - [`EchoMessageListener`] - automatic echo replies
//! - [`ParseErrorResponder`] - administrative reject for unparseable input
//!
//! # Example
//!
//! ```
//! use iso8583_connector::codec::FieldMessage;
//! use iso8583_connector::handler::{listener_fn, DispatchChain};
//! use iso8583_connector::iso::IsoMessage;
//!
//! let chain = DispatchChain::new(true);
//! chain.add_listener(listener_fn(
//!     |m: &FieldMessage| m.mti() == 0x0200,
//!     |_connection, _m| Ok(true),
//! ));
//! assert_eq!(chain.len(), 1);
//! ```

mod chain;
mod echo;
mod listener;
mod parse_error;

pub use chain::DispatchChain;
pub use echo::{echo_request, EchoMatch, EchoMessageListener};
pub use listener::{listener_fn, ListenerRef, MessageListener};
pub use parse_error::{
    truncate_detail, ParseErrorResponder, DETAIL_FIELD, DETAIL_MAX_LENGTH, REASON_CODE_FIELD,
    REASON_CODE_PARSE_ERROR,
};
