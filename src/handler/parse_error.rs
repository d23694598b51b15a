//! Administrative reject replies for unparseable messages.
//!
//! The reply is a `0x0644` (administrative notification, origin "other")
//! with reason code 650 in field 24 and the parser's message in field 44.

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::{ParseError, Result};
use crate::iso::{FieldValue, IsoMessage, MessageClass, MessageFactory, MessageFunction, MessageOrigin};
use crate::writer::WriteCompletion;

/// Function code field.
pub const REASON_CODE_FIELD: u8 = 24;
/// "Unable to parse message".
pub const REASON_CODE_PARSE_ERROR: u64 = 650;
/// Additional response data field.
pub const DETAIL_FIELD: u8 = 44;
/// LLVAR limit of field 44.
pub const DETAIL_MAX_LENGTH: usize = 25;

const ELLIPSIS: &str = "...";

/// Builds and sends reject messages.
pub struct ParseErrorResponder<F> {
    factory: Arc<F>,
}

impl<F: MessageFactory> ParseErrorResponder<F> {
    pub fn new(factory: Arc<F>) -> Self {
        Self { factory }
    }

    /// The reject message for a parse failure.
    pub fn build_reply(&self, error: &ParseError) -> F::Message {
        let mut reply = self.factory.new_message_of(
            MessageClass::Administrative,
            MessageFunction::Notification,
            MessageOrigin::Other,
        );
        reply.set_field(
            REASON_CODE_FIELD,
            FieldValue::numeric(REASON_CODE_PARSE_ERROR, 3),
        );
        reply.set_field(DETAIL_FIELD, FieldValue::llvar(truncate_detail(error.message())));
        reply
    }

    /// Queue the reject message on the connection the failure came from.
    pub fn respond(&self, connection: &Connection<F::Message>, error: &ParseError) -> Result<WriteCompletion> {
        connection.send(self.build_reply(error))
    }
}

/// Fit `detail` into field 44: text longer than the limit keeps its first
/// 22 characters followed by `...`.
pub fn truncate_detail(detail: &str) -> String {
    if detail.chars().count() <= DETAIL_MAX_LENGTH {
        return detail.to_string();
    }
    let keep = DETAIL_MAX_LENGTH - ELLIPSIS.len();
    let mut out: String = detail.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}
