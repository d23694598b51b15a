//! Message logging with cardholder-data masking.
//!
//! Enabled by `add_logging_handler`. Every message is rendered as its MTI
//! followed by one line per present field and emitted with
//! `tracing::debug!`. Unless `log_sensitive_data` is set, the PAN (field 2)
//! keeps only its first 6 and last 4 characters and the configured
//! sensitive fields print as `***`.

use std::fmt::Write;

use crate::config::ConnectorConfig;
use crate::iso::{FieldValue, IsoMessage};

/// Field number of the primary account number.
const PAN_FIELD: u8 = 2;

const MASK_CHAR: char = '*';
const MASKED_VALUE: &str = "***";

/// Direction of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Formats and logs messages.
#[derive(Debug, Clone)]
pub struct MessageLogger {
    log_sensitive_data: bool,
    sensitive_fields: Vec<u8>,
}

impl MessageLogger {
    pub fn new(log_sensitive_data: bool, sensitive_fields: impl Into<Vec<u8>>) -> Self {
        Self {
            log_sensitive_data,
            sensitive_fields: sensitive_fields.into(),
        }
    }

    /// Logger for the given configuration, or `None` when message logging
    /// is disabled.
    pub fn from_config(config: &ConnectorConfig) -> Option<Self> {
        config
            .add_logging_handler
            .then(|| Self::new(config.log_sensitive_data, config.sensitive_data_fields.clone()))
    }

    /// Emit a `DEBUG` event for a message.
    pub fn log<M: IsoMessage>(&self, connection_id: u64, direction: Direction, message: &M) {
        tracing::debug!(
            connection = connection_id,
            direction = direction.as_str(),
            "{}",
            self.format(message)
        );
    }

    /// Render a message, masking sensitive fields as configured.
    pub fn format<M: IsoMessage>(&self, message: &M) -> String {
        let mut out = format!("MTI: 0x{:04x}", message.mti());
        for index in message.field_indices() {
            let Some(value) = message.field(index) else {
                continue;
            };
            let _ = write!(
                out,
                "\n  {}: [{}({})] = '{}'",
                index,
                type_name(value),
                value_length(value),
                self.render(index, value)
            );
        }
        out
    }

    fn render(&self, index: u8, value: &FieldValue) -> String {
        let text = value.to_string();
        if self.log_sensitive_data {
            text
        } else if index == PAN_FIELD {
            mask_pan(&text)
        } else if self.sensitive_fields.contains(&index) {
            MASKED_VALUE.to_string()
        } else {
            text
        }
    }
}

/// Replace everything but the first 6 and last 4 characters with `*`.
fn mask_pan(pan: &str) -> String {
    let len = pan.chars().count();
    pan.chars()
        .enumerate()
        .map(|(i, c)| if i >= 6 && i + 4 < len { MASK_CHAR } else { c })
        .collect()
}

fn type_name(value: &FieldValue) -> &'static str {
    match value {
        FieldValue::Numeric { .. } => "NUMERIC",
        FieldValue::Alpha { .. } => "ALPHA",
        FieldValue::LlVar(_) => "LLVAR",
        FieldValue::LllVar(_) => "LLLVAR",
        FieldValue::Binary(_) => "BINARY",
    }
}

fn value_length(value: &FieldValue) -> usize {
    match value {
        FieldValue::Numeric { length, .. } | FieldValue::Alpha { length, .. } => *length,
        FieldValue::LlVar(s) | FieldValue::LllVar(s) => s.len(),
        FieldValue::Binary(b) => b.len(),
    }
}
