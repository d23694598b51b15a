//! Connector configuration.
//!
//! [`ConnectorConfig`] is built once, either through
//! [`ConnectorConfig::builder`] or deserialized from JSON, and then shared
//! read-only by every connection of a connector.
//!
//! # Example
//!
//! ```
//! use iso8583_connector::config::ConnectorConfig;
//!
//! let config = ConnectorConfig::builder()
//!     .frame_length_field_length(4)
//!     .encode_frame_length_as_string(true)
//!     .add_echo_message_listener(true)
//!     .build();
//! assert!(config.validate().is_ok());
//!
//! let from_json = ConnectorConfig::from_json(
//!     r#"{"frameLengthFieldLength": 4, "encodeFrameLengthAsString": true}"#,
//! )
//! .unwrap();
//! assert_eq!(from_json.geometry(), config.geometry());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::handler::EchoMatch;
use crate::protocol::{FrameCodec, FrameGeometry, DEFAULT_HEADER_LENGTH, DEFAULT_MAX_FRAME_LENGTH};
use crate::writer::{WriterConfig, DEFAULT_MAX_PENDING_WRITES};

/// Default inactivity window before a heartbeat is sent.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 100;

/// Fields masked in message logs by default (track 2/3 data, PIN data).
pub const DEFAULT_SENSITIVE_FIELDS: [u8; 4] = [34, 35, 36, 45];

/// Settings shared by clients and servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorConfig {
    /// Width of the length field in bytes (binary) or digits (string).
    /// `0` disables framing.
    pub frame_length_field_length: usize,
    /// Number of bytes preceding the length field.
    pub frame_length_field_offset: usize,
    /// Value added to the length field to obtain the body length.
    pub frame_length_field_adjust: i32,
    /// Encode the length field as ASCII decimal instead of big-endian binary.
    pub encode_frame_length_as_string: bool,
    /// Largest accepted body length.
    pub max_frame_length: usize,
    /// Seconds of inactivity before a heartbeat is sent. `0` disables it.
    pub idle_timeout_secs: u64,
    /// Answer network-management requests and send heartbeats on idle.
    pub add_echo_message_listener: bool,
    /// Reply to unparseable messages with an administrative reject.
    pub reply_on_error: bool,
    /// Runtime worker threads; `0` keeps the tokio default.
    pub worker_threads: usize,
    /// Fail-fast dispatch: a listener error closes the connection.
    pub fail_on_listener_error: bool,
    /// Which inbound messages the echo listener answers.
    pub echo_match: EchoMatch,
    /// Log every inbound and outbound message at `DEBUG`.
    pub add_logging_handler: bool,
    /// Print sensitive fields in message logs as-is.
    pub log_sensitive_data: bool,
    /// Fields masked when `log_sensitive_data` is off.
    pub sensitive_data_fields: Vec<u8>,
    /// Outbound messages queued per connection before sends are refused.
    pub max_pending_writes: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            frame_length_field_length: DEFAULT_HEADER_LENGTH,
            frame_length_field_offset: 0,
            frame_length_field_adjust: 0,
            encode_frame_length_as_string: false,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            add_echo_message_listener: false,
            reply_on_error: false,
            worker_threads: 0,
            fail_on_listener_error: true,
            echo_match: EchoMatch::default(),
            add_logging_handler: false,
            log_sensitive_data: true,
            sensitive_data_fields: DEFAULT_SENSITIVE_FIELDS.to_vec(),
            max_pending_writes: DEFAULT_MAX_PENDING_WRITES,
        }
    }
}

impl ConnectorConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder::default()
    }

    /// Load a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check the configuration for values the connector cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.geometry().validate()?;
        if self.max_frame_length == 0 {
            return Err(ConnectorError::InvalidConfig(
                "maxFrameLength must be positive".to_string(),
            ));
        }
        if self.max_pending_writes == 0 || self.max_pending_writes > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConnectorError::InvalidConfig(format!(
                "maxPendingWrites must be in 1..={}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }

    /// Frame layout described by the `frame*` settings.
    pub fn geometry(&self) -> FrameGeometry {
        let geometry = if self.encode_frame_length_as_string {
            FrameGeometry::string(self.frame_length_field_length)
        } else {
            FrameGeometry::binary(self.frame_length_field_length)
        };
        geometry
            .with_offset(self.frame_length_field_offset)
            .with_adjustment(self.frame_length_field_adjust)
    }

    /// Frame codec for this configuration.
    pub fn frame_codec(&self) -> FrameCodec {
        FrameCodec::new(self.geometry(), self.max_frame_length)
    }

    /// Heartbeat window, if heartbeats are enabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        if self.add_echo_message_listener && self.idle_timeout_secs > 0 {
            Some(Duration::from_secs(self.idle_timeout_secs))
        } else {
            None
        }
    }

    /// Writer queue limits.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_pending_writes: self.max_pending_writes,
        }
    }

    /// Multi-threaded runtime builder sized by `worker_threads`.
    pub fn runtime_builder(&self) -> tokio::runtime::Builder {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        if self.worker_threads > 0 {
            builder.worker_threads(self.worker_threads);
        }
        builder
    }
}

/// Fluent builder for [`ConnectorConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfigBuilder {
    config: ConnectorConfig,
}

impl ConnectorConfigBuilder {
    /// Width of the length field.
    pub fn frame_length_field_length(mut self, length: usize) -> Self {
        self.config.frame_length_field_length = length;
        self
    }

    /// Bytes preceding the length field.
    pub fn frame_length_field_offset(mut self, offset: usize) -> Self {
        self.config.frame_length_field_offset = offset;
        self
    }

    /// Length adjustment.
    pub fn frame_length_field_adjust(mut self, adjust: i32) -> Self {
        self.config.frame_length_field_adjust = adjust;
        self
    }

    /// ASCII decimal length field.
    pub fn encode_frame_length_as_string(mut self, enabled: bool) -> Self {
        self.config.encode_frame_length_as_string = enabled;
        self
    }

    /// Largest accepted body length.
    pub fn max_frame_length(mut self, max: usize) -> Self {
        self.config.max_frame_length = max;
        self
    }

    /// Heartbeat window in seconds.
    pub fn idle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.idle_timeout_secs = secs;
        self
    }

    /// Echo listener and idle heartbeats.
    pub fn add_echo_message_listener(mut self, enabled: bool) -> Self {
        self.config.add_echo_message_listener = enabled;
        self
    }

    /// Administrative reject on parse failures.
    pub fn reply_on_error(mut self, enabled: bool) -> Self {
        self.config.reply_on_error = enabled;
        self
    }

    /// Runtime worker threads.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    /// Fail-fast (`true`) or fail-safe (`false`) dispatch.
    pub fn fail_on_listener_error(mut self, enabled: bool) -> Self {
        self.config.fail_on_listener_error = enabled;
        self
    }

    /// Echo matching rule.
    pub fn echo_match(mut self, echo_match: EchoMatch) -> Self {
        self.config.echo_match = echo_match;
        self
    }

    /// Message logging.
    pub fn add_logging_handler(mut self, enabled: bool) -> Self {
        self.config.add_logging_handler = enabled;
        self
    }

    /// Unmasked sensitive fields in message logs.
    pub fn log_sensitive_data(mut self, enabled: bool) -> Self {
        self.config.log_sensitive_data = enabled;
        self
    }

    /// Fields masked in message logs.
    pub fn sensitive_data_fields(mut self, fields: impl Into<Vec<u8>>) -> Self {
        self.config.sensitive_data_fields = fields.into();
        self
    }

    /// Outbound queue limit per connection.
    pub fn max_pending_writes(mut self, max: usize) -> Self {
        self.config.max_pending_writes = max;
        self
    }

    /// Finish building.
    pub fn build(self) -> ConnectorConfig {
        self.config
    }
}

/// Server settings.
pub type ServerConfig = ConnectorConfig;

/// Client settings: connector settings plus the reconnect delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    /// Delay before each reconnection attempt.
    pub reconnect_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
        }
    }
}

impl ClientConfig {
    /// Client settings with the default reconnect delay.
    pub fn new(connector: ConnectorConfig) -> Self {
        Self {
            connector,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
        }
    }

    /// Override the reconnect delay.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Load client settings from JSON (connector keys at the top level).
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reconnect delay.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Validate the connector part.
    pub fn validate(&self) -> Result<()> {
        self.connector.validate()
    }
}

impl From<ConnectorConfig> for ClientConfig {
    fn from(connector: ConnectorConfig) -> Self {
        Self::new(connector)
    }
}
