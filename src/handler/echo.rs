//! Automatic replies to network-management (echo) requests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::listener::MessageListener;
use crate::connection::Connection;
use crate::error::Result;
use crate::iso::mti::function_digit;
use crate::iso::{mti_value, IsoMessage, MessageClass, MessageFactory, MessageFunction, MessageOrigin};

/// Mask selecting the class digit of an MTI.
const CLASS_MASK: u16 = 0x0F00;

/// Which inbound messages count as echo requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EchoMatch {
    /// Only the exact echo request type (`0x0800` for ISO 8583:1987).
    Exact,
    /// Any MTI with the network-management bit set. Also matches
    /// responses such as `0x0810`, so two connectors configured this way
    /// answer each other's answers.
    NetworkManagementClass,
    /// Network-management class with the request function digit, any
    /// origin (`0x0800`..=`0x0805`).
    #[default]
    NetworkManagementRequest,
}

impl EchoMatch {
    /// Whether `mti` is an echo request; `echo_mti` is the exact echo type
    /// for the factory's ISO version.
    pub fn matches(self, mti: u16, echo_mti: u16) -> bool {
        let network_management = MessageClass::NetworkManagement.value();
        match self {
            EchoMatch::Exact => mti == echo_mti,
            EchoMatch::NetworkManagementClass => mti & network_management != 0,
            EchoMatch::NetworkManagementRequest => {
                mti & CLASS_MASK == network_management
                    && function_digit(mti) == MessageFunction::Request.value()
            }
        }
    }
}

/// Heartbeat message for the factory's ISO version.
pub fn echo_request<F: MessageFactory>(factory: &F) -> F::Message {
    factory.new_message_of(
        MessageClass::NetworkManagement,
        MessageFunction::Request,
        MessageOrigin::Acquirer,
    )
}

/// Answers echo requests with the factory's response and stops the chain.
pub struct EchoMessageListener<F> {
    factory: Arc<F>,
    echo_match: EchoMatch,
    echo_mti: u16,
}

impl<F: MessageFactory> EchoMessageListener<F> {
    pub fn new(factory: Arc<F>, echo_match: EchoMatch) -> Self {
        let echo_mti = mti_value(
            factory.iso_version(),
            MessageClass::NetworkManagement,
            MessageFunction::Request,
            MessageOrigin::Acquirer,
        );
        Self {
            factory,
            echo_match,
            echo_mti,
        }
    }
}

impl<F: MessageFactory> MessageListener<F::Message> for EchoMessageListener<F> {
    fn applies(&self, message: &F::Message) -> bool {
        self.echo_match.matches(message.mti(), self.echo_mti)
    }

    fn on_message(&self, connection: &Connection<F::Message>, message: &F::Message) -> Result<bool> {
        let response = self.factory.create_response(message);
        tracing::trace!(
            connection = connection.id(),
            "Answering echo 0x{:04x} with 0x{:04x}",
            message.mti(),
            response.mti()
        );
        connection.send(response)?;
        Ok(false)
    }
}
