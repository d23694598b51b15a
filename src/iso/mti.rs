//! Message type indicator arithmetic.
//!
//! An MTI is four hex-coded decimal digits: version, class, function,
//! origin. `0x0800` is a 1987 network-management request from the
//! acquirer; `0x0644` is a 1987 administrative notification from "other".

/// First MTI digit: ISO 8583 version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Iso8583Version {
    /// ISO 8583:1987
    #[default]
    V1987,
    /// ISO 8583:1993
    V1993,
    /// ISO 8583:2003
    V2003,
    /// National use
    National,
    /// Private use
    Private,
}

impl Iso8583Version {
    /// Digit value in MTI position.
    pub const fn value(self) -> u16 {
        match self {
            Iso8583Version::V1987 => 0x0000,
            Iso8583Version::V1993 => 0x1000,
            Iso8583Version::V2003 => 0x2000,
            Iso8583Version::National => 0x8000,
            Iso8583Version::Private => 0x9000,
        }
    }
}

/// Second MTI digit: overall purpose of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    /// x1xx
    Authorization,
    /// x2xx
    Financial,
    /// x3xx
    FileActions,
    /// x4xx
    ReversalChargeback,
    /// x5xx
    Reconciliation,
    /// x6xx, often used for failure messages such as message reject.
    Administrative,
    /// x7xx
    FeeCollection,
    /// x8xx: key exchange, logon, echo test.
    NetworkManagement,
}

impl MessageClass {
    /// Digit value in MTI position.
    pub const fn value(self) -> u16 {
        match self {
            MessageClass::Authorization => 0x0100,
            MessageClass::Financial => 0x0200,
            MessageClass::FileActions => 0x0300,
            MessageClass::ReversalChargeback => 0x0400,
            MessageClass::Reconciliation => 0x0500,
            MessageClass::Administrative => 0x0600,
            MessageClass::FeeCollection => 0x0700,
            MessageClass::NetworkManagement => 0x0800,
        }
    }

    /// Class encoded in the given MTI, if any.
    pub fn of(mti: u16) -> Option<Self> {
        match mti & 0x0F00 {
            0x0100 => Some(MessageClass::Authorization),
            0x0200 => Some(MessageClass::Financial),
            0x0300 => Some(MessageClass::FileActions),
            0x0400 => Some(MessageClass::ReversalChargeback),
            0x0500 => Some(MessageClass::Reconciliation),
            0x0600 => Some(MessageClass::Administrative),
            0x0700 => Some(MessageClass::FeeCollection),
            0x0800 => Some(MessageClass::NetworkManagement),
            _ => None,
        }
    }
}

/// Third MTI digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFunction {
    /// xx0x
    Request,
    /// xx1x
    RequestResponse,
    /// xx2x
    Advice,
    /// xx3x
    AdviceResponse,
    /// xx4x
    Notification,
    /// xx5x
    NotificationAck,
    /// xx6x (ISO 8583:2003)
    Instruction,
    /// xx7x
    InstructionAck,
    /// xx8x, some networks use it for positive acknowledgment.
    Reserved8,
    /// xx9x, some networks use it for negative acknowledgment.
    Reserved9,
}

impl MessageFunction {
    /// Digit value in MTI position.
    pub const fn value(self) -> u16 {
        match self {
            MessageFunction::Request => 0x0000,
            MessageFunction::RequestResponse => 0x0010,
            MessageFunction::Advice => 0x0020,
            MessageFunction::AdviceResponse => 0x0030,
            MessageFunction::Notification => 0x0040,
            MessageFunction::NotificationAck => 0x0050,
            MessageFunction::Instruction => 0x0060,
            MessageFunction::InstructionAck => 0x0070,
            MessageFunction::Reserved8 => 0x0080,
            MessageFunction::Reserved9 => 0x0090,
        }
    }
}

/// Fourth MTI digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageOrigin {
    /// xxx0
    Acquirer,
    /// xxx1
    AcquirerRepeat,
    /// xxx2
    Issuer,
    /// xxx3
    IssuerRepeat,
    /// xxx4
    Other,
    /// xxx5
    OtherRepeat,
}

impl MessageOrigin {
    /// Digit value in MTI position.
    pub const fn value(self) -> u16 {
        match self {
            MessageOrigin::Acquirer => 0x0000,
            MessageOrigin::AcquirerRepeat => 0x0001,
            MessageOrigin::Issuer => 0x0002,
            MessageOrigin::IssuerRepeat => 0x0003,
            MessageOrigin::Other => 0x0004,
            MessageOrigin::OtherRepeat => 0x0005,
        }
    }
}

/// Compose an MTI from its four components.
pub const fn mti_value(
    version: Iso8583Version,
    class: MessageClass,
    function: MessageFunction,
    origin: MessageOrigin,
) -> u16 {
    version.value() + class.value() + function.value() + origin.value()
}

/// Function digit of an MTI.
#[inline]
pub fn function_digit(mti: u16) -> u16 {
    mti & 0x00F0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mti_value() {
        assert_eq!(
            mti_value(
                Iso8583Version::V1987,
                MessageClass::NetworkManagement,
                MessageFunction::Request,
                MessageOrigin::Acquirer
            ),
            0x0800
        );
        assert_eq!(
            mti_value(
                Iso8583Version::V1987,
                MessageClass::Administrative,
                MessageFunction::Notification,
                MessageOrigin::Other
            ),
            0x0644
        );
        assert_eq!(
            mti_value(
                Iso8583Version::V1993,
                MessageClass::Financial,
                MessageFunction::RequestResponse,
                MessageOrigin::Issuer
            ),
            0x1212
        );
        assert_eq!(
            mti_value(
                Iso8583Version::Private,
                MessageClass::Authorization,
                MessageFunction::Reserved9,
                MessageOrigin::OtherRepeat
            ),
            0x9195
        );
    }

    #[test]
    fn test_class_of() {
        assert_eq!(MessageClass::of(0x0800), Some(MessageClass::NetworkManagement));
        assert_eq!(MessageClass::of(0x1810), Some(MessageClass::NetworkManagement));
        assert_eq!(MessageClass::of(0x0200), Some(MessageClass::Financial));
        assert_eq!(MessageClass::of(0x0000), None);
    }

    #[test]
    fn test_function_digit() {
        assert_eq!(function_digit(0x0800), 0x0000);
        assert_eq!(function_digit(0x0810), 0x0010);
        assert_eq!(function_digit(0x0644), 0x0040);
    }
}
