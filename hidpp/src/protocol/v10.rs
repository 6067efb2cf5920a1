//! Implements functionality specific to HID++1.0.

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};

use super::{HidppMessage, HidppMessageHeader, ReportSize};
use crate::error::ProtocolError;

/// Represents the header that every HID++1.0 message starts with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MessageHeader {
    /// The index of the device involved in the communication.
    pub device_index: u8,

    /// The sub ID of the message.
    pub sub_id: u8,

    /// The register address, or the first parameter of a notification.
    pub address: u8,
}

impl From<HidppMessageHeader> for MessageHeader {
    fn from(header: HidppMessageHeader) -> Self {
        Self {
            device_index: header.device_index,
            sub_id: header.feature_index,
            address: header.function_and_sw_id,
        }
    }
}

impl From<MessageHeader> for HidppMessageHeader {
    fn from(header: MessageHeader) -> Self {
        Self {
            device_index: header.device_index,
            feature_index: header.sub_id,
            function_and_sw_id: header.address,
        }
    }
}

/// Represents the type of a HID++1.0 message, as indicated by its sub ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum MessageType {
    SetRegister = 0x80,
    GetRegister = 0x81,
    SetLongRegister = 0x82,
    GetLongRegister = 0x83,
    Error = 0x8f,
}

impl MessageType {
    /// Whether this type reads or writes a register.
    pub fn is_register_access(self) -> bool {
        !matches!(self, Self::Error)
    }

    /// The size of the request carrying this type.
    ///
    /// Long register reads are requested with a short message; their answer
    /// is long.
    pub fn request_size(self) -> ReportSize {
        match self {
            Self::SetLongRegister => ReportSize::Long,
            _ => ReportSize::Short,
        }
    }
}

/// Whether a sub ID lies in the notification range. Notifications are sent
/// unsolicited by receivers and devices.
pub fn is_notification(sub_id: u8) -> bool {
    sub_id < 0x80
}

/// Builds a HID++1.0 register access.
pub fn request(
    kind: MessageType,
    device_index: u8,
    address: u8,
    payload: &[u8],
) -> Result<HidppMessage, ProtocolError> {
    HidppMessage::new(
        kind.request_size(),
        MessageHeader {
            device_index,
            sub_id: kind.into(),
            address,
        }
        .into(),
        payload,
    )
}

/// Represents an error as it may be returned by HID++1.0 devices and
/// receivers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0x00,
    InvalidSubId = 0x01,
    InvalidAddress = 0x02,
    InvalidValue = 0x03,
    ConnectFail = 0x04,
    TooManyDevices = 0x05,
    AlreadyExists = 0x06,
    Busy = 0x07,
    UnknownDevice = 0x08,
    ResourceError = 0x09,
    RequestUnavailable = 0x0a,
    InvalidParamValue = 0x0b,
    WrongPinCode = 0x0c,
    #[num_enum(catch_all)]
    Reserved(u8),
}

/// Represents a HID++1.0 error message.
///
/// Its wire form is `10 DI 8F SUB ADDR CODE 00`, echoing the sub ID and
/// address of the failed request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ErrorMessage {
    /// The header of the request that failed.
    pub request: MessageHeader,

    /// The reported error.
    pub code: ErrorCode,
}

impl ErrorMessage {
    /// Interprets a message as HID++1.0 error message, if it is one.
    pub fn read(msg: &HidppMessage) -> Option<Self> {
        let header = msg.header();
        if header.feature_index != u8::from(MessageType::Error) {
            return None;
        }

        let payload = msg.payload();
        Some(Self {
            request: MessageHeader {
                device_index: header.device_index,
                sub_id: header.function_and_sw_id,
                address: payload[0],
            },
            code: ErrorCode::from(payload[1]),
        })
    }

    /// Builds the wire form of this error message.
    pub fn to_message(&self) -> HidppMessage {
        HidppMessage::Short(
            HidppMessageHeader {
                device_index: self.request.device_index,
                feature_index: MessageType::Error.into(),
                function_and_sw_id: self.request.sub_id,
            },
            [self.request.address, self.code.into(), 0x00],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_echoes_sub_id_and_address() {
        let raw = [0x10, 0xff, 0x8f, 0x80, 0xb2, 0x02, 0x00];
        let msg = HidppMessage::read_raw(&raw).unwrap();
        let err = ErrorMessage::read(&msg).unwrap();

        assert_eq!(err.code, ErrorCode::InvalidAddress);
        assert_eq!(
            err.request,
            MessageHeader {
                device_index: 0xff,
                sub_id: 0x80,
                address: 0xb2
            }
        );
        assert_eq!(err.to_message().to_bytes(), raw);
    }

    #[test]
    fn register_requests() {
        let msg = request(MessageType::SetRegister, 0xff, 0x00, &[0x01]).unwrap();
        assert_eq!(msg.to_bytes(), vec![0x10, 0xff, 0x80, 0x00, 0x01, 0x00, 0x00]);

        let msg = request(MessageType::SetLongRegister, 0xff, 0xb5, &[0x20]).unwrap();
        assert_eq!(msg.size(), ReportSize::Long);
    }

    #[test]
    fn notification_range() {
        assert!(is_notification(0x41));
        assert!(!is_notification(0x81));
        assert_eq!(ErrorCode::from(0x42), ErrorCode::Reserved(0x42));
    }
}
