//! Implements functionality specific to HID++2.0.

use num_enum::{FromPrimitive, IntoPrimitive};

use super::{HidppMessage, HidppMessageHeader, ReportSize};
use crate::{
    error::ProtocolError,
    nibble::{self, U4},
};

/// The feature index announcing a HID++2.0 error message.
pub const ERROR_FEATURE_INDEX: u8 = 0xff;

/// The software ID carried by events and broadcasts. Requests never use it.
pub const EVENT_SOFTWARE_ID: U4 = U4::from_lo(0);

/// Represents the header that every HID++2.0 message starts with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MessageHeader {
    /// The index of the device involved in the communication.
    pub device_index: u8,

    /// The index of the feature the message belongs to.
    ///
    /// This is not the same as the feature ID, but the index returned from a
    /// feature enumeration request.
    pub feature_index: u8,

    /// The ID of the function involved in the communication.
    pub function_id: U4,

    /// The ID of the software communicating with the device.
    pub software_id: U4,
}

impl MessageHeader {
    /// Whether the header carries the software ID reserved for events.
    pub fn is_event(&self) -> bool {
        self.software_id == EVENT_SOFTWARE_ID
    }
}

impl From<HidppMessageHeader> for MessageHeader {
    fn from(header: HidppMessageHeader) -> Self {
        Self {
            device_index: header.device_index,
            feature_index: header.feature_index,
            function_id: U4::from_hi(header.function_and_sw_id),
            software_id: U4::from_lo(header.function_and_sw_id),
        }
    }
}

impl From<MessageHeader> for HidppMessageHeader {
    fn from(header: MessageHeader) -> Self {
        Self {
            device_index: header.device_index,
            feature_index: header.feature_index,
            function_and_sw_id: nibble::combine(header.function_id, header.software_id),
        }
    }
}

/// Builds a HID++2.0 request with the software ID left at zero. The
/// correlator assigns one when the request is sent.
pub fn request(
    size: ReportSize,
    device_index: u8,
    feature_index: u8,
    function_id: U4,
    payload: &[u8],
) -> Result<HidppMessage, ProtocolError> {
    HidppMessage::new(
        size,
        MessageHeader {
            device_index,
            feature_index,
            function_id,
            software_id: EVENT_SOFTWARE_ID,
        }
        .into(),
        payload,
    )
}

/// Represents the generic error codes of HID++2.0.
///
/// Features may declare additional codes, which are kept as
/// [`ErrorCode::FeatureSpecific`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0x00,
    Unknown = 0x01,
    InvalidArgument = 0x02,
    OutOfRange = 0x03,
    HwError = 0x04,
    LogitechInternal = 0x05,
    InvalidFeatureIndex = 0x06,
    InvalidFunctionId = 0x07,
    Busy = 0x08,
    Unsupported = 0x09,
    #[num_enum(catch_all)]
    FeatureSpecific(u8),
}

/// Represents a HID++2.0 error message.
///
/// Its wire form is `10 DI FF FIDX FID|SWID CODE 00`, echoing the header of
/// the failed request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ErrorMessage {
    /// The header of the request that failed.
    pub request: MessageHeader,

    /// The reported error.
    pub code: ErrorCode,
}

impl ErrorMessage {
    /// Interprets a message as HID++2.0 error message, if it is one.
    pub fn read(msg: &HidppMessage) -> Option<Self> {
        let header = msg.header();
        if header.feature_index != ERROR_FEATURE_INDEX {
            return None;
        }

        let payload = msg.payload();
        Some(Self {
            request: MessageHeader::from(HidppMessageHeader {
                device_index: header.device_index,
                feature_index: header.function_and_sw_id,
                function_and_sw_id: payload[0],
            }),
            code: ErrorCode::from(payload[1]),
        })
    }

    /// Builds the wire form of this error message.
    pub fn to_message(&self) -> HidppMessage {
        let request = HidppMessageHeader::from(self.request);
        HidppMessage::Short(
            HidppMessageHeader {
                device_index: request.device_index,
                feature_index: ERROR_FEATURE_INDEX,
                function_and_sw_id: request.feature_index,
            },
            [request.function_and_sw_id, self.code.into(), 0x00],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_echoes_request_header() {
        let raw = [0x10, 0x01, 0xff, 0x05, 0x18, 0x02, 0x00];
        let msg = HidppMessage::read_raw(&raw).unwrap();
        let err = ErrorMessage::read(&msg).unwrap();

        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(err.request.device_index, 0x01);
        assert_eq!(err.request.feature_index, 0x05);
        assert_eq!(err.request.function_id, U4::from_lo(1));
        assert_eq!(err.request.software_id, U4::from_lo(8));
        assert_eq!(err.to_message().to_bytes(), raw);
    }

    #[test]
    fn unknown_codes_are_feature_specific() {
        assert_eq!(ErrorCode::from(0x0a), ErrorCode::FeatureSpecific(0x0a));
        assert_eq!(u8::from(ErrorCode::FeatureSpecific(0x0a)), 0x0a);
    }

    #[test]
    fn requests_leave_software_id_to_the_correlator() {
        let msg = request(ReportSize::Short, 0x01, 0x00, U4::from_lo(0), &[0x1b, 0x10]).unwrap();
        assert_eq!(msg.to_bytes(), vec![0x10, 0x01, 0x00, 0x00, 0x1b, 0x10, 0x00]);
        assert!(MessageHeader::from(msg.header()).is_event());
    }
}
