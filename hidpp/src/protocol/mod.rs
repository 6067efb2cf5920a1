//! Implements the framing shared by HID++1.0 and HID++2.0, and the
//! protocol-specific parts on top of it.
//!
//! Both protocol versions use the same three report sizes and the same four
//! byte header layout; only the meaning of the third and fourth byte differs.
//! [`HidppMessage`] stores these bytes as they are, and [`v10`] and [`v20`]
//! provide typed views on them.

use std::fmt;

use crate::{
    channel::HidppChannel,
    error::{Error, ProtocolError},
    nibble::U4,
};

pub mod v10;
pub mod v20;

/// The report ID of short (7 byte) HID++ messages.
pub const SHORT_REPORT_ID: u8 = 0x10;
/// The total length of short HID++ messages.
pub const SHORT_REPORT_LENGTH: usize = 7;

/// The report ID of long (20 byte) HID++ messages.
pub const LONG_REPORT_ID: u8 = 0x11;
/// The total length of long HID++ messages.
pub const LONG_REPORT_LENGTH: usize = 20;

/// The report ID of very long HID++ messages, used by some registers and
/// bulk transfer features.
pub const VERY_LONG_REPORT_ID: u8 = 0x12;
/// The total length of very long HID++ messages.
pub const VERY_LONG_REPORT_LENGTH: usize = 64;

/// The length of the header every HID++ message starts with, report ID
/// included.
pub const HEADER_LENGTH: usize = 4;

/// The device index addressing the receiver itself, or the only device of a
/// direct connection.
pub const RECEIVER_DEVICE_INDEX: u8 = 0xff;

/// Represents the size class of a HID++ message, selected by its report ID.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReportSize {
    /// 7 bytes, 3 of which are payload.
    Short,

    /// 20 bytes, 16 of which are payload.
    Long,

    /// 64 bytes, 60 of which are payload.
    VeryLong,
}

impl ReportSize {
    /// Determines the size class from a report ID.
    pub const fn from_report_id(report_id: u8) -> Option<Self> {
        match report_id {
            SHORT_REPORT_ID => Some(Self::Short),
            LONG_REPORT_ID => Some(Self::Long),
            VERY_LONG_REPORT_ID => Some(Self::VeryLong),
            _ => None,
        }
    }

    /// The report ID announcing this size class.
    pub const fn report_id(self) -> u8 {
        match self {
            Self::Short => SHORT_REPORT_ID,
            Self::Long => LONG_REPORT_ID,
            Self::VeryLong => VERY_LONG_REPORT_ID,
        }
    }

    /// The total length of messages of this size class.
    pub const fn len(self) -> usize {
        match self {
            Self::Short => SHORT_REPORT_LENGTH,
            Self::Long => LONG_REPORT_LENGTH,
            Self::VeryLong => VERY_LONG_REPORT_LENGTH,
        }
    }

    /// The payload length of messages of this size class.
    pub const fn payload_len(self) -> usize {
        self.len() - HEADER_LENGTH
    }

    /// The smallest size class whose payload can hold `len` bytes.
    pub const fn fitting(len: usize) -> Option<Self> {
        if len <= Self::Short.payload_len() {
            Some(Self::Short)
        } else if len <= Self::Long.payload_len() {
            Some(Self::Long)
        } else if len <= Self::VeryLong.payload_len() {
            Some(Self::VeryLong)
        } else {
            None
        }
    }
}

/// Represents the header that starts every HID++ message.
///
/// The field names follow HID++2.0. For HID++1.0 messages,
/// [`Self::feature_index`] holds the sub ID and [`Self::function_and_sw_id`]
/// the register address; see [`v10::MessageHeader`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HidppMessageHeader {
    /// The index of the device involved in the communication.
    pub device_index: u8,

    /// The index of the feature the message belongs to.
    ///
    /// This is not the same as the feature ID, but the index returned from a
    /// feature enumeration request.
    pub feature_index: u8,

    /// The function (leftmost 4 bits) and software (rightmost 4 bits) IDs.
    pub function_and_sw_id: u8,
}

impl HidppMessageHeader {
    /// The software ID, if this is a HID++2.0 header.
    pub fn software_id(&self) -> U4 {
        U4::from_lo(self.function_and_sw_id)
    }

    /// The function ID, if this is a HID++2.0 header.
    pub fn function_id(&self) -> U4 {
        U4::from_hi(self.function_and_sw_id)
    }
}

/// Represents a HID++ message consisting of a header and payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum HidppMessage {
    /// Represents a short HID++ message that has 3 bytes of payload.
    Short(HidppMessageHeader, [u8; SHORT_REPORT_LENGTH - HEADER_LENGTH]),

    /// Represents a long HID++ message that has 16 bytes of payload.
    Long(HidppMessageHeader, [u8; LONG_REPORT_LENGTH - HEADER_LENGTH]),

    /// Represents a very long HID++ message that has 60 bytes of payload.
    VeryLong(HidppMessageHeader, [u8; VERY_LONG_REPORT_LENGTH - HEADER_LENGTH]),
}

impl HidppMessage {
    /// Builds a message of the given size, zero-padding the payload.
    pub fn new(size: ReportSize, header: HidppMessageHeader, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() > size.payload_len() {
            return Err(ProtocolError::SizeMismatch {
                expected: size.payload_len(),
                actual: payload.len(),
            });
        }

        let mut msg = match size {
            ReportSize::Short => Self::Short(header, [0; SHORT_REPORT_LENGTH - HEADER_LENGTH]),
            ReportSize::Long => Self::Long(header, [0; LONG_REPORT_LENGTH - HEADER_LENGTH]),
            ReportSize::VeryLong => Self::VeryLong(header, [0; VERY_LONG_REPORT_LENGTH - HEADER_LENGTH]),
        };
        msg.payload_mut()[..payload.len()].copy_from_slice(payload);
        Ok(msg)
    }

    /// Tries to read a HID++ message from raw data.
    ///
    /// The data must be exactly as long as the size class announced by the
    /// report ID.
    pub fn read_raw(data: &[u8]) -> Result<Self, ProtocolError> {
        let Some(&report_id) = data.first() else {
            return Err(ProtocolError::ShortFrame {
                expected: HEADER_LENGTH,
                actual: 0,
            });
        };
        let size = ReportSize::from_report_id(report_id).ok_or(ProtocolError::UnknownReportId(report_id))?;

        if data.len() < size.len() {
            return Err(ProtocolError::ShortFrame {
                expected: size.len(),
                actual: data.len(),
            });
        }
        if data.len() > size.len() {
            return Err(ProtocolError::SizeMismatch {
                expected: size.len(),
                actual: data.len(),
            });
        }

        let header = HidppMessageHeader {
            device_index: data[1],
            feature_index: data[2],
            function_and_sw_id: data[3],
        };
        Self::new(size, header, &data[HEADER_LENGTH..])
    }

    /// Writes a HID++ message in its raw byte form into a buffer.
    ///
    /// Returns the amount of written bytes, or
    /// [`ProtocolError::ShortFrame`] if the buffer cannot hold
    /// [`ReportSize::len`] bytes.
    pub fn write_raw(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let len = self.size().len();
        let actual = buf.len();
        let target = buf.get_mut(..len).ok_or(ProtocolError::ShortFrame {
            expected: len,
            actual,
        })?;
        target.copy_from_slice(&self.to_bytes());
        Ok(len)
    }

    /// Returns the raw byte form of the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = self.header();
        let mut buf = Vec::with_capacity(self.size().len());
        buf.extend_from_slice(&[
            self.size().report_id(),
            header.device_index,
            header.feature_index,
            header.function_and_sw_id,
        ]);
        buf.extend_from_slice(self.payload());
        buf
    }

    /// Extracts the header of the HID++ message.
    pub fn header(&self) -> HidppMessageHeader {
        match *self {
            Self::Short(header, _) | Self::Long(header, _) | Self::VeryLong(header, _) => header,
        }
    }

    /// Replaces the header of the HID++ message.
    pub fn set_header(&mut self, new: HidppMessageHeader) {
        match self {
            Self::Short(header, _) | Self::Long(header, _) | Self::VeryLong(header, _) => *header = new,
        }
    }

    /// The size class of the message.
    pub fn size(&self) -> ReportSize {
        match self {
            Self::Short(..) => ReportSize::Short,
            Self::Long(..) => ReportSize::Long,
            Self::VeryLong(..) => ReportSize::VeryLong,
        }
    }

    /// The payload following the header.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Short(_, payload) => payload,
            Self::Long(_, payload) => payload,
            Self::VeryLong(_, payload) => payload,
        }
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Short(_, payload) => payload,
            Self::Long(_, payload) => payload,
            Self::VeryLong(_, payload) => payload,
        }
    }
}

impl fmt::Display for HidppMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.to_bytes()))
    }
}

/// Formats raw report bytes the way they are logged, as space separated
/// upper case hex.
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Represents the protocol version a device supports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProtocolVersion {
    /// The older HID++1.0 protocol. Mostly used for receivers.
    V10,

    /// All newer protocols starting from HID+2.0.
    ///
    /// Traditionally, the version was split into a major and a minor version,
    /// defining the concrete protocol version. These two values were later
    /// redefined to serve the purpose of indicating which host software to
    /// target.
    V20 {
        /// The protocol number is a field that hints the host software if it
        /// should support the device.
        ///
        /// `protocol_num = 2` : Intended target SW is Logitech SetPoint\
        /// `protocol_num = 3` : Intended OEM SW described in `target_sw` field\
        /// `protocol_num = 4` : Intended target SW described in `target_sw`
        /// field
        protocol_num: u8,

        /// When `protocol_num >= 3` this field further hints at which software
        /// should support the device. Otherwise the value is zero.
        target_sw: u8,
    },
}

/// Tries to determine the protocol version of a specific device.
///
/// Returns `Ok(None)` if no device answered for the given device index.
pub async fn determine_version(chan: &HidppChannel, device_index: u8) -> Result<Option<ProtocolVersion>, Error> {
    // To determine the protocol version, we send a HID++2.0 ping (feature index
    // 0x00, function 0x01). Devices supporting protocol >=2.0 respond with
    // their protocol version. Devices only supporting HID++1.0 answer with an
    // error message rejecting 0x00 as sub ID, which the correlator matches to
    // the request because the echoed sub ID and address are our header bytes.
    let ping = v20::request(ReportSize::Short, device_index, 0x00, U4::from_lo(0x1), &[0x00, 0x00, 0x5a])?;

    match chan.send_v20(ping).await {
        Ok(response) => Ok(Some(ProtocolVersion::V20 {
            protocol_num: response.payload()[0],
            target_sw: response.payload()[1],
        })),
        Err(Error::Hidpp10 {
            code: v10::ErrorCode::InvalidSubId,
            ..
        }) => Ok(Some(ProtocolVersion::V10)),
        Err(Error::Hidpp10 {
            code: v10::ErrorCode::UnknownDevice,
            ..
        })
        | Err(Error::Timeout { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_raw_checks_length_against_report_id() {
        assert_eq!(
            HidppMessage::read_raw(&[0x10, 0x01, 0x00]).unwrap_err(),
            ProtocolError::ShortFrame {
                expected: 7,
                actual: 3
            }
        );
        assert_eq!(
            HidppMessage::read_raw(&[0x11, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap_err(),
            ProtocolError::ShortFrame {
                expected: 20,
                actual: 7
            }
        );
        assert_eq!(
            HidppMessage::read_raw(&[0x10; 8]).unwrap_err(),
            ProtocolError::SizeMismatch {
                expected: 7,
                actual: 8
            }
        );
        assert_eq!(
            HidppMessage::read_raw(&[0x01, 0x00]).unwrap_err(),
            ProtocolError::UnknownReportId(0x01)
        );
        assert!(HidppMessage::read_raw(&[]).is_err());
    }

    #[test]
    fn frames_serialize_to_their_size_class() {
        let header = HidppMessageHeader {
            device_index: 0x01,
            feature_index: 0x05,
            function_and_sw_id: 0x18,
        };

        let short = HidppMessage::new(ReportSize::Short, header, &[0x03]).unwrap();
        assert_eq!(short.to_bytes(), vec![0x10, 0x01, 0x05, 0x18, 0x03, 0x00, 0x00]);

        let long = HidppMessage::new(ReportSize::Long, header, &[0xaa; 16]).unwrap();
        assert_eq!(long.to_bytes().len(), LONG_REPORT_LENGTH);
        assert_eq!(HidppMessage::read_raw(&long.to_bytes()).unwrap(), long);

        let very_long = HidppMessage::new(ReportSize::VeryLong, header, &[]).unwrap();
        assert_eq!(very_long.to_bytes()[0], VERY_LONG_REPORT_ID);
        assert_eq!(very_long.to_bytes().len(), VERY_LONG_REPORT_LENGTH);

        assert!(HidppMessage::new(ReportSize::Short, header, &[0; 4]).is_err());
    }

    #[test]
    fn write_raw_refuses_small_buffers() {
        let msg = HidppMessage::read_raw(&[0x10, 0x01, 0x05, 0x18, 0x03, 0x00, 0x00]).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(
            msg.write_raw(&mut buf).unwrap_err(),
            ProtocolError::ShortFrame {
                expected: 7,
                actual: 4
            }
        );
        assert_eq!(buf, [0; 4]);

        let mut buf = [0xeeu8; 9];
        assert_eq!(msg.write_raw(&mut buf), Ok(7));
        assert_eq!(buf, [0x10, 0x01, 0x05, 0x18, 0x03, 0x00, 0x00, 0xee, 0xee]);
    }

    #[test]
    fn display_is_hex_dump() {
        let msg = HidppMessage::read_raw(&[0x10, 0xff, 0x80, 0x00, 0x01, 0x00, 0x00]).unwrap();
        assert_eq!(msg.to_string(), "10 FF 80 00 01 00 00");
        assert_eq!(hex(&[0x10, 0xff, 0x0a]), "10 FF 0A");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn fitting_picks_smallest_size() {
        assert_eq!(ReportSize::fitting(3), Some(ReportSize::Short));
        assert_eq!(ReportSize::fitting(4), Some(ReportSize::Long));
        assert_eq!(ReportSize::fitting(17), Some(ReportSize::VeryLong));
        assert_eq!(ReportSize::fitting(61), None);
    }
}
