//! Describes HID++1.0 registers and the notifications receivers send.
//!
//! A register is addressed by a single byte. Reads and writes use different
//! sub IDs depending on the size of the value, see [`MessageType`]. Each
//! access direction of a register has its own request and response
//! [`Schema`]; [`HidppChannel::read_register`] and
//! [`HidppChannel::write_register`] take care of framing and decoding.
//!
//! [`HidppChannel::read_register`]: crate::channel::HidppChannel::read_register
//! [`HidppChannel::write_register`]: crate::channel::HidppChannel::write_register

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    bitfield::{BitMessage, Check, FieldDescriptor, Schema},
    error::{Error, ProtocolError},
    protocol::{HidppMessage, ReportSize, v10::MessageType},
    queue::QueueName,
};

/// Describes one access direction of a register.
#[derive(Debug)]
pub struct RegisterAccess {
    /// The sub ID used for the access.
    pub kind: MessageType,

    /// The layout of the request parameters.
    pub request: &'static Schema,

    /// The layout of the reply payload.
    pub response: &'static Schema,

    /// The size class the reply must arrive in.
    pub response_size: ReportSize,
}

impl RegisterAccess {
    pub const fn new(
        kind: MessageType,
        request: &'static Schema,
        response: &'static Schema,
        response_size: ReportSize,
    ) -> Self {
        Self {
            kind,
            request,
            response,
            response_size,
        }
    }

    /// Decodes a reply, refusing it if it does not arrive in the declared
    /// size class.
    ///
    /// Short replies arriving in long form are accepted, as links carrying
    /// long reports only answer that way.
    pub fn decode(&self, reply: &HidppMessage) -> Result<BitMessage, Error> {
        let accepted = reply.size() == self.response_size
            || (self.response_size == ReportSize::Short && reply.size() == ReportSize::Long);
        if !accepted {
            return Err(ProtocolError::SizeMismatch {
                expected: self.response_size.len(),
                actual: reply.size().len(),
            }
            .into());
        }
        Ok(BitMessage::parse(self.response, reply.payload())?)
    }
}

/// Describes a HID++1.0 register.
#[derive(Debug)]
pub struct RegisterDescriptor {
    pub address: u8,
    pub name: &'static str,
    pub read: Option<RegisterAccess>,
    pub write: Option<RegisterAccess>,
}

/// Describes a notification a receiver or device may send unsolicited.
#[derive(Debug)]
pub struct NotificationDescriptor {
    /// The sub ID identifying the notification.
    pub sub_id: u8,

    pub name: &'static str,

    /// The layout of the payload following the address byte.
    pub schema: &'static Schema,

    /// The queue the dispatcher routes the notification to.
    pub queue: QueueName,
}

static SHORT_PADDING: Schema = Schema::new("ShortRegisterRequest", &[FieldDescriptor::new(0xfa, 24, "Padding", "padding")]);

static REPORTING_FLAGS: Schema = Schema::new("HidppReportingFlags", &[
    FieldDescriptor::new(0xfa, 8, "Flags R0", "flags_r0"),
    FieldDescriptor::new(0xf9, 8, "Flags R1", "flags_r1"),
    FieldDescriptor::new(0xf8, 8, "Flags R2", "flags_r2"),
]);

pub static ENABLE_HIDPP_REPORTING: RegisterDescriptor = RegisterDescriptor {
    address: 0x00,
    name: "EnableHidppReporting",
    read: Some(RegisterAccess::new(
        MessageType::GetRegister,
        &SHORT_PADDING,
        &REPORTING_FLAGS,
        ReportSize::Short,
    )),
    write: Some(RegisterAccess::new(
        MessageType::SetRegister,
        &REPORTING_FLAGS,
        &REPORTING_FLAGS,
        ReportSize::Short,
    )),
};

static CONNECTION_STATE: Schema = Schema::new("ConnectionState", &[
    FieldDescriptor::new(0xfa, 8, "Reserved", "reserved"),
    FieldDescriptor::new(0xf9, 8, "Connected Devices", "connected_devices").with_aliases(&["connectedDevices"]),
    FieldDescriptor::new(0xf8, 8, "Padding", "padding"),
]);

static CONNECTION_ACTION: Schema = Schema::new("ConnectionAction", &[
    FieldDescriptor::new(0xfa, 8, "Action", "action").with_checks(&[Check::OneOf(&[0x00, 0x02])]),
    FieldDescriptor::new(0xf9, 16, "Padding", "padding"),
]);

pub static CONNECTION_STATE_REGISTER: RegisterDescriptor = RegisterDescriptor {
    address: 0x02,
    name: "ConnectionState",
    read: Some(RegisterAccess::new(
        MessageType::GetRegister,
        &SHORT_PADDING,
        &CONNECTION_STATE,
        ReportSize::Short,
    )),
    write: Some(RegisterAccess::new(
        MessageType::SetRegister,
        &CONNECTION_ACTION,
        &SHORT_PADDING,
        ReportSize::Short,
    )),
};

/// The [`CONNECTION_STATE_REGISTER`] action making the receiver announce all
/// connected devices with connection notifications.
pub const FAKE_DEVICE_ARRIVAL: u8 = 0x02;

static PAIRING_ACTION: Schema = Schema::new("PairingAction", &[
    FieldDescriptor::new(0xfa, 8, "Action", "action").with_checks(&[Check::OneOf(&[0x01, 0x02, 0x03])]),
    FieldDescriptor::new(0xf9, 8, "Device Index", "device_index").with_aliases(&["deviceNumber"]),
    FieldDescriptor::new(0xf8, 8, "Timeout", "timeout"),
]);

pub static PAIRING: RegisterDescriptor = RegisterDescriptor {
    address: 0xb2,
    name: "Pairing",
    read: None,
    write: Some(RegisterAccess::new(
        MessageType::SetRegister,
        &PAIRING_ACTION,
        &SHORT_PADDING,
        ReportSize::Short,
    )),
};

/// The actions of the [`PAIRING`] register.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum PairingAction {
    OpenLock = 0x01,
    CloseLock = 0x02,
    Unpair = 0x03,
}

static PAIRING_INFORMATION_REQUEST: Schema = Schema::new("PairingInformationRequest", &[
    FieldDescriptor::new(0xfa, 8, "Sub Register", "sub_register").with_aliases(&["subRegister"]),
    FieldDescriptor::new(0xf9, 16, "Padding", "padding"),
]);

static PAIRING_INFORMATION: Schema = Schema::new("PairingInformation", &[
    FieldDescriptor::new(0xfa, 8, "Sub Register", "sub_register").with_aliases(&["subRegister"]),
    FieldDescriptor::new(0xf9, 8, "Destination ID", "destination_id"),
    FieldDescriptor::new(0xf8, 8, "Report Interval", "report_interval"),
    FieldDescriptor::new(0xf7, 16, "Wireless PID", "wpid"),
    FieldDescriptor::new(0xf6, 16, "Reserved", "reserved"),
    FieldDescriptor::new(0xf5, 8, "Device Type", "device_type").with_aliases(&["deviceType"]),
    FieldDescriptor::new(0xf4, 64, "Reserved", "reserved_tail"),
]);

pub static NON_VOLATILE_PAIRING_INFORMATION: RegisterDescriptor = RegisterDescriptor {
    address: 0xb5,
    name: "NonVolatilePairingInformation",
    read: Some(RegisterAccess::new(
        MessageType::GetLongRegister,
        &PAIRING_INFORMATION_REQUEST,
        &PAIRING_INFORMATION,
        ReportSize::Long,
    )),
    write: None,
};

/// The sub register of [`NON_VOLATILE_PAIRING_INFORMATION`] holding the
/// pairing of the first device. Device `n` uses this value plus `n - 1`.
pub const PAIRING_INFORMATION_SUB_REGISTER: u8 = 0x20;

/// All registers known to the harness.
pub static REGISTERS: [&RegisterDescriptor; 4] = [
    &ENABLE_HIDPP_REPORTING,
    &CONNECTION_STATE_REGISTER,
    &PAIRING,
    &NON_VOLATILE_PAIRING_INFORMATION,
];

/// Looks up a register by its address.
pub fn lookup(address: u8) -> Option<&'static RegisterDescriptor> {
    REGISTERS.iter().copied().find(|register| register.address == address)
}

static DEVICE_DISCONNECTION: Schema = Schema::new("DeviceDisconnection", &[
    FieldDescriptor::new(0xfa, 24, "Padding", "padding"),
]);

static DEVICE_CONNECTION: Schema = Schema::new("DeviceConnection", &[
    FieldDescriptor::new(0xfa, 1, "Reserved", "reserved"),
    FieldDescriptor::new(0xf9, 1, "Link Not Established", "link_not_established"),
    FieldDescriptor::new(0xf8, 1, "Encrypted", "encrypted"),
    FieldDescriptor::new(0xf7, 1, "Reserved", "reserved_info"),
    FieldDescriptor::new(0xf6, 4, "Device Type", "device_type").with_aliases(&["deviceType"]),
    FieldDescriptor::new(0xf5, 16, "Wireless PID", "wpid"),
]);

pub const DEVICE_DISCONNECTION_SUB_ID: u8 = 0x40;
pub const DEVICE_CONNECTION_SUB_ID: u8 = 0x41;

pub static NOTIFICATIONS: [NotificationDescriptor; 2] = [
    NotificationDescriptor {
        sub_id: DEVICE_DISCONNECTION_SUB_ID,
        name: "DeviceDisconnection",
        schema: &DEVICE_DISCONNECTION,
        queue: QueueName::ReceiverConnectionEvent,
    },
    NotificationDescriptor {
        sub_id: DEVICE_CONNECTION_SUB_ID,
        name: "DeviceConnection",
        schema: &DEVICE_CONNECTION,
        queue: QueueName::ReceiverConnectionEvent,
    },
];

/// Looks up a notification by its sub ID.
pub fn notification(sub_id: u8) -> Option<&'static NotificationDescriptor> {
    NOTIFICATIONS.iter().find(|notification| notification.sub_id == sub_id)
}

bitflags! {
    /// The notification flags of the [`ENABLE_HIDPP_REPORTING`] register, as
    /// the three register bytes read in big endian order.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ReportingFlags: u32 {
        const NUMPAD_NUMERICAL_KEYS = 0x80_0000;
        const F_LOCK_STATUS = 0x40_0000;
        const ROLLER_H = 0x20_0000;
        const BATTERY_STATUS = 0x10_0000;
        const MOUSE_EXTRA_BUTTONS = 0x08_0000;
        const ROLLER_V = 0x04_0000;
        const KEYBOARD_SLEEP_RAW = 0x02_0000;
        const KEYBOARD_MULTIMEDIA_RAW = 0x01_0000;
        const SOFTWARE_PRESENT = 0x00_0800;
        const KEYBOARD_ILLUMINATION = 0x00_0200;
        const WIRELESS = 0x00_0100;

        const _ = !0;
    }
}

impl ReportingFlags {
    /// Builds the register value holding these flags.
    pub fn to_message(self) -> Result<BitMessage, Error> {
        let [_, r0, r1, r2] = self.bits().to_be_bytes();
        Ok(BitMessage::new(&REPORTING_FLAGS)
            .with("flags_r0", r0)?
            .with("flags_r1", r1)?
            .with("flags_r2", r2)?)
    }
}

impl TryFrom<&BitMessage> for ReportingFlags {
    type Error = Error;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        let bits = ["flags_r0", "flags_r1", "flags_r2"]
            .iter()
            .try_fold(0u32, |acc, name| Ok::<_, Error>((acc << 8) | msg.uint(name)? as u32))?;
        Ok(Self::from_bits_retain(bits))
    }
}

/// Represents the pairing of a device as stored in the receiver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct PairingInformation {
    pub destination_id: u8,

    /// The report interval in milliseconds.
    pub report_interval: u8,

    /// The wireless product ID of the device.
    pub wpid: u16,

    pub device_type: u8,
}

impl TryFrom<&BitMessage> for PairingInformation {
    type Error = Error;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            destination_id: msg.uint("destination_id")? as u8,
            report_interval: msg.uint("report_interval")? as u8,
            wpid: msg.uint("wpid")? as u16,
            device_type: msg.uint("device_type")? as u8,
        })
    }
}

/// Represents the link protocol a receiver reports in connection
/// notifications, carried in the address byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum LogitechProtocol {
    Unknown = 0x00,
    Bluetooth = 0x01,
    Mhz27 = 0x02,
    QuadEquad = 0x03,
    EQuadStep4Dj = 0x04,
    DfuLite = 0x05,
    EQuadStep4Lite = 0x06,
    EQuadStep4Gaming = 0x07,
    EQuadStep4GamepadTi = 0x08,
    Gotthard = 0x09,
    UnifyingV2 = 0x0b,
    Ls1_0 = 0x0c,
    Ls1_1 = 0x0d,
    Ls2Llpm = 0x0e,
    Ls2Ca = 0x0f,
    BlePro = 0x10,
    Ls2CaCrc24 = 0x11,
}

/// Represents the data of a device connection notification.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct DeviceConnection {
    /// The index of the device used to communicate with it.
    pub device_index: u8,

    pub protocol: LogitechProtocol,

    /// The kind of the device, in the numbering of the link protocol.
    pub device_type: u8,

    /// Whether the link to the device is encrypted.
    pub encrypted: bool,

    /// Whether the device is online/reachable.
    pub online: bool,

    /// The wireless product ID of the device.
    pub wpid: u16,
}

impl DeviceConnection {
    /// Interprets a HID++1.0 message as device connection notification.
    pub fn read(msg: &HidppMessage) -> Result<Self, Error> {
        let header = msg.header();
        if header.feature_index != DEVICE_CONNECTION_SUB_ID {
            return Err(Error::UnsupportedResponse);
        }

        let payload = BitMessage::parse(&DEVICE_CONNECTION, msg.payload())?;
        Ok(Self {
            device_index: header.device_index,
            protocol: LogitechProtocol::try_from(header.function_and_sw_id).unwrap_or(LogitechProtocol::Unknown),
            device_type: payload.uint("device_type")? as u8,
            encrypted: payload.uint("encrypted")? != 0,
            online: payload.uint("link_not_established")? == 0,
            // The wireless PID is sent in little endian order.
            wpid: (payload.uint("wpid")? as u16).swap_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::v10;

    #[test]
    fn every_register_layout_is_consistent() {
        for register in REGISTERS {
            for access in [&register.read, &register.write].into_iter().flatten() {
                access.request.validate_layout().unwrap();
                access.response.validate_layout().unwrap();
                assert!(access.request.byte_len() <= access.kind.request_size().payload_len());
                assert!(access.response.byte_len() <= access.response_size.payload_len());
            }
            assert_eq!(lookup(register.address).unwrap().name, register.name);
        }
        for notification in &NOTIFICATIONS {
            notification.schema.validate_layout().unwrap();
        }
    }

    #[test]
    fn reporting_flags_span_three_bytes() {
        let flags = ReportingFlags::BATTERY_STATUS | ReportingFlags::WIRELESS;
        let msg = flags.to_message().unwrap();
        assert_eq!(msg.serialize().unwrap(), vec![0x10, 0x01, 0x00]);
        assert_eq!(ReportingFlags::try_from(&msg).unwrap(), flags);
    }

    #[test]
    fn replies_in_the_wrong_size_class_are_refused() {
        static VERY_LONG_VALUE: Schema = Schema::new("VeryLongValue", &[FieldDescriptor::new(0xfa, 480, "Data", "data")]);
        let access = RegisterAccess::new(
            MessageType::GetLongRegister,
            &SHORT_PADDING,
            &VERY_LONG_VALUE,
            ReportSize::VeryLong,
        );

        let long = HidppMessage::read_raw(&[0x11; 20]).unwrap();
        assert!(matches!(
            access.decode(&long),
            Err(Error::Protocol(ProtocolError::SizeMismatch {
                expected: 64,
                actual: 20
            }))
        ));

        let short_access = ENABLE_HIDPP_REPORTING.read.as_ref().unwrap();
        let mut raw = [0u8; 20];
        raw[0] = 0x11;
        raw[4] = 0x10;
        let flags = short_access.decode(&HidppMessage::read_raw(&raw).unwrap()).unwrap();
        assert_eq!(flags.uint("flags_r0").unwrap(), 0x10);

        let mut raw = [0u8; 64];
        raw[0] = 0x12;
        raw[4] = 0xab;
        let very_long = HidppMessage::read_raw(&raw).unwrap();
        assert_eq!(access.decode(&very_long).unwrap().bytes("data").unwrap()[0], 0xab);
    }

    #[test]
    fn connection_notification_decodes() {
        let msg = HidppMessage::read_raw(&[0x10, 0x02, 0x41, 0x10, 0x22, 0x7b, 0x40]).unwrap();
        assert!(v10::is_notification(msg.header().feature_index));

        let connection = DeviceConnection::read(&msg).unwrap();
        assert_eq!(connection.device_index, 0x02);
        assert_eq!(connection.protocol, LogitechProtocol::BlePro);
        assert_eq!(connection.device_type, 0x02);
        assert!(connection.encrypted);
        assert!(connection.online);
        assert_eq!(connection.wpid, 0x407b);
    }
}
