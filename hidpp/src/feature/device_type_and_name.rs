//! Implements the DeviceTypeAndName feature (ID `0x0005`) that provides the
//! marketing name and type of a device.

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{
    CreatableFeature,
    Feature,
    FeatureDescriptor,
    FeatureError,
    FeatureFactory,
    FeatureFamily,
    FeatureHandle,
    FunctionDescriptor,
};
use crate::{
    bitfield::{BitMessage, FieldDescriptor, Schema},
    channel::HidppChannel,
    error::Error,
};

static EMPTY_REQUEST: Schema = Schema::new("DeviceTypeAndNameRequest", &[FieldDescriptor::new(
    0xfa,
    24,
    "Padding",
    "padding",
)]);

static GET_DEVICE_NAME_COUNT_RESPONSE: Schema = Schema::new("GetDeviceNameCountResponse", &[
    FieldDescriptor::new(0xfa, 8, "Device Name Count", "device_name_count").with_aliases(&["deviceNameCount"]),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

static GET_DEVICE_NAME_REQUEST: Schema = Schema::new("GetDeviceName", &[
    FieldDescriptor::new(0xfa, 8, "Char Index", "char_index").with_aliases(&["charIndex"]),
    FieldDescriptor::new(0xf9, 16, "Padding", "padding"),
]);

static GET_DEVICE_NAME_RESPONSE: Schema = Schema::new("GetDeviceNameResponse", &[FieldDescriptor::new(
    0xfa,
    128,
    "Device Name",
    "device_name",
)
.with_aliases(&["deviceName"])]);

static GET_DEVICE_TYPE_RESPONSE: Schema = Schema::new("GetDeviceTypeResponse", &[
    FieldDescriptor::new(0xfa, 8, "Device Type", "device_type").with_aliases(&["deviceType"]),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

// The name and type functions did not change across versions; newer versions
// only extended the list of device types.
static FUNCTIONS: [FunctionDescriptor; 3] = [
    FunctionDescriptor::new(0, "getDeviceNameCount", &EMPTY_REQUEST, &GET_DEVICE_NAME_COUNT_RESPONSE),
    FunctionDescriptor::new(1, "getDeviceName", &GET_DEVICE_NAME_REQUEST, &GET_DEVICE_NAME_RESPONSE),
    FunctionDescriptor::new(2, "getDeviceType", &EMPTY_REQUEST, &GET_DEVICE_TYPE_RESPONSE),
];

const fn descriptor(version: u8) -> FeatureDescriptor {
    FeatureDescriptor {
        id: DeviceTypeAndName::ID,
        name: DeviceTypeAndName::NAME,
        version,
        family: FeatureFamily::Important,
        functions: &FUNCTIONS,
        events: &[],
    }
}

static DEVICE_TYPE_AND_NAME_V0: FeatureDescriptor = descriptor(0);
static DEVICE_TYPE_AND_NAME_V1: FeatureDescriptor = descriptor(1);
static DEVICE_TYPE_AND_NAME_V2: FeatureDescriptor = descriptor(2);
static DEVICE_TYPE_AND_NAME_V3: FeatureDescriptor = descriptor(3);

/// The versions of the `DeviceTypeAndName` / `0x0005` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DeviceTypeAndName {
    V0,
    V1,
    V2,
    V3,
}

impl FeatureFactory for DeviceTypeAndName {
    const ID: u16 = 0x0005;
    const NAME: &'static str = "DeviceTypeAndName";

    fn create(version: u8) -> Result<Self, FeatureError> {
        match version {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            _ => Err(FeatureError::UnsupportedVersion { id: Self::ID, version }),
        }
    }

    fn version(self) -> u8 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    fn descriptor(self) -> &'static FeatureDescriptor {
        match self {
            Self::V0 => &DEVICE_TYPE_AND_NAME_V0,
            Self::V1 => &DEVICE_TYPE_AND_NAME_V1,
            Self::V2 => &DEVICE_TYPE_AND_NAME_V2,
            Self::V3 => &DEVICE_TYPE_AND_NAME_V3,
        }
    }
}

/// Implements the `DeviceTypeAndName` / `0x0005` feature.
#[derive(Clone)]
pub struct DeviceTypeAndNameFeature {
    handle: FeatureHandle,
    version: DeviceTypeAndName,
}

impl Feature for DeviceTypeAndNameFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for DeviceTypeAndNameFeature {
    const ID: u16 = DeviceTypeAndName::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, feature_index)?,
            version: DeviceTypeAndName::create(version)?,
        })
    }
}

impl DeviceTypeAndNameFeature {
    /// Retrieves the amount of characters in the device name.
    pub async fn get_device_name_count(&self) -> Result<u8, Error> {
        let function = self.version.descriptor().function(0)?;
        let response = self.handle.call_empty(function).await?;
        Ok(response.uint("device_name_count")? as u8)
    }

    /// Retrieves a part of the device name starting at `index`.
    ///
    /// Unused trailing bytes of the response are zero and stripped.
    pub async fn get_device_name(&self, index: u8) -> Result<Vec<u8>, Error> {
        let function = self.version.descriptor().function(1)?;
        let request = BitMessage::new(function.request).with("char_index", index)?;
        let response = self.handle.call(function, &request).await?;

        let mut part = response.bytes("device_name")?;
        if let Some(end) = part.iter().position(|&byte| byte == 0) {
            part.truncate(end);
        }
        Ok(part)
    }

    /// Retrieves the whole device name by calling
    /// [`Self::get_device_name_count`] once and then repeatedly calling
    /// [`Self::get_device_name`] until all characters were received.
    pub async fn get_whole_device_name(&self) -> Result<String, Error> {
        let count = usize::from(self.get_device_name_count().await?);
        let mut name = Vec::with_capacity(count);

        while name.len() < count {
            let part = self.get_device_name(name.len() as u8).await?;
            if part.is_empty() {
                return Err(Error::UnsupportedResponse);
            }
            name.extend_from_slice(&part);
        }
        name.truncate(count);

        String::from_utf8(name).map_err(|_| Error::UnsupportedResponse)
    }

    /// Retrieves the marketing type of the device.
    pub async fn get_device_type(&self) -> Result<DeviceType, Error> {
        let function = self.version.descriptor().function(2)?;
        let response = self.handle.call_empty(function).await?;

        DeviceType::try_from(response.uint("device_type")? as u8).map_err(|_| Error::UnsupportedResponse)
    }
}

/// Represents the type of a HID++2.0 device as returned by the
/// [`DeviceTypeAndNameFeature`] feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum DeviceType {
    Keyboard = 0,
    RemoteControl = 1,
    Numpad = 2,
    Mouse = 3,
    Trackpad = 4,
    Trackball = 5,
    Presenter = 6,
    Receiver = 7,
    Headset = 8,
    Webcam = 9,
    SteeringWheel = 10,
    Joystick = 11,
    Gamepad = 12,
    Dock = 13,
    Speaker = 14,
    Microphone = 15,
    IlluminationLight = 16,
    ProgrammableController = 17,
    CarSimPedals = 18,
    Adapter = 19,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_is_a_byte_string() {
        let mut payload = [0u8; 16];
        payload[..5].copy_from_slice(b"MX Ma");

        let function = DeviceTypeAndName::V3.descriptor().function(1).unwrap();
        let msg = BitMessage::parse(function.response, &payload).unwrap();
        assert_eq!(&msg.bytes("deviceName").unwrap()[..5], b"MX Ma");
    }

    #[test]
    fn all_versions_share_the_functions() {
        for version in 0..=3 {
            let descriptor = DeviceTypeAndName::create(version).unwrap().descriptor();
            descriptor.validate().unwrap();
            assert_eq!(descriptor.version, version);
            assert_eq!(descriptor.max_function_index(), 2);
        }
        assert_eq!(DeviceType::try_from(3).unwrap(), DeviceType::Mouse);
    }
}
