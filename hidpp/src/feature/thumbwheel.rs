//! Implements the `Thumbwheel` feature (ID `0x2150`) that controls the
//! horizontal thumbwheel of some mice.

use std::{sync::Arc, time::Duration};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{
    CreatableFeature,
    EventDescriptor,
    Feature,
    FeatureDescriptor,
    FeatureError,
    FeatureFactory,
    FeatureFamily,
    FeatureHandle,
    FunctionDescriptor,
};
use crate::{
    bitfield::{BitMessage, Check, FieldDescriptor, Schema},
    channel::HidppChannel,
    error::Error,
};

static EMPTY_REQUEST: Schema = Schema::new("ThumbwheelRequest", &[FieldDescriptor::new(0xfa, 24, "Padding", "padding")]);

static GET_THUMBWHEEL_INFO_RESPONSE: Schema = Schema::new("GetThumbwheelInfoResponse", &[
    FieldDescriptor::new(0xfa, 16, "Native Resolution", "native_resolution").with_aliases(&["nativeRes"]),
    FieldDescriptor::new(0xf9, 16, "Diverted Resolution", "diverted_resolution").with_aliases(&["divertedRes"]),
    FieldDescriptor::new(0xf8, 7, "Reserved", "reserved_direction"),
    FieldDescriptor::new(0xf7, 1, "Default Direction", "default_direction").with_aliases(&["defaultDirection"]),
    FieldDescriptor::new(0xf6, 4, "Reserved", "reserved_capabilities"),
    FieldDescriptor::new(0xf5, 1, "Single Tap Capability", "single_tap_capability"),
    FieldDescriptor::new(0xf4, 1, "Proxy Capability", "proxy_capability"),
    FieldDescriptor::new(0xf3, 1, "Touch Capability", "touch_capability"),
    FieldDescriptor::new(0xf2, 1, "Time Stamp Capability", "time_stamp_capability"),
    FieldDescriptor::new(0xf1, 16, "Time Unit", "time_unit").with_aliases(&["timeUnit"]),
    FieldDescriptor::new(0xf0, 64, "Padding", "padding"),
]);

static GET_THUMBWHEEL_STATUS_RESPONSE: Schema = Schema::new("GetThumbwheelStatusResponse", &[
    FieldDescriptor::new(0xfa, 8, "Reporting Mode", "reporting_mode").with_aliases(&["reportingMode"]),
    FieldDescriptor::new(0xf9, 5, "Reserved", "reserved"),
    FieldDescriptor::new(0xf8, 1, "Proxy", "proxy"),
    FieldDescriptor::new(0xf7, 1, "Touch", "touch"),
    FieldDescriptor::new(0xf6, 1, "Invert Direction", "invert_direction").with_aliases(&["invertDirection"]),
    FieldDescriptor::new(0xf5, 112, "Padding", "padding"),
]);

static SET_THUMBWHEEL_REPORTING_REQUEST: Schema = Schema::new("SetThumbwheelReporting", &[
    FieldDescriptor::new(0xfa, 8, "Reporting Mode", "reporting_mode")
        .with_aliases(&["reportingMode"])
        .with_checks(&[Check::OneOf(&[0, 1])]),
    FieldDescriptor::new(0xf9, 7, "Reserved", "reserved"),
    FieldDescriptor::new(0xf8, 1, "Invert Direction", "invert_direction").with_aliases(&["invertDirection"]),
    FieldDescriptor::new(0xf7, 8, "Padding", "padding"),
]);

static SET_THUMBWHEEL_REPORTING_RESPONSE: Schema = Schema::new("SetThumbwheelReportingResponse", &[
    FieldDescriptor::new(0xfa, 8, "Reporting Mode", "reporting_mode").with_aliases(&["reportingMode"]),
    FieldDescriptor::new(0xf9, 7, "Reserved", "reserved"),
    FieldDescriptor::new(0xf8, 1, "Invert Direction", "invert_direction").with_aliases(&["invertDirection"]),
    FieldDescriptor::new(0xf7, 112, "Padding", "padding"),
]);

static THUMBWHEEL_EVENT: Schema = Schema::new("ThumbwheelEvent", &[
    FieldDescriptor::new(0xfa, 16, "Rotation", "rotation"),
    FieldDescriptor::new(0xf9, 16, "Time Elapsed", "time_elapsed").with_aliases(&["timeElapsed"]),
    FieldDescriptor::new(0xf8, 8, "Rotation Status", "rotation_status").with_aliases(&["rotationStatus"]),
    FieldDescriptor::new(0xf7, 4, "Reserved", "reserved_high"),
    FieldDescriptor::new(0xf6, 1, "Single Tap", "single_tap").with_aliases(&["singleTap"]),
    FieldDescriptor::new(0xf5, 1, "Proxy", "proxy"),
    FieldDescriptor::new(0xf4, 1, "Touch", "touch"),
    FieldDescriptor::new(0xf3, 1, "Reserved", "reserved_low"),
    FieldDescriptor::new(0xf2, 80, "Padding", "padding"),
]);

static FUNCTIONS: [FunctionDescriptor; 3] = [
    FunctionDescriptor::new(0, "getThumbwheelInfo", &EMPTY_REQUEST, &GET_THUMBWHEEL_INFO_RESPONSE),
    FunctionDescriptor::new(1, "getThumbwheelStatus", &EMPTY_REQUEST, &GET_THUMBWHEEL_STATUS_RESPONSE),
    FunctionDescriptor::new(
        2,
        "setThumbwheelReporting",
        &SET_THUMBWHEEL_REPORTING_REQUEST,
        &SET_THUMBWHEEL_REPORTING_RESPONSE,
    ),
];

static EVENTS: [EventDescriptor; 1] = [EventDescriptor::new(0, "thumbwheelEvent", &THUMBWHEEL_EVENT)];

static THUMBWHEEL_V0: FeatureDescriptor = FeatureDescriptor {
    id: Thumbwheel::ID,
    name: Thumbwheel::NAME,
    version: 0,
    family: FeatureFamily::Mouse,
    functions: &FUNCTIONS,
    events: &EVENTS,
};

/// The versions of the `Thumbwheel` / `0x2150` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Thumbwheel {
    V0,
}

impl FeatureFactory for Thumbwheel {
    const ID: u16 = 0x2150;
    const NAME: &'static str = "Thumbwheel";

    fn create(version: u8) -> Result<Self, FeatureError> {
        match version {
            0 => Ok(Self::V0),
            _ => Err(FeatureError::UnsupportedVersion { id: Self::ID, version }),
        }
    }

    fn version(self) -> u8 {
        0
    }

    fn descriptor(self) -> &'static FeatureDescriptor {
        &THUMBWHEEL_V0
    }
}

/// Implements the `Thumbwheel` / `0x2150` feature.
#[derive(Clone)]
pub struct ThumbwheelFeature {
    handle: FeatureHandle,
    version: Thumbwheel,
}

impl Feature for ThumbwheelFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for ThumbwheelFeature {
    const ID: u16 = Thumbwheel::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, feature_index)?,
            version: Thumbwheel::create(version)?,
        })
    }
}

impl ThumbwheelFeature {
    /// Retrieves some information about the thumbwheel.
    pub async fn get_thumbwheel_info(&self) -> Result<ThumbwheelInfo, Error> {
        let function = self.version.descriptor().function(0)?;
        let response = self.handle.call_empty(function).await?;

        Ok(ThumbwheelInfo {
            native_resolution: response.uint("native_resolution")? as u16,
            diverted_resolution: response.uint("diverted_resolution")? as u16,
            time_unit: response.uint("time_unit")? as u16,
            default_direction: ThumbwheelDirection::try_from(response.uint("default_direction")? as u8)
                .map_err(|_| Error::UnsupportedResponse)?,
            capabilities: ThumbwheelCapabilities {
                time_stamp: response.uint("time_stamp_capability")? != 0,
                touch: response.uint("touch_capability")? != 0,
                proxy: response.uint("proxy_capability")? != 0,
                single_tap: response.uint("single_tap_capability")? != 0,
            },
        })
    }

    /// Retrieves the custom status of the thumbwheel.
    pub async fn get_thumbwheel_status(&self) -> Result<ThumbwheelStatus, Error> {
        let function = self.version.descriptor().function(1)?;
        let response = self.handle.call_empty(function).await?;

        Ok(ThumbwheelStatus {
            reporting_mode: ThumbwheelReportingMode::try_from(response.uint("reporting_mode")? as u8)
                .map_err(|_| Error::UnsupportedResponse)?,
            direction_inverted: response.uint("invert_direction")? != 0,
            touch: response.uint("touch")? != 0,
            proxy: response.uint("proxy")? != 0,
        })
    }

    /// Sets the reporting mode of the thumbwheel.
    ///
    /// This can be used to divert the thumbwheel notifications to HID++.
    ///
    /// If `invert_direction` is set, the [`ThumbwheelStatusUpdate::rotation`]
    /// field will be the inverse of that would be expected if following
    /// [`ThumbwheelInfo::default_direction`].
    pub async fn set_thumbwheel_reporting(
        &self,
        mode: ThumbwheelReportingMode,
        invert_direction: bool,
    ) -> Result<(), Error> {
        let function = self.version.descriptor().function(2)?;
        let request = BitMessage::new(function.request)
            .with("reporting_mode", u8::from(mode))?
            .with("invert_direction", invert_direction)?;

        self.handle.call(function, &request).await?;
        Ok(())
    }

    /// Waits for the next thumbwheel status update. Requires the thumbwheel
    /// to be in [`ThumbwheelReportingMode::Diverted`].
    pub async fn next_status_update(&self, timeout: Option<Duration>) -> Result<ThumbwheelStatusUpdate, Error> {
        let (_, msg) = self.handle.next_event(self.version.descriptor(), &[0], timeout).await?;
        ThumbwheelStatusUpdate::try_from(&msg)
    }
}

/// Represents information about the thumbwheel as reported by
/// [`ThumbwheelFeature::get_thumbwheel_info`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ThumbwheelInfo {
    /// The number of ratchets generated by revolution when in native (HID)
    /// mode.
    pub native_resolution: u16,

    /// The number of rotation increments generated by revolution when in
    /// diverted (HID++) mode
    pub diverted_resolution: u16,

    /// If [`ThumbwheelCapabilities::time_stamp`] is set, this is set to the
    /// timestamp unit used for [`ThumbwheelStatusUpdate::time_elapsed`] in
    /// microseconds. Otherwise it is always `0`.
    pub time_unit: u16,

    /// The default rotation direction. This determines which rotation direction
    /// corresponds to which number range (positive or negative) for the
    /// [`ThumbwheelStatusUpdate::rotation`] value.
    pub default_direction: ThumbwheelDirection,

    /// The capabilites of the thumbwheel.
    pub capabilities: ThumbwheelCapabilities,
}

/// Determines which thumbwheel rotation corresponds to which number range
/// (positive or negative) for the [`ThumbwheelStatusUpdate::rotation`] value.
///
/// The direction descriptors (`LeftOrBack`, `RightOrFront`) are
/// specific to the device orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ThumbwheelDirection {
    PositiveWhenLeftOrBack = 0,
    PositiveWhenRightOrFront = 1,
}

/// Represents the capabilities the thumbwheel may support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ThumbwheelCapabilities {
    /// Whether the thumbwheel supports emitting the elapsed time between two
    /// events via [`ThumbwheelStatusUpdate::time_elapsed`].
    pub time_stamp: bool,

    /// Whether the thumbwheel is equipped with a touch sensor.
    pub touch: bool,

    /// Whether the thumbwheel is equipped with a proximity sensor.
    pub proxy: bool,

    /// Whether the thumbwheel supports detecting single taps.
    pub single_tap: bool,
}

/// Represents information about the thumbwheel status as reported by
/// [`ThumbwheelFeature::get_thumbwheel_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ThumbwheelStatus {
    /// The mode how thumbwheel events are reported (native/HID or
    /// diverted/HID++).
    pub reporting_mode: ThumbwheelReportingMode,

    /// Whether the default direction as reported by
    /// [`ThumbwheelInfo::default_direction`] is inverted.
    pub direction_inverted: bool,

    /// Whether the user touches the thumbwheel.
    pub touch: bool,

    /// Whether the user is close to the thumbwheel.
    pub proxy: bool,
}

/// Represents the mode how the thumbwheel reports its events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ThumbwheelReportingMode {
    /// Thumbwheel events are reported only to the native HID channel.
    Native = 0,

    /// Thumbwheel events are reported only to the diverted HID++ channel.
    Diverted = 1,
}

/// Represents the data of a `thumbwheelEvent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ThumbwheelStatusUpdate {
    /// The rotation in relation to [`ThumbwheelInfo::native_resolution`] or
    /// [`ThumbwheelInfo::diverted_resolution`].
    pub rotation: i16,

    /// The time elapsed since the last event, in
    /// [`ThumbwheelInfo::time_unit`]s.
    pub time_elapsed: u16,

    /// The status of the current rotation.
    pub rotation_status: ThumbwheelRotationStatus,

    pub touch: bool,
    pub proxy: bool,
    pub single_tap: bool,
}

impl TryFrom<&BitMessage> for ThumbwheelStatusUpdate {
    type Error = Error;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            rotation: msg.uint("rotation")? as u16 as i16,
            time_elapsed: msg.uint("time_elapsed")? as u16,
            rotation_status: ThumbwheelRotationStatus::try_from(msg.uint("rotation_status")? as u8)
                .map_err(|_| Error::UnsupportedResponse)?,
            touch: msg.uint("touch")? != 0,
            proxy: msg.uint("proxy")? != 0,
            single_tap: msg.uint("single_tap")? != 0,
        })
    }
}

/// Represents a thumbwheel rotation status as reported in
/// [`ThumbwheelStatusUpdate::rotation_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ThumbwheelRotationStatus {
    /// The thumbwheel was not rotated.
    Inactive = 0,

    /// The thumbwheel rotation was started.
    Start = 1,

    /// The thumbwheel rotation is ongoing.
    Active = 2,

    /// The thumbwheel was released.
    Stop = 3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_update_decodes_flags() {
        let mut payload = [0u8; 16];
        payload[..6].copy_from_slice(&[0xff, 0xfb, 0x00, 0x10, 0x02, 0b0000_1010]);

        let msg = BitMessage::parse(&THUMBWHEEL_EVENT, &payload).unwrap();
        let update = ThumbwheelStatusUpdate::try_from(&msg).unwrap();
        assert_eq!(update.rotation, -5);
        assert_eq!(update.time_elapsed, 0x10);
        assert_eq!(update.rotation_status, ThumbwheelRotationStatus::Active);
        assert!(update.touch);
        assert!(!update.proxy);
        assert!(update.single_tap);
    }

    #[test]
    fn reporting_request_layout() {
        let request = BitMessage::new(&SET_THUMBWHEEL_REPORTING_REQUEST)
            .with("reportingMode", 1u8)
            .unwrap()
            .with("invert_direction", true)
            .unwrap();
        assert_eq!(request.serialize().unwrap(), vec![0x01, 0x01, 0x00]);
        assert!(request.clone().with("reporting_mode", 2u8).is_err());
        Thumbwheel::V0.descriptor().validate().unwrap();
    }
}
