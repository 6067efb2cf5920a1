//! Implements the `HiResWheel` feature (ID `0x2121`) that controls
//! high-resolution scroll wheels.

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
    bitfield::{BitMessage, FieldDescriptor, MessageError, Schema},
    channel::HidppChannel,
    error::Error,
    nibble::U4,
};

static EMPTY_REQUEST: Schema = Schema::new("HiResWheelRequest", &[FieldDescriptor::new(0xfa, 24, "Padding", "padding")]);

static GET_WHEEL_CAPABILITY_RESPONSE_V0: Schema = Schema::new("GetWheelCapabilityResponseV0", &[
    FieldDescriptor::new(0xfa, 8, "Multiplier", "multiplier"),
    FieldDescriptor::new(0xf9, 4, "Reserved", "reserved_high"),
    FieldDescriptor::new(0xf8, 1, "Has Invert", "has_invert").with_aliases(&["hasInvert"]),
    FieldDescriptor::new(0xf7, 1, "Has Switch", "has_switch").with_aliases(&["hasSwitch"]),
    FieldDescriptor::new(0xf6, 2, "Reserved", "reserved_low"),
    FieldDescriptor::new(0xf5, 8, "Ratches Per Rotation", "ratches_per_rotation").with_aliases(&["ratchesPerRotation"]),
    FieldDescriptor::new(0xf4, 8, "Wheel Diameter", "wheel_diameter").with_aliases(&["wheelDiameter"]),
    FieldDescriptor::new(0xf3, 96, "Padding", "padding"),
]);

static GET_WHEEL_CAPABILITY_RESPONSE_V1: Schema = Schema::new("GetWheelCapabilityResponseV1", &[
    FieldDescriptor::new(0xfa, 8, "Multiplier", "multiplier"),
    FieldDescriptor::new(0xf9, 4, "Reserved", "reserved_high"),
    FieldDescriptor::new(0xf8, 1, "Has Invert", "has_invert").with_aliases(&["hasInvert"]),
    FieldDescriptor::new(0xf7, 1, "Has Switch", "has_switch").with_aliases(&["hasSwitch"]),
    FieldDescriptor::new(0xf6, 1, "Reserved", "reserved_low"),
    FieldDescriptor::new(0xf5, 1, "Has Analytics Data", "has_analytics_data").with_aliases(&["hasAnalyticsData"]),
    FieldDescriptor::new(0xf4, 8, "Ratches Per Rotation", "ratches_per_rotation").with_aliases(&["ratchesPerRotation"]),
    FieldDescriptor::new(0xf3, 8, "Wheel Diameter", "wheel_diameter").with_aliases(&["wheelDiameter"]),
    FieldDescriptor::new(0xf2, 96, "Padding", "padding"),
]);

static WHEEL_MODE_V0: Schema = Schema::new("WheelModeV0", &[
    FieldDescriptor::new(0xfa, 5, "Reserved", "reserved"),
    FieldDescriptor::new(0xf9, 1, "Invert", "invert"),
    FieldDescriptor::new(0xf8, 1, "Resolution", "resolution"),
    FieldDescriptor::new(0xf7, 1, "Target", "target"),
]);

static WHEEL_MODE_V1: Schema = Schema::new("WheelModeV1", &[
    FieldDescriptor::new(0xfa, 4, "Reserved", "reserved"),
    FieldDescriptor::new(0xf9, 1, "Analytics", "analytics"),
    FieldDescriptor::new(0xf8, 1, "Invert", "invert"),
    FieldDescriptor::new(0xf7, 1, "Resolution", "resolution"),
    FieldDescriptor::new(0xf6, 1, "Target", "target"),
]);

static WHEEL_MODE_RESPONSE_V0: Schema = Schema::new("WheelModeResponseV0", &[
    FieldDescriptor::nested(0xfa, "Wheel Mode", "mode", &WHEEL_MODE_V0),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

static WHEEL_MODE_RESPONSE_V1: Schema = Schema::new("WheelModeResponseV1", &[
    FieldDescriptor::nested(0xfa, "Wheel Mode", "mode", &WHEEL_MODE_V1),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

static SET_WHEEL_MODE_REQUEST_V0: Schema = Schema::new("SetWheelModeV0", &[
    FieldDescriptor::nested(0xfa, "Wheel Mode", "mode", &WHEEL_MODE_V0),
    FieldDescriptor::new(0xf9, 16, "Padding", "padding"),
]);

static SET_WHEEL_MODE_REQUEST_V1: Schema = Schema::new("SetWheelModeV1", &[
    FieldDescriptor::nested(0xfa, "Wheel Mode", "mode", &WHEEL_MODE_V1),
    FieldDescriptor::new(0xf9, 16, "Padding", "padding"),
]);

static RATCHET_SWITCH_STATE: Schema = Schema::new("RatchetSwitchState", &[
    FieldDescriptor::new(0xfa, 7, "Reserved", "reserved"),
    FieldDescriptor::new(0xf9, 1, "State", "state"),
    FieldDescriptor::new(0xf8, 120, "Padding", "padding"),
]);

static GET_ANALYTICS_DATA_RESPONSE: Schema = Schema::new("GetAnalyticsDataResponse", &[
    FieldDescriptor::new(0xfa, 16, "Ratchet To Freewheel Count", "ratchet_to_freewheel_count")
        .with_aliases(&["ratchetToFreeWheelCount"]),
    FieldDescriptor::new(0xf9, 16, "Freewheel To Ratchet Count", "freewheel_to_ratchet_count")
        .with_aliases(&["freeWheelToRatchetCount"]),
    FieldDescriptor::new(0xf8, 96, "Padding", "padding"),
]);

static WHEEL_MOVEMENT: Schema = Schema::new("WheelMovement", &[
    FieldDescriptor::new(0xfa, 3, "Reserved", "reserved"),
    FieldDescriptor::new(0xf9, 1, "Resolution", "resolution"),
    FieldDescriptor::new(0xf8, 4, "Periods", "periods"),
    FieldDescriptor::new(0xf7, 16, "Delta V", "delta_v").with_aliases(&["deltaV"]),
    FieldDescriptor::new(0xf6, 104, "Padding", "padding"),
]);

static FUNCTIONS_V0: [FunctionDescriptor; 4] = [
    FunctionDescriptor::new(0, "getWheelCapability", &EMPTY_REQUEST, &GET_WHEEL_CAPABILITY_RESPONSE_V0),
    FunctionDescriptor::new(1, "getWheelMode", &EMPTY_REQUEST, &WHEEL_MODE_RESPONSE_V0),
    FunctionDescriptor::new(2, "setWheelMode", &SET_WHEEL_MODE_REQUEST_V0, &WHEEL_MODE_RESPONSE_V0),
    FunctionDescriptor::new(3, "getRatchetSwitchState", &EMPTY_REQUEST, &RATCHET_SWITCH_STATE),
];

static FUNCTIONS_V1: [FunctionDescriptor; 5] = [
    FunctionDescriptor::new(0, "getWheelCapability", &EMPTY_REQUEST, &GET_WHEEL_CAPABILITY_RESPONSE_V1),
    FunctionDescriptor::new(1, "getWheelMode", &EMPTY_REQUEST, &WHEEL_MODE_RESPONSE_V1),
    FunctionDescriptor::new(2, "setWheelMode", &SET_WHEEL_MODE_REQUEST_V1, &WHEEL_MODE_RESPONSE_V1),
    FunctionDescriptor::new(3, "getRatchetSwitchState", &EMPTY_REQUEST, &RATCHET_SWITCH_STATE),
    FunctionDescriptor::new(4, "getAnalyticsData", &EMPTY_REQUEST, &GET_ANALYTICS_DATA_RESPONSE),
];

static EVENTS: [EventDescriptor; 2] = [
    EventDescriptor::new(0, "wheelMovement", &WHEEL_MOVEMENT),
    EventDescriptor::new(1, "ratchetSwitch", &RATCHET_SWITCH_STATE),
];

const fn descriptor(version: u8, functions: &'static [FunctionDescriptor]) -> FeatureDescriptor {
    FeatureDescriptor {
        id: HiResWheel::ID,
        name: HiResWheel::NAME,
        version,
        family: FeatureFamily::Mouse,
        functions,
        events: &EVENTS,
    }
}

static HIRES_WHEEL_V0: FeatureDescriptor = descriptor(0, &FUNCTIONS_V0);
static HIRES_WHEEL_V1: FeatureDescriptor = descriptor(1, &FUNCTIONS_V1);

/// The versions of the `HiResWheel` / `0x2121` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum HiResWheel {
    V0,

    /// Adds ratchet switch analytics.
    V1,
}

impl FeatureFactory for HiResWheel {
    const ID: u16 = 0x2121;
    const NAME: &'static str = "HiResWheel";

    fn create(version: u8) -> Result<Self, FeatureError> {
        match version {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            _ => Err(FeatureError::UnsupportedVersion { id: Self::ID, version }),
        }
    }

    fn version(self) -> u8 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
        }
    }

    fn descriptor(self) -> &'static FeatureDescriptor {
        match self {
            Self::V0 => &HIRES_WHEEL_V0,
            Self::V1 => &HIRES_WHEEL_V1,
        }
    }
}

/// Implements the `HiResWheel` / `0x2121` feature.
///
/// Wheel movement events are only sent while the wheel is diverted to HID++
/// (see [`WheelEventTarget::Diverted`]); ratchet switch events are always
/// enabled. Both land in the mouse event queue.
#[derive(Clone)]
pub struct HiResWheelFeature {
    handle: FeatureHandle,
    version: HiResWheel,
}

impl Feature for HiResWheelFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for HiResWheelFeature {
    const ID: u16 = HiResWheel::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, feature_index)?,
            version: HiResWheel::create(version)?,
        })
    }
}

impl HiResWheelFeature {
    /// Retrieves the capabilities of the hi-res wheel and this feature.
    pub async fn get_wheel_capabilities(&self) -> Result<WheelCapabilities, Error> {
        let function = self.version.descriptor().function(0)?;
        let response = self.handle.call_empty(function).await?;
        Ok(WheelCapabilities::try_from(&response)?)
    }

    /// Retrieves the current mode of the hi-res wheel.
    pub async fn get_wheel_mode(&self) -> Result<WheelMode, Error> {
        let function = self.version.descriptor().function(1)?;
        let response = self.handle.call_empty(function).await?;
        WheelMode::try_from(response.nested("mode")?)
    }

    /// Sets the mode of the hi-res wheel and returns the mode the device
    /// applied.
    ///
    /// Analytics collection can only be enabled from v1 on; the flag is
    /// ignored for v0 devices.
    pub async fn set_wheel_mode(&self, mode: WheelMode) -> Result<WheelMode, Error> {
        let function = self.version.descriptor().function(2)?;

        let (_, mode_field) = function
            .request
            .field("mode")
            .ok_or(Error::UnsupportedResponse)?;
        let Some(mode_schema) = mode_field.nested else {
            return Err(Error::UnsupportedResponse);
        };

        let mut bits = BitMessage::new(mode_schema)
            .with("invert", mode.inverted)?
            .with("resolution", u8::from(mode.resolution))?
            .with("target", u8::from(mode.target))?;
        if self.version == HiResWheel::V1 {
            bits.set("analytics", mode.analytics)?;
        }

        let request = BitMessage::new(function.request).with("mode", bits)?;
        let response = self.handle.call(function, &request).await?;
        WheelMode::try_from(response.nested("mode")?)
    }

    /// Retrieves the current state of the ratchet switch.
    pub async fn get_ratchet_switch_state(&self) -> Result<WheelRatchetState, Error> {
        let function = self.version.descriptor().function(3)?;
        let response = self.handle.call_empty(function).await?;
        WheelRatchetState::try_from(response.uint("state")? as u8).map_err(|_| Error::UnsupportedResponse)
    }

    /// Retrieves how often the wheel switched between ratchet and freespin
    /// since analytics collection was enabled (v1 and newer).
    pub async fn get_analytics_data(&self) -> Result<WheelAnalytics, Error> {
        let function = self.version.descriptor().function(4)?;
        let response = self.handle.call_empty(function).await?;
        Ok(WheelAnalytics {
            ratchet_to_freespin: response.uint("ratchet_to_freewheel_count")? as u16,
            freespin_to_ratchet: response.uint("freewheel_to_ratchet_count")? as u16,
        })
    }

    /// Waits for the next event of the wheel.
    pub async fn next_event(&self, timeout: Option<Duration>) -> Result<HiResWheelEvent, Error> {
        let (_, msg) = self.handle.next_event(self.version.descriptor(), &[0, 1], timeout).await?;
        HiResWheelEvent::try_from(&msg)
    }
}

/// Represents the capabilities of the hi-res wheel and this feature as reported
/// by [`HiResWheelFeature::get_wheel_capabilities`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct WheelCapabilities {
    /// The report multiplier for the high-resolution mode. A single ratchet
    /// distance will produce this amount of wheel movement reports in hi-res
    /// mode.
    pub multiplier: u8,

    /// Whether the device supports inverting the scrolling direction when in
    /// native HID reporting mode.
    ///
    /// Inverting is never supported in diverted HID++ mode.
    pub has_invert: bool,

    /// Whether the device has a switch to control the ratchet mode.
    pub has_switch: bool,

    /// Whether the device collects ratchet switch analytics. Always `false`
    /// for v0.
    pub has_analytics: bool,

    /// The amount of ratches that would be generated by a whole rotation of the
    /// scroll wheel.
    pub ratches_per_rotation: u8,

    /// The nominal wheel diameter in millimeters.
    pub wheel_diameter: u8,
}

impl TryFrom<&BitMessage> for WheelCapabilities {
    type Error = MessageError;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            multiplier: msg.uint("multiplier")? as u8,
            has_invert: msg.uint("has_invert")? != 0,
            has_switch: msg.uint("has_switch")? != 0,
            has_analytics: msg.uint("has_analytics_data").is_ok_and(|value| value != 0),
            ratches_per_rotation: msg.uint("ratches_per_rotation")? as u8,
            wheel_diameter: msg.uint("wheel_diameter")? as u8,
        })
    }
}

/// Represents the wheel mode as reported by
/// [`HiResWheelFeature::get_wheel_mode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct WheelMode {
    /// Whether ratchet switch analytics are collected (v1 and newer).
    pub analytics: bool,

    /// Whether the scrolling direction is inverted.
    /// Only applies when in native HID mode.
    pub inverted: bool,

    /// The current scrolling resolution.
    pub resolution: WheelResolution,

    /// The target of wheel movement reports (native or diverted).
    pub target: WheelEventTarget,
}

impl WheelMode {
    pub fn new(target: WheelEventTarget, resolution: WheelResolution, inverted: bool) -> Self {
        Self {
            analytics: false,
            inverted,
            resolution,
            target,
        }
    }
}

impl TryFrom<&BitMessage> for WheelMode {
    type Error = Error;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            analytics: msg.uint("analytics").is_ok_and(|value| value != 0),
            inverted: msg.uint("invert")? != 0,
            resolution: WheelResolution::try_from(msg.uint("resolution")? as u8)
                .map_err(|_| Error::UnsupportedResponse)?,
            target: WheelEventTarget::try_from(msg.uint("target")? as u8).map_err(|_| Error::UnsupportedResponse)?,
        })
    }
}

/// Ratchet switch counters as reported by
/// [`HiResWheelFeature::get_analytics_data`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WheelAnalytics {
    pub ratchet_to_freespin: u16,
    pub freespin_to_ratchet: u16,
}

/// Represents the resolution of the hi-res wheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WheelResolution {
    Low = 0,
    High = 1,
}

/// Represents the target of wheel movement reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WheelEventTarget {
    Native = 0,
    Diverted = 1,
}

/// Represents the state of the wheel ratchet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WheelRatchetState {
    Freespin = 0,
    Ratchet = 1,
}

/// Represents an event emitted by the [`HiResWheelFeature`] feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub enum HiResWheelEvent {
    /// Is emitted whenever the scroll wheel is moved in diverted HID++ mode.
    WheelMovement(WheelMovementData),

    /// Is emitted whenever the wheel ratchet mode is changed.
    RatchetSwitch(WheelRatchetState),
}

impl TryFrom<&BitMessage> for HiResWheelEvent {
    type Error = Error;

    /// Decodes either event, telling them apart by their schema.
    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        if msg.schema().name == WHEEL_MOVEMENT.name {
            Ok(Self::WheelMovement(WheelMovementData {
                resolution: WheelResolution::try_from(msg.uint("resolution")? as u8)
                    .map_err(|_| Error::UnsupportedResponse)?,
                periods: U4::from_lo(msg.uint("periods")? as u8),
                delta_vertical: msg.uint("delta_v")? as u16 as i16,
            }))
        } else {
            Ok(Self::RatchetSwitch(
                WheelRatchetState::try_from(msg.uint("state")? as u8).map_err(|_| Error::UnsupportedResponse)?,
            ))
        }
    }
}

/// Represents the data of the [`HiResWheelEvent::WheelMovement`] event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct WheelMovementData {
    /// The current resolution of the wheel.
    pub resolution: WheelResolution,

    /// The amount of sampling periods for this event. Maxes at 15.
    pub periods: U4,

    /// The vertical movement delta. Moving away from the user produces positive
    /// values.
    pub delta_vertical: i16,
}
