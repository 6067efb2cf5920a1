//! Implements the `SmartShift` feature (ID `0x2110`) that controls the
//! ratchet mode of scroll wheels with automatic disengagement.

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
    bitfield::{BitMessage, Check, FieldDescriptor, Schema},
    channel::HidppChannel,
    error::Error,
};

static GET_RATCHET_CONTROL_MODE_REQUEST: Schema =
    Schema::new("GetRatchetControlMode", &[FieldDescriptor::new(0xfa, 24, "Padding", "padding")]);

/// The ratchet control mode as read and written. Zero leaves a value as it
/// is when writing.
static RATCHET_CONTROL_MODE: Schema = Schema::new("RatchetControlMode", &[
    FieldDescriptor::new(0xfa, 8, "Wheel Mode", "wheel_mode")
        .with_aliases(&["wheelMode"])
        .with_checks(&[Check::OneOf(&[0, 1, 2])]),
    FieldDescriptor::new(0xf9, 8, "Auto Disengage", "auto_disengage").with_aliases(&["autoDisengage"]),
    FieldDescriptor::new(0xf8, 8, "Auto Disengage Default", "auto_disengage_default")
        .with_aliases(&["autoDisengageDefault"]),
]);

static GET_RATCHET_CONTROL_MODE_RESPONSE: Schema = Schema::new("GetRatchetControlModeResponse", &[
    FieldDescriptor::nested(0xfa, "Ratchet Control Mode", "mode", &RATCHET_CONTROL_MODE),
    FieldDescriptor::new(0xf9, 104, "Padding", "padding"),
]);

static SET_RATCHET_CONTROL_MODE_RESPONSE: Schema = Schema::new("SetRatchetControlModeResponse", &[
    FieldDescriptor::nested(0xfa, "Ratchet Control Mode", "mode", &RATCHET_CONTROL_MODE),
    FieldDescriptor::new(0xf9, 104, "Padding", "padding"),
]);

static FUNCTIONS: [FunctionDescriptor; 2] = [
    FunctionDescriptor::new(
        0,
        "getRatchetControlMode",
        &GET_RATCHET_CONTROL_MODE_REQUEST,
        &GET_RATCHET_CONTROL_MODE_RESPONSE,
    ),
    FunctionDescriptor::new(1, "setRatchetControlMode", &RATCHET_CONTROL_MODE, &SET_RATCHET_CONTROL_MODE_RESPONSE),
];

static SMARTSHIFT_V0: FeatureDescriptor = FeatureDescriptor {
    id: SmartShift::ID,
    name: SmartShift::NAME,
    version: 0,
    family: FeatureFamily::Mouse,
    functions: &FUNCTIONS,
    events: &[],
};

/// The versions of the `SmartShift` / `0x2110` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SmartShift {
    V0,
}

impl FeatureFactory for SmartShift {
    const ID: u16 = 0x2110;
    const NAME: &'static str = "SmartShift";

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
        &SMARTSHIFT_V0
    }
}

/// Implements the `SmartShift` / `0x2110` feature.
#[derive(Clone)]
pub struct SmartShiftFeature {
    handle: FeatureHandle,
    version: SmartShift,
}

impl Feature for SmartShiftFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for SmartShiftFeature {
    const ID: u16 = SmartShift::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, feature_index)?,
            version: SmartShift::create(version)?,
        })
    }
}

impl SmartShiftFeature {
    /// Retrieves the current ratchet control mode.
    ///
    /// [`RatchetControlMode::wheel_mode`] will only reflect the value set
    /// either by software or the wheel mode button. It will not provide
    /// information about whether the wheel is in auto-disengaged mode.
    pub async fn get_ratchet_control_mode(&self) -> Result<RatchetControlMode, Error> {
        let function = self.version.descriptor().function(0)?;
        let response = self.handle.call_empty(function).await?;
        RatchetControlMode::try_from(response.nested("mode")?)
    }

    /// Sets the ratchet control mode.
    ///
    /// For `auto_disengage` (and `auto_disengage_default` respectively), the
    /// values `0x01..=0xfe` correspond to the amount of quarter-turns the wheel
    /// has to make per second for the wheel to disengage.
    /// `0xff` enables permanent ratchet mode.
    ///
    /// All values are optional and will stay as they are if provided with
    /// [`None`]. For `auto_disengage` and `auto_disengange_default`, `0` will
    /// have the same effect as [`None`].
    pub async fn set_ratchet_control_mode(
        &self,
        wheel_mode: Option<WheelMode>,
        auto_disengage: Option<u8>,
        auto_disengage_default: Option<u8>,
    ) -> Result<(), Error> {
        let function = self.version.descriptor().function(1)?;
        let request = BitMessage::new(function.request)
            .with("wheel_mode", wheel_mode.map_or(0, u8::from))?
            .with("auto_disengage", auto_disengage.unwrap_or(0))?
            .with("auto_disengage_default", auto_disengage_default.unwrap_or(0))?;

        self.handle.call(function, &request).await?;
        Ok(())
    }
}

/// Represents the ratchet control mode of the mouse wheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct RatchetControlMode {
    /// The mode the wheel is currently set to.
    ///
    /// This does not reflect the automatic disengage state.
    pub wheel_mode: WheelMode,

    /// The amount of quarter-turns per second it takes for the wheel to
    /// automatically disengage.
    ///
    /// If this value is `0xff`, the wheel will not disengage automatically.
    pub auto_disengage: u8,

    /// The default value of [`Self::auto_disengage`].
    pub auto_disengage_default: u8,
}

impl TryFrom<&BitMessage> for RatchetControlMode {
    type Error = Error;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            wheel_mode: WheelMode::try_from(msg.uint("wheel_mode")? as u8).map_err(|_| Error::UnsupportedResponse)?,
            auto_disengage: msg.uint("auto_disengage")? as u8,
            auto_disengage_default: msg.uint("auto_disengage_default")? as u8,
        })
    }
}

/// Represents the ratchet mode of the scroll wheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WheelMode {
    Freespin = 1,
    Ratchet = 2,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::MessageError;

    #[test]
    fn ratchet_control_mode_is_nested_in_the_response() {
        let mut payload = [0u8; 16];
        payload[..3].copy_from_slice(&[0x02, 0x0a, 0x1e]);

        let msg = BitMessage::parse(&GET_RATCHET_CONTROL_MODE_RESPONSE, &payload).unwrap();
        let mode = RatchetControlMode::try_from(msg.nested("mode").unwrap()).unwrap();
        assert_eq!(mode.wheel_mode, WheelMode::Ratchet);
        assert_eq!(mode.auto_disengage, 0x0a);
        assert_eq!(mode.auto_disengage_default, 0x1e);
    }

    #[test]
    fn invalid_wheel_modes_need_unchecked_assignment() {
        let mut request = BitMessage::new(&RATCHET_CONTROL_MODE);
        assert!(matches!(request.set("wheel_mode", 3u8), Err(MessageError::Constraint(_))));

        request.set_unchecked("wheel_mode", 3u8).unwrap();
        assert_eq!(request.serialize().unwrap(), vec![0x03, 0x00, 0x00]);
        SmartShift::V0.descriptor().validate().unwrap();
    }
}
