//! Implements the `UnifiedBattery` feature (ID `0x1004`) that provides
//! information about the battery status of the device.

use std::{collections::HashSet, sync::Arc, time::Duration};

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
    queue::QueueName,
};

static EMPTY_REQUEST: Schema = Schema::new("UnifiedBatteryRequest", &[FieldDescriptor::new(
    0xfa,
    24,
    "Padding",
    "padding",
)]);

static EMPTY_RESPONSE: Schema = Schema::new("UnifiedBatteryResponse", &[FieldDescriptor::new(
    0xfa,
    128,
    "Padding",
    "padding",
)]);

static GET_CAPABILITIES_RESPONSE_V0: Schema = Schema::new("GetCapabilitiesResponseV0", &[
    FieldDescriptor::new(0xfa, 4, "Reserved", "reserved_levels"),
    FieldDescriptor::new(0xf9, 1, "Full", "full"),
    FieldDescriptor::new(0xf8, 1, "Good", "good"),
    FieldDescriptor::new(0xf7, 1, "Low", "low"),
    FieldDescriptor::new(0xf6, 1, "Critical", "critical"),
    FieldDescriptor::new(0xf5, 6, "Reserved", "reserved_flags"),
    FieldDescriptor::new(0xf4, 1, "State Of Charge", "state_of_charge").with_aliases(&["soc"]),
    FieldDescriptor::new(0xf3, 1, "Rechargeable", "rechargeable").with_aliases(&["rchg"]),
    FieldDescriptor::new(0xf2, 112, "Padding", "padding"),
]);

static GET_CAPABILITIES_RESPONSE_V2: Schema = Schema::new("GetCapabilitiesResponseV2", &[
    FieldDescriptor::new(0xfa, 4, "Reserved", "reserved_levels"),
    FieldDescriptor::new(0xf9, 1, "Full", "full"),
    FieldDescriptor::new(0xf8, 1, "Good", "good"),
    FieldDescriptor::new(0xf7, 1, "Low", "low"),
    FieldDescriptor::new(0xf6, 1, "Critical", "critical"),
    FieldDescriptor::new(0xf5, 5, "Reserved", "reserved_flags"),
    FieldDescriptor::new(0xf4, 1, "Show Battery Status", "show_battery_status").with_aliases(&["showBatteryStatus"]),
    FieldDescriptor::new(0xf3, 1, "State Of Charge", "state_of_charge").with_aliases(&["soc"]),
    FieldDescriptor::new(0xf2, 1, "Rechargeable", "rechargeable").with_aliases(&["rchg"]),
    FieldDescriptor::new(0xf1, 112, "Padding", "padding"),
]);

/// The payload of `getStatus` responses and `batteryStatus` events.
static BATTERY_STATUS: Schema = Schema::new("BatteryStatus", &[
    FieldDescriptor::new(0xfa, 8, "State Of Charge", "state_of_charge").with_aliases(&["stateOfCharge"]),
    FieldDescriptor::new(0xf9, 4, "Reserved", "reserved"),
    FieldDescriptor::new(0xf8, 1, "Full", "full"),
    FieldDescriptor::new(0xf7, 1, "Good", "good"),
    FieldDescriptor::new(0xf6, 1, "Low", "low"),
    FieldDescriptor::new(0xf5, 1, "Critical", "critical"),
    FieldDescriptor::new(0xf4, 8, "Charging Status", "charging_status").with_aliases(&["chargingStatus"]),
    FieldDescriptor::new(0xf3, 8, "External Power Status", "external_power_status")
        .with_aliases(&["externalPowerStatus"]),
    FieldDescriptor::new(0xf2, 96, "Padding", "padding"),
]);

static FUNCTIONS_V0: [FunctionDescriptor; 2] = [
    FunctionDescriptor::new(0, "getCapabilities", &EMPTY_REQUEST, &GET_CAPABILITIES_RESPONSE_V0),
    FunctionDescriptor::new(1, "getStatus", &EMPTY_REQUEST, &BATTERY_STATUS),
];

static FUNCTIONS_V1: [FunctionDescriptor; 3] = [
    FunctionDescriptor::new(0, "getCapabilities", &EMPTY_REQUEST, &GET_CAPABILITIES_RESPONSE_V0),
    FunctionDescriptor::new(1, "getStatus", &EMPTY_REQUEST, &BATTERY_STATUS),
    FunctionDescriptor::new(2, "showBatteryStatus", &EMPTY_REQUEST, &EMPTY_RESPONSE),
];

static FUNCTIONS_V2: [FunctionDescriptor; 3] = [
    FunctionDescriptor::new(0, "getCapabilities", &EMPTY_REQUEST, &GET_CAPABILITIES_RESPONSE_V2),
    FunctionDescriptor::new(1, "getStatus", &EMPTY_REQUEST, &BATTERY_STATUS),
    FunctionDescriptor::new(2, "showBatteryStatus", &EMPTY_REQUEST, &EMPTY_RESPONSE),
];

static EVENTS: [EventDescriptor; 1] =
    [EventDescriptor::new(0, "batteryStatus", &BATTERY_STATUS).routed_to(QueueName::BatteryEvent)];

const fn descriptor(version: u8, functions: &'static [FunctionDescriptor]) -> FeatureDescriptor {
    FeatureDescriptor {
        id: UnifiedBattery::ID,
        name: UnifiedBattery::NAME,
        version,
        family: FeatureFamily::Common,
        functions,
        events: &EVENTS,
    }
}

static UNIFIED_BATTERY_V0: FeatureDescriptor = descriptor(0, &FUNCTIONS_V0);
static UNIFIED_BATTERY_V1: FeatureDescriptor = descriptor(1, &FUNCTIONS_V1);
static UNIFIED_BATTERY_V2: FeatureDescriptor = descriptor(2, &FUNCTIONS_V2);
static UNIFIED_BATTERY_V3: FeatureDescriptor = descriptor(3, &FUNCTIONS_V2);

/// The versions of the `UnifiedBattery` / `0x1004` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum UnifiedBattery {
    V0,

    /// Adds `showBatteryStatus`.
    V1,

    /// Reports whether `showBatteryStatus` is supported.
    V2,

    V3,
}

impl FeatureFactory for UnifiedBattery {
    const ID: u16 = 0x1004;
    const NAME: &'static str = "UnifiedBattery";

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
            Self::V0 => &UNIFIED_BATTERY_V0,
            Self::V1 => &UNIFIED_BATTERY_V1,
            Self::V2 => &UNIFIED_BATTERY_V2,
            Self::V3 => &UNIFIED_BATTERY_V3,
        }
    }
}

/// Implements the `UnifiedBattery` / `0x1004` feature.
///
/// Battery status events are delivered to [`QueueName::BatteryEvent`]; use
/// [`Self::next_battery_event`] to wait for one.
#[derive(Clone)]
pub struct UnifiedBatteryFeature {
    handle: FeatureHandle,
    version: UnifiedBattery,
}

impl Feature for UnifiedBatteryFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for UnifiedBatteryFeature {
    const ID: u16 = UnifiedBattery::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, feature_index)?,
            version: UnifiedBattery::create(version)?,
        })
    }
}

impl UnifiedBatteryFeature {
    /// Retrieves the capabilities of this feature and the battery in general.
    pub async fn get_battery_capabilities(&self) -> Result<BatteryCapabilities, Error> {
        let function = self.version.descriptor().function(0)?;
        let response = self.handle.call_empty(function).await?;
        Ok(BatteryCapabilities::try_from(&response)?)
    }

    /// Retrieves the current information about the battery status.
    pub async fn get_battery_info(&self) -> Result<BatteryInfo, Error> {
        let function = self.version.descriptor().function(1)?;
        let response = self.handle.call_empty(function).await?;
        BatteryInfo::try_from(&response)
    }

    /// Asks the device to show its battery status to the user, if it has
    /// the means to (v1 and newer).
    pub async fn show_battery_status(&self) -> Result<(), Error> {
        let function = self.version.descriptor().function(2)?;
        self.handle.call_empty(function).await?;
        Ok(())
    }

    /// Waits for the next battery status event of the device.
    pub async fn next_battery_event(&self, timeout: Option<Duration>) -> Result<BatteryInfo, Error> {
        let (_, msg) = self.handle.next_event(self.version.descriptor(), &[0], timeout).await?;
        BatteryInfo::try_from(&msg)
    }
}

/// Represents the capabilites of this feature and the battery itself.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct BatteryCapabilities {
    /// All [`BatteryLevel`] variants the feature supports and reports.
    pub reported_levels: HashSet<BatteryLevel>,

    /// Whether the battery is rechargeable.
    pub rechargeable: bool,

    /// Whether the device supports reporting the current battery charge
    /// percentage in [`BatteryInfo::charging_percentage`].
    pub percentage: bool,

    /// Whether the device supports `showBatteryStatus`. Always `false` before
    /// v2, which did not report it.
    pub show_battery_status: bool,
}

impl TryFrom<&BitMessage> for BatteryCapabilities {
    type Error = MessageError;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            reported_levels: BatteryLevel::reported(msg)?,
            rechargeable: msg.uint("rechargeable")? != 0,
            percentage: msg.uint("state_of_charge")? != 0,
            show_battery_status: msg.uint("show_battery_status").is_ok_and(|value| value != 0),
        })
    }
}

/// Represents information about the current battery charge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct BatteryInfo {
    /// The current charge of the battery in percent.
    ///
    /// If [`BatteryCapabilities::percentage`] is set to `false`, this is always
    /// zero.
    pub charging_percentage: u8,

    /// The current (approximate) level of the battery.
    pub level: BatteryLevel,

    /// The current charging status of the battery.
    pub status: BatteryStatus,

    /// Whether an external power source is connected.
    pub external_power: bool,
}

impl TryFrom<&BitMessage> for BatteryInfo {
    type Error = Error;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        // Exactly one level bit is set in a status report.
        let mut levels = BatteryLevel::reported(msg)?.into_iter();
        let (Some(level), None) = (levels.next(), levels.next()) else {
            return Err(Error::UnsupportedResponse);
        };

        Ok(Self {
            charging_percentage: msg.uint("state_of_charge")? as u8,
            level,
            status: BatteryStatus::try_from(msg.uint("charging_status")? as u8)
                .map_err(|_| Error::UnsupportedResponse)?,
            external_power: msg.uint("external_power_status")? != 0,
        })
    }
}

/// Represents an approximate level of the battery charge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum BatteryLevel {
    Critical = 1,
    Low = 1 << 1,
    Good = 1 << 2,
    Full = 1 << 3,
}

impl BatteryLevel {
    fn reported(msg: &BitMessage) -> Result<HashSet<Self>, MessageError> {
        let mut levels = HashSet::new();
        for (name, level) in [
            ("critical", Self::Critical),
            ("low", Self::Low),
            ("good", Self::Good),
            ("full", Self::Full),
        ] {
            if msg.uint(name)? != 0 {
                levels.insert(level);
            }
        }
        Ok(levels)
    }
}

/// Represents the charging status of the battery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum BatteryStatus {
    Discharging = 0,
    Charging = 1,
    ChargingSlow = 2,
    Full = 3,
    Error = 4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_per_version() {
        let payload = [0b0000_1011, 0b0000_0111, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

        let v1 = UnifiedBattery::V1.descriptor().function(0).unwrap().response;
        let caps = BatteryCapabilities::try_from(&BitMessage::parse(v1, &payload).unwrap()).unwrap();
        assert_eq!(
            caps.reported_levels,
            HashSet::from([BatteryLevel::Full, BatteryLevel::Low, BatteryLevel::Critical])
        );
        assert!(caps.rechargeable);
        assert!(caps.percentage);
        assert!(!caps.show_battery_status);

        let v2 = UnifiedBattery::V2.descriptor().function(0).unwrap().response;
        let caps = BatteryCapabilities::try_from(&BitMessage::parse(v2, &payload).unwrap()).unwrap();
        assert!(caps.show_battery_status);
    }

    #[test]
    fn status_requires_a_single_level() {
        let mut payload = [0u8; 16];
        payload[..4].copy_from_slice(&[0x37, 0b0000_0100, 0x01, 0x01]);

        let info = BatteryInfo::try_from(&BitMessage::parse(&BATTERY_STATUS, &payload).unwrap()).unwrap();
        assert_eq!(info.charging_percentage, 0x37);
        assert_eq!(info.level, BatteryLevel::Good);
        assert_eq!(info.status, BatteryStatus::Charging);
        assert!(info.external_power);

        payload[1] = 0b0000_0110;
        let msg = BitMessage::parse(&BATTERY_STATUS, &payload).unwrap();
        assert!(matches!(BatteryInfo::try_from(&msg), Err(Error::UnsupportedResponse)));
    }

    #[test]
    fn show_battery_status_needs_v1() {
        assert!(UnifiedBattery::V0.descriptor().function(2).is_err());
        for version in 0..=3 {
            let descriptor = UnifiedBattery::create(version).unwrap().descriptor();
            descriptor.validate().unwrap();
            assert_eq!(descriptor.event_queue(0), QueueName::BatteryEvent);
        }
    }
}
