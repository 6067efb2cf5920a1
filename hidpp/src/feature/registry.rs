//! Maintains a registry of well-known HID++2.0 features and the descriptors
//! of those the harness implements.
//!
//! The registry is static. It is consulted by the dispatcher to decode
//! unawaited messages and to route events to the queue of the feature's
//! family.

use std::collections::HashMap;

use lazy_static::lazy_static;

use super::{
    FeatureDescriptor,
    FeatureError,
    FeatureFactory,
    FeatureFamily,
    device_type_and_name::DeviceTypeAndName,
    disable_keys::DisableKeys,
    feature_set::FeatureSet,
    hires_wheel::HiResWheel,
    report_rate::ReportRate,
    root::Root,
    smartshift::SmartShift,
    thumbwheel::Thumbwheel,
    unified_battery::UnifiedBattery,
    wireless_device_status::WirelessDeviceStatus,
};

/// Selects the descriptor of a specific version of a feature.
pub type DescriptorFactory = fn(version: u8) -> Result<&'static FeatureDescriptor, FeatureError>;

/// Represents a known HID++2.0 device feature.
#[derive(Clone, Copy, Debug)]
pub struct KnownFeature {
    /// The protocol ID of the feature.
    pub id: u16,

    /// The name of the feature.
    /// This is usually a slightly modified version of the name found in
    /// Logitech's documentation.
    pub name: &'static str,

    /// The family the feature belongs to.
    pub family: FeatureFamily,

    /// Creates the descriptor of a version, if the feature is implemented.
    pub factory: Option<DescriptorFactory>,
}

impl KnownFeature {
    /// Looks up the descriptor of a specific version.
    pub fn descriptor(&self, version: u8) -> Result<&'static FeatureDescriptor, FeatureError> {
        match self.factory {
            Some(factory) => factory(version),
            None => Err(FeatureError::UnsupportedVersion { id: self.id, version }),
        }
    }

    /// Whether descriptors are available for the feature.
    pub fn is_implemented(&self) -> bool {
        self.factory.is_some()
    }
}

/// Looks up a feature by its ID.
pub fn lookup(feature_id: u16) -> Option<KnownFeature> {
    KNOWN_FEATURES.get(&feature_id).copied()
}

/// Looks up the descriptor of a specific feature version.
pub fn descriptor(feature_id: u16, version: u8) -> Result<&'static FeatureDescriptor, FeatureError> {
    lookup(feature_id)
        .ok_or(FeatureError::UnknownFeature(feature_id))?
        .descriptor(version)
}

/// The family of a feature. Features missing in the registry are assigned by
/// the range their ID falls into.
pub fn family(feature_id: u16) -> FeatureFamily {
    lookup(feature_id).map_or_else(|| family_of_range(feature_id), |feature| feature.family)
}

/// Iterates over all known features, in no particular order.
pub fn known_features() -> impl Iterator<Item = &'static KnownFeature> {
    KNOWN_FEATURES.values()
}

fn family_of_range(feature_id: u16) -> FeatureFamily {
    match feature_id {
        0x0000..=0x00ff => FeatureFamily::Important,
        0x2000..=0x3fff => FeatureFamily::Mouse,
        0x4000..=0x5fff => FeatureFamily::Keyboard,
        0x6000..=0x7fff => FeatureFamily::Touchpad,
        0x8000..=0x8fff => FeatureFamily::Gaming,
        0x9000..=0x9fff => FeatureFamily::Peripheral,
        _ => FeatureFamily::Common,
    }
}

fn create<F: FeatureFactory>(version: u8) -> Result<&'static FeatureDescriptor, FeatureError> {
    F::create(version).map(F::descriptor)
}

fn implemented<F: FeatureFactory>() -> KnownFeature {
    let family = F::create(0).map_or_else(|_| family_of_range(F::ID), |feature| feature.descriptor().family);
    KnownFeature {
        id: F::ID,
        name: F::NAME,
        family,
        factory: Some(create::<F>),
    }
}

fn known(id: u16, name: &'static str) -> KnownFeature {
    KnownFeature {
        id,
        name,
        family: family_of_range(id),
        factory: None,
    }
}

lazy_static! {
    static ref KNOWN_FEATURES: HashMap<u16, KnownFeature> = [
        implemented::<Root>(),
        implemented::<FeatureSet>(),
        known(0x0002, "FeatureInfo"),
        known(0x0003, "DeviceInformation"),
        known(0x0004, "UnitId"),
        implemented::<DeviceTypeAndName>(),
        known(0x0006, "DeviceGroups"),
        known(0x0007, "DeviceFriendlyName"),
        known(0x0008, "KeepAlive"),
        known(0x0020, "ConfigChange"),
        known(0x0021, "UniqueRandomId"),
        known(0x0030, "TargetSoftware"),
        known(0x0080, "WirelessSignalStrength"),
        known(0x00c0, "DfuControlLegacy"),
        known(0x00c1, "DfuControlUnsigned"),
        known(0x00c2, "DfuControlSigned"),
        known(0x00c3, "DfuControl"),
        known(0x00d0, "Dfu"),
        known(0x1000, "BatteryStatus"),
        known(0x1001, "BatteryVoltage"),
        implemented::<UnifiedBattery>(),
        known(0x1010, "ChargingControl"),
        known(0x1300, "LedControl"),
        known(0x1800, "GenericTest"),
        known(0x1802, "DeviceReset"),
        known(0x1805, "OobState"),
        known(0x1806, "ConfigDeviceProps"),
        known(0x1814, "ChangeHost"),
        known(0x1815, "HostsInfo"),
        known(0x1981, "Backlight1"),
        known(0x1982, "Backlight2"),
        known(0x1983, "Backlight3"),
        known(0x1990, "Illumination"),
        known(0x1a00, "PresenterControl"),
        known(0x1a01, "Sensor3D"),
        known(0x1b00, "ReprogControls"),
        known(0x1b01, "ReprogControls2"),
        known(0x1b02, "ReprogControls3"),
        known(0x1b03, "ReprogControls4"),
        known(0x1b04, "ReprogControls5"),
        known(0x1bc0, "ReportHidUsages"),
        known(0x1c00, "PersistentRemappableAction"),
        implemented::<WirelessDeviceStatus>(),
        known(0x1df0, "RemainingPairings"),
        known(0x1f1f, "FirmwareProperties"),
        known(0x1f20, "AdcMeasurement"),
        known(0x2001, "SwapLeftRightButton"),
        known(0x2005, "ButtonSwapCancel"),
        known(0x2006, "PointerAxesOrientation"),
        known(0x2100, "VerticalScrolling"),
        implemented::<SmartShift>(),
        known(0x2111, "SmartShiftWheelEnhanced"),
        known(0x2120, "HighResolutionScrolling"),
        implemented::<HiResWheel>(),
        known(0x2130, "RatchetWheel"),
        implemented::<Thumbwheel>(),
        known(0x2200, "MousePointer"),
        known(0x2201, "AdjustableDpi"),
        known(0x2202, "ExtendedAdjustableDpi"),
        known(0x2205, "PointerMotionScaling"),
        known(0x2230, "SensorAngleSnapping"),
        known(0x2240, "SurfaceTuning"),
        known(0x2250, "XyStats"),
        known(0x2251, "WheelStats"),
        known(0x2400, "HybridTrackingEngine"),
        known(0x40a0, "FnInversion"),
        known(0x40a2, "FnInversionWithDefaultState"),
        known(0x40a3, "FnInversionForMultiHostDevices"),
        known(0x4100, "Encryption"),
        known(0x4220, "LockKeyState"),
        known(0x4301, "SolarKeyboardDashboard"),
        known(0x4520, "KeyboardLayout"),
        implemented::<DisableKeys>(),
        known(0x4522, "DisableKeysByUsage"),
        known(0x4530, "DualPlatform"),
        known(0x4531, "MultiPlatform"),
        known(0x4540, "KeyboardInternationalLayouts"),
        known(0x4600, "Crown"),
        known(0x6010, "TouchpadFwItems"),
        known(0x6011, "TouchpadSwItems"),
        known(0x6012, "TouchpadWin8FwItems"),
        known(0x6020, "TapEnable"),
        known(0x6021, "TapEnableExtended"),
        known(0x6030, "CursorBallistic"),
        known(0x6040, "TouchpadResolutionDivider"),
        known(0x6100, "TouchpadRawXy"),
        known(0x6110, "TouchMouseRawTouchPoints"),
        known(0x6120, "BtTouchMouseSettings"),
        known(0x6500, "Gestures1"),
        known(0x6501, "Gestures2"),
        known(0x8010, "GamingGKeys"),
        known(0x8020, "GamingMKeys"),
        known(0x8030, "MacroRecord"),
        known(0x8040, "BrightnessControl"),
        implemented::<ReportRate>(),
        known(0x8061, "ExtendedAdjustableReportRate"),
        known(0x8070, "ColorLedEffects"),
        known(0x8071, "RgbEffects"),
        known(0x8080, "PerKeyLighting"),
        known(0x8081, "PerKeyLighting2"),
        known(0x8090, "ModeStatus"),
        known(0x8100, "OnboardProfiles"),
        known(0x8110, "MouseButtonFilter"),
        known(0x8111, "LatencyMonitoring"),
        known(0x8120, "GamingAttachments"),
        known(0x8123, "ForceFeedback"),
        known(0x8300, "Sidetone"),
        known(0x8310, "Equalizer"),
        known(0x8320, "HeadsetOut"),
    ]
    .into_iter()
    .map(|feature| (feature.id, feature))
    .collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implemented_features_resolve_all_versions() {
        let battery = lookup(0x1004).unwrap();
        assert_eq!(battery.name, "UnifiedBattery");
        assert_eq!(battery.family, FeatureFamily::Common);
        for version in 0..=3 {
            assert_eq!(descriptor(0x1004, version).unwrap().version, version);
        }
        assert_eq!(
            descriptor(0x1004, 4).unwrap_err(),
            FeatureError::UnsupportedVersion { id: 0x1004, version: 4 }
        );
    }

    #[test]
    fn unimplemented_and_unknown_features() {
        let lights = lookup(0x8071).unwrap();
        assert!(!lights.is_implemented());
        assert_eq!(lights.family, FeatureFamily::Gaming);
        assert!(descriptor(0x8071, 0).is_err());

        assert!(lookup(0x9f42).is_none());
        assert_eq!(descriptor(0x9f42, 0).unwrap_err(), FeatureError::UnknownFeature(0x9f42));
        assert_eq!(family(0x9f42), FeatureFamily::Peripheral);
    }

    #[test]
    fn every_registered_descriptor_is_valid() {
        for feature in known_features().filter(|feature| feature.is_implemented()) {
            for version in 0..=u8::MAX {
                let Ok(descriptor) = feature.descriptor(version) else {
                    continue;
                };
                assert_eq!(descriptor.id, feature.id);
                descriptor.validate().unwrap();
            }
        }
    }
}
