//! Implements the `ReportRate` feature (ID `0x8060`) that adjusts the
//! interval gaming devices send their HID reports in.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

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

static EMPTY_REQUEST: Schema = Schema::new("ReportRateRequest", &[FieldDescriptor::new(0xfa, 24, "Padding", "padding")]);

static GET_REPORT_RATE_LIST_RESPONSE: Schema = Schema::new("GetReportRateListResponse", &[
    FieldDescriptor::new(0xfa, 8, "Report Rate List", "report_rate_list").with_aliases(&["reportRateList"]),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

static GET_REPORT_RATE_RESPONSE: Schema = Schema::new("GetReportRateResponse", &[
    FieldDescriptor::new(0xfa, 8, "Report Rate", "report_rate").with_aliases(&["reportRate"]),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

static SET_REPORT_RATE_REQUEST: Schema = Schema::new("SetReportRate", &[
    FieldDescriptor::new(0xfa, 8, "Report Rate", "report_rate")
        .with_aliases(&["reportRate"])
        .with_default(1)
        .with_checks(&[Check::Range { min: 1, max: 8 }]),
    FieldDescriptor::new(0xf9, 16, "Padding", "padding"),
]);

static SET_REPORT_RATE_RESPONSE: Schema =
    Schema::new("SetReportRateResponse", &[FieldDescriptor::new(0xfa, 128, "Padding", "padding")]);

static FUNCTIONS: [FunctionDescriptor; 3] = [
    FunctionDescriptor::new(0, "getReportRateList", &EMPTY_REQUEST, &GET_REPORT_RATE_LIST_RESPONSE),
    FunctionDescriptor::new(1, "getReportRate", &EMPTY_REQUEST, &GET_REPORT_RATE_RESPONSE),
    FunctionDescriptor::new(2, "setReportRate", &SET_REPORT_RATE_REQUEST, &SET_REPORT_RATE_RESPONSE),
];

static REPORT_RATE_V0: FeatureDescriptor = FeatureDescriptor {
    id: ReportRate::ID,
    name: ReportRate::NAME,
    version: 0,
    family: FeatureFamily::Gaming,
    functions: &FUNCTIONS,
    events: &[],
};

/// The versions of the `ReportRate` / `0x8060` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ReportRate {
    V0,
}

impl FeatureFactory for ReportRate {
    const ID: u16 = 0x8060;
    const NAME: &'static str = "ReportRate";

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
        &REPORT_RATE_V0
    }
}

/// Implements the `ReportRate` / `0x8060` feature.
#[derive(Clone)]
pub struct ReportRateFeature {
    handle: FeatureHandle,
    version: ReportRate,
}

impl Feature for ReportRateFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for ReportRateFeature {
    const ID: u16 = ReportRate::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, feature_index)?,
            version: ReportRate::create(version)?,
        })
    }
}

impl ReportRateFeature {
    /// Retrieves the report intervals the device supports, in milliseconds.
    pub async fn get_report_rate_list(&self) -> Result<BTreeSet<u8>, Error> {
        let function = self.version.descriptor().function(0)?;
        let response = self.handle.call_empty(function).await?;
        Ok(rates_from_list(response.uint("report_rate_list")? as u8))
    }

    /// Retrieves the current report interval.
    pub async fn get_report_rate(&self) -> Result<Duration, Error> {
        let function = self.version.descriptor().function(1)?;
        let response = self.handle.call_empty(function).await?;
        Ok(Duration::from_millis(response.uint("report_rate")?))
    }

    /// Sets the report interval in milliseconds.
    ///
    /// Only values returned by [`Self::get_report_rate_list`] are accepted by
    /// the device.
    pub async fn set_report_rate(&self, millis: u8) -> Result<(), Error> {
        let function = self.version.descriptor().function(2)?;
        let request = BitMessage::new(function.request).with("report_rate", millis)?;

        self.handle.call(function, &request).await?;
        Ok(())
    }
}

/// Bit `n` of the list announces support for an interval of `n + 1` ms.
fn rates_from_list(list: u8) -> BTreeSet<u8> {
    (0..8)
        .filter(|bit| list & (1 << bit) != 0)
        .map(|bit| bit + 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_list_bits() {
        assert_eq!(rates_from_list(0b1000_1011), BTreeSet::from([1, 2, 4, 8]));
        assert!(rates_from_list(0).is_empty());
    }

    #[test]
    fn rate_is_range_checked() {
        let request = BitMessage::new(&SET_REPORT_RATE_REQUEST);
        assert_eq!(request.serialize().unwrap(), vec![0x01, 0x00, 0x00]);
        assert!(request.clone().with("reportRate", 0u8).is_err());
        assert!(request.clone().with("report_rate", 9u8).is_err());
        assert_eq!(request.with("report_rate", 8u8).unwrap().serialize().unwrap()[0], 8);
        ReportRate::V0.descriptor().validate().unwrap();
    }
}
