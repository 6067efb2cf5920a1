//! Implements the FeatureSet feature (ID `0x0001`) that allow enumerating all
//! the features supported by a device.

use std::sync::Arc;

use super::{
    CreatableFeature,
    Feature,
    FeatureDescriptor,
    FeatureError,
    FeatureFactory,
    FeatureFamily,
    FeatureHandle,
    FeatureType,
    FunctionDescriptor,
};
use crate::{
    bitfield::{BitMessage, FieldDescriptor, MessageError, Schema},
    channel::HidppChannel,
    error::Error,
};

static GET_COUNT_REQUEST: Schema = Schema::new("GetCount", &[FieldDescriptor::new(0xfa, 24, "Padding", "padding")]);

static GET_COUNT_RESPONSE: Schema = Schema::new("GetCountResponse", &[
    FieldDescriptor::new(0xfa, 8, "Count", "count"),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

static GET_FEATURE_ID_REQUEST: Schema = Schema::new("GetFeatureId", &[
    FieldDescriptor::new(0xfa, 8, "Feature Index", "feature_index").with_aliases(&["featureIndex"]),
    FieldDescriptor::new(0xf9, 16, "Padding", "padding"),
]);

static GET_FEATURE_ID_RESPONSE_V0: Schema = Schema::new("GetFeatureIdResponseV0", &[
    FieldDescriptor::new(0xfa, 16, "Feature ID", "feature_id").with_aliases(&["featureId"]),
    FieldDescriptor::new(0xf9, 1, "Obsolete", "obsolete"),
    FieldDescriptor::new(0xf8, 1, "Hidden", "hidden"),
    FieldDescriptor::new(0xf7, 1, "Engineering", "engineering"),
    FieldDescriptor::new(0xf6, 5, "Reserved", "reserved"),
    FieldDescriptor::new(0xf5, 104, "Padding", "padding"),
]);

static GET_FEATURE_ID_RESPONSE_V1: Schema = Schema::new("GetFeatureIdResponseV1", &[
    FieldDescriptor::new(0xfa, 16, "Feature ID", "feature_id").with_aliases(&["featureId"]),
    FieldDescriptor::new(0xf9, 1, "Obsolete", "obsolete"),
    FieldDescriptor::new(0xf8, 1, "Hidden", "hidden"),
    FieldDescriptor::new(0xf7, 1, "Engineering", "engineering"),
    FieldDescriptor::new(0xf6, 5, "Reserved", "reserved"),
    FieldDescriptor::new(0xf5, 8, "Feature Version", "feature_version").with_aliases(&["featureVersion"]),
    FieldDescriptor::new(0xf4, 96, "Padding", "padding"),
]);

static GET_FEATURE_ID_RESPONSE_V2: Schema = Schema::new("GetFeatureIdResponseV2", &[
    FieldDescriptor::new(0xfa, 16, "Feature ID", "feature_id").with_aliases(&["featureId"]),
    FieldDescriptor::new(0xf9, 1, "Obsolete", "obsolete"),
    FieldDescriptor::new(0xf8, 1, "Hidden", "hidden"),
    FieldDescriptor::new(0xf7, 1, "Engineering", "engineering"),
    FieldDescriptor::new(0xf6, 1, "Manufacturing Deactivatable", "manufacturing_deactivatable"),
    FieldDescriptor::new(0xf5, 1, "Compliance Deactivatable", "compliance_deactivatable"),
    FieldDescriptor::new(0xf4, 3, "Reserved", "reserved"),
    FieldDescriptor::new(0xf3, 8, "Feature Version", "feature_version").with_aliases(&["featureVersion"]),
    FieldDescriptor::new(0xf2, 96, "Padding", "padding"),
]);

const fn functions(get_feature_id_response: &'static Schema) -> [FunctionDescriptor; 2] {
    [
        FunctionDescriptor::new(0, "getCount", &GET_COUNT_REQUEST, &GET_COUNT_RESPONSE),
        FunctionDescriptor::new(1, "getFeatureId", &GET_FEATURE_ID_REQUEST, get_feature_id_response),
    ]
}

static FUNCTIONS_V0: [FunctionDescriptor; 2] = functions(&GET_FEATURE_ID_RESPONSE_V0);
static FUNCTIONS_V1: [FunctionDescriptor; 2] = functions(&GET_FEATURE_ID_RESPONSE_V1);
static FUNCTIONS_V2: [FunctionDescriptor; 2] = functions(&GET_FEATURE_ID_RESPONSE_V2);

const fn descriptor(version: u8, functions: &'static [FunctionDescriptor]) -> FeatureDescriptor {
    FeatureDescriptor {
        id: FeatureSet::ID,
        name: FeatureSet::NAME,
        version,
        family: FeatureFamily::Important,
        functions,
        events: &[],
    }
}

static FEATURE_SET_V0: FeatureDescriptor = descriptor(0, &FUNCTIONS_V0);
static FEATURE_SET_V1: FeatureDescriptor = descriptor(1, &FUNCTIONS_V1);
static FEATURE_SET_V2: FeatureDescriptor = descriptor(2, &FUNCTIONS_V2);

/// The versions of the `FeatureSet` / `0x0001` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FeatureSet {
    V0,

    /// Reports the version of every feature.
    V1,

    /// Adds the deactivatable type flags.
    V2,
}

impl FeatureFactory for FeatureSet {
    const ID: u16 = 0x0001;
    const NAME: &'static str = "FeatureSet";

    fn create(version: u8) -> Result<Self, FeatureError> {
        match version {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            _ => Err(FeatureError::UnsupportedVersion { id: Self::ID, version }),
        }
    }

    fn version(self) -> u8 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    fn descriptor(self) -> &'static FeatureDescriptor {
        match self {
            Self::V0 => &FEATURE_SET_V0,
            Self::V1 => &FEATURE_SET_V1,
            Self::V2 => &FEATURE_SET_V2,
        }
    }
}

/// Implements the `FeatureSet` / `0x0001` feature.
///
/// This feature is primarily used to collect all features supported by the
/// device. To achieve this, call [`Self::count`] to retrieve the amount of
/// supported features (excluding the root feature). Then call
/// [`Self::get_feature`] for every `i in 1..=count` (1-based, as accessing the
/// root feature is not allowed), or let [`Self::features`] do it.
#[derive(Clone)]
pub struct FeatureSetFeature {
    handle: FeatureHandle,
    version: FeatureSet,
}

impl Feature for FeatureSetFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for FeatureSetFeature {
    const ID: u16 = FeatureSet::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, feature_index)?,
            version: FeatureSet::create(version)?,
        })
    }
}

impl FeatureSetFeature {
    /// Retrieves the amount of features supported by the device, not including
    /// the root feature.
    pub async fn count(&self) -> Result<u8, Error> {
        let function = self.version.descriptor().function(0)?;
        let response = self.handle.call_empty(function).await?;
        Ok(response.uint("count")? as u8)
    }

    /// Retrieves the information about a specific feature based on its index in
    /// the feature table.
    ///
    /// Feature index `0` for the root feature is not allowed.
    pub async fn get_feature(&self, index: u8) -> Result<FeatureInformation, Error> {
        let function = self.version.descriptor().function(1)?;
        let request = BitMessage::new(function.request).with("feature_index", index)?;
        let response = self.handle.call(function, &request).await?;
        Ok(FeatureInformation::try_from(&response)?)
    }

    /// Retrieves the whole feature table, excluding the root feature, as
    /// `(index, information)` pairs.
    pub async fn features(&self) -> Result<Vec<(u8, FeatureInformation)>, Error> {
        let count = self.count().await?;

        let mut features = Vec::with_capacity(usize::from(count));
        for index in 1..=count {
            features.push((index, self.get_feature(index).await?));
        }
        Ok(features)
    }
}

/// Represents information about a specific feature as returned by the
/// [`FeatureSetFeature::get_feature`] function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct FeatureInformation {
    /// The protocol ID of the feature.
    pub id: u16,

    /// The type of the feature.
    pub typ: FeatureType,

    /// The latest supported version of the feature.
    ///
    /// Multi-version features are always backwards compatible as long as the
    /// feature ID does not change, meaning functions implemented for an older
    /// version of the same feature will behave as expected for every later
    /// version.
    ///
    /// This field was added in feature version 1 and will be `0` for all older
    /// versions.
    pub version: u8,
}

impl TryFrom<&BitMessage> for FeatureInformation {
    type Error = MessageError;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            id: msg.uint("feature_id")? as u16,
            typ: FeatureType::from_message(msg),
            version: msg.uint("feature_version").unwrap_or(0) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_feature_id_decodes_per_version() {
        let mut payload = [0u8; 16];
        payload[..4].copy_from_slice(&[0x1b, 0x04, 0b1001_0000, 0x05]);

        let v0 = FeatureSet::V0.descriptor().function(1).unwrap().response;
        let info = FeatureInformation::try_from(&BitMessage::parse(v0, &payload).unwrap()).unwrap();
        assert_eq!(info.id, 0x1b04);
        assert_eq!(info.version, 0);
        assert!(info.typ.obsolete);
        assert!(!info.typ.manufacturing_deactivatable);

        let v2 = FeatureSet::V2.descriptor().function(1).unwrap().response;
        let info = FeatureInformation::try_from(&BitMessage::parse(v2, &payload).unwrap()).unwrap();
        assert_eq!(info.version, 5);
        assert!(info.typ.manufacturing_deactivatable);
    }

    #[test]
    fn descriptors_are_consistent() {
        for version in 0..=2 {
            FeatureSet::create(version).unwrap().descriptor().validate().unwrap();
        }
        assert!(FeatureSet::create(3).is_err());
    }
}
