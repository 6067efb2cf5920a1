//! Implements the Root feature (ID `0x0000`) that every device supports by
//! default.
//!
//! Root is always located at feature index 0. Its `getFeature` function maps
//! feature IDs to the indices of the device's feature table.

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
    protocol::ProtocolVersion,
};

/// The feature index Root is always located at.
pub const ROOT_FEATURE_INDEX: u8 = 0x00;

static GET_FEATURE_REQUEST: Schema = Schema::new("GetFeature", &[
    FieldDescriptor::new(0xfa, 16, "Feature ID", "feature_id").with_aliases(&["featureId"]),
    FieldDescriptor::new(0xf9, 8, "Padding", "padding"),
]);

static GET_FEATURE_RESPONSE_V0: Schema = Schema::new("GetFeatureResponseV0", &[
    FieldDescriptor::new(0xfa, 8, "Feature Index", "feature_index").with_aliases(&["featIndex"]),
    FieldDescriptor::new(0xf9, 1, "Obsolete", "obsolete"),
    FieldDescriptor::new(0xf8, 1, "Hidden", "hidden"),
    FieldDescriptor::new(0xf7, 1, "Engineering", "engineering"),
    FieldDescriptor::new(0xf6, 5, "Reserved", "reserved"),
    FieldDescriptor::new(0xf5, 112, "Padding", "padding"),
]);

static GET_FEATURE_RESPONSE_V1: Schema = Schema::new("GetFeatureResponseV1", &[
    FieldDescriptor::new(0xfa, 8, "Feature Index", "feature_index").with_aliases(&["featIndex"]),
    FieldDescriptor::new(0xf9, 1, "Obsolete", "obsolete"),
    FieldDescriptor::new(0xf8, 1, "Hidden", "hidden"),
    FieldDescriptor::new(0xf7, 1, "Engineering", "engineering"),
    FieldDescriptor::new(0xf6, 5, "Reserved", "reserved"),
    FieldDescriptor::new(0xf5, 8, "Feature Version", "feature_version").with_aliases(&["featVer"]),
    FieldDescriptor::new(0xf4, 104, "Padding", "padding"),
]);

static GET_FEATURE_RESPONSE_V2: Schema = Schema::new("GetFeatureResponseV2", &[
    FieldDescriptor::new(0xfa, 8, "Feature Index", "feature_index").with_aliases(&["featIndex"]),
    FieldDescriptor::new(0xf9, 1, "Obsolete", "obsolete"),
    FieldDescriptor::new(0xf8, 1, "Hidden", "hidden"),
    FieldDescriptor::new(0xf7, 1, "Engineering", "engineering"),
    FieldDescriptor::new(0xf6, 1, "Manufacturing Deactivatable", "manufacturing_deactivatable"),
    FieldDescriptor::new(0xf5, 1, "Compliance Deactivatable", "compliance_deactivatable"),
    FieldDescriptor::new(0xf4, 3, "Reserved", "reserved"),
    FieldDescriptor::new(0xf3, 8, "Feature Version", "feature_version").with_aliases(&["featVer"]),
    FieldDescriptor::new(0xf2, 104, "Padding", "padding"),
]);

static GET_PROTOCOL_VERSION_REQUEST: Schema = Schema::new("GetProtocolVersion", &[
    FieldDescriptor::new(0xfa, 16, "Zero", "zero"),
    FieldDescriptor::new(0xf9, 8, "Ping Data", "ping_data").with_aliases(&["pingData"]),
]);

static GET_PROTOCOL_VERSION_RESPONSE: Schema = Schema::new("GetProtocolVersionResponse", &[
    FieldDescriptor::new(0xfa, 8, "Protocol Number", "protocol_number"),
    FieldDescriptor::new(0xf9, 8, "Target Software", "target_software"),
    FieldDescriptor::new(0xf8, 8, "Ping Data", "ping_data").with_aliases(&["pingData"]),
    FieldDescriptor::new(0xf7, 104, "Padding", "padding"),
]);

const fn functions(get_feature_response: &'static Schema) -> [FunctionDescriptor; 2] {
    [
        FunctionDescriptor::new(0, "getFeature", &GET_FEATURE_REQUEST, get_feature_response),
        FunctionDescriptor::new(1, "getProtocolVersion", &GET_PROTOCOL_VERSION_REQUEST, &GET_PROTOCOL_VERSION_RESPONSE),
    ]
}

static FUNCTIONS_V0: [FunctionDescriptor; 2] = functions(&GET_FEATURE_RESPONSE_V0);
static FUNCTIONS_V1: [FunctionDescriptor; 2] = functions(&GET_FEATURE_RESPONSE_V1);
static FUNCTIONS_V2: [FunctionDescriptor; 2] = functions(&GET_FEATURE_RESPONSE_V2);

const fn descriptor(version: u8, functions: &'static [FunctionDescriptor]) -> FeatureDescriptor {
    FeatureDescriptor {
        id: Root::ID,
        name: Root::NAME,
        version,
        family: FeatureFamily::Important,
        functions,
        events: &[],
    }
}

static ROOT_V0: FeatureDescriptor = descriptor(0, &FUNCTIONS_V0);
static ROOT_V1: FeatureDescriptor = descriptor(1, &FUNCTIONS_V1);
static ROOT_V2: FeatureDescriptor = descriptor(2, &FUNCTIONS_V2);

/// The versions of the `Root` / `0x0000` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Root {
    V0,
    V1,

    /// Adds the deactivatable type flags.
    V2,
}

impl Root {
    /// The newest known version. Its `getFeature` response is a superset of
    /// the older ones, whose devices leave the additional bits zero.
    pub const LATEST: Root = Root::V2;
}

impl FeatureFactory for Root {
    const ID: u16 = 0x0000;
    const NAME: &'static str = "Root";

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
            Self::V0 => &ROOT_V0,
            Self::V1 => &ROOT_V1,
            Self::V2 => &ROOT_V2,
        }
    }
}

/// Implements the `Root` / `0x0000` feature that every HID++2.0 device
/// supports by default.
///
/// This implementation is added automatically to any [`crate::device::Device`]
/// created using [`crate::device::Device::new`].
#[derive(Clone)]
pub struct RootFeature {
    handle: FeatureHandle,
    version: Root,
}

impl Feature for RootFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for RootFeature {
    const ID: u16 = Root::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, _: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, ROOT_FEATURE_INDEX)?,
            version: Root::create(version)?,
        })
    }
}

impl RootFeature {
    /// Retrieves information about a specific feature ID, including its index
    /// in the feature table, its type and its version.
    ///
    /// If the feature is not supported by the device, [`None`] is returned.
    pub async fn get_feature(&self, id: u16) -> Result<Option<FeatureInformation>, Error> {
        let function = self.version.descriptor().function(0)?;
        let response = self.handle.call(function, &get_feature_request(id)?).await?;

        let info = FeatureInformation::try_from(&response)?;
        Ok((info.index != 0 || id == Root::ID).then_some(info))
    }

    /// Retrieves the protocol version of the device, echoing a ping byte.
    pub async fn get_protocol_version(&self, ping_data: u8) -> Result<ProtocolVersion, Error> {
        let response = self.ping_raw(ping_data).await?;
        Ok(ProtocolVersion::V20 {
            protocol_num: response.uint("protocol_number")? as u8,
            target_sw: response.uint("target_software")? as u8,
        })
    }

    /// Pings the device with an arbitrary data byte. The device will respond
    /// with the same data if communication succeeds.
    pub async fn ping(&self, data: u8) -> Result<u8, Error> {
        Ok(self.ping_raw(data).await?.uint("ping_data")? as u8)
    }

    async fn ping_raw(&self, data: u8) -> Result<BitMessage, Error> {
        let function = self.version.descriptor().function(1)?;
        let request = BitMessage::new(function.request).with("ping_data", data)?;
        self.handle.call(function, &request).await
    }
}

/// Builds the payload of a `getFeature` request.
pub fn get_feature_request(id: u16) -> Result<BitMessage, MessageError> {
    BitMessage::new(&GET_FEATURE_REQUEST).with("feature_id", id)
}

/// Represents information about a specific feature as returned by the
/// [`RootFeature::get_feature`] function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureInformation {
    /// The index of the feature in the feature table.
    /// This is used for invocations of functions of that feature.
    pub index: u8,

    /// The type of the feature.
    pub typ: FeatureType,

    /// The latest supported version of the feature. Root v0 does not report
    /// versions, in which case this is `0`.
    pub version: u8,
}

impl TryFrom<&BitMessage> for FeatureInformation {
    type Error = MessageError;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            index: msg.uint("feature_index")? as u8,
            typ: FeatureType::from_message(msg),
            version: msg.uint("feature_version").unwrap_or(0) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_feature_request_layout() {
        let request = get_feature_request(0x1b10).unwrap();
        assert_eq!(request.serialize().unwrap(), vec![0x1b, 0x10, 0x00]);
        assert_eq!(request.schema().byte_len(), 3);
    }

    #[test]
    fn responses_decode_per_version() {
        let mut payload = [0u8; 16];
        payload[0] = 0x05;
        payload[1] = 0b0101_1000;
        payload[2] = 0x02;

        let v0 = BitMessage::parse(Root::V0.descriptor().function(0).unwrap().response, &payload).unwrap();
        let info = FeatureInformation::try_from(&v0).unwrap();
        assert_eq!(info.index, 5);
        assert_eq!(info.version, 0);
        assert!(info.typ.hidden);
        assert!(!info.typ.manufacturing_deactivatable);

        let v2 = BitMessage::parse(Root::V2.descriptor().function(0).unwrap().response, &payload).unwrap();
        let info = FeatureInformation::try_from(&v2).unwrap();
        assert_eq!(info.version, 2);
        assert!(info.typ.manufacturing_deactivatable);
        assert!(info.typ.compliance_deactivatable);
    }

    #[test]
    fn unknown_versions_are_rejected() {
        assert_eq!(
            Root::create(3).unwrap_err(),
            FeatureError::UnsupportedVersion { id: 0x0000, version: 3 }
        );
        for version in 0..=2 {
            let root = Root::create(version).unwrap();
            assert_eq!(root.version(), version);
            root.descriptor().validate().unwrap();
        }
    }
}
