//! Specific device feature implementations.
//!
//! Every HID++2.0 feature is described by one static [`FeatureDescriptor`]
//! per supported version. A descriptor lists the functions of that version,
//! each with its request and response [`Schema`], and the events the feature
//! may emit. A small versioned enum per feature implements
//! [`FeatureFactory`] and selects the descriptor matching the version a
//! device reports; a feature implementation wraps it together with the
//! addressing of the device ([`FeatureHandle`]) and offers typed methods.

use std::{any::Any, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    bitfield::{BitMessage, Schema},
    channel::HidppChannel,
    error::{Error, ProtocolError},
    protocol::{ReportSize, v20},
    queue::QueueName,
};

pub mod device_type_and_name;
pub mod disable_keys;
pub mod feature_set;
pub mod hires_wheel;
pub mod registry;
pub mod report_rate;
pub mod root;
pub mod smartshift;
pub mod thumbwheel;
pub mod unified_battery;
pub mod wireless_device_status;

/// Represents an error that occurred while resolving or instantiating a
/// feature.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FeatureError {
    /// The feature is known, but not in the requested version.
    #[error("feature {id:#06x} is not implemented for version {version}")]
    UnsupportedVersion { id: u16, version: u8 },

    /// The feature ID is not part of the registry.
    #[error("feature {0:#06x} is unknown")]
    UnknownFeature(u16),

    /// The device reported the feature as unsupported.
    #[error("the device does not support feature {0:#06x}")]
    NotSupported(u16),

    /// The feature index does not belong to a located feature.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Groups features by the kind of device they belong to. Unawaited messages
/// of a feature are routed to the event queue of its family.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FeatureFamily {
    /// Features every HID++2.0 device needs for basic operation.
    Important,

    /// Features shared by all kinds of devices.
    Common,

    Mouse,
    Keyboard,
    Touchpad,
    Gaming,

    /// Features of peripherals such as sensors or optical switches.
    Peripheral,
}

impl FeatureFamily {
    /// The queue receiving events of features of this family.
    pub fn event_queue(self) -> QueueName {
        match self {
            Self::Important => QueueName::Important,
            Self::Common => QueueName::Common,
            Self::Mouse => QueueName::Mouse,
            Self::Keyboard => QueueName::Keyboard,
            Self::Touchpad => QueueName::Touchpad,
            Self::Gaming => QueueName::Gaming,
            Self::Peripheral => QueueName::Peripheral,
        }
    }
}

/// Describes a single function of a feature version.
#[derive(Debug)]
pub struct FunctionDescriptor {
    /// The function index, sent in the upper nibble of the fourth byte.
    pub index: u8,

    pub name: &'static str,

    /// The layout of the request payload.
    pub request: &'static Schema,

    /// The layout of the response payload.
    pub response: &'static Schema,

    /// The feature-specific error codes the function may answer with, on top
    /// of the generic ones.
    pub errors: &'static [v20::ErrorCode],
}

impl FunctionDescriptor {
    pub const fn new(index: u8, name: &'static str, request: &'static Schema, response: &'static Schema) -> Self {
        Self {
            index,
            name,
            request,
            response,
            errors: &[],
        }
    }

    /// Declares the feature-specific error codes of the function.
    pub const fn with_errors(self, errors: &'static [v20::ErrorCode]) -> Self {
        Self { errors, ..self }
    }

    /// The smallest report size able to carry the request payload.
    pub fn request_size(&self) -> Result<ReportSize, ProtocolError> {
        ReportSize::fitting(self.request.byte_len()).ok_or(ProtocolError::SizeMismatch {
            expected: ReportSize::VeryLong.payload_len(),
            actual: self.request.byte_len(),
        })
    }
}

/// Describes an event a feature version may emit.
#[derive(Debug)]
pub struct EventDescriptor {
    /// The event index, sent in the upper nibble of the fourth byte in place
    /// of the function index.
    pub index: u8,

    pub name: &'static str,

    /// The layout of the event payload.
    pub schema: &'static Schema,

    /// Overrides the queue of the feature family for this event.
    pub queue: Option<QueueName>,
}

impl EventDescriptor {
    pub const fn new(index: u8, name: &'static str, schema: &'static Schema) -> Self {
        Self {
            index,
            name,
            schema,
            queue: None,
        }
    }

    /// Routes the event to a specific queue instead of the family queue.
    pub const fn routed_to(self, queue: QueueName) -> Self {
        Self {
            queue: Some(queue),
            ..self
        }
    }
}

/// Describes one version of a HID++2.0 feature.
#[derive(Debug)]
pub struct FeatureDescriptor {
    pub id: u16,
    pub name: &'static str,
    pub version: u8,
    pub family: FeatureFamily,
    pub functions: &'static [FunctionDescriptor],
    pub events: &'static [EventDescriptor],
}

impl FeatureDescriptor {
    /// Looks up a function by its index.
    pub fn function(&self, index: u8) -> Result<&FunctionDescriptor, ProtocolError> {
        self.functions
            .iter()
            .find(|function| function.index == index)
            .ok_or(ProtocolError::UnknownFunctionIndex {
                feature_id: self.id,
                version: self.version,
                function: index,
            })
    }

    /// Looks up an event by its index.
    pub fn event(&self, index: u8) -> Option<&EventDescriptor> {
        self.events.iter().find(|event| event.index == index)
    }

    /// The highest function index the version declares.
    pub fn max_function_index(&self) -> u8 {
        self.functions
            .iter()
            .map(|function| function.index)
            .max()
            .unwrap_or(0)
    }

    /// The queue receiving the given event of this feature.
    pub fn event_queue(&self, index: u8) -> QueueName {
        self.event(index)
            .and_then(|event| event.queue)
            .unwrap_or(self.family.event_queue())
    }

    /// Checks that every function index up to the maximum is declared exactly
    /// once, that event indices are unique and that all schemas are
    /// consistent and fit into a HID++ report.
    pub fn validate(&self) -> Result<(), String> {
        // Event-only features declare no functions at all.
        let indices = if self.functions.is_empty() { 0..0 } else { 0..self.max_function_index() + 1 };
        for index in indices {
            let count = self
                .functions
                .iter()
                .filter(|function| function.index == index)
                .count();
            if count != 1 {
                return Err(format!(
                    "{} v{}: function {index} is declared {count} times",
                    self.name, self.version
                ));
            }
        }

        for (i, event) in self.events.iter().enumerate() {
            if self.events[..i].iter().any(|other| other.index == event.index) {
                return Err(format!(
                    "{} v{}: event {} is declared twice",
                    self.name, self.version, event.index
                ));
            }
            event.schema.validate_layout()?;
        }

        for function in self.functions {
            function.request.validate_layout()?;
            function.response.validate_layout()?;
            function.request_size().map_err(|err| format!("{}.{}: {err}", self.name, function.name))?;
            if function.response.byte_len() > ReportSize::VeryLong.payload_len() {
                return Err(format!("{}.{}: response does not fit into a report", self.name, function.name));
            }
        }
        Ok(())
    }
}

/// Selects the [`FeatureDescriptor`] of a feature version.
///
/// Implemented by one small enum per feature, whose variants are the
/// supported versions.
pub trait FeatureFactory: Copy + Send + Sync + 'static {
    /// The protocol ID of the feature.
    const ID: u16;

    /// The name of the feature.
    const NAME: &'static str;

    /// Selects the implementation of a specific version.
    ///
    /// Returns [`FeatureError::UnsupportedVersion`] for versions that are not
    /// implemented.
    fn create(version: u8) -> Result<Self, FeatureError>;

    /// The selected version.
    fn version(self) -> u8;

    /// The descriptor of the selected version.
    fn descriptor(self) -> &'static FeatureDescriptor;
}

/// The device a feature implementation talks to.
#[derive(Clone)]
pub struct FeatureHandle {
    chan: Arc<HidppChannel>,
    device_index: u8,
    feature_index: u8,
}

impl FeatureHandle {
    /// Addresses a feature the feature index cache of the channel knows.
    ///
    /// Fails with [`ProtocolError::UnknownFeatureIndex`] if no feature was
    /// located at `feature_index` of the device.
    pub fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Result<Self, ProtocolError> {
        if chan.cache().feature_at(device_index, feature_index).is_none() {
            return Err(ProtocolError::UnknownFeatureIndex {
                device_index,
                feature_index,
            });
        }

        Ok(Self {
            chan,
            device_index,
            feature_index,
        })
    }

    /// The underlying HID++ channel.
    pub fn channel(&self) -> &Arc<HidppChannel> {
        &self.chan
    }

    pub fn device_index(&self) -> u8 {
        self.device_index
    }

    /// The index of the feature in the device's feature table.
    pub fn feature_index(&self) -> u8 {
        self.feature_index
    }

    /// Calls a function of the feature and decodes its response.
    pub async fn call(&self, function: &'static FunctionDescriptor, request: &BitMessage) -> Result<BitMessage, Error> {
        self.chan
            .call(self.device_index, self.feature_index, function, request)
            .await
    }

    /// Calls a function that takes no arguments.
    pub async fn call_empty(&self, function: &'static FunctionDescriptor) -> Result<BitMessage, Error> {
        self.call(function, &BitMessage::new(function.request)).await
    }

    /// Waits for the next occurrence of one of the given events of this
    /// feature and decodes it.
    ///
    /// The events are looked for in the queue the first of them is routed
    /// to. Other messages in that queue stay untouched.
    pub async fn next_event(
        &self,
        feature: &'static FeatureDescriptor,
        events: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(&'static EventDescriptor, BitMessage), Error> {
        let queue = feature.event_queue(events.first().copied().unwrap_or(0));
        let (device_index, feature_index) = (self.device_index, self.feature_index);
        let msg = self
            .chan
            .queue(queue)
            .get_filtered(timeout, |msg| {
                msg.as_hidpp().is_some_and(|rx| {
                    let header = rx.message.header();
                    header.device_index == device_index
                        && header.feature_index == feature_index
                        && events.contains(&header.function_id().to_lo())
                })
            })
            .await?;

        let rx = msg.into_hidpp().ok_or(Error::UnsupportedResponse)?;
        let event = feature
            .event(rx.message.header().function_id().to_lo())
            .ok_or(Error::UnsupportedResponse)?;
        match rx.decoded {
            Some(decoded) if decoded.schema().name == event.schema.name => Ok((event, decoded)),
            _ => Ok((event, BitMessage::parse(event.schema, rx.message.payload())?)),
        }
    }
}

/// Represents a concrete implementation of a HID++2.0 device feature.
pub trait Feature: Any + Send + Sync {
    /// The descriptor of the version the implementation was created for.
    fn descriptor(&self) -> &'static FeatureDescriptor;
}

/// Represents a [`Feature`] that can be instantiated automatically.
pub trait CreatableFeature: Feature + Sized {
    /// The protocol ID of the implemented feature.
    const ID: u16;

    /// Creates a new instance of the feature implementation for the version
    /// the device reported.
    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError>;
}

/// A bitfield describing some properties of a feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureType {
    /// An obsolete feature has been replaced by a newer one, but is still
    /// advertised for older software.
    pub obsolete: bool,

    /// A hidden feature should not be used by end user configuration
    /// software.
    pub hidden: bool,

    /// An engineering feature is disabled for user software and only used for
    /// testing and manufacturing.
    pub engineering: bool,

    /// A manufacturing feature that can be permanently deactivated.
    pub manufacturing_deactivatable: bool,

    /// A compliance feature that can be permanently deactivated.
    pub compliance_deactivatable: bool,
}

impl FeatureType {
    /// Reads the flags from the type fields of a `getFeature` or
    /// `getFeatureId` response. Fields missing in older versions read as
    /// unset.
    pub fn from_message(msg: &BitMessage) -> Self {
        let flag = |name: &str| msg.uint(name).is_ok_and(|value| value != 0);
        Self {
            obsolete: flag("obsolete"),
            hidden: flag("hidden"),
            engineering: flag("engineering"),
            manufacturing_deactivatable: flag("manufacturing_deactivatable"),
            compliance_deactivatable: flag("compliance_deactivatable"),
        }
    }
}

impl From<u8> for FeatureType {
    fn from(value: u8) -> Self {
        Self {
            obsolete: value & (1 << 7) != 0,
            hidden: value & (1 << 6) != 0,
            engineering: value & (1 << 5) != 0,
            manufacturing_deactivatable: value & (1 << 4) != 0,
            compliance_deactivatable: value & (1 << 3) != 0,
        }
    }
}

impl From<FeatureType> for u8 {
    fn from(value: FeatureType) -> Self {
        [
            value.obsolete,
            value.hidden,
            value.engineering,
            value.manufacturing_deactivatable,
            value.compliance_deactivatable,
        ]
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .fold(0, |raw, (i, _)| raw | (1 << (7 - i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::CachedFeature,
        config::ChannelConfig,
        report::ReportMap,
        transport::emulated::EmulatedTransport,
    };

    #[test]
    fn feature_type_bits() {
        let typ = FeatureType::from(0b1010_1000);
        assert!(typ.obsolete);
        assert!(!typ.hidden);
        assert!(typ.engineering);
        assert!(typ.compliance_deactivatable);
        assert_eq!(u8::from(typ), 0b1010_1000);
    }

    #[test]
    fn unknown_function_names_feature_and_version() {
        let descriptor = root::Root::V1.descriptor();
        assert_eq!(descriptor.max_function_index(), 1);
        assert_eq!(
            descriptor.function(2).unwrap_err(),
            ProtocolError::UnknownFunctionIndex {
                feature_id: 0x0000,
                version: 1,
                function: 2
            }
        );
    }

    #[test]
    fn events_default_to_their_family_queue() {
        let descriptor = hires_wheel::HiResWheel::V0.descriptor();
        assert_eq!(descriptor.event_queue(0), QueueName::Mouse);

        let descriptor = unified_battery::UnifiedBattery::V0.descriptor();
        assert_eq!(descriptor.event_queue(0), QueueName::BatteryEvent);
    }

    #[test]
    fn handles_need_a_located_feature() {
        let (transport, _peer) = EmulatedTransport::new(0x046d, 0xb034);
        let chan = Arc::new(HidppChannel::new(
            "device",
            Arc::new(transport),
            ChannelConfig::default(),
            ReportMap::default(),
        ));

        assert!(matches!(
            FeatureHandle::new(Arc::clone(&chan), 0x01, 0x07),
            Err(ProtocolError::UnknownFeatureIndex {
                device_index: 0x01,
                feature_index: 0x07
            })
        ));
        assert!(matches!(
            hires_wheel::HiResWheelFeature::new(Arc::clone(&chan), 0x01, 0x07, 0),
            Err(FeatureError::Protocol(ProtocolError::UnknownFeatureIndex { .. }))
        ));

        // The root feature is always at index 0.
        assert!(FeatureHandle::new(Arc::clone(&chan), 0x01, 0x00).is_ok());

        chan.cache().insert(0x01, CachedFeature {
            id: hires_wheel::HiResWheel::ID,
            index: 0x07,
            version: 0,
            typ: FeatureType::default(),
        });
        let handle = FeatureHandle::new(Arc::clone(&chan), 0x01, 0x07).unwrap();
        assert_eq!(handle.feature_index(), 0x07);
        assert!(hires_wheel::HiResWheelFeature::new(chan, 0x01, 0x07, 0).is_ok());
    }
}
