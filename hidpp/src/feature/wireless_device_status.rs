//! Implements the `WirelessDeviceStatus` feature (ID `0x1d4b`) that announces
//! (re)connections of wireless devices.
//!
//! The feature has no functions; it only broadcasts `statusBroadcast` events.

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
};
use crate::{
    bitfield::{BitMessage, FieldDescriptor, Schema},
    channel::HidppChannel,
    error::Error,
};

static STATUS_BROADCAST: Schema = Schema::new("StatusBroadcast", &[
    FieldDescriptor::new(0xfa, 8, "Status", "status"),
    FieldDescriptor::new(0xf9, 8, "Request", "request"),
    FieldDescriptor::new(0xf8, 8, "Reason", "reason"),
    FieldDescriptor::new(0xf7, 104, "Padding", "padding"),
]);

static EVENTS: [EventDescriptor; 1] = [EventDescriptor::new(0, "statusBroadcast", &STATUS_BROADCAST)];

static WIRELESS_DEVICE_STATUS_V0: FeatureDescriptor = FeatureDescriptor {
    id: WirelessDeviceStatus::ID,
    name: WirelessDeviceStatus::NAME,
    version: 0,
    family: FeatureFamily::Common,
    functions: &[],
    events: &EVENTS,
};

/// The versions of the `WirelessDeviceStatus` / `0x1d4b` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum WirelessDeviceStatus {
    V0,
}

impl FeatureFactory for WirelessDeviceStatus {
    const ID: u16 = 0x1d4b;
    const NAME: &'static str = "WirelessDeviceStatus";

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
        &WIRELESS_DEVICE_STATUS_V0
    }
}

/// Implements the `WirelessDeviceStatus` / `0x1d4b` feature.
#[derive(Clone)]
pub struct WirelessDeviceStatusFeature {
    handle: FeatureHandle,
    version: WirelessDeviceStatus,
}

impl Feature for WirelessDeviceStatusFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for WirelessDeviceStatusFeature {
    const ID: u16 = WirelessDeviceStatus::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, feature_index)?,
            version: WirelessDeviceStatus::create(version)?,
        })
    }
}

impl WirelessDeviceStatusFeature {
    /// Waits for the device to broadcast its status, which it does whenever
    /// it (re)connects to the host.
    pub async fn next_status_broadcast(&self, timeout: Option<Duration>) -> Result<WirelessDeviceStatusBroadcast, Error> {
        let (_, msg) = self.handle.next_event(self.version.descriptor(), &[0], timeout).await?;
        WirelessDeviceStatusBroadcast::try_from(&msg)
    }
}

/// Represents the data of a `statusBroadcast` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct WirelessDeviceStatusBroadcast {
    /// The status the device reports to be in.
    pub status: WirelessStatus,

    /// The request the devices expresses towards the host.
    pub request: WirelessStatusRequest,

    /// The reason for the status broadcast.
    pub reason: WirelessStatusReason,
}

impl TryFrom<&BitMessage> for WirelessDeviceStatusBroadcast {
    type Error = Error;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            status: WirelessStatus::try_from(msg.uint("status")? as u8).map_err(|_| Error::UnsupportedResponse)?,
            request: WirelessStatusRequest::try_from(msg.uint("request")? as u8)
                .map_err(|_| Error::UnsupportedResponse)?,
            reason: WirelessStatusReason::try_from(msg.uint("reason")? as u8)
                .map_err(|_| Error::UnsupportedResponse)?,
        })
    }
}

/// Represents a device status as reported in
/// [`WirelessDeviceStatusBroadcast::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WirelessStatus {
    Unknown = 0x00,
    Reconnection = 0x01,
}

/// Represents a request as reported in
/// [`WirelessDeviceStatusBroadcast::request`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WirelessStatusRequest {
    NoRequest = 0x00,
    SoftwareReconfigurationNeeded = 0x01,
}

/// Represents a broadcast reason as reported in
/// [`WirelessDeviceStatusBroadcast::reason`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WirelessStatusReason {
    Unknown = 0x00,
    PowerSwitchActivated = 0x01,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueName;

    #[test]
    fn status_broadcast_decodes() {
        let mut payload = [0u8; 16];
        payload[..3].copy_from_slice(&[0x01, 0x01, 0x00]);

        let msg = BitMessage::parse(&STATUS_BROADCAST, &payload).unwrap();
        let broadcast = WirelessDeviceStatusBroadcast::try_from(&msg).unwrap();
        assert_eq!(broadcast.status, WirelessStatus::Reconnection);
        assert_eq!(broadcast.request, WirelessStatusRequest::SoftwareReconfigurationNeeded);
        assert_eq!(broadcast.reason, WirelessStatusReason::Unknown);
    }

    #[test]
    fn event_only_feature_validates() {
        let descriptor = WirelessDeviceStatus::V0.descriptor();
        descriptor.validate().unwrap();
        assert!(descriptor.function(0).is_err());
        assert_eq!(descriptor.event_queue(0), QueueName::Common);
    }
}
