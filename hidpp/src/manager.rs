//! Owns the channels of a test session.
//!
//! A session usually starts with one channel per physical link (the receiver
//! dongle, a BLE connection, the instrument). Channels to devices behind a
//! receiver are added once enumeration found them. Tests talk to the
//! *current* channel and switch it when they need another one; switching
//! never closes the previous channel, so its queues keep filling.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    ops::Deref,
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{
    channel::{ChannelProtocol, HidppChannel},
    config::HarnessConfig,
    error::Error,
    receiver::Receiver,
    register::{DeviceConnection, ReportingFlags},
    transport::{LinkEnabler, Transport, tunnel::TunnelTransport},
};

/// Identifies a channel within a [`ChannelManager`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(transparent))]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&ChannelId> for ChannelId {
    fn from(value: &ChannelId) -> Self {
        value.clone()
    }
}

/// Owns the channels of a test session and tracks the current one.
pub struct ChannelManager {
    config: HarnessConfig,
    channels: RwLock<HashMap<ChannelId, Arc<HidppChannel>>>,
    current: RwLock<Option<ChannelId>>,

    /// The devices found behind each receiver channel, by device index.
    ports: RwLock<HashMap<ChannelId, BTreeMap<u8, DeviceConnection>>>,
}

impl ChannelManager {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            channels: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            ports: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Creates an unopened channel on a transport and takes ownership of it.
    ///
    /// A channel registered earlier under the same ID is closed and
    /// replaced. The first channel added becomes the current one.
    pub fn add(&self, id: impl Into<ChannelId>, transport: Arc<dyn Transport>) -> Arc<HidppChannel> {
        let id = id.into();
        let chan = Arc::new(HidppChannel::new(
            id.clone(),
            transport,
            self.config.channel.clone(),
            self.config.report_map.clone(),
        ));
        self.insert(chan)
    }

    /// Takes ownership of an existing channel.
    pub fn insert(&self, chan: Arc<HidppChannel>) -> Arc<HidppChannel> {
        let id = chan.id().clone();
        if let Some(previous) = self.channels.write().insert(id.clone(), Arc::clone(&chan)) {
            previous.close();
        }

        let mut current = self.current.write();
        if current.is_none() {
            *current = Some(id.clone());
        }
        debug!(channel = %id, kind = ?chan.kind(), "channel added");
        chan
    }

    /// Closes a channel and gives up ownership of it.
    pub fn remove(&self, id: &ChannelId) -> Result<Arc<HidppChannel>, Error> {
        let chan = self
            .channels
            .write()
            .remove(id)
            .ok_or_else(|| Error::UnknownChannel(id.clone()))?;
        chan.close();

        self.ports.write().remove(id);
        let mut current = self.current.write();
        if current.as_ref() == Some(id) {
            *current = None;
        }
        Ok(chan)
    }

    pub fn get(&self, id: &ChannelId) -> Result<Arc<HidppChannel>, Error> {
        self.channels
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownChannel(id.clone()))
    }

    /// The IDs of all owned channels, sorted.
    pub fn ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.channels.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The channel tests currently talk to.
    pub fn current(&self) -> Result<Arc<HidppChannel>, Error> {
        let current = self.current.read();
        let id = current.as_ref().ok_or(Error::NoCurrentChannel)?;
        self.get(id)
    }

    pub fn current_id(&self) -> Option<ChannelId> {
        self.current.read().clone()
    }

    /// Makes another channel the current one. The previous one stays open.
    pub fn switch(&self, id: &ChannelId) -> Result<Arc<HidppChannel>, Error> {
        let chan = self.get(id)?;
        let previous = self.current.write().replace(id.clone());
        debug!(from = ?previous.as_ref().map(ChannelId::as_str), to = %id, "current channel switched");
        Ok(chan)
    }

    /// Makes another channel the current one until the returned lease is
    /// dropped.
    pub fn lease(&self, id: &ChannelId) -> Result<ChannelLease<'_>, Error> {
        let chan = self.get(id)?;
        let previous = self.current.write().replace(id.clone());
        Ok(ChannelLease {
            manager: self,
            previous,
            chan,
        })
    }

    /// Opens a channel, or updates the enabled interfaces of an open one.
    pub async fn open(&self, id: &ChannelId, link_enabler: LinkEnabler) -> Result<Arc<HidppChannel>, Error> {
        let chan = self.get(id)?;
        chan.open(link_enabler).await?;
        Ok(chan)
    }

    /// Closes a channel, keeping it owned so it can be opened again.
    pub fn close(&self, id: &ChannelId) -> Result<(), Error> {
        self.get(id)?.close();
        Ok(())
    }

    /// Closes every channel.
    pub fn close_all(&self) {
        for chan in self.channels.read().values() {
            chan.close();
        }
    }

    /// Records that a channel switched protocols.
    ///
    /// The protocol tag is replaced, the feature index cache flushed and all
    /// HID++ queues cleared. Channels without HID++ refuse requests until
    /// they switch back.
    pub fn protocol_switch(&self, id: &ChannelId, protocol: ChannelProtocol) -> Result<(), Error> {
        self.get(id)?.switch_protocol(protocol);
        Ok(())
    }

    /// Enumerates the devices connected to a receiver and records them.
    ///
    /// Connection notifications are enabled on the receiver, which is then
    /// asked to announce all connected devices.
    pub async fn enumerate_receiver(&self, id: &ChannelId) -> Result<Vec<DeviceConnection>, Error> {
        let receiver = Receiver::new(self.get(id)?);

        let flags = receiver.reporting_flags().await?;
        if !flags.contains(ReportingFlags::WIRELESS) {
            receiver.enable_reporting(flags | ReportingFlags::WIRELESS).await?;
        }

        let connections = receiver.collect_connections().await?;
        self.ports.write().insert(
            id.clone(),
            connections
                .iter()
                .map(|connection| (connection.device_index, *connection))
                .collect(),
        );
        info!(channel = %id, devices = connections.len(), "receiver enumerated");
        Ok(connections)
    }

    /// The devices found behind a receiver by [`Self::enumerate_receiver`].
    pub fn connected_devices(&self, receiver: &ChannelId) -> Vec<DeviceConnection> {
        self.ports
            .read()
            .get(receiver)
            .map(|devices| devices.values().copied().collect())
            .unwrap_or_default()
    }

    /// Opens a channel to a device behind an open receiver channel.
    ///
    /// The new channel starts with the feature index mapping the receiver
    /// channel already knows. If the device was enumerated, its channel
    /// reports its wireless product ID.
    pub async fn open_through_receiver(
        &self,
        receiver: &ChannelId,
        device_index: u8,
        id: impl Into<ChannelId>,
    ) -> Result<Arc<HidppChannel>, Error> {
        let receiver_chan = self.get(receiver)?;
        if !receiver_chan.is_open() {
            return Err(Error::ChannelNotOpen);
        }

        let mut tunnel = TunnelTransport::open(Arc::clone(&receiver_chan), device_index);
        if let Some(connection) = self.ports.read().get(receiver).and_then(|devices| devices.get(&device_index)) {
            tunnel = tunnel.with_product_id(connection.wpid);
        }

        let chan = HidppChannel::new(
            id,
            Arc::new(tunnel),
            self.config.channel.clone(),
            self.config.report_map.clone(),
        )
        .with_device_index(device_index);
        receiver_chan.dispatcher().copy_mapping_to(chan.dispatcher());

        let chan = self.insert(Arc::new(chan));
        chan.open(LinkEnabler::ALL).await?;
        Ok(chan)
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new(HarnessConfig::default())
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.ids())
            .field("current", &self.current_id())
            .finish()
    }
}

/// A channel made current for a limited scope, see [`ChannelManager::lease`].
pub struct ChannelLease<'a> {
    manager: &'a ChannelManager,
    previous: Option<ChannelId>,
    chan: Arc<HidppChannel>,
}

impl ChannelLease<'_> {
    pub fn channel(&self) -> &Arc<HidppChannel> {
        &self.chan
    }
}

impl Deref for ChannelLease<'_> {
    type Target = HidppChannel;

    fn deref(&self) -> &Self::Target {
        &self.chan
    }
}

impl Drop for ChannelLease<'_> {
    fn drop(&mut self) {
        *self.manager.current.write() = self.previous.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::emulated::EmulatedTransport;

    fn emulated() -> Arc<dyn Transport> {
        Arc::new(EmulatedTransport::new(0x046d, 0xc548).0)
    }

    #[test]
    fn first_channel_becomes_current() {
        let manager = ChannelManager::default();
        assert!(matches!(manager.current(), Err(Error::NoCurrentChannel)));

        manager.add("receiver", emulated());
        manager.add("ble", emulated());
        assert_eq!(manager.current_id(), Some(ChannelId::from("receiver")));
        assert_eq!(manager.ids(), [ChannelId::from("ble"), ChannelId::from("receiver")]);
    }

    #[test]
    fn leases_restore_the_previous_channel() {
        let manager = ChannelManager::default();
        manager.add("receiver", emulated());
        manager.add("ble", emulated());

        {
            let lease = manager.lease(&"ble".into()).unwrap();
            assert_eq!(lease.id().as_str(), "ble");
            assert_eq!(manager.current().unwrap().id().as_str(), "ble");
        }
        assert_eq!(manager.current().unwrap().id().as_str(), "receiver");
    }

    #[test]
    fn unknown_channels_are_refused() {
        let manager = ChannelManager::default();
        assert!(matches!(manager.switch(&"nope".into()), Err(Error::UnknownChannel(_))));
        assert!(matches!(manager.close(&"nope".into()), Err(Error::UnknownChannel(_))));
    }

    #[test]
    fn removing_the_current_channel_clears_it() {
        let manager = ChannelManager::default();
        manager.add("receiver", emulated());
        manager.remove(&"receiver".into()).unwrap();
        assert_eq!(manager.current_id(), None);
    }
}
