//! Talks to a wireless receiver through its HID++1.0 registers.
//!
//! Receivers (Unifying, Bolt, Lightspeed) address the devices paired to them
//! by device index `0x01` to `0x06` and themselves by `0xff`. Which device
//! sits at which index is learned from device connection notifications,
//! which a receiver sends on its own when a device connects and for every
//! connected device when asked to fake their arrival.

use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    bitfield::{BitMessage, Schema},
    channel::HidppChannel,
    error::Error,
    protocol::RECEIVER_DEVICE_INDEX,
    queue::{DispatchedMessage, QueueError, QueueName},
    register::{
        CONNECTION_STATE_REGISTER,
        DEVICE_CONNECTION_SUB_ID,
        DeviceConnection,
        ENABLE_HIDPP_REPORTING,
        FAKE_DEVICE_ARRIVAL,
        NON_VOLATILE_PAIRING_INFORMATION,
        PAIRING,
        PAIRING_INFORMATION_SUB_REGISTER,
        PairingAction,
        PairingInformation,
        RegisterDescriptor,
        ReportingFlags,
    },
};

/// The highest device index a receiver assigns to paired devices.
pub const MAX_PAIRED_DEVICE_INDEX: u8 = 0x06;

/// A receiver reached through a HID++ channel.
#[derive(Clone, Debug)]
pub struct Receiver {
    chan: Arc<HidppChannel>,
}

impl Receiver {
    pub fn new(chan: Arc<HidppChannel>) -> Self {
        Self { chan }
    }

    /// The underlying HID++ channel.
    pub fn channel(&self) -> &Arc<HidppChannel> {
        &self.chan
    }

    /// Reads the notification flags of the receiver.
    pub async fn reporting_flags(&self) -> Result<ReportingFlags, Error> {
        let response = self
            .chan
            .read_register(
                RECEIVER_DEVICE_INDEX,
                &ENABLE_HIDPP_REPORTING,
                &BitMessage::new(read_request(&ENABLE_HIDPP_REPORTING)?),
            )
            .await?;
        ReportingFlags::try_from(&response)
    }

    /// Enables the given notifications, disabling all others.
    ///
    /// [`ReportingFlags::WIRELESS`] has to be set for the receiver to send
    /// device connection notifications.
    pub async fn enable_reporting(&self, flags: ReportingFlags) -> Result<(), Error> {
        self.chan
            .write_register(RECEIVER_DEVICE_INDEX, &ENABLE_HIDPP_REPORTING, &flags.to_message()?)
            .await?;
        Ok(())
    }

    /// Counts the devices currently paired to the receiver. The devices don't
    /// have to be online to be included, as pairings are persistent.
    pub async fn count_pairings(&self) -> Result<u8, Error> {
        let response = self
            .chan
            .read_register(
                RECEIVER_DEVICE_INDEX,
                &CONNECTION_STATE_REGISTER,
                &BitMessage::new(read_request(&CONNECTION_STATE_REGISTER)?),
            )
            .await?;
        Ok(response.uint("connected_devices")? as u8)
    }

    /// Makes the receiver send a connection notification for every connected
    /// device.
    ///
    /// The receiver acknowledges the request only after sending all of them.
    pub async fn trigger_device_arrival(&self) -> Result<(), Error> {
        let request = BitMessage::new(write_request(&CONNECTION_STATE_REGISTER)?).with("action", FAKE_DEVICE_ARRIVAL)?;
        self.chan
            .write_register(RECEIVER_DEVICE_INDEX, &CONNECTION_STATE_REGISTER, &request)
            .await?;
        Ok(())
    }

    /// Triggers device arrival and collects the connection notifications of
    /// all connected devices, ordered by device index.
    ///
    /// Collected notifications are taken out of
    /// [`QueueName::ReceiverConnectionEvent`]; disconnection notifications
    /// stay in it.
    pub async fn collect_connections(&self) -> Result<Vec<DeviceConnection>, Error> {
        self.trigger_device_arrival().await?;

        let queue = self.chan.queue(QueueName::ReceiverConnectionEvent);
        let mut connections: Vec<DeviceConnection> = Vec::new();
        loop {
            let msg = match queue.get_filtered(Some(Duration::ZERO), is_connection).await {
                Ok(msg) => msg,
                Err(QueueError::Empty { .. }) => break,
                Err(err) => return Err(err.into()),
            };
            let Some(rx) = msg.as_hidpp() else {
                continue;
            };

            let connection = DeviceConnection::read(&rx.message)?;
            // A device reconnecting during enumeration is reported twice.
            connections.retain(|known| known.device_index != connection.device_index);
            connections.push(connection);
        }

        connections.sort_by_key(|connection| connection.device_index);
        debug!(channel = %self.chan.id(), count = connections.len(), "connected devices collected");
        Ok(connections)
    }

    /// Reads how a device is paired.
    pub async fn pairing_information(&self, device_index: u8) -> Result<PairingInformation, Error> {
        let request = BitMessage::new(read_request(&NON_VOLATILE_PAIRING_INFORMATION)?).with(
            "sub_register",
            PAIRING_INFORMATION_SUB_REGISTER + (device_index.saturating_sub(1) & 0x0f),
        )?;
        let response = self
            .chan
            .read_register(RECEIVER_DEVICE_INDEX, &NON_VOLATILE_PAIRING_INFORMATION, &request)
            .await?;
        PairingInformation::try_from(&response)
    }

    /// Unpairs the device at a device index.
    pub async fn unpair(&self, device_index: u8) -> Result<(), Error> {
        let request = BitMessage::new(write_request(&PAIRING)?)
            .with("action", u8::from(PairingAction::Unpair))?
            .with("device_index", device_index)?;
        self.chan
            .write_register(RECEIVER_DEVICE_INDEX, &PAIRING, &request)
            .await?;
        Ok(())
    }
}

fn is_connection(msg: &DispatchedMessage) -> bool {
    msg.as_hidpp()
        .is_some_and(|rx| rx.message.header().feature_index == DEVICE_CONNECTION_SUB_ID)
}

fn read_request(register: &'static RegisterDescriptor) -> Result<&'static Schema, Error> {
    register
        .read
        .as_ref()
        .map(|access| access.request)
        .ok_or(Error::UnsupportedAccess {
            register: register.name,
            access: "read",
        })
}

fn write_request(register: &'static RegisterDescriptor) -> Result<&'static Schema, Error> {
    register
        .write
        .as_ref()
        .map(|access| access.request)
        .ok_or(Error::UnsupportedAccess {
            register: register.name,
            access: "written",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ChannelConfig,
        transport::emulated::{EmulatedPeer, EmulatedTransport},
    };

    async fn receiver() -> (Receiver, EmulatedPeer) {
        let (transport, peer) = EmulatedTransport::new(0x046d, 0xc548);
        let chan = HidppChannel::open_transport("receiver", Arc::new(transport), ChannelConfig::default())
            .await
            .unwrap();
        (Receiver::new(chan), peer)
    }

    #[tokio::test]
    async fn device_arrival_collects_connections() {
        let (receiver, peer) = receiver().await;

        let task = tokio::spawn({
            let receiver = receiver.clone();
            async move { receiver.collect_connections().await }
        });

        let written = peer.next_written(Duration::from_secs(1)).await.unwrap();
        assert_eq!(written, [0x10, 0xff, 0x80, 0x02, 0x02, 0x00, 0x00]);

        // Devices 2 and 1 announce themselves, then the write is acknowledged.
        peer.inject(&[0x10, 0x02, 0x41, 0x10, 0x02, 0x8a, 0x40]).unwrap();
        peer.inject(&[0x10, 0x01, 0x41, 0x0e, 0x42, 0x2b, 0x40]).unwrap();
        peer.inject(&[0x10, 0xff, 0x80, 0x02, 0x00, 0x00, 0x00]).unwrap();

        let connections = task.await.unwrap().unwrap();
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].device_index, 0x01);
        assert!(!connections[0].online);
        assert_eq!(connections[1].device_index, 0x02);
        assert_eq!(connections[1].wpid, 0x408a);
        assert!(connections[1].online);
    }

    #[tokio::test]
    async fn unpair_writes_the_pairing_register() {
        let (receiver, peer) = receiver().await;

        let task = tokio::spawn({
            let receiver = receiver.clone();
            async move { receiver.unpair(0x03).await }
        });

        let written = peer.next_written(Duration::from_secs(1)).await.unwrap();
        assert_eq!(written, [0x10, 0xff, 0x80, 0xb2, 0x03, 0x03, 0x00]);
        peer.inject(&[0x10, 0xff, 0x80, 0xb2, 0x00, 0x00, 0x00]).unwrap();
        task.await.unwrap().unwrap();
    }
}
