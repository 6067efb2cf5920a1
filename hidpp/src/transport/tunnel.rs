//! Reaches a device paired to a receiver through the receiver's channel.
//!
//! Outbound reports are written on the transport of the receiver. Inbound
//! reports are forwarded by the receiver's dispatcher, which hands every
//! HID++ frame carrying the device index of a registered tunnel to it. When
//! the receiver channel closes or loses its link, the tunnel reads fail as if
//! the link of the device itself was lost.

use std::sync::Arc;

use async_trait::async_trait;
use flume::Receiver;

use super::{Transport, TransportError, TransportKind};
use crate::{bitfield::Timestamp, channel::HidppChannel};

/// A frame forwarded to a tunnel, with its arrival time on the receiver.
pub type TunnelFrame = (Vec<u8>, Timestamp);

/// A [`Transport`] to a device behind a receiver.
pub struct TunnelTransport {
    receiver: Arc<HidppChannel>,
    device_index: u8,
    product_id: u16,
    inbound: Receiver<TunnelFrame>,
}

impl TunnelTransport {
    /// Registers a tunnel for `device_index` on the receiver channel.
    ///
    /// A tunnel registered earlier for the same device index is replaced.
    pub fn open(receiver: Arc<HidppChannel>, device_index: u8) -> Self {
        let (sender, inbound) = flume::unbounded();
        receiver.dispatcher().register_tunnel(device_index, sender);

        Self {
            product_id: receiver.product_id(),
            receiver,
            device_index,
            inbound,
        }
    }

    /// Reports the wireless product ID of the device instead of the product ID
    /// of the receiver.
    pub fn with_product_id(self, product_id: u16) -> Self {
        Self { product_id, ..self }
    }

    pub fn device_index(&self) -> u8 {
        self.device_index
    }

    /// The channel of the receiver the device is paired to.
    pub fn receiver(&self) -> &Arc<HidppChannel> {
        &self.receiver
    }
}

#[async_trait]
impl Transport for TunnelTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ReceiverTunnel
    }

    fn vendor_id(&self) -> u16 {
        self.receiver.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    async fn write_report(&self, src: &[u8]) -> Result<usize, TransportError> {
        self.receiver.write_report(src).await
    }

    async fn read_report(&self, buf: &mut [u8]) -> Result<(usize, Timestamp), TransportError> {
        let (data, timestamp) = self
            .inbound
            .recv_async()
            .await
            .map_err(|_| TransportError::LinkLost("the receiver channel was closed".to_owned()))?;

        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok((len, timestamp))
    }

    fn supports_short_long_hidpp(&self) -> Option<(bool, bool)> {
        self.receiver.hidpp_support()
    }

    async fn get_report_descriptor(&self, _: &mut [u8]) -> Result<usize, TransportError> {
        Err(TransportError::Implementation(
            "tunnels share the report descriptor of their receiver".to_owned(),
        ))
    }
}
