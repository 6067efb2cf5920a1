//! An in-memory transport.
//!
//! The [`EmulatedPeer`] plays the device side: it observes every report the
//! harness writes and injects the reports the harness reads. Instruments
//! emulating a device drive a channel through it, and so do the tests.

use std::time::Duration;

use async_trait::async_trait;
use flume::{Receiver, Sender};
use tracing::trace;

use super::{Transport, TransportError, TransportKind};
use crate::{bitfield::Timestamp, protocol::hex};

enum Inbound {
    Report(Vec<u8>, Timestamp),
    LinkLost(String),
}

/// The harness side of an emulated link.
pub struct EmulatedTransport {
    vendor_id: u16,
    product_id: u16,
    support: (bool, bool),
    inbound: Receiver<Inbound>,
    outbound: Sender<Vec<u8>>,
}

/// The device side of an emulated link.
#[derive(Clone)]
pub struct EmulatedPeer {
    inbound: Sender<Inbound>,
    outbound: Receiver<Vec<u8>>,
}

impl EmulatedTransport {
    /// Creates a linked transport and peer supporting short and long HID++
    /// reports.
    pub fn new(vendor_id: u16, product_id: u16) -> (Self, EmulatedPeer) {
        Self::with_support(vendor_id, product_id, (true, true))
    }

    /// Creates a linked transport and peer announcing the given HID++
    /// support as `(short, long)`.
    pub fn with_support(vendor_id: u16, product_id: u16, support: (bool, bool)) -> (Self, EmulatedPeer) {
        let (inbound_tx, inbound_rx) = flume::unbounded();
        let (outbound_tx, outbound_rx) = flume::unbounded();

        (
            Self {
                vendor_id,
                product_id,
                support,
                inbound: inbound_rx,
                outbound: outbound_tx,
            },
            EmulatedPeer {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for EmulatedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Emulated
    }

    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    async fn write_report(&self, src: &[u8]) -> Result<usize, TransportError> {
        self.outbound
            .send_async(src.to_vec())
            .await
            .map_err(|_| TransportError::LinkLost("the emulated peer is gone".to_owned()))?;
        Ok(src.len())
    }

    async fn read_report(&self, buf: &mut [u8]) -> Result<(usize, Timestamp), TransportError> {
        match self.inbound.recv_async().await {
            Ok(Inbound::Report(data, timestamp)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, timestamp))
            },
            Ok(Inbound::LinkLost(reason)) => Err(TransportError::LinkLost(reason)),
            Err(_) => Err(TransportError::LinkLost("the emulated peer is gone".to_owned())),
        }
    }

    fn supports_short_long_hidpp(&self) -> Option<(bool, bool)> {
        Some(self.support)
    }

    async fn get_report_descriptor(&self, _: &mut [u8]) -> Result<usize, TransportError> {
        Err(TransportError::Implementation(
            "emulated transports have no report descriptor".to_owned(),
        ))
    }
}

impl EmulatedPeer {
    /// Delivers a report to the harness, stamped with the current time.
    pub fn inject(&self, report: &[u8]) -> Result<(), TransportError> {
        self.inject_at(report, Timestamp::now())
    }

    /// Delivers a report to the harness with a given arrival time.
    pub fn inject_at(&self, report: &[u8], timestamp: Timestamp) -> Result<(), TransportError> {
        trace!(report_hex = %hex(report), "emulated inject");
        self.inbound
            .send(Inbound::Report(report.to_vec(), timestamp))
            .map_err(|_| TransportError::Closed)
    }

    /// Makes the next read of the harness fail as if the link was lost.
    pub fn disconnect(&self, reason: &str) -> Result<(), TransportError> {
        self.inbound
            .send(Inbound::LinkLost(reason.to_owned()))
            .map_err(|_| TransportError::Closed)
    }

    /// Takes the oldest report the harness wrote, if any.
    pub fn try_written(&self) -> Option<Vec<u8>> {
        self.outbound.try_recv().ok()
    }

    /// Waits for the next report the harness writes.
    ///
    /// Returns [`None`] if nothing was written within `timeout` or the
    /// harness side is gone.
    pub async fn next_written(&self, timeout: Duration) -> Option<Vec<u8>> {
        tokio::time::timeout(timeout, self.outbound.recv_async())
            .await
            .ok()
            .and_then(Result::ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_cross_the_link_in_both_directions() {
        let (transport, peer) = EmulatedTransport::new(0x046d, 0xc548);

        transport.write_report(&[0x10, 0xff, 0x81, 0x02, 0x00, 0x00, 0x00]).await.unwrap();
        assert_eq!(peer.try_written().unwrap()[2], 0x81);

        peer.inject(&[0x10, 0xff, 0x81, 0x02, 0x00, 0x02, 0x00]).unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = transport.read_report(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[0x10, 0xff, 0x81, 0x02, 0x00, 0x02, 0x00]);

        peer.disconnect("unplugged").unwrap();
        assert_eq!(
            transport.read_report(&mut buf).await.unwrap_err(),
            TransportError::LinkLost("unplugged".to_owned())
        );
    }
}
