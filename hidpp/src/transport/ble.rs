//! Carries HID++ over a BLE GATT connection.
//!
//! Over BLE, HID++ travels in long reports only. Devices either expose the
//! standard HID report characteristic, which drops the report ID, or the
//! proprietary BLE++ characteristic, which drops the report ID and the device
//! index as well. Everything else about GATT is left to a [`GattLink`]
//! implementation.

use async_trait::async_trait;
use tracing::trace;

use super::{Transport, TransportError, TransportKind};
use crate::{
    bitfield::Timestamp,
    protocol::{LONG_REPORT_ID, LONG_REPORT_LENGTH, RECEIVER_DEVICE_INDEX, hex},
};

/// The characteristic HID++ reports are exchanged on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GattCharacteristic {
    /// The standard HID-over-GATT report characteristic.
    HidReport,

    /// The proprietary BLE++ characteristic.
    BlePro,
}

impl GattCharacteristic {
    /// The number of leading report bytes the characteristic does not carry.
    pub fn stripped_len(self) -> usize {
        match self {
            Self::HidReport => 1,
            Self::BlePro => 2,
        }
    }
}

/// A GATT connection to a device, as provided by a BLE stack.
#[async_trait]
pub trait GattLink: Send + Sync + 'static {
    fn vendor_id(&self) -> u16;

    fn product_id(&self) -> u16;

    /// Writes a value without waiting for a response.
    async fn write_without_response(&self, characteristic: GattCharacteristic, value: &[u8])
    -> Result<(), TransportError>;

    /// Waits for the next indication or notification of the HID++
    /// characteristics.
    async fn next_indication(&self) -> Result<(GattCharacteristic, Vec<u8>), TransportError>;
}

/// A [`Transport`] on top of a [`GattLink`].
pub struct BleTransport<L: GattLink> {
    link: L,
    characteristic: GattCharacteristic,
}

impl<L: GattLink> BleTransport<L> {
    /// Creates a transport writing HID++ reports to `characteristic`.
    pub fn new(link: L, characteristic: GattCharacteristic) -> Self {
        Self { link, characteristic }
    }

    pub fn characteristic(&self) -> GattCharacteristic {
        self.characteristic
    }
}

/// Converts a HID++ report into the value written to a characteristic.
///
/// Short reports are sent in long form, zero-padded.
pub fn outbound_value(characteristic: GattCharacteristic, report: &[u8]) -> Vec<u8> {
    let stripped = characteristic.stripped_len();
    let mut value = report.get(stripped..).unwrap_or_default().to_vec();
    value.resize(LONG_REPORT_LENGTH - stripped, 0);
    value
}

/// Rebuilds the HID++ report from a value received on a characteristic.
pub fn inbound_report(characteristic: GattCharacteristic, value: &[u8]) -> Vec<u8> {
    let mut report = Vec::with_capacity(LONG_REPORT_LENGTH);
    report.push(LONG_REPORT_ID);
    if characteristic == GattCharacteristic::BlePro || value.len() == LONG_REPORT_LENGTH - 2 {
        report.push(RECEIVER_DEVICE_INDEX);
    }
    report.extend_from_slice(value);
    report
}

#[async_trait]
impl<L: GattLink> Transport for BleTransport<L> {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn vendor_id(&self) -> u16 {
        self.link.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.link.product_id()
    }

    async fn write_report(&self, src: &[u8]) -> Result<usize, TransportError> {
        let value = outbound_value(self.characteristic, src);
        trace!(characteristic = ?self.characteristic, value_hex = %hex(&value), "GATT write");
        self.link.write_without_response(self.characteristic, &value).await?;
        Ok(src.len())
    }

    async fn read_report(&self, buf: &mut [u8]) -> Result<(usize, Timestamp), TransportError> {
        let (characteristic, value) = self.link.next_indication().await?;
        let timestamp = Timestamp::now();

        let report = inbound_report(characteristic, &value);
        let len = report.len().min(buf.len());
        buf[..len].copy_from_slice(&report[..len]);
        Ok((len, timestamp))
    }

    fn supports_short_long_hidpp(&self) -> Option<(bool, bool)> {
        Some((false, true))
    }

    async fn get_report_descriptor(&self, _: &mut [u8]) -> Result<usize, TransportError> {
        Err(TransportError::Implementation(
            "the HID++ support of GATT links is fixed".to_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_strips_and_pads() {
        let short = [0x10, 0xff, 0x00, 0x1a, 0x00, 0x00, 0x5a];

        let value = outbound_value(GattCharacteristic::HidReport, &short);
        assert_eq!(value.len(), 19);
        assert_eq!(&value[..6], &short[1..]);
        assert!(value[6..].iter().all(|byte| *byte == 0));

        let value = outbound_value(GattCharacteristic::BlePro, &short);
        assert_eq!(value.len(), 18);
        assert_eq!(&value[..5], &short[2..]);
    }

    #[test]
    fn inbound_restores_report_id_and_device_index() {
        let value = [0x00, 0x1a, 0x04, 0x02, 0x5a, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let report = inbound_report(GattCharacteristic::BlePro, &value);
        assert_eq!(report.len(), LONG_REPORT_LENGTH);
        assert_eq!(&report[..3], &[0x11, 0xff, 0x00]);

        let mut value = vec![0x01];
        value.extend_from_slice(&[0u8; 18]);
        let report = inbound_report(GattCharacteristic::HidReport, &value);
        assert_eq!(&report[..2], &[0x11, 0x01]);
        assert_eq!(report.len(), LONG_REPORT_LENGTH);
    }
}
