//! Implements USB HID communication using the `async-hid` crate.

use std::{fs::File, io::Read};

use async_hid::{AsyncHidRead, AsyncHidWrite, Device, DeviceId, DeviceInfo, DeviceReader, DeviceWriter, HidBackend};
use async_trait::async_trait;
use futures_lite::StreamExt;
use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Transport, TransportError, TransportKind, supports_short_long_hidpp};
use crate::bitfield::Timestamp;

/// The vendor ID of Logitech.
pub const LOGITECH_VENDOR_ID: u16 = 0x046d;

/// A HID interface opened through `async-hid`.
pub struct UsbTransport {
    reader: Mutex<DeviceReader>,
    writer: Mutex<DeviceWriter>,
    info: DeviceInfo,
}

impl UsbTransport {
    pub async fn open(device: &Device) -> Result<Self, TransportError> {
        let (reader, writer) = device.open().await.map_err(TransportError::implementation)?;
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            info: device.to_device_info(),
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

#[async_trait]
impl Transport for UsbTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn vendor_id(&self) -> u16 {
        self.info.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.info.product_id
    }

    async fn write_report(&self, src: &[u8]) -> Result<usize, TransportError> {
        let mut guard = self.writer.lock().await;
        guard
            .write_output_report(src)
            .await
            .map_err(|err| TransportError::LinkLost(err.to_string()))?;
        Ok(src.len())
    }

    async fn read_report(&self, buf: &mut [u8]) -> Result<(usize, Timestamp), TransportError> {
        let mut guard = self.reader.lock().await;
        let len = guard
            .read_input_report(buf)
            .await
            .map_err(|err| TransportError::LinkLost(err.to_string()))?;
        Ok((len, Timestamp::now()))
    }

    fn supports_short_long_hidpp(&self) -> Option<(bool, bool)> {
        None
    }

    async fn get_report_descriptor(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let DeviceId::DevPath(ref path) = self.info.id else {
            return Err(TransportError::Implementation(
                "report descriptors are currently only supported on Linux".to_owned(),
            ));
        };

        let descriptor_path = path.join("device/report_descriptor");
        let mut file = File::open(descriptor_path).map_err(TransportError::implementation)?;
        file.read(buf).map_err(TransportError::implementation)
    }
}

/// Opens every local HID interface of a Logitech device that supports
/// HID++.
pub async fn enumerate_hidpp() -> Result<Vec<UsbTransport>, TransportError> {
    let hid = HidBackend::default();
    let devices: Vec<Device> = hid
        .enumerate()
        .await
        .map_err(TransportError::implementation)?
        .collect::<Vec<Device>>()
        .await
        .into_iter()
        .filter(|device| device.vendor_id == LOGITECH_VENDOR_ID)
        .unique_by(|device| device.id.clone())
        .collect();

    let mut transports = Vec::new();
    for device in devices {
        let transport = match UsbTransport::open(&device).await {
            Ok(transport) => transport,
            Err(err) => {
                warn!(name = %device.name, %err, "could not open HID interface");
                continue;
            },
        };

        match supports_short_long_hidpp(&transport).await {
            Ok((false, false)) => debug!(name = %device.name, "HID interface without HID++"),
            Ok(_) => transports.push(transport),
            Err(err) => warn!(name = %device.name, %err, "could not determine HID++ support"),
        }
    }

    Ok(transports)
}
