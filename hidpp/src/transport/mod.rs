//! The links HID and HID++ traffic travels over.
//!
//! A [`Transport`] moves raw reports between the harness and a device. It
//! does not interpret them: the reader thread of a
//! [`HidppChannel`](crate::channel::HidppChannel) pulls timestamped reports
//! out of it and hands them to the dispatcher.
//!
//! Implementations exist for receiver tunnels ([`tunnel`]), BLE GATT links
//! ([`ble`]), USB HID devices (`usb`, behind the `async-hid` feature) and an
//! in-memory loopback standing in for instruments and tests ([`emulated`]).

use std::error::Error as StdError;

use async_trait::async_trait;
use bitflags::bitflags;
use hidreport::{Field, Report, ReportDescriptor, Usage, UsageId, UsagePage};
use thiserror::Error;

use crate::{
    bitfield::Timestamp,
    protocol::{LONG_REPORT_ID, SHORT_REPORT_ID, VERY_LONG_REPORT_LENGTH},
};

pub mod ble;
pub mod emulated;
pub mod tunnel;
#[cfg(feature = "async-hid")]
pub mod usb;

/// hidapi defines this as the maximum EXPECTED size of report descriptors.
/// We will trust this for now, but a workaround may be required if devices do
/// in fact return longer descriptors.
pub const MAX_REPORT_DESCRIPTOR_LENGTH: usize = 4096;

/// This is the size of the buffer incoming reports are read into. It fits
/// every HID++ report and the plain HID reports of Logitech devices.
pub const MAX_REPORT_LENGTH: usize = VERY_LONG_REPORT_LENGTH;

const HIDPP_USAGE_PAGE: u16 = 0xff00;
const SHORT_REPORT_USAGE: u16 = 0x0001;
const LONG_REPORT_USAGE: u16 = 0x0002;

/// The kind of link a transport uses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// A USB HID interface of a device or receiver.
    Usb,

    /// A BLE GATT connection.
    Ble,

    /// A device reached through the transport of its receiver.
    ReceiverTunnel,

    /// An in-memory transport driven by an instrument or a test.
    Emulated,
}

bitflags! {
    /// The interfaces of a channel whose traffic is delivered.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct LinkEnabler: u8 {
        const HIDPP = 0x01;
        const KEYBOARD = 0x02;
        const MOUSE = 0x04;
        const DIGITIZER = 0x08;
        const ALL = 0x0f;
    }
}

impl Default for LinkEnabler {
    fn default() -> Self {
        Self::ALL
    }
}

/// Represents an error of the underlying link.
///
/// Errors are cloned into every request that was waiting when the link
/// failed, so they only carry a description of the cause.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The link went away while in use.
    #[error("the link was lost: {0}")]
    LinkLost(String),

    /// The channel was closed.
    #[error("the transport is closed")]
    Closed,

    /// Indicates that the HID report descriptor could not be parsed.
    #[error("the report descriptor could not be parsed: {0}")]
    ReportDescriptor(String),

    /// Indicates that the transport in question does not support HID++.
    #[error("the transport does not support HID++")]
    HidppNotSupported,

    /// Indicates that the transport does not support HID++ reports of the
    /// size of the given report ID.
    #[error("the transport does not support HID++ reports with ID {0:#04x}")]
    ReportNotSupported(u8),

    /// Indicates that the concrete implementation returned an error.
    #[error("the transport implementation returned an error: {0}")]
    Implementation(String),
}

impl TransportError {
    /// Wraps an error of a transport implementation.
    pub fn implementation(err: impl StdError) -> Self {
        Self::Implementation(err.to_string())
    }
}

/// Represents an arbitrary HID link that is both readable and writable. It
/// has to support async I/O.
///
/// Any type this trait is implemented for can be used for HID(++)
/// communication. Whether a specific link supports HID++ is determined when a
/// channel is opened on it.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    fn vendor_id(&self) -> u16;

    fn product_id(&self) -> u16;

    /// Writes a raw report, report ID included.
    ///
    /// Returns the exact amount of written bytes on success.
    async fn write_report(&self, src: &[u8]) -> Result<usize, TransportError>;

    /// Reads a raw report.
    ///
    /// If the buffer is not large enough to fit the whole report, its remainder
    /// should be discarded and must not be returned by any succeeding call to
    /// [`Self::read_report`].
    ///
    /// Returns the exact amount of read bytes and the moment the report was
    /// received.
    async fn read_report(&self, buf: &mut [u8]) -> Result<(usize, Timestamp), TransportError>;

    /// If the implementation already knows whether the link supports HID++
    /// messages, it should return `Some((supports_short, supports_long))` from
    /// this method.
    ///
    /// In this case, the report descriptor will not be read and parsed.
    fn supports_short_long_hidpp(&self) -> Option<(bool, bool)>;

    /// Retrieves the raw HID report descriptor.
    ///
    /// Returns the exact size of the report descriptor on success.
    async fn get_report_descriptor(&self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Checks whether a transport supports short or long HID++ messages.
pub async fn supports_short_long_hidpp(transport: &dyn Transport) -> Result<(bool, bool), TransportError> {
    if let Some(support) = transport.supports_short_long_hidpp() {
        return Ok(support);
    }

    let mut raw_descriptor = vec![0u8; MAX_REPORT_DESCRIPTOR_LENGTH];
    let descriptor_size = transport.get_report_descriptor(&mut raw_descriptor).await?;
    hidpp_support_from_descriptor(&raw_descriptor[..descriptor_size])
}

/// Looks for the vendor-defined HID++ input reports in a report descriptor.
pub fn hidpp_support_from_descriptor(raw: &[u8]) -> Result<(bool, bool), TransportError> {
    let descriptor =
        ReportDescriptor::try_from(raw).map_err(|err| TransportError::ReportDescriptor(format!("{err:?}")))?;

    let supports = |report_id: u8, usage: u16| {
        descriptor
            .find_input_report(&[report_id])
            .and_then(|report| report.fields().first())
            .and_then(|field| match field {
                Field::Array(arr) => Some(arr.usage_range()),
                _ => None,
            })
            .is_some_and(|range| {
                range
                    .lookup_usage(&Usage::from_page_and_id(
                        UsagePage::from(HIDPP_USAGE_PAGE),
                        UsageId::from(usage),
                    ))
                    .is_some()
            })
    };

    Ok((
        supports(SHORT_REPORT_ID, SHORT_REPORT_USAGE),
        supports(LONG_REPORT_ID, LONG_REPORT_USAGE),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_enabler_defaults_to_everything() {
        let enabled = LinkEnabler::default();
        assert!(enabled.contains(LinkEnabler::HIDPP | LinkEnabler::MOUSE));
        assert_eq!(enabled, LinkEnabler::ALL);
        assert!(!(LinkEnabler::HIDPP).contains(LinkEnabler::KEYBOARD));
    }
}
