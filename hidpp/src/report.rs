//! Identifies plain HID input reports by their report ID.
//!
//! Logitech receivers and devices send their standard HID reports on fixed
//! report IDs. The dispatcher uses a [`ReportMap`] to label reports before
//! putting them into the HID queue, and to drop the reports of interfaces
//! that are not enabled on the channel.

use std::collections::HashMap;

use crate::transport::LinkEnabler;

/// The kind of a plain HID input report.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum HidReportKind {
    Keyboard,
    Mouse,
    ConsumerControl,
    SystemControl,
    ConsumerSpecific,
    TopRowKeys,
    CallState,
    MouseWireless,
    GamingMouse,
    GamingKeyboard,
    WindowsDigitizer,
}

impl HidReportKind {
    /// The interface that has to be enabled for reports of this kind to be
    /// delivered.
    pub fn interface(self) -> LinkEnabler {
        match self {
            Self::Mouse | Self::MouseWireless | Self::GamingMouse => LinkEnabler::MOUSE,
            Self::WindowsDigitizer => LinkEnabler::DIGITIZER,
            _ => LinkEnabler::KEYBOARD,
        }
    }
}

/// Maps report IDs to the kind of report they carry.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReportMap {
    kinds: HashMap<u8, HidReportKind>,
}

impl ReportMap {
    /// Creates a map without any known report.
    pub fn empty() -> Self {
        Self { kinds: HashMap::new() }
    }

    /// Assigns a report ID to a kind, replacing a previous assignment.
    pub fn insert(&mut self, report_id: u8, kind: HidReportKind) -> Option<HidReportKind> {
        self.kinds.insert(report_id, kind)
    }

    pub fn kind(&self, report_id: u8) -> Option<HidReportKind> {
        self.kinds.get(&report_id).copied()
    }
}

impl Default for ReportMap {
    /// The report IDs Logitech devices use.
    fn default() -> Self {
        Self {
            kinds: HashMap::from([
                (0x01, HidReportKind::Keyboard),
                (0x02, HidReportKind::Mouse),
                (0x03, HidReportKind::ConsumerControl),
                (0x04, HidReportKind::SystemControl),
                (0x05, HidReportKind::ConsumerSpecific),
                (0x09, HidReportKind::TopRowKeys),
                (0x0b, HidReportKind::CallState),
                (0x0f, HidReportKind::MouseWireless),
                (0x15, HidReportKind::GamingMouse),
                (0x18, HidReportKind::GamingKeyboard),
                (0x1e, HidReportKind::WindowsDigitizer),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_knows_logitech_reports() {
        let map = ReportMap::default();
        assert_eq!(map.kind(0x02), Some(HidReportKind::Mouse));
        assert_eq!(map.kind(0x1e).map(HidReportKind::interface), Some(LinkEnabler::DIGITIZER));
        assert_eq!(map.kind(0x10), None);

        let mut map = ReportMap::empty();
        assert_eq!(map.insert(0x20, HidReportKind::GamingKeyboard), None);
        assert_eq!(map.kind(0x20).map(HidReportKind::interface), Some(LinkEnabler::KEYBOARD));
    }
}
