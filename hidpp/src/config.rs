//! Settings of channels and of the harness as a whole.
//!
//! The defaults are the values the harness is used with on real hardware. A
//! test runner loading its settings from a file can deserialize these types
//! when the `serde` feature is enabled.

use std::time::Duration;

use crate::report::ReportMap;

/// Settings of a single channel.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChannelConfig {
    /// How long a request waits for its reply.
    pub response_timeout: Duration,

    /// How long writing a report to the transport may take.
    pub send_timeout: Duration,

    /// How often [`HidppChannel::send_with_retry`] resends a request that
    /// timed out.
    ///
    /// [`HidppChannel::send_with_retry`]: crate::channel::HidppChannel::send_with_retry
    pub retry_count: usize,

    /// The number of messages each dispatcher queue holds before it
    /// overflows.
    pub queue_capacity: usize,

    /// Send feature requests as long reports even if they fit into a short
    /// one.
    pub prefer_long_frames: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_millis(600),
            retry_count: 5,
            queue_capacity: 4096,
            prefer_long_frames: false,
        }
    }
}

/// Settings shared by all channels of a harness.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HarnessConfig {
    /// The settings new channels are opened with.
    pub channel: ChannelConfig,

    /// Identifies the plain HID reports of receivers and devices.
    pub report_map: ReportMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.channel.response_timeout, Duration::from_secs(2));
        assert_eq!(config.channel.send_timeout, Duration::from_millis(600));
        assert_eq!(config.channel.retry_count, 5);
        assert_eq!(config.channel.queue_capacity, 4096);
        assert!(config.report_map.kind(0x02).is_some());
    }
}
