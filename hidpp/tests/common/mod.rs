#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use hidpp::{
    channel::HidppChannel,
    config::ChannelConfig,
    protocol::LONG_REPORT_LENGTH,
    transport::emulated::{EmulatedPeer, EmulatedTransport},
};

pub const WAIT: Duration = Duration::from_secs(1);

/// Opens a channel on an emulated link with short response timeouts.
pub async fn open_channel(id: &str) -> (Arc<HidppChannel>, EmulatedPeer) {
    let (transport, peer) = EmulatedTransport::new(0x046d, 0xc548);
    let chan = HidppChannel::open_transport(id, Arc::new(transport), config())
        .await
        .unwrap();
    (chan, peer)
}

pub fn config() -> ChannelConfig {
    let mut config = ChannelConfig::default();
    config.response_timeout = Duration::from_millis(300);
    config.retry_count = 1;
    config
}

/// Waits for the next report the harness writes.
pub async fn written(peer: &EmulatedPeer) -> Vec<u8> {
    peer.next_written(WAIT).await.expect("nothing was written")
}

/// Pads a report to the length of a long HID++ report.
pub fn long(bytes: &[u8]) -> Vec<u8> {
    let mut report = bytes.to_vec();
    report.resize(LONG_REPORT_LENGTH, 0);
    report
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
