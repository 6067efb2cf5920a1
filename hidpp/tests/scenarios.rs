//! Request/reply exchanges over an emulated link, byte for byte.

mod common;

use std::sync::Arc;

use common::{WAIT, long, open_channel, written};
use hidpp::{
    cache::CachedFeature,
    error::Error,
    feature::{FeatureType, registry},
    nibble::U4,
    protocol::{HidppMessageHeader, ReportSize, v10, v20},
    register::{ENABLE_HIDPP_REPORTING, ReportingFlags},
};

#[tokio::test]
async fn get_feature_round_trip() {
    common::init_tracing();
    let (chan, peer) = open_channel("device").await;

    let task = tokio::spawn({
        let chan = Arc::clone(&chan);
        async move { chan.cache().resolve(&chan, 0x01, 0x1b10).await }
    });

    // Root.getFeature(0x1B10), function 0, software ID 1.
    assert_eq!(written(&peer).await, [0x10, 0x01, 0x00, 0x01, 0x1b, 0x10, 0x00]);
    peer.inject(&long(&[0x11, 0x01, 0x00, 0x01, 0x05, 0x00, 0x00])).unwrap();

    let feature = task.await.unwrap().unwrap().unwrap();
    assert_eq!(feature.index, 5);
    assert_eq!(feature.version, 0);
    assert_eq!(feature.typ, FeatureType::default());

    // The mapping is kept for the dispatcher.
    assert_eq!(chan.cache().feature_at(0x01, 5).map(|feature| feature.id), Some(0x1b10));
    assert_eq!(chan.outstanding_requests(), 0);
}

#[tokio::test]
async fn hidpp20_error_fails_the_request() {
    let (chan, peer) = open_channel("device").await;

    let request = v20::request(ReportSize::Short, 0x01, 0x05, U4::from_lo(1), &[0x03]).unwrap();
    let task = tokio::spawn({
        let chan = Arc::clone(&chan);
        async move { chan.send_v20(request).await }
    });

    assert_eq!(written(&peer).await, [0x10, 0x01, 0x05, 0x11, 0x03, 0x00, 0x00]);
    peer.inject(&[0x10, 0x01, 0xff, 0x05, 0x11, 0x02, 0x00]).unwrap();

    match task.await.unwrap() {
        Err(Error::Hidpp20 {
            code: v20::ErrorCode::InvalidArgument,
            request: Some(request),
        }) => {
            assert_eq!(request.header(), HidppMessageHeader {
                device_index: 0x01,
                feature_index: 0x05,
                function_and_sw_id: 0x11,
            });
        },
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn register_write_is_acknowledged() {
    let (chan, peer) = open_channel("receiver").await;

    let task = tokio::spawn({
        let chan = Arc::clone(&chan);
        async move {
            let value = ReportingFlags::from_bits_retain(0x01_0000).to_message()?;
            chan.write_register(0xff, &ENABLE_HIDPP_REPORTING, &value).await
        }
    });

    assert_eq!(written(&peer).await, [0x10, 0xff, 0x80, 0x00, 0x01, 0x00, 0x00]);
    peer.inject(&[0x10, 0xff, 0x80, 0x00, 0x00, 0x00, 0x00]).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn hidpp10_error_fails_the_register_access() {
    let (chan, peer) = open_channel("receiver").await;

    let request = v10::request(v10::MessageType::SetRegister, 0xff, 0xb2, &[0x00, 0x00, 0x00]).unwrap();
    let task = tokio::spawn({
        let chan = Arc::clone(&chan);
        async move { chan.send_v10(request).await }
    });

    assert_eq!(written(&peer).await, [0x10, 0xff, 0x80, 0xb2, 0x00, 0x00, 0x00]);
    peer.inject(&[0x10, 0xff, 0x8f, 0x80, 0xb2, 0x02, 0x00]).unwrap();

    assert!(matches!(
        task.await.unwrap(),
        Err(Error::Hidpp10 {
            code: v10::ErrorCode::InvalidAddress,
            request: Some(_),
        })
    ));
}

#[tokio::test]
async fn events_do_not_complete_requests() {
    let (chan, peer) = open_channel("device").await;
    chan.cache().insert(0x01, CachedFeature {
        id: 0x2121,
        index: 0x04,
        version: 1,
        typ: FeatureType::default(),
    });

    // getWheelCapability is in flight while the wheel moves.
    let request = v20::request(ReportSize::Short, 0x01, 0x04, U4::from_lo(0), &[]).unwrap();
    let pending = chan.send_nowait(request).await.unwrap();
    assert_eq!(written(&peer).await, [0x10, 0x01, 0x04, 0x01, 0x00, 0x00, 0x00]);

    peer.inject(&long(&[0x11, 0x01, 0x04, 0x00, 0x00, 0x00, 0x05])).unwrap();

    let queue = registry::descriptor(0x2121, 1).unwrap().event_queue(0);
    let event = chan.queue(queue).get(Some(WAIT)).await.unwrap().into_hidpp().unwrap();
    assert_eq!(event.feature, Some((0x2121, 1)));
    assert_eq!(event.decoded.unwrap().uint("delta_v").unwrap(), 5);

    assert_eq!(chan.outstanding_requests(), 1);
    assert!(pending.cancel().is_none());
}

#[tokio::test]
async fn concurrent_requests_get_their_own_replies() {
    let (chan, peer) = open_channel("device").await;

    let first = v20::request(ReportSize::Short, 0x01, 0x00, U4::from_lo(0), &[0x00, 0x05]).unwrap();
    let second = v20::request(ReportSize::Short, 0x01, 0x00, U4::from_lo(0), &[0x00, 0x06]).unwrap();
    let first = chan.send_nowait(first).await.unwrap();
    let second = chan.send_nowait(second).await.unwrap();

    assert_eq!(written(&peer).await, [0x10, 0x01, 0x00, 0x01, 0x00, 0x05, 0x00]);
    assert_eq!(written(&peer).await, [0x10, 0x01, 0x00, 0x02, 0x00, 0x06, 0x00]);

    // Replies arrive in reverse order.
    peer.inject(&long(&[0x11, 0x01, 0x00, 0x02, 0x07])).unwrap();
    peer.inject(&long(&[0x11, 0x01, 0x00, 0x01, 0x03])).unwrap();

    assert_eq!(first.wait(Some(WAIT)).await.unwrap().payload()[0], 0x03);
    assert_eq!(second.wait(Some(WAIT)).await.unwrap().payload()[0], 0x07);
}
