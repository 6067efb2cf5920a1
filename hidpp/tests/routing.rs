//! Where the dispatcher puts frames nobody waits for.

mod common;

use std::sync::Arc;

use common::{WAIT, long, open_channel, written};
use hidpp::{
    bitfield::MessageError,
    cache::CachedFeature,
    channel::HidppChannel,
    error::{Error, ProtocolError},
    feature::{CreatableFeature, FeatureError, FeatureType, hires_wheel::HiResWheelFeature},
    nibble::U4,
    protocol::{ReportSize, v20},
    queue::{DispatchedMessage, QueueName},
    report::HidReportKind,
    transport::LinkEnabler,
};

fn map_wheel(chan: &HidppChannel, feature_index: u8) {
    chan.cache().insert(0x01, CachedFeature {
        id: 0x2121,
        index: feature_index,
        version: 0,
        typ: FeatureType::default(),
    });
}

async fn next_diagnostic(chan: &HidppChannel) -> (Vec<u8>, MessageError) {
    match chan.queue(QueueName::Malformed).get(Some(WAIT)).await.unwrap() {
        DispatchedMessage::Malformed(frame) => (frame.data, frame.error),
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn errors_without_waiter_are_queued() {
    let (chan, peer) = open_channel("device").await;

    peer.inject(&[0x10, 0x01, 0xff, 0x05, 0x13, 0x02, 0x00]).unwrap();

    let error = chan
        .queue(QueueName::Error)
        .get(Some(WAIT))
        .await
        .unwrap()
        .into_hidpp()
        .unwrap();
    assert_eq!(error.message.header().feature_index, v20::ERROR_FEATURE_INDEX);
    assert_eq!(error.message.payload()[..3], [0x05, 0x13, 0x02]);
}

#[tokio::test]
async fn late_replies_are_orphaned() {
    let (chan, peer) = open_channel("device").await;

    let request = v20::request(ReportSize::Short, 0x01, 0x00, U4::from_lo(0), &[0x1b, 0x10]).unwrap();
    let task = tokio::spawn({
        let chan = Arc::clone(&chan);
        async move { chan.send_v20(request).await }
    });
    assert_eq!(written(&peer).await, [0x10, 0x01, 0x00, 0x01, 0x1b, 0x10, 0x00]);
    assert!(matches!(task.await.unwrap(), Err(Error::Timeout { .. })));

    peer.inject(&long(&[0x11, 0x01, 0x00, 0x01, 0x05])).unwrap();

    let orphan = chan
        .queue(QueueName::OrphanResponse)
        .get(Some(WAIT))
        .await
        .unwrap()
        .into_hidpp()
        .unwrap();
    assert_eq!(orphan.feature.map(|(id, _)| id), Some(0x0000));
    assert_eq!(orphan.decoded.unwrap().uint("feature_index").unwrap(), 5);
}

#[tokio::test]
async fn connection_notifications_are_decoded() {
    let (chan, peer) = open_channel("receiver").await;

    peer.inject(&[0x10, 0x02, 0x41, 0x10, 0x02, 0x8a, 0x40]).unwrap();

    let notification = chan
        .queue(QueueName::ReceiverConnectionEvent)
        .get(Some(WAIT))
        .await
        .unwrap()
        .into_hidpp()
        .unwrap();
    assert_eq!(notification.message.header().device_index, 0x02);
    assert!(notification.decoded.is_some());
}

#[tokio::test]
async fn disabled_interfaces_are_dropped() {
    let (chan, peer) = open_channel("receiver").await;

    // Only mouse reports are of interest from now on.
    chan.open(LinkEnabler::MOUSE).await.unwrap();
    assert_eq!(chan.link_enabler(), LinkEnabler::MOUSE);

    peer.inject(&[0x10, 0x02, 0x41, 0x10, 0x02, 0x8a, 0x40]).unwrap();
    peer.inject(&[0x01, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();
    peer.inject(&[0x02, 0x01, 0x00, 0x05, 0x00, 0xff, 0x0f]).unwrap();

    match chan.queue(QueueName::Hid).get(Some(WAIT)).await.unwrap() {
        DispatchedMessage::Hid(report) => {
            assert_eq!(report.report_id(), Some(0x02));
            assert_eq!(report.kind, Some(HidReportKind::Mouse));
        },
        other => panic!("unexpected message {other:?}"),
    }
    assert!(chan.queue(QueueName::Hid).is_empty());
    assert!(chan.queue(QueueName::ReceiverConnectionEvent).is_empty());
}

#[tokio::test]
async fn replies_on_unknown_feature_indices_are_diagnosed() {
    let (chan, peer) = open_channel("device").await;
    map_wheel(&chan, 0x04);

    let frame = long(&[0x11, 0x01, 0x07, 0x13]);
    peer.inject(&frame).unwrap();

    let (data, error) = next_diagnostic(&chan).await;
    assert_eq!(data, frame);
    assert_eq!(
        error,
        MessageError::Protocol(ProtocolError::UnknownFeatureIndex {
            device_index: 0x01,
            feature_index: 0x07
        })
    );
    assert!(chan.queue(QueueName::OrphanResponse).is_empty());
}

#[tokio::test]
async fn replies_to_unissued_software_ids_are_diagnosed() {
    let (chan, peer) = open_channel("device").await;

    // Root.getFeature with a software ID the harness never used.
    peer.inject(&long(&[0x11, 0x01, 0x00, 0x07, 0x05])).unwrap();

    let (_, error) = next_diagnostic(&chan).await;
    assert_eq!(error, MessageError::Protocol(ProtocolError::UnknownSoftwareId(7)));
    assert!(chan.queue(QueueName::OrphanResponse).is_empty());
}

#[tokio::test]
async fn features_need_a_located_index() {
    let (chan, _peer) = open_channel("device").await;

    assert!(matches!(
        HiResWheelFeature::new(Arc::clone(&chan), 0x01, 0x07, 0),
        Err(FeatureError::Protocol(ProtocolError::UnknownFeatureIndex {
            device_index: 0x01,
            feature_index: 0x07
        }))
    ));

    map_wheel(&chan, 0x07);
    assert!(HiResWheelFeature::new(chan, 0x01, 0x07, 0).is_ok());
}
