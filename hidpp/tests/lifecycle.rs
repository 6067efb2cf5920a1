//! Opening, closing and losing channels, and channels through a receiver.

mod common;

use std::{sync::Arc, time::Duration};

use common::{WAIT, long, open_channel, written};
use hidpp::{
    channel::ChannelState,
    config::HarnessConfig,
    error::Error,
    manager::{ChannelId, ChannelManager},
    nibble::U4,
    protocol::{ReportSize, v20},
    queue::QueueName,
    transport::{LinkEnabler, TransportError, TransportKind, emulated::EmulatedTransport},
};

fn ping(device_index: u8) -> hidpp::protocol::HidppMessage {
    v20::request(ReportSize::Short, device_index, 0x00, U4::from_lo(1), &[0x00, 0x00, 0x5a]).unwrap()
}

#[tokio::test]
async fn closing_releases_waiters() {
    let (chan, peer) = open_channel("device").await;

    let pending = chan.send_nowait(ping(0x01)).await.unwrap();
    written(&peer).await;

    chan.close();
    assert_eq!(chan.state(), ChannelState::Closed);
    assert!(matches!(
        pending.wait(Some(WAIT)).await,
        Err(Error::Transport(TransportError::Closed))
    ));
    assert!(matches!(chan.send_nowait(ping(0x01)).await, Err(Error::ChannelNotOpen)));
}

#[tokio::test]
async fn link_loss_releases_waiters() {
    let (chan, peer) = open_channel("device").await;

    let pending = chan.send_nowait(ping(0x01)).await.unwrap();
    written(&peer).await;

    peer.disconnect("unplugged").unwrap();
    assert!(matches!(
        pending.wait(Some(WAIT)).await,
        Err(Error::Transport(TransportError::LinkLost(_)))
    ));
    assert_eq!(chan.state(), ChannelState::Closed);
    assert!(matches!(
        chan.send_nowait(ping(0x01)).await,
        Err(Error::Transport(TransportError::LinkLost(_)))
    ));

    // The link came back.
    chan.open(LinkEnabler::ALL).await.unwrap();
    let task = tokio::spawn({
        let chan = Arc::clone(&chan);
        async move { chan.send_v20(ping(0x01)).await }
    });
    let request = written(&peer).await;
    let mut reply = long(&request);
    reply[0] = 0x11;
    reply[4..7].copy_from_slice(&[0x04, 0x02, 0x5a]);
    peer.inject(&reply).unwrap();

    let response = task.await.unwrap().unwrap();
    assert_eq!(response.payload()[..3], [0x04, 0x02, 0x5a]);
}

#[tokio::test]
async fn retries_carry_fresh_software_ids() {
    let (chan, peer) = open_channel("device").await;

    let task = tokio::spawn({
        let chan = Arc::clone(&chan);
        async move { chan.send_with_retry(ping(0x01)).await }
    });

    assert_eq!(written(&peer).await[3], 0x11);
    assert_eq!(written(&peer).await[3], 0x12);
    peer.inject(&long(&[0x11, 0x01, 0x00, 0x12, 0x04, 0x02, 0x5a])).unwrap();
    task.await.unwrap().unwrap();

    // The device answers the first attempt after all.
    peer.inject(&long(&[0x11, 0x01, 0x00, 0x11, 0x04, 0x02, 0x5a])).unwrap();
    let orphan = chan.queue(QueueName::OrphanResponse).get(Some(WAIT)).await.unwrap();
    assert_eq!(orphan.as_hidpp().unwrap().message.header().function_and_sw_id, 0x11);
}

#[tokio::test]
async fn switching_channels_keeps_them_listening() {
    let manager = ChannelManager::new(HarnessConfig::default());

    let (receiver_transport, receiver_peer) = EmulatedTransport::new(0x046d, 0xc548);
    let (ble_transport, _ble_peer) = EmulatedTransport::new(0x046d, 0xb034);
    let receiver = ChannelId::from("receiver");
    let ble = ChannelId::from("ble");
    manager.add(receiver.clone(), Arc::new(receiver_transport));
    manager.add(ble.clone(), Arc::new(ble_transport));
    manager.open(&receiver, LinkEnabler::ALL).await.unwrap();
    manager.open(&ble, LinkEnabler::ALL).await.unwrap();

    manager.switch(&ble).unwrap();
    receiver_peer.inject(&[0x10, 0x01, 0x41, 0x0e, 0x42, 0x2b, 0x40]).unwrap();

    let chan = manager.get(&receiver).unwrap();
    assert!(chan.is_open());
    chan.queue(QueueName::ReceiverConnectionEvent)
        .get(Some(WAIT))
        .await
        .unwrap();
    assert_eq!(manager.current().unwrap().id(), &ble);
}

#[tokio::test]
async fn devices_are_reached_through_their_receiver() {
    common::init_tracing();
    let manager = ChannelManager::new(HarnessConfig::default());
    let (transport, peer) = EmulatedTransport::new(0x046d, 0xc548);
    let receiver = ChannelId::from("receiver");
    manager.add(receiver.clone(), Arc::new(transport));
    manager.open(&receiver, LinkEnabler::ALL).await.unwrap();

    let enumeration = tokio::spawn({
        let manager = Arc::new(manager);
        let receiver = receiver.clone();
        async move {
            let connections = manager.enumerate_receiver(&receiver).await?;
            Ok::<_, Error>((manager, connections))
        }
    });

    // The receiver already sends connection notifications.
    assert_eq!(written(&peer).await, [0x10, 0xff, 0x81, 0x00, 0x00, 0x00, 0x00]);
    peer.inject(&[0x10, 0xff, 0x81, 0x00, 0x00, 0x01, 0x00]).unwrap();

    assert_eq!(written(&peer).await, [0x10, 0xff, 0x80, 0x02, 0x02, 0x00, 0x00]);
    peer.inject(&[0x10, 0x02, 0x41, 0x10, 0x02, 0x8a, 0x40]).unwrap();
    peer.inject(&[0x10, 0xff, 0x80, 0x02, 0x00, 0x00, 0x00]).unwrap();

    let (manager, connections) = enumeration.await.unwrap().unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(manager.connected_devices(&receiver), connections);

    let mouse = manager
        .open_through_receiver(&receiver, 0x02, "mouse")
        .await
        .unwrap();
    assert_eq!(mouse.kind(), TransportKind::ReceiverTunnel);
    assert_eq!(mouse.product_id(), 0x408a);
    assert_eq!(mouse.device_index(), 0x02);

    let task = tokio::spawn({
        let mouse = Arc::clone(&mouse);
        async move { mouse.cache().resolve(&mouse, 0x02, 0x2121).await }
    });
    assert_eq!(written(&peer).await, [0x10, 0x02, 0x00, 0x01, 0x21, 0x21, 0x00]);
    peer.inject(&long(&[0x11, 0x02, 0x00, 0x01, 0x06, 0x00, 0x01])).unwrap();

    let wheel = task.await.unwrap().unwrap().unwrap();
    assert_eq!((wheel.index, wheel.version), (0x06, 1));
    assert_eq!(manager.get(&receiver).unwrap().outstanding_requests(), 0);

    // Closing the receiver cuts off the device.
    let pending = mouse.send_nowait(ping(0x02)).await.unwrap();
    written(&peer).await;
    manager.close(&receiver).unwrap();
    assert!(matches!(
        pending.wait(Some(Duration::from_secs(2))).await,
        Err(Error::Transport(TransportError::LinkLost(_)))
    ));
}
