//! Sorts inbound frames into waiters and queues.
//!
//! Each channel has one dispatcher, fed by the reader thread in arrival order.
//! For every frame it decides, in this order:
//!
//! 1. Frames that are not HID++ reports are plain HID input reports. They are
//!    labelled with the [`ReportMap`] and go to [`QueueName::Hid`], unless
//!    the interface they belong to is disabled.
//! 2. HID++2.0 (`0xFF`) and HID++1.0 (`0x8F`) error messages complete the
//!    waiter of the request whose header they echo. Unawaited errors go to
//!    [`QueueName::Error`] and [`QueueName::ReceiverError`].
//! 3. Any other frame whose header matches a waiter completes it.
//! 4. Receiver connection notifications go to their queue and invalidate
//!    the cached feature indices of the device index.
//! 5. Frames for a device index with a registered tunnel are forwarded to
//!    the tunnel channel.
//! 6. Frames of a feature with a cached index are events if their software ID
//!    is zero or their function index is a declared event of the feature
//!    version; they go to the event queue of the feature (see
//!    [`FeatureDescriptor::event_queue`]). Anything else from a feature is a
//!    reply nobody waits for anymore and goes to
//!    [`QueueName::OrphanResponse`], provided its software ID was issued
//!    for that request header at some point.
//! 7. Unawaited register replies go to [`QueueName::ReceiverResponse`],
//!    other frames with a notification sub ID to [`QueueName::ReceiverEvent`]
//!    unless the device is known to speak HID++2.0. A HID++2.0 reply on a
//!    feature index without a cached feature answers nothing.
//!
//! Nothing in here fails: a frame that cannot be parsed or that answers no
//! request ever sent becomes a [`MalformedFrame`] in [`QueueName::Malformed`],
//! carrying the [`ProtocolError`] that describes it.
//!
//! [`FeatureDescriptor::event_queue`]: crate::feature::FeatureDescriptor::event_queue

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use flume::Sender;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::{
    bitfield::{BitMessage, MessageError, Schema, Timestamp},
    cache::{CachedFeature, FeatureIndexCache, InvalidationReason},
    correlator::{Correlator, Reply},
    error::ProtocolError,
    feature::registry,
    protocol::{HidppMessage, HidppMessageHeader, ReportSize, hex, v10, v20},
    queue::{DispatchedMessage, HidMessageQueue, HidReport, MalformedFrame, QueueName, ReceivedMessage},
    register::{self, DEVICE_CONNECTION_SUB_ID, DEVICE_DISCONNECTION_SUB_ID},
    report::ReportMap,
    transport::{LinkEnabler, tunnel::TunnelFrame},
};

/// Routes the inbound frames of one channel.
pub struct Dispatcher {
    /// The name of the channel, for logging.
    channel: String,
    queues: Vec<HidMessageQueue>,
    correlator: Arc<Correlator>,
    cache: Arc<FeatureIndexCache>,
    report_map: ReportMap,
    link_enabler: RwLock<LinkEnabler>,
    tunnels: RwLock<HashMap<u8, Sender<TunnelFrame>>>,
}

impl Dispatcher {
    pub fn new(
        channel: impl Into<String>,
        queue_capacity: usize,
        report_map: ReportMap,
        correlator: Arc<Correlator>,
        cache: Arc<FeatureIndexCache>,
    ) -> Self {
        Self {
            channel: channel.into(),
            queues: QueueName::ALL
                .iter()
                .map(|name| HidMessageQueue::new(*name, queue_capacity))
                .collect(),
            correlator,
            cache,
            report_map,
            link_enabler: RwLock::new(LinkEnabler::default()),
            tunnels: RwLock::new(HashMap::new()),
        }
    }

    pub fn queue(&self, name: QueueName) -> &HidMessageQueue {
        &self.queues[name.index()]
    }

    pub fn cache(&self) -> &Arc<FeatureIndexCache> {
        &self.cache
    }

    pub fn link_enabler(&self) -> LinkEnabler {
        *self.link_enabler.read()
    }

    /// Selects the interfaces whose traffic is delivered. Frames of disabled
    /// interfaces are dropped.
    pub fn set_link_enabler(&self, link_enabler: LinkEnabler) {
        *self.link_enabler.write() = link_enabler;
    }

    /// Forwards all HID++ frames of a device index to a tunnel channel.
    pub fn register_tunnel(&self, device_index: u8, inbound: Sender<TunnelFrame>) {
        debug!(channel = %self.channel, device_index, "tunnel registered");
        self.tunnels.write().insert(device_index, inbound);
    }

    pub fn unregister_tunnel(&self, device_index: u8) {
        self.tunnels.write().remove(&device_index);
    }

    /// Drops all tunnels. Their channels see the link as lost.
    pub fn release_tunnels(&self) {
        let released = std::mem::take(&mut *self.tunnels.write());
        if !released.is_empty() {
            debug!(channel = %self.channel, count = released.len(), "tunnels released");
        }
    }

    /// Empties every queue, returning the untreated messages of the queues
    /// that held any.
    pub fn clear_all_queues(&self) -> BTreeMap<QueueName, Vec<DispatchedMessage>> {
        self.clear_queues(|_| true)
    }

    /// Empties every queue but [`QueueName::Hid`].
    pub fn clear_hidpp_queues(&self) -> BTreeMap<QueueName, Vec<DispatchedMessage>> {
        self.clear_queues(QueueName::is_hidpp)
    }

    fn clear_queues(&self, select: impl Fn(QueueName) -> bool) -> BTreeMap<QueueName, Vec<DispatchedMessage>> {
        self.queues
            .iter()
            .filter(|queue| select(queue.name()))
            .map(|queue| (queue.name(), queue.clear()))
            .filter(|(_, untreated)| !untreated.is_empty())
            .collect()
    }

    /// Hands the feature index mapping of this channel to another
    /// dispatcher, so it can decode the traffic of the same devices.
    pub fn copy_mapping_to(&self, other: &Dispatcher) {
        self.cache.copy_mapping_to(&other.cache);
    }

    /// Routes a single inbound frame.
    pub fn dispatch(&self, data: &[u8], timestamp: Timestamp) {
        let Some(&report_id) = data.first() else {
            self.malformed(data, timestamp, ProtocolError::ShortFrame { expected: 1, actual: 0 }.into());
            return;
        };

        if ReportSize::from_report_id(report_id).is_none() {
            self.dispatch_hid(report_id, data, timestamp);
            return;
        }

        if !self.link_enabler().contains(LinkEnabler::HIDPP) {
            trace!(channel = %self.channel, report_hex = %hex(data), "HID++ interface disabled, frame dropped");
            return;
        }

        match HidppMessage::read_raw(data) {
            Ok(msg) => {
                trace!(channel = %self.channel, report_hex = %msg, "HID++ RX");
                self.dispatch_hidpp(msg, data, timestamp);
            },
            Err(err) => self.malformed(data, timestamp, err.into()),
        }
    }

    fn dispatch_hid(&self, report_id: u8, data: &[u8], timestamp: Timestamp) {
        let kind = self.report_map.kind(report_id);
        if let Some(kind) = kind {
            if !self.link_enabler().contains(kind.interface()) {
                trace!(channel = %self.channel, ?kind, "interface disabled, HID report dropped");
                return;
            }
        }

        self.push(
            QueueName::Hid,
            DispatchedMessage::Hid(HidReport {
                data: data.to_vec(),
                timestamp,
                kind,
            }),
        );
    }

    fn dispatch_hidpp(&self, msg: HidppMessage, data: &[u8], timestamp: Timestamp) {
        let header = msg.header();

        if let Some(error) = v20::ErrorMessage::read(&msg) {
            let key = HidppMessageHeader::from(error.request);
            if self.correlator.complete(key, Reply::Hidpp20Error(error.code)).is_ok() {
                trace!(channel = %self.channel, code = ?error.code, "HID++2.0 error handed to waiter");
            } else if !self.forward(header.device_index, data, timestamp) {
                let feature = self.cache.feature_at(key.device_index, key.feature_index);
                self.push_hidpp(QueueName::Error, msg, timestamp, feature, None);
            }
            return;
        }

        if let Some(error) = v10::ErrorMessage::read(&msg) {
            let key = HidppMessageHeader::from(error.request);
            if self.correlator.complete(key, Reply::Hidpp10Error(error.code)).is_ok() {
                trace!(channel = %self.channel, code = ?error.code, "HID++1.0 error handed to waiter");
            } else if !self.forward(header.device_index, data, timestamp) {
                self.push_hidpp(QueueName::ReceiverError, msg, timestamp, None, None);
            }
            return;
        }

        if self.correlator.complete(header, Reply::Response(msg)).is_ok() {
            trace!(channel = %self.channel, key = ?header, "response handed to waiter");
            return;
        }

        let feature = self.cache.feature_at(header.device_index, header.feature_index);
        if feature.is_none() {
            if let Some(notification) = register::notification(header.feature_index) {
                if matches!(notification.sub_id, DEVICE_CONNECTION_SUB_ID | DEVICE_DISCONNECTION_SUB_ID) {
                    self.cache
                        .invalidate(Some(header.device_index), InvalidationReason::PairingChange);
                }
                self.forward(header.device_index, data, timestamp);

                match decode_extended(notification.schema, msg.payload()) {
                    Ok(decoded) => self.push_hidpp(notification.queue, msg, timestamp, None, Some(decoded)),
                    Err(err) => self.malformed(data, timestamp, err),
                }
                return;
            }
        }

        if self.forward(header.device_index, data, timestamp) {
            return;
        }

        if let Some(feature) = feature {
            self.route_feature(msg, data, timestamp, feature);
            return;
        }

        let queue = match v10::MessageType::try_from(header.feature_index) {
            Ok(kind) if kind.is_register_access() => QueueName::ReceiverResponse,
            _ if !self.cache.knows_device(header.device_index) && v10::is_notification(header.feature_index) => {
                QueueName::ReceiverEvent
            },
            _ if v20::MessageHeader::from(header).is_event() => QueueName::Event,
            _ => {
                let err = ProtocolError::UnknownFeatureIndex {
                    device_index: header.device_index,
                    feature_index: header.feature_index,
                };
                self.malformed(data, timestamp, err.into());
                return;
            },
        };
        self.push_hidpp(queue, msg, timestamp, None, None);
    }

    /// Routes an unawaited frame of a feature with a known index.
    fn route_feature(&self, msg: HidppMessage, data: &[u8], timestamp: Timestamp, feature: CachedFeature) {
        let header = v20::MessageHeader::from(msg.header());
        let function = header.function_id.to_lo();
        let descriptor = registry::descriptor(feature.id, feature.version).ok();
        let event = descriptor.and_then(|descriptor| descriptor.event(function));

        if !header.is_event() && event.is_none() {
            if !self.correlator.has_issued(&msg.header()) {
                let err = ProtocolError::UnknownSoftwareId(header.software_id.to_lo());
                self.malformed(data, timestamp, err.into());
                return;
            }

            // Its waiter gave up.
            let decoded = descriptor
                .and_then(|descriptor| descriptor.function(function).ok())
                .and_then(|function| decode_extended(function.response, msg.payload()).ok());
            self.push_hidpp(QueueName::OrphanResponse, msg, timestamp, Some(feature), decoded);
            return;
        }

        let queue = match descriptor {
            Some(descriptor) => descriptor.event_queue(function),
            None => registry::family(feature.id).event_queue(),
        };
        let decoded = match event {
            Some(event) => match decode_extended(event.schema, msg.payload()) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    self.malformed(data, timestamp, err);
                    return;
                },
            },
            None => None,
        };

        trace!(
            channel = %self.channel,
            feature_id = feature.id,
            event = event.map(|event| event.name),
            %queue,
            "event routed"
        );
        self.push_hidpp(queue, msg, timestamp, Some(feature), decoded);
    }

    /// Passes a frame on to the tunnel of its device index, if one is
    /// registered.
    fn forward(&self, device_index: u8, data: &[u8], timestamp: Timestamp) -> bool {
        let Some(inbound) = self.tunnels.read().get(&device_index).cloned() else {
            return false;
        };

        if inbound.send((data.to_vec(), timestamp)).is_ok() {
            return true;
        }

        debug!(channel = %self.channel, device_index, "tunnel closed, unregistering it");
        self.unregister_tunnel(device_index);
        false
    }

    fn push_hidpp(
        &self,
        queue: QueueName,
        message: HidppMessage,
        timestamp: Timestamp,
        feature: Option<CachedFeature>,
        decoded: Option<BitMessage>,
    ) {
        self.push(
            queue,
            DispatchedMessage::Hidpp(ReceivedMessage {
                message,
                timestamp,
                feature: feature.map(|feature| (feature.id, feature.version)),
                decoded,
            }),
        );
    }

    fn malformed(&self, data: &[u8], timestamp: Timestamp, error: MessageError) {
        warn!(channel = %self.channel, report_hex = %hex(data), %error, "malformed frame");
        self.push(
            QueueName::Malformed,
            DispatchedMessage::Malformed(MalformedFrame {
                data: data.to_vec(),
                timestamp,
                error,
            }),
        );
    }

    fn push(&self, queue: QueueName, msg: DispatchedMessage) {
        self.queue(queue).push(msg);
    }
}

/// Decodes a payload, reading missing trailing bytes as zero. Short reports
/// carry the first three bytes of payloads declared for long ones.
fn decode_extended(schema: &'static Schema, payload: &[u8]) -> Result<BitMessage, MessageError> {
    if payload.len() >= schema.byte_len() {
        return BitMessage::parse(schema, payload);
    }
    let mut extended = payload.to_vec();
    extended.resize(schema.byte_len(), 0);
    BitMessage::parse(schema, &extended)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        correlator::RequestKind,
        feature::{FeatureFactory, FeatureType, hires_wheel::HiResWheel},
        nibble::U4,
        report::HidReportKind,
    };

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            "test",
            64,
            ReportMap::default(),
            Arc::new(Correlator::new()),
            Arc::new(FeatureIndexCache::new()),
        )
    }

    fn map_hires_wheel(dispatcher: &Dispatcher, device_index: u8, feature_index: u8) {
        dispatcher.cache().insert(device_index, CachedFeature {
            id: HiResWheel::ID,
            index: feature_index,
            version: 0,
            typ: FeatureType::default(),
        });
    }

    /// Sends nothing, but leaves the software ID of a request issued.
    fn issue_software_id(dispatcher: &Dispatcher, device_index: u8, feature_index: u8, function: u8) -> u8 {
        let request = v20::request(ReportSize::Short, device_index, feature_index, U4::from_lo(function), &[]).unwrap();
        let pending = dispatcher.correlator.register(request, RequestKind::Hidpp20).unwrap();
        pending.key().software_id().to_lo()
    }

    fn malformed_error(msg: DispatchedMessage) -> MessageError {
        match msg {
            DispatchedMessage::Malformed(frame) => frame.error,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn only(dispatcher: &Dispatcher, queue: QueueName) -> DispatchedMessage {
        let mut cleared = dispatcher.clear_all_queues();
        assert_eq!(cleared.keys().copied().collect::<Vec<_>>(), vec![queue]);
        let mut messages = cleared.remove(&queue).unwrap();
        assert_eq!(messages.len(), 1);
        messages.remove(0)
    }

    fn long(header: [u8; 4]) -> Vec<u8> {
        let mut data = vec![0u8; 20];
        data[..4].copy_from_slice(&header);
        data
    }

    #[test]
    fn hid_reports_are_labelled_and_filtered() {
        let dispatcher = dispatcher();
        dispatcher.dispatch(&[0x02, 0x00, 0x05, 0x00], Timestamp::now());
        match only(&dispatcher, QueueName::Hid) {
            DispatchedMessage::Hid(report) => assert_eq!(report.kind, Some(HidReportKind::Mouse)),
            other => panic!("unexpected {other:?}"),
        }

        dispatcher.set_link_enabler(LinkEnabler::HIDPP | LinkEnabler::KEYBOARD);
        dispatcher.dispatch(&[0x02, 0x00, 0x05, 0x00], Timestamp::now());
        dispatcher.dispatch(&[0x01, 0x00, 0x04], Timestamp::now());
        only(&dispatcher, QueueName::Hid);

        dispatcher.set_link_enabler(LinkEnabler::MOUSE);
        dispatcher.dispatch(&long([0x11, 0x01, 0x04, 0x10]), Timestamp::now());
        assert!(dispatcher.clear_all_queues().is_empty());
    }

    #[test]
    fn broken_frames_become_diagnostics() {
        let dispatcher = dispatcher();
        dispatcher.dispatch(&[], Timestamp::now());
        dispatcher.dispatch(&[0x11, 0x01, 0x04], Timestamp::now());

        let cleared = dispatcher.clear_all_queues();
        let malformed = &cleared[&QueueName::Malformed];
        assert_eq!(malformed.len(), 2);
        match &malformed[1] {
            DispatchedMessage::Malformed(frame) => assert_eq!(
                frame.error,
                MessageError::Protocol(ProtocolError::ShortFrame {
                    expected: 20,
                    actual: 3
                })
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn events_go_to_the_queue_of_their_feature() {
        let dispatcher = dispatcher();
        map_hires_wheel(&dispatcher, 0x01, 0x07);

        // wheelMovement: high resolution, 2 periods, delta 1
        let mut data = long([0x11, 0x01, 0x07, 0x00]);
        data[4] = 0x12;
        data[6] = 0x01;
        dispatcher.dispatch(&data, Timestamp::now());

        let rx = only(&dispatcher, QueueName::Mouse).into_hidpp().unwrap();
        assert_eq!(rx.feature, Some((HiResWheel::ID, 0)));
        let decoded = rx.decoded.unwrap();
        assert_eq!(decoded.schema().name, HiResWheel::V0.descriptor().event(0).unwrap().schema.name);
    }

    #[test]
    fn unawaited_replies_are_orphans() {
        let dispatcher = dispatcher();
        map_hires_wheel(&dispatcher, 0x01, 0x07);

        // setWheelMode, its waiter gave up
        let software_id = issue_software_id(&dispatcher, 0x01, 0x07, 2);
        dispatcher.dispatch(&long([0x11, 0x01, 0x07, 0x20 | software_id]), Timestamp::now());
        let rx = only(&dispatcher, QueueName::OrphanResponse).into_hidpp().unwrap();
        assert!(rx.decoded.is_some());
    }

    #[test]
    fn replies_nobody_asked_for_are_diagnosed() {
        let dispatcher = dispatcher();
        map_hires_wheel(&dispatcher, 0x01, 0x07);
        issue_software_id(&dispatcher, 0x01, 0x07, 2);

        dispatcher.dispatch(&long([0x11, 0x01, 0x07, 0x2c]), Timestamp::now());
        assert_eq!(
            malformed_error(only(&dispatcher, QueueName::Malformed)),
            MessageError::Protocol(ProtocolError::UnknownSoftwareId(0x0c))
        );

        // Unknown feature index of a HID++2.0 device.
        dispatcher.dispatch(&long([0x11, 0x01, 0x09, 0x15]), Timestamp::now());
        assert_eq!(
            malformed_error(only(&dispatcher, QueueName::Malformed)),
            MessageError::Protocol(ProtocolError::UnknownFeatureIndex {
                device_index: 0x01,
                feature_index: 0x09
            })
        );

        // Events of features that were not located yet are kept.
        dispatcher.dispatch(&long([0x11, 0x01, 0x09, 0x10]), Timestamp::now());
        only(&dispatcher, QueueName::Event);

        // Without a feature table, low indices are HID++1.0 notifications.
        dispatcher.dispatch(&long([0x11, 0x02, 0x09, 0x15]), Timestamp::now());
        only(&dispatcher, QueueName::ReceiverEvent);
    }

    #[tokio::test]
    async fn errors_reach_their_waiter_or_the_error_queue() {
        let dispatcher = dispatcher();
        let request = v20::request(ReportSize::Short, 0x01, 0x05, U4::from_lo(1), &[0x03]).unwrap();
        let pending = dispatcher.correlator.register(request, RequestKind::Hidpp20).unwrap();
        let software_id = pending.key().software_id().to_lo();

        dispatcher.dispatch(&[0x10, 0x01, 0xff, 0x05, 0x10 | software_id, 0x02, 0x00], Timestamp::now());
        assert_eq!(
            pending.wait(Some(Duration::from_secs(1))).await.unwrap_err().hidpp20_code(),
            Some(v20::ErrorCode::InvalidArgument)
        );

        dispatcher.dispatch(&[0x10, 0x01, 0xff, 0x05, 0x1f, 0x02, 0x00], Timestamp::now());
        only(&dispatcher, QueueName::Error);

        dispatcher.dispatch(&[0x10, 0xff, 0x8f, 0x80, 0xb2, 0x02, 0x00], Timestamp::now());
        only(&dispatcher, QueueName::ReceiverError);
    }

    #[test]
    fn receiver_traffic() {
        let dispatcher = dispatcher();
        map_hires_wheel(&dispatcher, 0x02, 0x07);

        dispatcher.dispatch(&[0x10, 0x02, 0x41, 0x10, 0x22, 0x7b, 0x40], Timestamp::now());
        let rx = only(&dispatcher, QueueName::ReceiverConnectionEvent).into_hidpp().unwrap();
        assert_eq!(rx.decoded.unwrap().uint("device_type").unwrap(), 0x02);
        assert!(!dispatcher.cache().knows_device(0x02));

        dispatcher.dispatch(&[0x10, 0xff, 0x81, 0x02, 0x00, 0x01, 0x00], Timestamp::now());
        only(&dispatcher, QueueName::ReceiverResponse);

        dispatcher.dispatch(&[0x10, 0x01, 0x4b, 0x01, 0x00, 0x00, 0x00], Timestamp::now());
        only(&dispatcher, QueueName::ReceiverEvent);
    }

    #[test]
    fn tunnels_get_their_device_traffic() {
        let dispatcher = dispatcher();
        let (sender, receiver) = flume::unbounded();
        dispatcher.register_tunnel(0x03, sender);

        let data = long([0x11, 0x03, 0x05, 0x12]);
        dispatcher.dispatch(&data, Timestamp::now());
        assert_eq!(receiver.try_recv().unwrap().0, data);
        assert!(dispatcher.clear_all_queues().is_empty());

        drop(receiver);
        dispatcher.cache().insert(0x03, CachedFeature {
            id: 0x1004,
            index: 0x05,
            version: 0,
            typ: FeatureType::default(),
        });
        issue_software_id(&dispatcher, 0x03, 0x05, 1);
        issue_software_id(&dispatcher, 0x03, 0x05, 1);
        dispatcher.dispatch(&data, Timestamp::now());
        only(&dispatcher, QueueName::OrphanResponse);
    }

    #[test]
    fn clearing_hidpp_queues_keeps_hid_reports() {
        let source = dispatcher();
        source.dispatch(&[0x01, 0x00, 0x04], Timestamp::now());
        source.dispatch(&[0x10, 0xff, 0x8f, 0x80, 0xb2, 0x02, 0x00], Timestamp::now());

        let cleared = source.clear_hidpp_queues();
        assert_eq!(cleared.keys().copied().collect::<Vec<_>>(), vec![QueueName::ReceiverError]);
        assert_eq!(source.queue(QueueName::Hid).len(), 1);

        map_hires_wheel(&source, 0x01, 0x07);
        let target = dispatcher();
        source.copy_mapping_to(&target);
        assert_eq!(target.cache().feature_at(0x01, 0x07).unwrap().id, HiResWheel::ID);
    }
}
