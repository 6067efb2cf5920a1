//! Implements HID++ messaging on top of a [`Transport`].
//!
//! A [`HidppChannel`] owns the threads that keep a link alive: a reader
//! thread pulling timestamped reports out of the transport, and a dispatcher
//! thread routing them in arrival order (see [`crate::dispatcher`]). Requests
//! can be sent from any task; each one registers its own waiter with the
//! channel's [`Correlator`] before it is written.

use std::{
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use futures::{FutureExt, channel::oneshot, select};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::{
    bitfield::{BitMessage, Timestamp},
    cache::{FeatureIndexCache, InvalidationReason},
    config::ChannelConfig,
    correlator::{Correlator, PendingReply, RequestKind},
    dispatcher::Dispatcher,
    error::Error,
    feature::FunctionDescriptor,
    manager::ChannelId,
    nibble::U4,
    protocol::{
        HidppMessage,
        LONG_REPORT_ID,
        RECEIVER_DEVICE_INDEX,
        ReportSize,
        SHORT_REPORT_ID,
        v10,
        v20,
    },
    queue::{DispatchedMessage, HidMessageQueue, QueueName},
    register::{RegisterAccess, RegisterDescriptor},
    report::ReportMap,
    transport::{
        LinkEnabler,
        MAX_REPORT_LENGTH,
        Transport,
        TransportError,
        TransportKind,
        supports_short_long_hidpp,
    },
};

/// The protocol a channel currently speaks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelProtocol {
    #[default]
    Hidpp,

    /// The plain HID mode a device enters for a firmware update. It has no
    /// HID++ interface.
    DfuHid,

    /// The device runs its bootloader.
    Bootloader,
}

/// The lifecycle of a channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelState {
    Created,
    Open,

    /// Open, but switched to a protocol without HID++. Requests are refused
    /// until it switches back.
    Suspended,

    Closed,
}

struct ChannelThreads {
    close: oneshot::Sender<()>,
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Represents a HID communication channel supporting HID++.
pub struct HidppChannel {
    id: ChannelId,

    /// The device index the channel addresses by default.
    device_index: u8,

    transport: Arc<dyn Transport>,
    config: ChannelConfig,

    /// Whether the link supports short and long HID++ reports, known once
    /// the channel was opened.
    support: RwLock<Option<(bool, bool)>>,

    protocol: RwLock<ChannelProtocol>,
    state: Arc<RwLock<ChannelState>>,
    correlator: Arc<Correlator>,
    dispatcher: Arc<Dispatcher>,
    threads: Mutex<Option<ChannelThreads>>,

    /// Joins the threads of a closed session on the blocking pool of the
    /// runtime the channel was closed in.
    stopping: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HidppChannel {
    /// Creates a channel on a transport. It has to be [opened](Self::open)
    /// before use.
    pub fn new(id: impl Into<ChannelId>, transport: Arc<dyn Transport>, config: ChannelConfig, report_map: ReportMap) -> Self {
        let id = id.into();
        let correlator = Arc::new(Correlator::new());
        let dispatcher = Arc::new(Dispatcher::new(
            id.to_string(),
            config.queue_capacity,
            report_map,
            Arc::clone(&correlator),
            Arc::new(FeatureIndexCache::new()),
        ));

        Self {
            id,
            device_index: RECEIVER_DEVICE_INDEX,
            transport,
            config,
            support: RwLock::new(None),
            protocol: RwLock::new(ChannelProtocol::Hidpp),
            state: Arc::new(RwLock::new(ChannelState::Created)),
            correlator,
            dispatcher,
            threads: Mutex::new(None),
            stopping: Mutex::new(None),
        }
    }

    /// Sets the device index the channel addresses by default, for channels
    /// to a device behind a receiver.
    pub fn with_device_index(mut self, device_index: u8) -> Self {
        self.device_index = device_index;
        self
    }

    /// Creates a channel and opens it with all interfaces enabled.
    pub async fn open_transport(
        id: impl Into<ChannelId>,
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
    ) -> Result<Arc<Self>, Error> {
        let chan = Arc::new(Self::new(id, transport, config, ReportMap::default()));
        chan.open(LinkEnabler::ALL).await?;
        Ok(chan)
    }

    /// Starts the reader and dispatcher threads.
    ///
    /// Opening an open channel only updates its enabled interfaces.
    ///
    /// Returns [`TransportError::HidppNotSupported`] if the HID++ interface is
    /// enabled but the link supports neither short nor long HID++ reports.
    pub async fn open(&self, link_enabler: LinkEnabler) -> Result<(), Error> {
        self.dispatcher.set_link_enabler(link_enabler);
        if self.threads.lock().is_some() {
            if self.state() != ChannelState::Closed {
                return Ok(());
            }
            // The link was lost, the threads are about to end.
            self.stop_threads();
        }

        let stopping = self.stopping.lock().take();
        if let Some(stopping) = stopping {
            // The previous reader may still hold the transport.
            let _ = stopping.await;
        }

        let support = supports_short_long_hidpp(&*self.transport).await?;
        if link_enabler.contains(LinkEnabler::HIDPP) && support == (false, false) {
            return Err(TransportError::HidppNotSupported.into());
        }
        *self.support.write() = Some(support);
        self.correlator.reset();

        let mut threads = self.threads.lock();
        if threads.is_some() {
            return Ok(());
        }
        *threads = Some(self.spawn_threads()?);
        *self.state.write() = match *self.protocol.read() {
            ChannelProtocol::Hidpp => ChannelState::Open,
            _ => ChannelState::Suspended,
        };

        debug!(
            channel = %self.id,
            kind = ?self.transport.kind(),
            supports_short = support.0,
            supports_long = support.1,
            ?link_enabler,
            "channel opened"
        );
        Ok(())
    }

    fn spawn_threads(&self) -> Result<ChannelThreads, TransportError> {
        let (close_sender, mut close_receiver) = oneshot::channel::<()>();
        let (inbound_sender, inbound_receiver) = flume::bounded::<(Vec<u8>, Timestamp)>(self.config.queue_capacity);

        let reader = thread::Builder::new()
            .name(format!("hidpp-rx-{}", self.id))
            .spawn({
                let id = self.id.clone();
                let transport = Arc::clone(&self.transport);
                let correlator = Arc::clone(&self.correlator);
                let dispatcher = Arc::clone(&self.dispatcher);
                let state = Arc::clone(&self.state);

                move || {
                    futures::executor::block_on(async {
                        let mut buf = [0u8; MAX_REPORT_LENGTH];

                        loop {
                            let res = select! {
                                _ = close_receiver => {
                                    break;
                                },
                                res = transport.read_report(&mut buf).fuse() => res
                            };

                            match res {
                                Ok((len, timestamp)) => {
                                    if inbound_sender.send_async((buf[..len].to_vec(), timestamp)).await.is_err() {
                                        break;
                                    }
                                },
                                Err(err) => {
                                    warn!(channel = %id, %err, "link lost");
                                    *state.write() = ChannelState::Closed;
                                    let released = correlator.release_all(err);
                                    dispatcher.release_tunnels();
                                    debug!(channel = %id, released, "waiters released");
                                    break;
                                },
                            }
                        }
                    });
                }
            })
            .map_err(TransportError::implementation)?;

        let dispatcher = thread::Builder::new()
            .name(format!("hidpp-dispatch-{}", self.id))
            .spawn({
                let dispatcher = Arc::clone(&self.dispatcher);
                move || {
                    while let Ok((data, timestamp)) = inbound_receiver.recv() {
                        dispatcher.dispatch(&data, timestamp);
                    }
                }
            })
            .map_err(TransportError::implementation)?;

        Ok(ChannelThreads {
            close: close_sender,
            reader,
            dispatcher,
        })
    }

    /// Stops the channel. Every waiting request fails with
    /// [`TransportError::Closed`], and so do the tunnels to devices behind
    /// it. Queued messages stay available.
    ///
    /// Called from within a tokio runtime, the reader and dispatcher threads
    /// are joined in the background; [`Self::open`] waits for them.
    pub fn close(&self) {
        *self.state.write() = ChannelState::Closed;
        let released = self.correlator.release_all(TransportError::Closed);
        self.dispatcher.release_tunnels();

        self.stop_threads();
        debug!(channel = %self.id, released, "channel closed");
    }

    fn stop_threads(&self) {
        let Some(threads) = self.threads.lock().take() else {
            return;
        };

        // This only fails if the reader already stopped.
        let _ = threads.close.send(());
        let current = thread::current().id();
        let handles: Vec<JoinHandle<()>> = [threads.reader, threads.dispatcher]
            .into_iter()
            .filter(|handle| handle.thread().id() != current)
            .collect();
        let join = move || {
            for handle in handles {
                let _ = handle.join();
            }
        };

        // Runtime workers must not block on the join.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => *self.stopping.lock() = Some(runtime.spawn_blocking(join)),
            Err(_) => join(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), ChannelState::Open | ChannelState::Suspended)
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn device_index(&self) -> u8 {
        self.device_index
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn vendor_id(&self) -> u16 {
        self.transport.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.transport.product_id()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Whether the link supports short and long HID++ reports, if the channel
    /// was opened.
    pub fn hidpp_support(&self) -> Option<(bool, bool)> {
        *self.support.read()
    }

    pub fn protocol(&self) -> ChannelProtocol {
        *self.protocol.read()
    }

    /// Replaces the protocol tag after the device switched protocols, for
    /// example when entering firmware update mode.
    ///
    /// All cached feature indices and all HID++ queues are flushed. Requests
    /// are refused while the protocol has no HID++ interface.
    pub fn switch_protocol(&self, protocol: ChannelProtocol) {
        *self.protocol.write() = protocol;
        self.dispatcher.cache().invalidate(None, InvalidationReason::ProtocolSwitch);
        let flushed: usize = self.dispatcher.clear_hidpp_queues().values().map(Vec::len).sum();

        {
            let mut state = self.state.write();
            if matches!(*state, ChannelState::Open | ChannelState::Suspended) {
                *state = match protocol {
                    ChannelProtocol::Hidpp => ChannelState::Open,
                    _ => ChannelState::Suspended,
                };
            }
        }
        debug!(channel = %self.id, ?protocol, flushed, "protocol switched");
    }

    pub fn link_enabler(&self) -> LinkEnabler {
        self.dispatcher.link_enabler()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The feature index cache of the channel.
    pub fn cache(&self) -> &Arc<FeatureIndexCache> {
        self.dispatcher.cache()
    }

    /// One of the queues unawaited messages are sorted into.
    pub fn queue(&self, name: QueueName) -> &HidMessageQueue {
        self.dispatcher.queue(name)
    }

    /// The number of requests waiting for their reply.
    pub fn outstanding_requests(&self) -> usize {
        self.correlator.outstanding()
    }

    /// See [`Dispatcher::clear_all_queues`].
    pub fn clear_all_queues(&self) -> std::collections::BTreeMap<QueueName, Vec<DispatchedMessage>> {
        self.dispatcher.clear_all_queues()
    }

    /// See [`Dispatcher::clear_hidpp_queues`].
    pub fn clear_hidpp_queues(&self) -> std::collections::BTreeMap<QueueName, Vec<DispatchedMessage>> {
        self.dispatcher.clear_hidpp_queues()
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state() {
            ChannelState::Open => Ok(()),
            ChannelState::Closed => match self.correlator.released() {
                Some(err) if err != TransportError::Closed => Err(err.into()),
                _ => Err(Error::ChannelNotOpen),
            },
            _ => Err(Error::ChannelNotOpen),
        }
    }

    /// Converts a message into a report size the link supports. Links
    /// without short HID++ reports get them in long form.
    fn fit_to_link(&self, msg: HidppMessage) -> Result<HidppMessage, Error> {
        let Some((supports_short, supports_long)) = self.hidpp_support() else {
            return Ok(msg);
        };

        match msg.size() {
            ReportSize::Short if !supports_short && supports_long => {
                Ok(HidppMessage::new(ReportSize::Long, msg.header(), msg.payload())?)
            },
            ReportSize::Short if !supports_short => Err(TransportError::ReportNotSupported(SHORT_REPORT_ID).into()),
            ReportSize::Long if !supports_long => Err(TransportError::ReportNotSupported(LONG_REPORT_ID).into()),
            _ => Ok(msg),
        }
    }

    /// Writes a raw report to the transport.
    ///
    /// No waiter is registered, so a reply to a HID++2.0 request written this
    /// way ends up in [`QueueName::Malformed`] as answering no issued
    /// software ID.
    pub async fn write_report(&self, data: &[u8]) -> Result<usize, TransportError> {
        match tokio::time::timeout(self.config.send_timeout, self.transport.write_report(data)).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::Implementation(format!(
                "writing a report took longer than {:?}",
                self.config.send_timeout
            ))),
        }
    }

    async fn transmit(&self, msg: &HidppMessage) -> Result<(), Error> {
        trace!(channel = %self.id, report_hex = %msg, "HID++ TX");
        self.write_report(&msg.to_bytes()).await?;
        Ok(())
    }

    /// Registers a waiter for a request and writes it, without waiting for
    /// the reply.
    ///
    /// The kind of request is guessed from its header, see
    /// [`RequestKind::of`].
    pub async fn send_nowait(&self, msg: HidppMessage) -> Result<PendingReply, Error> {
        self.register_and_transmit(msg, RequestKind::of(&msg)).await
    }

    async fn register_and_transmit(&self, msg: HidppMessage, kind: RequestKind) -> Result<PendingReply, Error> {
        self.ensure_open()?;
        let msg = self.fit_to_link(msg)?;
        let pending = self.correlator.register(msg, kind)?;
        self.transmit(pending.request()).await?;
        Ok(pending)
    }

    /// Sends a request and waits for its reply.
    pub async fn send(&self, msg: HidppMessage, timeout: Duration) -> Result<HidppMessage, Error> {
        self.send_nowait(msg).await?.wait(Some(timeout)).await
    }

    /// Sends a HID++2.0 request, assigning it a software ID, and waits for the
    /// reply for the configured response timeout.
    pub async fn send_v20(&self, msg: HidppMessage) -> Result<HidppMessage, Error> {
        self.register_and_transmit(msg, RequestKind::Hidpp20)
            .await?
            .wait(Some(self.config.response_timeout))
            .await
    }

    /// Sends a HID++1.0 register access and waits for the reply for the
    /// configured response timeout.
    pub async fn send_v10(&self, msg: HidppMessage) -> Result<HidppMessage, Error> {
        self.register_and_transmit(msg, RequestKind::Hidpp10)
            .await?
            .wait(Some(self.config.response_timeout))
            .await
    }

    /// Sends a request, resending it on timeout up to the configured number
    /// of retries.
    ///
    /// Every attempt of a HID++2.0 request carries a fresh software ID; late
    /// replies to earlier attempts end up in [`QueueName::OrphanResponse`].
    pub async fn send_with_retry(&self, msg: HidppMessage) -> Result<HidppMessage, Error> {
        let kind = RequestKind::of(&msg);
        let mut attempt = 0;
        loop {
            let pending = self.register_and_transmit(msg, kind).await?;
            match pending.wait(Some(self.config.response_timeout)).await {
                Err(Error::Timeout { .. }) if attempt < self.config.retry_count => {
                    attempt += 1;
                    debug!(channel = %self.id, attempt, "request timed out, resending");
                },
                res => return res,
            }
        }
    }

    /// Calls a function of a HID++2.0 feature and decodes its response.
    ///
    /// Responses arriving in a short report are read as if the missing bytes
    /// of a long one were zero.
    pub async fn call(
        &self,
        device_index: u8,
        feature_index: u8,
        function: &'static FunctionDescriptor,
        request: &BitMessage,
    ) -> Result<BitMessage, Error> {
        let size = match function.request_size()? {
            ReportSize::Short if self.config.prefer_long_frames => ReportSize::Long,
            size => size,
        };

        let payload = request.serialize_padded(size.payload_len())?;
        let msg = v20::request(size, device_index, feature_index, U4::from_lo(function.index), &payload)?;
        let response = self.send_v20(msg).await?;

        let mut payload = response.payload().to_vec();
        if payload.len() < function.response.byte_len() {
            payload.resize(function.response.byte_len(), 0);
        }
        Ok(BitMessage::parse(function.response, &payload)?)
    }

    /// Reads a HID++1.0 register.
    pub async fn read_register(
        &self,
        device_index: u8,
        register: &'static RegisterDescriptor,
        params: &BitMessage,
    ) -> Result<BitMessage, Error> {
        let access = register.read.as_ref().ok_or(Error::UnsupportedAccess {
            register: register.name,
            access: "read",
        })?;
        self.access_register(device_index, register.address, access, params).await
    }

    /// Writes a HID++1.0 register.
    pub async fn write_register(
        &self,
        device_index: u8,
        register: &'static RegisterDescriptor,
        value: &BitMessage,
    ) -> Result<BitMessage, Error> {
        let access = register.write.as_ref().ok_or(Error::UnsupportedAccess {
            register: register.name,
            access: "written",
        })?;
        self.access_register(device_index, register.address, access, value).await
    }

    async fn access_register(
        &self,
        device_index: u8,
        address: u8,
        access: &'static RegisterAccess,
        params: &BitMessage,
    ) -> Result<BitMessage, Error> {
        let payload = params.serialize_padded(access.kind.request_size().payload_len())?;
        let msg = v10::request(access.kind, device_index, address, &payload)?;
        let reply = self.send_v10(msg).await?;
        access.decode(&reply)
    }
}

impl Drop for HidppChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for HidppChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidppChannel")
            .field("id", &self.id)
            .field("device_index", &self.device_index)
            .field("kind", &self.transport.kind())
            .field("state", &self.state())
            .field("protocol", &self.protocol())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::emulated::EmulatedTransport;

    #[tokio::test]
    async fn requests_need_an_open_channel() {
        let (transport, _peer) = EmulatedTransport::new(0x046d, 0xc548);
        let chan = HidppChannel::new("receiver", Arc::new(transport), ChannelConfig::default(), ReportMap::default());
        assert_eq!(chan.state(), ChannelState::Created);

        let msg = v10::request(v10::MessageType::GetRegister, 0xff, 0x02, &[]).unwrap();
        assert!(matches!(chan.send_v10(msg).await, Err(Error::ChannelNotOpen)));

        chan.open(LinkEnabler::ALL).await.unwrap();
        assert!(chan.is_open());
        chan.close();
        assert!(matches!(chan.send_v10(msg).await, Err(Error::ChannelNotOpen)));
    }

    #[test]
    fn closing_outside_a_runtime_joins_the_threads() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (transport, _peer) = EmulatedTransport::new(0x046d, 0xc548);
        let chan = HidppChannel::new("receiver", Arc::new(transport), ChannelConfig::default(), ReportMap::default());
        runtime.block_on(chan.open(LinkEnabler::ALL)).unwrap();

        chan.close();
        assert!(chan.threads.lock().is_none());
        assert!(chan.stopping.lock().is_none());
    }

    #[tokio::test]
    async fn closing_inside_a_runtime_joins_in_the_background() {
        let (transport, peer) = EmulatedTransport::new(0x046d, 0xc548);
        let chan = HidppChannel::open_transport("device", Arc::new(transport), ChannelConfig::default())
            .await
            .unwrap();

        chan.close();
        assert!(chan.stopping.lock().is_some());

        // Reopening waits for the old threads, then the new ones answer.
        chan.open(LinkEnabler::ALL).await.unwrap();
        assert!(chan.stopping.lock().is_none());

        let msg = v20::request(ReportSize::Short, 0x01, 0x00, U4::from_lo(1), &[0, 0, 0x5a]).unwrap();
        let pending = chan.send_nowait(msg).await.unwrap();
        let mut reply = peer.next_written(Duration::from_secs(1)).await.unwrap();
        reply[4..7].copy_from_slice(&[0x04, 0x02, 0x5a]);
        peer.inject(&reply).unwrap();
        assert_eq!(
            pending.wait(Some(Duration::from_secs(1))).await.unwrap().payload()[..3],
            [0x04, 0x02, 0x5a]
        );
    }

    #[tokio::test]
    async fn links_without_hidpp_are_refused() {
        let (transport, _peer) = EmulatedTransport::with_support(0x046d, 0xc548, (false, false));
        let chan = HidppChannel::new("hid-only", Arc::new(transport), ChannelConfig::default(), ReportMap::default());

        assert!(matches!(
            chan.open(LinkEnabler::ALL).await,
            Err(Error::Transport(TransportError::HidppNotSupported))
        ));
        chan.open(LinkEnabler::KEYBOARD | LinkEnabler::MOUSE).await.unwrap();
    }

    #[tokio::test]
    async fn short_requests_are_sent_long_on_long_only_links() {
        let (transport, peer) = EmulatedTransport::with_support(0x046d, 0xb023, (false, true));
        let chan = HidppChannel::open_transport("ble", Arc::new(transport), ChannelConfig::default())
            .await
            .unwrap();

        let msg = v20::request(ReportSize::Short, 0xff, 0x00, U4::from_lo(1), &[0, 0, 0x5a]).unwrap();
        let pending = chan.send_nowait(msg).await.unwrap();
        assert_eq!(pending.request().size(), ReportSize::Long);

        let written = peer.next_written(Duration::from_secs(1)).await.unwrap();
        assert_eq!(written.len(), 20);
        assert_eq!(written[..4], [0x11, 0xff, 0x00, 0x11]);
    }

    #[tokio::test]
    async fn protocol_switch_suspends_requests() {
        let (transport, _peer) = EmulatedTransport::new(0x046d, 0xc548);
        let chan = HidppChannel::open_transport("device", Arc::new(transport), ChannelConfig::default())
            .await
            .unwrap();

        chan.switch_protocol(ChannelProtocol::DfuHid);
        assert_eq!(chan.state(), ChannelState::Suspended);
        let msg = v20::request(ReportSize::Short, 0xff, 0x00, U4::from_lo(1), &[]).unwrap();
        assert!(matches!(chan.send_v20(msg).await, Err(Error::ChannelNotOpen)));

        chan.switch_protocol(ChannelProtocol::Hidpp);
        assert_eq!(chan.state(), ChannelState::Open);
    }
}
