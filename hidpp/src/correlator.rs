//! Matches replies to the requests waiting for them.
//!
//! Every request sent through a channel registers a one-shot waiter keyed by
//! the header the reply will carry. HID++2.0 requests get a software ID
//! assigned first, rotating through `1..=15` and skipping IDs still held by
//! an outstanding request with the same header, so concurrent requests of
//! different callers never share a key. HID++1.0 register accesses carry no
//! software ID; a second access with the same header is refused while the
//! first one waits.
//!
//! Error replies echo the header of the failed request, so they complete the
//! same waiter as a regular response would.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use futures::channel::oneshot;
use parking_lot::Mutex;
use tracing::trace;

use crate::{
    error::Error,
    nibble::{self, U4},
    protocol::{HidppMessage, HidppMessageHeader, v10, v20},
    transport::TransportError,
};

/// How a request is matched to its reply.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RequestKind {
    /// A HID++2.0 request, matched by its software ID.
    Hidpp20,

    /// A HID++1.0 register access, matched by its sub ID and address.
    Hidpp10,
}

impl RequestKind {
    /// Guesses the kind from the third header byte: register access sub IDs
    /// are HID++1.0, everything else is a HID++2.0 feature index.
    pub fn of(msg: &HidppMessage) -> Self {
        match v10::MessageType::try_from(msg.header().feature_index) {
            Ok(kind) if kind.is_register_access() => Self::Hidpp10,
            _ => Self::Hidpp20,
        }
    }
}

/// What a waiter gets handed by the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Response(HidppMessage),
    Hidpp10Error(v10::ErrorCode),
    Hidpp20Error(v20::ErrorCode),

    /// The link failed before a reply arrived.
    LinkLost(TransportError),
}

impl Reply {
    fn into_result(self, request: HidppMessage) -> Result<HidppMessage, Error> {
        match self {
            Self::Response(msg) => Ok(msg),
            Self::Hidpp10Error(code) => Err(Error::Hidpp10 {
                code,
                request: Some(request),
            }),
            Self::Hidpp20Error(code) => Err(Error::Hidpp20 {
                code,
                request: Some(request),
            }),
            Self::LinkLost(err) => Err(Error::Transport(err)),
        }
    }
}

struct Waiter {
    ticket: u64,
    sender: oneshot::Sender<Reply>,
}

struct State {
    waiters: HashMap<HidppMessageHeader, Waiter>,

    /// The software IDs handed out so far, per request header with software
    /// ID zero, as a bitmask.
    issued: HashMap<HidppMessageHeader, u16>,
    next_software_id: u8,
    next_ticket: u64,

    /// Set once the link failed, until the channel is opened again.
    released: Option<TransportError>,
}

/// The waiters of one channel.
pub struct Correlator {
    state: Mutex<State>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                waiters: HashMap::new(),
                issued: HashMap::new(),
                next_software_id: 1,
                next_ticket: 0,
                released: None,
            }),
        }
    }

    /// Registers a waiter for the reply to `request`.
    ///
    /// For HID++2.0 requests, the software ID of the returned
    /// [`PendingReply::request`] is the one that has to be transmitted.
    pub fn register(self: &Arc<Self>, request: HidppMessage, kind: RequestKind) -> Result<PendingReply, Error> {
        let mut state = self.state.lock();
        if let Some(err) = &state.released {
            return Err(Error::Transport(err.clone()));
        }

        let mut request = request;
        let key = match kind {
            RequestKind::Hidpp20 => {
                let header = request.header();
                let function = header.function_id();
                let start = state.next_software_id;

                let software_id = (0..15)
                    .map(|offset| (start - 1 + offset) % 15 + 1)
                    .find(|candidate| {
                        !state.waiters.contains_key(&HidppMessageHeader {
                            function_and_sw_id: nibble::combine(function, U4::from_lo(*candidate)),
                            ..header
                        })
                    })
                    .ok_or(Error::NoFreeSoftwareId(header))?;
                state.next_software_id = software_id % 15 + 1;
                *state.issued.entry(software_id_cleared(header)).or_default() |= 1 << software_id;

                let key = HidppMessageHeader {
                    function_and_sw_id: nibble::combine(function, U4::from_lo(software_id)),
                    ..header
                };
                request.set_header(key);
                key
            },
            RequestKind::Hidpp10 => {
                let key = request.header();
                if state.waiters.contains_key(&key) {
                    return Err(Error::RequestInFlight(key));
                }
                key
            },
        };

        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let (sender, receiver) = oneshot::channel();
        state.waiters.insert(key, Waiter { ticket, sender });
        trace!(key = ?key, ticket, "waiter registered");

        Ok(PendingReply {
            correlator: Arc::clone(self),
            key,
            ticket,
            request,
            receiver,
            settled: false,
        })
    }

    /// Hands a reply to the waiter registered for `key`.
    ///
    /// Returns the reply back if nobody is waiting for it.
    pub fn complete(&self, key: HidppMessageHeader, reply: Reply) -> Result<(), Reply> {
        let Some(waiter) = self.state.lock().waiters.remove(&key) else {
            return Err(reply);
        };
        trace!(key = ?key, ticket = waiter.ticket, "waiter completed");
        waiter.sender.send(reply)
    }

    /// Whether a waiter is registered for `key`.
    pub fn is_waiting(&self, key: &HidppMessageHeader) -> bool {
        self.state.lock().waiters.contains_key(key)
    }

    /// Whether a HID++2.0 request with the header of `reply` was ever sent
    /// with its software ID. Replies failing this check answer nobody.
    pub fn has_issued(&self, reply: &HidppMessageHeader) -> bool {
        let software_id = reply.software_id().to_lo();
        self.state
            .lock()
            .issued
            .get(&software_id_cleared(*reply))
            .is_some_and(|issued| issued & (1 << software_id) != 0)
    }

    /// The number of registered waiters.
    pub fn outstanding(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Releases every waiter with `err` and refuses new ones until
    /// [`Self::reset`] is called.
    ///
    /// Returns the number of released waiters.
    pub fn release_all(&self, err: TransportError) -> usize {
        let waiters: Vec<Waiter> = {
            let mut state = self.state.lock();
            state.released = Some(err.clone());
            state.waiters.drain().map(|(_, waiter)| waiter).collect()
        };

        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.sender.send(Reply::LinkLost(err.clone()));
        }
        count
    }

    /// The error waiters were released with, if new ones are refused.
    pub fn released(&self) -> Option<TransportError> {
        self.state.lock().released.clone()
    }

    /// Accepts new waiters again after [`Self::release_all`].
    pub fn reset(&self) {
        self.state.lock().released = None;
    }

    /// Removes a waiter if it is still registered under its ticket.
    fn deregister(&self, key: &HidppMessageHeader, ticket: u64) -> bool {
        let mut state = self.state.lock();
        match state.waiters.get(key) {
            Some(waiter) if waiter.ticket == ticket => {
                state.waiters.remove(key);
                true
            },
            _ => false,
        }
    }
}

fn software_id_cleared(header: HidppMessageHeader) -> HidppMessageHeader {
    HidppMessageHeader {
        function_and_sw_id: nibble::combine(header.function_id(), U4::from_lo(0)),
        ..header
    }
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Correlator")
            .field("outstanding", &state.waiters.len())
            .field("next_software_id", &state.next_software_id)
            .field("released", &state.released)
            .finish()
    }
}

/// A request that was registered and is waiting for its reply.
///
/// Dropping it deregisters the waiter; a reply arriving afterwards ends up in
/// the orphan queue.
pub struct PendingReply {
    correlator: Arc<Correlator>,
    key: HidppMessageHeader,
    ticket: u64,
    request: HidppMessage,
    receiver: oneshot::Receiver<Reply>,
    settled: bool,
}

impl PendingReply {
    /// The request as it has to be transmitted.
    pub fn request(&self) -> &HidppMessage {
        &self.request
    }

    /// The header the reply is expected to carry.
    pub fn key(&self) -> HidppMessageHeader {
        self.key
    }

    /// A handle other tasks can use to cancel the wait.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            correlator: Arc::clone(&self.correlator),
            key: self.key,
            ticket: self.ticket,
        }
    }

    /// Waits for the reply.
    ///
    /// A timeout of [`None`] waits until a reply arrives or the link fails.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<HidppMessage, Error> {
        let reply = match timeout {
            None => (&mut self.receiver).await.ok(),
            Some(timeout) => match tokio::time::timeout(timeout, &mut self.receiver).await {
                Ok(reply) => reply.ok(),
                Err(_) => {
                    if self.correlator.deregister(&self.key, self.ticket) {
                        self.settled = true;
                        return Err(Error::Timeout {
                            request: self.request,
                            timeout,
                        });
                    }

                    // The reply was handed over between the deadline and the
                    // deregistration.
                    self.receiver.try_recv().ok().flatten()
                },
            },
        };

        self.settled = true;
        match reply {
            Some(reply) => reply.into_result(self.request),
            None => Err(Error::Cancelled(self.request)),
        }
    }

    /// Stops waiting.
    ///
    /// Returns [`None`] if the waiter was still pending. If the reply was
    /// already delivered, it is returned instead.
    pub fn cancel(mut self) -> Option<Result<HidppMessage, Error>> {
        self.settled = true;
        if self.correlator.deregister(&self.key, self.ticket) {
            return None;
        }
        let reply = self.receiver.try_recv().ok().flatten()?;
        Some(reply.into_result(self.request))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.settled {
            self.correlator.deregister(&self.key, self.ticket);
        }
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("key", &self.key)
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// Cancels a [`PendingReply`] from another task.
#[derive(Clone)]
pub struct Canceller {
    correlator: Arc<Correlator>,
    key: HidppMessageHeader,
    ticket: u64,
}

impl Canceller {
    /// Removes the waiter. The waiting task fails with
    /// [`Error::Cancelled`].
    ///
    /// Returns `false` if the reply was delivered first.
    pub fn cancel(&self) -> bool {
        self.correlator.deregister(&self.key, self.ticket)
    }
}
