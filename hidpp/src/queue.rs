//! The named message queues inbound traffic is sorted into.
//!
//! Every channel owns one [`HidMessageQueue`] per [`QueueName`]. The
//! dispatcher pushes whatever no request was waiting for; tests pull from the
//! queue they expect a message in, optionally filtering for a specific one.
//! Each queue keeps arrival order. Queues are bounded: once full, further
//! messages are dropped and the next reader gets [`QueueError::Overflow`].

use std::{collections::VecDeque, fmt, pin::pin, time::Duration};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{sync::Notify, time::Instant};
use tracing::warn;

use crate::{
    bitfield::{BitMessage, MessageError, Timestamp},
    protocol::HidppMessage,
    report::HidReportKind,
};

/// Names the queues of a channel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueueName {
    /// Events of the important features (root, feature set, names).
    Important,
    Common,
    Mouse,
    Keyboard,
    Touchpad,
    Gaming,
    Peripheral,

    /// Events no family queue claims.
    Event,

    /// Battery status events, whatever the family of the reporting feature.
    BatteryEvent,

    /// HID++2.0 error messages no request was waiting for.
    Error,

    /// HID++1.0 error messages no request was waiting for.
    ReceiverError,

    /// Unawaited replies to HID++1.0 register accesses.
    ReceiverResponse,

    /// HID++1.0 notifications.
    ReceiverEvent,

    /// Device connection and disconnection notifications of a receiver.
    ReceiverConnectionEvent,

    /// Plain HID input reports (keyboard, mouse, consumer control...).
    Hid,

    /// HID++2.0 responses whose request was already abandoned.
    OrphanResponse,

    /// Frames that could not be parsed or decoded.
    Malformed,
}

impl QueueName {
    /// All queues, in the order of [`Self::index`].
    pub const ALL: [QueueName; 17] = [
        Self::Important,
        Self::Common,
        Self::Mouse,
        Self::Keyboard,
        Self::Touchpad,
        Self::Gaming,
        Self::Peripheral,
        Self::Event,
        Self::BatteryEvent,
        Self::Error,
        Self::ReceiverError,
        Self::ReceiverResponse,
        Self::ReceiverEvent,
        Self::ReceiverConnectionEvent,
        Self::Hid,
        Self::OrphanResponse,
        Self::Malformed,
    ];

    /// The position of the queue in [`Self::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether the queue holds HID++ traffic rather than plain HID reports.
    pub fn is_hidpp(self) -> bool {
        self != Self::Hid
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Important => "important",
            Self::Common => "common",
            Self::Mouse => "mouse",
            Self::Keyboard => "keyboard",
            Self::Touchpad => "touchpad",
            Self::Gaming => "gaming",
            Self::Peripheral => "peripheral",
            Self::Event => "event",
            Self::BatteryEvent => "battery_event",
            Self::Error => "error",
            Self::ReceiverError => "receiver_error",
            Self::ReceiverResponse => "receiver_response",
            Self::ReceiverEvent => "receiver_event",
            Self::ReceiverConnectionEvent => "receiver_connection_event",
            Self::Hid => "hid",
            Self::OrphanResponse => "orphan_response",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents an error reported by a [`HidMessageQueue`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueueError {
    /// No (matching) message arrived in time.
    #[error("queue `{queue}` held no matching message within {timeout:?}")]
    Empty { queue: QueueName, timeout: Duration },

    /// The queue hit its capacity and dropped messages since the last read.
    #[error("queue `{0}` overflowed and dropped messages")]
    Overflow(QueueName),
}

/// A HID++ frame as the dispatcher delivered it.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedMessage {
    pub message: HidppMessage,

    /// When the transport received the frame.
    pub timestamp: Timestamp,

    /// The ID and version of the feature the frame belongs to, if its feature
    /// index was mapped at the time of arrival.
    pub feature: Option<(u16, u8)>,

    /// The payload decoded with the schema of the event or function it
    /// belongs to, if known.
    pub decoded: Option<BitMessage>,
}

/// A plain HID input report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HidReport {
    /// The raw report, including its report ID.
    pub data: Vec<u8>,

    pub timestamp: Timestamp,

    /// The interface the report ID is assigned to, if it is a known one.
    pub kind: Option<HidReportKind>,
}

impl HidReport {
    pub fn report_id(&self) -> Option<u8> {
        self.data.first().copied()
    }
}

/// A frame the dispatcher could not make sense of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedFrame {
    pub data: Vec<u8>,
    pub timestamp: Timestamp,
    pub error: MessageError,
}

/// Anything the dispatcher may put into a queue.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchedMessage {
    Hidpp(ReceivedMessage),
    Hid(HidReport),
    Malformed(MalformedFrame),
}

impl DispatchedMessage {
    /// When the transport received the underlying frame.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Hidpp(msg) => msg.timestamp,
            Self::Hid(report) => report.timestamp,
            Self::Malformed(frame) => frame.timestamp,
        }
    }

    pub fn as_hidpp(&self) -> Option<&ReceivedMessage> {
        match self {
            Self::Hidpp(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn into_hidpp(self) -> Option<ReceivedMessage> {
        match self {
            Self::Hidpp(msg) => Some(msg),
            _ => None,
        }
    }
}

struct QueueState {
    items: VecDeque<DispatchedMessage>,
    overflowed: bool,
}

/// A bounded FIFO queue of dispatched messages that readers can wait on.
pub struct HidMessageQueue {
    name: QueueName,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl HidMessageQueue {
    pub fn new(name: QueueName, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                overflowed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Appends a message, waking all waiting readers.
    ///
    /// Returns `false` if the queue is full and the message was dropped.
    pub fn push(&self, msg: DispatchedMessage) -> bool {
        {
            let mut state = self.state.lock();
            if state.items.len() >= self.capacity {
                if !state.overflowed {
                    warn!(queue = %self.name, capacity = self.capacity, "queue overflow, dropping messages");
                }
                state.overflowed = true;
                return false;
            }
            state.items.push_back(msg);
        }

        self.notify.notify_waiters();
        true
    }

    fn take(&self, filter: &dyn Fn(&DispatchedMessage) -> bool) -> Result<Option<DispatchedMessage>, QueueError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.overflowed) {
            return Err(QueueError::Overflow(self.name));
        }

        let position = state.items.iter().position(filter);
        Ok(position.and_then(|position| state.items.remove(position)))
    }

    /// Takes the oldest message without waiting.
    pub fn try_get(&self) -> Result<Option<DispatchedMessage>, QueueError> {
        self.take(&|_| true)
    }

    /// Takes the oldest message, waiting for one to arrive.
    ///
    /// A timeout of [`None`] waits forever, a zero timeout only polls.
    pub async fn get(&self, timeout: Option<Duration>) -> Result<DispatchedMessage, QueueError> {
        self.get_filtered(timeout, |_| true).await
    }

    /// Takes the oldest message matching `filter`, waiting for one to arrive.
    ///
    /// Messages not matching the filter stay in the queue in their order.
    pub async fn get_filtered(
        &self,
        timeout: Option<Duration>,
        filter: impl Fn(&DispatchedMessage) -> bool,
    ) -> Result<DispatchedMessage, QueueError> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        loop {
            // Registering before looking at the queue makes sure a push
            // between the check and the wait still wakes us.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if let Some(msg) = self.take(&filter)? {
                return Ok(msg);
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(QueueError::Empty {
                            queue: self.name,
                            timeout: timeout.unwrap_or_default(),
                        });
                    }
                },
            }
        }
    }

    /// Removes and returns all messages, resetting the overflow flag.
    pub fn clear(&self) -> Vec<DispatchedMessage> {
        let mut state = self.state.lock();
        state.overflowed = false;
        state.items.drain(..).collect()
    }
}

impl fmt::Debug for HidMessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidMessageQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn report(id: u8) -> DispatchedMessage {
        DispatchedMessage::Hid(HidReport {
            data: vec![id, 0x00],
            timestamp: Timestamp::now(),
            kind: None,
        })
    }

    fn id_of(msg: &DispatchedMessage) -> u8 {
        match msg {
            DispatchedMessage::Hid(report) => report.data[0],
            _ => panic!("expected a HID report"),
        }
    }

    #[test]
    fn queue_names_index_all() {
        for (i, name) in QueueName::ALL.iter().enumerate() {
            assert_eq!(name.index(), i);
        }
        assert!(!QueueName::Hid.is_hidpp());
        assert_eq!(QueueName::BatteryEvent.to_string(), "battery_event");
    }

    #[tokio::test]
    async fn filtered_get_keeps_the_order_of_the_rest() {
        let queue = HidMessageQueue::new(QueueName::Hid, 8);
        for id in 1..=4 {
            queue.push(report(id));
        }

        let msg = queue.get_filtered(Some(Duration::ZERO), |msg| id_of(msg) % 2 == 0).await.unwrap();
        assert_eq!(id_of(&msg), 2);

        let rest: Vec<u8> = queue.clear().iter().map(id_of).collect();
        assert_eq!(rest, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn zero_timeout_polls() {
        let queue = HidMessageQueue::new(QueueName::Event, 8);
        assert_eq!(
            queue.get(Some(Duration::ZERO)).await.unwrap_err(),
            QueueError::Empty {
                queue: QueueName::Event,
                timeout: Duration::ZERO
            }
        );
    }

    #[tokio::test]
    async fn overflow_is_reported_once() {
        let queue = HidMessageQueue::new(QueueName::Hid, 2);
        assert!(queue.push(report(1)));
        assert!(queue.push(report(2)));
        assert!(!queue.push(report(3)));

        assert_eq!(queue.try_get().unwrap_err(), QueueError::Overflow(QueueName::Hid));
        assert_eq!(id_of(&queue.try_get().unwrap().unwrap()), 1);
    }

    #[tokio::test]
    async fn waiting_readers_are_woken() {
        let queue = Arc::new(HidMessageQueue::new(QueueName::Hid, 8));

        let reader = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.get(None).await }
        });
        tokio::task::yield_now().await;
        queue.push(report(7));

        assert_eq!(id_of(&reader.await.unwrap().unwrap()), 7);
    }
}
