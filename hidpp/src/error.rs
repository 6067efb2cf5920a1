//! The error kinds surfaced to callers of the harness.
//!
//! Every layer has its own error type; [`Error`] aggregates them for the
//! operations spanning several layers (sending a request, negotiating a
//! feature index, switching channels).

use std::time::Duration;

use thiserror::Error;

use crate::{
    bitfield::MessageError,
    feature::FeatureError,
    manager::ChannelId,
    protocol::{HidppMessage, HidppMessageHeader, v10, v20},
    queue::QueueError,
    transport::TransportError,
};

/// Represents an error caused by bytes that do not form a valid message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The byte count is not the one the frame or schema declares.
    #[error("expected exactly {expected} bytes but got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The frame ends before all declared fields could be read.
    #[error("frame is truncated: expected at least {expected} bytes but got {actual}")]
    ShortFrame { expected: usize, actual: usize },

    /// The first byte is not one of the HID++ report IDs.
    #[error("report ID {0:#04x} does not belong to a HID++ report")]
    UnknownReportId(u8),

    /// No feature is known at this index of the device's feature table.
    #[error("device {device_index:#04x} has no known feature at index {feature_index:#04x}")]
    UnknownFeatureIndex { device_index: u8, feature_index: u8 },

    /// The feature version declares no function with this index.
    #[error("feature {feature_id:#06x} v{version} declares no function {function}")]
    UnknownFunctionIndex {
        feature_id: u16,
        version: u8,
        function: u8,
    },

    /// A response carries a software ID no request with its header was ever
    /// sent with.
    #[error("software ID {0} was never issued for a request with this header")]
    UnknownSoftwareId(u8),
}

/// Indicates that a message field value violated one of its validators on
/// construction or parse.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("field `{field}` of `{schema}`: {reason}")]
pub struct ConstraintViolation {
    /// The name of the message schema.
    pub schema: &'static str,

    /// The name of the offending field, as it was requested.
    pub field: String,

    /// A human-readable description of the violated constraint.
    pub reason: String,
}

/// The harness-wide error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying link failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No reply arrived before the deadline.
    #[error("no reply to {request:02x?} within {timeout:?}")]
    Timeout {
        request: HidppMessage,
        timeout: Duration,
    },

    /// Received bytes did not form a valid message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The device answered with a HID++1.0 error message.
    #[error("the device answered with HID++1.0 error {code:?}")]
    Hidpp10 {
        code: v10::ErrorCode,
        request: Option<HidppMessage>,
    },

    /// The device answered with a HID++2.0 error message.
    #[error("the device answered with HID++2.0 error {code:?}")]
    Hidpp20 {
        code: v20::ErrorCode,
        request: Option<HidppMessage>,
    },

    /// A message field value violated its validator.
    #[error(transparent)]
    ConstraintViolation(#[from] ConstraintViolation),

    /// A feature could not be resolved or instantiated.
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// A dispatcher queue could not deliver a message.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The wait for a reply was cancelled by another task.
    #[error("the wait for a reply to {0} was cancelled")]
    Cancelled(HidppMessage),

    /// The register does not support the requested access direction.
    #[error("register `{register}` cannot be {access}")]
    UnsupportedAccess {
        register: &'static str,
        access: &'static str,
    },

    /// The channel has not been opened or was closed.
    #[error("the channel is not open")]
    ChannelNotOpen,

    /// All software IDs are held by outstanding requests with the same header.
    #[error("no software ID is free for requests with header {0:02x?}")]
    NoFreeSoftwareId(HidppMessageHeader),

    /// A HID++1.0 request with the same header is still waiting for its reply.
    #[error("a request with header {0:02x?} is already waiting for a reply")]
    RequestInFlight(HidppMessageHeader),

    /// The channel manager does not know this channel.
    #[error("channel {0} is not managed")]
    UnknownChannel(ChannelId),

    /// No channel has been selected as the current one.
    #[error("no channel is selected")]
    NoCurrentChannel,

    /// The device returned a response the harness could not interpret.
    #[error("the device returned an unsupported response")]
    UnsupportedResponse,
}

impl From<MessageError> for Error {
    fn from(value: MessageError) -> Self {
        match value {
            MessageError::Protocol(err) => Self::Protocol(err),
            MessageError::Constraint(err) => Self::ConstraintViolation(err),
        }
    }
}

impl Error {
    /// Returns the HID++2.0 error code if this error was caused by an error
    /// message of the device.
    pub fn hidpp20_code(&self) -> Option<v20::ErrorCode> {
        match self {
            Self::Hidpp20 { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the HID++1.0 error code if this error was caused by an error
    /// message of the receiver or device.
    pub fn hidpp10_code(&self) -> Option<v10::ErrorCode> {
        match self {
            Self::Hidpp10 { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the error was caused by a failing link rather than by the
    /// device under test. Test runners report these as environment failures.
    pub fn is_environment_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ChannelNotOpen)
    }
}
