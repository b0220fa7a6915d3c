//! Error type can be returned by the APIs.

use std::fmt;

use tokio::sync::{mpsc::error::SendError, oneshot::error::RecvError};

use super::shutdown::ShutdownReason;
use crate::{frame, net};

/// A list of errors can be returned by the APIs.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Resolving or connecting to the broker failed.
    ConnectFailure(String),
    /// Malformed or unexpected input from the peer. The connection is torn down.
    ProtocolViolation(String),
    /// The channel or connection is closing or closed.
    AlreadyClosed(ShutdownReason),
    /// No reply arrived within the continuation timeout. The channel stays usable.
    ContinuationTimeout,
    /// Nacks were received or acks did not arrive in time. The channel was closed.
    ConfirmFailure(String),
    /// The call is not valid in the current state or with these arguments.
    InvalidOperation(String),
    /// A reply arrived that does not answer the pending request.
    UnexpectedReply(String),
    /// Error occurs in network layer.
    NetworkError(String),
    /// Error in sending or receiving messages via internal communication channel.
    InternalChannelError(String),
}

impl From<net::Error> for Error {
    fn from(err: net::Error) -> Self {
        match err {
            net::Error::Framing(err) => Self::ProtocolViolation(err.to_string()),
            other => Self::NetworkError(other.to_string()),
        }
    }
}

impl From<frame::Error> for Error {
    fn from(err: frame::Error) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(err: SendError<T>) -> Self {
        Self::InternalChannelError(err.to_string())
    }
}

impl From<RecvError> for Error {
    fn from(err: RecvError) -> Self {
        Self::InternalChannelError(err.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ConnectFailure(msg) => write!(f, "AMQP connect failure: {}", msg),
            Error::ProtocolViolation(msg) => write!(f, "AMQP protocol violation: {}", msg),
            Error::AlreadyClosed(reason) => write!(f, "AMQP already closed: {}", reason),
            Error::ContinuationTimeout => f.write_str("AMQP continuation timed out"),
            Error::ConfirmFailure(msg) => write!(f, "AMQP confirm failure: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "AMQP invalid operation: {}", msg),
            Error::UnexpectedReply(msg) => write!(f, "AMQP unexpected reply: {}", msg),
            Error::NetworkError(msg) => write!(f, "AMQP network error: {}", msg),
            Error::InternalChannelError(msg) => {
                write!(f, "internal communication error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}
