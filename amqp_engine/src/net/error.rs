use std::{fmt, io};

use crate::frame;

#[derive(Debug)]
pub(crate) enum Error {
    NetworkIoError(String),
    /// What timed out: connect, read, writability or write.
    Timeout(&'static str),
    Framing(frame::Error),
    PeerShutdown,
    /// Writes after the transport was closed.
    Closed,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::NetworkIoError(err.to_string())
    }
}

impl From<frame::Error> for Error {
    fn from(err: frame::Error) -> Self {
        Error::Framing(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NetworkIoError(msg) => write!(f, "{}", msg),
            Error::Timeout(what) => write!(f, "{} timed out", what),
            Error::Framing(err) => write!(f, "{}", err),
            Error::PeerShutdown => f.write_str("peer shutdown"),
            Error::Closed => f.write_str("transport already closed"),
        }
    }
}

impl std::error::Error for Error {}
