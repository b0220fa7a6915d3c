use std::fmt;

use super::MethodHeader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing frame-end octet or unknown frame type.
    Corrupted,
    /// Frame size announced by the peer exceeds the negotiated maximum.
    TooLarge { size: usize, max: u32 },
    UnknownMethod(MethodHeader),
    /// Frame arrived in a position the command grammar does not allow.
    UnexpectedFrame(String),
    Codec(String),
}

impl From<amqp_wire::Error> for Error {
    fn from(err: amqp_wire::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Corrupted => f.write_str("corrupted frame"),
            Error::TooLarge { size, max } => {
                write!(f, "frame size {} exceeds frame max {}", size, max)
            }
            Error::UnknownMethod(header) => write!(f, "unknown method {}", header),
            Error::UnexpectedFrame(msg) => write!(f, "unexpected frame: {}", msg),
            Error::Codec(msg) => write!(f, "codec error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
