use serde::{de, ser};
use std::fmt::{self, Display};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Custom message raised by a `Serialize`/`Deserialize` implementation.
    Message(String),
    /// Input ended before the value was complete.
    Eof,
    /// A length field points past the end of the input.
    Syntax,
    /// A variable length value was not preceded by its length field.
    ExpectedLength,
    /// Trailing bytes remain after the value was decoded.
    Incomplete,
    /// Unknown field value tag.
    InvalidVariant(u8),
}

impl ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Message(msg) => f.write_str(msg),
            Error::Eof => f.write_str("unexpected end of input"),
            Error::Syntax => f.write_str("length field exceeds remaining input"),
            Error::ExpectedLength => f.write_str("missing length field before variable length value"),
            Error::Incomplete => f.write_str("trailing bytes after decoded value"),
            Error::InvalidVariant(tag) => write!(f, "invalid field value tag: {:#04x}", tag),
        }
    }
}

impl std::error::Error for Error {}
