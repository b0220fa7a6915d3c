//! AMQP 0-9-1 wire encoding as a [serde](https://serde.rs) data format.
//!
//! Integers are big-endian, strings and byte arrays are written raw after an
//! explicit length field of the containing type (see [`types::ShortStr`]),
//! field tables and field arrays carry a `u32` byte-length prefix.
mod de;
mod error;
mod ser;

pub mod constants;
pub mod types;

pub use de::{from_bytes, Deserializer};
pub use error::{Error, Result};
pub use ser::{to_buffer, to_bytes, Serializer};
