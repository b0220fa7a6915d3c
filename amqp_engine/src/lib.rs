//! AMQP 0-9-1 client protocol engine.
//!
//! The engine turns a negotiated TCP connection into channels: it frames and
//! reassembles commands, pairs synchronous requests with their replies,
//! gates publishing on broker flow control, tracks publisher confirms and
//! runs consumer callbacks on a per-channel dispatch task.
//!
//! This library is based on the async tokio runtime.
pub mod api;
pub mod frame;
pub mod net;

#[cfg(test)]
mod test_utils;

// public API
pub use api::{
    channel::{Channel, ChannelState},
    connection::{Connection, ConnectionOptions, TuneParameters},
    consumer::{AsyncConsumer, DefaultConsumer},
    error::Error,
    shutdown::{ShutdownInitiator, ShutdownReason},
    Result,
};
pub use frame::{BasicProperties, Deliver, GetOk, Return};
pub use net::{Endpoint, FrameTransport, TransportOptions};
