mod channel_id_repo;
mod error;
mod reader_handler;
mod transport;
mod writer;

pub(crate) use channel_id_repo::*;
pub(crate) use error::*;
pub(crate) use reader_handler::*;
pub(crate) use transport::FrameReader;
pub use transport::{AddressFamily, Endpoint, FrameTransport, TransportOptions};
pub(crate) use writer::*;
