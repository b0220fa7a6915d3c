pub use self::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub mod channel;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod events;
pub mod shutdown;
