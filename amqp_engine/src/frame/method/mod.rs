use amqp_wire::types::ShortStr;
use serde::{Deserialize, Serialize};

// bits packed into one octet, in field declaration order
macro_rules! impl_bit_flags {
    ($name:ident { $($getter:ident, $setter:ident = $mask:expr);+ $(;)? }) => {
        impl $name {
            $(
                pub fn $getter(&self) -> bool {
                    self.bits & $mask != 0
                }

                pub fn $setter(&mut self, value: bool) -> &mut Self {
                    if value {
                        self.bits |= $mask;
                    } else {
                        self.bits &= !$mask;
                    }
                    self
                }
            )+
        }
    };
}

mod basic;
mod channel;
mod confirm;
mod connection;
mod exchange;
mod queue;
mod tx;

pub use basic::*;
pub use channel::*;
pub use confirm::*;
pub use connection::*;
pub use exchange::*;
pub use queue::*;
pub use tx::*;

/// Class id and method id, the first four octets of a method frame payload.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
pub struct MethodHeader {
    class_id: u16,
    method_id: u16,
}

impl MethodHeader {
    pub const fn new(class_id: u16, method_id: u16) -> Self {
        Self {
            class_id,
            method_id,
        }
    }

    pub fn class_id(&self) -> u16 {
        self.class_id
    }

    pub fn method_id(&self) -> u16 {
        self.method_id
    }
}

impl std::fmt::Display for MethodHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.class_id, self.method_id)
    }
}

/// Reply texts are informational, so instead of failing, text longer than a
/// short string can hold is cut at the last char boundary that fits.
pub fn truncated_short_str(text: &str) -> ShortStr {
    let mut end = text.len().min(u8::MAX as usize);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    match ShortStr::try_from(&text[..end]) {
        Ok(s) => s,
        Err(_) => ShortStr::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::truncated_short_str;

    #[test]
    fn test_truncated_short_str() {
        assert_eq!("ok", truncated_short_str("ok").as_str());
        assert_eq!(255, truncated_short_str(&"x".repeat(300)).len());
        // 'é' is two bytes, 128 of them do not fit
        let text = "é".repeat(128);
        assert_eq!(254, truncated_short_str(&text).len());
    }
}
