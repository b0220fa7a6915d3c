//! Connection class (10). Only `close`, `close-ok`, `blocked` and `unblocked`
//! are handled by the engine; the negotiation methods are provided for the
//! bootstrap code that opens the transport.
use std::fmt;

use amqp_wire::types::{
    AmqpClassId, AmqpMethodId, AmqpPath, AmqpPeerProperties, AmqpReplyCode, AmqpReplyText,
    Boolean, LongStr, LongUint, Octect, ShortStr, ShortUint,
};
use serde::{Deserialize, Serialize};

use super::truncated_short_str;

#[derive(Debug, Serialize, Deserialize)]
pub struct Start {
    pub version_major: Octect,
    pub version_minor: Octect,
    pub server_properties: AmqpPeerProperties,
    pub mechanisms: LongStr,
    pub locales: LongStr,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartOk {
    pub client_properties: AmqpPeerProperties,
    pub mechanism: ShortStr,
    pub response: LongStr,
    pub locale: ShortStr,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Secure {
    pub challenge: LongStr,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecureOk {
    pub response: LongStr,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy)]
pub struct Tune {
    pub channel_max: ShortUint,
    pub frame_max: LongUint,
    pub heartbeat: ShortUint,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy)]
pub struct TuneOk {
    pub channel_max: ShortUint,
    pub frame_max: LongUint,
    pub heartbeat: ShortUint,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Open {
    pub virtual_host: AmqpPath,
    pub capabilities: ShortStr,
    pub insist: Boolean,
}

impl Open {
    pub fn new(virtual_host: AmqpPath) -> Self {
        Self {
            virtual_host,
            capabilities: ShortStr::default(),
            insist: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct OpenOk {
    pub known_hosts: ShortStr,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Close {
    pub reply_code: AmqpReplyCode,
    pub reply_text: AmqpReplyText,
    pub class_id: AmqpClassId,
    pub method_id: AmqpMethodId,
}

impl Close {
    pub fn new(
        reply_code: AmqpReplyCode,
        reply_text: &str,
        class_id: AmqpClassId,
        method_id: AmqpMethodId,
    ) -> Self {
        Self {
            reply_code,
            reply_text: truncated_short_str(reply_text),
            class_id,
            method_id,
        }
    }
}

impl fmt::Display for Close {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connection close: code = {}, text = '{}', method = {}.{}",
            self.reply_code, self.reply_text, self.class_id, self.method_id
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CloseOk;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Blocked {
    pub reason: ShortStr,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Unblocked;
