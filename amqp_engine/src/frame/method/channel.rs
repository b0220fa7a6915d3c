//! Channel class (20).
use std::fmt;

use amqp_wire::types::{
    AmqpClassId, AmqpMethodId, AmqpReplyCode, AmqpReplyText, Boolean, LongStr, ShortStr,
};
use serde::{Deserialize, Serialize};

use super::truncated_short_str;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct OpenChannel {
    pub out_of_band: ShortStr,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct OpenChannelOk {
    pub channel_id: LongStr,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct Flow {
    pub active: Boolean,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct FlowOk {
    pub active: Boolean,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CloseChannel {
    pub reply_code: AmqpReplyCode,
    pub reply_text: AmqpReplyText,
    pub class_id: AmqpClassId,
    pub method_id: AmqpMethodId,
}

impl CloseChannel {
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

impl fmt::Display for CloseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel close: code = {}, text = '{}', method = {}.{}",
            self.reply_code, self.reply_text, self.class_id, self.method_id
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CloseChannelOk;
