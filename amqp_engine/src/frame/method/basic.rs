//! Basic class (60). `publish`, `return`, `deliver` and `get-ok` are
//! followed by a content header and zero or more body frames.
use std::fmt;

use amqp_wire::types::{
    AmqpConsumerTag, AmqpDeliveryTag, AmqpExchangeName, AmqpMessageCount, AmqpQueueName,
    AmqpReplyCode, AmqpReplyText, AmqpTable, Boolean, LongUint, Octect, ShortStr, ShortUint,
};
use serde::{Deserialize, Serialize};

mod bit_flag {
    pub mod consume {
        use amqp_wire::types::Octect;
        pub const NO_LOCAL: Octect = 0b0000_0001;
        pub const NO_ACK: Octect = 0b0000_0010;
        pub const EXCLUSIVE: Octect = 0b0000_0100;
        pub const NO_WAIT: Octect = 0b0000_1000;
    }
    pub mod publish {
        use amqp_wire::types::Octect;
        pub const MANDATORY: Octect = 0b0000_0001;
        pub const IMMEDIATE: Octect = 0b0000_0010;
    }
    pub mod nack {
        use amqp_wire::types::Octect;
        pub const MULTIPLE: Octect = 0b0000_0001;
        pub const REQUEUE: Octect = 0b0000_0010;
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Qos {
    pub prefetch_size: LongUint,
    pub prefetch_count: ShortUint,
    pub global: Boolean,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct QosOk;

#[derive(Debug, Serialize, Deserialize)]
pub struct Consume {
    pub ticket: ShortUint,
    pub queue: AmqpQueueName,
    pub consumer_tag: AmqpConsumerTag,
    bits: Octect,
    pub arguments: AmqpTable,
}

impl Consume {
    pub fn new(queue: AmqpQueueName, consumer_tag: AmqpConsumerTag, arguments: AmqpTable) -> Self {
        Self {
            ticket: 0,
            queue,
            consumer_tag,
            bits: 0,
            arguments,
        }
    }
}

impl_bit_flags!(Consume {
    no_local, set_no_local = bit_flag::consume::NO_LOCAL;
    no_ack, set_no_ack = bit_flag::consume::NO_ACK;
    exclusive, set_exclusive = bit_flag::consume::EXCLUSIVE;
    no_wait, set_no_wait = bit_flag::consume::NO_WAIT;
});

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConsumeOk {
    pub consumer_tag: AmqpConsumerTag,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Cancel {
    pub consumer_tag: AmqpConsumerTag,
    pub no_wait: Boolean,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CancelOk {
    pub consumer_tag: AmqpConsumerTag,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Publish {
    pub ticket: ShortUint,
    pub exchange: AmqpExchangeName,
    pub routing_key: ShortStr,
    bits: Octect,
}

impl Publish {
    pub fn new(exchange: AmqpExchangeName, routing_key: ShortStr) -> Self {
        Self {
            ticket: 0,
            exchange,
            routing_key,
            bits: 0,
        }
    }
}

impl_bit_flags!(Publish {
    mandatory, set_mandatory = bit_flag::publish::MANDATORY;
    immediate, set_immediate = bit_flag::publish::IMMEDIATE;
});

/// Returned message, see [basic.return](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.return).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Return {
    pub reply_code: AmqpReplyCode,
    pub reply_text: AmqpReplyText,
    pub exchange: AmqpExchangeName,
    pub routing_key: ShortStr,
}

impl fmt::Display for Return {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "return: code = {}, text = '{}', exchange = '{}', routing key = '{}'",
            self.reply_code, self.reply_text, self.exchange, self.routing_key
        )
    }
}

/// Delivered message, see [basic.deliver](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.deliver).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Deliver {
    pub consumer_tag: AmqpConsumerTag,
    pub delivery_tag: AmqpDeliveryTag,
    pub redelivered: Boolean,
    pub exchange: AmqpExchangeName,
    pub routing_key: ShortStr,
}

impl fmt::Display for Deliver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deliver: consumer tag = '{}', delivery tag = {}, redelivered = {}, exchange = '{}', routing key = '{}'",
            self.consumer_tag, self.delivery_tag, self.redelivered, self.exchange, self.routing_key
        )
    }
}

impl Deliver {
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn delivery_tag(&self) -> AmqpDeliveryTag {
        self.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Get {
    pub ticket: ShortUint,
    pub queue: AmqpQueueName,
    pub no_ack: Boolean,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GetOk {
    pub delivery_tag: AmqpDeliveryTag,
    pub redelivered: Boolean,
    pub exchange: AmqpExchangeName,
    pub routing_key: ShortStr,
    pub message_count: AmqpMessageCount,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct GetEmpty {
    pub cluster_id: ShortStr,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct Ack {
    pub delivery_tag: AmqpDeliveryTag,
    pub multiple: Boolean,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Reject {
    pub delivery_tag: AmqpDeliveryTag,
    pub requeue: Boolean,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecoverAsync {
    pub requeue: Boolean,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Recover {
    pub requeue: Boolean,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct RecoverOk;

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct Nack {
    pub delivery_tag: AmqpDeliveryTag,
    bits: Octect,
}

impl Nack {
    pub fn new(delivery_tag: AmqpDeliveryTag) -> Self {
        Self {
            delivery_tag,
            bits: 0,
        }
    }
}

impl_bit_flags!(Nack {
    multiple, set_multiple = bit_flag::nack::MULTIPLE;
    requeue, set_requeue = bit_flag::nack::REQUEUE;
});
