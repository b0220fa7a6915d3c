//! Queue class (50).
use amqp_wire::types::{
    AmqpExchangeName, AmqpMessageCount, AmqpQueueName, AmqpTable, Boolean, LongUint, Octect,
    ShortStr, ShortUint,
};
use serde::{Deserialize, Serialize};

mod bit_flag {
    pub mod declare {
        use amqp_wire::types::Octect;
        pub const PASSIVE: Octect = 0b0000_0001;
        pub const DURABLE: Octect = 0b0000_0010;
        pub const EXCLUSIVE: Octect = 0b0000_0100;
        pub const AUTO_DELETE: Octect = 0b0000_1000;
        pub const NO_WAIT: Octect = 0b0001_0000;
    }
    pub mod delete {
        use amqp_wire::types::Octect;
        pub const IF_UNUSED: Octect = 0b0000_0001;
        pub const IF_EMPTY: Octect = 0b0000_0010;
        pub const NO_WAIT: Octect = 0b0000_0100;
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeclareQueue {
    pub ticket: ShortUint,
    pub queue: AmqpQueueName,
    bits: Octect,
    pub arguments: AmqpTable,
}

impl DeclareQueue {
    pub fn new(queue: AmqpQueueName, arguments: AmqpTable) -> Self {
        Self {
            ticket: 0,
            queue,
            bits: 0,
            arguments,
        }
    }
}

impl_bit_flags!(DeclareQueue {
    passive, set_passive = bit_flag::declare::PASSIVE;
    durable, set_durable = bit_flag::declare::DURABLE;
    exclusive, set_exclusive = bit_flag::declare::EXCLUSIVE;
    auto_delete, set_auto_delete = bit_flag::declare::AUTO_DELETE;
    no_wait, set_no_wait = bit_flag::declare::NO_WAIT;
});

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DeclareQueueOk {
    pub queue: AmqpQueueName,
    pub message_count: AmqpMessageCount,
    pub consumer_count: LongUint,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BindQueue {
    pub ticket: ShortUint,
    pub queue: AmqpQueueName,
    pub exchange: AmqpExchangeName,
    pub routing_key: ShortStr,
    pub no_wait: Boolean,
    pub arguments: AmqpTable,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct BindQueueOk;

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeQueue {
    pub ticket: ShortUint,
    pub queue: AmqpQueueName,
    pub no_wait: Boolean,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct PurgeQueueOk {
    pub message_count: AmqpMessageCount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteQueue {
    pub ticket: ShortUint,
    pub queue: AmqpQueueName,
    bits: Octect,
}

impl DeleteQueue {
    pub fn new(queue: AmqpQueueName) -> Self {
        Self {
            ticket: 0,
            queue,
            bits: 0,
        }
    }
}

impl_bit_flags!(DeleteQueue {
    if_unused, set_if_unused = bit_flag::delete::IF_UNUSED;
    if_empty, set_if_empty = bit_flag::delete::IF_EMPTY;
    no_wait, set_no_wait = bit_flag::delete::NO_WAIT;
});

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DeleteQueueOk {
    pub message_count: AmqpMessageCount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnbindQueue {
    pub ticket: ShortUint,
    pub queue: AmqpQueueName,
    pub exchange: AmqpExchangeName,
    pub routing_key: ShortStr,
    pub arguments: AmqpTable,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct UnbindQueueOk;
