//! Exchange class (40).
use amqp_wire::types::{AmqpExchangeName, AmqpTable, Boolean, Octect, ShortStr, ShortUint};
use serde::{Deserialize, Serialize};

mod bit_flag {
    pub mod declare {
        use amqp_wire::types::Octect;
        pub const PASSIVE: Octect = 0b0000_0001;
        pub const DURABLE: Octect = 0b0000_0010;
        pub const AUTO_DELETE: Octect = 0b0000_0100;
        pub const INTERNAL: Octect = 0b0000_1000;
        pub const NO_WAIT: Octect = 0b0001_0000;
    }
    pub mod delete {
        use amqp_wire::types::Octect;
        pub const IF_UNUSED: Octect = 0b0000_0001;
        pub const NO_WAIT: Octect = 0b0000_0010;
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Declare {
    pub ticket: ShortUint,
    pub exchange: AmqpExchangeName,
    pub typ: ShortStr,
    bits: Octect,
    pub arguments: AmqpTable,
}

impl Declare {
    pub fn new(exchange: AmqpExchangeName, typ: ShortStr, arguments: AmqpTable) -> Self {
        Self {
            ticket: 0,
            exchange,
            typ,
            bits: 0,
            arguments,
        }
    }
}

impl_bit_flags!(Declare {
    passive, set_passive = bit_flag::declare::PASSIVE;
    durable, set_durable = bit_flag::declare::DURABLE;
    auto_delete, set_auto_delete = bit_flag::declare::AUTO_DELETE;
    internal, set_internal = bit_flag::declare::INTERNAL;
    no_wait, set_no_wait = bit_flag::declare::NO_WAIT;
});

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DeclareOk;

#[derive(Debug, Serialize, Deserialize)]
pub struct Delete {
    pub ticket: ShortUint,
    pub exchange: AmqpExchangeName,
    bits: Octect,
}

impl Delete {
    pub fn new(exchange: AmqpExchangeName) -> Self {
        Self {
            ticket: 0,
            exchange,
            bits: 0,
        }
    }
}

impl_bit_flags!(Delete {
    if_unused, set_if_unused = bit_flag::delete::IF_UNUSED;
    no_wait, set_no_wait = bit_flag::delete::NO_WAIT;
});

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DeleteOk;

#[derive(Debug, Serialize, Deserialize)]
pub struct Bind {
    pub ticket: ShortUint,
    pub destination: AmqpExchangeName,
    pub source: AmqpExchangeName,
    pub routing_key: ShortStr,
    pub no_wait: Boolean,
    pub arguments: AmqpTable,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct BindOk;

#[derive(Debug, Serialize, Deserialize)]
pub struct Unbind {
    pub ticket: ShortUint,
    pub destination: AmqpExchangeName,
    pub source: AmqpExchangeName,
    pub routing_key: ShortStr,
    pub no_wait: Boolean,
    pub arguments: AmqpTable,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct UnbindOk;

#[cfg(test)]
mod tests {
    use super::Declare;
    use amqp_wire::types::FieldTable;

    #[test]
    fn test_declare_bits() {
        let mut declare = Declare::new(
            "x".try_into().unwrap(),
            "fanout".try_into().unwrap(),
            FieldTable::new(),
        );
        declare.set_durable(true).set_no_wait(true);
        assert!(declare.durable());
        assert!(declare.no_wait());
        assert!(!declare.passive());
        assert_eq!(0b0001_0010, declare.bits);
        declare.set_durable(false);
        assert_eq!(0b0001_0000, declare.bits);
    }
}
