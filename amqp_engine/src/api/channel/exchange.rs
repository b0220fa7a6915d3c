use amqp_wire::types::FieldTable;

use super::{short_str, Channel, Expected};
use crate::{
    api::Result,
    frame::{Bind, BindOk, Command, Declare, DeclareOk, Delete, DeleteOk, Unbind, UnbindOk},
};

/// Exchange types every broker supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeDeclareArguments {
    pub exchange: String,
    /// Type name, e.g. `"direct"`, or a broker plugin type.
    pub exchange_type: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl ExchangeDeclareArguments {
    pub fn new(exchange: &str, exchange_type: ExchangeType) -> Self {
        Self {
            exchange: exchange.to_owned(),
            exchange_type: exchange_type.as_str().to_owned(),
            ..Default::default()
        }
    }

    pub fn passive(&mut self, value: bool) -> &mut Self {
        self.passive = value;
        self
    }

    pub fn durable(&mut self, value: bool) -> &mut Self {
        self.durable = value;
        self
    }

    pub fn auto_delete(&mut self, value: bool) -> &mut Self {
        self.auto_delete = value;
        self
    }

    pub fn internal(&mut self, value: bool) -> &mut Self {
        self.internal = value;
        self
    }

    pub fn no_wait(&mut self, value: bool) -> &mut Self {
        self.no_wait = value;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeDeleteArguments {
    pub exchange: String,
    pub if_unused: bool,
    pub no_wait: bool,
}

impl ExchangeDeleteArguments {
    pub fn new(exchange: &str) -> Self {
        Self {
            exchange: exchange.to_owned(),
            ..Default::default()
        }
    }
}

/// Arguments of exchange-to-exchange bind and unbind.
#[derive(Debug, Clone, Default)]
pub struct ExchangeBindArguments {
    pub destination: String,
    pub source: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl ExchangeBindArguments {
    pub fn new(destination: &str, source: &str, routing_key: &str) -> Self {
        Self {
            destination: destination.to_owned(),
            source: source.to_owned(),
            routing_key: routing_key.to_owned(),
            ..Default::default()
        }
    }
}

pub type ExchangeUnbindArguments = ExchangeBindArguments;

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// See [exchange.declare](https://www.rabbitmq.com/amqp-0-9-1-reference.html#exchange.declare).
    pub async fn exchange_declare(&self, args: ExchangeDeclareArguments) -> Result<()> {
        let mut declare = Declare::new(
            short_str("exchange", &args.exchange)?,
            short_str("exchange type", &args.exchange_type)?,
            args.arguments,
        );
        declare
            .set_passive(args.passive)
            .set_durable(args.durable)
            .set_auto_delete(args.auto_delete)
            .set_internal(args.internal)
            .set_no_wait(args.no_wait);
        let command = Command::new(declare.into_frame());
        if args.no_wait {
            return self.send(command).await;
        }
        self.call(command, Expected::Reply(DeclareOk::header()), None)
            .await?;
        Ok(())
    }

    /// See [exchange.delete](https://www.rabbitmq.com/amqp-0-9-1-reference.html#exchange.delete).
    pub async fn exchange_delete(&self, args: ExchangeDeleteArguments) -> Result<()> {
        let mut delete = Delete::new(short_str("exchange", &args.exchange)?);
        delete
            .set_if_unused(args.if_unused)
            .set_no_wait(args.no_wait);
        let command = Command::new(delete.into_frame());
        if args.no_wait {
            return self.send(command).await;
        }
        self.call(command, Expected::Reply(DeleteOk::header()), None)
            .await?;
        Ok(())
    }

    /// See [exchange.bind](https://www.rabbitmq.com/amqp-0-9-1-reference.html#exchange.bind).
    pub async fn exchange_bind(&self, args: ExchangeBindArguments) -> Result<()> {
        let bind = Bind {
            ticket: 0,
            destination: short_str("destination", &args.destination)?,
            source: short_str("source", &args.source)?,
            routing_key: short_str("routing key", &args.routing_key)?,
            no_wait: args.no_wait,
            arguments: args.arguments,
        };
        let command = Command::new(bind.into_frame());
        if args.no_wait {
            return self.send(command).await;
        }
        self.call(command, Expected::Reply(BindOk::header()), None)
            .await?;
        Ok(())
    }

    /// See [exchange.unbind](https://www.rabbitmq.com/amqp-0-9-1-reference.html#exchange.unbind).
    pub async fn exchange_unbind(&self, args: ExchangeUnbindArguments) -> Result<()> {
        let unbind = Unbind {
            ticket: 0,
            destination: short_str("destination", &args.destination)?,
            source: short_str("source", &args.source)?,
            routing_key: short_str("routing key", &args.routing_key)?,
            no_wait: args.no_wait,
            arguments: args.arguments,
        };
        let command = Command::new(unbind.into_frame());
        if args.no_wait {
            return self.send(command).await;
        }
        self.call(command, Expected::Reply(UnbindOk::header()), None)
            .await?;
        Ok(())
    }
}
