use amqp_wire::types::{AmqpMessageCount, FieldTable};

use super::{short_str, Channel, Expected};
use crate::{
    api::{error::Error, Result},
    frame::{
        BindQueue, BindQueueOk, Command, DeclareQueue, DeclareQueueOk, DeleteQueue,
        DeleteQueueOk, Frame, PurgeQueue, PurgeQueueOk, UnbindQueue, UnbindQueueOk,
    },
};

#[derive(Debug, Clone, Default)]
pub struct QueueDeclareArguments {
    /// Empty to let the broker name the queue.
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl QueueDeclareArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
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

    pub fn exclusive(&mut self, value: bool) -> &mut Self {
        self.exclusive = value;
        self
    }

    pub fn auto_delete(&mut self, value: bool) -> &mut Self {
        self.auto_delete = value;
        self
    }

    pub fn no_wait(&mut self, value: bool) -> &mut Self {
        self.no_wait = value;
        self
    }

    pub fn arguments(&mut self, arguments: FieldTable) -> &mut Self {
        self.arguments = arguments;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueBindArguments {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl QueueBindArguments {
    pub fn new(queue: &str, exchange: &str, routing_key: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueUnbindArguments {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

impl QueueUnbindArguments {
    pub fn new(queue: &str, exchange: &str, routing_key: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            arguments: FieldTable::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueuePurgeArguments {
    pub queue: String,
    pub no_wait: bool,
}

impl QueuePurgeArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            no_wait: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueDeleteArguments {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

impl QueueDeleteArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            ..Default::default()
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// Return `(queue_name, message_count, consumer_count)`, or `None` with `no_wait`.
    ///
    /// See [queue.declare](https://www.rabbitmq.com/amqp-0-9-1-reference.html#queue.declare).
    pub async fn queue_declare(
        &self,
        args: QueueDeclareArguments,
    ) -> Result<Option<(String, AmqpMessageCount, u32)>> {
        let mut declare = DeclareQueue::new(short_str("queue", &args.queue)?, args.arguments);
        declare
            .set_passive(args.passive)
            .set_durable(args.durable)
            .set_exclusive(args.exclusive)
            .set_auto_delete(args.auto_delete)
            .set_no_wait(args.no_wait);
        let command = Command::new(declare.into_frame());
        if args.no_wait {
            self.send(command).await?;
            return Ok(None);
        }
        let reply = self
            .call(command, Expected::Reply(DeclareQueueOk::header()), None)
            .await?;
        match reply.method() {
            Frame::DeclareQueueOk(_, ok) => Ok(Some((
                ok.queue.to_string(),
                ok.message_count,
                ok.consumer_count,
            ))),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    /// Number of ready messages, through a passive declare.
    pub async fn message_count(&self, queue: &str) -> Result<AmqpMessageCount> {
        let args = QueueDeclareArguments::new(queue).passive(true).finish();
        self.queue_declare(args)
            .await?
            .map(|(_, message_count, _)| message_count)
            .ok_or_else(|| Error::UnexpectedReply("declare-ok missing".to_owned()))
    }

    /// Number of consumers, through a passive declare.
    pub async fn consumer_count(&self, queue: &str) -> Result<u32> {
        let args = QueueDeclareArguments::new(queue).passive(true).finish();
        self.queue_declare(args)
            .await?
            .map(|(_, _, consumer_count)| consumer_count)
            .ok_or_else(|| Error::UnexpectedReply("declare-ok missing".to_owned()))
    }

    /// See [queue.bind](https://www.rabbitmq.com/amqp-0-9-1-reference.html#queue.bind).
    pub async fn queue_bind(&self, args: QueueBindArguments) -> Result<()> {
        let bind = BindQueue {
            ticket: 0,
            queue: short_str("queue", &args.queue)?,
            exchange: short_str("exchange", &args.exchange)?,
            routing_key: short_str("routing key", &args.routing_key)?,
            no_wait: args.no_wait,
            arguments: args.arguments,
        };
        let command = Command::new(bind.into_frame());
        if args.no_wait {
            return self.send(command).await;
        }
        self.call(command, Expected::Reply(BindQueueOk::header()), None)
            .await?;
        Ok(())
    }

    /// See [queue.unbind](https://www.rabbitmq.com/amqp-0-9-1-reference.html#queue.unbind).
    pub async fn queue_unbind(&self, args: QueueUnbindArguments) -> Result<()> {
        let unbind = UnbindQueue {
            ticket: 0,
            queue: short_str("queue", &args.queue)?,
            exchange: short_str("exchange", &args.exchange)?,
            routing_key: short_str("routing key", &args.routing_key)?,
            arguments: args.arguments,
        };
        self.call(
            Command::new(unbind.into_frame()),
            Expected::Reply(UnbindQueueOk::header()),
            None,
        )
        .await?;
        Ok(())
    }

    /// Return the number of purged messages, or `None` with `no_wait`.
    ///
    /// See [queue.purge](https://www.rabbitmq.com/amqp-0-9-1-reference.html#queue.purge).
    pub async fn queue_purge(&self, args: QueuePurgeArguments) -> Result<Option<AmqpMessageCount>> {
        let purge = PurgeQueue {
            ticket: 0,
            queue: short_str("queue", &args.queue)?,
            no_wait: args.no_wait,
        };
        let command = Command::new(purge.into_frame());
        if args.no_wait {
            self.send(command).await?;
            return Ok(None);
        }
        let reply = self
            .call(command, Expected::Reply(PurgeQueueOk::header()), None)
            .await?;
        match reply.method() {
            Frame::PurgeQueueOk(_, ok) => Ok(Some(ok.message_count)),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    /// Return the number of deleted messages, or `None` with `no_wait`.
    ///
    /// See [queue.delete](https://www.rabbitmq.com/amqp-0-9-1-reference.html#queue.delete).
    pub async fn queue_delete(
        &self,
        args: QueueDeleteArguments,
    ) -> Result<Option<AmqpMessageCount>> {
        let mut delete = DeleteQueue::new(short_str("queue", &args.queue)?);
        delete
            .set_if_unused(args.if_unused)
            .set_if_empty(args.if_empty)
            .set_no_wait(args.no_wait);
        let command = Command::new(delete.into_frame());
        if args.no_wait {
            self.send(command).await?;
            return Ok(None);
        }
        let reply = self
            .call(command, Expected::Reply(DeleteQueueOk::header()), None)
            .await?;
        match reply.method() {
            Frame::DeleteQueueOk(_, ok) => Ok(Some(ok.message_count)),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }
}
