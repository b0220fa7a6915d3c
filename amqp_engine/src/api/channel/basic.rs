use amqp_wire::types::{AmqpDeliveryTag, FieldTable};
use bytes::Bytes;
use tracing::debug;

use super::{lock, short_str, Channel, Expected, Work};
use crate::{
    api::{
        consumer::{self, AsyncConsumer},
        error::Error,
        Result,
    },
    frame::{
        Ack, BasicProperties, Cancel, CancelOk, Command, Consume, ConsumeOk, Frame, Get, GetEmpty,
        GetOk, Nack, Publish, Qos, QosOk, Recover, RecoverAsync, RecoverOk, Reject,
    },
};

#[derive(Debug, Clone, Default)]
pub struct BasicQosArguments {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

impl BasicQosArguments {
    pub fn new(prefetch_size: u32, prefetch_count: u16, global: bool) -> Self {
        Self {
            prefetch_size,
            prefetch_count,
            global,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicConsumeArguments {
    pub queue: String,
    /// Empty to let the broker pick a tag.
    pub consumer_tag: String,
    pub no_local: bool,
    /// Messages count as acknowledged once sent.
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl BasicConsumeArguments {
    pub fn new(queue: &str, consumer_tag: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            consumer_tag: consumer_tag.to_owned(),
            ..Default::default()
        }
    }

    pub fn no_ack(&mut self, value: bool) -> &mut Self {
        self.no_ack = value;
        self
    }

    pub fn exclusive(&mut self, value: bool) -> &mut Self {
        self.exclusive = value;
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
pub struct BasicCancelArguments {
    pub consumer_tag: String,
    pub no_wait: bool,
}

impl BasicCancelArguments {
    pub fn new(consumer_tag: &str) -> Self {
        Self {
            consumer_tag: consumer_tag.to_owned(),
            no_wait: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicGetArguments {
    pub queue: String,
    pub no_ack: bool,
}

impl BasicGetArguments {
    pub fn new(queue: &str, no_ack: bool) -> Self {
        Self {
            queue: queue.to_owned(),
            no_ack,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicPublishArguments {
    pub exchange: String,
    pub routing_key: String,
    /// Return the message if it cannot be routed.
    pub mandatory: bool,
    pub immediate: bool,
}

impl BasicPublishArguments {
    pub fn new(exchange: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            mandatory: false,
            immediate: false,
        }
    }

    pub fn mandatory(&mut self, value: bool) -> &mut Self {
        self.mandatory = value;
        self
    }

    pub fn immediate(&mut self, value: bool) -> &mut Self {
        self.immediate = value;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicAckArguments {
    pub delivery_tag: AmqpDeliveryTag,
    pub multiple: bool,
}

impl BasicAckArguments {
    pub fn new(delivery_tag: AmqpDeliveryTag, multiple: bool) -> Self {
        Self {
            delivery_tag,
            multiple,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BasicNackArguments {
    pub delivery_tag: AmqpDeliveryTag,
    pub multiple: bool,
    pub requeue: bool,
}

impl BasicNackArguments {
    pub fn new(delivery_tag: AmqpDeliveryTag, multiple: bool, requeue: bool) -> Self {
        Self {
            delivery_tag,
            multiple,
            requeue,
        }
    }
}

impl Default for BasicNackArguments {
    fn default() -> Self {
        Self::new(0, false, true)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BasicRejectArguments {
    pub delivery_tag: AmqpDeliveryTag,
    pub requeue: bool,
}

impl BasicRejectArguments {
    pub fn new(delivery_tag: AmqpDeliveryTag, requeue: bool) -> Self {
        Self {
            delivery_tag,
            requeue,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicRecoverArguments {
    pub requeue: bool,
}

impl BasicRecoverArguments {
    pub fn new(requeue: bool) -> Self {
        Self { requeue }
    }
}

/// A message fetched with [`Channel::basic_get`].
pub type GetMessage = (GetOk, BasicProperties, Vec<u8>);

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// See [basic.qos](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.qos).
    pub async fn basic_qos(&self, args: BasicQosArguments) -> Result<()> {
        let qos = Qos {
            prefetch_size: args.prefetch_size,
            prefetch_count: args.prefetch_count,
            global: args.global,
        };
        self.call(
            Command::new(qos.into_frame()),
            Expected::Reply(QosOk::header()),
            None,
        )
        .await?;
        Ok(())
    }

    /// Start a subscription and return its consumer tag.
    ///
    /// The consumer is registered under the tag the broker confirms, before
    /// any delivery for it is processed. With `no_wait` a tag must be given.
    ///
    /// See [basic.consume](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.consume).
    pub async fn basic_consume<C>(&self, consumer: C, args: BasicConsumeArguments) -> Result<String>
    where
        C: AsyncConsumer + 'static,
    {
        if args.no_wait && args.consumer_tag.is_empty() {
            return Err(Error::InvalidOperation(
                "no_wait consume requires a consumer tag".to_owned(),
            ));
        }
        let mut consume = Consume::new(
            short_str("queue", &args.queue)?,
            short_str("consumer tag", &args.consumer_tag)?,
            args.arguments,
        );
        consume
            .set_no_local(args.no_local)
            .set_no_ack(args.no_ack)
            .set_exclusive(args.exclusive)
            .set_no_wait(args.no_wait);
        let consumer = consumer::shared(consumer);

        if args.no_wait {
            // no reply carries the tag, register up front
            lock(&self.inner.consumers).insert(args.consumer_tag.clone(), consumer.clone());
            if let Err(err) = self.send(Command::new(consume.into_frame())).await {
                lock(&self.inner.consumers).remove(&args.consumer_tag);
                return Err(err);
            }
            self.inner.dispatcher.submit(Work::ConsumeOk {
                consumer,
                consumer_tag: args.consumer_tag.clone(),
            });
            return Ok(args.consumer_tag);
        }

        let reply = self
            .call(
                Command::new(consume.into_frame()),
                Expected::Reply(ConsumeOk::header()),
                Some(consumer),
            )
            .await?;
        match reply.method() {
            Frame::ConsumeOk(_, consume_ok) => Ok(consume_ok.consumer_tag.to_string()),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    /// End a subscription. The consumer gets its `cancel_ok` callback.
    ///
    /// See [basic.cancel](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.cancel).
    pub async fn basic_cancel(&self, args: BasicCancelArguments) -> Result<()> {
        let cancel = Cancel {
            consumer_tag: short_str("consumer tag", &args.consumer_tag)?,
            no_wait: args.no_wait,
        };
        if !args.no_wait {
            self.call(
                Command::new(cancel.into_frame()),
                Expected::Reply(CancelOk::header()),
                None,
            )
            .await?;
            return Ok(());
        }

        self.send(Command::new(cancel.into_frame())).await?;
        let consumer = lock(&self.inner.consumers).remove(&args.consumer_tag);
        match consumer {
            Some(consumer) => self.inner.dispatcher.submit(Work::CancelOk {
                consumer,
                consumer_tag: args.consumer_tag,
            }),
            None => debug!(
                "channel {}: cancel of unknown consumer '{}'",
                self, args.consumer_tag
            ),
        }
        Ok(())
    }

    /// Fetch one message, `None` if the queue is empty.
    ///
    /// See [basic.get](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.get).
    pub async fn basic_get(&self, args: BasicGetArguments) -> Result<Option<GetMessage>> {
        let get = Get {
            ticket: 0,
            queue: short_str("queue", &args.queue)?,
            no_ack: args.no_ack,
        };
        let reply = self
            .call(
                Command::new(get.into_frame()),
                Expected::Either(GetOk::header(), GetEmpty::header()),
                None,
            )
            .await?;
        let (method, header, body) = reply.into_parts();
        match method {
            Frame::GetOk(_, get_ok) => Ok(Some((
                get_ok,
                header.map(|h| h.basic_properties).unwrap_or_default(),
                body.to_vec(),
            ))),
            Frame::GetEmpty(..) => Ok(None),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    /// Publish one message. Waits while the broker has paused the channel
    /// with `channel.flow`. In confirm mode the message takes the next
    /// sequence number.
    ///
    /// See [basic.publish](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.publish).
    pub async fn basic_publish(
        &self,
        basic_properties: BasicProperties,
        content: Vec<u8>,
        args: BasicPublishArguments,
    ) -> Result<()> {
        let command = publish_command(basic_properties, content, &args)?;
        self.inner.flow.wait_open().await;
        let _publish = self.inner.publish_lock.lock().await;
        self.ensure_open()?;
        self.inner.confirms.allocate(1);
        self.transmit(command).await
    }

    /// Publish several messages with one write. In confirm mode they take
    /// consecutive sequence numbers.
    pub async fn basic_publish_batch<I>(&self, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = (BasicProperties, Vec<u8>, BasicPublishArguments)>,
    {
        let commands = messages
            .into_iter()
            .map(|(basic_properties, content, args)| {
                publish_command(basic_properties, content, &args)
            })
            .collect::<Result<Vec<_>>>()?;
        if commands.is_empty() {
            return Ok(());
        }
        let count = commands.len() as u64;
        let frames = Command::batch_into_frames(commands, self.inner.settings.frame_max);

        self.inner.flow.wait_open().await;
        let _publish = self.inner.publish_lock.lock().await;
        self.ensure_open()?;
        self.inner.confirms.allocate(count);
        self.transmit_frames(frames).await
    }

    /// See [basic.ack](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.ack).
    pub async fn basic_ack(&self, args: BasicAckArguments) -> Result<()> {
        let ack = Ack {
            delivery_tag: args.delivery_tag,
            multiple: args.multiple,
        };
        self.send(Command::new(ack.into_frame())).await
    }

    /// See [basic.nack](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.nack).
    pub async fn basic_nack(&self, args: BasicNackArguments) -> Result<()> {
        let mut nack = Nack::new(args.delivery_tag);
        nack.set_multiple(args.multiple).set_requeue(args.requeue);
        self.send(Command::new(nack.into_frame())).await
    }

    /// See [basic.reject](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.reject).
    pub async fn basic_reject(&self, args: BasicRejectArguments) -> Result<()> {
        let reject = Reject {
            delivery_tag: args.delivery_tag,
            requeue: args.requeue,
        };
        self.send(Command::new(reject.into_frame())).await
    }

    /// Redeliver unacknowledged messages. Observers of `basic_recover_ok`
    /// are notified when the broker confirms.
    ///
    /// See [basic.recover](https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.recover).
    pub async fn basic_recover(&self, args: BasicRecoverArguments) -> Result<()> {
        let recover = Recover {
            requeue: args.requeue,
        };
        self.call(
            Command::new(recover.into_frame()),
            Expected::Reply(RecoverOk::header()),
            None,
        )
        .await?;
        Ok(())
    }

    /// Deprecated by the broker in favour of [`basic_recover`](Channel::basic_recover).
    pub async fn basic_recover_async(&self, args: BasicRecoverArguments) -> Result<()> {
        let recover = RecoverAsync {
            requeue: args.requeue,
        };
        self.send(Command::new(recover.into_frame())).await
    }
}

fn publish_command(
    basic_properties: BasicProperties,
    content: Vec<u8>,
    args: &BasicPublishArguments,
) -> Result<Command> {
    let mut publish = Publish::new(
        short_str("exchange", &args.exchange)?,
        short_str("routing key", &args.routing_key)?,
    );
    publish
        .set_mandatory(args.mandatory)
        .set_immediate(args.immediate);
    Ok(Command::with_content(
        publish.into_frame(),
        basic_properties,
        Bytes::from(content),
    ))
}
