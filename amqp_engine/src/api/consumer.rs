//! Consumer capability set and the default consumer.
use std::{str::from_utf8, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{
    channel::{BasicAckArguments, Channel},
    shutdown::ShutdownReason,
};
use crate::frame::{BasicProperties, Deliver};

/// Outcome of a consumer callback. Errors are reported through the channel's
/// `callback_exception` observers and do not stop dispatching.
pub type ConsumerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Callbacks of one subscription.
///
/// All callbacks of a channel run one at a time on the channel's dispatch
/// task, in the order the frames arrived. Only [`consume`](AsyncConsumer::consume)
/// is required.
#[async_trait]
pub trait AsyncConsumer: Send {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        basic_properties: BasicProperties,
        content: Vec<u8>,
    ) -> ConsumerResult;

    /// The broker confirmed the subscription.
    async fn consume_ok(&mut self, _channel: &Channel, _consumer_tag: &str) -> ConsumerResult {
        Ok(())
    }

    /// The broker cancelled the subscription, e.g. because the queue was deleted.
    async fn cancel(&mut self, _channel: &Channel, _consumer_tag: &str) -> ConsumerResult {
        Ok(())
    }

    /// The subscription was cancelled through [`Channel::basic_cancel`].
    async fn cancel_ok(&mut self, _channel: &Channel, _consumer_tag: &str) -> ConsumerResult {
        Ok(())
    }

    /// The channel closed. This is always the last callback of a consumer.
    async fn channel_shutdown(
        &mut self,
        _channel: &Channel,
        _consumer_tag: &str,
        _reason: &ShutdownReason,
    ) -> ConsumerResult {
        Ok(())
    }
}

pub(crate) type SharedConsumer = Arc<Mutex<Box<dyn AsyncConsumer>>>;

pub(crate) fn shared<C: AsyncConsumer + 'static>(consumer: C) -> SharedConsumer {
    Arc::new(Mutex::new(Box::new(consumer)))
}

/// Logs every message and acks it unless the subscription is `no_ack`.
pub struct DefaultConsumer {
    no_ack: bool,
}

impl DefaultConsumer {
    pub fn new(no_ack: bool) -> Self {
        Self { no_ack }
    }
}

#[async_trait]
impl AsyncConsumer for DefaultConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        basic_properties: BasicProperties,
        content: Vec<u8>,
    ) -> ConsumerResult {
        info!(
            "consume delivery {} on channel {}, content size: {}",
            deliver,
            channel,
            content.len()
        );
        match from_utf8(&content) {
            Ok(text) => info!("properties: {:?}, content: {}", basic_properties, text),
            Err(_) => info!("properties: {:?}, binary content", basic_properties),
        }

        if !self.no_ack {
            channel
                .basic_ack(BasicAckArguments::new(deliver.delivery_tag(), false))
                .await?;
        }
        Ok(())
    }

    async fn cancel(&mut self, channel: &Channel, consumer_tag: &str) -> ConsumerResult {
        warn!("consumer '{}' cancelled by broker on channel {}", consumer_tag, channel);
        Ok(())
    }
}
