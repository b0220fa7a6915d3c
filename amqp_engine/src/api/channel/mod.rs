//! The channel protocol state machine.
//!
//! A channel turns synchronous requests into a transmitted command plus a
//! wait on a [`continuation`], and routes every inbound command either to the
//! oldest continuation, to a consumer through the [`dispatcher`], or into its
//! own state (flow, confirms, close).
//!
//! States: `Open` (no close reason) -> `Closing` (close reason set, dispatcher
//! quiesced) -> `Closed` (dispatcher drained, everyone notified).
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use amqp_wire::{
    constants::REPLY_SUCCESS,
    types::{AmqpChannelId, AmqpReplyCode, LongUint, ShortStr},
};
use bytes::Bytes;
use tokio::{
    sync::{self, watch},
    time,
};
use tracing::{debug, info, trace, warn};

use super::{
    consumer::{self, AsyncConsumer, SharedConsumer},
    error::Error,
    events::{
        BasicAckEvent, BasicNackEvent, BasicRecoverOkEvent, BasicReturnEvent, CallbackContext,
        ChannelEvents, FlowControlEvent, HandlerId,
    },
    shutdown::{ShutdownInitiator, ShutdownReason},
    Result,
};
use crate::{
    frame::{
        Cancel, CloseChannel, Command, ContentHeader, Deliver, Frame, OpenChannelOk,
        ProtocolProfile,
    },
    net::FrameSink,
};

mod basic;
mod confirm;
mod continuation;
mod dispatcher;
mod exchange;
mod flow;
mod queue;
mod tx;

pub use basic::*;
pub use confirm::*;
pub use exchange::*;
pub use queue::*;

pub(crate) use continuation::{Continuation, ContinuationQueue, Expected};
use dispatcher::{in_dispatch_task, ConsumerDispatcher, Work};
use flow::FlowGate;

/// Observable lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    /// Close requested or received, waiting for the handshake and the
    /// consumers to finish.
    Closing,
    Closed,
}

/// Connection level settings a channel works with.
#[derive(Debug, Clone)]
pub(crate) struct ChannelSettings {
    pub frame_max: LongUint,
    pub continuation_timeout: Duration,
    pub close_timeout: Duration,
}

/// Called once the channel is closed, to give its number back.
pub(crate) type ReleaseHook = Box<dyn FnOnce(AmqpChannelId) + Send>;

struct Lifecycle {
    /// `None` while open. Set once.
    close_reason: Option<ShutdownReason>,
    continuations: ContinuationQueue,
    /// Shutdown observers were called.
    shutdown_notified: bool,
}

struct ChannelInner {
    channel_id: AmqpChannelId,
    settings: ChannelSettings,
    sink: Arc<dyn FrameSink>,
    profile: Arc<dyn ProtocolProfile>,
    /// Serialises enqueue + transmit so continuation order is wire order.
    rpc_lock: sync::Mutex<()>,
    /// Serialises sequence number assignment + transmit of publishes.
    publish_lock: sync::Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
    consumers: Mutex<HashMap<String, SharedConsumer>>,
    default_consumer: Mutex<Option<SharedConsumer>>,
    flow: FlowGate,
    confirms: confirm::ConfirmState,
    dispatcher: ConsumerDispatcher,
    events: ChannelEvents,
    shutdown_started: AtomicBool,
    closed: watch::Sender<bool>,
    release: Mutex<Option<ReleaseHook>>,
}

/// A channel on a [`Connection`](super::connection::Connection).
///
/// Cheap to clone, all clones drive the same channel. A channel is not
/// closed when dropped; use [`close`](Channel::close).
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Argument as a short string, at most 255 bytes.
pub(crate) fn short_str(name: &str, value: &str) -> Result<ShortStr> {
    ShortStr::try_from(value).map_err(|_| {
        Error::InvalidOperation(format!("{} exceeds 255 bytes: {} bytes", name, value.len()))
    })
}

impl Channel {
    pub(crate) fn new(
        channel_id: AmqpChannelId,
        sink: Arc<dyn FrameSink>,
        profile: Arc<dyn ProtocolProfile>,
        settings: ChannelSettings,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        let channel = Self {
            inner: Arc::new(ChannelInner {
                channel_id,
                settings,
                sink,
                profile,
                rpc_lock: sync::Mutex::new(()),
                publish_lock: sync::Mutex::new(()),
                lifecycle: Mutex::new(Lifecycle {
                    close_reason: None,
                    continuations: ContinuationQueue::default(),
                    shutdown_notified: false,
                }),
                consumers: Mutex::new(HashMap::new()),
                default_consumer: Mutex::new(None),
                flow: FlowGate::new(),
                confirms: confirm::ConfirmState::new(),
                dispatcher: ConsumerDispatcher::new(),
                events: ChannelEvents::default(),
                shutdown_started: AtomicBool::new(false),
                closed,
                release: Mutex::new(None),
            }),
        };
        channel.inner.dispatcher.start(channel.clone());
        channel
    }

    pub(crate) fn set_release_hook(&self, hook: ReleaseHook) {
        *lock(&self.inner.release) = Some(hook);
    }

    pub fn channel_id(&self) -> AmqpChannelId {
        self.inner.channel_id
    }

    pub fn events(&self) -> &ChannelEvents {
        &self.inner.events
    }

    pub fn close_reason(&self) -> Option<ShutdownReason> {
        lock(&self.inner.lifecycle).close_reason.clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.lifecycle).close_reason.is_none()
    }

    pub fn state(&self) -> ChannelState {
        if *self.inner.closed.borrow() {
            ChannelState::Closed
        } else if self.is_open() {
            ChannelState::Open
        } else {
            ChannelState::Closing
        }
    }

    /// Whether publishing is currently allowed by the broker.
    pub fn is_flow_active(&self) -> bool {
        self.inner.flow.is_open()
    }

    /// Call `handler` once the channel shuts down. If that already happened,
    /// `handler` is called right away.
    pub fn on_shutdown<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ShutdownReason) + Send + Sync + 'static,
    {
        let lifecycle = lock(&self.inner.lifecycle);
        if !lifecycle.shutdown_notified {
            return self.inner.events.shutdown.subscribe(handler);
        }
        let reason = lifecycle.close_reason.clone();
        drop(lifecycle);
        if let Some(reason) = reason {
            let faults = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&reason)));
            if faults.is_err() {
                warn!("shutdown handler of channel {} panicked", self);
            }
        }
        0
    }

    pub fn remove_shutdown_handler(&self, id: HandlerId) -> bool {
        self.inner.events.shutdown.unsubscribe(id)
    }

    /// Consumer for deliveries whose consumer tag is not registered, e.g.
    /// deliveries that race with a cancel.
    pub fn set_default_consumer<C>(&self, consumer: C)
    where
        C: AsyncConsumer + 'static,
    {
        *lock(&self.inner.default_consumer) = Some(consumer::shared(consumer));
    }

    /// Tags of the registered consumers.
    pub fn consumer_tags(&self) -> Vec<String> {
        lock(&self.inner.consumers).keys().cloned().collect()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.inner.lifecycle)
    }

    pub(crate) fn closed_error(&self) -> Error {
        let reason = self.close_reason().unwrap_or_else(|| {
            ShutdownReason::new(ShutdownInitiator::Library, REPLY_SUCCESS, "channel closed")
        });
        Error::AlreadyClosed(reason)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.close_reason() {
            None => Ok(()),
            Some(reason) => Err(Error::AlreadyClosed(reason)),
        }
    }

    /// First setter wins. `true` if this call set the reason.
    fn set_close_reason(&self, reason: ShutdownReason) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.close_reason.is_some() {
            return false;
        }
        lifecycle.close_reason = Some(reason);
        true
    }

    pub(crate) async fn transmit(&self, command: Command) -> Result<()> {
        let frames = command.into_frames(self.inner.settings.frame_max);
        self.transmit_frames(frames).await
    }

    pub(crate) async fn transmit_frames(&self, frames: Vec<Frame>) -> Result<()> {
        self.inner
            .sink
            .write_frame_set(self.inner.channel_id, frames)
            .await
            .map_err(Error::from)
    }

    /// Transmit a command that expects no reply.
    pub(crate) async fn send(&self, command: Command) -> Result<()> {
        self.ensure_open()?;
        self.transmit(command).await
    }

    /// Transmit a request and wait for its reply.
    ///
    /// The reply is the next non-asynchronous command the broker sends after
    /// all earlier requests were answered. On timeout the continuation stays
    /// queued so a late reply is still paired with it and discarded.
    pub(crate) async fn call(
        &self,
        command: Command,
        expected: Expected,
        consumer: Option<SharedConsumer>,
    ) -> Result<Command> {
        let rx = {
            let _rpc = self.inner.rpc_lock.lock().await;
            let (continuation, rx) = Continuation::new(expected, consumer);
            if self.enqueue(continuation) {
                // withdrawn again unless the request reaches the sink
                let mut pending = UnsentRequest::new(self);
                self.transmit(command).await?;
                pending.sent();
            }
            rx
        };
        match time::timeout(self.inner.settings.continuation_timeout, rx).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("channel {}: no reply within {:?}", self, self.inner.settings.continuation_timeout);
                Err(Error::ContinuationTimeout)
            }
        }
    }

    /// Queue the continuation, or resolve it at once if the channel is closing.
    fn enqueue(&self, continuation: Continuation) -> bool {
        let mut lifecycle = self.lifecycle();
        match &lifecycle.close_reason {
            Some(reason) => {
                continuation.fail(Error::AlreadyClosed(reason.clone()));
                false
            }
            None => {
                lifecycle.continuations.enqueue(continuation);
                true
            }
        }
    }

    pub(crate) async fn open(&self) -> Result<()> {
        self.call(
            self.inner.profile.channel_open(),
            Expected::Reply(OpenChannelOk::header()),
            None,
        )
        .await?;
        debug!("channel {} opened", self);
        Ok(())
    }

    /// Close with reply code 200.
    pub async fn close(&self) -> Result<()> {
        self.close_with(REPLY_SUCCESS, "Goodbye").await
    }

    /// Close the channel and wait until the broker confirmed it and every
    /// consumer got its shutdown notice. Closing a closed channel is a no-op.
    pub async fn close_with(&self, reply_code: AmqpReplyCode, reply_text: &str) -> Result<()> {
        self.close_internal(reply_code, reply_text, false).await
    }

    /// Like [`close`](Channel::close), but errors are ignored.
    pub async fn abort(&self) -> Result<()> {
        self.close_internal(REPLY_SUCCESS, "Goodbye", true).await
    }

    async fn close_internal(
        &self,
        reply_code: AmqpReplyCode,
        reply_text: &str,
        abort: bool,
    ) -> Result<()> {
        self.inner.dispatcher.quiesce();
        let reason = ShutdownReason::new(ShutdownInitiator::Application, reply_code, reply_text);
        let mut result = Ok(());
        if self.set_close_reason(reason.clone()) {
            debug!("close channel {}: {}", self, reason);
            let close = self.inner.profile.channel_close(reply_code, reply_text, 0, 0);
            if let Err(err) = self.transmit(close).await {
                // no close-ok can arrive
                let reason = reason.clone().with_cause(&err);
                self.lifecycle().close_reason = Some(reason.clone());
                self.on_session_shutdown(reason);
                if !abort {
                    result = Err(err);
                }
            }
        }

        let close_timeout = self.inner.settings.close_timeout;
        if in_dispatch_task(self.channel_id()) {
            // the dispatch task cannot wait for its own end
            let channel = self.clone();
            tokio::spawn(async move {
                if time::timeout(close_timeout, channel.wait_closed()).await.is_err() {
                    channel.on_session_shutdown(reason);
                }
            });
            return result;
        }
        if time::timeout(close_timeout, self.wait_closed()).await.is_err() {
            warn!("channel {}: close handshake timed out", self);
            self.on_session_shutdown(reason);
            self.wait_closed().await;
        }
        result
    }

    /// Resolve once the channel is closed.
    pub async fn wait_closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Process one inbound command. Runs on the connection's reader task.
    ///
    /// An error is a protocol violation that takes the connection down.
    pub(crate) async fn handle_command(&self, command: Command) -> Result<()> {
        if !self.is_open()
            && !matches!(
                command.method(),
                Frame::CloseChannel(..) | Frame::CloseChannelOk(..)
            )
        {
            trace!("channel {} closing, discard {}", self, command.method());
            return Ok(());
        }

        let (method, header, body) = command.into_parts();
        match method {
            Frame::Deliver(_, deliver) => self.handle_deliver(deliver, header, body),
            Frame::Ack(_, ack) => {
                self.inner
                    .confirms
                    .handle_ack_nack(ack.delivery_tag, ack.multiple, false);
                let event = BasicAckEvent {
                    delivery_tag: ack.delivery_tag,
                    multiple: ack.multiple,
                };
                self.inner
                    .events
                    .emit(&self.inner.events.basic_ack, CallbackContext::OnBasicAck, &event);
                Ok(())
            }
            Frame::Nack(_, nack) => {
                self.inner
                    .confirms
                    .handle_ack_nack(nack.delivery_tag, nack.multiple(), true);
                let event = BasicNackEvent {
                    delivery_tag: nack.delivery_tag,
                    multiple: nack.multiple(),
                    requeue: nack.requeue(),
                };
                self.inner
                    .events
                    .emit(&self.inner.events.basic_nack, CallbackContext::OnBasicNack, &event);
                Ok(())
            }
            Frame::Return(_, ret) => {
                debug!("channel {}: {}", self, ret);
                let event = BasicReturnEvent {
                    ret,
                    basic_properties: header.map(|h| h.basic_properties).unwrap_or_default(),
                    content: body,
                };
                self.inner.events.emit(
                    &self.inner.events.basic_return,
                    CallbackContext::OnBasicReturn,
                    &event,
                );
                Ok(())
            }
            Frame::Flow(_, flow) => {
                self.handle_flow(flow.active).await;
                Ok(())
            }
            Frame::CloseChannel(_, close) => {
                self.handle_peer_close(close).await;
                Ok(())
            }
            Frame::CloseChannelOk(..) => {
                let reason = self.close_reason().unwrap_or_else(|| {
                    ShutdownReason::new(ShutdownInitiator::Application, REPLY_SUCCESS, "Goodbye")
                });
                self.on_session_shutdown(reason);
                Ok(())
            }
            Frame::Cancel(_, cancel) => {
                self.handle_server_cancel(cancel).await;
                Ok(())
            }
            method => self.handle_reply(Command::from_parts(method, header, body)),
        }
    }

    fn handle_reply(&self, command: Command) -> Result<()> {
        let continuation = self.lifecycle().continuations.next();
        let Some(continuation) = continuation else {
            return Err(Error::ProtocolViolation(format!(
                "channel {}: reply {} without a pending request",
                self,
                command.method()
            )));
        };

        let accepted = command
            .method()
            .method_header()
            .map_or(false, |header| continuation.expected().accepts(header));
        if accepted {
            match command.method() {
                Frame::ConsumeOk(_, consume_ok) => {
                    if let Some(consumer) = continuation.consumer() {
                        let consumer_tag = consume_ok.consumer_tag.to_string();
                        lock(&self.inner.consumers).insert(consumer_tag.clone(), consumer.clone());
                        self.inner.dispatcher.submit(Work::ConsumeOk {
                            consumer: consumer.clone(),
                            consumer_tag,
                        });
                    }
                }
                Frame::CancelOk(_, cancel_ok) => {
                    let consumer_tag = cancel_ok.consumer_tag.to_string();
                    let consumer = lock(&self.inner.consumers).remove(&consumer_tag);
                    if let Some(consumer) = consumer {
                        self.inner.dispatcher.submit(Work::CancelOk {
                            consumer,
                            consumer_tag,
                        });
                    }
                }
                Frame::RecoverOk(..) => self.inner.events.emit(
                    &self.inner.events.basic_recover_ok,
                    CallbackContext::OnBasicRecover,
                    &BasicRecoverOkEvent,
                ),
                _ => {}
            }
        }
        continuation.resolve(command);
        Ok(())
    }

    fn handle_deliver(
        &self,
        deliver: Deliver,
        header: Option<ContentHeader>,
        body: Bytes,
    ) -> Result<()> {
        let registered = lock(&self.inner.consumers)
            .get(deliver.consumer_tag())
            .cloned();
        let consumer = match registered {
            Some(consumer) => consumer,
            None => match lock(&self.inner.default_consumer).clone() {
                Some(consumer) => {
                    debug!(
                        "channel {}: no consumer '{}', use the default consumer",
                        self,
                        deliver.consumer_tag()
                    );
                    consumer
                }
                None => {
                    return Err(Error::ProtocolViolation(format!(
                        "channel {}: delivery for unknown consumer '{}' and no default consumer",
                        self,
                        deliver.consumer_tag()
                    )))
                }
            },
        };
        self.inner.dispatcher.submit(Work::Deliver {
            consumer,
            deliver,
            basic_properties: header.map(|h| h.basic_properties).unwrap_or_default(),
            content: body.to_vec(),
        });
        Ok(())
    }

    async fn handle_flow(&self, active: bool) {
        info!("channel {}: flow active = {}", self, active);
        self.inner.flow.set(active);
        if let Err(err) = self.transmit(self.inner.profile.channel_flow_ok(active)).await {
            warn!("channel {}: failed to reply flow-ok: {}", self, err);
        }
        self.inner.events.emit(
            &self.inner.events.flow_control,
            CallbackContext::OnFlowControl,
            &FlowControlEvent { active },
        );
    }

    async fn handle_peer_close(&self, close: CloseChannel) {
        warn!("channel {} closed by peer, {}", self, close);
        self.inner.dispatcher.quiesce();
        let reason = ShutdownReason::new(
            ShutdownInitiator::Peer,
            close.reply_code,
            close.reply_text.as_str(),
        )
        .with_method(close.class_id, close.method_id);
        self.set_close_reason(reason.clone());
        if let Err(err) = self.transmit(self.inner.profile.channel_close_ok()).await {
            debug!("channel {}: failed to reply close-ok: {}", self, err);
        }
        self.on_session_shutdown(reason);
    }

    async fn handle_server_cancel(&self, cancel: Cancel) {
        let consumer_tag = cancel.consumer_tag.to_string();
        info!("channel {}: consumer '{}' cancelled by broker", self, consumer_tag);
        let consumer = lock(&self.inner.consumers).remove(&consumer_tag);
        match consumer {
            Some(consumer) => self.inner.dispatcher.submit(Work::Cancel {
                consumer,
                consumer_tag: consumer_tag.clone(),
            }),
            None => debug!("channel {}: cancel for unknown consumer '{}'", self, consumer_tag),
        }
        if !cancel.no_wait {
            let cancel_ok = self.inner.profile.basic_cancel_ok(&consumer_tag);
            if let Err(err) = self.transmit(cancel_ok).await {
                warn!("channel {}: failed to reply cancel-ok: {}", self, err);
            }
        }
    }

    /// Tear the channel down: fail pending requests, wake every waiter and
    /// give each consumer its shutdown notice. Only the first call has an effect.
    pub(crate) fn on_session_shutdown(&self, reason: ShutdownReason) {
        if self.inner.shutdown_started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.dispatcher.quiesce();
        let reason = {
            let mut lifecycle = self.lifecycle();
            let reason = lifecycle.close_reason.get_or_insert(reason).clone();
            lifecycle.continuations.handle_shutdown(&reason);
            lifecycle.shutdown_notified = true;
            reason
        };
        info!("channel {} shutdown: {}", self, reason);

        self.inner.events.emit(
            &self.inner.events.shutdown,
            CallbackContext::OnModelShutdown,
            &reason,
        );
        self.inner.confirms.wake_all();
        self.inner.flow.set(true);

        let mut consumers: Vec<(String, SharedConsumer)> =
            lock(&self.inner.consumers).drain().collect();
        if let Some(consumer) = lock(&self.inner.default_consumer).take() {
            consumers.push((String::new(), consumer));
        }
        for (consumer_tag, consumer) in consumers {
            self.inner.dispatcher.submit(Work::Shutdown {
                consumer,
                consumer_tag,
                reason: reason.clone(),
            });
        }

        let channel = self.clone();
        tokio::spawn(async move {
            channel.inner.dispatcher.shutdown().await;
            let release = lock(&channel.inner.release).take();
            if let Some(release) = release {
                release(channel.channel_id());
            }
            channel.inner.closed.send_replace(true);
            debug!("channel {} closed", channel);
        });
    }
}

/// Withdraws the continuation queued by `call` unless its request was sent.
struct UnsentRequest<'a> {
    channel: &'a Channel,
    sent: bool,
}

impl<'a> UnsentRequest<'a> {
    fn new(channel: &'a Channel) -> Self {
        Self {
            channel,
            sent: false,
        }
    }

    fn sent(&mut self) {
        self.sent = true;
    }
}

impl Drop for UnsentRequest<'_> {
    fn drop(&mut self) {
        if !self.sent {
            debug!("channel {}: request not sent, withdraw its continuation", self.channel);
            self.channel.lifecycle().continuations.withdraw_last();
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.channel_id)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("channel_id", &self.inner.channel_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use amqp_wire::types::ShortStr;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::{sync::mpsc, time};

    use super::*;
    use crate::{
        api::consumer::{AsyncConsumer, ConsumerResult},
        frame::{
            Ack, Amqp091, BasicProperties, CancelOk, CloseChannelOk, ConsumeOk, DeclareQueueOk,
            Flow, FlowOk, GetEmpty, Nack, Publish, PurgeQueueOk, QosOk, SelectOk,
        },
        test_utils::{setup_logging, test_channel, test_settings, RecordingSink},
    };

    fn short(value: &str) -> ShortStr {
        value.try_into().unwrap()
    }

    async fn inbound(channel: &Channel, frame: Frame) {
        channel.handle_command(Command::new(frame)).await.unwrap();
    }

    fn delivery(consumer_tag: &str, delivery_tag: u64, body: &str) -> Command {
        let deliver = Deliver {
            consumer_tag: short(consumer_tag),
            delivery_tag,
            redelivered: false,
            exchange: short(""),
            routing_key: short("q"),
        };
        Command::with_content(
            deliver.into_frame(),
            BasicProperties::default(),
            Bytes::copy_from_slice(body.as_bytes()),
        )
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        ConsumeOk(String),
        Deliver(String, u64),
        Cancel(String),
        Shutdown(String, ShutdownInitiator),
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<Seen>,
        panic_on: Option<u64>,
    }

    impl Recorder {
        fn new(panic_on: Option<u64>) -> (Self, mpsc::UnboundedReceiver<Seen>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx, panic_on }, rx)
        }
    }

    #[async_trait]
    impl AsyncConsumer for Recorder {
        async fn consume(
            &mut self,
            _channel: &Channel,
            deliver: Deliver,
            _basic_properties: BasicProperties,
            _content: Vec<u8>,
        ) -> ConsumerResult {
            if self.panic_on == Some(deliver.delivery_tag()) {
                panic!("consumer bug at {}", deliver.delivery_tag());
            }
            self.tx
                .send(Seen::Deliver(deliver.consumer_tag().to_owned(), deliver.delivery_tag()))?;
            Ok(())
        }

        async fn consume_ok(&mut self, _channel: &Channel, consumer_tag: &str) -> ConsumerResult {
            self.tx.send(Seen::ConsumeOk(consumer_tag.to_owned()))?;
            Ok(())
        }

        async fn cancel(&mut self, _channel: &Channel, consumer_tag: &str) -> ConsumerResult {
            self.tx.send(Seen::Cancel(consumer_tag.to_owned()))?;
            Ok(())
        }

        async fn channel_shutdown(
            &mut self,
            _channel: &Channel,
            consumer_tag: &str,
            reason: &ShutdownReason,
        ) -> ConsumerResult {
            self.tx
                .send(Seen::Shutdown(consumer_tag.to_owned(), reason.initiator()))?;
            Ok(())
        }
    }

    async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    /// Subscribe `consumer` under `tag`, answering the consume request.
    async fn subscribe(
        channel: &Channel,
        sink: &RecordingSink,
        consumer: Recorder,
        tag: &str,
    ) -> String {
        let before = sink.written();
        let task = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .basic_consume(consumer, BasicConsumeArguments::new("q", ""))
                    .await
            }
        });
        sink.wait_for(before + 1).await;
        inbound(
            channel,
            ConsumeOk {
                consumer_tag: short(tag),
            }
            .into_frame(),
        )
        .await;
        task.await.unwrap().unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replies_resolve_in_request_order() {
        setup_logging();
        let (channel, sink) = test_channel();
        const N: usize = 8;
        let mut tasks = Vec::new();
        for i in 0..N {
            let channel = channel.clone();
            tasks.push(tokio::spawn(async move {
                let name = format!("q{}", i);
                let declared = channel
                    .queue_declare(QueueDeclareArguments::new(&name))
                    .await
                    .unwrap()
                    .unwrap();
                (name, declared.0)
            }));
        }
        sink.wait_for(N).await;

        // answer in wire order, echoing the requested name
        let requested: Vec<String> = sink
            .take()
            .into_iter()
            .flat_map(|(_, frames)| frames)
            .filter_map(|frame| match frame {
                Frame::DeclareQueue(_, declare) => Some(declare.queue.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(N, requested.len());
        for name in requested {
            let ok = DeclareQueueOk {
                queue: short(&name),
                message_count: 0,
                consumer_count: 0,
            };
            inbound(&channel, ok.into_frame()).await;
        }
        for task in tasks {
            let (requested, declared) = task.await.unwrap();
            assert_eq!(requested, declared);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_request_still_consumes_its_reply() {
        setup_logging();
        let sink = RecordingSink::new();
        let mut settings = test_settings();
        settings.continuation_timeout = Duration::from_millis(100);
        let channel = Channel::new(1, sink.clone(), Arc::new(Amqp091), settings);

        let result = channel.queue_purge(QueuePurgeArguments::new("q")).await;
        assert!(matches!(result, Err(Error::ContinuationTimeout)));
        assert!(channel.is_open());

        let second = tokio::spawn({
            let channel = channel.clone();
            async move { channel.queue_purge(QueuePurgeArguments::new("q")).await }
        });
        sink.wait_for(2).await;
        // late reply of the first request is discarded
        inbound(&channel, PurgeQueueOk { message_count: 1 }.into_frame()).await;
        inbound(&channel, PurgeQueueOk { message_count: 2 }.into_frame()).await;
        assert_eq!(Some(2), second.await.unwrap().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_request_dropped_before_sending_is_withdrawn() {
        setup_logging();
        let (channel, sink) = test_channel();
        sink.hold_writes();
        let dropped = time::timeout(
            Duration::from_millis(50),
            channel.queue_purge(QueuePurgeArguments::new("a")),
        )
        .await;
        assert!(dropped.is_err());
        assert!(channel.lifecycle().continuations.is_empty());
        assert_eq!(0, sink.written());

        sink.release_writes();
        let second = tokio::spawn({
            let channel = channel.clone();
            async move { channel.queue_purge(QueuePurgeArguments::new("b")).await }
        });
        sink.wait_for(1).await;
        inbound(&channel, PurgeQueueOk { message_count: 42 }.into_frame()).await;
        assert_eq!(Some(42), second.await.unwrap().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_confirm_multiple_ack() {
        setup_logging();
        let (channel, sink) = test_channel();

        let select = tokio::spawn({
            let channel = channel.clone();
            async move { channel.confirm_select(ConfirmSelectArguments::default()).await }
        });
        sink.wait_for(1).await;
        inbound(&channel, SelectOk.into_frame()).await;
        select.await.unwrap().unwrap();

        for _ in 0..3 {
            channel
                .basic_publish(
                    BasicProperties::default(),
                    b"hello".to_vec(),
                    BasicPublishArguments::new("", "q1"),
                )
                .await
                .unwrap();
        }
        assert_eq!(4, channel.next_publish_seq_no());

        inbound(
            &channel,
            Ack {
                delivery_tag: 2,
                multiple: true,
            }
            .into_frame(),
        )
        .await;
        inbound(
            &channel,
            Ack {
                delivery_tag: 3,
                multiple: false,
            }
            .into_frame(),
        )
        .await;

        let outcome = channel
            .wait_for_confirms(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            ConfirmOutcome {
                only_acks_received: true,
                timed_out: false,
            },
            outcome
        );
    }

    #[tokio::test]
    async fn test_wait_for_confirms_requires_confirm_mode() {
        let (channel, _sink) = test_channel();
        let result = channel.wait_for_confirms(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_for_confirms_or_die_closes_on_timeout() {
        setup_logging();
        let (channel, sink) = test_channel();
        channel
            .confirm_select(ConfirmSelectArguments::new(true))
            .await
            .unwrap();
        channel
            .basic_publish(
                BasicProperties::default(),
                Vec::new(),
                BasicPublishArguments::new("", "q1"),
            )
            .await
            .unwrap();

        let task = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .wait_for_confirms_or_die(Duration::from_millis(50))
                    .await
            }
        });
        // select, publish, close
        sink.wait_for(3).await;
        inbound(&channel, CloseChannelOk.into_frame()).await;
        assert!(matches!(
            task.await.unwrap(),
            Err(Error::ConfirmFailure(text)) if text == "Timed out waiting for acks"
        ));
        let reason = channel.close_reason().unwrap();
        assert_eq!("Timed out waiting for acks", reason.reply_text());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_for_confirms_or_die_closes_on_nack() {
        setup_logging();
        let (channel, sink) = test_channel();
        channel
            .confirm_select(ConfirmSelectArguments::new(true))
            .await
            .unwrap();
        for _ in 0..2 {
            channel
                .basic_publish(
                    BasicProperties::default(),
                    Vec::new(),
                    BasicPublishArguments::new("", "q1"),
                )
                .await
                .unwrap();
        }
        let mut nack = Nack::new(1);
        nack.set_requeue(false);
        inbound(&channel, nack.into_frame()).await;

        // the second publish is never confirmed, the nack still decides
        let task = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .wait_for_confirms_or_die(Duration::from_millis(50))
                    .await
            }
        });
        // select, two publishes, close
        sink.wait_for(4).await;
        inbound(&channel, CloseChannelOk.into_frame()).await;
        assert!(matches!(
            task.await.unwrap(),
            Err(Error::ConfirmFailure(text)) if text == "Nacks Received"
        ));
        assert_eq!("Nacks Received", channel.close_reason().unwrap().reply_text());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_for_confirms_on_closed_channel() {
        setup_logging();
        let (channel, _sink) = test_channel();
        channel
            .confirm_select(ConfirmSelectArguments::new(true))
            .await
            .unwrap();
        channel.abort().await.unwrap();
        channel.wait_closed().await;
        assert!(matches!(
            channel.wait_for_confirms(Duration::from_millis(50)).await,
            Err(Error::AlreadyClosed(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flow_gates_publish() {
        setup_logging();
        let (channel, sink) = test_channel();
        let flow_events = Arc::new(Mutex::new(Vec::new()));
        channel.events().flow_control.subscribe({
            let flow_events = flow_events.clone();
            move |event| flow_events.lock().unwrap().push(event.active)
        });

        inbound(&channel, Flow { active: false }.into_frame()).await;
        assert_eq!(1, sink.written());
        assert!(!channel.is_flow_active());

        let publish = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .basic_publish(
                        BasicProperties::default(),
                        b"paused".to_vec(),
                        BasicPublishArguments::new("", "q"),
                    )
                    .await
            }
        });
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(1, sink.written(), "publish transmitted while flow inactive");

        inbound(&channel, Flow { active: true }.into_frame()).await;
        publish.await.unwrap().unwrap();
        sink.wait_for(3).await;

        let methods = sink.methods();
        assert_eq!(2, methods.iter().filter(|m| **m == FlowOk::header()).count());
        assert!(methods.contains(&Publish::header()));
        assert_eq!(vec![false, true], *flow_events.lock().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_unblocks_every_waiter() {
        setup_logging();
        let (channel, sink) = test_channel();
        channel
            .confirm_select(ConfirmSelectArguments::new(true))
            .await
            .unwrap();
        channel
            .basic_publish(
                BasicProperties::default(),
                Vec::new(),
                BasicPublishArguments::new("", "q"),
            )
            .await
            .unwrap();
        inbound(&channel, Flow { active: false }.into_frame()).await;

        let rpc = tokio::spawn({
            let channel = channel.clone();
            async move { channel.queue_declare(QueueDeclareArguments::new("q")).await }
        });
        let publish = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .basic_publish(
                        BasicProperties::default(),
                        Vec::new(),
                        BasicPublishArguments::new("", "q"),
                    )
                    .await
            }
        });
        let confirms = tokio::spawn({
            let channel = channel.clone();
            async move { channel.wait_for_confirms(Duration::from_secs(30)).await }
        });
        // select, publish, flow-ok, declare
        sink.wait_for(4).await;

        let close = CloseChannel::new(406, "PRECONDITION_FAILED", 50, 10);
        inbound(&channel, close.into_frame()).await;

        let bound = Duration::from_secs(1);
        let rpc = time::timeout(bound, rpc).await.unwrap().unwrap();
        assert!(matches!(rpc, Err(Error::AlreadyClosed(_))));
        let publish = time::timeout(bound, publish).await.unwrap().unwrap();
        assert!(matches!(publish, Err(Error::AlreadyClosed(_))));
        let confirms = time::timeout(bound, confirms).await.unwrap().unwrap();
        assert!(matches!(confirms, Err(Error::AlreadyClosed(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_faulty_consumer_is_isolated() {
        setup_logging();
        let (channel, sink) = test_channel();
        let faults = Arc::new(Mutex::new(Vec::new()));
        channel.events().callback_exception.subscribe({
            let faults = faults.clone();
            move |event| faults.lock().unwrap().push(event.clone())
        });

        let (first, mut first_rx) = Recorder::new(Some(1));
        let (second, mut second_rx) = Recorder::new(None);
        assert_eq!("ctag-a", subscribe(&channel, &sink, first, "ctag-a").await);
        assert_eq!("ctag-b", subscribe(&channel, &sink, second, "ctag-b").await);
        assert_eq!(Seen::ConsumeOk("ctag-a".into()), next_seen(&mut first_rx).await);
        assert_eq!(Seen::ConsumeOk("ctag-b".into()), next_seen(&mut second_rx).await);

        for command in [
            delivery("ctag-a", 1, "boom"),
            delivery("ctag-a", 2, "fine"),
            delivery("ctag-b", 3, "fine"),
        ] {
            channel.handle_command(command).await.unwrap();
        }
        assert_eq!(Seen::Deliver("ctag-a".into(), 2), next_seen(&mut first_rx).await);
        assert_eq!(Seen::Deliver("ctag-b".into(), 3), next_seen(&mut second_rx).await);

        let faults = faults.lock().unwrap();
        assert_eq!(1, faults.len());
        assert_eq!(CallbackContext::HandleBasicDeliver, faults[0].context);
        assert_eq!(Some("ctag-a".to_owned()), faults[0].consumer_tag);
        assert_eq!("consumer bug at 1", faults[0].message);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_peer_close() {
        setup_logging();
        let (channel, sink) = test_channel();
        let released = Arc::new(Mutex::new(None));
        channel.set_release_hook(Box::new({
            let released = released.clone();
            move |id| *released.lock().unwrap() = Some(id)
        }));
        let (consumer, mut rx) = Recorder::new(None);
        subscribe(&channel, &sink, consumer, "ctag").await;
        assert_eq!(Seen::ConsumeOk("ctag".into()), next_seen(&mut rx).await);

        let notified = Arc::new(Mutex::new(Vec::new()));
        channel.on_shutdown({
            let notified = notified.clone();
            move |reason| notified.lock().unwrap().push(reason.clone())
        });

        let close = CloseChannel::new(404, "NOT_FOUND - no queue 'q'", 60, 20);
        inbound(&channel, close.into_frame()).await;
        time::timeout(Duration::from_secs(1), channel.wait_closed())
            .await
            .unwrap();

        assert_eq!(ChannelState::Closed, channel.state());
        assert_eq!(Some(CloseChannelOk::header()), sink.methods().last().copied());
        assert_eq!(
            Seen::Shutdown("ctag".into(), ShutdownInitiator::Peer),
            next_seen(&mut rx).await
        );
        let reason = channel.close_reason().unwrap();
        assert_eq!(ShutdownInitiator::Peer, reason.initiator());
        assert_eq!((404, 60, 20), (reason.reply_code(), reason.class_id(), reason.method_id()));
        assert_eq!(vec![reason.clone()], *notified.lock().unwrap());
        assert_eq!(Some(1), *released.lock().unwrap());

        // closing again is a no-op
        channel.close().await.unwrap();
        assert!(matches!(
            channel.basic_ack(BasicAckArguments::new(1, false)).await,
            Err(Error::AlreadyClosed(r)) if r == reason
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_application_close_and_late_observer() {
        setup_logging();
        let (channel, sink) = test_channel();
        let close = tokio::spawn({
            let channel = channel.clone();
            async move { channel.close_with(200, "bye").await }
        });
        sink.wait_for(1).await;
        assert_eq!(vec![CloseChannel::header()], sink.methods());
        assert_eq!(ChannelState::Closing, channel.state());

        // replies racing with the close are dropped
        inbound(&channel, QosOk.into_frame()).await;
        inbound(&channel, CloseChannelOk.into_frame()).await;
        close.await.unwrap().unwrap();
        assert_eq!(ChannelState::Closed, channel.state());

        let notified = Arc::new(Mutex::new(None));
        channel.on_shutdown({
            let notified = notified.clone();
            move |reason| *notified.lock().unwrap() = Some(reason.clone())
        });
        let reason = notified.lock().unwrap().clone().unwrap();
        assert_eq!(ShutdownInitiator::Application, reason.initiator());
        assert_eq!("bye", reason.reply_text());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_without_close_ok_times_out() {
        setup_logging();
        let (channel, _sink) = test_channel();
        time::timeout(Duration::from_secs(3), channel.close())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ChannelState::Closed, channel.state());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_on_dead_transport() {
        setup_logging();
        let (channel, sink) = test_channel();
        sink.fail_writes();
        assert!(matches!(channel.close().await, Err(Error::NetworkError(_))));
        assert_eq!(ChannelState::Closed, channel.state());
        assert!(channel.close_reason().unwrap().cause().is_some());
        channel.abort().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_server_cancel() {
        setup_logging();
        let (channel, sink) = test_channel();
        let (consumer, mut rx) = Recorder::new(None);
        subscribe(&channel, &sink, consumer, "ctag").await;
        next_seen(&mut rx).await;
        let before = sink.written();

        let cancel = Cancel {
            consumer_tag: short("ctag"),
            no_wait: false,
        };
        inbound(&channel, cancel.into_frame()).await;
        assert_eq!(Seen::Cancel("ctag".into()), next_seen(&mut rx).await);
        sink.wait_for(before + 1).await;
        assert_eq!(Some(CancelOk::header()), sink.methods().last().copied());
        assert!(channel.consumer_tags().is_empty());

        // no consumer and no default consumer for the tag any more
        let result = channel.handle_command(delivery("ctag", 9, "late")).await;
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_default_consumer_takes_unknown_tags() {
        setup_logging();
        let (channel, _sink) = test_channel();
        let (consumer, mut rx) = Recorder::new(None);
        channel.set_default_consumer(consumer);
        channel
            .handle_command(delivery("gone", 5, "orphan"))
            .await
            .unwrap();
        assert_eq!(Seen::Deliver("gone".into(), 5), next_seen(&mut rx).await);
    }

    #[tokio::test]
    async fn test_reply_without_request_is_a_violation() {
        let (channel, _sink) = test_channel();
        let result = channel
            .handle_command(Command::new(QosOk.into_frame()))
            .await;
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_basic_get_empty() {
        setup_logging();
        let (channel, sink) = test_channel();
        let get = tokio::spawn({
            let channel = channel.clone();
            async move { channel.basic_get(BasicGetArguments::new("q", true)).await }
        });
        sink.wait_for(1).await;
        inbound(&channel, GetEmpty::default().into_frame()).await;
        assert!(get.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_argument_is_rejected() {
        let (channel, sink) = test_channel();
        let name = "q".repeat(256);
        let result = channel.queue_declare(QueueDeclareArguments::new(&name)).await;
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
        assert_eq!(0, sink.written());
    }

    struct Closer;

    #[async_trait]
    impl AsyncConsumer for Closer {
        async fn consume(
            &mut self,
            channel: &Channel,
            _deliver: Deliver,
            _basic_properties: BasicProperties,
            _content: Vec<u8>,
        ) -> ConsumerResult {
            channel.close().await?;
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_consumer_may_close_its_channel() {
        setup_logging();
        let (channel, sink) = test_channel();
        channel.set_default_consumer(Closer);
        channel
            .handle_command(delivery("any", 1, "stop"))
            .await
            .unwrap();
        sink.wait_for(1).await;
        assert_eq!(vec![CloseChannel::header()], sink.methods());
        inbound(&channel, CloseChannelOk.into_frame()).await;
        time::timeout(Duration::from_secs(1), channel.wait_closed())
            .await
            .unwrap();
    }
}
