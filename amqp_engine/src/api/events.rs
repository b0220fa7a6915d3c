//! Observer lists for channel and connection events.
//!
//! Handlers run synchronously on the task that raised the event (usually the
//! connection's reader task), so they must be quick and must not block. A
//! panicking handler does not stop the others; the fault is reported through
//! the channel's `callback_exception` observers.
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use amqp_wire::types::AmqpDeliveryTag;
use bytes::Bytes;
use tracing::{error, warn};

use super::shutdown::ShutdownReason;
use crate::frame::{BasicProperties, Return};

pub type HandlerId = u64;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Subscribers of one event kind.
pub struct EventHandlers<T> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
}

impl<T> Default for EventHandlers<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<T> fmt::Debug for EventHandlers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> EventHandlers<T> {
    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(handler)));
        id
    }

    /// `false` if no handler has this id.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every handler. Return the panic messages of the handlers that failed.
    pub(crate) fn emit(&self, event: &T) -> Vec<String> {
        // handlers may subscribe or unsubscribe while being called
        let snapshot: Vec<Handler<T>> = self.lock().iter().map(|(_, h)| h.clone()).collect();
        snapshot
            .into_iter()
            .filter_map(|handler| {
                panic::catch_unwind(AssertUnwindSafe(|| handler(event)))
                    .err()
                    .map(|payload| panic_message(payload.as_ref()))
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(HandlerId, Handler<T>)>> {
        // handlers never run under this lock
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with non-string payload".to_owned()
    }
}

/// Where a user callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackContext {
    OnBasicAck,
    OnBasicNack,
    OnBasicReturn,
    OnFlowControl,
    OnBasicRecover,
    OnModelShutdown,
    OnConnectionBlocked,
    OnConnectionUnblocked,
    OnConnectionShutdown,
    HandleBasicDeliver,
    HandleBasicConsumeOk,
    HandleBasicCancel,
    HandleBasicCancelOk,
    HandleModelShutdown,
}

impl fmt::Display for CallbackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicAckEvent {
    pub delivery_tag: AmqpDeliveryTag,
    pub multiple: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicNackEvent {
    pub delivery_tag: AmqpDeliveryTag,
    pub multiple: bool,
    pub requeue: bool,
}

/// A mandatory or immediate publish the broker could not route.
#[derive(Debug, Clone)]
pub struct BasicReturnEvent {
    pub ret: Return,
    pub basic_properties: BasicProperties,
    pub content: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlEvent {
    /// `false` while publishing is paused.
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicRecoverOkEvent;

/// A consumer or an event handler failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackExceptionEvent {
    pub context: CallbackContext,
    pub consumer_tag: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBlockedEvent {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionUnblockedEvent;

/// Observer lists of a [`Channel`](super::channel::Channel).
///
/// Shutdown observers are registered through
/// [`Channel::on_shutdown`](super::channel::Channel::on_shutdown).
#[derive(Debug, Default)]
pub struct ChannelEvents {
    pub basic_ack: EventHandlers<BasicAckEvent>,
    pub basic_nack: EventHandlers<BasicNackEvent>,
    pub basic_return: EventHandlers<BasicReturnEvent>,
    pub flow_control: EventHandlers<FlowControlEvent>,
    pub basic_recover_ok: EventHandlers<BasicRecoverOkEvent>,
    pub callback_exception: EventHandlers<CallbackExceptionEvent>,
    pub(crate) shutdown: EventHandlers<ShutdownReason>,
}

impl ChannelEvents {
    pub(crate) fn emit<T>(&self, handlers: &EventHandlers<T>, context: CallbackContext, event: &T) {
        for message in handlers.emit(event) {
            self.report(CallbackExceptionEvent {
                context,
                consumer_tag: None,
                message,
            });
        }
    }

    pub(crate) fn report(&self, event: CallbackExceptionEvent) {
        warn!(
            "callback failed in {}, consumer tag {:?}: {}",
            event.context, event.consumer_tag, event.message
        );
        for message in self.callback_exception.emit(&event) {
            error!("callback exception handler panicked: {}", message);
        }
    }
}

/// Observer lists of a [`Connection`](super::connection::Connection).
#[derive(Debug, Default)]
pub struct ConnectionEvents {
    pub blocked: EventHandlers<ConnectionBlockedEvent>,
    pub unblocked: EventHandlers<ConnectionUnblockedEvent>,
    pub shutdown: EventHandlers<ShutdownReason>,
}

impl ConnectionEvents {
    pub(crate) fn emit<T>(&self, handlers: &EventHandlers<T>, context: CallbackContext, event: &T) {
        for message in handlers.emit(event) {
            error!("connection event handler failed in {}: {}", context, message);
        }
    }
}
