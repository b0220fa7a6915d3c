//! Runs consumer callbacks off the connection's reader task.
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use futures::FutureExt;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, trace};

use super::Channel;
use crate::{
    api::{
        consumer::{ConsumerResult, SharedConsumer},
        events::{panic_message, CallbackContext, CallbackExceptionEvent},
        shutdown::ShutdownReason,
    },
    frame::{BasicProperties, Deliver},
};

tokio::task_local! {
    /// Channel id whose dispatch task is the current task.
    static DISPATCHING_CHANNEL: u16;
}

/// Whether the caller runs inside the consumer dispatch task of `channel_id`.
pub(crate) fn in_dispatch_task(channel_id: u16) -> bool {
    DISPATCHING_CHANNEL
        .try_with(|id| *id == channel_id)
        .unwrap_or(false)
}

pub(crate) enum Work {
    ConsumeOk {
        consumer: SharedConsumer,
        consumer_tag: String,
    },
    Deliver {
        consumer: SharedConsumer,
        deliver: Deliver,
        basic_properties: BasicProperties,
        content: Vec<u8>,
    },
    Cancel {
        consumer: SharedConsumer,
        consumer_tag: String,
    },
    CancelOk {
        consumer: SharedConsumer,
        consumer_tag: String,
    },
    Shutdown {
        consumer: SharedConsumer,
        consumer_tag: String,
        reason: ShutdownReason,
    },
}

impl Work {
    fn context(&self) -> CallbackContext {
        match self {
            Work::ConsumeOk { .. } => CallbackContext::HandleBasicConsumeOk,
            Work::Deliver { .. } => CallbackContext::HandleBasicDeliver,
            Work::Cancel { .. } => CallbackContext::HandleBasicCancel,
            Work::CancelOk { .. } => CallbackContext::HandleBasicCancelOk,
            Work::Shutdown { .. } => CallbackContext::HandleModelShutdown,
        }
    }

    fn consumer_tag(&self) -> &str {
        match self {
            Work::Deliver { deliver, .. } => deliver.consumer_tag(),
            Work::ConsumeOk { consumer_tag, .. }
            | Work::Cancel { consumer_tag, .. }
            | Work::CancelOk { consumer_tag, .. }
            | Work::Shutdown { consumer_tag, .. } => consumer_tag,
        }
    }

    async fn execute(self, channel: &Channel) -> ConsumerResult {
        match self {
            Work::ConsumeOk {
                consumer,
                consumer_tag,
            } => consumer.lock().await.consume_ok(channel, &consumer_tag).await,
            Work::Deliver {
                consumer,
                deliver,
                basic_properties,
                content,
            } => {
                consumer
                    .lock()
                    .await
                    .consume(channel, deliver, basic_properties, content)
                    .await
            }
            Work::Cancel {
                consumer,
                consumer_tag,
            } => consumer.lock().await.cancel(channel, &consumer_tag).await,
            Work::CancelOk {
                consumer,
                consumer_tag,
            } => consumer.lock().await.cancel_ok(channel, &consumer_tag).await,
            Work::Shutdown {
                consumer,
                consumer_tag,
                reason,
            } => {
                consumer
                    .lock()
                    .await
                    .channel_shutdown(channel, &consumer_tag, &reason)
                    .await
            }
        }
    }
}

/// Per channel work queue executed by one task, in submission order.
pub(crate) struct ConsumerDispatcher {
    tx: Mutex<Option<UnboundedSender<Work>>>,
    rx: Mutex<Option<UnboundedReceiver<Work>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    quiesced: AtomicBool,
}

impl ConsumerDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            handle: Mutex::new(None),
            quiesced: AtomicBool::new(false),
        }
    }

    /// Spawn the dispatch task. Work submitted earlier is kept.
    pub fn start(&self, channel: Channel) {
        let Some(rx) = lock(&self.rx).take() else {
            return;
        };
        let channel_id = channel.channel_id();
        let handle = tokio::spawn(DISPATCHING_CHANNEL.scope(channel_id, run(channel, rx)));
        *lock(&self.handle) = Some(handle);
    }

    /// Queue one unit of work. Anything but a shutdown notice is dropped
    /// once the dispatcher is quiesced.
    pub fn submit(&self, work: Work) {
        if self.is_quiesced() && !matches!(work, Work::Shutdown { .. }) {
            trace!(
                "dispatcher quiesced, drop {} for consumer '{}'",
                work.context(),
                work.consumer_tag()
            );
            return;
        }
        match lock(&self.tx).as_ref() {
            Some(tx) => {
                if tx.send(work).is_err() {
                    debug!("dispatch task is gone, work dropped");
                }
            }
            None => debug!("dispatcher shut down, work dropped"),
        }
    }

    pub fn quiesce(&self) {
        self.quiesced.store(true, Ordering::Release);
    }

    pub fn is_quiesced(&self) -> bool {
        self.quiesced.load(Ordering::Acquire)
    }

    /// Stop accepting work, let the queued work finish and wait for the task.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        self.quiesce();
        lock(&self.tx).take();
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                debug!("dispatch task ended abnormally: {}", err);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run(channel: Channel, mut rx: UnboundedReceiver<Work>) {
    trace!("dispatch task of channel {} started", channel);
    while let Some(work) = rx.recv().await {
        let context = work.context();
        let consumer_tag = work.consumer_tag().to_owned();
        let fault = match AssertUnwindSafe(work.execute(&channel)).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(message) = fault {
            channel.events().report(CallbackExceptionEvent {
                context,
                consumer_tag: Some(consumer_tag),
                message,
            });
        }
    }
    trace!("dispatch task of channel {} exits", channel);
}
