use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use amqp_wire::types::AmqpChannelId;
use async_trait::async_trait;
use tokio::{sync::watch, time};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    api::channel::{Channel, ChannelSettings},
    frame::{Amqp091, Frame, MethodHeader},
    net::{Error, FrameSink},
};

//////////////////////////////////////////////////////////////////
// construct a subscriber that prints formatted traces to stdout
pub fn setup_logging() {
    // global subscriber with log level according to RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Frame sink that keeps every frame set a channel writes.
pub struct RecordingSink {
    written: Mutex<Vec<(AmqpChannelId, Vec<Frame>)>>,
    count: watch::Sender<usize>,
    failing: AtomicBool,
    held: watch::Sender<bool>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        let (count, _) = watch::channel(0);
        let (held, _) = watch::channel(false);
        Arc::new(Self {
            written: Mutex::new(Vec::new()),
            count,
            failing: AtomicBool::new(false),
            held,
        })
    }

    /// Make following writes wait, like a socket that is not writable.
    pub fn hold_writes(&self) {
        self.held.send_replace(true);
    }

    pub fn release_writes(&self) {
        self.held.send_replace(false);
    }

    /// Make every following write fail like a dead socket.
    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Number of frame sets written so far.
    pub fn written(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until at least `n` frame sets were written.
    pub async fn wait_for(&self, n: usize) {
        let mut rx = self.count.subscribe();
        time::timeout(Duration::from_secs(5), rx.wait_for(|count| *count >= n))
            .await
            .expect("timed out waiting for transmissions")
            .expect("sink dropped");
    }

    /// Headers of all method frames written, in order.
    pub fn methods(&self) -> Vec<&'static MethodHeader> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, frames)| frames.iter().filter_map(Frame::method_header))
            .collect()
    }

    /// Remove and return everything written so far.
    pub fn take(&self) -> Vec<(AmqpChannelId, Vec<Frame>)> {
        std::mem::take(&mut *self.written.lock().unwrap())
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn write_frame_set(
        &self,
        channel: AmqpChannelId,
        frames: Vec<Frame>,
    ) -> Result<(), Error> {
        let mut held = self.held.subscribe();
        held.wait_for(|held| !*held).await.ok();
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::NetworkIoError("connection reset by peer".to_owned()));
        }
        self.written.lock().unwrap().push((channel, frames));
        self.count.send_modify(|count| *count += 1);
        Ok(())
    }
}

pub fn test_settings() -> ChannelSettings {
    ChannelSettings {
        frame_max: 4096,
        continuation_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_secs(1),
    }
}

/// An open channel wired to a recording sink, with no broker behind it.
pub fn test_channel() -> (Channel, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let channel = Channel::new(1, sink.clone(), Arc::new(Amqp091), test_settings());
    (channel, sink)
}
