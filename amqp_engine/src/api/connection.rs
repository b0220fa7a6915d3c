//! Multiplexes channels over one negotiated [`FrameTransport`].
//!
//! Connection negotiation (`start`/`tune`/`open`) happens before
//! [`Connection::start`]; the connection takes over the transport, spawns
//! the reader task and hands out channels.
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
    constants::{DEFAULT_CONN_CHANNEL, INTERNAL_ERROR, REPLY_SUCCESS},
    types::{AmqpChannelId, LongUint, ShortUint},
};
use tokio::{sync::watch, task::JoinHandle, time};
use tracing::{debug, info, warn};

use super::{
    channel::{Channel, ChannelSettings},
    error::Error,
    events::{CallbackContext, ConnectionEvents},
    shutdown::{ShutdownInitiator, ShutdownReason},
    Result,
};
use crate::{
    frame::{Amqp091, ProtocolProfile},
    net::{ChannelIdRepository, FrameSink, FrameTransport, ReaderHandler, SharedFrameWriter},
};

/// Values agreed with the broker in `connection.tune`/`tune-ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuneParameters {
    /// Highest usable channel number, 0 for no limit.
    pub channel_max: ShortUint,
    /// Largest frame in bytes, 0 for no limit.
    pub frame_max: LongUint,
    /// Heartbeat interval in seconds, 0 for none.
    pub heartbeat: ShortUint,
}

impl TuneParameters {
    pub fn new(channel_max: ShortUint, frame_max: LongUint, heartbeat: ShortUint) -> Self {
        Self {
            channel_max,
            frame_max,
            heartbeat,
        }
    }
}

impl Default for TuneParameters {
    fn default() -> Self {
        Self::new(2047, 131_072, 60)
    }
}

/// Timeouts of the connection and of the channels it opens.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Bound on the wait for the reply of a synchronous request.
    pub continuation_timeout: Duration,
    /// Bound on the `channel.close` handshake.
    pub channel_close_timeout: Duration,
    /// Bound on the `connection.close` handshake.
    pub connection_close_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            continuation_timeout: Duration::from_secs(20),
            channel_close_timeout: Duration::from_secs(10),
            connection_close_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionOptions {
    pub fn continuation_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.continuation_timeout = timeout;
        self
    }

    pub fn channel_close_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.channel_close_timeout = timeout;
        self
    }

    pub fn connection_close_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connection_close_timeout = timeout;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

pub(crate) struct ConnectionInner {
    writer: Arc<SharedFrameWriter>,
    profile: Arc<dyn ProtocolProfile>,
    tune: TuneParameters,
    options: ConnectionOptions,
    channels: Mutex<HashMap<AmqpChannelId, Channel>>,
    channel_ids: Mutex<ChannelIdRepository>,
    events: ConnectionEvents,
    close_reason: Mutex<Option<ShutdownReason>>,
    torn_down: AtomicBool,
    closed: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionInner {
    fn release_channel(&self, channel_id: AmqpChannelId) {
        lock(&self.channels).remove(&channel_id);
        lock(&self.channel_ids).release(channel_id);
        debug!("channel {} released", channel_id);
    }
}

/// An AMQP connection carrying any number of channels.
///
/// Cheap to clone, all clones share the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Connection {
    /// Take over a transport on which the connection is already open and
    /// start reading from it. Must be called within a tokio runtime.
    pub fn start(
        transport: FrameTransport,
        tune: TuneParameters,
        options: ConnectionOptions,
    ) -> Self {
        Self::start_with_profile(transport, tune, options, Arc::new(Amqp091))
    }

    pub fn start_with_profile(
        mut transport: FrameTransport,
        tune: TuneParameters,
        options: ConnectionOptions,
        profile: Arc<dyn ProtocolProfile>,
    ) -> Self {
        transport.set_frame_max(tune.frame_max);
        let (reader, writer) = transport.into_split();
        let (closed, _) = watch::channel(false);
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                writer: Arc::new(SharedFrameWriter::new(writer)),
                profile: profile.clone(),
                tune,
                options,
                channels: Mutex::new(HashMap::new()),
                channel_ids: Mutex::new(ChannelIdRepository::new(tune.channel_max)),
                events: ConnectionEvents::default(),
                close_reason: Mutex::new(None),
                torn_down: AtomicBool::new(false),
                closed,
                reader: Mutex::new(None),
            }),
        };
        let weak = Arc::downgrade(&connection.inner);
        connection.inner.writer.on_broken(move || {
            // teardown needs a runtime to spawn on
            if tokio::runtime::Handle::try_current().is_err() {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                let reason = ShutdownReason::new(
                    ShutdownInitiator::Library,
                    INTERNAL_ERROR,
                    "frame write interrupted",
                );
                Connection { inner }.teardown(reason);
            }
        });
        let handler = ReaderHandler::new(reader, connection.clone(), profile);
        let handle = tokio::spawn(handler.run_until_shutdown());
        *lock(&connection.inner.reader) = Some(handle);
        info!("connection started, {:?}", tune);
        connection
    }

    pub fn events(&self) -> &ConnectionEvents {
        &self.inner.events
    }

    pub fn tune(&self) -> TuneParameters {
        self.inner.tune
    }

    pub fn frame_max(&self) -> LongUint {
        self.inner.tune.frame_max
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.close_reason).is_none()
    }

    pub fn close_reason(&self) -> Option<ShutdownReason> {
        lock(&self.inner.close_reason).clone()
    }

    pub(crate) fn profile(&self) -> &Arc<dyn ProtocolProfile> {
        &self.inner.profile
    }

    pub(crate) fn writer(&self) -> &Arc<SharedFrameWriter> {
        &self.inner.writer
    }

    pub(crate) fn channel(&self, channel_id: AmqpChannelId) -> Option<Channel> {
        lock(&self.inner.channels).get(&channel_id).cloned()
    }

    /// Open a channel, on `channel_id` if given, else on the lowest free number.
    pub async fn open_channel(&self, channel_id: Option<AmqpChannelId>) -> Result<Channel> {
        if let Some(reason) = self.close_reason() {
            return Err(Error::AlreadyClosed(reason));
        }
        let channel_id = {
            let mut ids = lock(&self.inner.channel_ids);
            match channel_id {
                Some(id) if ids.reserve(id) => id,
                Some(id) => {
                    return Err(Error::InvalidOperation(format!(
                        "channel {} is in use or out of range",
                        id
                    )))
                }
                None => ids.allocate().ok_or_else(|| {
                    Error::InvalidOperation("all channel numbers are in use".to_owned())
                })?,
            }
        };

        let settings = ChannelSettings {
            frame_max: self.inner.tune.frame_max,
            continuation_timeout: self.inner.options.continuation_timeout,
            close_timeout: self.inner.options.channel_close_timeout,
        };
        let channel = Channel::new(
            channel_id,
            self.inner.writer.clone(),
            self.inner.profile.clone(),
            settings,
        );
        let connection = Arc::downgrade(&self.inner);
        channel.set_release_hook(Box::new(move |channel_id| {
            if let Some(connection) = connection.upgrade() {
                connection.release_channel(channel_id);
            }
        }));
        lock(&self.inner.channels).insert(channel_id, channel.clone());

        // a teardown may have run between the check above and the insert
        if let Some(reason) = self.close_reason() {
            if self.inner.torn_down.load(Ordering::Acquire) {
                channel.on_session_shutdown(reason.clone());
                return Err(Error::AlreadyClosed(reason));
            }
        }

        if let Err(err) = channel.open().await {
            warn!("failed to open channel {}: {}", channel_id, err);
            let reason = ShutdownReason::new(
                ShutdownInitiator::Library,
                REPLY_SUCCESS,
                "channel open failed",
            )
            .with_cause(&err);
            channel.on_session_shutdown(reason);
            return Err(err);
        }
        Ok(channel)
    }

    /// Close the connection with reply code 200 and wait for the broker's
    /// `close-ok`, at most the connection close timeout. Closing a closed
    /// connection is a no-op.
    pub async fn close(&self) -> Result<()> {
        let reason = ShutdownReason::new(ShutdownInitiator::Application, REPLY_SUCCESS, "Goodbye");
        let first = {
            let mut close_reason = lock(&self.inner.close_reason);
            if close_reason.is_none() {
                *close_reason = Some(reason.clone());
                true
            } else {
                false
            }
        };
        let mut result = Ok(());
        if first {
            debug!("close connection: {}", reason);
            let close = self
                .inner
                .profile
                .connection_close(REPLY_SUCCESS, "Goodbye", 0, 0)
                .into_frames(self.inner.tune.frame_max);
            if let Err(err) = self
                .inner
                .writer
                .write_frame_set(DEFAULT_CONN_CHANNEL, close)
                .await
            {
                let err = Error::from(err);
                self.teardown(reason.clone().with_cause(&err));
                result = Err(err);
            }
        }
        if time::timeout(self.inner.options.connection_close_timeout, self.wait_closed())
            .await
            .is_err()
        {
            warn!("connection close handshake timed out");
            self.teardown(reason);
        }
        let reader = lock(&self.inner.reader).take();
        if let Some(reader) = reader {
            reader.abort();
        }
        result
    }

    /// Resolve once the connection is torn down.
    pub async fn wait_closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Shut every channel down with `reason` and close the socket.
    /// Only the first call has an effect.
    pub(crate) fn teardown(&self, reason: ShutdownReason) {
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let reason = lock(&self.inner.close_reason)
            .get_or_insert(reason)
            .clone();
        info!("connection shutdown: {}", reason);

        let channels: Vec<Channel> = lock(&self.inner.channels).values().cloned().collect();
        for channel in channels {
            channel.on_session_shutdown(reason.clone());
        }
        self.inner.events.emit(
            &self.inner.events.shutdown,
            CallbackContext::OnConnectionShutdown,
            &reason,
        );
        self.inner.closed.send_replace(true);

        let writer = self.inner.writer.clone();
        tokio::spawn(async move { writer.close().await });
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("tune", &self.inner.tune)
            .field("open", &self.is_open())
            .finish()
    }
}
