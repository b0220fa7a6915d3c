use std::time::Duration;

use amqp_wire::types::AmqpChannelId;
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::{
    io::AsyncWriteExt,
    net::tcp::OwnedWriteHalf,
    sync::{Mutex, MutexGuard},
    time,
};
use tracing::{trace, warn};

use super::Error;
use crate::frame::Frame;

const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Writing half of the socket.
pub(crate) struct FrameWriter {
    stream: OwnedWriteHalf,
    buffer: BytesMut,
    write_timeout: Duration,
    closed: bool,
    broken: bool,
}

impl FrameWriter {
    pub fn new(stream: OwnedWriteHalf, write_timeout: Duration) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            write_timeout,
            closed: false,
            broken: false,
        }
    }

    /// A write was cut short, the stream may end inside a frame.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Encode all frames into one buffer, wait for the socket to become
    /// writable and write the buffer in one go.
    pub async fn write_frames(
        &mut self,
        channel: AmqpChannelId,
        frames: &[Frame],
    ) -> Result<usize, Error> {
        if self.closed || self.broken {
            return Err(Error::Closed);
        }
        self.buffer.clear();
        for frame in frames {
            frame.encode(channel, &mut self.buffer)?;
        }
        self.flush().await?;
        trace!("{} frames written to channel {}", frames.len(), channel);
        Ok(self.buffer.len())
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        if self.closed || self.broken {
            return Err(Error::Closed);
        }
        self.buffer.clear();
        self.buffer.extend_from_slice(bytes);
        self.flush().await?;
        Ok(bytes.len())
    }

    async fn flush(&mut self) -> Result<(), Error> {
        time::timeout(self.write_timeout, self.stream.writable())
            .await
            .map_err(|_| Error::Timeout("waiting for socket writability"))??;
        // stays set if write_all fails or is dropped midway
        self.broken = true;
        time::timeout(self.write_timeout, self.stream.write_all(&self.buffer))
            .await
            .map_err(|_| Error::Timeout("write"))??;
        self.broken = false;
        Ok(())
    }

    /// Shut the socket down. Faults after a logical close are not reported.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.stream.shutdown().await {
            trace!("socket shutdown after close: {}", err);
        }
    }
}

/// Destination of the frames a channel transmits.
#[async_trait]
pub(crate) trait FrameSink: Send + Sync {
    /// Write the frames contiguously, no other writer may interleave.
    async fn write_frame_set(&self, channel: AmqpChannelId, frames: Vec<Frame>)
        -> Result<(), Error>;
}

type BrokenHook = Box<dyn FnOnce() + Send>;

/// The transport-wide write lock around the socket writer.
pub(crate) struct SharedFrameWriter {
    inner: Mutex<FrameWriter>,
    on_broken: std::sync::Mutex<Option<BrokenHook>>,
}

impl SharedFrameWriter {
    pub fn new(writer: FrameWriter) -> Self {
        Self {
            inner: Mutex::new(writer),
            on_broken: std::sync::Mutex::new(None),
        }
    }

    /// Called once, the first time a write leaves a partial frame behind.
    pub fn on_broken<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.hook() = Some(Box::new(hook));
    }

    pub async fn close(&self) {
        self.inner.lock().await.close().await;
    }

    fn hook(&self) -> std::sync::MutexGuard<'_, Option<BrokenHook>> {
        self.on_broken
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report_broken(&self) {
        let hook = self.hook().take();
        if let Some(hook) = hook {
            warn!("frame write interrupted, the socket is unusable");
            hook();
        }
    }
}

/// Holds the write lock for one frame set. Dropping it, on success, on
/// error or mid-write, reports a broken writer.
struct WriteGuard<'a> {
    owner: &'a SharedFrameWriter,
    writer: MutexGuard<'a, FrameWriter>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if self.writer.is_broken() {
            self.owner.report_broken();
        }
    }
}

#[async_trait]
impl FrameSink for SharedFrameWriter {
    async fn write_frame_set(
        &self,
        channel: AmqpChannelId,
        frames: Vec<Frame>,
    ) -> Result<(), Error> {
        let mut guard = WriteGuard {
            owner: self,
            writer: self.inner.lock().await,
        };
        guard.writer.write_frames(channel, &frames).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::{
        net::{TcpListener, TcpStream},
        sync::oneshot,
        time,
    };

    use super::*;
    use crate::{
        frame::{ContentBody, HeartBeat},
        test_utils::setup_logging,
    };

    /// A writer whose peer accepts the connection but never reads.
    async fn stalled_writer(write_timeout: Duration) -> (FrameWriter, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (peer, _) = accepted.unwrap();
        let (_, write_half) = client.unwrap().into_split();
        (FrameWriter::new(write_half, write_timeout), peer)
    }

    fn huge_body() -> Frame {
        // far more than the socket buffers hold
        ContentBody::new(Bytes::from(vec![0u8; 64 << 20])).into_frame()
    }

    #[tokio::test]
    async fn test_timed_out_write_breaks_the_writer() {
        setup_logging();
        let (writer, _peer) = stalled_writer(Duration::from_millis(200)).await;
        let shared = SharedFrameWriter::new(writer);
        let (tx, rx) = oneshot::channel();
        shared.on_broken(move || {
            tx.send(()).ok();
        });

        assert!(matches!(
            shared.write_frame_set(1, vec![huge_body()]).await,
            Err(Error::Timeout(_))
        ));
        time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            shared.write_frame_set(0, vec![HeartBeat.into_frame()]).await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn test_dropped_write_breaks_the_writer() {
        setup_logging();
        let (writer, _peer) = stalled_writer(Duration::from_secs(10)).await;
        let shared = SharedFrameWriter::new(writer);
        let (tx, rx) = oneshot::channel();
        shared.on_broken(move || {
            tx.send(()).ok();
        });

        let write = shared.write_frame_set(1, vec![huge_body()]);
        assert!(time::timeout(Duration::from_millis(100), write)
            .await
            .is_err());
        time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            shared.write_frame_set(0, vec![HeartBeat.into_frame()]).await,
            Err(Error::Closed)
        ));
    }
}
