use std::{fmt, net::SocketAddr, time::Duration};

use amqp_wire::types::{AmqpChannelId, LongUint};
use bytes::{Buf, BytesMut};
use tokio::{
    io::AsyncReadExt,
    net::{lookup_host, tcp::OwnedReadHalf, TcpStream},
    time,
};
use tracing::{debug, trace};

use super::{Error, FrameWriter};
use crate::{
    api,
    frame::{Frame, ProtocolHeader},
};

const DEFAULT_BUFFER_SIZE: usize = 8192;
const DEFAULT_AMQP_PORT: u16 = 5672;

/// Restricts which address family `connect` may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    /// IPv6 first, then IPv4.
    #[default]
    Any,
    V4,
    V6,
}

/// Where and how to reach the broker.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
    pub protocol: ProtocolHeader,
    pub address_family: AddressFamily,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_owned(),
            port,
            virtual_host: "/".to_owned(),
            protocol: ProtocolHeader::default(),
            address_family: AddressFamily::Any,
        }
    }

    pub fn virtual_host(&mut self, virtual_host: &str) -> &mut Self {
        self.virtual_host = virtual_host.to_owned();
        self
    }

    pub fn protocol(&mut self, protocol: ProtocolHeader) -> &mut Self {
        self.protocol = protocol;
        self
    }

    pub fn address_family(&mut self, family: AddressFamily) -> &mut Self {
        self.address_family = family;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_AMQP_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "amqp://{}:{}{}", self.host, self.port, self.virtual_host)
    }
}

/// Socket level timeouts.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Bound for each connect attempt.
    pub connection_timeout: Duration,
    /// `None` waits for inbound data forever.
    pub read_timeout: Option<Duration>,
    /// Bound for waiting on writability and for writing a frame set.
    pub write_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            read_timeout: None,
            write_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportOptions {
    pub fn connection_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn read_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.write_timeout = timeout;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

/// Reading half of the socket with its frame buffer.
pub(crate) struct FrameReader {
    stream: OwnedReadHalf,
    buffer: BytesMut,
    frame_max: LongUint,
    read_timeout: Option<Duration>,
}

impl FrameReader {
    pub fn set_frame_max(&mut self, frame_max: LongUint) {
        self.frame_max = frame_max;
    }

    /// Read one complete frame. Frames already buffered are returned
    /// without touching the socket.
    pub async fn read_frame(&mut self) -> Result<(AmqpChannelId, Frame), Error> {
        loop {
            if let Some((len, channel, frame)) = Frame::decode(&self.buffer, self.frame_max)? {
                self.buffer.advance(len);
                return Ok((channel, frame));
            }

            let read = self.stream.read_buf(&mut self.buffer);
            let len = match self.read_timeout {
                Some(timeout) => time::timeout(timeout, read)
                    .await
                    .map_err(|_| Error::Timeout("read"))??,
                None => read.await?,
            };
            if len == 0 {
                return if self.buffer.is_empty() {
                    Err(Error::PeerShutdown)
                } else {
                    Err(Error::NetworkIoError(format!(
                        "connection closed with {} bytes of an incomplete frame",
                        self.buffer.len()
                    )))
                };
            }
            trace!("{} bytes read from network", len);
        }
    }
}

/// One TCP connection to the broker, before it is handed to a
/// [`Connection`](crate::api::connection::Connection).
///
/// Bootstrap code uses it to send the protocol header and exchange the
/// connection negotiation methods frame by frame.
pub struct FrameTransport {
    reader: FrameReader,
    writer: FrameWriter,
    endpoint: Endpoint,
    peer_addr: SocketAddr,
}

impl FrameTransport {
    /// Resolve the endpoint and connect, trying IPv6 addresses before IPv4
    /// ones unless the endpoint is pinned to a family.
    pub async fn connect(endpoint: &Endpoint, options: &TransportOptions) -> api::Result<Self> {
        let (stream, peer_addr) = connect_stream(endpoint, options.connection_timeout)
            .await
            .map_err(|err| {
                api::Error::ConnectFailure(format!("{}: {}", endpoint, err))
            })?;
        // latency matters more than packet count for RPC frames
        stream.set_nodelay(true).map_err(|err| api::Error::ConnectFailure(err.to_string()))?;
        debug!("connected to {} at {}", endpoint, peer_addr);

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FrameReader {
                stream: read_half,
                buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
                frame_max: 0,
                read_timeout: options.read_timeout,
            },
            writer: FrameWriter::new(write_half, options.write_timeout),
            endpoint: endpoint.clone(),
            peer_addr,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Upper bound for inbound frames, zero for none. Set after tuning.
    pub fn set_frame_max(&mut self, frame_max: LongUint) {
        self.reader.set_frame_max(frame_max);
    }

    pub async fn send_protocol_header(&mut self) -> api::Result<()> {
        let header = self.endpoint.protocol.to_bytes();
        self.writer.write_raw(&header).await?;
        Ok(())
    }

    pub async fn read_frame(&mut self) -> api::Result<(AmqpChannelId, Frame)> {
        Ok(self.reader.read_frame().await?)
    }

    pub async fn write_frame(&mut self, channel: AmqpChannelId, frame: Frame) -> api::Result<usize> {
        Ok(self.writer.write_frames(channel, &[frame]).await?)
    }

    /// Write all frames with a single socket write.
    pub async fn write_frame_set(
        &mut self,
        channel: AmqpChannelId,
        frames: Vec<Frame>,
    ) -> api::Result<usize> {
        Ok(self.writer.write_frames(channel, &frames).await?)
    }

    pub async fn close(mut self) {
        self.writer.close().await;
    }

    pub(crate) fn into_split(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}

async fn connect_stream(
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr), Error> {
    let resolved: Vec<SocketAddr> =
        time::timeout(timeout, lookup_host((endpoint.host.as_str(), endpoint.port)))
            .await
            .map_err(|_| Error::Timeout("name resolution"))??
            .collect();

    let v6 = resolved.iter().filter(|a| a.is_ipv6());
    let v4 = resolved.iter().filter(|a| a.is_ipv4());
    let candidates: Vec<SocketAddr> = match endpoint.address_family {
        AddressFamily::Any => v6.chain(v4).copied().collect(),
        AddressFamily::V6 => v6.copied().collect(),
        AddressFamily::V4 => v4.copied().collect(),
    };
    if candidates.is_empty() {
        return Err(Error::NetworkIoError(format!(
            "no {:?} address found for '{}'",
            endpoint.address_family, endpoint.host
        )));
    }

    let mut last_error = Error::NetworkIoError("no address attempted".to_owned());
    for addr in candidates {
        match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok((stream, addr)),
            Ok(Err(err)) => {
                debug!("connect to {} failed: {}", addr, err);
                last_error = err.into();
            }
            Err(_) => {
                debug!("connect to {} timed out", addr);
                last_error = Error::Timeout("connect");
            }
        }
    }
    Err(last_error)
}
