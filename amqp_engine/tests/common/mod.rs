#![allow(dead_code)]
use std::{collections::HashMap, time::Duration};

use amqp_engine::{
    frame::{Command, CommandAssembler, Frame, OpenChannelOk},
    net::AddressFamily,
    Channel, Connection, ConnectionOptions, Endpoint, FrameTransport, TransportOptions,
    TuneParameters,
};
use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const FRAME_MAX: u32 = 4096;

// construct a subscriber that prints formatted traces to stdout
pub fn setup_logging() {
    // global subscriber with log level according to RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Broker side of a test connection, driven frame by frame by the test.
pub struct FakeBroker {
    stream: TcpStream,
    buffer: BytesMut,
    assemblers: HashMap<u16, CommandAssembler>,
}

impl FakeBroker {
    pub async fn read_frame(&mut self) -> (u16, Frame) {
        loop {
            if let Some((len, channel, frame)) = Frame::decode(&self.buffer, FRAME_MAX).unwrap() {
                self.buffer.advance(len);
                return (channel, frame);
            }
            let read = time::timeout(Duration::from_secs(5), self.stream.read_buf(&mut self.buffer))
                .await
                .expect("client sent nothing")
                .unwrap();
            assert!(read > 0, "client closed the socket");
        }
    }

    /// Next complete command, on any channel.
    pub async fn read_command(&mut self) -> (u16, Command) {
        loop {
            let (channel, frame) = self.read_frame().await;
            let assembler = self.assemblers.entry(channel).or_default();
            if let Some(command) = assembler.handle_frame(frame).unwrap() {
                return (channel, command);
            }
        }
    }

    pub async fn send(&mut self, channel: u16, frames: Vec<Frame>) {
        let mut buf = BytesMut::new();
        for frame in frames {
            frame.encode(channel, &mut buf).unwrap();
        }
        self.send_raw(&buf).await;
    }

    pub async fn send_command(&mut self, channel: u16, command: Command) {
        self.send(channel, command.into_frames(FRAME_MAX)).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Wait until the client shuts its side of the socket down.
    pub async fn expect_eof(&mut self) {
        let mut rest = Vec::new();
        time::timeout(Duration::from_secs(5), self.stream.read_to_end(&mut rest))
            .await
            .expect("socket still open")
            .ok();
    }

    pub async fn close(mut self) {
        self.stream.shutdown().await.ok();
    }
}

/// A started connection and the broker end of its socket. The protocol
/// header is exchanged, connection negotiation is skipped.
pub async fn connect() -> (Connection, FakeBroker) {
    connect_with(ConnectionOptions::default()).await
}

pub async fn connect_with(options: ConnectionOptions) -> (Connection, FakeBroker) {
    connect_using(TransportOptions::default(), options).await
}

pub async fn connect_using(
    transport_options: TransportOptions,
    options: ConnectionOptions,
) -> (Connection, FakeBroker) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let endpoint = Endpoint::new("127.0.0.1", port)
        .address_family(AddressFamily::V4)
        .finish();

    let (transport, accepted) = tokio::join!(
        FrameTransport::connect(&endpoint, &transport_options),
        listener.accept()
    );
    let mut transport = transport.unwrap();
    let (stream, _) = accepted.unwrap();
    let mut broker = FakeBroker {
        stream,
        buffer: BytesMut::new(),
        assemblers: HashMap::new(),
    };

    transport.send_protocol_header().await.unwrap();
    let mut header = [0u8; 8];
    broker.stream.read_exact(&mut header).await.unwrap();
    assert_eq!(b"AMQP\x00\x00\x09\x01", &header);

    let connection = Connection::start(transport, TuneParameters::new(0, FRAME_MAX, 0), options);
    (connection, broker)
}

/// Open a channel and answer its `channel.open`.
pub async fn open_channel(connection: &Connection, broker: &mut FakeBroker) -> Channel {
    let (channel, _) = tokio::join!(connection.open_channel(None), async {
        let (channel_id, command) = broker.read_command().await;
        assert!(matches!(command.method(), Frame::OpenChannel(..)));
        broker
            .send(channel_id, vec![OpenChannelOk::default().into_frame()])
            .await;
    });
    let channel = channel.unwrap();
    assert!(channel.is_open());
    channel
}
