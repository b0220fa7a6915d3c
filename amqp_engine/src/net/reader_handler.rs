use std::{collections::HashMap, sync::Arc};

use amqp_wire::{
    constants::{
        DEFAULT_CONN_CHANNEL, FRAME_ERROR, INTERNAL_ERROR, REPLY_SUCCESS, UNEXPECTED_FRAME,
    },
    types::{AmqpChannelId, AmqpReplyCode},
};
use tracing::{debug, error, info, trace, warn};

use super::{Error, FrameReader, FrameSink};
use crate::{
    api::{
        connection::Connection,
        events::{CallbackContext, ConnectionBlockedEvent, ConnectionUnblockedEvent},
        shutdown::{ShutdownInitiator, ShutdownReason},
    },
    frame::{self, Close, Command, CommandAssembler, Frame, ProtocolProfile},
};

/// What the reader task does after a frame.
enum Next {
    Read,
    Exit,
}

/// The connection's reader task: reads frames, assembles them into commands
/// per channel and hands every command to its channel.
pub(crate) struct ReaderHandler {
    reader: FrameReader,
    connection: Connection,
    profile: Arc<dyn ProtocolProfile>,
    assemblers: HashMap<AmqpChannelId, CommandAssembler>,
}

impl ReaderHandler {
    pub fn new(
        reader: FrameReader,
        connection: Connection,
        profile: Arc<dyn ProtocolProfile>,
    ) -> Self {
        Self {
            reader,
            connection,
            profile,
            assemblers: HashMap::new(),
        }
    }

    pub async fn run_until_shutdown(mut self) {
        loop {
            let result = match self.reader.read_frame().await {
                Ok((channel_id, frame)) => self.handle_frame(channel_id, frame).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(Next::Read) => continue,
                Ok(Next::Exit) => break,
                Err(err) => {
                    self.handle_error(err).await;
                    break;
                }
            }
        }
        debug!("reader task exits");
    }

    async fn handle_frame(&mut self, channel_id: AmqpChannelId, frame: Frame) -> Result<Next, Error> {
        if channel_id == DEFAULT_CONN_CHANNEL {
            return self.handle_connection_frame(frame).await;
        }
        if let Frame::HeartBeat(_) = frame {
            return Err(Error::Framing(frame::Error::UnexpectedFrame(format!(
                "heartbeat on channel {}",
                channel_id
            ))));
        }

        let Some(channel) = self.connection.channel(channel_id) else {
            debug!("no channel {}, discard frame {}", channel_id, frame);
            self.assemblers.remove(&channel_id);
            return Ok(Next::Read);
        };
        let profile = self.profile.clone();
        let assembler = self
            .assemblers
            .entry(channel_id)
            .or_insert_with(|| CommandAssembler::new(profile));
        let Some(command) = assembler.handle_frame(frame)? else {
            return Ok(Next::Read);
        };
        channel
            .handle_command(command)
            .await
            .map_err(|err| Error::Framing(frame::Error::UnexpectedFrame(err.to_string())))?;
        Ok(Next::Read)
    }

    async fn handle_connection_frame(&mut self, frame: Frame) -> Result<Next, Error> {
        match frame {
            Frame::HeartBeat(_) => {
                trace!("heartbeat received");
                Ok(Next::Read)
            }
            Frame::Close(_, close) => {
                self.handle_close(close).await;
                Ok(Next::Exit)
            }
            Frame::CloseOk(..) => {
                debug!("connection close-ok received");
                let reason =
                    ShutdownReason::new(ShutdownInitiator::Application, REPLY_SUCCESS, "Goodbye");
                self.connection.teardown(reason);
                Ok(Next::Exit)
            }
            Frame::Blocked(_, blocked) => {
                warn!("connection blocked by broker: {}", blocked.reason);
                let events = self.connection.events();
                let event = ConnectionBlockedEvent {
                    reason: blocked.reason.to_string(),
                };
                events.emit(&events.blocked, CallbackContext::OnConnectionBlocked, &event);
                Ok(Next::Read)
            }
            Frame::Unblocked(..) => {
                info!("connection unblocked by broker");
                let events = self.connection.events();
                events.emit(
                    &events.unblocked,
                    CallbackContext::OnConnectionUnblocked,
                    &ConnectionUnblockedEvent,
                );
                Ok(Next::Read)
            }
            other => Err(Error::Framing(frame::Error::UnexpectedFrame(format!(
                "{} on channel 0",
                other
            )))),
        }
    }

    async fn handle_close(&self, close: Close) {
        warn!("connection closed by broker: {}", close);
        if let Err(err) = self.transmit(self.profile.connection_close_ok()).await {
            debug!("failed to reply connection close-ok: {}", err);
        }
        let reason = ShutdownReason::new(
            ShutdownInitiator::Peer,
            close.reply_code,
            close.reply_text.as_str(),
        )
        .with_method(close.class_id, close.method_id);
        self.connection.teardown(reason);
    }

    async fn handle_error(&self, err: Error) {
        let closing = !self.connection.is_open();
        let (reply_code, text) = match &err {
            Error::Framing(frame_err) => {
                error!("protocol violation, closing connection: {}", frame_err);
                (reply_code_of(frame_err), frame_err.to_string())
            }
            Error::Timeout(_) => {
                warn!("connection read failed: {}", err);
                (INTERNAL_ERROR, err.to_string())
            }
            Error::PeerShutdown | Error::NetworkIoError(_) | Error::Closed => {
                if closing {
                    debug!("connection read ended after close: {}", err);
                } else {
                    warn!("connection lost: {}", err);
                }
                let reason = ShutdownReason::new(
                    ShutdownInitiator::Library,
                    INTERNAL_ERROR,
                    "connection lost",
                )
                .with_cause(&err);
                self.connection.teardown(reason);
                return;
            }
        };

        if !closing {
            let close = self.profile.connection_close(reply_code, &text, 0, 0);
            if let Err(err) = self.transmit(close).await {
                debug!("failed to send connection close: {}", err);
            }
        }
        let reason = ShutdownReason::new(ShutdownInitiator::Library, reply_code, &text)
            .with_cause(&err);
        self.connection.teardown(reason);
    }

    async fn transmit(&self, command: Command) -> Result<(), Error> {
        let frames = command.into_frames(self.connection.frame_max());
        self.connection
            .writer()
            .write_frame_set(DEFAULT_CONN_CHANNEL, frames)
            .await
    }
}

/// Reply code of the `connection.close` sent for a framing fault.
fn reply_code_of(err: &frame::Error) -> AmqpReplyCode {
    match err {
        frame::Error::UnexpectedFrame(_) | frame::Error::UnknownMethod(_) => UNEXPECTED_FRAME,
        _ => FRAME_ERROR,
    }
}
