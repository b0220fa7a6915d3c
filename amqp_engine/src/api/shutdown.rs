use std::fmt;

use amqp_wire::types::{AmqpClassId, AmqpMethodId, AmqpReplyCode};

/// Who started a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownInitiator {
    /// The application closed the channel or connection.
    Application,
    /// The broker sent a close.
    Peer,
    /// The engine gave up, e.g. on a network or protocol error.
    Library,
}

/// Why a channel or connection closed. Set once, the first close wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReason {
    initiator: ShutdownInitiator,
    reply_code: AmqpReplyCode,
    reply_text: String,
    class_id: AmqpClassId,
    method_id: AmqpMethodId,
    cause: Option<String>,
}

impl ShutdownReason {
    pub fn new(initiator: ShutdownInitiator, reply_code: AmqpReplyCode, reply_text: &str) -> Self {
        Self {
            initiator,
            reply_code,
            reply_text: reply_text.to_owned(),
            class_id: 0,
            method_id: 0,
            cause: None,
        }
    }

    /// The method that caused the close, as reported in the close frame.
    pub fn with_method(mut self, class_id: AmqpClassId, method_id: AmqpMethodId) -> Self {
        self.class_id = class_id;
        self.method_id = method_id;
        self
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn initiator(&self) -> ShutdownInitiator {
        self.initiator
    }

    pub fn reply_code(&self) -> AmqpReplyCode {
        self.reply_code
    }

    pub fn reply_text(&self) -> &str {
        &self.reply_text
    }

    pub fn class_id(&self) -> AmqpClassId {
        self.class_id
    }

    pub fn method_id(&self) -> AmqpMethodId {
        self.method_id
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} shutdown, code={}, text='{}', class-id={}, method-id={}",
            self.initiator, self.reply_code, self.reply_text, self.class_id, self.method_id
        )?;
        if let Some(cause) = &self.cause {
            write!(f, ", cause: {}", cause)?;
        }
        Ok(())
    }
}
