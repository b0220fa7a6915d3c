//! Pending synchronous requests of one channel.
//!
//! AMQP 0-9-1 replies carry no correlation id, so the next reply on a
//! channel always answers the oldest request still waiting.
use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::{
    api::{consumer::SharedConsumer, error::Error, shutdown::ShutdownReason, Result},
    frame::{Command, MethodHeader},
};

/// Reply method(s) a request accepts.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Expected {
    Reply(&'static MethodHeader),
    /// `basic.get` is answered by `get-ok` or `get-empty`.
    Either(&'static MethodHeader, &'static MethodHeader),
}

impl Expected {
    pub fn accepts(&self, header: &MethodHeader) -> bool {
        match self {
            Expected::Reply(expected) => *expected == header,
            Expected::Either(first, second) => *first == header || *second == header,
        }
    }
}

pub(crate) type Responder = oneshot::Sender<Result<Command>>;

/// One outstanding request. Resolved exactly once, by a reply or by shutdown.
pub(crate) struct Continuation {
    expected: Expected,
    /// Registered under the tag of the `consume-ok` reply.
    consumer: Option<SharedConsumer>,
    responder: Responder,
}

impl Continuation {
    pub fn new(
        expected: Expected,
        consumer: Option<SharedConsumer>,
    ) -> (Self, oneshot::Receiver<Result<Command>>) {
        let (responder, rx) = oneshot::channel();
        (
            Self {
                expected,
                consumer,
                responder,
            },
            rx,
        )
    }

    pub fn expected(&self) -> Expected {
        self.expected
    }

    pub fn consumer(&self) -> Option<&SharedConsumer> {
        self.consumer.as_ref()
    }

    /// Hand the reply to the waiting caller. A reply of the wrong method
    /// resolves the request with `UnexpectedReply`.
    pub fn resolve(self, reply: Command) {
        let accepted = reply
            .method()
            .method_header()
            .map_or(false, |header| self.expected.accepts(header));
        let result = if accepted {
            Ok(reply)
        } else {
            Err(Error::UnexpectedReply(format!(
                "expected {:?}, got {}",
                self.expected,
                reply.method()
            )))
        };
        // the caller may have given up waiting
        let _ = self.responder.send(result);
    }

    pub fn fail(self, err: Error) {
        let _ = self.responder.send(Err(err));
    }
}

#[derive(Default)]
pub(crate) struct ContinuationQueue {
    queue: VecDeque<Continuation>,
}

impl ContinuationQueue {
    pub fn enqueue(&mut self, continuation: Continuation) {
        self.queue.push_back(continuation);
    }

    /// Oldest pending request.
    pub fn next(&mut self) -> Option<Continuation> {
        self.queue.pop_front()
    }

    /// Take back the request enqueued last, when it could not be transmitted.
    pub fn withdraw_last(&mut self) -> Option<Continuation> {
        self.queue.pop_back()
    }

    /// Resolve every pending request with the shutdown reason.
    pub fn handle_shutdown(&mut self, reason: &ShutdownReason) {
        for continuation in self.queue.drain(..) {
            continuation.fail(Error::AlreadyClosed(reason.clone()));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
