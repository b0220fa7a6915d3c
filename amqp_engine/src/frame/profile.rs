use std::fmt;

use amqp_wire::types::{AmqpClassId, AmqpMethodId, AmqpReplyCode};

use super::{
    Cancel, CancelOk, Close, CloseChannel, CloseChannelOk, CloseOk, Command, Flow, FlowOk,
    MethodHeader, OpenChannel, ProtocolHeader,
};

/// Version specific knowledge the engine needs to drive a channel: the
/// protocol header, which methods carry content, and the handful of
/// commands the engine sends on its own.
pub trait ProtocolProfile: fmt::Debug + Send + Sync {
    fn protocol_header(&self) -> ProtocolHeader;

    fn is_content_bearing(&self, method: &MethodHeader) -> bool;

    fn channel_open(&self) -> Command;

    fn channel_close(
        &self,
        reply_code: AmqpReplyCode,
        reply_text: &str,
        class_id: AmqpClassId,
        method_id: AmqpMethodId,
    ) -> Command;

    fn channel_close_ok(&self) -> Command;

    fn channel_flow_ok(&self, active: bool) -> Command;

    fn basic_cancel_ok(&self, consumer_tag: &str) -> Command;

    fn connection_close(
        &self,
        reply_code: AmqpReplyCode,
        reply_text: &str,
        class_id: AmqpClassId,
        method_id: AmqpMethodId,
    ) -> Command;

    fn connection_close_ok(&self) -> Command;
}

/// AMQP 0-9-1
#[derive(Debug, Default, Clone, Copy)]
pub struct Amqp091;

impl ProtocolProfile for Amqp091 {
    fn protocol_header(&self) -> ProtocolHeader {
        ProtocolHeader::new(0, 9, 1)
    }

    fn is_content_bearing(&self, method: &MethodHeader) -> bool {
        method.class_id() == 60 && matches!(method.method_id(), 40 | 50 | 60 | 71)
    }

    fn channel_open(&self) -> Command {
        Command::new(OpenChannel::default().into_frame())
    }

    fn channel_close(
        &self,
        reply_code: AmqpReplyCode,
        reply_text: &str,
        class_id: AmqpClassId,
        method_id: AmqpMethodId,
    ) -> Command {
        Command::new(CloseChannel::new(reply_code, reply_text, class_id, method_id).into_frame())
    }

    fn channel_close_ok(&self) -> Command {
        Command::new(CloseChannelOk.into_frame())
    }

    fn channel_flow_ok(&self, active: bool) -> Command {
        Command::new(FlowOk { active }.into_frame())
    }

    fn basic_cancel_ok(&self, consumer_tag: &str) -> Command {
        let consumer_tag = super::truncated_short_str(consumer_tag);
        Command::new(CancelOk { consumer_tag }.into_frame())
    }

    fn connection_close(
        &self,
        reply_code: AmqpReplyCode,
        reply_text: &str,
        class_id: AmqpClassId,
        method_id: AmqpMethodId,
    ) -> Command {
        Command::new(Close::new(reply_code, reply_text, class_id, method_id).into_frame())
    }

    fn connection_close_ok(&self) -> Command {
        Command::new(CloseOk.into_frame())
    }
}

/// Whether `method` is one the peer may send at any time, as opposed to a
/// reply to an outstanding synchronous request.
pub fn is_asynchronous(header: &MethodHeader) -> bool {
    [
        Flow::header(),
        CloseChannel::header(),
        CloseChannelOk::header(),
        Cancel::header(),
        super::Deliver::header(),
        super::Ack::header(),
        super::Nack::header(),
        super::Return::header(),
    ]
    .contains(&header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Deliver, Frame, GetOk, Publish, QosOk, Return};

    #[test]
    fn test_content_bearing_methods() {
        let profile = Amqp091;
        for header in [
            Publish::header(),
            Return::header(),
            Deliver::header(),
            GetOk::header(),
        ] {
            assert!(profile.is_content_bearing(header), "{}", header);
        }
        assert!(!profile.is_content_bearing(QosOk::header()));
        assert!(!profile.is_content_bearing(CloseChannel::header()));
    }

    #[test]
    fn test_close_command() {
        let command = Amqp091.channel_close(406, "PRECONDITION_FAILED", 50, 10);
        match command.method() {
            Frame::CloseChannel(_, close) => {
                assert_eq!(406, close.reply_code);
                assert_eq!("PRECONDITION_FAILED", close.reply_text.as_str());
                assert_eq!((50, 10), (close.class_id, close.method_id));
            }
            other => panic!("unexpected frame {}", other),
        }
    }

    #[test]
    fn test_asynchronous_classification() {
        assert!(is_asynchronous(Flow::header()));
        assert!(is_asynchronous(Cancel::header()));
        assert!(!is_asynchronous(CancelOk::header()));
        assert!(!is_asynchronous(FlowOk::header()));
    }
}
