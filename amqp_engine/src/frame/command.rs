//! A command is one method frame plus, for content-bearing methods, a
//! content header and the body. On the wire the body is split into
//! body frames no larger than the negotiated frame size allows.
use amqp_wire::{constants::FRAME_ENVELOPE_SIZE, types::LongUint};
use bytes::{Bytes, BytesMut};

use std::sync::Arc;

use super::{
    Amqp091, BasicProperties, ContentBody, ContentHeader, ContentHeaderCommon, Error, Frame,
    ProtocolProfile,
};

#[derive(Debug)]
pub struct Command {
    method: Frame,
    header: Option<ContentHeader>,
    body: Vec<Bytes>,
}

impl Command {
    pub fn new(method: Frame) -> Self {
        debug_assert!(method.is_method(), "command must start with a method frame");
        Self {
            method,
            header: None,
            body: Vec::new(),
        }
    }

    /// Content-bearing command. The header `body_size` is set when framing.
    pub fn with_content(method: Frame, basic_properties: BasicProperties, body: Bytes) -> Self {
        let header = ContentHeader::new(
            ContentHeaderCommon {
                class: content_class(&method),
                weight: 0,
                body_size: 0,
            },
            basic_properties,
        );
        Self {
            method,
            header: Some(header),
            body: vec![body],
        }
    }

    /// Inverse of [`into_parts`](Command::into_parts).
    pub fn from_parts(method: Frame, header: Option<ContentHeader>, body: Bytes) -> Self {
        let mut command = Self::new(method);
        command.header = header;
        command.append_body_fragment(body);
        command
    }

    pub fn method(&self) -> &Frame {
        &self.method
    }

    pub fn header(&self) -> Option<&ContentHeader> {
        self.header.as_ref()
    }

    pub fn append_body_fragment(&mut self, fragment: Bytes) {
        if !fragment.is_empty() {
            self.body.push(fragment);
        }
    }

    pub fn body_len(&self) -> usize {
        self.body.iter().map(Bytes::len).sum()
    }

    /// Join the body fragments into one buffer. Calling it again returns the
    /// same bytes without copying.
    pub fn consolidate_body(&mut self) -> Bytes {
        match self.body.len() {
            0 => Bytes::new(),
            1 => self.body[0].clone(),
            _ => {
                let mut joined = BytesMut::with_capacity(self.body_len());
                for fragment in self.body.drain(..) {
                    joined.extend_from_slice(&fragment);
                }
                let joined = joined.freeze();
                self.body.push(joined.clone());
                joined
            }
        }
    }

    pub fn into_parts(mut self) -> (Frame, Option<ContentHeader>, Bytes) {
        let body = self.consolidate_body();
        (self.method, self.header, body)
    }

    /// Split into the frames that go on the wire.
    ///
    /// Each body frame carries at most `frame_max - 8` bytes (at least one);
    /// `frame_max == 0` puts the whole body in a single frame and an empty
    /// body produces no body frame at all.
    pub fn into_frames(self, frame_max: LongUint) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(2);
        self.push_frames(frame_max, &mut frames);
        frames
    }

    /// Frames of several commands, in order, for a single write.
    pub fn batch_into_frames(
        commands: impl IntoIterator<Item = Command>,
        frame_max: LongUint,
    ) -> Vec<Frame> {
        let mut frames = Vec::new();
        for command in commands {
            command.push_frames(frame_max, &mut frames);
        }
        frames
    }

    fn push_frames(self, frame_max: LongUint, frames: &mut Vec<Frame>) {
        let has_content = self.method.has_content();
        let class = content_class(&self.method);
        let (method, header, body) = self.into_parts();
        frames.push(method);
        if !has_content && header.is_none() {
            return;
        }

        // a content-bearing method always carries a header, even without properties
        let mut header = header.unwrap_or_else(|| {
            ContentHeader::new(
                ContentHeaderCommon {
                    class,
                    weight: 0,
                    body_size: 0,
                },
                BasicProperties::default(),
            )
        });
        header.common.body_size = body.len() as u64;
        frames.push(header.into_frame());

        if body.is_empty() {
            return;
        }
        let segment = body_segment_size(frame_max, body.len());
        let mut offset = 0;
        while offset < body.len() {
            let end = (offset + segment).min(body.len());
            frames.push(ContentBody::new(body.slice(offset..end)).into_frame());
            offset = end;
        }
    }
}

fn content_class(method: &Frame) -> u16 {
    method
        .method_header()
        .map(|h| h.class_id())
        .unwrap_or_default()
}

fn body_segment_size(frame_max: LongUint, body_len: usize) -> usize {
    if frame_max == 0 {
        body_len.max(1)
    } else {
        (frame_max as usize).saturating_sub(FRAME_ENVELOPE_SIZE).max(1)
    }
}

#[derive(Debug)]
enum AssemblyState {
    ExpectingMethod,
    ExpectingHeader(Command),
    ExpectingBody { command: Command, remaining: u64 },
}

/// Reassembles inbound frames of one channel into commands.
#[derive(Debug)]
pub struct CommandAssembler {
    profile: Arc<dyn ProtocolProfile>,
    state: AssemblyState,
}

impl Default for CommandAssembler {
    fn default() -> Self {
        Self::new(Arc::new(Amqp091))
    }
}

impl CommandAssembler {
    pub fn new(profile: Arc<dyn ProtocolProfile>) -> Self {
        Self {
            profile,
            state: AssemblyState::ExpectingMethod,
        }
    }

    /// Whether a command is partially assembled.
    pub fn in_progress(&self) -> bool {
        !matches!(self.state, AssemblyState::ExpectingMethod)
    }

    /// Feed one frame. Return the command once its last frame arrived.
    pub fn handle_frame(&mut self, frame: Frame) -> Result<Option<Command>, Error> {
        let state = std::mem::replace(&mut self.state, AssemblyState::ExpectingMethod);
        match (state, frame) {
            (AssemblyState::ExpectingMethod, frame) if frame.is_method() => {
                let has_content = frame
                    .method_header()
                    .map_or(false, |header| self.profile.is_content_bearing(header));
                let command = Command::new(frame);
                if has_content {
                    self.state = AssemblyState::ExpectingHeader(command);
                    Ok(None)
                } else {
                    Ok(Some(command))
                }
            }
            (AssemblyState::ExpectingHeader(mut command), Frame::ContentHeader(header)) => {
                let remaining = header.body_size();
                command.header = Some(header);
                if remaining == 0 {
                    Ok(Some(command))
                } else {
                    self.state = AssemblyState::ExpectingBody { command, remaining };
                    Ok(None)
                }
            }
            (
                AssemblyState::ExpectingBody {
                    mut command,
                    remaining,
                },
                Frame::ContentBody(body),
            ) => {
                let len = body.len() as u64;
                if len > remaining {
                    return Err(Error::UnexpectedFrame(format!(
                        "body frame of {} bytes exceeds the {} bytes remaining",
                        len, remaining
                    )));
                }
                command.append_body_fragment(body.inner);
                let remaining = remaining - len;
                if remaining == 0 {
                    Ok(Some(command))
                } else {
                    self.state = AssemblyState::ExpectingBody { command, remaining };
                    Ok(None)
                }
            }
            (AssemblyState::ExpectingMethod, frame) => Err(Error::UnexpectedFrame(format!(
                "expected method frame, got frame type {}",
                frame.frame_type()
            ))),
            (AssemblyState::ExpectingHeader(_), frame) => Err(Error::UnexpectedFrame(format!(
                "expected content header, got frame type {}",
                frame.frame_type()
            ))),
            (AssemblyState::ExpectingBody { .. }, frame) => Err(Error::UnexpectedFrame(format!(
                "expected content body, got frame type {}",
                frame.frame_type()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::frame::{Deliver, Publish, QosOk};

    fn publish() -> Frame {
        Publish::new("amq.direct".try_into().unwrap(), "rk".try_into().unwrap()).into_frame()
    }

    fn body_sizes(frames: &[Frame]) -> Vec<usize> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::ContentBody(b) => Some(b.len()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_body_segmentation() {
        let body = Bytes::from(vec![7u8; 10_000]);
        let frames =
            Command::with_content(publish(), BasicProperties::default(), body).into_frames(4096);
        assert_eq!(5, frames.len());
        assert_eq!(vec![4088, 4088, 1824], body_sizes(&frames));
        match &frames[1] {
            Frame::ContentHeader(h) => {
                assert_eq!(10_000, h.body_size());
                assert_eq!(60, h.common.class);
            }
            other => panic!("unexpected frame {}", other),
        }
    }

    #[test]
    fn test_exact_multiple_of_segment() {
        let body = Bytes::from(vec![0u8; 2 * 4088]);
        let frames =
            Command::with_content(publish(), BasicProperties::default(), body).into_frames(4096);
        assert_eq!(vec![4088, 4088], body_sizes(&frames));
    }

    #[test]
    fn test_empty_body_has_no_body_frame() {
        let frames = Command::with_content(publish(), BasicProperties::default(), Bytes::new())
            .into_frames(4096);
        assert_eq!(2, frames.len());
        assert!(matches!(&frames[1], Frame::ContentHeader(h) if h.body_size() == 0));
    }

    #[test]
    fn test_unlimited_frame_max() {
        let body = Bytes::from(vec![1u8; 100_000]);
        let frames =
            Command::with_content(publish(), BasicProperties::default(), body).into_frames(0);
        assert_eq!(vec![100_000], body_sizes(&frames));
    }

    #[test]
    fn test_tiny_frame_max_still_progresses() {
        let body = Bytes::from_static(b"abc");
        let frames =
            Command::with_content(publish(), BasicProperties::default(), body).into_frames(8);
        assert_eq!(vec![1, 1, 1], body_sizes(&frames));
    }

    #[test]
    fn test_method_only_command() {
        let frames = Command::new(QosOk.into_frame()).into_frames(4096);
        assert_eq!(1, frames.len());
    }

    #[test]
    fn test_consolidate_body_is_idempotent() {
        let mut command = Command::new(publish());
        assert!(command.consolidate_body().is_empty());
        command.append_body_fragment(Bytes::from_static(b"hello "));
        command.append_body_fragment(Bytes::from_static(b"world"));
        let first = command.consolidate_body();
        let second = command.consolidate_body();
        assert_eq!(&b"hello world"[..], &first[..]);
        assert_eq!(first, second);
        assert_eq!(11, command.body_len());
    }

    #[test]
    fn test_batch_frames_keep_order() {
        let commands = (0..3).map(|i| {
            Command::with_content(
                publish(),
                BasicProperties::default(),
                Bytes::from(vec![i as u8; 5]),
            )
        });
        let frames = Command::batch_into_frames(commands, 4096);
        assert_eq!(9, frames.len());
        for (i, chunk) in frames.chunks(3).enumerate() {
            assert!(matches!(chunk[0], Frame::Publish(..)));
            match &chunk[2] {
                Frame::ContentBody(b) => assert_eq!(&[i as u8; 5][..], b.as_bytes()),
                other => panic!("unexpected frame {}", other),
            }
        }
    }

    fn deliver() -> Frame {
        Deliver {
            consumer_tag: "ctag".try_into().unwrap(),
            delivery_tag: 1,
            redelivered: false,
            exchange: "".try_into().unwrap(),
            routing_key: "q".try_into().unwrap(),
        }
        .into_frame()
    }

    #[test]
    fn test_reassembly_round_trip() {
        let body = Bytes::from(vec![9u8; 9000]);
        let frames = Command::with_content(
            deliver(),
            BasicProperties::default().with_message_id("m1").finish(),
            body.clone(),
        )
        .into_frames(4096);

        let mut assembler = CommandAssembler::default();
        let mut done = None;
        for frame in frames {
            assert!(done.is_none());
            done = assembler.handle_frame(frame).unwrap();
        }
        let (method, header, content) = done.unwrap().into_parts();
        assert!(matches!(method, Frame::Deliver(..)));
        assert_eq!(Some("m1"), header.unwrap().basic_properties.message_id());
        assert_eq!(body, content);
        assert!(!assembler.in_progress());
    }

    #[test]
    fn test_zero_body_completes_at_header() {
        let mut frames =
            Command::with_content(deliver(), BasicProperties::default(), Bytes::new())
                .into_frames(4096)
                .into_iter();
        let mut assembler = CommandAssembler::default();
        assert!(assembler.handle_frame(frames.next().unwrap()).unwrap().is_none());
        let command = assembler.handle_frame(frames.next().unwrap()).unwrap().unwrap();
        assert_eq!(0, command.body_len());
    }

    #[test]
    fn test_out_of_order_frames() {
        let mut assembler = CommandAssembler::default();
        let body = ContentBody::new(vec![1u8]).into_frame();
        assert!(matches!(
            assembler.handle_frame(body),
            Err(Error::UnexpectedFrame(_))
        ));

        assembler.handle_frame(deliver()).unwrap();
        assert!(matches!(
            assembler.handle_frame(deliver()),
            Err(Error::UnexpectedFrame(_))
        ));
    }

    #[test]
    fn test_body_overrun() {
        let mut frames = Command::with_content(
            deliver(),
            BasicProperties::default(),
            Bytes::from_static(b"abc"),
        )
        .into_frames(4096)
        .into_iter();
        let mut assembler = CommandAssembler::default();
        assembler.handle_frame(frames.next().unwrap()).unwrap();
        assembler.handle_frame(frames.next().unwrap()).unwrap();
        let oversized = ContentBody::new(vec![0u8; 4]).into_frame();
        assert!(matches!(
            assembler.handle_frame(oversized),
            Err(Error::UnexpectedFrame(_))
        ));
    }
}
