//! AMQP 0-9-1 frames: the method catalogue, content header, content body and
//! heartbeat, plus encoding/decoding of the frame envelope.
//!
//! Envelope layout: `type (1) | channel (2) | payload size (4) | payload | 0xCE`.
use amqp_wire::{
    constants::{
        FRAME_CONTENT_BODY, FRAME_CONTENT_HEADER, FRAME_END, FRAME_ENVELOPE_SIZE,
        FRAME_HEADER_SIZE, FRAME_HEARTBEAT, FRAME_METHOD,
    },
    from_bytes, to_buffer,
    types::{AmqpChannelId, LongUint, Octect, ShortUint},
};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

////////////////////////////////////////////////////////////////////////
// macros should appear before module declaration
#[macro_use]
mod helpers {
    // common interfaces of each method type
    macro_rules! impl_method_frame {
        ($name:ident, $class_id:literal, $method_id:literal) => {
            impl $name {
                pub fn header() -> &'static MethodHeader {
                    static __METHOD_HEADER: MethodHeader = MethodHeader::new($class_id, $method_id);
                    &__METHOD_HEADER
                }
                pub fn into_frame(self) -> Frame {
                    Frame::$name(Self::header(), self)
                }
            }
        };
    }

    macro_rules! impl_frame {
    ($($class_id:literal => $($method_id:literal : $method:ident),+);+) => {
        fn decode_method_frame(header: MethodHeader, content: &[u8]) -> Result<Frame, Error> {
            match header.class_id() {
                $($class_id => {
                    match header.method_id() {
                        $($method_id => Ok(from_bytes::<$method>(content)?.into_frame()),)+
                        _ => Err(Error::UnknownMethod(header)),
                    }
                })+
                _ => Err(Error::UnknownMethod(header)),
            }
        }

        $($(impl_method_frame!{$method, $class_id, $method_id})+)+

        /// One frame payload. Method variants carry their static header so the
        /// class and method ids are known without matching on the variant.
        #[derive(Debug)]
        pub enum Frame {
            $($($method(&'static MethodHeader, $method),)+)+

            HeartBeat(HeartBeat),
            ContentHeader(ContentHeader),
            ContentBody(ContentBody),
        }

        impl Frame {
            /// Header of a method frame, `None` for the other frame types.
            pub fn method_header(&self) -> Option<&'static MethodHeader> {
                match self {
                    $($(Frame::$method(header, _) => Some(*header),)+)+
                    _ => None,
                }
            }

            fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), Error> {
                match self {
                    $($(Frame::$method(header, method) => {
                        to_buffer(*header, buf)?;
                        to_buffer(method, buf)?;
                    })+)+
                    Frame::HeartBeat(_) => {}
                    Frame::ContentHeader(header) => {
                        to_buffer(header, buf)?;
                    }
                    Frame::ContentBody(body) => buf.put_slice(&body.inner),
                }
                Ok(())
            }
        }
    };
}
}
///////////////////////////////////////////////////////////
mod command;
mod content_body;
mod content_header;
mod error;
mod method;
mod profile;
mod protocol_header;

pub use command::*;
pub use content_body::*;
pub use content_header::*;
pub use error::*;
pub use method::*;
pub use profile::*;
pub use protocol_header::*;

/////////////////////////////////////////////////////////////////
impl_frame! {
    // == Connection ==
    10 =>   10: Start,
            11: StartOk,
            20: Secure,
            21: SecureOk,
            30: Tune,
            31: TuneOk,
            40: Open,
            41: OpenOk,
            50: Close,
            51: CloseOk,
            60: Blocked,
            61: Unblocked;
    // == Channel ==
    20 =>   10: OpenChannel,
            11: OpenChannelOk,
            20: Flow,
            21: FlowOk,
            40: CloseChannel,
            41: CloseChannelOk;
    // == Exchange ==
    40 =>   10: Declare,
            11: DeclareOk,
            20: Delete,
            21: DeleteOk,
            30: Bind,
            31: BindOk,
            40: Unbind,
            51: UnbindOk;
    // == Queue ==
    50 =>   10: DeclareQueue,
            11: DeclareQueueOk,
            20: BindQueue,
            21: BindQueueOk,
            30: PurgeQueue,
            31: PurgeQueueOk,
            40: DeleteQueue,
            41: DeleteQueueOk,
            50: UnbindQueue,
            51: UnbindQueueOk;
    // == Basic ==
    60 =>   10: Qos,
            11: QosOk,
            20: Consume,
            21: ConsumeOk,
            30: Cancel,
            31: CancelOk,
            40: Publish,
            50: Return,
            60: Deliver,
            70: Get,
            71: GetOk,
            72: GetEmpty,
            80: Ack,
            90: Reject,
            100: RecoverAsync,
            110: Recover,
            111: RecoverOk,
            120: Nack;
    // == Confirm ==
    85 =>   10: Select,
            11: SelectOk;
    // == Transaction ==
    90 =>   10: SelectTx,
            11: SelectTxOk,
            20: Commit,
            21: CommitOk,
            30: Rollback,
            31: RollbackOk
}

//////////////////////////////////////////////////////////////////////

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct FrameHeader {
    pub frame_type: Octect, // 1: method, 2: content-header, 3: content-body, 8: heartbeat
    pub channel: ShortUint,
    pub payload_size: LongUint,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat;

impl HeartBeat {
    pub fn into_frame(self) -> Frame {
        Frame::HeartBeat(self)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Frame {
    pub fn frame_type(&self) -> Octect {
        match self {
            Frame::HeartBeat(_) => FRAME_HEARTBEAT,
            Frame::ContentHeader(_) => FRAME_CONTENT_HEADER,
            Frame::ContentBody(_) => FRAME_CONTENT_BODY,
            _ => FRAME_METHOD,
        }
    }

    pub fn is_method(&self) -> bool {
        self.frame_type() == FRAME_METHOD
    }

    /// Whether this method is followed by a content header and body frames.
    pub fn has_content(&self) -> bool {
        self.method_header()
            .map_or(false, |header| Amqp091.is_content_bearing(header))
    }

    /// Append the complete frame, envelope included, to `buf`.
    ///
    /// Return the number of bytes written.
    pub fn encode(&self, channel: AmqpChannelId, buf: &mut BytesMut) -> Result<usize, Error> {
        let start = buf.len();
        buf.put_u8(self.frame_type());
        buf.put_u16(channel);
        // payload size is patched once the payload is written
        buf.put_u32(0);
        self.encode_payload(buf)?;

        let payload_size = buf.len() - start - FRAME_HEADER_SIZE;
        let size = LongUint::try_from(payload_size).map_err(|_| Error::TooLarge {
            size: payload_size,
            max: LongUint::MAX,
        })?;
        buf[start + 3..start + FRAME_HEADER_SIZE].copy_from_slice(&size.to_be_bytes());
        buf.put_u8(FRAME_END);
        Ok(buf.len() - start)
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// `frame_max` is the negotiated maximum frame size including the envelope,
    /// zero means unlimited. Return `Ok(None)` if `buf` does not hold a complete
    /// frame yet, otherwise the number of bytes consumed, the channel id and the frame.
    pub fn decode(
        buf: &[u8],
        frame_max: LongUint,
    ) -> Result<Option<(usize, AmqpChannelId, Frame)>, Error> {
        let header = match buf.get(0..FRAME_HEADER_SIZE) {
            Some(s) => s,
            None => return Ok(None),
        };
        let FrameHeader {
            frame_type,
            channel,
            payload_size,
        } = from_bytes(header)?;

        // reject before buffering the payload
        let total_size = payload_size as usize + FRAME_ENVELOPE_SIZE;
        if frame_max > 0 && total_size > frame_max as usize {
            return Err(Error::TooLarge {
                size: total_size,
                max: frame_max,
            });
        }
        if total_size > buf.len() {
            return Ok(None);
        }
        if buf[total_size - 1] != FRAME_END {
            return Err(Error::Corrupted);
        }

        let payload = &buf[FRAME_HEADER_SIZE..total_size - 1];
        let frame = match frame_type {
            FRAME_METHOD => {
                if payload.len() < 4 {
                    return Err(Error::Corrupted);
                }
                let header: MethodHeader = from_bytes(&payload[..4])?;
                decode_method_frame(header, &payload[4..])?
            }
            FRAME_HEARTBEAT => Frame::HeartBeat(HeartBeat),
            FRAME_CONTENT_HEADER => {
                if payload.len() < 12 {
                    return Err(Error::Corrupted);
                }
                let common: ContentHeaderCommon = from_bytes(&payload[..12])?;
                let basic_properties: BasicProperties = from_bytes(&payload[12..])?;
                Frame::ContentHeader(ContentHeader::new(common, basic_properties))
            }
            FRAME_CONTENT_BODY => Frame::ContentBody(ContentBody::new(Bytes::copy_from_slice(payload))),
            _ => return Err(Error::Corrupted),
        };
        Ok(Some((total_size, channel, frame)))
    }
}
