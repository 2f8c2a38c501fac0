use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::*;

/// A sequenced system message. Sequence numbers start at 1 per association
/// incarnation; the payload is an opaque serialized system message.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessageEnvelope {
    pub seq_no: u64,
    pub ack_reply_to: UniqueAddress,
    pub message: Bytes,
}

/// makes SystemMessageEnvelope printable
impl fmt::Display for SystemMessageEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SystemMessageEnvelope seqNo={} ackReplyTo={} ({} bytes)",
            self.seq_no,
            self.ack_reply_to,
            self.message.len()
        )
    }
}

impl ControlMessage for SystemMessageEnvelope {
    fn kind(&self) -> ControlKind {
        CK_SYSTEM_MESSAGE_ENVELOPE
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut reader = expect_kind(raw, CK_SYSTEM_MESSAGE_ENVELOPE)?;
        if reader.remaining() < 8 {
            return Err(Error::ErrControlMessageTooShort);
        }
        let seq_no = reader.get_u64();
        let ack_reply_to = get_unique_address(&mut reader)?;
        let message = reader;
        Ok(SystemMessageEnvelope {
            seq_no,
            ack_reply_to,
            message,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u8(self.kind().0);
        writer.put_u64(self.seq_no);
        put_unique_address(writer, &self.ack_reply_to);
        writer.put_slice(&self.message);
        Ok(writer.len())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Cumulative acknowledgement: every seq up to and including `seq_no` has
/// been delivered to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessageAck {
    pub seq_no: u64,
    pub from: UniqueAddress,
}

/// makes SystemMessageAck printable
impl fmt::Display for SystemMessageAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemMessageAck seqNo={} from={}", self.seq_no, self.from)
    }
}

impl ControlMessage for SystemMessageAck {
    fn kind(&self) -> ControlKind {
        CK_SYSTEM_MESSAGE_ACK
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut reader = expect_kind(raw, CK_SYSTEM_MESSAGE_ACK)?;
        if reader.remaining() < 8 {
            return Err(Error::ErrControlMessageTooShort);
        }
        let seq_no = reader.get_u64();
        let from = get_unique_address(&mut reader)?;
        Ok(SystemMessageAck { seq_no, from })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u8(self.kind().0);
        writer.put_u64(self.seq_no);
        put_unique_address(writer, &self.from);
        Ok(writer.len())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Gap hint: the receiver expected `seq_no` next. Purely an optimization;
/// delivery correctness rests on the periodic resend.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessageNack {
    pub seq_no: u64,
    pub from: UniqueAddress,
}

/// makes SystemMessageNack printable
impl fmt::Display for SystemMessageNack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemMessageNack seqNo={} from={}", self.seq_no, self.from)
    }
}

impl ControlMessage for SystemMessageNack {
    fn kind(&self) -> ControlKind {
        CK_SYSTEM_MESSAGE_NACK
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut reader = expect_kind(raw, CK_SYSTEM_MESSAGE_NACK)?;
        if reader.remaining() < 8 {
            return Err(Error::ErrControlMessageTooShort);
        }
        let seq_no = reader.get_u64();
        let from = get_unique_address(&mut reader)?;
        Ok(SystemMessageNack { seq_no, from })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u8(self.kind().0);
        writer.put_u64(self.seq_no);
        put_unique_address(writer, &self.from);
        Ok(writer.len())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}
