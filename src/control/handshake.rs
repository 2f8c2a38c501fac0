use std::any::Any;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::*;

/// First message of the handshake, re-injected periodically until the peer
/// answers. Carries the full local unique address and the address the sender
/// believes it is talking to; the receiver only registers the peer when that
/// intended address is its own.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReq {
    pub from: UniqueAddress,
    pub to: Address,
}

/// makes HandshakeReq printable
impl fmt::Display for HandshakeReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandshakeReq from={} to={}", self.from, self.to)
    }
}

impl ControlMessage for HandshakeReq {
    fn kind(&self) -> ControlKind {
        CK_HANDSHAKE_REQ
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut reader = expect_kind(raw, CK_HANDSHAKE_REQ)?;
        let from = get_unique_address(&mut reader)?;
        let to = get_address(&mut reader)?;
        Ok(HandshakeReq { from, to })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u8(self.kind().0);
        put_unique_address(writer, &self.from);
        put_address(writer, &self.to);
        Ok(writer.len())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Reply that fulfils the requester's UID promise.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRsp {
    pub from: UniqueAddress,
}

/// makes HandshakeRsp printable
impl fmt::Display for HandshakeRsp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandshakeRsp from={}", self.from)
    }
}

impl ControlMessage for HandshakeRsp {
    fn kind(&self) -> ControlKind {
        CK_HANDSHAKE_RSP
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut reader = expect_kind(raw, CK_HANDSHAKE_RSP)?;
        let from = get_unique_address(&mut reader)?;
        Ok(HandshakeRsp { from })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u8(self.kind().0);
        put_unique_address(writer, &self.from);
        Ok(writer.len())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}
