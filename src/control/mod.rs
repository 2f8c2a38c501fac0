#[cfg(test)]
mod control_test;

pub(crate) mod compression_advertisement;
pub(crate) mod handshake;
pub(crate) mod quarantined;
pub(crate) mod system_message;

use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::address::{Address, UniqueAddress};
use crate::error::{Error, Result};

use compression_advertisement::{
    ActorRefCompressionAdvertisement, ClassManifestCompressionAdvertisement,
};
use handshake::{HandshakeReq, HandshakeRsp};
use quarantined::Quarantined;
use system_message::{SystemMessageAck, SystemMessageEnvelope, SystemMessageNack};

/// Discriminator byte leading every control-stream payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlKind(pub u8);

pub(crate) const CK_HANDSHAKE_REQ: ControlKind = ControlKind(1);
pub(crate) const CK_HANDSHAKE_RSP: ControlKind = ControlKind(2);
pub(crate) const CK_QUARANTINED: ControlKind = ControlKind(3);
pub(crate) const CK_ACTOR_REF_COMPRESSION_ADVERTISEMENT: ControlKind = ControlKind(4);
pub(crate) const CK_CLASS_MANIFEST_COMPRESSION_ADVERTISEMENT: ControlKind = ControlKind(5);
pub(crate) const CK_SYSTEM_MESSAGE_ENVELOPE: ControlKind = ControlKind(6);
pub(crate) const CK_SYSTEM_MESSAGE_ACK: ControlKind = ControlKind(7);
pub(crate) const CK_SYSTEM_MESSAGE_NACK: ControlKind = ControlKind(8);

/// makes ControlKind printable
impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CK_HANDSHAKE_REQ => "HandshakeReq",
            CK_HANDSHAKE_RSP => "HandshakeRsp",
            CK_QUARANTINED => "Quarantined",
            CK_ACTOR_REF_COMPRESSION_ADVERTISEMENT => "ActorRefCompressionAdvertisement",
            CK_CLASS_MANIFEST_COMPRESSION_ADVERTISEMENT => "ClassManifestCompressionAdvertisement",
            CK_SYSTEM_MESSAGE_ENVELOPE => "SystemMessageEnvelope",
            CK_SYSTEM_MESSAGE_ACK => "SystemMessageAck",
            CK_SYSTEM_MESSAGE_NACK => "SystemMessageNack",
            _ => "Unknown ControlKind",
        };
        write!(f, "{s}")
    }
}

/// A transport-protocol message riding the control stream as an envelope
/// payload: one kind byte followed by the kind-specific body.
pub trait ControlMessage: fmt::Display + fmt::Debug + Send + Sync {
    fn kind(&self) -> ControlKind;
    fn unmarshal(raw: &Bytes) -> Result<Self>
    where
        Self: Sized;
    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize>;
    fn as_any(&self) -> &(dyn Any + Send + Sync);

    fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Parses a control-stream payload into its typed message.
pub fn unmarshal_control(raw: &Bytes) -> Result<Box<dyn ControlMessage>> {
    if raw.is_empty() {
        return Err(Error::ErrControlMessageEmpty);
    }

    let kind = ControlKind(raw[0]);
    let msg: Box<dyn ControlMessage> = match kind {
        CK_HANDSHAKE_REQ => Box::new(HandshakeReq::unmarshal(raw)?),
        CK_HANDSHAKE_RSP => Box::new(HandshakeRsp::unmarshal(raw)?),
        CK_QUARANTINED => Box::new(Quarantined::unmarshal(raw)?),
        CK_ACTOR_REF_COMPRESSION_ADVERTISEMENT => {
            Box::new(ActorRefCompressionAdvertisement::unmarshal(raw)?)
        }
        CK_CLASS_MANIFEST_COMPRESSION_ADVERTISEMENT => {
            Box::new(ClassManifestCompressionAdvertisement::unmarshal(raw)?)
        }
        CK_SYSTEM_MESSAGE_ENVELOPE => Box::new(SystemMessageEnvelope::unmarshal(raw)?),
        CK_SYSTEM_MESSAGE_ACK => Box::new(SystemMessageAck::unmarshal(raw)?),
        CK_SYSTEM_MESSAGE_NACK => Box::new(SystemMessageNack::unmarshal(raw)?),
        ControlKind(other) => return Err(Error::ErrControlKindUnknown { kind: other }),
    };

    Ok(msg)
}

/// Strips and validates the leading kind byte, returning the body.
pub(crate) fn expect_kind(raw: &Bytes, expected: ControlKind) -> Result<Bytes> {
    if raw.is_empty() {
        return Err(Error::ErrControlMessageTooShort);
    }
    if raw[0] != expected.0 {
        return Err(Error::ErrControlKindMismatch);
    }
    Ok(raw.slice(1..))
}

pub(crate) fn put_string(writer: &mut BytesMut, s: &str) {
    writer.put_u16(s.len() as u16);
    writer.put_slice(s.as_bytes());
}

pub(crate) fn get_string(reader: &mut Bytes) -> Result<String> {
    if reader.remaining() < 2 {
        return Err(Error::ErrControlMessageTooShort);
    }
    let len = reader.get_u16() as usize;
    if reader.remaining() < len {
        return Err(Error::ErrControlMessageTooShort);
    }
    let raw = reader.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::ErrFrameLiteralNotUtf8)
}

pub(crate) fn put_address(writer: &mut BytesMut, addr: &Address) {
    put_string(writer, &addr.protocol);
    put_string(writer, &addr.system);
    put_string(writer, &addr.host);
    writer.put_u16(addr.port);
}

pub(crate) fn get_address(reader: &mut Bytes) -> Result<Address> {
    let protocol = get_string(reader)?;
    let system = get_string(reader)?;
    let host = get_string(reader)?;
    if reader.remaining() < 2 {
        return Err(Error::ErrControlMessageTooShort);
    }
    let port = reader.get_u16();
    Ok(Address {
        protocol,
        system,
        host,
        port,
    })
}

pub(crate) fn put_unique_address(writer: &mut BytesMut, addr: &UniqueAddress) {
    put_address(writer, &addr.address);
    writer.put_u64(addr.uid);
}

pub(crate) fn get_unique_address(reader: &mut Bytes) -> Result<UniqueAddress> {
    let address = get_address(reader)?;
    if reader.remaining() < 8 {
        return Err(Error::ErrControlMessageTooShort);
    }
    let uid = reader.get_u64();
    Ok(UniqueAddress { address, uid })
}
