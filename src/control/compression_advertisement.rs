use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::*;

/// Advertises an actor-ref compression mapping for the advertiser's inbound
/// table; the receiver mirrors it into its outbound table for that peer.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorRefCompressionAdvertisement {
    pub from: UniqueAddress,
    pub path: String,
    pub id: i32,
}

/// makes ActorRefCompressionAdvertisement printable
impl fmt::Display for ActorRefCompressionAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ActorRefCompressionAdvertisement from={} {} -> {}",
            self.from, self.path, self.id
        )
    }
}

impl ControlMessage for ActorRefCompressionAdvertisement {
    fn kind(&self) -> ControlKind {
        CK_ACTOR_REF_COMPRESSION_ADVERTISEMENT
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut reader = expect_kind(raw, CK_ACTOR_REF_COMPRESSION_ADVERTISEMENT)?;
        let from = get_unique_address(&mut reader)?;
        let path = get_string(&mut reader)?;
        if reader.remaining() < 4 {
            return Err(Error::ErrControlMessageTooShort);
        }
        let id = reader.get_i32();
        Ok(ActorRefCompressionAdvertisement { from, path, id })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u8(self.kind().0);
        put_unique_address(writer, &self.from);
        put_string(writer, &self.path);
        writer.put_i32(self.id);
        Ok(writer.len())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Same as [`ActorRefCompressionAdvertisement`] for class manifests.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassManifestCompressionAdvertisement {
    pub from: UniqueAddress,
    pub manifest: String,
    pub id: i32,
}

/// makes ClassManifestCompressionAdvertisement printable
impl fmt::Display for ClassManifestCompressionAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClassManifestCompressionAdvertisement from={} {} -> {}",
            self.from, self.manifest, self.id
        )
    }
}

impl ControlMessage for ClassManifestCompressionAdvertisement {
    fn kind(&self) -> ControlKind {
        CK_CLASS_MANIFEST_COMPRESSION_ADVERTISEMENT
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut reader = expect_kind(raw, CK_CLASS_MANIFEST_COMPRESSION_ADVERTISEMENT)?;
        let from = get_unique_address(&mut reader)?;
        let manifest = get_string(&mut reader)?;
        if reader.remaining() < 4 {
            return Err(Error::ErrControlMessageTooShort);
        }
        let id = reader.get_i32();
        Ok(ClassManifestCompressionAdvertisement { from, manifest, id })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u8(self.kind().0);
        put_unique_address(writer, &self.from);
        put_string(writer, &self.manifest);
        writer.put_i32(self.id);
        Ok(writer.len())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}
