use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::compression::{InboundCompressions, OutboundCompression};
use crate::envelope::{InboundEnvelope, OutboundEnvelope};
use crate::error::{Error, Result};

/// Envelope wire format, network byte order:
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    Version    |     Flags     |      Originating UID          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+         (u64)                 |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Serializer (i32)                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        Sender: u16 length + utf-8, or i32 table id            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Recipient: u16 length + utf-8, or i32 table id          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Manifest: u16 length + utf-8, or i32 table id           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Payload (remainder)                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Empty sender/recipient encode as a zero-length literal.
pub(crate) const VERSION: u8 = 0;

pub(crate) const FLAG_COMPRESSED_MANIFEST: u8 = 0x01;
pub(crate) const FLAG_COMPRESSED_RECIPIENT: u8 = 0x02;
pub(crate) const FLAG_COMPRESSED_SENDER: u8 = 0x04;

/// Version, flags, uid, serializer.
pub(crate) const FRAME_HEADER_SIZE: usize = 1 + 1 + 8 + 4;

/// Encodes `env` into `writer`. The compression table is consulted for each
/// literal; a hit writes the table id and sets the matching flag.
pub(crate) fn encode(
    writer: &mut BytesMut,
    originating_uid: u64,
    env: &OutboundEnvelope,
    compression: &dyn OutboundCompression,
    max_frame: usize,
) -> Result<usize> {
    let sender = env.sender.as_deref().unwrap_or("");
    let recipient = env.recipient.as_deref().unwrap_or("");

    let sender_id = if sender.is_empty() {
        None
    } else {
        compression.compress_actor_ref(sender)
    };
    let recipient_id = if recipient.is_empty() {
        None
    } else {
        compression.compress_actor_ref(recipient)
    };
    let manifest_id = if env.manifest.is_empty() {
        None
    } else {
        compression.compress_class_manifest(&env.manifest)
    };

    let mut flags = 0u8;
    if manifest_id.is_some() {
        flags |= FLAG_COMPRESSED_MANIFEST;
    }
    if recipient_id.is_some() {
        flags |= FLAG_COMPRESSED_RECIPIENT;
    }
    if sender_id.is_some() {
        flags |= FLAG_COMPRESSED_SENDER;
    }

    let start = writer.len();
    writer.put_u8(VERSION);
    writer.put_u8(flags);
    writer.put_u64(originating_uid);
    writer.put_i32(env.serializer_id);

    put_field(writer, sender, sender_id);
    put_field(writer, recipient, recipient_id);
    put_field(writer, &env.manifest, manifest_id);
    writer.put_slice(&env.message);

    let written = writer.len() - start;
    if written > max_frame {
        return Err(Error::ErrFrameTooLarge);
    }
    Ok(written)
}

fn put_field(writer: &mut BytesMut, literal: &str, id: Option<i32>) {
    match id {
        Some(id) => writer.put_i32(id),
        None => {
            writer.put_u16(literal.len() as u16);
            writer.put_slice(literal.as_bytes());
        }
    }
}

/// Decodes `raw` into the pooled envelope. Unknown compression ids and
/// malformed frames are decode errors; the caller drops the envelope and
/// keeps the stream alive.
pub(crate) fn decode(
    raw: &Bytes,
    compression: &dyn InboundCompressions,
    env: &mut InboundEnvelope,
) -> Result<()> {
    if raw.len() < FRAME_HEADER_SIZE {
        return Err(Error::ErrFrameTooShort);
    }

    let reader = &mut raw.clone();
    let version = reader.get_u8();
    if version != VERSION {
        return Err(Error::ErrFrameVersionMismatch { version });
    }
    let flags = reader.get_u8();
    let originating_uid = reader.get_u64();
    let serializer_id = reader.get_i32();

    let sender = get_field(
        reader,
        flags & FLAG_COMPRESSED_SENDER != 0,
        originating_uid,
        compression,
        FieldKind::ActorRef,
    )?;
    let recipient = get_field(
        reader,
        flags & FLAG_COMPRESSED_RECIPIENT != 0,
        originating_uid,
        compression,
        FieldKind::ActorRef,
    )?;
    let manifest = get_field(
        reader,
        flags & FLAG_COMPRESSED_MANIFEST != 0,
        originating_uid,
        compression,
        FieldKind::ClassManifest,
    )?;

    env.sender = if sender.is_empty() { None } else { Some(sender) };
    env.recipient = if recipient.is_empty() {
        None
    } else {
        Some(recipient)
    };
    env.manifest = manifest;
    env.serializer_id = serializer_id;
    env.originating_uid = originating_uid;
    env.message = reader.clone();
    Ok(())
}

enum FieldKind {
    ActorRef,
    ClassManifest,
}

fn get_field(
    reader: &mut Bytes,
    compressed: bool,
    originating_uid: u64,
    compression: &dyn InboundCompressions,
    kind: FieldKind,
) -> Result<String> {
    if compressed {
        if reader.remaining() < 4 {
            return Err(Error::ErrFrameTooShort);
        }
        let id = reader.get_i32();
        return match kind {
            FieldKind::ActorRef => compression
                .decompress_actor_ref(originating_uid, id)
                .ok_or(Error::ErrUnknownCompressedActorRef { id }),
            FieldKind::ClassManifest => compression
                .decompress_class_manifest(originating_uid, id)
                .ok_or(Error::ErrUnknownCompressedClassManifest { id }),
        };
    }

    if reader.remaining() < 2 {
        return Err(Error::ErrFrameTooShort);
    }
    let len = reader.get_u16() as usize;
    if reader.remaining() < len {
        return Err(Error::ErrFrameLiteralTruncated);
    }
    let literal = reader.split_to(len);
    String::from_utf8(literal.to_vec()).map_err(|_| Error::ErrFrameLiteralNotUtf8)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compression::{
        InboundCompressionTables, NoOutboundCompression, OutboundCompressionTable,
    };
    use crate::pool::MAX_FRAME_SIZE;

    fn user_envelope() -> OutboundEnvelope {
        OutboundEnvelope {
            sender: Some("/user/pinger".to_owned()),
            recipient: Some("/user/ponger".to_owned()),
            recipient_address: None,
            message: Bytes::from_static(b"ping"),
            manifest: "Ping".to_owned(),
            serializer_id: 17,
        }
    }

    fn assert_roundtrip(out: &OutboundEnvelope, encoded: &Bytes, inbound: &dyn InboundCompressions) {
        let mut decoded = InboundEnvelope::default();
        decode(encoded, inbound, &mut decoded).unwrap();
        assert_eq!(decoded.sender, out.sender);
        assert_eq!(decoded.recipient, out.recipient);
        assert_eq!(decoded.manifest, out.manifest);
        assert_eq!(decoded.serializer_id, out.serializer_id);
        assert_eq!(decoded.message, out.message);
        assert_eq!(decoded.originating_uid, 0xCAFE);
    }

    #[test]
    fn test_roundtrip_uncompressed() {
        let out = user_envelope();
        let mut buf = BytesMut::new();
        encode(&mut buf, 0xCAFE, &out, &NoOutboundCompression, MAX_FRAME_SIZE).unwrap();
        let raw = buf.freeze();
        assert_eq!(raw[0], VERSION);
        assert_eq!(raw[1], 0);

        let inbound = InboundCompressionTables::new();
        assert_roundtrip(&out, &raw, &*inbound);
    }

    #[test]
    fn test_roundtrip_with_agreed_tables() {
        // both sides agreed on table state: outbound compresses, inbound reverses
        let outbound = OutboundCompressionTable::new();
        outbound.advertise_actor_ref("/user/pinger".to_owned(), 1);
        outbound.advertise_actor_ref("/user/ponger".to_owned(), 2);
        outbound.advertise_class_manifest("Ping".to_owned(), 7);

        let inbound = InboundCompressionTables::new();
        inbound.add_actor_ref(0xCAFE, 1, "/user/pinger".to_owned());
        inbound.add_actor_ref(0xCAFE, 2, "/user/ponger".to_owned());
        inbound.add_class_manifest(0xCAFE, 7, "Ping".to_owned());

        let out = user_envelope();
        let mut buf = BytesMut::new();
        encode(&mut buf, 0xCAFE, &out, &*outbound, MAX_FRAME_SIZE).unwrap();
        let raw = buf.freeze();
        assert_eq!(
            raw[1],
            FLAG_COMPRESSED_MANIFEST | FLAG_COMPRESSED_RECIPIENT | FLAG_COMPRESSED_SENDER
        );
        // 3 × i32 instead of 3 literals
        assert!(raw.len() < {
            let mut plain = BytesMut::new();
            encode(&mut plain, 0xCAFE, &out, &NoOutboundCompression, MAX_FRAME_SIZE).unwrap();
            plain.len()
        });

        assert_roundtrip(&out, &raw, &*inbound);
    }

    #[test]
    fn test_empty_sender_is_anonymous() {
        let out = OutboundEnvelope {
            sender: None,
            ..user_envelope()
        };
        let mut buf = BytesMut::new();
        encode(&mut buf, 0xCAFE, &out, &NoOutboundCompression, MAX_FRAME_SIZE).unwrap();

        let inbound = InboundCompressionTables::new();
        let mut decoded = InboundEnvelope::default();
        decode(&buf.freeze(), &*inbound, &mut decoded).unwrap();
        assert_eq!(decoded.sender, None);
    }

    #[test]
    fn test_unknown_compression_id_is_decode_error() {
        let outbound = OutboundCompressionTable::new();
        outbound.advertise_class_manifest("Ping".to_owned(), 7);

        let out = user_envelope();
        let mut buf = BytesMut::new();
        encode(&mut buf, 0xCAFE, &out, &*outbound, MAX_FRAME_SIZE).unwrap();

        // inbound side never saw table 7
        let inbound = InboundCompressionTables::new();
        let mut decoded = InboundEnvelope::default();
        assert_eq!(
            decode(&buf.freeze(), &*inbound, &mut decoded),
            Err(Error::ErrUnknownCompressedClassManifest { id: 7 })
        );
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let out = user_envelope();
        let mut buf = BytesMut::new();
        encode(&mut buf, 1, &out, &NoOutboundCompression, MAX_FRAME_SIZE).unwrap();
        buf[0] = 9;

        let inbound = InboundCompressionTables::new();
        let mut decoded = InboundEnvelope::default();
        assert_eq!(
            decode(&buf.freeze(), &*inbound, &mut decoded),
            Err(Error::ErrFrameVersionMismatch { version: 9 })
        );
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let out = user_envelope();
        let mut buf = BytesMut::new();
        encode(&mut buf, 1, &out, &NoOutboundCompression, MAX_FRAME_SIZE).unwrap();
        let raw = buf.freeze();

        let inbound = InboundCompressionTables::new();
        let mut decoded = InboundEnvelope::default();
        assert!(decode(&raw.slice(..FRAME_HEADER_SIZE + 3), &*inbound, &mut decoded).is_err());
        assert!(decode(&raw.slice(..4), &*inbound, &mut decoded).is_err());
    }

    #[test]
    fn test_encode_enforces_max_frame() {
        let out = OutboundEnvelope {
            message: Bytes::from(vec![0u8; 256]),
            ..user_envelope()
        };
        let mut buf = BytesMut::new();
        assert_eq!(
            encode(&mut buf, 1, &out, &NoOutboundCompression, 128),
            Err(Error::ErrFrameTooLarge)
        );
    }
}
