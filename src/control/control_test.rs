use bytes::Bytes;

use super::compression_advertisement::*;
use super::handshake::*;
use super::quarantined::*;
use super::system_message::*;
use super::*;

fn alice() -> UniqueAddress {
    UniqueAddress::new(Address::new("alice", "127.0.0.1", 25520), 0x1122_3344_5566_7788)
}

fn bob() -> UniqueAddress {
    UniqueAddress::new(Address::new("bob", "10.1.2.3", 25521), 7)
}

#[test]
fn test_handshake_req_roundtrip() -> Result<()> {
    let req = HandshakeReq {
        from: alice(),
        to: bob().address,
    };
    let raw = req.marshal()?;
    let parsed = unmarshal_control(&raw)?;
    let parsed = parsed
        .as_any()
        .downcast_ref::<HandshakeReq>()
        .expect("kind dispatch");
    assert_eq!(*parsed, req);
    Ok(())
}

#[test]
fn test_handshake_rsp_roundtrip() -> Result<()> {
    let rsp = HandshakeRsp { from: bob() };
    let raw = rsp.marshal()?;
    let parsed = unmarshal_control(&raw)?;
    assert_eq!(
        parsed.as_any().downcast_ref::<HandshakeRsp>(),
        Some(&rsp)
    );
    Ok(())
}

#[test]
fn test_quarantined_roundtrip() -> Result<()> {
    let q = Quarantined {
        from: alice(),
        to: bob(),
    };
    let raw = q.marshal()?;
    let parsed = unmarshal_control(&raw)?;
    assert_eq!(parsed.as_any().downcast_ref::<Quarantined>(), Some(&q));
    Ok(())
}

#[test]
fn test_compression_advertisements_roundtrip() -> Result<()> {
    let aref = ActorRefCompressionAdvertisement {
        from: alice(),
        path: "/user/hot".to_owned(),
        id: 42,
    };
    let raw = aref.marshal()?;
    let parsed = unmarshal_control(&raw)?;
    assert_eq!(
        parsed
            .as_any()
            .downcast_ref::<ActorRefCompressionAdvertisement>(),
        Some(&aref)
    );

    let manifest = ClassManifestCompressionAdvertisement {
        from: bob(),
        manifest: "M1".to_owned(),
        id: -3,
    };
    let raw = manifest.marshal()?;
    let parsed = unmarshal_control(&raw)?;
    assert_eq!(
        parsed
            .as_any()
            .downcast_ref::<ClassManifestCompressionAdvertisement>(),
        Some(&manifest)
    );
    Ok(())
}

#[test]
fn test_system_message_roundtrips() -> Result<()> {
    let env = SystemMessageEnvelope {
        seq_no: 9,
        ack_reply_to: alice(),
        message: Bytes::from_static(b"watch /user/a"),
    };
    let raw = env.marshal()?;
    let parsed = unmarshal_control(&raw)?;
    assert_eq!(
        parsed.as_any().downcast_ref::<SystemMessageEnvelope>(),
        Some(&env)
    );

    let ack = SystemMessageAck {
        seq_no: 9,
        from: bob(),
    };
    let raw = ack.marshal()?;
    let parsed = unmarshal_control(&raw)?;
    assert_eq!(
        parsed.as_any().downcast_ref::<SystemMessageAck>(),
        Some(&ack)
    );

    let nack = SystemMessageNack {
        seq_no: 4,
        from: bob(),
    };
    let raw = nack.marshal()?;
    let parsed = unmarshal_control(&raw)?;
    assert_eq!(
        parsed.as_any().downcast_ref::<SystemMessageNack>(),
        Some(&nack)
    );
    Ok(())
}

#[test]
fn test_unmarshal_rejects_unknown_kind() {
    let raw = Bytes::from_static(&[0xEE, 0, 0]);
    assert_eq!(
        unmarshal_control(&raw).err(),
        Some(Error::ErrControlKindUnknown { kind: 0xEE })
    );
}

#[test]
fn test_unmarshal_rejects_empty_payload() {
    assert_eq!(
        unmarshal_control(&Bytes::new()).err(),
        Some(Error::ErrControlMessageEmpty)
    );
}

#[test]
fn test_unmarshal_rejects_truncated_body() {
    let req = HandshakeReq {
        from: alice(),
        to: bob().address,
    };
    let raw = req.marshal().unwrap();
    let truncated = raw.slice(..raw.len() - 3);
    assert!(unmarshal_control(&truncated).is_err());
}
