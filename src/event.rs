use crate::address::{Address, UniqueAddress};

/// Lifecycle notifications published on the transport's broadcast channel.
///
/// Subscribers come and go; publishing never blocks and events are dropped
/// when nobody listens.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Handshake completed and the peer UID is known.
    HandshakeCompleted {
        peer: UniqueAddress,
        incarnation: u32,
    },
    /// A remote incarnation was banned, locally or on request.
    Quarantined {
        remote: Address,
        uid: u64,
        reason: String,
    },
    /// A peer told us it has quarantined this system.
    ThisActorSystemQuarantined { local: Address, remote: Address },
    /// An inbound envelope from a quarantined incarnation was dropped.
    QuarantinedEnvelopeDropped { uid: u64 },
    /// The peer advertised an actor-ref compression mapping.
    ActorRefCompressionAdvertised {
        peer: UniqueAddress,
        path: String,
        id: i32,
    },
    /// The peer advertised a class-manifest compression mapping.
    ClassManifestCompressionAdvertised {
        peer: UniqueAddress,
        manifest: String,
        id: i32,
    },
    /// An inbound pipeline was restarted after a failure.
    InboundPipelineRestarted { stream_id: u32 },
    /// An outbound lane was restarted after a failure.
    OutboundLaneRestarted { remote: Address, stream_id: u32 },
    /// Restart budget exhausted; the hosting system should terminate.
    TransportFailed { reason: String },
}
