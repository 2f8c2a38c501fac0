use bytes::Bytes;

use crate::address::Address;
use crate::pool::Reusable;

/// A user message headed for one remote peer, before framing.
///
/// Instances cycle through the outbound object pool; the lane that consumes
/// one releases it back after the frame has been handed to the publication.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct OutboundEnvelope {
    /// Path of the sending actor, when one exists.
    pub sender: Option<String>,
    /// Path of the destination actor.
    pub recipient: Option<String>,
    /// Address of the destination system.
    pub recipient_address: Option<Address>,
    /// Serialized message payload.
    pub message: Bytes,
    /// Class manifest of the payload.
    pub manifest: String,
    /// Serializer that produced the payload.
    pub serializer_id: i32,
}

impl Reusable for OutboundEnvelope {
    fn reset(&mut self) {
        self.sender = None;
        self.recipient = None;
        self.recipient_address = None;
        self.message = Bytes::new();
        self.manifest.clear();
        self.serializer_id = 0;
    }
}

/// A decoded message on its way to the dispatcher.
///
/// Acquired from the inbound object pool at the pipeline head, filled by the
/// decoder and released once the terminal sink has consumed it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InboundEnvelope {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    /// The local address the envelope arrived on.
    pub recipient_address: Option<Address>,
    pub message: Bytes,
    pub manifest: String,
    pub serializer_id: i32,
    /// UID of the sending incarnation, from the frame header.
    pub originating_uid: u64,
    /// Stream the envelope arrived on.
    pub stream_id: u32,
}

impl Reusable for InboundEnvelope {
    fn reset(&mut self) {
        self.sender = None;
        self.recipient = None;
        self.recipient_address = None;
        self.message = Bytes::new();
        self.manifest.clear();
        self.serializer_id = 0;
        self.originating_uid = 0;
        self.stream_id = 0;
    }
}
