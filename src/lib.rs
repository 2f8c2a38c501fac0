//! UDP remoting transport for distributed actor systems
//!
//! Carries typed messages between actor-system processes over an unreliable
//! datagram substrate. Each remote peer gets an association multiplexing
//! three logical streams (control, ordinary, large); a handshake pins the
//! peer's process-incarnation UID before anything flows, failed or
//! reincarnated peers are quarantined by UID, and system-critical messages
//! ride a reliable windowed delivery layer on the control stream.
//!
//! Serialization, the production media driver and the actor dispatcher are
//! collaborators behind traits; the embedded UDP driver covers tests and
//! single-host setups.

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod address;
mod association;
mod compression;
mod config;
mod control;
mod delivery;
mod driver;
mod envelope;
mod error;
mod event;
mod frame;
mod inbound;
mod outbound;
mod pool;
mod restart;
mod transport;
mod udp;
mod wildcard;

#[cfg(test)]
mod transport_test;

pub use crate::address::{Address, UniqueAddress, PROTOCOL};
pub use crate::association::registry::AssociationRegistry;
pub use crate::association::state::{AssociationState, UidPromise};
pub use crate::association::Association;
pub use crate::compression::{
    InboundCompressionTables, InboundCompressions, NoOutboundCompression, OutboundCompression,
    OutboundCompressionTable,
};
pub use crate::config::TransportConfig;
pub use crate::control::compression_advertisement::{
    ActorRefCompressionAdvertisement, ClassManifestCompressionAdvertisement,
};
pub use crate::control::handshake::{HandshakeReq, HandshakeRsp};
pub use crate::control::quarantined::Quarantined;
pub use crate::control::system_message::{
    SystemMessageAck, SystemMessageEnvelope, SystemMessageNack,
};
pub use crate::control::{unmarshal_control, ControlKind, ControlMessage};
pub use crate::driver::{
    DriverError, MediaDriver, Publication, Subscription, CONTROL_STREAM_ID, LARGE_STREAM_ID,
    ORDINARY_STREAM_ID,
};
pub use crate::envelope::{InboundEnvelope, OutboundEnvelope};
pub use crate::error::{Error, Result};
pub use crate::event::TransportEvent;
pub use crate::inbound::{
    ControlJunction, ControlMessageObserver, InboundContext, InboundDispatcher,
};
pub use crate::outbound::OutboundContext;
pub use crate::pool::{MAX_FRAME_SIZE, MAX_LARGE_FRAME_SIZE};
pub use crate::transport::Transport;
pub use crate::udp::UdpDriver;
pub use crate::wildcard::WildcardMatcher;
