use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::address::Address;
use crate::error::Result;

/// Stream carrying transport-protocol messages; reliable and ordered via the
/// system-message delivery layer.
pub const CONTROL_STREAM_ID: u32 = 1;
/// Stream carrying ordinary user messages, best effort.
pub const ORDINARY_STREAM_ID: u32 = 3;
/// Parallel best-effort stream with larger frames for configured
/// destinations.
pub const LARGE_STREAM_ID: u32 = 4;

/// An error surfaced by the media driver's error log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The driver conductor missed its liveness deadline. Logged at error
    /// level without terminating the transport.
    ConductorServiceTimeout(String),
    Other(String),
}

/// makes DriverError printable
impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::ConductorServiceTimeout(s) => {
                write!(f, "conductor service timeout: {s}")
            }
            DriverError::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Outbound half of one (peer, stream) channel.
#[async_trait]
pub trait Publication: Send + Sync {
    /// Offers one marshalled frame to the substrate. Resolves once the frame
    /// has been accepted; delivery remains best effort.
    async fn offer(&self, frame: &[u8]) -> Result<()>;
}

/// Inbound half of one stream, merged across all peers.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Receives the next frame on this stream.
    async fn poll(&self) -> Result<Bytes>;
}

/// The datagram substrate underneath the transport. Production deployments
/// attach an external driver; the embedded UDP driver covers tests and
/// single-host setups.
#[async_trait]
pub trait MediaDriver: Send + Sync {
    /// The UDP port the driver is bound to.
    fn local_port(&self) -> u16;

    async fn add_publication(
        &self,
        remote: &Address,
        stream_id: u32,
    ) -> Result<Arc<dyn Publication>>;

    async fn add_subscription(&self, stream_id: u32) -> Result<Arc<dyn Subscription>>;

    /// Drains the driver error log; called by the transport's periodic
    /// poller.
    fn poll_errors(&self) -> Vec<DriverError>;

    async fn close(&self) -> Result<()>;
}
