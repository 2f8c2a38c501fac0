use std::time::Duration;

use crate::error::{Error, Result};

/// How long an outbound handshake may stay pending before the lane fails.
pub(crate) const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// The interval at which a pending handshake request is re-injected.
pub(crate) const DEFAULT_INJECT_HANDSHAKE_INTERVAL: Duration = Duration::from_secs(1);

/// How long a send may block on a saturated outbound queue before dropping.
pub(crate) const DEFAULT_GIVE_UP_SEND_AFTER: Duration = Duration::from_secs(60);

/// The interval at which unacknowledged system messages are retransmitted.
pub(crate) const DEFAULT_SYSTEM_MESSAGE_RESEND_INTERVAL: Duration = Duration::from_secs(1);

/// Unacknowledged system messages kept per association before giving up.
pub(crate) const DEFAULT_SYS_MSG_BUFFER_SIZE: usize = 20000;

/// Sliding window inside which pipeline restarts are counted.
pub(crate) const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(5);

/// Restarts granted per window before the transport gives up.
pub(crate) const DEFAULT_MAX_RESTARTS: usize = 5;

/// The media-driver liveness timeout.
pub(crate) const DEFAULT_DRIVER_TIMEOUT: Duration = Duration::from_secs(20);

/// Capacity of the ordinary and large outbound queues, per lane.
pub(crate) const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 3072;

/// Capacity of the control outbound queue.
pub(crate) const DEFAULT_OUTBOUND_CONTROL_QUEUE_CAPACITY: usize = 128;

/// Outbound envelope wrappers kept for reuse.
pub(crate) const DEFAULT_OUTBOUND_ENVELOPE_POOL_CAPACITY: usize = 6144;

/// First driver error-log poll after transport start.
pub(crate) const DRIVER_ERROR_POLL_DELAY: Duration = Duration::from_secs(3);

/// Driver error-log poll period.
pub(crate) const DRIVER_ERROR_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Collects the arguments to `Transport` construction into a single
/// structure, for future-proofness of the interface.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Name of the hosting actor system; part of every address.
    pub system_name: String,

    /// Hostname or IP the transport binds and advertises.
    pub hostname: String,

    /// UDP port to bind. 0 selects an ephemeral port.
    pub port: u16,

    /// How long the outbound side waits for the peer UID before failing the
    /// lane. Must be greater than zero.
    pub handshake_timeout: Duration,

    /// Re-injection period for pending handshake requests.
    pub inject_handshake_interval: Duration,

    /// How long a saturated outbound queue may block a send before the
    /// envelope is dropped with a warning.
    pub give_up_send_after: Duration,

    /// Recipient path patterns (wildcards allowed) routed over the large
    /// message pipeline. The pipeline only exists when non-empty.
    pub large_message_destinations: Vec<String>,

    /// Unacknowledged system messages buffered per association; overflowing
    /// it fails the control lane and quarantines the peer. Must be greater
    /// than zero.
    pub sys_msg_buffer_size: usize,

    /// Retransmission period for unacknowledged system messages.
    pub system_message_resend_interval: Duration,

    /// Media-driver threading profile, 1 (lowest CPU) to 10.
    pub idle_cpu_level: u8,

    /// Directory used by an external media driver, when one is attached.
    pub aeron_directory_name: Option<String>,

    /// Start the embedded UDP media driver. When false an external driver
    /// must be supplied to `Transport::start_with_driver`.
    pub embedded_media_driver: bool,

    /// Media-driver liveness timeout, surfaced through the error-log poller.
    pub driver_timeout: Duration,

    /// Substitute actor refs and class manifests with small table ids on the
    /// wire when the peer has advertised a table.
    pub compression_enabled: bool,

    /// Sliding window inside which pipeline restarts are counted.
    pub restart_timeout: Duration,

    /// Restarts granted within `restart_timeout` before the transport fails.
    pub max_restarts: usize,

    /// Bounded capacity of the ordinary and large outbound queues.
    pub outbound_queue_capacity: usize,

    /// Bounded capacity of the control outbound queue.
    pub outbound_control_queue_capacity: usize,

    /// Outbound envelope wrappers kept for reuse.
    pub outbound_envelope_pool_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            system_name: "default".to_owned(),
            hostname: "127.0.0.1".to_owned(),
            port: 0,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            inject_handshake_interval: DEFAULT_INJECT_HANDSHAKE_INTERVAL,
            give_up_send_after: DEFAULT_GIVE_UP_SEND_AFTER,
            large_message_destinations: vec![],
            sys_msg_buffer_size: DEFAULT_SYS_MSG_BUFFER_SIZE,
            system_message_resend_interval: DEFAULT_SYSTEM_MESSAGE_RESEND_INTERVAL,
            idle_cpu_level: 5,
            aeron_directory_name: None,
            embedded_media_driver: true,
            driver_timeout: DEFAULT_DRIVER_TIMEOUT,
            compression_enabled: true,
            restart_timeout: DEFAULT_RESTART_TIMEOUT,
            max_restarts: DEFAULT_MAX_RESTARTS,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            outbound_control_queue_capacity: DEFAULT_OUTBOUND_CONTROL_QUEUE_CAPACITY,
            outbound_envelope_pool_capacity: DEFAULT_OUTBOUND_ENVELOPE_POOL_CAPACITY,
        }
    }
}

impl TransportConfig {
    /// check validates the configuration before the transport starts.
    pub fn check(&self) -> Result<()> {
        if self.handshake_timeout.is_zero() {
            return Err(Error::ErrConfigHandshakeTimeoutZero);
        }
        if self.sys_msg_buffer_size == 0 {
            return Err(Error::ErrConfigSysMsgBufferSizeZero);
        }
        if self.idle_cpu_level < 1 || self.idle_cpu_level > 10 {
            return Err(Error::ErrConfigIdleCpuLevelOutOfRange);
        }
        Ok(())
    }
}
