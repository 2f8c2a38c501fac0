use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("raw is too small for an envelope frame")]
    ErrFrameTooShort,
    #[error("unsupported envelope version `{version}`")]
    ErrFrameVersionMismatch { version: u8 },
    #[error("literal field length exceeds remaining frame bytes")]
    ErrFrameLiteralTruncated,
    #[error("literal field is not valid utf-8")]
    ErrFrameLiteralNotUtf8,
    #[error("unknown compressed actor ref id `{id}`")]
    ErrUnknownCompressedActorRef { id: i32 },
    #[error("unknown compressed class manifest id `{id}`")]
    ErrUnknownCompressedClassManifest { id: i32 },
    #[error("envelope larger than the maximum frame for its stream")]
    ErrFrameTooLarge,

    #[error("raw is too small for a control message")]
    ErrControlMessageTooShort,
    #[error("unknown control message kind `{kind}`")]
    ErrControlKindUnknown { kind: u8 },
    #[error("control message kind mismatch")]
    ErrControlKindMismatch,
    #[error("control stream envelope carried no payload")]
    ErrControlMessageEmpty,

    #[error("address is missing a host")]
    ErrAddressHostMissing,
    #[error("malformed address `{addr}`")]
    ErrAddressMalformed { addr: String },
    #[error("association requested for the local address")]
    ErrLocalAssociation,

    #[error("handshake did not complete within handshake-timeout")]
    ErrHandshakeTimeout,
    #[error("system message delivery buffer overflow (capacity {capacity})")]
    ErrSystemMessageBufferOverflow { capacity: usize },
    #[error("sending on a quarantined association")]
    ErrQuarantinedAssociation,
    #[error("publication could not accept an envelope within give-up-send-after")]
    ErrGiveUpSend,
    #[error("transport is shut down")]
    ErrTransportShutdown,
    #[error("outbound queue closed")]
    ErrOutboundQueueClosed,
    #[error("inbound subscription closed")]
    ErrSubscriptionClosed,
    #[error("pipeline restart budget exhausted")]
    ErrRestartBudgetExhausted,

    #[error("handshake-timeout must be greater than zero")]
    ErrConfigHandshakeTimeoutZero,
    #[error("sys-msg-buffer-size must be greater than zero")]
    ErrConfigSysMsgBufferSizeZero,
    #[error("idle-cpu-level must be between 1 and 10")]
    ErrConfigIdleCpuLevelOutOfRange,
    #[error("no media driver: embedded driver disabled and none supplied")]
    ErrConfigNoMediaDriver,

    #[error("media driver: {0}")]
    ErrDriver(String),

    #[error("{0}")]
    Other(String),
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            e @ Error::ErrTransportShutdown => {
                io::Error::new(io::ErrorKind::NotConnected, e.to_string())
            }
            e @ Error::ErrGiveUpSend => io::Error::new(io::ErrorKind::TimedOut, e.to_string()),
            e => io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::ErrDriver(error.to_string())
    }
}
