use std::fmt;

use crate::error::{Error, Result};

/// The protocol scheme carried in every remoting address.
pub const PROTOCOL: &str = "artery";

/// Logical address of an actor system reachable over the transport.
///
/// Two addresses are equal iff protocol, system name, host and port all
/// match; the UID of a concrete incarnation is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub protocol: String,
    pub system: String,
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(system: &str, host: &str, port: u16) -> Self {
        Address {
            protocol: PROTOCOL.to_owned(),
            system: system.to_owned(),
            host: host.to_owned(),
            port,
        }
    }

    /// Parses `protocol://system@host:port`.
    pub fn parse(addr: &str) -> Result<Self> {
        let malformed = || Error::ErrAddressMalformed {
            addr: addr.to_owned(),
        };

        let (protocol, rest) = addr.split_once("://").ok_or_else(malformed)?;
        let (system, authority) = rest.split_once('@').ok_or_else(malformed)?;
        let (host, port) = authority.rsplit_once(':').ok_or_else(malformed)?;
        if host.is_empty() {
            return Err(Error::ErrAddressHostMissing);
        }
        let port = port.parse::<u16>().map_err(|_| malformed())?;

        Ok(Address {
            protocol: protocol.to_owned(),
            system: system.to_owned(),
            host: host.to_owned(),
            port,
        })
    }
}

/// makes Address printable
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}:{}",
            self.protocol, self.system, self.host, self.port
        )
    }
}

/// An [`Address`] bound to one incarnation of the remote process.
///
/// The UID is minted once per process start; a restarted process presents the
/// same `Address` with a different UID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueAddress {
    pub address: Address,
    pub uid: u64,
}

impl UniqueAddress {
    pub fn new(address: Address, uid: u64) -> Self {
        UniqueAddress { address, uid }
    }
}

/// makes UniqueAddress printable
impl fmt::Display for UniqueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.uid)
    }
}
