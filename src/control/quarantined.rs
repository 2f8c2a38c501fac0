use std::any::Any;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::*;

/// Notifies a peer that one of its incarnations has been banned. The
/// receiving side only acts when `to` names its own incarnation.
#[derive(Debug, Clone, PartialEq)]
pub struct Quarantined {
    pub from: UniqueAddress,
    pub to: UniqueAddress,
}

/// makes Quarantined printable
impl fmt::Display for Quarantined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quarantined from={} to={}", self.from, self.to)
    }
}

impl ControlMessage for Quarantined {
    fn kind(&self) -> ControlKind {
        CK_QUARANTINED
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut reader = expect_kind(raw, CK_QUARANTINED)?;
        let from = get_unique_address(&mut reader)?;
        let to = get_unique_address(&mut reader)?;
        Ok(Quarantined { from, to })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u8(self.kind().0);
        put_unique_address(writer, &self.from);
        put_unique_address(writer, &self.to);
        Ok(writer.len())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}
