use crate::commitlog;
use crate::grpc::ProtoLogEntryKind;
use crate::replica::local_state::Term;
use bytes::Bytes;
use std::convert::TryFrom;
use std::io;

/// What a log entry carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum EntryKind {
    /// An encoded journal batch.
    Data,
    /// An encoded cluster config, in effect once committed.
    Config,
    /// Appended by a new leader so it can commit entries of earlier terms.
    Noop,
}

impl EntryKind {
    fn to_byte(self) -> u8 {
        match self {
            EntryKind::Data => 0,
            EntryKind::Config => 1,
            EntryKind::Noop => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(EntryKind::Data),
            1 => Some(EntryKind::Config),
            2 => Some(EntryKind::Noop),
            _ => None,
        }
    }

    pub(crate) fn to_proto(self) -> i32 {
        let kind = match self {
            EntryKind::Data => ProtoLogEntryKind::Data,
            EntryKind::Config => ProtoLogEntryKind::Config,
            EntryKind::Noop => ProtoLogEntryKind::Noop,
        };
        kind as i32
    }

    pub(crate) fn from_proto(kind: i32) -> Option<Self> {
        match ProtoLogEntryKind::from_i32(kind)? {
            ProtoLogEntryKind::Data => Some(EntryKind::Data),
            ProtoLogEntryKind::Config => Some(EntryKind::Config),
            ProtoLogEntryKind::Noop => Some(EntryKind::Noop),
        }
    }
}

/// Byte representation:
///
/// ```text
/// |                                         1                           |
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 0 | 1 | 2 | 3 | 4 | 5 | ... |
/// +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+-...-+
/// |Vrs|       Term (8 bytes LE)       |Knd|   Data (variable size)  ... |
/// +---+-------------------------------+---+-------------------------...-+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `Term` - raft leadership term when this entry was created
/// * `Knd` - [`EntryKind`]
/// * `Data` - batch or config payload, empty for no-ops
///
/// Checksum and length are left to the underlying commitlog.
#[derive(Clone, Debug)]
pub(crate) struct WriteAheadLogEntry {
    pub(crate) term: Term,
    pub(crate) kind: EntryKind,
    pub(crate) data: Bytes,
}

const RAFT_LOG_ENTRY_FORMAT_VERSION: u8 = 2;
const HEADER_LEN: usize = 1 + 8 + 1;

impl WriteAheadLogEntry {
    pub(crate) fn noop(term: Term) -> Self {
        WriteAheadLogEntry {
            term,
            kind: EntryKind::Noop,
            data: Bytes::new(),
        }
    }
}

impl commitlog::Entry for WriteAheadLogEntry {}

impl TryFrom<Vec<u8>> for WriteAheadLogEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() < HEADER_LEN {
            return Err(invalid_data(format!("log entry too short: {} bytes", bytes.len())));
        }
        if bytes[0] != RAFT_LOG_ENTRY_FORMAT_VERSION {
            return Err(invalid_data(format!("unknown log entry version {}", bytes[0])));
        }

        let mut term_bytes = [0u8; 8];
        term_bytes.copy_from_slice(&bytes[1..9]);
        let kind = EntryKind::from_byte(bytes[9])
            .ok_or_else(|| invalid_data(format!("unknown log entry kind {}", bytes[9])))?;

        let mut bytes = Bytes::from(bytes);
        let data = bytes.split_off(HEADER_LEN);
        Ok(WriteAheadLogEntry {
            term: Term::new(u64::from_le_bytes(term_bytes)),
            kind,
            data,
        })
    }
}

impl From<WriteAheadLogEntry> for Vec<u8> {
    fn from(entry: WriteAheadLogEntry) -> Self {
        let mut bytes = Vec::with_capacity(HEADER_LEN + entry.data.len());
        bytes.push(RAFT_LOG_ENTRY_FORMAT_VERSION);
        bytes.extend_from_slice(&entry.term.as_u64().to_le_bytes());
        bytes.push(entry.kind.to_byte());
        bytes.extend_from_slice(&entry.data);
        bytes
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_stable() {
        let entry = WriteAheadLogEntry {
            term: Term::new(0x0102),
            kind: EntryKind::Config,
            data: Bytes::from_static(b"xy"),
        };
        let bytes: Vec<u8> = entry.into();
        assert_eq!(bytes, vec![2, 0x02, 0x01, 0, 0, 0, 0, 0, 0, 1, b'x', b'y']);

        let parsed = WriteAheadLogEntry::try_from(bytes).unwrap();
        assert_eq!(parsed.term, Term::new(0x0102));
        assert_eq!(parsed.kind, EntryKind::Config);
        assert_eq!(&parsed.data[..], b"xy");
    }

    #[test]
    fn rejects_garbage() {
        assert!(WriteAheadLogEntry::try_from(vec![2, 0, 0]).is_err());
        assert!(WriteAheadLogEntry::try_from(vec![1; HEADER_LEN]).is_err());

        let mut unknown_kind: Vec<u8> = WriteAheadLogEntry::noop(Term::new(1)).into();
        unknown_kind[9] = 7;
        assert!(WriteAheadLogEntry::try_from(unknown_kind).is_err());
    }
}
