use crate::schema::{JournalEntry, OperationIdProto};
use std::fmt;

/// SequenceNumber orders every applied journal entry. The first entry ever applied is 1, and
/// applied entries form a contiguous run from there.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        SequenceNumber(value)
    }

    /// Wire formats use 0 (or anything negative) for "no sequence number".
    pub fn from_wire(value: i64) -> Option<Self> {
        if value <= 0 {
            None
        } else {
            Some(SequenceNumber(value as u64))
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_wire(&self) -> i64 {
        self.0 as i64
    }

    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0 + 1)
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OperationId identifies one logical write. A retry of the same write carries the same id, which
/// is how duplicates get recognized after a failover.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct OperationId(u128);

impl OperationId {
    pub fn random() -> Self {
        OperationId(rand::random())
    }

    pub fn from_parts(most_significant_bits: u64, least_significant_bits: u64) -> Self {
        OperationId(((most_significant_bits as u128) << 64) | least_significant_bits as u128)
    }

    pub fn from_proto(proto: &OperationIdProto) -> Self {
        Self::from_parts(proto.most_significant_bits, proto.least_significant_bits)
    }

    pub fn to_proto(&self) -> OperationIdProto {
        OperationIdProto {
            most_significant_bits: (self.0 >> 64) as u64,
            least_significant_bits: self.0 as u64,
        }
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// JournalBatch is what one JournalContext accumulated: mutations that commit together or not at
/// all. Entries carry no sequence numbers until the batch is stamped.
#[derive(Clone, Debug, PartialEq)]
pub struct JournalBatch {
    pub operation_id: OperationId,
    pub entries: Vec<JournalEntry>,
}

impl JournalBatch {
    /// The wire form of a batch: a wrapper entry with no mutation of its own.
    pub fn into_record(self) -> JournalEntry {
        JournalEntry {
            sequence_number: 0,
            operation_id: Some(self.operation_id.to_proto()),
            journal_entries: self.entries,
            entry: None,
        }
    }

    /// Reads a record back into a batch. A record that carries its own mutation is a batch of one.
    pub fn from_record(record: JournalEntry) -> Option<Self> {
        let operation_id = record.operation_id.as_ref().map(OperationId::from_proto)?;
        let entries = if record.entry.is_some() {
            vec![record]
        } else {
            record.journal_entries
        };
        Some(JournalBatch {
            operation_id,
            entries,
        })
    }
}

/// What a writer learns once its batch is durable and applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BatchReceipt {
    pub operation_id: OperationId,
    /// Sequence number of the batch's last entry. None when nothing new was applied.
    pub last_sequence_number: Option<SequenceNumber>,
    /// The operation had already been applied, so this write changed nothing.
    pub duplicate: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SequenceCheck {
    Next,
    AlreadyApplied,
    Gap {
        expected: SequenceNumber,
        found: SequenceNumber,
    },
}

/// Sequencer tracks the last applied sequence number of one journal.
#[derive(Debug, Clone)]
pub struct Sequencer {
    last_applied: Option<SequenceNumber>,
}

impl Sequencer {
    pub fn new(last_applied: Option<SequenceNumber>) -> Self {
        Sequencer { last_applied }
    }

    pub fn last_applied(&self) -> Option<SequenceNumber> {
        self.last_applied
    }

    pub fn next_expected(&self) -> SequenceNumber {
        match self.last_applied {
            Some(last) => last.next(),
            None => SequenceNumber(1),
        }
    }

    /// Writes the next sequence numbers into `entries` without advancing. Returns the number given
    /// to the last entry.
    pub fn stamp(&self, entries: &mut [JournalEntry]) -> Option<SequenceNumber> {
        let mut last = None;
        let mut next = self.next_expected();
        for entry in entries.iter_mut() {
            entry.sequence_number = next.to_wire();
            last = Some(next);
            next = next.next();
        }
        last
    }

    pub fn check_next(&self, found: SequenceNumber) -> SequenceCheck {
        let expected = self.next_expected();
        if found == expected {
            SequenceCheck::Next
        } else if found < expected {
            SequenceCheck::AlreadyApplied
        } else {
            SequenceCheck::Gap { expected, found }
        }
    }

    pub fn advance_to(&mut self, applied: SequenceNumber) {
        self.last_applied = Some(applied);
    }
}
