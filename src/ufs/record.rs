use crate::codec;
use crate::commitlog::Entry;
use crate::schema::JournalEntry;
use std::convert::TryFrom;
use std::io;

/// One logged batch, as stored in a domain's segment files.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct UfsLogRecord(pub JournalEntry);

impl UfsLogRecord {
    pub fn num_entries(&self) -> u64 {
        if self.0.entry.is_some() {
            1
        } else {
            self.0.journal_entries.len() as u64
        }
    }
}

impl Entry for UfsLogRecord {}

impl TryFrom<Vec<u8>> for UfsLogRecord {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        codec::decode_message(&bytes).map(UfsLogRecord)
    }
}

impl From<UfsLogRecord> for Vec<u8> {
    fn from(record: UfsLogRecord) -> Self {
        codec::encode_message(&record.0)
    }
}
