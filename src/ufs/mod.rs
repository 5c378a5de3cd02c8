//! The file-backed journal: one log and one checkpoint directory per domain.

mod journal;
mod record;

pub(crate) use journal::UfsJournal;
pub(crate) use record::UfsLogRecord;
