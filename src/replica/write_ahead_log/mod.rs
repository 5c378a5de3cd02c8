//! This module is a raft-specific commit log that wraps the generic commit log: it knows about
//! terms, entry kinds, the commit and apply indexes, and where the last snapshot left off.

mod log;
mod log_entry;

pub(crate) use log::WriteAheadLog;
pub(crate) use log_entry::EntryKind;
pub(crate) use log_entry::WriteAheadLogEntry;
