use crate::commitlog;
use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::write_ahead_log::WriteAheadLogEntry;
use std::io;

/// WriteAheadLog is the raft-specific log facade.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - written to disk, not yet replicated to majority
/// 2. Committed - written to disk, replicated to majority
/// 3. Applied - a committed entry that has also been applied to the state machine
///
/// A log entry's state has no global truth. Each replica will have their own local view of what
/// state the log entry is in.
///
/// Entries up to and including the snapshot base have been folded into a snapshot and may no
/// longer be readable.
pub(crate) struct WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    // Application's info/debug log.
    logger: slog::Logger,

    // This is the log that we're replicating.
    log: L,
    // Last entry covered by the most recent snapshot.
    snapshot_base: Option<(Term, Index)>,
    // Metadata about the highest log entry that we've locally written. It must be updated atomically.
    latest_entry_metadata: Option<(Term, Index)>,

    // Index of highest log entry known to be committed. None if nothing is committed.
    commit_index: Option<Index>,
    // Index of highest log entry applied to state machine. None if nothing is applied.
    last_applied_index: Option<Index>,
}

impl<L> WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    /// `snapshot_base` must describe the snapshot the state machine was restored from, if any.
    /// A log that doesn't connect to the snapshot is discarded.
    pub(crate) fn new(logger: slog::Logger, mut log: L, snapshot_base: Option<(Term, Index)>) -> io::Result<Self> {
        match snapshot_base {
            Some((snapshot_term, snapshot_index)) => {
                let resume_index = snapshot_index.plus(1);
                let connects = log.first_index() <= resume_index && log.next_index() >= resume_index;
                let agrees = connects
                    && match log.read(snapshot_index)? {
                        Some(entry) => entry.term == snapshot_term,
                        None => true,
                    };
                if !agrees {
                    slog::warn!(
                        logger,
                        "Log [{:?}, {:?}) doesn't follow snapshot at {:?}, discarding it",
                        log.first_index(),
                        log.next_index(),
                        snapshot_index
                    );
                    log.reset(resume_index)?;
                }
            }
            None => {
                if log.first_index() != Index::start_index() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "Log starts at {:?} but there is no snapshot covering the entries before it",
                            log.first_index()
                        ),
                    ));
                }
            }
        }

        let latest_entry_metadata = match log.next_index().checked_minus(1) {
            Some(last_index) if last_index >= log.first_index() => {
                let entry = log.read(last_index)?.ok_or_else(|| missing_entry(last_index))?;
                Some((entry.term, last_index))
            }
            _ => snapshot_base,
        };
        let snapshot_index = snapshot_base.map(|(_, index)| index);

        Ok(WriteAheadLog {
            logger,
            log,
            snapshot_base,
            latest_entry_metadata,
            commit_index: snapshot_index,
            last_applied_index: snapshot_index,
        })
    }

    pub(crate) fn latest_entry(&self) -> Option<(Term, Index)> {
        self.latest_entry_metadata
    }

    pub(crate) fn snapshot_base(&self) -> Option<(Term, Index)> {
        self.snapshot_base
    }

    /// Lowest index still readable from the log.
    pub(crate) fn first_index(&self) -> Index {
        self.log.first_index()
    }

    pub(crate) fn read(&self, index: Index) -> Result<Option<WriteAheadLogEntry>, io::Error> {
        self.log.read(index)
    }

    pub(crate) fn read_required(&self, index: Index) -> Result<WriteAheadLogEntry, io::Error> {
        self.read(index)?.ok_or_else(|| missing_entry(index))
    }

    /// Term of the entry at `index`. None if there is no such entry, or it was compacted away.
    pub(crate) fn term_at(&self, index: Index) -> Result<Option<Term>, io::Error> {
        if let Some((snapshot_term, snapshot_index)) = self.snapshot_base {
            if index == snapshot_index {
                return Ok(Some(snapshot_term));
            }
        }
        Ok(self.read(index)?.map(|entry| entry.term))
    }

    /// Up to `max_entries` entries starting at `start`, stopping at the end of the log.
    pub(crate) fn entries_from(&self, start: Index, max_entries: usize) -> Result<Vec<WriteAheadLogEntry>, io::Error> {
        let mut entries = Vec::new();
        let mut index = start;
        while entries.len() < max_entries && index < self.log.next_index() {
            entries.push(self.read_required(index)?);
            index = index.plus(1);
        }
        Ok(entries)
    }

    /// Remove anything starting at `index` and later.
    pub(crate) fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        if matches!(self.commit_index, Some(ci) if index <= ci) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Refusing to truncate committed entries. Truncate at {:?}, commit index {:?}",
                    index, self.commit_index
                ),
            ));
        }

        let new_latest_entry_metadata = match index.checked_minus(1) {
            Some(new_latest_index) => self
                .term_at(new_latest_index)?
                .map(|term| (term, new_latest_index)),
            None => None,
        };

        self.log.truncate(index)?;
        self.latest_entry_metadata = new_latest_entry_metadata;
        Ok(())
    }

    pub(crate) fn append(&mut self, entry: WriteAheadLogEntry) -> Result<Index, io::Error> {
        let appended_term = entry.term;
        let appended_index = self.log.append(entry)?;
        // Only update state after log action completes.
        self.latest_entry_metadata = Some((appended_term, appended_index));

        Ok(appended_index)
    }

    pub(crate) fn commit_index(&self) -> Option<Index> {
        self.commit_index
    }

    pub(crate) fn last_applied_index(&self) -> Option<Index> {
        self.last_applied_index
    }

    /// Leader side. Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
    ) -> Result<bool, io::Error> {
        if matches!(self.commit_index, Some(ci) if tentative_new_commit_index <= ci) {
            return Ok(false);
        }
        if !self.is_written_locally(tentative_new_commit_index) {
            slog::warn!(
                self.logger,
                "Ignoring commit index {:?} past our latest entry {:?}",
                tentative_new_commit_index,
                self.latest_entry_metadata
            );
            return Ok(false);
        }

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        if self.term_at(tentative_new_commit_index)? != Some(current_term) {
            return Ok(false);
        }

        self.commit_index.replace(tentative_new_commit_index);
        Ok(true)
    }

    /// Follower side. The leader's commit index is capped at what we have written locally.
    pub(crate) fn ratchet_fwd_commit_index_if_changed(&mut self, leader_commit_index: Index) {
        let latest_index = match self.latest_entry_metadata {
            Some((_, index)) => index,
            None => return,
        };
        let new_commit_index = leader_commit_index.min(latest_index);
        if matches!(self.commit_index, Some(ci) if new_commit_index <= ci) {
            return;
        }
        self.commit_index.replace(new_commit_index);
    }

    /// The next committed entry to apply, if any.
    pub(crate) fn next_entry_to_apply(&self) -> Result<Option<(Index, WriteAheadLogEntry)>, io::Error> {
        let commit_index = match self.commit_index {
            Some(ci) => ci,
            None => return Ok(None),
        };
        let next_index = match self.last_applied_index {
            Some(applied) if applied >= commit_index => return Ok(None),
            Some(applied) => applied.plus(1),
            None => Index::start_index(),
        };
        let entry = self.read_required(next_index)?;
        Ok(Some((next_index, entry)))
    }

    pub(crate) fn mark_applied(&mut self, index: Index) {
        self.last_applied_index.replace(index);
    }

    /// Records that a snapshot covers everything up to `index`, and drops older entries while
    /// keeping `retained_entries` before the snapshot for lagging followers.
    pub(crate) fn compact(&mut self, term: Term, index: Index, retained_entries: u64) -> Result<(), io::Error> {
        if matches!(self.snapshot_base, Some((_, base)) if base >= index) {
            return Ok(());
        }
        self.snapshot_base = Some((term, index));
        if let Some(cutoff) = index.plus(1).checked_minus(retained_entries) {
            if cutoff > self.log.first_index() {
                self.log.truncate_prefix(cutoff)?;
                slog::info!(
                    self.logger,
                    "Compacted log up to snapshot at {:?}. Log now starts at {:?}",
                    index,
                    self.log.first_index()
                );
            }
        }
        Ok(())
    }

    /// Makes the log follow a snapshot received from the leader. Returns false if we already
    /// applied past the snapshot and nothing changed.
    pub(crate) fn install_snapshot(&mut self, term: Term, index: Index) -> Result<bool, io::Error> {
        if matches!(self.last_applied_index, Some(applied) if applied >= index) {
            return Ok(false);
        }

        // > If existing log entry has same index and term as snapshot’s last included entry,
        // > retain log entries following it
        let keeps_suffix = matches!(self.read(index)?, Some(entry) if entry.term == term);
        if keeps_suffix {
            self.log.truncate_prefix(index.plus(1))?;
        } else {
            self.log.reset(index.plus(1))?;
            self.latest_entry_metadata = Some((term, index));
        }

        self.snapshot_base = Some((term, index));
        if !matches!(self.commit_index, Some(ci) if ci >= index) {
            self.commit_index.replace(index);
        }
        self.last_applied_index.replace(index);
        Ok(true)
    }

    fn is_written_locally(&self, index: Index) -> bool {
        matches!(self.latest_entry_metadata, Some((_, latest)) if latest >= index)
    }
}

fn missing_entry(index: Index) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("No log entry found for index {:?}", index),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::InMemoryLog;
    use crate::replica::write_ahead_log::EntryKind;
    use bytes::Bytes;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn entry(term: u64) -> WriteAheadLogEntry {
        WriteAheadLogEntry {
            term: Term::new(term),
            kind: EntryKind::Data,
            data: Bytes::from(vec![term as u8]),
        }
    }

    fn wal_with_terms(terms: &[u64]) -> WriteAheadLog<InMemoryLog<WriteAheadLogEntry>> {
        let mut wal = WriteAheadLog::new(logger(), InMemoryLog::create(), None).unwrap();
        for term in terms {
            wal.append(entry(*term)).unwrap();
        }
        wal
    }

    #[test]
    fn commit_requires_entry_of_current_term() {
        let mut wal = wal_with_terms(&[1, 1, 2]);

        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(2), Term::new(2)).unwrap());
        assert_eq!(wal.commit_index(), None);

        assert!(wal.ratchet_fwd_commit_index_if_valid(Index::new(3), Term::new(2)).unwrap());
        assert_eq!(wal.commit_index(), Some(Index::new(3)));

        // Never backwards, never past the log.
        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(2), Term::new(2)).unwrap());
        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(9), Term::new(2)).unwrap());
        assert_eq!(wal.commit_index(), Some(Index::new(3)));
    }

    #[test]
    fn follower_commit_is_capped_at_local_log() {
        let mut wal = wal_with_terms(&[1, 1]);
        wal.ratchet_fwd_commit_index_if_changed(Index::new(5));
        assert_eq!(wal.commit_index(), Some(Index::new(2)));

        wal.ratchet_fwd_commit_index_if_changed(Index::new(1));
        assert_eq!(wal.commit_index(), Some(Index::new(2)));
    }

    #[test]
    fn applies_committed_entries_in_order() {
        let mut wal = wal_with_terms(&[1, 1, 1]);
        assert!(wal.next_entry_to_apply().unwrap().is_none());

        wal.ratchet_fwd_commit_index_if_changed(Index::new(2));
        let mut applied = Vec::new();
        while let Some((index, _)) = wal.next_entry_to_apply().unwrap() {
            applied.push(index);
            wal.mark_applied(index);
        }
        assert_eq!(applied, vec![Index::new(1), Index::new(2)]);
    }

    #[test]
    fn truncate_stops_at_commit_index() {
        let mut wal = wal_with_terms(&[1, 1, 2, 2]);
        wal.ratchet_fwd_commit_index_if_changed(Index::new(2));

        assert!(wal.truncate(Index::new(2)).is_err());
        wal.truncate(Index::new(3)).unwrap();
        assert_eq!(wal.latest_entry(), Some((Term::new(1), Index::new(2))));
    }

    #[test]
    fn compaction_keeps_terms_answerable() {
        let mut wal = wal_with_terms(&[1, 1, 2, 2, 2, 3]);
        wal.ratchet_fwd_commit_index_if_valid(Index::new(6), Term::new(3)).unwrap();
        wal.compact(Term::new(2), Index::new(5), 1).unwrap();

        assert_eq!(wal.first_index(), Index::new(5));
        assert_eq!(wal.term_at(Index::new(5)).unwrap(), Some(Term::new(2)));
        assert_eq!(wal.term_at(Index::new(2)).unwrap(), None);
        assert_eq!(wal.latest_entry(), Some((Term::new(3), Index::new(6))));
    }

    #[test]
    fn installed_snapshot_replaces_conflicting_log() {
        let mut wal = wal_with_terms(&[1, 1]);
        assert!(wal.install_snapshot(Term::new(4), Index::new(10)).unwrap());

        assert_eq!(wal.latest_entry(), Some((Term::new(4), Index::new(10))));
        assert_eq!(wal.commit_index(), Some(Index::new(10)));
        assert_eq!(wal.last_applied_index(), Some(Index::new(10)));
        assert_eq!(wal.first_index(), Index::new(11));

        // Stale snapshots are ignored.
        assert!(!wal.install_snapshot(Term::new(4), Index::new(8)).unwrap());

        let next = wal.append(entry(4)).unwrap();
        assert_eq!(next, Index::new(11));
    }

    #[test]
    fn reopening_resumes_after_snapshot() {
        let mut log = InMemoryLog::create();
        for term in &[1, 1, 2] {
            commitlog::Log::append(&mut log, entry(*term)).unwrap();
        }
        let wal = WriteAheadLog::new(logger(), log, Some((Term::new(1), Index::new(2)))).unwrap();
        assert_eq!(wal.latest_entry(), Some((Term::new(2), Index::new(3))));
        assert_eq!(wal.commit_index(), Some(Index::new(2)));
        assert_eq!(wal.next_entry_to_apply().unwrap().map(|(i, _)| i), None);

        // A log from another history is dropped.
        let mut log = InMemoryLog::create();
        commitlog::Log::append(&mut log, entry(1)).unwrap();
        let wal = WriteAheadLog::new(logger(), log, Some((Term::new(5), Index::new(7)))).unwrap();
        assert_eq!(wal.first_index(), Index::new(8));
        assert_eq!(wal.latest_entry(), Some((Term::new(5), Index::new(7))));
    }
}
