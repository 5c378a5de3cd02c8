use crate::commitlog::Index;
use crate::replica::election::timers::HeartbeatTimerHandle;
use crate::replica::peers::ReplicaId;
use std::collections::{HashMap, HashSet};

pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<ReplicaId, PeerState>,
}

impl LeaderStateTracker {
    pub(super) fn new(peer_state: HashMap<ReplicaId, PeerState>) -> Self {
        LeaderStateTracker { peer_state }
    }

    pub(super) fn insert(&mut self, peer_id: ReplicaId, peer_state: PeerState) {
        self.peer_state.insert(peer_id, peer_state);
    }

    pub(super) fn retain(&mut self, mut keep: impl FnMut(&ReplicaId) -> bool) {
        self.peer_state.retain(|id, _| keep(id));
    }

    pub(crate) fn peer_state(&self, peer_id: &ReplicaId) -> Option<&PeerState> {
        self.peer_state.get(peer_id)
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &ReplicaId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    pub(crate) fn peer_ids(&self) -> HashSet<ReplicaId> {
        self.peer_state.keys().cloned().collect()
    }

    pub(crate) fn peers_iter(&self) -> impl Iterator<Item = (&ReplicaId, &PeerState)> {
        self.peer_state.iter()
    }
}

pub(crate) struct PeerState {
    // Held to send heartbeats for this peer
    heartbeat_timer: HeartbeatTimerHandle,

    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Option<Index>,

    // SeqNo is a form of a logical clock that tracks a term leader's interactions with a peer. When
    // a replica becomes leader, it initializes last sent/received to 0. Each time leader sends a
    // request, it increments the last sent SeqNo and ensures the response will be associated with
    // that SeqNo. If a leader receives a SeqNo from earlier than a previously received SeqNo, it
    // discards it.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,
}

impl PeerState {
    pub(super) fn new(heartbeat_timer: HeartbeatTimerHandle, latest_log_index: Option<Index>) -> Self {
        PeerState {
            heartbeat_timer,
            next: latest_log_index
                .map(|i| i.plus(1))
                .unwrap_or_else(Index::start_index),
            matched: None,
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
        }
    }

    pub(crate) fn next_and_previous_log_index(&self) -> (Index, Option<Index>) {
        (self.next, self.next.checked_minus(1))
    }

    pub(crate) fn matched(&self) -> Option<Index> {
        self.matched
    }

    pub(crate) fn handle_append_entries_result(
        &mut self,
        logger: &slog::Logger,
        received_seq_no: u64,
        update: PeerStateUpdate,
    ) {
        if !self.ratchet_fwd_received_seq_no(received_seq_no) {
            slog::warn!(
                logger,
                "Dropping out of date seq-no({:?}): {:?}",
                received_seq_no,
                update
            );
            return;
        }

        match update {
            PeerStateUpdate::OtherError => { /* No action */ }
            PeerStateUpdate::Success {
                previous_log_entry,
                num_entries_replicated,
            } => {
                self.update_log(logger, previous_log_entry, num_entries_replicated);
            }
            PeerStateUpdate::PeerLogBehind { last_log_index } => {
                self.rewind_log(logger, last_log_index);
            }
            PeerStateUpdate::SnapshotInstalled { last_included_index } => {
                self.matched = Some(self.matched.map_or(last_included_index, |m| m.max(last_included_index)));
                self.next = last_included_index.plus(1).max(self.next);
            }
        }
    }

    fn update_log(&mut self, logger: &slog::Logger, previous_log_entry: Option<Index>, num_entries_replicated: usize) {
        // A successful heartbeat still proves the peer agrees with us up to `previous_log_entry`.
        let new_matched = match (previous_log_entry, num_entries_replicated) {
            (None, 0) => return,
            (Some(prev), 0) => prev,
            (None, n) => Index::new_usize(n),
            (Some(prev), n) => prev.plus(n as u64),
        };

        // Don't panic here, a reordered or duplicated reply could claim less than we know.
        if matches!(self.matched, Some(matched) if new_matched < matched) {
            slog::warn!(
                logger,
                "Ignoring match index moving backwards. CurrentMatched={:?}, NewMatched={:?}",
                self.matched,
                new_matched
            );
            return;
        }

        self.matched.replace(new_matched);
        self.next = self.next.max(new_matched.plus(1));
    }

    fn rewind_log(&mut self, logger: &slog::Logger, peer_last_log_index: Option<Index>) {
        // Don't panic here, because peer could return garbage data.
        if self.matched.is_some() {
            slog::warn!(
                logger,
                "Illegal state: Can't handle AppendEntries rewind error after any success. Not mutating state."
            );
            return;
        }

        let one_back = match self.next.checked_minus(1) {
            Some(one_back) => one_back,
            None => {
                slog::warn!(logger, "Can't rewind peer log, already at beginning of log.");
                return;
            }
        };
        // The peer told us where its log ends, so skip straight there.
        let hinted = peer_last_log_index
            .map(|i| i.plus(1))
            .unwrap_or_else(Index::start_index);
        self.next = one_back.min(hinted);
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    pub(crate) fn next_seq_no(&mut self) -> u64 {
        self.last_sent_seq_no += 1;
        self.last_sent_seq_no
    }

    /// returns true if the state was mutated.
    fn ratchet_fwd_received_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset_heartbeat_timer(&self) {
        self.heartbeat_timer.reset_heartbeat_timer();
    }
}

#[derive(Debug)]
pub(crate) enum PeerStateUpdate {
    Success {
        previous_log_entry: Option<Index>,
        num_entries_replicated: usize,
    },
    PeerLogBehind {
        last_log_index: Option<Index>,
    },
    SnapshotInstalled {
        last_included_index: Index,
    },
    OtherError,
}
