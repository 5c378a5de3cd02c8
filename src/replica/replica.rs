use crate::actor::{Callback, WeakActorClient};
use crate::commitlog::{Index, Log};
use crate::journal::{BatchReceipt, OperationId, SequenceNumber};
use crate::replay::ApplyOutcome;
use crate::replica::election::{
    CurrentLeader, ElectionConfig, ElectionState, ElectionStateChangeListener, PeerStateUpdate,
};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::peer_calls::{self, ReplicateError, ReplicationRequest};
use crate::replica::peers::{ClusterConfig, ClusterTracker, ReplicaId};
use crate::replica::replica_api::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, AppendEntriesReplyFromPeer,
    AppendEntriesReplyFromPeerError, EnqueueForReplicationError, EnqueueForReplicationInput,
    EnqueueForReplicationOutput, HeartbeatTick, InstallSnapshotError, InstallSnapshotInput, InstallSnapshotOutput,
    InstallSnapshotReplyFromPeer, LeaderRedirectInfo, MembershipChange, QuorumMemberState, QuorumState, RaftRole,
    RequestVoteError, RequestVoteInput, RequestVoteOutput, RequestVoteReplyFromPeer, RequestVoteResult,
    SnapshotError, SnapshotPersisted, TermOutOfDateInfo,
};
use crate::replica::snapshot::{SnapshotPayload, SnapshotTracker, SnapshotWaiter};
use crate::replica::state_machine::JournalStateMachine;
use crate::replica::write_ahead_log::{EntryKind, WriteAheadLog, WriteAheadLogEntry};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tokio::time::Duration;

pub(crate) struct ReplicaConfig<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    pub(crate) logger: slog::Logger,
    pub(crate) cluster_tracker: ClusterTracker,
    pub(crate) log: WriteAheadLog<L>,
    pub(crate) local_state: S,
    pub(crate) state_machine: JournalStateMachine,
    pub(crate) snapshots: SnapshotTracker,
    pub(crate) actor_client: WeakActorClient,
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
    pub(crate) append_entries_timeout: Duration,
    pub(crate) max_entries_per_append: usize,
    pub(crate) snapshot_retained_entries: u64,
}

type WriteCallback = Callback<EnqueueForReplicationOutput, EnqueueForReplicationError>;
type MembershipCallback = Callback<(), EnqueueForReplicationError>;
type SnapshotCallback = Callback<Option<SequenceNumber>, SnapshotError>;

/// A client write waiting for its entry to be applied.
struct PendingWrite {
    term: Term,
    operation_id: OperationId,
    callback: WriteCallback,
}

pub(crate) struct Replica<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    cluster_tracker: ClusterTracker,
    local_state: S,
    election_state: ElectionState,
    log: WriteAheadLog<L>,
    state_machine: JournalStateMachine,
    snapshots: SnapshotTracker,
    actor_client: WeakActorClient,

    pending_writes: BTreeMap<Index, PendingWrite>,
    pending_membership_change: Option<(Index, MembershipCallback)>,
    snapshot_waiters: Vec<SnapshotWaiter<SnapshotCallback>>,
    // The no-op a leader appends on election. Membership changes wait for it to commit.
    leader_noop_index: Option<Index>,
    // Set when the journal can't be applied any further. The replica stops taking writes and
    // stops campaigning.
    failure: Option<String>,

    append_entries_timeout: Duration,
    max_entries_per_append: usize,
    snapshot_retained_entries: u64,
}

impl<L, S> Replica<L, S>
where
    L: Log<WriteAheadLogEntry> + 'static,
    S: PersistentLocalState + 'static,
{
    pub(crate) fn new(config: ReplicaConfig<L, S>) -> (Self, ElectionStateChangeListener) {
        let my_replica_id = config.cluster_tracker.my_replica_id().clone();
        let (election_state, listener) = ElectionState::new_follower(
            ElectionConfig {
                my_replica_id: my_replica_id.clone(),
                leader_heartbeat_duration: config.leader_heartbeat_duration,
                follower_min_timeout: config.follower_min_timeout,
                follower_max_timeout: config.follower_max_timeout,
            },
            config.actor_client.clone(),
        );

        let replica = Replica {
            logger: config.logger,
            my_replica_id,
            cluster_tracker: config.cluster_tracker,
            local_state: config.local_state,
            election_state,
            log: config.log,
            state_machine: config.state_machine,
            snapshots: config.snapshots,
            actor_client: config.actor_client,
            pending_writes: BTreeMap::new(),
            pending_membership_change: None,
            snapshot_waiters: Vec::new(),
            leader_noop_index: None,
            failure: None,
            append_entries_timeout: config.append_entries_timeout,
            max_entries_per_append: config.max_entries_per_append,
            snapshot_retained_entries: config.snapshot_retained_entries,
        };

        (replica, listener)
    }

    // ------- Client writes -------

    pub(crate) fn handle_enqueue_for_replication(&mut self, input: EnqueueForReplicationInput, callback: WriteCallback) {
        if let Some(e) = self.check_writable() {
            callback.send(Err(e));
            return;
        }

        // A retried operation that already made it in is acknowledged without appending again.
        if self.state_machine.has_applied(&input.operation_id) {
            slog::info!(self.logger, "Operation {:?} was already applied", input.operation_id);
            callback.send(Ok(BatchReceipt {
                operation_id: input.operation_id,
                last_sequence_number: None,
                duplicate: true,
            }));
            return;
        }

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        let term = self.local_state.current_term();
        let appended_index = match self.log.append(WriteAheadLogEntry {
            term,
            kind: EntryKind::Data,
            data: input.data,
        }) {
            Ok(index) => index,
            Err(e) => {
                callback.send(Err(EnqueueForReplicationError::LocalIoError(e)));
                return;
            }
        };

        self.pending_writes.insert(
            appended_index,
            PendingWrite {
                term,
                operation_id: input.operation_id,
                callback,
            },
        );

        self.replicate_to_all_peers();
        self.advance_commit_index();
    }

    pub(crate) fn handle_change_membership(&mut self, change: MembershipChange, callback: MembershipCallback) {
        if let Some(e) = self.check_writable() {
            callback.send(Err(e));
            return;
        }

        // One change at a time, and not before this term's no-op committed. Otherwise a change
        // from a previous term could still be in flight, uncommitted, in someone's log.
        let noop_committed = matches!(
            (self.leader_noop_index, self.log.commit_index()),
            (Some(noop), Some(ci)) if ci >= noop
        );
        if self.cluster_tracker.pending_change().is_some()
            || self.pending_membership_change.is_some()
            || !noop_committed
        {
            callback.send(Err(EnqueueForReplicationError::ChangeInProgress));
            return;
        }

        let committed = self.cluster_tracker.committed_config();
        let new_config = match &change {
            MembershipChange::Add(member) => committed.with_member(member.clone()),
            MembershipChange::Remove(replica_id) => committed.without_member(replica_id),
        };
        let new_config = match new_config {
            Ok(config) => config,
            Err(e) => {
                callback.send(Err(EnqueueForReplicationError::InvalidMembershipChange(e.to_string())));
                return;
            }
        };

        let term = self.local_state.current_term();
        let appended_index = match self.log.append(WriteAheadLogEntry {
            term,
            kind: EntryKind::Config,
            data: new_config.encode().into(),
        }) {
            Ok(index) => index,
            Err(e) => {
                callback.send(Err(EnqueueForReplicationError::LocalIoError(e)));
                return;
            }
        };
        slog::info!(self.logger, "Proposing membership change {:?} at {:?}", change, appended_index);

        self.cluster_tracker.propose(appended_index, new_config);
        self.sync_leader_peers();
        self.pending_membership_change = Some((appended_index, callback));

        self.replicate_to_all_peers();
        self.advance_commit_index();
    }

    /// Returns why this replica can't take writes right now, if it can't.
    fn check_writable(&self) -> Option<EnqueueForReplicationError> {
        if let Some(failure) = &self.failure {
            return Some(EnqueueForReplicationError::StateMachineFailed(failure.clone()));
        }

        match self.election_state.current_leader() {
            CurrentLeader::Me => None,
            CurrentLeader::Other(leader_id) => match self.cluster_tracker.metadata(&leader_id) {
                Some(leader) => Some(EnqueueForReplicationError::LeaderRedirect(LeaderRedirectInfo {
                    replica_id: leader_id,
                    ip_addr: leader.ip_addr(),
                    port: leader.port(),
                })),
                // Leader we've never heard of, e.g. config change we haven't applied yet.
                None => Some(EnqueueForReplicationError::NoLeader),
            },
            CurrentLeader::Unknown => Some(EnqueueForReplicationError::NoLeader),
        }
    }

    // ------- RequestVote -------

    pub(crate) fn server_handle_request_vote(
        &mut self,
        input: RequestVoteInput,
    ) -> Result<RequestVoteOutput, RequestVoteError> {
        // Only voters may campaign. Checked before looking at the term, so a removed member can't
        // disrupt the cluster by bumping terms.
        if !self.cluster_tracker.is_voter(&input.candidate_id) {
            slog::info!(
                self.logger,
                "Not granting vote. {:?} is not a voting member.",
                input.candidate_id
            );
            return Err(RequestVoteError::CandidateNotInCluster);
        }

        // Read our local term/vote state as 1 atomic action.
        let (current_term, mut opt_voted_for) = self.local_state.voted_for_current_term();

        // 1. Reply false if term < currentTerm (§5.1)
        if input.candidate_term < current_term {
            slog::info!(self.logger, "Not granting vote. Client term is out of date.");
            return Err(RequestVoteError::RequestTermOutOfDate(TermOutOfDateInfo {
                current_term,
            }));
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        let increased = self
            .local_state
            .store_term_if_increased(input.candidate_term)
            .map_err(RequestVoteError::ServerIoError)?;
        if increased {
            self.become_follower(None);
            slog::info!(
                self.logger,
                "Observed increased term in RequestVote call. Transitioning to follower. Election state: {:?}",
                self.election_state
            );
            // If we've increased the term, it means we haven't voted for anyone this term.
            opt_voted_for = None;
        }

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        if let Some(voted_for) = opt_voted_for {
            if *voted_for != input.candidate_id {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                return Ok(RequestVoteOutput { vote_granted: false });
            }
        }

        if !self.is_candidate_log_gte_mine(input.candidate_last_log_entry) {
            slog::info!(self.logger, "Not granting vote. Candidate log is out of date.");
            return Ok(RequestVoteOutput { vote_granted: false });
        }

        slog::info!(self.logger, "Voting for {:?}.", input.candidate_id);
        let cas_success = self
            .local_state
            .store_vote_for_term_if_unvoted(input.candidate_term, input.candidate_id.clone())
            .map_err(RequestVoteError::ServerIoError)?;
        if cas_success {
            self.election_state.reset_timeout_if_follower();
            return Ok(RequestVoteOutput { vote_granted: true });
        }

        // CAS lost: the candidate retried, or we voted in between. Grant only if the stored vote
        // is for this very candidate and term.
        if let (reread_current_term, Some(reread_voted_for)) = self.local_state.voted_for_current_term() {
            if reread_current_term == input.candidate_term && reread_voted_for.as_ref() == &input.candidate_id {
                return Ok(RequestVoteOutput { vote_granted: true });
            }
        }

        slog::info!(self.logger, "Not granting vote. Vote state changed underneath us.");
        Ok(RequestVoteOutput { vote_granted: false })
    }

    fn is_candidate_log_gte_mine(&self, candidate_last_entry: Option<(Term, Index)>) -> bool {
        // > Raft determines which of two logs is more up-to-date
        // > by comparing the index and term of the last entries in the
        // > logs. If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        match (self.log.latest_entry(), candidate_last_entry) {
            (None, None) => true,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (
                Some((my_last_entry_term, my_last_entry_index)),
                Some((candidate_last_entry_term, candidate_last_entry_index)),
            ) => {
                if candidate_last_entry_term != my_last_entry_term {
                    return candidate_last_entry_term > my_last_entry_term;
                }

                candidate_last_entry_index >= my_last_entry_index
            }
        }
    }

    pub(crate) fn handle_request_vote_reply_from_peer(&mut self, reply: RequestVoteReplyFromPeer) {
        let current_term = self.local_state.current_term();
        if current_term != reply.term {
            slog::info!(
                self.logger,
                "Received vote for outdated term {:?}, current term: {:?}.",
                reply.term,
                current_term,
            );
            return;
        }

        match reply.result {
            RequestVoteResult::VoteGranted => {
                let votes = match self.election_state.add_vote_if_candidate(reply.peer_id).cloned() {
                    Some(votes) => votes,
                    None => {
                        slog::info!(
                            self.logger,
                            "Received vote for term {:?} after transitioning to a election state: {:?}",
                            reply.term,
                            self.election_state,
                        );
                        return;
                    }
                };
                let num_votes_received = votes
                    .iter()
                    .filter(|voter| self.cluster_tracker.is_voter(voter))
                    .count();

                let num_voting_replicas = self.cluster_tracker.num_voters();
                slog::info!(
                    self.logger,
                    "Received {}/{} votes for term {:?}",
                    num_votes_received,
                    num_voting_replicas,
                    reply.term,
                );

                if num_votes_received >= Self::get_majority_vote_count(num_voting_replicas) {
                    self.become_leader(reply.term);
                }
            }
            RequestVoteResult::VoteNotGranted => {
                slog::info!(
                    self.logger,
                    "Vote not granted from {:?} for term {:?}",
                    reply.peer_id,
                    reply.term,
                );
            }
            RequestVoteResult::RetryableFailure | RequestVoteResult::MalformedReply => {
                // The election timeout starts a fresh election if this one stalls.
                slog::info!(
                    self.logger,
                    "No vote from {:?} for term {:?}: {:?}",
                    reply.peer_id,
                    reply.term,
                    reply.result
                );
            }
        }
    }

    fn get_majority_vote_count(num_voting_replicas: usize) -> usize {
        (num_voting_replicas / 2) + 1
    }

    // ------- AppendEntries -------

    pub(crate) fn server_handle_append_entries(
        &mut self,
        input: AppendEntriesInput,
    ) -> Result<AppendEntriesOutput, AppendEntriesError> {
        // Leaders are accepted regardless of membership; a joining replica learns of its own
        // membership from the leader's log.
        self.observe_leader(input.leader_term, &input.leader_id)
            .map_err(|e| match e {
                ObserveLeaderError::TermOutOfDate(info) => AppendEntriesError::ClientTermOutOfDate(info),
                ObserveLeaderError::Io(e) => AppendEntriesError::ServerIoError(e),
            })?;

        let snapshot_index = self.log.snapshot_base().map(|(_, index)| index);
        let my_last_log_index = self.log.latest_entry().map(|(_, index)| index);

        // 2. Reply false if [my] log doesn't contain an entry at [leader's]
        // prevLogIndex whose term matches [leader's] prevLogTerm (§5.3)
        if let Some((leader_prev_entry_term, leader_prev_entry_index)) = input.leader_previous_log_entry {
            let covered_by_snapshot = matches!(snapshot_index, Some(si) if leader_prev_entry_index < si);
            if !covered_by_snapshot {
                match self.log.term_at(leader_prev_entry_index) {
                    Ok(Some(term)) if term == leader_prev_entry_term => {}
                    Ok(_) => {
                        return Err(AppendEntriesError::ServerMissingPreviousLogEntry {
                            last_log_index: my_last_log_index.map(|i| i.min(leader_prev_entry_index)),
                        })
                    }
                    Err(e) => return Err(AppendEntriesError::ServerIoError(e)),
                }
            }
        }

        // 3. If [my] existing entry conflicts with [leader's new entries]
        // (same index but different terms), delete [my] existing entry and
        // all that follow it (§5.3)
        // 4. Append any new entries not already in the log
        let mut next_entry_index = match input.leader_previous_log_entry {
            None => Index::start_index(),
            Some((_, leader_prev_entry_index)) => leader_prev_entry_index.plus(1),
        };
        for new_entry in input.new_entries.iter() {
            let entry_index = next_entry_index;
            next_entry_index = next_entry_index.plus(1);

            // Committed and folded into our snapshot, so it matches.
            if matches!(snapshot_index, Some(si) if entry_index <= si) {
                continue;
            }

            let opt_existing_term = self
                .log
                .term_at(entry_index)
                .map_err(AppendEntriesError::ServerIoError)?;

            // 3. (if...)
            if let Some(existing_term) = opt_existing_term {
                if existing_term == new_entry.term {
                    // 4. (no-op)
                    continue;
                }
                // 3. (delete)
                slog::info!(
                    self.logger,
                    "Truncating conflicting log at {:?} (term {:?}, leader has {:?})",
                    entry_index,
                    existing_term,
                    new_entry.term
                );
                self.log
                    .truncate(entry_index)
                    .map_err(AppendEntriesError::ServerIoError)?;
                self.cluster_tracker.abandon_pending_from(entry_index);
            }

            // 4. (append)
            let appended_index = self
                .log
                .append(WriteAheadLogEntry {
                    term: new_entry.term,
                    kind: new_entry.kind,
                    data: new_entry.data.clone(),
                })
                .map_err(AppendEntriesError::ServerIoError)?;
            if appended_index != entry_index {
                slog::error!(
                    self.logger,
                    "Appended log entry to unexpected index {:?}, expected {:?}",
                    appended_index,
                    entry_index
                );
                return Err(AppendEntriesError::ServerIoError(io::Error::new(
                    io::ErrorKind::Other,
                    "Log append landed at an unexpected index",
                )));
            }
        }

        // 5. If leaderCommit > commitIndex, set commitIndex = min(leaderCommit, index of last new entry)
        // Everything up to the last new entry is now known to match the leader.
        if let (Some(leader_commit_index), Some(index_of_last_new_entry)) =
            (input.leader_commit_index, next_entry_index.checked_minus(1))
        {
            self.log
                .ratchet_fwd_commit_index_if_changed(leader_commit_index.min(index_of_last_new_entry));
        }

        // > If commitIndex > lastApplied: increment lastApplied, apply
        // > log[lastApplied] to state machine (§5.3)
        self.apply_committed_entries();

        Ok(AppendEntriesOutput {})
    }

    /// Common term handling for requests from a leader.
    fn observe_leader(&mut self, leader_term: Term, leader_id: &ReplicaId) -> Result<(), ObserveLeaderError> {
        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if leader_term < current_term {
            return Err(ObserveLeaderError::TermOutOfDate(TermOutOfDateInfo { current_term }));
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        let increased = self
            .local_state
            .store_term_if_increased(leader_term)
            .map_err(ObserveLeaderError::Io)?;
        if increased {
            self.become_follower(Some(leader_id.clone()));
        } else {
            match self.election_state.role() {
                // > If AppendEntries RPC received from new leader: convert to follower
                RaftRole::Candidate => self.become_follower(Some(leader_id.clone())),
                RaftRole::Leader => {
                    slog::error!(
                        self.logger,
                        "{:?} claims to lead term {:?}, which is mine. Rejecting.",
                        leader_id,
                        leader_term
                    );
                    return Err(ObserveLeaderError::TermOutOfDate(TermOutOfDateInfo { current_term }));
                }
                RaftRole::Follower => self.election_state.set_leader_if_unknown(leader_id),
            }
        }

        self.election_state.reset_timeout_if_follower();
        Ok(())
    }

    pub(crate) fn handle_append_entries_reply_from_peer(&mut self, reply: AppendEntriesReplyFromPeer) {
        let logger = self
            .logger
            .new(slog::o!("Peer" => format!("{:?}", reply.descriptor.peer_id), "SeqNo" => reply.descriptor.seq_no));
        slog::trace!(logger, "AE reply from peer result: {:?}", reply.result);

        if self.local_state.current_term() != reply.descriptor.term {
            slog::info!(
                logger,
                "Received AE reply for outdated term {:?}, but we're on term {:?}",
                reply.descriptor.term,
                self.local_state.current_term()
            );
            return;
        }

        // 1. Check for stale term rejection
        let peer_log_update = match reply.result {
            Err(AppendEntriesReplyFromPeerError::StaleTerm { new_term }) => {
                if self.step_down_if_term_increased(&logger, new_term) {
                    return;
                }
                PeerStateUpdate::OtherError
            }
            Err(AppendEntriesReplyFromPeerError::PeerMissingPreviousLogEntry { last_log_index }) => {
                slog::info!(logger, "Peer is missing previous log entry, its log ends at {:?}", last_log_index);
                PeerStateUpdate::PeerLogBehind { last_log_index }
            }
            Err(AppendEntriesReplyFromPeerError::RetryableFailure(err_msg)) => {
                // Next heartbeat retries.
                slog::warn!(logger, "AE failure: {}", err_msg);
                PeerStateUpdate::OtherError
            }
            Ok(_) => PeerStateUpdate::Success {
                previous_log_entry: reply.descriptor.previous_log_entry_index,
                num_entries_replicated: reply.descriptor.num_log_entries,
            },
        };

        self.update_peer_and_continue(&logger, &reply.descriptor.peer_id, reply.descriptor.seq_no, peer_log_update);
    }

    pub(crate) fn handle_install_snapshot_reply_from_peer(&mut self, reply: InstallSnapshotReplyFromPeer) {
        let logger = self
            .logger
            .new(slog::o!("Peer" => format!("{:?}", reply.peer_id), "SeqNo" => reply.seq_no));

        if self.local_state.current_term() != reply.term {
            slog::info!(logger, "Received InstallSnapshot reply for outdated term {:?}", reply.term);
            return;
        }

        let peer_log_update = match reply.result {
            Ok(_) => {
                slog::info!(logger, "Peer installed snapshot at {:?}", reply.last_included_index);
                PeerStateUpdate::SnapshotInstalled {
                    last_included_index: reply.last_included_index,
                }
            }
            Err(AppendEntriesReplyFromPeerError::StaleTerm { new_term }) => {
                if self.step_down_if_term_increased(&logger, new_term) {
                    return;
                }
                PeerStateUpdate::OtherError
            }
            Err(e) => {
                slog::warn!(logger, "InstallSnapshot failure: {:?}", e);
                PeerStateUpdate::OtherError
            }
        };

        self.update_peer_and_continue(&logger, &reply.peer_id, reply.seq_no, peer_log_update);
    }

    /// Returns true if we stepped down.
    fn step_down_if_term_increased(&mut self, logger: &slog::Logger, new_term: Term) -> bool {
        slog::warn!(logger, "Rejected by peer because my term is stale.");
        match self.local_state.store_term_if_increased(new_term) {
            Ok(true) => {
                self.become_follower(None);
                slog::info!(logger, "Transitioned to follower.");
                true
            }
            Ok(false) => {
                slog::warn!(logger, "Peer claims a newer term {:?} that isn't newer. Ignoring.", new_term);
                false
            }
            Err(e) => {
                slog::error!(logger, "Failed to persist newer term {:?}: {:?}", new_term, e);
                false
            }
        }
    }

    fn update_peer_and_continue(
        &mut self,
        logger: &slog::Logger,
        peer_id: &ReplicaId,
        seq_no: u64,
        update: PeerStateUpdate,
    ) {
        // 2. Update peer log tracker
        let next_index = match self.election_state.leader_state_mut() {
            None => {
                slog::info!(logger, "No longer leader");
                return;
            }
            Some(leader_state) => match leader_state.peer_state_mut(peer_id) {
                None => {
                    slog::info!(logger, "Peer {:?} is no longer replicated to", peer_id);
                    return;
                }
                Some(peer_state) => {
                    peer_state.handle_append_entries_result(logger, seq_no, update);
                    peer_state.next_and_previous_log_index().0
                }
            },
        };

        // 3. Check for majority replication and apply new commits.
        self.advance_commit_index();

        // 4. Keep going while the peer is behind.
        // > If last log index ≥ nextIndex for a follower: send
        // > AppendEntries RPC with log entries starting at nextIndex
        if matches!(self.log.latest_entry(), Some((_, last_log_index)) if last_log_index >= next_index) {
            self.replicate_to_peer(peer_id);
        }
    }

    /// Computes the commit index from the committed config's voters.
    fn get_cluster_commit_index(mut voters_matched_indexes: Vec<Option<Index>>) -> Option<Index> {
        if voters_matched_indexes.is_empty() {
            return None;
        }
        voters_matched_indexes.sort_by_key(|matched| match matched {
            None => 0u64,
            Some(m) => m.as_u64(),
        });

        // The highest index that a majority has: with n sorted ascending, everything from
        // position (n - 1) / 2 onwards is at least that big, and that's n / 2 + 1 voters.
        let quorum_idx = (voters_matched_indexes.len() - 1) / 2;

        voters_matched_indexes.remove(quorum_idx)
    }

    fn advance_commit_index(&mut self) {
        let leader_state = match self.election_state.leader_state() {
            Some(leader_state) => leader_state,
            None => return,
        };

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        let my_latest_index = self.log.latest_entry().map(|(_, index)| index);
        let voters_matched_indexes = self
            .cluster_tracker
            .voter_ids()
            .iter()
            .map(|voter| {
                if *voter == self.my_replica_id {
                    my_latest_index
                } else {
                    leader_state.peer_state(voter).and_then(|ps| ps.matched())
                }
            })
            .collect();

        let tentative_new_commit_index = match Self::get_cluster_commit_index(voters_matched_indexes) {
            Some(index) => index,
            None => return,
        };
        match self
            .log
            .ratchet_fwd_commit_index_if_valid(tentative_new_commit_index, self.local_state.current_term())
        {
            Ok(true) => self.apply_committed_entries(),
            Ok(false) => {}
            Err(ioe) => slog::warn!(
                self.logger,
                "IO failure while confirming new commit index {:?}: {:?}",
                tentative_new_commit_index,
                ioe
            ),
        }
    }

    // ------- Applying -------

    fn apply_committed_entries(&mut self) {
        while self.failure.is_none() {
            let (index, entry) = match self.log.next_entry_to_apply() {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(e) => {
                    slog::error!(self.logger, "Failed to read committed entry: {:?}", e);
                    break;
                }
            };

            if self.apply_entry(index, entry) {
                self.log.mark_applied(index);
            }
        }

        if self.snapshots.is_due(self.log.last_applied_index()) {
            self.start_snapshot();
        }
    }

    /// Returns false if the entry couldn't be applied.
    fn apply_entry(&mut self, index: Index, entry: WriteAheadLogEntry) -> bool {
        match entry.kind {
            EntryKind::Data => {
                let pending = self.pending_writes.remove(&index);
                match self.state_machine.apply(&entry.data) {
                    Ok(outcome) => {
                        if let Some(pending) = pending {
                            Self::complete_write(pending, entry.term, outcome, &self.state_machine);
                        }
                        true
                    }
                    Err(e) => {
                        slog::crit!(self.logger, "Failed to apply entry {:?}: {}", index, e);
                        self.fail(e.to_string());
                        if let Some(pending) = pending {
                            pending
                                .callback
                                .send(Err(EnqueueForReplicationError::StateMachineFailed(e.to_string())));
                        }
                        false
                    }
                }
            }
            EntryKind::Config => match ClusterConfig::decode(&entry.data) {
                Ok(config) => {
                    self.apply_config(index, config);
                    true
                }
                Err(e) => {
                    slog::crit!(self.logger, "Malformed cluster config at {:?}: {:?}", index, e);
                    self.fail(format!("Malformed cluster config at {:?}", index));
                    false
                }
            },
            EntryKind::Noop => true,
        }
    }

    fn complete_write(pending: PendingWrite, entry_term: Term, outcome: ApplyOutcome, state_machine: &JournalStateMachine) {
        // Something else got committed where our entry used to be.
        if pending.term != entry_term {
            pending.callback.send(Err(EnqueueForReplicationError::LeadershipLost));
            return;
        }

        let receipt = match outcome {
            ApplyOutcome::Applied { last_sequence_number } => BatchReceipt {
                operation_id: pending.operation_id,
                last_sequence_number: Some(last_sequence_number),
                duplicate: false,
            },
            ApplyOutcome::Duplicate => BatchReceipt {
                operation_id: pending.operation_id,
                last_sequence_number: None,
                duplicate: true,
            },
            ApplyOutcome::AlreadyApplied => BatchReceipt {
                operation_id: pending.operation_id,
                last_sequence_number: state_machine.last_sequence_number(),
                duplicate: true,
            },
        };
        pending.callback.send(Ok(receipt));
    }

    fn apply_config(&mut self, index: Index, config: ClusterConfig) {
        self.cluster_tracker.commit(index, config);
        self.sync_leader_peers();

        if matches!(&self.pending_membership_change, Some((pending_index, _)) if *pending_index == index) {
            if let Some((_, callback)) = self.pending_membership_change.take() {
                callback.send(Ok(()));
            }
        }

        if self.election_state.is_leader() && !self.cluster_tracker.am_voter() {
            slog::info!(self.logger, "Removed from the cluster. Stepping down as leader.");
            self.become_follower(None);
        }
    }

    fn fail(&mut self, reason: String) {
        self.failure = Some(reason);
        for (_, pending) in std::mem::take(&mut self.pending_writes) {
            pending.callback.send(Err(EnqueueForReplicationError::StateMachineFailed(
                "Replica failed to apply the journal".into(),
            )));
        }
        if self.election_state.is_leader() {
            self.become_follower(None);
        }
    }

    // ------- Leader replication -------

    pub(crate) fn handle_heartbeat(&mut self, tick: HeartbeatTick) {
        let current_term = self.local_state.current_term();
        if current_term != tick.term {
            slog::debug!(
                self.logger,
                "Received leader heartbeat for outdated term {:?}, current term: {:?}",
                tick.term,
                current_term
            );
            return;
        }

        self.replicate_to_peer(&tick.peer_id);
    }

    fn replicate_to_all_peers(&mut self) {
        let peer_ids = match self.election_state.leader_state() {
            Some(leader_state) => leader_state.peer_ids(),
            None => return,
        };
        for peer_id in peer_ids {
            self.replicate_to_peer(&peer_id);
        }
    }

    fn replicate_to_peer(&mut self, peer_id: &ReplicaId) {
        match self.try_replicate_to_peer(peer_id) {
            Ok(()) => {}
            Err(ReplicateError::NoLongerLeader) => {
                slog::debug!(self.logger, "Asked to replicate but no longer leader.")
            }
            Err(ReplicateError::PeerConcurrencyThrottle) => {
                slog::trace!(self.logger, "Request to peer {:?} still outstanding", peer_id)
            }
            Err(ReplicateError::DiskRead(index, ioe)) => {
                slog::error!(self.logger, "Failed to read log entry at index {:?}: {:?}", index, ioe);
            }
            Err(ReplicateError::UnexpectedMissingLogEntry(index)) => {
                slog::error!(
                    self.logger,
                    "LeaderStateTracker is tracking index {:?}, but entry is missing from log.",
                    index
                );
            }
            Err(ReplicateError::MissingSnapshot(index)) => {
                slog::error!(self.logger, "Entry {:?} was compacted but there's no snapshot to send.", index);
            }
            Err(ReplicateError::LeaderStateMissingPeer {
                leader_state_tracker_peers,
            }) => slog::debug!(
                self.logger,
                "Peer {:?} is not replicated to. Replicated peers: [{:?}]",
                peer_id,
                leader_state_tracker_peers,
            ),
            Err(ReplicateError::UnknownPeer) => {
                slog::error!(self.logger, "Missing Peer {:?} in ClusterTracker", peer_id);
            }
        }
    }

    fn try_replicate_to_peer(&mut self, peer_id: &ReplicaId) -> Result<(), ReplicateError> {
        let current_term = self.local_state.current_term();
        let peer = self
            .cluster_tracker
            .peer(peer_id)
            .cloned()
            .ok_or(ReplicateError::UnknownPeer)?;
        let leader_state = self
            .election_state
            .leader_state_mut()
            .ok_or(ReplicateError::NoLongerLeader)?;
        let peer_state = match leader_state.peer_state_mut(peer_id) {
            Some(ps) => ps,
            None => {
                return Err(ReplicateError::LeaderStateMissingPeer {
                    leader_state_tracker_peers: leader_state.peer_ids(),
                })
            }
        };

        let request = peer_calls::new_replication_request(
            current_term,
            self.my_replica_id.clone(),
            peer_id.clone(),
            peer_state,
            &self.log,
            self.snapshots.latest(),
            self.max_entries_per_append,
        )?;
        peer_state.reset_heartbeat_timer();

        let logger = self.logger.new(slog::o!("Peer" => format!("{:?}", peer_id)));
        match request {
            ReplicationRequest::AppendEntries(proto_request, descriptor) => {
                tokio::task::spawn(peer_calls::call_peer_append_entries(
                    logger,
                    peer.client,
                    proto_request,
                    self.append_entries_timeout,
                    self.actor_client.clone(),
                    descriptor,
                ));
            }
            ReplicationRequest::InstallSnapshot(proto_request, descriptor) => {
                tokio::task::spawn(peer_calls::call_peer_install_snapshot(
                    logger,
                    peer.client,
                    proto_request,
                    self.append_entries_timeout * SNAPSHOT_TRANSFER_TIMEOUT_FACTOR,
                    self.actor_client.clone(),
                    descriptor,
                ));
            }
        }

        Ok(())
    }

    fn sync_leader_peers(&mut self) {
        let latest_index = self.log.latest_entry().map(|(_, index)| index);
        self.election_state
            .sync_leader_peers(&self.cluster_tracker.peer_ids(), latest_index);
    }

    // ------- Elections -------

    pub(crate) fn handle_follower_timeout(&mut self) {
        if self.election_state.is_leader() {
            return;
        }
        if !self.cluster_tracker.am_voter() {
            slog::debug!(self.logger, "Not a voting member. Not starting an election.");
            return;
        }
        if self.failure.is_some() {
            slog::warn!(self.logger, "Replica has failed. Not starting an election.");
            return;
        }

        // Write-ahead log style: Vote for self on local state before transitioning to candidate.
        let new_term = match self.local_state.increment_term_and_vote_for_self() {
            Ok(term) => term,
            Err(e) => {
                slog::error!(self.logger, "Failed to persist new term, not campaigning: {:?}", e);
                return;
            }
        };
        self.fail_pending("Started an election");
        self.election_state.transition_to_candidate_and_vote_for_self();
        slog::info!(
            self.logger,
            "Timed out as follower. Changed to candidate. Election state: {:?}",
            self.election_state,
        );

        // My own vote already decides a single-voter cluster.
        if Self::get_majority_vote_count(self.cluster_tracker.num_voters()) <= 1 {
            self.become_leader(new_term);
            return;
        }

        let latest_entry = self.log.latest_entry();
        for voter in self.cluster_tracker.voter_ids() {
            if voter == self.my_replica_id {
                continue;
            }
            let peer = match self.cluster_tracker.peer(&voter) {
                Some(peer) => peer,
                None => continue,
            };
            tokio::task::spawn(peer_calls::call_peer_request_vote(
                self.logger.new(slog::o!("Peer" => format!("{:?}", voter))),
                peer.client.clone(),
                voter.clone(),
                peer_calls::new_request_vote_request(&self.my_replica_id, new_term, latest_entry),
                self.append_entries_timeout,
                self.actor_client.clone(),
                new_term,
            ));
        }
    }

    fn become_leader(&mut self, term: Term) {
        self.election_state.transition_to_leader(
            term,
            self.cluster_tracker.peer_ids(),
            self.log.latest_entry().map(|(_, index)| index),
        );
        slog::info!(self.logger, "Became leader for term {:?}", term);

        // Entries from earlier terms only commit once something from this term does.
        match self.log.append(WriteAheadLogEntry::noop(term)) {
            Ok(index) => self.leader_noop_index = Some(index),
            Err(e) => {
                slog::error!(self.logger, "Failed to append no-op as new leader: {:?}", e);
                self.become_follower(None);
                return;
            }
        }

        self.repropose_uncommitted_config();
        self.replicate_to_all_peers();
        self.advance_commit_index();
    }

    /// A config entry a previous leader appended but didn't commit is still a proposal; its
    /// member must be replicated to as well.
    fn repropose_uncommitted_config(&mut self) {
        let first_uncommitted = match self.log.commit_index() {
            Some(ci) => ci.plus(1),
            None => Index::start_index(),
        };
        let latest_index = match self.log.latest_entry() {
            Some((_, index)) => index,
            None => return,
        };

        let mut proposal = None;
        let mut index = first_uncommitted.max(self.log.first_index());
        while index <= latest_index {
            match self.log.read(index) {
                Ok(Some(entry)) if entry.kind == EntryKind::Config => match ClusterConfig::decode(&entry.data) {
                    Ok(config) => proposal = Some((index, config)),
                    Err(e) => slog::error!(self.logger, "Malformed cluster config at {:?}: {:?}", index, e),
                },
                Ok(_) => {}
                Err(e) => {
                    slog::error!(self.logger, "Failed to read {:?} while looking for configs: {:?}", index, e);
                    return;
                }
            }
            index = index.plus(1);
        }

        if let Some((index, config)) = proposal {
            self.cluster_tracker.propose(index, config);
            self.sync_leader_peers();
        }
    }

    fn become_follower(&mut self, leader: Option<ReplicaId>) {
        let was_leader = self.election_state.is_leader();
        self.election_state.transition_to_follower(leader);
        self.leader_noop_index = None;

        if was_leader {
            self.fail_pending("Lost leadership");
            // Whoever leads next decides what happens to it.
            self.cluster_tracker.abandon_pending();
        }
    }

    fn fail_pending(&mut self, reason: &str) {
        if self.pending_writes.is_empty() && self.pending_membership_change.is_none() {
            return;
        }
        slog::info!(
            self.logger,
            "{}: failing {} pending writes",
            reason,
            self.pending_writes.len()
        );
        for (_, pending) in std::mem::take(&mut self.pending_writes) {
            pending.callback.send(Err(EnqueueForReplicationError::LeadershipLost));
        }
        if let Some((_, callback)) = self.pending_membership_change.take() {
            callback.send(Err(EnqueueForReplicationError::LeadershipLost));
        }
    }

    // ------- Snapshots -------

    pub(crate) fn server_handle_install_snapshot(
        &mut self,
        input: InstallSnapshotInput,
    ) -> Result<InstallSnapshotOutput, InstallSnapshotError> {
        self.observe_leader(input.leader_term, &input.leader_id)
            .map_err(|e| match e {
                ObserveLeaderError::TermOutOfDate(info) => InstallSnapshotError::ClientTermOutOfDate(info),
                ObserveLeaderError::Io(e) => InstallSnapshotError::ServerIoError(e),
            })?;

        let snapshot = input.snapshot;
        if matches!(self.log.last_applied_index(), Some(applied) if applied >= snapshot.last_included_index) {
            slog::info!(
                self.logger,
                "Already applied past snapshot at {:?}",
                snapshot.last_included_index
            );
            return Ok(InstallSnapshotOutput {});
        }
        slog::info!(
            self.logger,
            "Installing snapshot at {:?} from {:?}",
            snapshot.last_included_index,
            input.leader_id
        );

        // Durable first, so a restart comes back to at least this point.
        SnapshotTracker::persist(&self.snapshots.store(), &snapshot).map_err(InstallSnapshotError::ServerIoError)?;

        if let Err(e) = self.state_machine.restore_image(&snapshot.image) {
            slog::crit!(self.logger, "Failed to restore snapshot: {}", e);
            self.fail(e.to_string());
            return Err(InstallSnapshotError::Unrestorable(e.to_string()));
        }
        self.failure = None;

        self.log
            .install_snapshot(snapshot.last_included_term, snapshot.last_included_index)
            .map_err(InstallSnapshotError::ServerIoError)?;
        self.cluster_tracker.reset(snapshot.config.clone());
        self.snapshots.replace_latest(Arc::new(snapshot));

        self.apply_committed_entries();
        Ok(InstallSnapshotOutput {})
    }

    pub(crate) fn handle_trigger_snapshot(&mut self, callback: SnapshotCallback) {
        let sequence_number = self.state_machine.last_sequence_number();

        let already_covered = match (self.log.last_applied_index(), self.snapshots.latest_index()) {
            (None, _) => true,
            (Some(applied), Some(snapshot_index)) => snapshot_index >= applied,
            (Some(_), None) => false,
        };
        if already_covered {
            callback.send(Ok(sequence_number));
            return;
        }

        self.snapshot_waiters.push(SnapshotWaiter {
            callback,
            sequence_number,
        });
        if !self.snapshots.in_flight() {
            self.start_snapshot();
        }
    }

    /// Captures the state machine and writes it out in the background.
    fn start_snapshot(&mut self) {
        let last_applied_index = match self.log.last_applied_index() {
            Some(index) => index,
            None => return,
        };
        let last_applied_term = match self.log.term_at(last_applied_index) {
            Ok(Some(term)) => term,
            Ok(None) => {
                slog::error!(self.logger, "No term for applied entry {:?}", last_applied_index);
                return;
            }
            Err(e) => {
                slog::error!(self.logger, "Failed to read applied entry {:?}: {:?}", last_applied_index, e);
                return;
            }
        };

        let (sequence_number, image) = self.state_machine.capture_image();
        let snapshot = Arc::new(SnapshotPayload {
            last_included_index: last_applied_index,
            last_included_term: last_applied_term,
            config: self.cluster_tracker.committed_config().clone(),
            image,
        });
        slog::info!(
            self.logger,
            "Taking snapshot at {:?} (sequence number {:?})",
            last_applied_index,
            sequence_number
        );
        self.snapshots.begin();

        let store = self.snapshots.store();
        let actor_client = self.actor_client.clone();
        let logger = self.logger.clone();
        tokio::task::spawn(async move {
            let to_persist = snapshot.clone();
            let result = match tokio::task::spawn_blocking(move || SnapshotTracker::persist(&store, &to_persist)).await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("Snapshot task failed: {}", e)),
            };
            let persisted = SnapshotPersisted {
                snapshot,
                sequence_number,
                result,
            };
            if actor_client.notify_snapshot_persisted(persisted).await.is_err() {
                slog::debug!(logger, "Replica exited before snapshot completion was delivered");
            }
        });
    }

    pub(crate) fn handle_snapshot_persisted(&mut self, persisted: SnapshotPersisted) {
        let last_included_index = persisted.snapshot.last_included_index;
        let last_included_term = persisted.snapshot.last_included_term;

        match &persisted.result {
            Ok(()) => {
                slog::info!(self.logger, "Snapshot at {:?} is durable", last_included_index);
                if self.snapshots.finish(persisted.snapshot.clone(), true) {
                    if let Err(e) =
                        self.log
                            .compact(last_included_term, last_included_index, self.snapshot_retained_entries)
                    {
                        slog::warn!(self.logger, "Failed to compact log after snapshot: {:?}", e);
                    }
                }

                let covered = persisted.sequence_number;
                let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.snapshot_waiters)
                    .into_iter()
                    .partition(|waiter| waiter.sequence_number <= covered);
                for waiter in done {
                    waiter.callback.send(Ok(covered));
                }
                self.snapshot_waiters = waiting;
            }
            Err(e) => {
                slog::error!(self.logger, "Failed to persist snapshot at {:?}: {}", last_included_index, e);
                self.snapshots.finish(persisted.snapshot.clone(), false);
                for waiter in std::mem::take(&mut self.snapshot_waiters) {
                    waiter.callback.send(Err(SnapshotError::PersistFailed(e.clone())));
                }
            }
        }

        if !self.snapshot_waiters.is_empty() || self.snapshots.is_due(self.log.last_applied_index()) {
            self.start_snapshot();
        }
    }

    // ------- Queries -------

    pub(crate) fn quorum_state(&self) -> QuorumState {
        let leader_id = match self.election_state.current_leader() {
            CurrentLeader::Me => Some(self.my_replica_id.clone()),
            CurrentLeader::Other(leader_id) => Some(leader_id),
            CurrentLeader::Unknown => None,
        };
        let members = self
            .cluster_tracker
            .committed_config()
            .members()
            .iter()
            .map(|member| {
                let role = if member.replica_id() == &self.my_replica_id {
                    self.election_state.role()
                } else if Some(member.replica_id()) == leader_id.as_ref() {
                    RaftRole::Leader
                } else {
                    RaftRole::Follower
                };
                QuorumMemberState {
                    metadata: member.clone(),
                    role,
                }
            })
            .collect();

        QuorumState {
            term: self.local_state.current_term(),
            leader_id,
            members,
        }
    }

    pub(crate) fn shut_down(&mut self) {
        slog::info!(self.logger, "Replica shutting down");
        self.fail_pending("Shutting down");
        self.election_state.transition_to_follower(None);
    }
}

const SNAPSHOT_TRANSFER_TIMEOUT_FACTOR: u32 = 10;

enum ObserveLeaderError {
    TermOutOfDate(TermOutOfDateInfo),
    Io(io::Error),
}

#[cfg(test)]
mod tests {
    use crate::commitlog::{InMemoryLog, Index};
    use crate::replica::local_state::VolatileLocalState;
    use crate::replica::replica::Replica;
    use crate::replica::write_ahead_log::WriteAheadLogEntry;

    type Repl = Replica<InMemoryLog<WriteAheadLogEntry>, VolatileLocalState>;

    fn opt_index(v: u64) -> Option<Index> {
        Index::try_new(v)
    }

    #[test]
    fn test_commit_checker_logic() {
        fn run(expected: u64, matches: Vec<u64>) {
            let matches = matches.into_iter().map(opt_index).collect();

            let expected = opt_index(expected);

            assert_eq!(expected, Repl::get_cluster_commit_index(matches), "");
        }

        // 1-cluster (just me)
        run(0, vec![0]);
        run(4, vec![4]);

        // 3-cluster, me included
        run(0, vec![0, 0, 9]);
        run(9, vec![0, 9, 9]);
        run(8, vec![8, 9, 9]);
        run(8, vec![9, 8, 7]);

        // 4-cluster: 3 of 4 needed
        run(0, vec![0, 0, 0, 9]);
        run(0, vec![0, 0, 8, 9]);
        run(7, vec![0, 7, 8, 9]);
        run(7, vec![6, 7, 8, 9]);

        // 5-cluster: 3 of 5 needed
        run(0, vec![0, 0, 0, 0, 9]);
        run(0, vec![0, 0, 0, 8, 9]);
        run(7, vec![0, 0, 7, 8, 9]);
        run(7, vec![0, 6, 7, 8, 9]);
        run(7, vec![5, 6, 7, 8, 9]);

        // Order doesn't matter
        run(7, vec![9, 5, 8, 6, 7]);
    }

    #[test]
    fn no_voters_commits_nothing() {
        assert_eq!(None, Repl::get_cluster_commit_index(Vec::new()));
    }

    #[test]
    fn majority_vote_count() {
        assert_eq!(Repl::get_majority_vote_count(1), 1);
        assert_eq!(Repl::get_majority_vote_count(2), 2);
        assert_eq!(Repl::get_majority_vote_count(3), 2);
        assert_eq!(Repl::get_majority_vote_count(4), 3);
        assert_eq!(Repl::get_majority_vote_count(5), 3);
    }
}
