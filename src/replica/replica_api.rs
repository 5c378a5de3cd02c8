use crate::commitlog::Index;
use crate::journal::{BatchReceipt, OperationId, SequenceNumber};
use crate::replica::local_state::Term;
use crate::replica::peers::{ReplicaId, ReplicaMetadata};
use crate::replica::snapshot::SnapshotPayload;
use crate::replica::write_ahead_log::EntryKind;
use bytes::Bytes;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct EnqueueForReplicationInput {
    pub(crate) operation_id: OperationId,
    // Encoded batch record, without sequence numbers.
    pub(crate) data: Bytes,
}

pub(crate) type EnqueueForReplicationOutput = BatchReceipt;

/// Errors of anything the leader appends on a caller's behalf: journal batches and membership
/// changes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum EnqueueForReplicationError {
    #[error("I'm not leader")]
    LeaderRedirect(LeaderRedirectInfo),

    // Can be retried with exponential backoff with recommended initial delay of 200ms. Likely an
    // election is in progress.
    #[error("Cluster is in a tough shape. No one is leader.")]
    NoLeader,

    #[error("Lost leadership before the entry committed")]
    LeadershipLost,

    #[error("A membership change is already in progress")]
    ChangeInProgress,

    #[error("Invalid membership change: {0}")]
    InvalidMembershipChange(String),

    #[error("Failed to persist log")]
    LocalIoError(io::Error),

    #[error("Replica can't apply the journal: {0}")]
    StateMachineFailed(String),

    #[error("Replica actor is dead RIP")]
    ActorExited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeaderRedirectInfo {
    pub(crate) replica_id: ReplicaId,
    pub(crate) ip_addr: Ipv4Addr,
    pub(crate) port: u16,
}

#[derive(Debug)]
pub(crate) enum MembershipChange {
    Add(ReplicaMetadata),
    Remove(ReplicaId),
}

#[derive(Debug)]
pub(crate) struct RequestVoteInput {
    pub(crate) candidate_term: Term,
    pub(crate) candidate_id: ReplicaId,
    pub(crate) candidate_last_log_entry: Option<(Term, Index)>,
}

#[derive(Debug)]
pub(crate) struct RequestVoteOutput {
    pub(crate) vote_granted: bool,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum RequestVoteError {
    #[error("Requesting candidate is not in the cluster")]
    CandidateNotInCluster,
    #[error("Requesting candidate's term is out of date")]
    RequestTermOutOfDate(TermOutOfDateInfo),
    #[error("Failed to persist vote")]
    ServerIoError(io::Error),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesInput {
    pub(crate) leader_term: Term,
    pub(crate) leader_id: ReplicaId,
    // "Previous log entry" is the log entry immediately preceding the new ones in AppendEntriesInput.
    pub(crate) leader_previous_log_entry: Option<(Term, Index)>,
    pub(crate) leader_commit_index: Option<Index>,
    pub(crate) new_entries: Vec<AppendEntriesLogEntry>,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesLogEntry {
    pub(crate) term: Term,
    pub(crate) kind: EntryKind,
    pub(crate) data: Bytes,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesOutput {
    // Nothing
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum AppendEntriesError {
    #[error("Client's term is out of date")]
    ClientTermOutOfDate(TermOutOfDateInfo),
    #[error("We (server) are missing previous log entry")]
    ServerMissingPreviousLogEntry { last_log_index: Option<Index> },
    #[error("We (server) had an IO failure: {0:?}")]
    ServerIoError(io::Error),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct InstallSnapshotInput {
    pub(crate) leader_term: Term,
    pub(crate) leader_id: ReplicaId,
    pub(crate) snapshot: SnapshotPayload,
}

#[derive(Debug)]
pub(crate) struct InstallSnapshotOutput {
    // Nothing
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum InstallSnapshotError {
    #[error("Client's term is out of date")]
    ClientTermOutOfDate(TermOutOfDateInfo),
    #[error("We (server) had an IO failure: {0:?}")]
    ServerIoError(io::Error),
    #[error("Snapshot could not be restored: {0}")]
    Unrestorable(String),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct TermOutOfDateInfo {
    pub(crate) current_term: Term,
}

#[derive(Debug)]
pub(crate) struct RequestVoteReplyFromPeer {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) result: RequestVoteResult,
}

#[derive(Debug)]
pub(crate) enum RequestVoteResult {
    VoteGranted,
    VoteNotGranted,
    RetryableFailure,
    MalformedReply,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeer {
    pub(crate) descriptor: AppendEntriesReplyFromPeerDescriptor,
    pub(crate) result: Result<(), AppendEntriesReplyFromPeerError>,
}

// This is basically info about the original request
#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeerDescriptor {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) seq_no: u64,
    pub(crate) previous_log_entry_index: Option<Index>,
    pub(crate) num_log_entries: usize,
}

#[derive(Debug)]
pub(crate) enum AppendEntriesReplyFromPeerError {
    PeerMissingPreviousLogEntry { last_log_index: Option<Index> },
    RetryableFailure(String),
    StaleTerm { new_term: Term },
}

#[derive(Debug)]
pub(crate) struct InstallSnapshotReplyFromPeer {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) seq_no: u64,
    pub(crate) last_included_index: Index,
    pub(crate) result: Result<(), AppendEntriesReplyFromPeerError>,
}

/// HeartbeatTick is one tick of the leader's per-peer replication timer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HeartbeatTick {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
}

/// Outcome of writing a snapshot in the background.
#[derive(Debug)]
pub(crate) struct SnapshotPersisted {
    pub(crate) snapshot: Arc<SnapshotPayload>,
    // Journal sequence number the snapshot's image reflects.
    pub(crate) sequence_number: Option<SequenceNumber>,
    pub(crate) result: Result<(), String>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SnapshotError {
    #[error("Failed to persist snapshot: {0}")]
    PersistFailed(String),
    #[error("Replica actor is dead RIP")]
    ActorExited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone)]
pub(crate) struct QuorumMemberState {
    pub(crate) metadata: ReplicaMetadata,
    pub(crate) role: RaftRole,
}

/// This replica's view of the quorum.
#[derive(Debug, Clone)]
pub(crate) struct QuorumState {
    pub(crate) term: Term,
    pub(crate) leader_id: Option<ReplicaId>,
    pub(crate) members: Vec<QuorumMemberState>,
}
