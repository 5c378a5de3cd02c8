use crate::actor::WeakActorClient;
use crate::commitlog::{Index, Log};
use crate::grpc::{
    proto_append_entries_error, proto_append_entries_result, proto_install_snapshot_error,
    proto_install_snapshot_result, proto_request_vote_error, proto_request_vote_result, ProtoAppendEntriesReq,
    ProtoAppendEntriesResult, ProtoInstallSnapshotReq, ProtoInstallSnapshotResult, ProtoLogEntry,
    ProtoRequestVoteReq,
};
use crate::replica::election::PeerState;
use crate::replica::local_state::Term;
use crate::replica::peer_client::PeerClient;
use crate::replica::peers::ReplicaId;
use crate::replica::replica_api::{
    AppendEntriesReplyFromPeer, AppendEntriesReplyFromPeerDescriptor, AppendEntriesReplyFromPeerError,
    InstallSnapshotReplyFromPeer, RequestVoteReplyFromPeer, RequestVoteResult,
};
use crate::replica::snapshot::SnapshotPayload;
use crate::replica::write_ahead_log::{WriteAheadLog, WriteAheadLogEntry};
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use tokio::time::error::Elapsed;
use tokio::time::Duration;
use tonic::Status;

/// What the leader sends a peer next.
pub(super) enum ReplicationRequest {
    AppendEntries(ProtoAppendEntriesReq, AppendEntriesReplyFromPeerDescriptor),
    InstallSnapshot(ProtoInstallSnapshotReq, InstallSnapshotDescriptor),
}

pub(super) struct InstallSnapshotDescriptor {
    pub(super) peer_id: ReplicaId,
    pub(super) term: Term,
    pub(super) seq_no: u64,
    pub(super) last_included_index: Index,
}

#[derive(Debug)]
pub(super) enum ReplicateError {
    NoLongerLeader,
    PeerConcurrencyThrottle,
    DiskRead(Index, io::Error),
    UnexpectedMissingLogEntry(Index),
    MissingSnapshot(Index),
    LeaderStateMissingPeer {
        leader_state_tracker_peers: HashSet<ReplicaId>,
    },
    UnknownPeer,
}

pub(super) fn new_replication_request<L>(
    current_term: Term,
    my_id: ReplicaId,
    peer_id: ReplicaId,
    peer_state: &mut PeerState,
    log: &WriteAheadLog<L>,
    latest_snapshot: Option<Arc<SnapshotPayload>>,
    max_entries: usize,
) -> Result<ReplicationRequest, ReplicateError>
where
    L: Log<WriteAheadLogEntry>,
{
    // Simplicity vs throughput tradeoff. We're just going to allow 1 outstanding request per
    // peer; no pipelining. Entries are still batched.
    if peer_state.has_outstanding_request() {
        return Err(ReplicateError::PeerConcurrencyThrottle);
    }

    let (next_index, opt_previous_index) = peer_state.next_and_previous_log_index();

    if needs_snapshot(log, next_index, opt_previous_index) {
        let snapshot = latest_snapshot.ok_or(ReplicateError::MissingSnapshot(next_index))?;
        let seq_no = peer_state.next_seq_no();
        let descriptor = InstallSnapshotDescriptor {
            peer_id,
            term: current_term,
            seq_no,
            last_included_index: snapshot.last_included_index,
        };
        let proto_request = ProtoInstallSnapshotReq {
            client_node_id: my_id.into_inner(),
            term: current_term.as_u64(),
            snapshot: Some(snapshot.to_proto()),
        };
        return Ok(ReplicationRequest::InstallSnapshot(proto_request, descriptor));
    }

    let opt_previous_log_entry_metadata = match opt_previous_index {
        None => None,
        Some(previous_index) => match log.term_at(previous_index) {
            Ok(Some(term)) => Some((term, previous_index)),
            Ok(None) => return Err(ReplicateError::UnexpectedMissingLogEntry(previous_index)),
            Err(e) => return Err(ReplicateError::DiskRead(previous_index, e)),
        },
    };

    let new_entries = log
        .entries_from(next_index, max_entries)
        .map_err(|e| ReplicateError::DiskRead(next_index, e))?;

    let seq_no = peer_state.next_seq_no();
    let descriptor = AppendEntriesReplyFromPeerDescriptor {
        peer_id,
        term: current_term,
        seq_no,
        previous_log_entry_index: opt_previous_index,
        num_log_entries: new_entries.len(),
    };

    let proto_request = build_append_entries_request(
        current_term,
        my_id,
        opt_previous_log_entry_metadata,
        log.commit_index(),
        new_entries,
    );

    Ok(ReplicationRequest::AppendEntries(proto_request, descriptor))
}

/// True if the peer can't be caught up from the log: either the entries it needs next or the
/// entry they must follow were folded into a snapshot. The snapshot base itself stays answerable
/// through its term.
fn needs_snapshot<L>(log: &WriteAheadLog<L>, next_index: Index, opt_previous_index: Option<Index>) -> bool
where
    L: Log<WriteAheadLogEntry>,
{
    let first_index = log.first_index();
    if next_index < first_index {
        return true;
    }
    match opt_previous_index {
        None => false,
        Some(previous_index) => {
            previous_index < first_index
                && !matches!(log.snapshot_base(), Some((_, base)) if base == previous_index)
        }
    }
}

// This is the infallible parts of creating the request object.
fn build_append_entries_request(
    current_term: Term,
    my_id: ReplicaId,
    previous_log_entry_metadata: Option<(Term, Index)>,
    commit_index: Option<Index>,
    new_entries: Vec<WriteAheadLogEntry>,
) -> ProtoAppendEntriesReq {
    let commit_index_u64 = match commit_index {
        None => 0,
        Some(ci) => ci.as_u64(),
    };

    let (previous_log_entry_term_u64, previous_log_entry_index_u64) = match previous_log_entry_metadata {
        None => (0, 0),
        Some((term, idx)) => (term.as_u64(), idx.as_u64()),
    };

    let new_entries = new_entries
        .into_iter()
        .map(|entry| ProtoLogEntry {
            term: entry.term.as_u64(),
            kind: entry.kind.to_proto(),
            data: entry.data.to_vec(),
        })
        .collect();

    ProtoAppendEntriesReq {
        client_node_id: my_id.into_inner(),
        term: current_term.as_u64(),
        commit_index: commit_index_u64,
        previous_log_entry_term: previous_log_entry_term_u64,
        previous_log_entry_index: previous_log_entry_index_u64,
        new_entries,
    }
}

pub(super) fn new_request_vote_request(
    my_id: &ReplicaId,
    term: Term,
    latest_entry: Option<(Term, Index)>,
) -> ProtoRequestVoteReq {
    let (last_log_entry_term, last_log_entry_index) = match latest_entry {
        None => (0, 0),
        Some((term, index)) => (term.as_u64(), index.as_u64()),
    };

    ProtoRequestVoteReq {
        client_node_id: my_id.as_str().to_string(),
        term: term.as_u64(),
        last_log_entry_index,
        last_log_entry_term,
    }
}

pub(super) async fn call_peer_append_entries(
    logger: slog::Logger,
    mut peer_client: PeerClient,
    rpc_request: ProtoAppendEntriesReq,
    rpc_timeout: Duration,
    callback: WeakActorClient,
    descriptor: AppendEntriesReplyFromPeerDescriptor,
) {
    slog::trace!(logger, "ClientWire - {:?}", rpc_request);
    let rpc_reply = tokio::time::timeout(rpc_timeout, peer_client.append_entries(rpc_request)).await;
    slog::trace!(logger, "ClientWire - {:?}", rpc_reply);

    let callback_input = AppendEntriesReplyFromPeer {
        descriptor,
        result: convert_append_entries_rpc_reply(rpc_reply),
    };

    if callback
        .notify_append_entries_reply_from_peer(callback_input)
        .await
        .is_err()
    {
        slog::debug!(logger, "Replica exited before AE reply was delivered");
    }
}

fn convert_append_entries_rpc_reply(
    rpc_reply: Result<Result<ProtoAppendEntriesResult, Status>, Elapsed>,
) -> Result<(), AppendEntriesReplyFromPeerError> {
    match rpc_reply {
        Ok(Ok(rpc_result)) => match rpc_result.result {
            Some(proto_append_entries_result::Result::Ok(_)) => Ok(()),
            Some(proto_append_entries_result::Result::Err(err)) => match err.err {
                Some(proto_append_entries_error::Err::ServerFault(payload)) => {
                    Err(AppendEntriesReplyFromPeerError::RetryableFailure(format!(
                        "Explicit server fault: {:?}",
                        payload.message
                    )))
                }
                Some(proto_append_entries_error::Err::StaleTerm(payload)) => {
                    Err(AppendEntriesReplyFromPeerError::StaleTerm {
                        new_term: Term::new(payload.current_term),
                    })
                }
                Some(proto_append_entries_error::Err::MissingLog(payload)) => {
                    Err(AppendEntriesReplyFromPeerError::PeerMissingPreviousLogEntry {
                        last_log_index: Index::try_new(payload.last_log_entry_index),
                    })
                }
                None => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                    "Malformed AppendEntries Err".into(),
                )),
            },
            None => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                "Malformed AppendEntries Result".into(),
            )),
        },
        Ok(Err(rpc_status)) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(format!(
            "Un-modeled failure from AppendEntries RPC call: {:?}",
            rpc_status
        ))),
        Err(_timeout) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
            "Timed out calling AppendEntries".into(),
        )),
    }
}

pub(super) async fn call_peer_install_snapshot(
    logger: slog::Logger,
    mut peer_client: PeerClient,
    rpc_request: ProtoInstallSnapshotReq,
    rpc_timeout: Duration,
    callback: WeakActorClient,
    descriptor: InstallSnapshotDescriptor,
) {
    slog::info!(
        logger,
        "Sending snapshot at {:?} to {:?}",
        descriptor.last_included_index,
        descriptor.peer_id
    );
    let rpc_reply = tokio::time::timeout(rpc_timeout, peer_client.install_snapshot(rpc_request)).await;

    let callback_input = InstallSnapshotReplyFromPeer {
        peer_id: descriptor.peer_id,
        term: descriptor.term,
        seq_no: descriptor.seq_no,
        last_included_index: descriptor.last_included_index,
        result: convert_install_snapshot_rpc_reply(rpc_reply),
    };

    if callback
        .notify_install_snapshot_reply_from_peer(callback_input)
        .await
        .is_err()
    {
        slog::debug!(logger, "Replica exited before InstallSnapshot reply was delivered");
    }
}

fn convert_install_snapshot_rpc_reply(
    rpc_reply: Result<Result<ProtoInstallSnapshotResult, Status>, Elapsed>,
) -> Result<(), AppendEntriesReplyFromPeerError> {
    match rpc_reply {
        Ok(Ok(rpc_result)) => match rpc_result.result {
            Some(proto_install_snapshot_result::Result::Ok(_)) => Ok(()),
            Some(proto_install_snapshot_result::Result::Err(err)) => match err.err {
                Some(proto_install_snapshot_error::Err::ServerFault(payload)) => {
                    Err(AppendEntriesReplyFromPeerError::RetryableFailure(format!(
                        "Explicit server fault: {:?}",
                        payload.message
                    )))
                }
                Some(proto_install_snapshot_error::Err::StaleTerm(payload)) => {
                    Err(AppendEntriesReplyFromPeerError::StaleTerm {
                        new_term: Term::new(payload.current_term),
                    })
                }
                None => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                    "Malformed InstallSnapshot Err".into(),
                )),
            },
            None => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                "Malformed InstallSnapshot Result".into(),
            )),
        },
        Ok(Err(rpc_status)) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(format!(
            "Un-modeled failure from InstallSnapshot RPC call: {:?}",
            rpc_status
        ))),
        Err(_timeout) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
            "Timed out calling InstallSnapshot".into(),
        )),
    }
}

pub(super) async fn call_peer_request_vote(
    logger: slog::Logger,
    mut peer_client: PeerClient,
    peer_id: ReplicaId,
    rpc_request: ProtoRequestVoteReq,
    rpc_timeout: Duration,
    callback: WeakActorClient,
    term: Term,
) {
    slog::trace!(logger, "ClientWire - {:?}", rpc_request);
    let rpc_reply = tokio::time::timeout(rpc_timeout, peer_client.request_vote(rpc_request)).await;
    slog::trace!(logger, "ClientWire - {:?}", rpc_reply);

    let callback_result = match rpc_reply {
        Ok(Ok(rpc_result)) => match rpc_result.result {
            Some(proto_request_vote_result::Result::Ok(success_reply)) => {
                if success_reply.vote_granted {
                    RequestVoteResult::VoteGranted
                } else {
                    RequestVoteResult::VoteNotGranted
                }
            }
            Some(proto_request_vote_result::Result::Err(err)) => match err.err {
                Some(proto_request_vote_error::Err::ServerFault(fault)) => {
                    slog::warn!(logger, "RequestVote Service Fault: {:?}", fault.message);
                    RequestVoteResult::RetryableFailure
                }
                None => RequestVoteResult::MalformedReply,
            },
            None => RequestVoteResult::MalformedReply,
        },
        Ok(Err(rpc_status)) => {
            slog::warn!(logger, "Un-modeled failure from RequestVote RPC call: {:?}", rpc_status);
            RequestVoteResult::RetryableFailure
        }
        Err(_timeout) => RequestVoteResult::RetryableFailure,
    };

    let callback_input = RequestVoteReplyFromPeer {
        peer_id,
        term,
        result: callback_result,
    };

    if callback
        .notify_request_vote_reply_from_peer(callback_input)
        .await
        .is_err()
    {
        slog::debug!(logger, "Replica exited before vote reply was delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::InMemoryLog;
    use crate::grpc::{ProtoAppendEntriesError, ProtoServerMissingPreviousLog};
    use crate::replica::write_ahead_log::EntryKind;
    use bytes::Bytes;

    fn compacted_log() -> WriteAheadLog<InMemoryLog<WriteAheadLogEntry>> {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let mut wal = WriteAheadLog::new(logger, InMemoryLog::create(), None).unwrap();
        for _ in 0..6 {
            wal.append(WriteAheadLogEntry {
                term: Term::new(1),
                kind: EntryKind::Data,
                data: Bytes::from_static(b"x"),
            })
            .unwrap();
        }
        wal.ratchet_fwd_commit_index_if_valid(Index::new(6), Term::new(1)).unwrap();
        // Snapshot at 5 keeps 4..=6 around.
        wal.compact(Term::new(1), Index::new(5), 2).unwrap();
        assert_eq!(wal.first_index(), Index::new(4));
        wal
    }

    #[test]
    fn peer_behind_the_retained_tail_gets_a_snapshot() {
        let wal = compacted_log();

        // Peer has 1..=3: next entry 4 is still in the log but entry 3 it must follow is not.
        assert!(needs_snapshot(&wal, Index::new(4), Some(Index::new(3))));
        assert!(needs_snapshot(&wal, Index::new(2), Some(Index::new(1))));
        assert!(needs_snapshot(&wal, Index::new(1), None));
    }

    #[test]
    fn peer_within_the_retained_tail_gets_entries() {
        let wal = compacted_log();

        assert!(!needs_snapshot(&wal, Index::new(5), Some(Index::new(4))));
        // Following the snapshot base is answered from the snapshot term.
        assert!(!needs_snapshot(&wal, Index::new(6), Some(Index::new(5))));
        assert!(!needs_snapshot(&wal, Index::new(7), Some(Index::new(6))));

        let fresh = WriteAheadLog::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            InMemoryLog::<WriteAheadLogEntry>::create(),
            None,
        )
        .unwrap();
        assert!(!needs_snapshot(&fresh, Index::start_index(), None));
    }

    fn missing_log(last_log_entry_index: u64) -> ProtoAppendEntriesResult {
        ProtoAppendEntriesResult {
            result: Some(proto_append_entries_result::Result::Err(ProtoAppendEntriesError {
                err: Some(proto_append_entries_error::Err::MissingLog(ProtoServerMissingPreviousLog {
                    last_log_entry_index,
                })),
            })),
        }
    }

    #[test]
    fn missing_log_carries_the_peer_hint() {
        match convert_append_entries_rpc_reply(Ok(Ok(missing_log(12)))) {
            Err(AppendEntriesReplyFromPeerError::PeerMissingPreviousLogEntry { last_log_index }) => {
                assert_eq!(last_log_index, Some(Index::new(12)))
            }
            other => panic!("Unexpected {:?}", other),
        }

        match convert_append_entries_rpc_reply(Ok(Ok(missing_log(0)))) {
            Err(AppendEntriesReplyFromPeerError::PeerMissingPreviousLogEntry { last_log_index }) => {
                assert_eq!(last_log_index, None)
            }
            other => panic!("Unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_reply_is_retryable() {
        let reply = ProtoAppendEntriesResult { result: None };
        assert!(matches!(
            convert_append_entries_rpc_reply(Ok(Ok(reply))),
            Err(AppendEntriesReplyFromPeerError::RetryableFailure(_))
        ));
        assert!(matches!(
            convert_install_snapshot_rpc_reply(Ok(Err(Status::unavailable("down")))),
            Err(AppendEntriesReplyFromPeerError::RetryableFailure(_))
        ));
    }
}
