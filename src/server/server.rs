use crate::actor::WeakActorClient;
use crate::commitlog::Index;
use crate::grpc::grpc_raft_server::{GrpcRaft, GrpcRaftServer};
use crate::grpc::journal_master_server::{JournalMaster, JournalMasterServer};
use crate::grpc::{
    proto_append_entries_error, proto_append_entries_result, proto_install_snapshot_error,
    proto_install_snapshot_result, proto_request_vote_error, proto_request_vote_result, ProtoAppendEntriesError,
    ProtoAppendEntriesReq, ProtoAppendEntriesResult, ProtoAppendEntriesSuccess, ProtoClientStaleTerm,
    ProtoGetQuorumInfoReq, ProtoInstallSnapshotError, ProtoInstallSnapshotReq, ProtoInstallSnapshotResult,
    ProtoInstallSnapshotSuccess, ProtoQuorumInfo, ProtoQuorumMember, ProtoRaftRole, ProtoRequestVoteError,
    ProtoRequestVoteReq, ProtoRequestVoteResult, ProtoRequestVoteSuccess, ProtoServerFault,
    ProtoServerMissingPreviousLog,
};
use crate::replica::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesLogEntry, AppendEntriesOutput, EntryKind,
    InstallSnapshotError, InstallSnapshotInput, InstallSnapshotOutput, QuorumState, RaftRole, ReplicaId,
    RequestVoteError, RequestVoteInput, RequestVoteOutput, SnapshotPayload, Term,
};
use crate::server::RpcServerShutdownSignal;
use bytes::Bytes;
use std::net::SocketAddr;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// RpcServer is the type that implements the Raft and quorum gRPC interfaces. The same handlers
/// serve in-process calls over a `LocalNetwork`.
#[derive(Clone)]
pub(crate) struct RpcServer {
    logger: slog::Logger,
    local_replica: WeakActorClient,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, local_replica: WeakActorClient) -> Self {
        RpcServer { logger, local_replica }
    }

    pub(crate) async fn run(self, socket_addr: SocketAddr, shutdown_signal: RpcServerShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcRaftServer::new(self.clone()))
            .add_service(JournalMasterServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown_signal)
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }

    pub(crate) async fn handle_request_vote(
        &self,
        rpc_request: ProtoRequestVoteReq,
    ) -> Result<ProtoRequestVoteResult, Status> {
        let app_input = Self::convert_request_vote_input(rpc_request)?;
        let app_result = self.local_replica.request_vote(app_input).await;
        let rpc_reply = Self::convert_request_vote_result(app_result);
        Ok(rpc_reply)
    }

    fn convert_request_vote_input(rpc_request: ProtoRequestVoteReq) -> Result<RequestVoteInput, Status> {
        let candidate_last_log_entry =
            Self::convert_log_entry_metadata(rpc_request.last_log_entry_term, rpc_request.last_log_entry_index)?;

        Ok(RequestVoteInput {
            candidate_term: Term::new(rpc_request.term),
            candidate_id: ReplicaId::new(rpc_request.client_node_id),
            candidate_last_log_entry,
        })
    }

    fn convert_request_vote_result(app_result: Result<RequestVoteOutput, RequestVoteError>) -> ProtoRequestVoteResult {
        let vote_not_granted = || ProtoRequestVoteResult {
            result: Some(proto_request_vote_result::Result::Ok(ProtoRequestVoteSuccess {
                vote_granted: false,
            })),
        };
        let server_fault = |message: &str| ProtoRequestVoteResult {
            result: Some(proto_request_vote_result::Result::Err(ProtoRequestVoteError {
                err: Some(proto_request_vote_error::Err::ServerFault(ProtoServerFault {
                    message: message.to_string(),
                })),
            })),
        };

        match app_result {
            Ok(ok) => ProtoRequestVoteResult {
                result: Some(proto_request_vote_result::Result::Ok(ProtoRequestVoteSuccess {
                    vote_granted: ok.vote_granted,
                })),
            },
            Err(RequestVoteError::CandidateNotInCluster) => vote_not_granted(),
            Err(RequestVoteError::RequestTermOutOfDate(_)) => vote_not_granted(),
            Err(RequestVoteError::ServerIoError(_)) => server_fault("Local IO failure"),
            Err(RequestVoteError::ActorExited) => server_fault("Server internal replica task has exited"),
        }
    }

    pub(crate) async fn handle_append_entries(
        &self,
        rpc_request: ProtoAppendEntriesReq,
    ) -> Result<ProtoAppendEntriesResult, Status> {
        let app_input = Self::convert_append_entries_input(rpc_request)?;
        let app_result = self.local_replica.append_entries(app_input).await;
        let rpc_reply = Self::convert_append_entries_result(app_result);
        Ok(rpc_reply)
    }

    fn convert_append_entries_input(rpc_request: ProtoAppendEntriesReq) -> Result<AppendEntriesInput, Status> {
        let leader_previous_log_entry = Self::convert_log_entry_metadata(
            rpc_request.previous_log_entry_term,
            rpc_request.previous_log_entry_index,
        )?;

        let leader_commit_index = Index::try_new(rpc_request.commit_index);

        let mut new_entries = Vec::with_capacity(rpc_request.new_entries.len());
        for proto_entry in rpc_request.new_entries {
            let kind = EntryKind::from_proto(proto_entry.kind)
                .ok_or_else(|| Status::invalid_argument(format!("Unknown log entry kind {}", proto_entry.kind)))?;
            new_entries.push(AppendEntriesLogEntry {
                term: Term::new(proto_entry.term),
                kind,
                data: Bytes::from(proto_entry.data),
            })
        }

        Ok(AppendEntriesInput {
            leader_term: Term::new(rpc_request.term),
            leader_id: ReplicaId::new(rpc_request.client_node_id),
            leader_previous_log_entry,
            leader_commit_index,
            new_entries,
        })
    }

    fn convert_log_entry_metadata(log_entry_term: u64, log_entry_index: u64) -> Result<Option<(Term, Index)>, Status> {
        match (log_entry_term, log_entry_index) {
            (0, 0) => Ok(None),
            (0, _) => Err(Status::invalid_argument(
                "PreviousLogEntryTerm 0 and PreviousLogEntryIndex non-0",
            )),
            (_, 0) => Err(Status::invalid_argument(
                "PreviousLogEntryIndex 0 and PreviousLogEntryTerm non-0",
            )),
            (term, index) => Ok(Some((Term::new(term), Index::new(index)))),
        }
    }

    fn convert_append_entries_result(
        app_result: Result<AppendEntriesOutput, AppendEntriesError>,
    ) -> ProtoAppendEntriesResult {
        let err = |err| ProtoAppendEntriesResult {
            result: Some(proto_append_entries_result::Result::Err(ProtoAppendEntriesError {
                err: Some(err),
            })),
        };

        match app_result {
            Ok(_) => {
                ProtoAppendEntriesResult {
                    result: Some(proto_append_entries_result::Result::Ok(ProtoAppendEntriesSuccess {
                        // Empty
                    })),
                }
            }
            Err(AppendEntriesError::ClientTermOutOfDate(term_info)) => {
                err(proto_append_entries_error::Err::StaleTerm(ProtoClientStaleTerm {
                    current_term: term_info.current_term.as_u64(),
                }))
            }
            Err(AppendEntriesError::ServerMissingPreviousLogEntry { last_log_index }) => {
                err(proto_append_entries_error::Err::MissingLog(ProtoServerMissingPreviousLog {
                    last_log_entry_index: last_log_index.map(|i| i.as_u64()).unwrap_or(0),
                }))
            }
            Err(AppendEntriesError::ServerIoError(_)) => {
                err(proto_append_entries_error::Err::ServerFault(ProtoServerFault {
                    message: "Local IO failure".to_string(),
                }))
            }
            Err(AppendEntriesError::ActorExited) => {
                err(proto_append_entries_error::Err::ServerFault(ProtoServerFault {
                    message: "Server internal replica task has exited".to_string(),
                }))
            }
        }
    }

    pub(crate) async fn handle_install_snapshot(
        &self,
        rpc_request: ProtoInstallSnapshotReq,
    ) -> Result<ProtoInstallSnapshotResult, Status> {
        let proto_snapshot = rpc_request
            .snapshot
            .ok_or_else(|| Status::invalid_argument("InstallSnapshot without a snapshot"))?;
        let snapshot =
            SnapshotPayload::from_proto(proto_snapshot).map_err(|e| Status::invalid_argument(e.to_string()))?;

        let app_input = InstallSnapshotInput {
            leader_term: Term::new(rpc_request.term),
            leader_id: ReplicaId::new(rpc_request.client_node_id),
            snapshot,
        };
        let app_result = self.local_replica.install_snapshot(app_input).await;
        Ok(Self::convert_install_snapshot_result(app_result))
    }

    fn convert_install_snapshot_result(
        app_result: Result<InstallSnapshotOutput, InstallSnapshotError>,
    ) -> ProtoInstallSnapshotResult {
        let server_fault = |message: String| ProtoInstallSnapshotResult {
            result: Some(proto_install_snapshot_result::Result::Err(ProtoInstallSnapshotError {
                err: Some(proto_install_snapshot_error::Err::ServerFault(ProtoServerFault { message })),
            })),
        };

        match app_result {
            Ok(_) => ProtoInstallSnapshotResult {
                result: Some(proto_install_snapshot_result::Result::Ok(ProtoInstallSnapshotSuccess {})),
            },
            Err(InstallSnapshotError::ClientTermOutOfDate(term_info)) => ProtoInstallSnapshotResult {
                result: Some(proto_install_snapshot_result::Result::Err(ProtoInstallSnapshotError {
                    err: Some(proto_install_snapshot_error::Err::StaleTerm(ProtoClientStaleTerm {
                        current_term: term_info.current_term.as_u64(),
                    })),
                })),
            },
            Err(InstallSnapshotError::ServerIoError(_)) => server_fault("Local IO failure".to_string()),
            Err(InstallSnapshotError::Unrestorable(message)) => server_fault(message),
            Err(InstallSnapshotError::ActorExited) => {
                server_fault("Server internal replica task has exited".to_string())
            }
        }
    }

    pub(crate) async fn handle_get_quorum_info(&self) -> Result<ProtoQuorumInfo, Status> {
        let quorum_state = self
            .local_replica
            .quorum_state()
            .await
            .map_err(|_| Status::unavailable("Server internal replica task has exited"))?;
        Ok(Self::convert_quorum_state(quorum_state))
    }

    fn convert_quorum_state(quorum_state: QuorumState) -> ProtoQuorumInfo {
        let term = quorum_state.term.as_u64();
        let members = quorum_state
            .members
            .into_iter()
            .map(|member| {
                let role = match member.role {
                    RaftRole::Follower => ProtoRaftRole::Follower,
                    RaftRole::Candidate => ProtoRaftRole::Candidate,
                    RaftRole::Leader => ProtoRaftRole::Leader,
                };
                ProtoQuorumMember {
                    replica_id: member.metadata.replica_id().as_str().to_string(),
                    host: member.metadata.ip_addr().to_string(),
                    port: u32::from(member.metadata.port()),
                    role: role as i32,
                    term,
                }
            })
            .collect();

        ProtoQuorumInfo {
            term,
            members,
            leader_id: quorum_state
                .leader_id
                .map(|leader_id| leader_id.into_inner())
                .unwrap_or_default(),
        }
    }
}

#[async_trait::async_trait]
impl GrpcRaft for RpcServer {
    async fn request_vote(
        &self,
        rpc_request_wrapped: Request<ProtoRequestVoteReq>,
    ) -> Result<Response<ProtoRequestVoteResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_request_vote(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn append_entries(
        &self,
        rpc_request_wrapped: Request<ProtoAppendEntriesReq>,
    ) -> Result<Response<ProtoAppendEntriesResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::trace!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_append_entries(rpc_request).await;
        slog::trace!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn install_snapshot(
        &self,
        rpc_request_wrapped: Request<ProtoInstallSnapshotReq>,
    ) -> Result<Response<ProtoInstallSnapshotResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        // Snapshot images can be large; don't log them.
        slog::debug!(
            self.logger,
            "ServerWire - InstallSnapshot from {} at term {}",
            rpc_request.client_node_id,
            rpc_request.term
        );
        let rpc_result = self.handle_install_snapshot(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}

#[async_trait::async_trait]
impl JournalMaster for RpcServer {
    async fn get_quorum_info(
        &self,
        _rpc_request: Request<ProtoGetQuorumInfoReq>,
    ) -> Result<Response<ProtoQuorumInfo>, Status> {
        self.handle_get_quorum_info().await.map(Response::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::{QuorumMemberState, ReplicaMetadata};
    use std::net::Ipv4Addr;

    #[test]
    fn log_entry_metadata_must_be_all_or_nothing() {
        assert!(RpcServer::convert_log_entry_metadata(0, 0).unwrap().is_none());
        assert!(RpcServer::convert_log_entry_metadata(0, 4).is_err());
        assert!(RpcServer::convert_log_entry_metadata(2, 0).is_err());
        assert_eq!(
            RpcServer::convert_log_entry_metadata(2, 4).unwrap(),
            Some((Term::new(2), Index::new(4)))
        );
    }

    #[test]
    fn unknown_entry_kind_is_rejected() {
        let request = ProtoAppendEntriesReq {
            client_node_id: "leader".into(),
            term: 3,
            commit_index: 0,
            previous_log_entry_term: 0,
            previous_log_entry_index: 0,
            new_entries: vec![crate::grpc::ProtoLogEntry {
                term: 3,
                kind: 42,
                data: vec![],
            }],
        };
        assert!(RpcServer::convert_append_entries_input(request).is_err());
    }

    #[test]
    fn missing_log_reply_carries_last_index() {
        let reply = RpcServer::convert_append_entries_result(Err(AppendEntriesError::ServerMissingPreviousLogEntry {
            last_log_index: Some(Index::new(7)),
        }));
        match reply.result {
            Some(proto_append_entries_result::Result::Err(ProtoAppendEntriesError {
                err: Some(proto_append_entries_error::Err::MissingLog(payload)),
            })) => assert_eq!(payload.last_log_entry_index, 7),
            other => panic!("Unexpected reply {:?}", other),
        }
    }

    #[test]
    fn quorum_state_lists_every_member() {
        let quorum_state = QuorumState {
            term: Term::new(5),
            leader_id: Some(ReplicaId::new("b")),
            members: vec![
                QuorumMemberState {
                    metadata: ReplicaMetadata::new(ReplicaId::new("a"), Ipv4Addr::LOCALHOST, 9000),
                    role: RaftRole::Follower,
                },
                QuorumMemberState {
                    metadata: ReplicaMetadata::new(ReplicaId::new("b"), Ipv4Addr::LOCALHOST, 9001),
                    role: RaftRole::Leader,
                },
            ],
        };

        let info = RpcServer::convert_quorum_state(quorum_state);
        assert_eq!(info.term, 5);
        assert_eq!(info.leader_id, "b");
        assert_eq!(info.members.len(), 2);
        assert_eq!(info.members[1].role, ProtoRaftRole::Leader as i32);
        assert_eq!(info.members[0].host, "127.0.0.1");
        assert_eq!(info.members[0].port, 9000);
    }
}
