use crate::actor::WeakActorClient;
use crate::api::types::{self, RaftMemberInfo};
use crate::journal::{JournalError, LeaderInfo};
use crate::replica::{self, EnqueueForReplicationError, MembershipChange, QuorumState, ReplicaId};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use tokio::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// One member of the committed configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QuorumMember {
    pub replica_id: String,
    pub address: SocketAddr,
    /// As far as the answering replica knows.
    pub role: RaftRole,
    pub term: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QuorumInfo {
    pub term: u64,
    pub leader_id: Option<String>,
    pub members: Vec<QuorumMember>,
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipChangeError {
    #[error("I'm not leader")]
    LeaderRedirect(LeaderInfo),
    #[error("Cluster is in a tough shape. No one is leader.")]
    NoLeader,
    #[error("A membership change is already in progress")]
    ChangeInProgress,
    #[error("Invalid membership change: {0}")]
    Invalid(String),
    #[error("Lost leadership before the change committed")]
    LeadershipLost,
    #[error("Change did not commit within {0:?}")]
    Unavailable(Duration),
    #[error("Failed to persist change")]
    Io(io::Error),
    #[error("Replica can't apply the journal: {0}")]
    Failed(String),
    #[error("Journal has shut down")]
    Closed,
}

/// QuorumController changes and inspects the embedded journal's membership. Changes go through
/// the leader one member at a time, and take effect once committed.
#[derive(Clone)]
pub struct QuorumController {
    actor_client: WeakActorClient,
    change_timeout: Duration,
}

impl QuorumController {
    pub(crate) fn new(actor_client: WeakActorClient, change_timeout: Duration) -> Self {
        QuorumController {
            actor_client,
            change_timeout,
        }
    }

    /// Adds `member` as a voter. The new member should already be running, outside the quorum,
    /// so it can catch up before it counts.
    pub async fn add_member(&self, member: RaftMemberInfo) -> Result<(), MembershipChangeError> {
        self.change(MembershipChange::Add(replica::ReplicaMetadata::from(member)))
            .await
    }

    pub async fn remove_member(&self, replica_id: &str) -> Result<(), MembershipChangeError> {
        self.change(MembershipChange::Remove(ReplicaId::new(replica_id)))
            .await
    }

    async fn change(&self, change: MembershipChange) -> Result<(), MembershipChangeError> {
        match tokio::time::timeout(self.change_timeout, self.actor_client.change_membership(change)).await {
            Ok(result) => result.map_err(convert_change_error),
            Err(_) => Err(MembershipChangeError::Unavailable(self.change_timeout)),
        }
    }

    /// This replica's view of the committed membership.
    pub async fn get_quorum_info(&self) -> Result<QuorumInfo, JournalError> {
        let quorum_state = self
            .actor_client
            .quorum_state()
            .await
            .map_err(|_| JournalError::Closed)?;
        Ok(convert_quorum_state(quorum_state))
    }
}

fn convert_change_error(e: EnqueueForReplicationError) -> MembershipChangeError {
    match e {
        EnqueueForReplicationError::LeaderRedirect(leader) => {
            MembershipChangeError::LeaderRedirect(types::leader_info(leader))
        }
        EnqueueForReplicationError::NoLeader => MembershipChangeError::NoLeader,
        EnqueueForReplicationError::LeadershipLost => MembershipChangeError::LeadershipLost,
        EnqueueForReplicationError::ChangeInProgress => MembershipChangeError::ChangeInProgress,
        EnqueueForReplicationError::InvalidMembershipChange(message) => MembershipChangeError::Invalid(message),
        EnqueueForReplicationError::LocalIoError(e) => MembershipChangeError::Io(e),
        EnqueueForReplicationError::StateMachineFailed(message) => MembershipChangeError::Failed(message),
        EnqueueForReplicationError::ActorExited => MembershipChangeError::Closed,
    }
}

fn convert_quorum_state(quorum_state: QuorumState) -> QuorumInfo {
    let term = quorum_state.term.as_u64();
    let members = quorum_state
        .members
        .into_iter()
        .map(|member| QuorumMember {
            replica_id: member.metadata.replica_id().as_str().to_string(),
            address: SocketAddr::V4(SocketAddrV4::new(member.metadata.ip_addr(), member.metadata.port())),
            role: match member.role {
                replica::RaftRole::Follower => RaftRole::Follower,
                replica::RaftRole::Candidate => RaftRole::Candidate,
                replica::RaftRole::Leader => RaftRole::Leader,
            },
            term,
        })
        .collect();

    QuorumInfo {
        term,
        leader_id: quorum_state.leader_id.map(ReplicaId::into_inner),
        members,
    }
}
