use crate::journal::LeaderInfo;
use crate::replica;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// A member of the embedded journal's quorum, as the application knows it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftMemberInfo {
    pub replica_id: String,
    pub ip_addr: Ipv4Addr,
    pub raft_internal_rpc_port: u16,
}

impl RaftMemberInfo {
    pub(crate) fn rpc_server_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_addr, self.raft_internal_rpc_port))
    }
}

impl From<RaftMemberInfo> for replica::ReplicaMetadata {
    fn from(member_info: RaftMemberInfo) -> Self {
        Self::new(
            replica::ReplicaId::new(member_info.replica_id),
            member_info.ip_addr,
            member_info.raft_internal_rpc_port,
        )
    }
}

pub(crate) fn leader_info(internal_leader: replica::LeaderRedirectInfo) -> LeaderInfo {
    LeaderInfo {
        replica_id: internal_leader.replica_id.into_inner(),
        ip_addr: internal_leader.ip_addr,
        port: internal_leader.port,
    }
}
