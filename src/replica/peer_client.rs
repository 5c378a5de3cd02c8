use crate::grpc::grpc_raft_client::GrpcRaftClient;
use crate::grpc::{
    ProtoAppendEntriesReq, ProtoAppendEntriesResult, ProtoInstallSnapshotReq, ProtoInstallSnapshotResult,
    ProtoRequestVoteReq, ProtoRequestVoteResult,
};
use crate::replica::peers::{ReplicaId, ReplicaMetadata};
use crate::server::LocalNetwork;
use tonic::codegen::http::uri;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

/// How a replica reaches its peers.
#[derive(Clone)]
pub(crate) enum PeerTransport {
    Grpc,
    /// In-process delivery, for tests and single-process clusters.
    Local(LocalNetwork),
}

impl PeerTransport {
    pub(crate) fn connect(&self, from: &ReplicaId, to: &ReplicaMetadata) -> Result<PeerClient, ConnectError> {
        match self {
            PeerTransport::Grpc => {
                let ip_octets = to.ip_addr().octets();
                let url = format!(
                    "http://{}.{}.{}.{}:{}",
                    ip_octets[0],
                    ip_octets[1],
                    ip_octets[2],
                    ip_octets[3],
                    to.port()
                );
                // Lazy, so an unreachable peer doesn't stop us from starting up.
                let channel = Endpoint::from_shared(url)?.connect_lazy()?;
                Ok(PeerClient::Grpc(GrpcRaftClient::new(channel)))
            }
            PeerTransport::Local(network) => Ok(PeerClient::Local {
                network: network.clone(),
                from: from.clone(),
                to: to.replica_id().clone(),
            }),
        }
    }
}

#[derive(Clone)]
pub(crate) enum PeerClient {
    Grpc(GrpcRaftClient<Channel>),
    Local {
        network: LocalNetwork,
        from: ReplicaId,
        to: ReplicaId,
    },
}

impl PeerClient {
    pub(crate) async fn request_vote(&mut self, request: ProtoRequestVoteReq) -> Result<ProtoRequestVoteResult, Status> {
        match self {
            PeerClient::Grpc(client) => client.request_vote(request).await.map(|r| r.into_inner()),
            PeerClient::Local { network, from, to } => network.route(from, to)?.handle_request_vote(request).await,
        }
    }

    pub(crate) async fn append_entries(
        &mut self,
        request: ProtoAppendEntriesReq,
    ) -> Result<ProtoAppendEntriesResult, Status> {
        match self {
            PeerClient::Grpc(client) => client.append_entries(request).await.map(|r| r.into_inner()),
            PeerClient::Local { network, from, to } => network.route(from, to)?.handle_append_entries(request).await,
        }
    }

    pub(crate) async fn install_snapshot(
        &mut self,
        request: ProtoInstallSnapshotReq,
    ) -> Result<ProtoInstallSnapshotResult, Status> {
        match self {
            PeerClient::Grpc(client) => client.install_snapshot(request).await.map(|r| r.into_inner()),
            PeerClient::Local { network, from, to } => {
                network.route(from, to)?.handle_install_snapshot(request).await
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectError {
    #[error("Invalid peer URI")]
    InvalidUri(#[from] uri::InvalidUri),
    #[error("Failed to create channel")]
    Transport(#[from] tonic::transport::Error),
}
