use crate::codec;
use crate::commitlog::Index;
use crate::grpc::{ProtoClusterConfig, ProtoMember};
use crate::replica::peer_client::{PeerClient, PeerTransport};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Identifies a replica within the quorum. Stable across restarts.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct ReplicaId(String);

impl ReplicaId {
    pub(crate) fn new(replica_id: impl Into<String>) -> Self {
        ReplicaId(replica_id.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ReplicaMetadata {
    replica_id: ReplicaId,
    ip_addr: Ipv4Addr,
    port: u16,
}

impl ReplicaMetadata {
    pub(crate) fn new(replica_id: ReplicaId, ip_addr: Ipv4Addr, port: u16) -> Self {
        ReplicaMetadata {
            replica_id,
            ip_addr,
            port,
        }
    }

    pub(crate) fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    pub(crate) fn ip_addr(&self) -> Ipv4Addr {
        self.ip_addr
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_addr, self.port))
    }

    fn to_proto(&self) -> ProtoMember {
        ProtoMember {
            replica_id: self.replica_id.as_str().to_string(),
            host: self.ip_addr.to_string(),
            port: self.port as u32,
        }
    }

    fn from_proto(proto: ProtoMember) -> Result<Self, ClusterConfigError> {
        let ip_addr = proto
            .host
            .parse()
            .map_err(|_| ClusterConfigError::Malformed(format!("bad host {:?}", proto.host)))?;
        if proto.port > u16::MAX as u32 {
            return Err(ClusterConfigError::Malformed(format!("bad port {}", proto.port)));
        }
        Ok(ReplicaMetadata::new(
            ReplicaId::new(proto.replica_id),
            ip_addr,
            proto.port as u16,
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ClusterConfigError {
    #[error("Replica {0:?} is listed more than once")]
    DuplicateMember(ReplicaId),
    #[error("Replica {0:?} is already a member")]
    AlreadyMember(ReplicaId),
    #[error("Replica {0:?} is not a member")]
    NotMember(ReplicaId),
    #[error("A cluster can't have zero members")]
    Empty,
    #[error("Malformed cluster config: {0}")]
    Malformed(String),
}

/// ClusterConfig is a set of voting members. Members are kept sorted by id so equal configs
/// compare and serialize the same everywhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ClusterConfig {
    members: Vec<ReplicaMetadata>,
}

impl ClusterConfig {
    pub(crate) fn new(mut members: Vec<ReplicaMetadata>) -> Result<Self, ClusterConfigError> {
        if members.is_empty() {
            return Err(ClusterConfigError::Empty);
        }
        members.sort_by(|a, b| a.replica_id.cmp(&b.replica_id));
        for pair in members.windows(2) {
            if pair[0].replica_id == pair[1].replica_id {
                return Err(ClusterConfigError::DuplicateMember(pair[0].replica_id.clone()));
            }
        }
        Ok(ClusterConfig { members })
    }

    pub(crate) fn contains(&self, replica_id: &ReplicaId) -> bool {
        self.member(replica_id).is_some()
    }

    pub(crate) fn member(&self, replica_id: &ReplicaId) -> Option<&ReplicaMetadata> {
        self.members.iter().find(|m| &m.replica_id == replica_id)
    }

    pub(crate) fn members(&self) -> &[ReplicaMetadata] {
        &self.members
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = &ReplicaId> {
        self.members.iter().map(|m| &m.replica_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn with_member(&self, member: ReplicaMetadata) -> Result<Self, ClusterConfigError> {
        if self.contains(&member.replica_id) {
            return Err(ClusterConfigError::AlreadyMember(member.replica_id));
        }
        let mut members = self.members.clone();
        members.push(member);
        Self::new(members)
    }

    pub(crate) fn without_member(&self, replica_id: &ReplicaId) -> Result<Self, ClusterConfigError> {
        if !self.contains(replica_id) {
            return Err(ClusterConfigError::NotMember(replica_id.clone()));
        }
        Self::new(
            self.members
                .iter()
                .filter(|m| &m.replica_id != replica_id)
                .cloned()
                .collect(),
        )
    }

    pub(crate) fn to_proto(&self) -> ProtoClusterConfig {
        ProtoClusterConfig {
            members: self.members.iter().map(ReplicaMetadata::to_proto).collect(),
        }
    }

    pub(crate) fn from_proto(proto: ProtoClusterConfig) -> Result<Self, ClusterConfigError> {
        let members = proto
            .members
            .into_iter()
            .map(ReplicaMetadata::from_proto)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(members)
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        codec::encode_message(&self.to_proto())
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, io::Error> {
        let proto: ProtoClusterConfig = codec::decode_message(bytes)?;
        Self::from_proto(proto).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[derive(Clone)]
pub(crate) struct Peer {
    pub(crate) metadata: ReplicaMetadata,
    pub(crate) client: PeerClient,
}

/// ClusterTracker knows who is in the cluster and how to reach them.
///
/// Voting and commit decisions use the committed config only. A proposed change is tracked
/// alongside it until its log entry commits, so the leader can already replicate to a joining
/// member. At most one change is proposed at a time.
pub(crate) struct ClusterTracker {
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    committed: ClusterConfig,
    pending: Option<(Index, ClusterConfig)>,
    peers: HashMap<ReplicaId, Peer>,
    transport: PeerTransport,
}

impl ClusterTracker {
    pub(crate) fn new(
        logger: slog::Logger,
        my_replica_id: ReplicaId,
        committed: ClusterConfig,
        transport: PeerTransport,
    ) -> Self {
        let mut tracker = ClusterTracker {
            logger,
            my_replica_id,
            committed,
            pending: None,
            peers: HashMap::new(),
            transport,
        };
        tracker.refresh_peers();
        tracker
    }

    pub(crate) fn my_replica_id(&self) -> &ReplicaId {
        &self.my_replica_id
    }

    pub(crate) fn committed_config(&self) -> &ClusterConfig {
        &self.committed
    }

    pub(crate) fn pending_change(&self) -> Option<&(Index, ClusterConfig)> {
        self.pending.as_ref()
    }

    pub(crate) fn is_voter(&self, replica_id: &ReplicaId) -> bool {
        self.committed.contains(replica_id)
    }

    pub(crate) fn am_voter(&self) -> bool {
        self.is_voter(&self.my_replica_id)
    }

    pub(crate) fn num_voters(&self) -> usize {
        self.committed.len()
    }

    pub(crate) fn voter_ids(&self) -> Vec<ReplicaId> {
        self.committed.ids().cloned().collect()
    }

    pub(crate) fn peer(&self, replica_id: &ReplicaId) -> Option<&Peer> {
        self.peers.get(replica_id)
    }

    /// Everyone the leader replicates to: committed and proposed members, except me.
    pub(crate) fn peer_ids(&self) -> HashSet<ReplicaId> {
        self.peers.keys().cloned().collect()
    }

    pub(crate) fn metadata(&self, replica_id: &ReplicaId) -> Option<&ReplicaMetadata> {
        self.committed
            .member(replica_id)
            .or_else(|| self.pending.as_ref().and_then(|(_, c)| c.member(replica_id)))
            .or_else(|| self.peers.get(replica_id).map(|p| &p.metadata))
    }

    pub(crate) fn propose(&mut self, index: Index, config: ClusterConfig) {
        slog::info!(self.logger, "Proposed cluster config at {:?}: {:?}", index, config);
        self.pending = Some((index, config));
        self.refresh_peers();
    }

    /// `config` was committed by the log entry at `index`.
    pub(crate) fn commit(&mut self, index: Index, config: ClusterConfig) {
        if matches!(&self.pending, Some((pending_index, _)) if *pending_index <= index) {
            self.pending = None;
        }
        slog::info!(self.logger, "Committed cluster config at {:?}: {:?}", index, config);
        self.committed = config;
        self.refresh_peers();
    }

    /// Replaces the committed config wholesale, e.g. from an installed snapshot.
    pub(crate) fn reset(&mut self, config: ClusterConfig) {
        self.pending = None;
        self.committed = config;
        self.refresh_peers();
    }

    /// Forgets a proposal whose log entry was discarded (at or after `truncated_from`).
    pub(crate) fn abandon_pending_from(&mut self, truncated_from: Index) {
        if matches!(&self.pending, Some((pending_index, _)) if *pending_index >= truncated_from) {
            slog::info!(self.logger, "Abandoning proposed cluster config");
            self.pending = None;
            self.refresh_peers();
        }
    }

    pub(crate) fn abandon_pending(&mut self) {
        if self.pending.take().is_some() {
            self.refresh_peers();
        }
    }

    fn refresh_peers(&mut self) {
        let mut wanted: HashMap<ReplicaId, ReplicaMetadata> = HashMap::new();
        let pending_members = self.pending.iter().flat_map(|(_, c)| c.members().iter());
        for member in self.committed.members().iter().chain(pending_members) {
            if member.replica_id != self.my_replica_id {
                wanted.insert(member.replica_id.clone(), member.clone());
            }
        }

        self.peers.retain(|id, peer| wanted.get(id) == Some(&peer.metadata));
        for (id, metadata) in wanted {
            if self.peers.contains_key(&id) {
                continue;
            }
            match self.transport.connect(&self.my_replica_id, &metadata) {
                Ok(client) => {
                    self.peers.insert(id, Peer { metadata, client });
                }
                Err(e) => slog::warn!(self.logger, "Can't create client for {:?}: {:?}", id, e),
            }
        }
    }
}
