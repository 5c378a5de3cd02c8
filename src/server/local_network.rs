use crate::replica::ReplicaId;
use crate::server::RpcServer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tonic::Status;

/// LocalNetwork connects replicas living in the same process without sockets. Calls go straight
/// to the receiving replica's RPC handlers. Any replica can be cut off and reconnected, which
/// makes partitions easy to stage in tests.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    nodes: Arc<Mutex<HashMap<ReplicaId, LocalNode>>>,
}

struct LocalNode {
    server: RpcServer,
    connected: bool,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, replica_id: ReplicaId, server: RpcServer) {
        self.nodes().insert(
            replica_id,
            LocalNode {
                server,
                connected: true,
            },
        );
    }

    pub(crate) fn deregister(&self, replica_id: &ReplicaId) {
        self.nodes().remove(replica_id);
    }

    /// Drops every call to and from `replica_id` until `reconnect()`.
    pub fn disconnect(&self, replica_id: &str) {
        self.set_connected(replica_id, false);
    }

    pub fn reconnect(&self, replica_id: &str) {
        self.set_connected(replica_id, true);
    }

    pub(crate) fn route(&self, from: &ReplicaId, to: &ReplicaId) -> Result<RpcServer, Status> {
        let nodes = self.nodes();
        let sender_connected = nodes.get(from).map(|node| node.connected).unwrap_or(true);
        match nodes.get(to) {
            Some(node) if node.connected && sender_connected => Ok(node.server.clone()),
            Some(_) => Err(Status::unavailable(format!("{:?} is unreachable from {:?}", to, from))),
            None => Err(Status::unavailable(format!("{:?} is not on this network", to))),
        }
    }

    fn set_connected(&self, replica_id: &str, connected: bool) {
        if let Some(node) = self.nodes().get_mut(&ReplicaId::new(replica_id)) {
            node.connected = connected;
        }
    }

    fn nodes(&self) -> MutexGuard<'_, HashMap<ReplicaId, LocalNode>> {
        // Nothing panics while holding the lock; recover the map regardless.
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
