use crate::actor::{ActorClient, ReplicaActor, WeakActorClient};
use crate::api::error::JournalCreationError;
use crate::api::event_bus::EventListener;
use crate::api::options::{JournalOptions, JournalOptionsValidated, RaftOptions, RaftOptionsValidated};
use crate::api::quorum::QuorumController;
use crate::api::types::{self, RaftMemberInfo};
use crate::catalog::{self, DomainRegistry};
use crate::checkpoint::CheckpointStore;
use crate::commitlog::{SegmentedDiskLog, StorageConfig};
use crate::journal::{
    BatchReceipt, JournalBatch, JournalContext, JournalError, JournalWriter, Journaled, OperationId, SequenceNumber,
};
use crate::replay::ReplayDispatcher;
use crate::replica::{
    ClusterConfig, ClusterTracker, DurableLocalState, ElectionStateChangeListener, EnqueueForReplicationError,
    EnqueueForReplicationInput, JournalStateMachine, PeerTransport, Replica, ReplicaConfig, ReplicaId,
    ReplicaMetadata, SnapshotError, SnapshotTracker, WriteAheadLog, WriteAheadLogEntry,
};
use crate::server::{self, LocalNetwork, RpcServer, RpcServerShutdownHandle};
use std::convert::TryFrom;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const ACTOR_QUEUE_SIZE: usize = 64;

pub struct EmbeddedJournalConfig {
    pub my_replica_id: String,
    /// Must include this replica, for its address.
    pub cluster_members: Vec<RaftMemberInfo>,
    /// Start outside the quorum and wait to be added with `QuorumController::add_member()`.
    /// The initial configuration is then `cluster_members` without this replica.
    pub join_existing_cluster: bool,
    /// Holds `raft-state`, `raft-log/` and `snapshots/`.
    pub data_directory: PathBuf,
    pub info_logger: slog::Logger,
    /// Talk to peers in-process instead of over gRPC.
    pub local_network: Option<LocalNetwork>,
    pub raft_options: RaftOptions,
    pub journal_options: JournalOptions,
}

/// EmbeddedJournalSystem replicates one journal for all domains across a quorum of replicas
/// with Raft. Only the leader accepts writes; every replica applies committed batches to its
/// domains in the same order.
pub struct EmbeddedJournalSystem {
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    actor_client: ActorClient,
    actor_task: JoinHandle<()>,
    writer: Arc<EmbeddedJournalWriter>,
    election_state_change_listener: ElectionStateChangeListener,
    client_write_timeout: Duration,
    server: ServerHandle,
}

enum ServerHandle {
    Grpc(RpcServerShutdownHandle),
    Local(LocalNetwork),
}

pub async fn try_create_embedded_journal(
    config: EmbeddedJournalConfig,
    domains: Vec<Arc<dyn Journaled>>,
) -> Result<EmbeddedJournalSystem, JournalCreationError> {
    let root_logger = config.info_logger;
    let raft_options = RaftOptionsValidated::try_from(config.raft_options)
        .map_err(|e| JournalCreationError::IllegalOptions(e.to_string()))?;
    let journal_options = JournalOptionsValidated::try_from(config.journal_options)
        .map_err(|e| JournalCreationError::IllegalOptions(e.to_string()))?;

    let mut registry = DomainRegistry::new();
    for journaled in domains {
        registry.register(journaled)?;
    }
    registry.verify_partition()?;

    let my_replica_name = config.my_replica_id;
    let my_member_info = config
        .cluster_members
        .iter()
        .find(|member| member.replica_id == my_replica_name)
        .cloned()
        .ok_or_else(|| {
            JournalCreationError::InvalidClusterInfo(
                format!("Replica {} is not among the cluster members", my_replica_name).into(),
            )
        })?;
    let logger = root_logger.new(slog::o!("Replica" => my_replica_name.clone()));
    let my_replica_id = ReplicaId::new(my_replica_name);

    let join_existing_cluster = config.join_existing_cluster;
    let initial_members = config
        .cluster_members
        .into_iter()
        .filter(|member| !join_existing_cluster || member.replica_id != my_replica_id.as_str())
        .map(ReplicaMetadata::from)
        .collect();
    let initial_config =
        ClusterConfig::new(initial_members).map_err(|e| JournalCreationError::InvalidClusterInfo(e.into()))?;

    // Durable state: term and vote, snapshots, then the log that follows the latest snapshot.
    let data_directory = config.data_directory;
    std::fs::create_dir_all(&data_directory)?;
    let local_state = DurableLocalState::open(data_directory.join("raft-state"), my_replica_id.clone())?;
    let store = Arc::new(CheckpointStore::open(
        logger.clone(),
        data_directory.join("snapshots"),
        journal_options.retained_checkpoints,
    )?);
    let latest_snapshot = SnapshotTracker::load_latest(&store)?;

    let mut state_machine = JournalStateMachine::new(ReplayDispatcher::from_registry(
        logger.clone(),
        &registry,
        journal_options.operation_id_window,
    ));
    let committed_config = match &latest_snapshot {
        Some(snapshot) => {
            slog::info!(logger, "Restoring snapshot at {:?}", snapshot.last_included_index);
            state_machine.restore_image(&snapshot.image).map_err(JournalError::from)?;
            snapshot.config.clone()
        }
        None => initial_config,
    };

    let disk_log: SegmentedDiskLog<WriteAheadLogEntry> = SegmentedDiskLog::open(
        logger.clone(),
        StorageConfig {
            directory: data_directory.join("raft-log"),
            segment_size_bytes: journal_options.segment_size_bytes,
        },
    )?;
    let log = WriteAheadLog::new(
        logger.clone(),
        disk_log,
        latest_snapshot
            .as_ref()
            .map(|snapshot| (snapshot.last_included_term, snapshot.last_included_index)),
    )?;

    let transport = match &config.local_network {
        Some(network) => PeerTransport::Local(network.clone()),
        None => PeerTransport::Grpc,
    };
    let cluster_tracker = ClusterTracker::new(logger.clone(), my_replica_id.clone(), committed_config, transport);

    let (actor_client, actor_queue_rx) = ActorClient::new(ACTOR_QUEUE_SIZE);
    let (replica, election_state_change_listener) = Replica::new(ReplicaConfig {
        logger: logger.clone(),
        cluster_tracker,
        log,
        local_state,
        state_machine,
        snapshots: SnapshotTracker::new(store, latest_snapshot, journal_options.checkpoint_period_entries),
        actor_client: actor_client.weak(),
        leader_heartbeat_duration: raft_options.leader_heartbeat_duration,
        follower_min_timeout: raft_options.follower_min_timeout,
        follower_max_timeout: raft_options.follower_max_timeout,
        append_entries_timeout: raft_options.leader_append_entries_timeout,
        max_entries_per_append: raft_options.max_entries_per_append,
        snapshot_retained_entries: raft_options.snapshot_retained_entries,
    });
    let actor_task = tokio::spawn(ReplicaActor::new(actor_queue_rx, replica).run_event_loop());

    let rpc_server = RpcServer::new(logger.clone(), actor_client.weak());
    let server = match config.local_network {
        Some(network) => {
            network.register(my_replica_id.clone(), rpc_server);
            ServerHandle::Local(network)
        }
        None => {
            let (shutdown_handle, shutdown_signal) = server::shutdown_signal();
            tokio::spawn(rpc_server.run(my_member_info.rpc_server_addr(), shutdown_signal));
            ServerHandle::Grpc(shutdown_handle)
        }
    };

    slog::info!(logger, "Embedded journal started");
    Ok(EmbeddedJournalSystem {
        writer: Arc::new(EmbeddedJournalWriter {
            actor_client: actor_client.weak(),
            client_write_timeout: raft_options.client_write_timeout,
        }),
        logger,
        my_replica_id,
        actor_client,
        actor_task,
        election_state_change_listener,
        client_write_timeout: raft_options.client_write_timeout,
        server,
    })
}

impl EmbeddedJournalSystem {
    /// Entries may belong to any domain. Writes succeed only on the leader.
    pub fn create_journal_context(&self) -> JournalContext {
        JournalContext::new(self.logger.clone(), self.writer.clone())
    }

    /// For retrying an operation that may already have committed, possibly through another
    /// replica.
    pub fn create_journal_context_with_operation_id(&self, operation_id: OperationId) -> JournalContext {
        JournalContext::with_operation_id(self.logger.clone(), self.writer.clone(), operation_id)
    }

    pub fn quorum_controller(&self) -> QuorumController {
        QuorumController::new(self.actor_client.weak(), self.client_write_timeout)
    }

    pub fn event_listener(&self) -> EventListener {
        EventListener::new(self.election_state_change_listener.clone())
    }

    /// Snapshots everything this replica has applied and compacts the log behind it. Returns the
    /// sequence number the snapshot covers, or None when nothing was ever applied.
    pub async fn trigger_checkpoint(&self) -> Result<Option<SequenceNumber>, JournalError> {
        self.actor_client
            .weak()
            .trigger_snapshot()
            .await
            .map_err(|e| match e {
                SnapshotError::PersistFailed(message) => JournalError::Io(io::Error::new(io::ErrorKind::Other, message)),
                SnapshotError::ActorExited => JournalError::Closed,
            })
    }

    /// Stops serving peers and stops the replica. Pending writes fail with `LeadershipLost`.
    pub async fn shutdown(self) {
        match self.server {
            ServerHandle::Grpc(mut shutdown_handle) => shutdown_handle.shut_down(),
            ServerHandle::Local(network) => network.deregister(&self.my_replica_id),
        }

        if self.actor_client.weak().shutdown().await.is_err() {
            slog::warn!(self.logger, "Replica actor exited before shutdown");
        }
        drop(self.actor_client);
        if let Err(e) = self.actor_task.await {
            slog::error!(self.logger, "Replica actor task failed: {:?}", e);
        }
        slog::info!(self.logger, "Embedded journal shut down");
    }
}

struct EmbeddedJournalWriter {
    actor_client: WeakActorClient,
    client_write_timeout: Duration,
}

#[async_trait::async_trait]
impl JournalWriter for EmbeddedJournalWriter {
    async fn write_batch(&self, batch: JournalBatch) -> Result<BatchReceipt, JournalError> {
        // Unknown variants never enter the replicated log.
        for entry in batch.entries.iter() {
            catalog::domain_for(entry)?;
        }

        let input = EnqueueForReplicationInput {
            operation_id: batch.operation_id,
            data: JournalStateMachine::encode_batch(batch),
        };
        match tokio::time::timeout(self.client_write_timeout, self.actor_client.enqueue_for_replication(input)).await {
            Ok(result) => result.map_err(convert_enqueue_error),
            Err(_) => Err(JournalError::Unavailable(self.client_write_timeout)),
        }
    }
}

fn convert_enqueue_error(e: EnqueueForReplicationError) -> JournalError {
    match e {
        EnqueueForReplicationError::LeaderRedirect(leader) => JournalError::LeaderRedirect(types::leader_info(leader)),
        EnqueueForReplicationError::NoLeader => JournalError::NoLeader,
        EnqueueForReplicationError::LeadershipLost => JournalError::LeadershipLost,
        EnqueueForReplicationError::ChangeInProgress => JournalError::ChangeInProgress,
        EnqueueForReplicationError::InvalidMembershipChange(message) => JournalError::InvalidMembershipChange(message),
        EnqueueForReplicationError::LocalIoError(e) => JournalError::Io(e),
        EnqueueForReplicationError::StateMachineFailed(message) => JournalError::Failed(message),
        EnqueueForReplicationError::ActorExited => JournalError::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VariantTag;

    #[tokio::test]
    async fn write_to_stopped_replica_is_closed() {
        let (actor_client, rx) = ActorClient::new(1);
        let writer = EmbeddedJournalWriter {
            actor_client: actor_client.weak(),
            client_write_timeout: Duration::from_secs(1),
        };
        drop(rx);

        let result = writer
            .write_batch(JournalBatch {
                operation_id: OperationId::random(),
                entries: vec![VariantTag::BlockInfo.default_entry()],
            })
            .await;
        assert!(matches!(result, Err(JournalError::Closed)));
    }

    #[tokio::test]
    async fn slow_commit_is_unavailable() {
        let (actor_client, _rx) = ActorClient::new(1);
        let writer = EmbeddedJournalWriter {
            actor_client: actor_client.weak(),
            client_write_timeout: Duration::from_millis(20),
        };

        let result = writer
            .write_batch(JournalBatch {
                operation_id: OperationId::random(),
                entries: vec![VariantTag::BlockInfo.default_entry()],
            })
            .await;
        assert!(matches!(result, Err(JournalError::Unavailable(_))));
    }

    #[test]
    fn leader_redirect_is_retryable() {
        let e = convert_enqueue_error(EnqueueForReplicationError::NoLeader);
        assert!(e.is_retryable());
        let e = convert_enqueue_error(EnqueueForReplicationError::StateMachineFailed("bad".into()));
        assert!(!e.is_retryable());
    }
}
