mod election;
mod local_state;
mod peer_calls;
mod peer_client;
mod peers;
mod replica;
mod replica_api;
mod snapshot;
mod state_machine;
mod write_ahead_log;

pub(crate) use election::ElectionStateChangeListener;
pub(crate) use election::ElectionStateSnapshot;
pub(crate) use local_state::DurableLocalState;
pub(crate) use local_state::PersistentLocalState;
pub(crate) use local_state::Term;
pub(crate) use local_state::VolatileLocalState;
pub(crate) use peer_client::PeerTransport;
pub(crate) use peers::ClusterConfig;
pub(crate) use peers::ClusterTracker;
pub(crate) use peers::ReplicaId;
pub(crate) use peers::ReplicaMetadata;
pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaConfig;
pub(crate) use replica_api::*;
pub(crate) use snapshot::SnapshotPayload;
pub(crate) use snapshot::SnapshotTracker;
pub(crate) use state_machine::JournalStateMachine;
pub(crate) use write_ahead_log::EntryKind;
pub(crate) use write_ahead_log::WriteAheadLog;
pub(crate) use write_ahead_log::WriteAheadLogEntry;
