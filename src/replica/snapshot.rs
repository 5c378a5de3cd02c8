use crate::checkpoint::CheckpointStore;
use crate::codec;
use crate::commitlog::Index;
use crate::grpc::ProtoSnapshot;
use crate::journal::SequenceNumber;
use crate::replica::local_state::Term;
use crate::replica::peers::ClusterConfig;
use bytes::Bytes;
use std::io;
use std::sync::Arc;

/// SnapshotPayload is everything a replica needs to resume from `last_included_index` without
/// the log before it: the applied state of every domain and the cluster config in effect.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SnapshotPayload {
    pub(crate) last_included_index: Index,
    pub(crate) last_included_term: Term,
    pub(crate) config: ClusterConfig,
    // Encoded checkpoint image of the journal state machine.
    pub(crate) image: Bytes,
}

impl SnapshotPayload {
    pub(crate) fn to_proto(&self) -> ProtoSnapshot {
        ProtoSnapshot {
            last_included_index: self.last_included_index.as_u64(),
            last_included_term: self.last_included_term.as_u64(),
            config: Some(self.config.to_proto()),
            image: self.image.to_vec(),
        }
    }

    pub(crate) fn from_proto(proto: ProtoSnapshot) -> Result<Self, io::Error> {
        let last_included_index = Index::try_new(proto.last_included_index)
            .ok_or_else(|| invalid_data("snapshot without last included index".into()))?;
        let config = proto
            .config
            .ok_or_else(|| invalid_data("snapshot without cluster config".into()))
            .and_then(|c| ClusterConfig::from_proto(c).map_err(|e| invalid_data(e.to_string())))?;

        Ok(SnapshotPayload {
            last_included_index,
            last_included_term: Term::new(proto.last_included_term),
            config,
            image: Bytes::from(proto.image),
        })
    }

    fn encode(&self) -> Vec<u8> {
        codec::encode_message(&self.to_proto())
    }

    fn decode(bytes: &[u8]) -> Result<Self, io::Error> {
        Self::from_proto(codec::decode_message(bytes)?)
    }
}

/// SnapshotTracker owns the replica's snapshots on disk and decides when a new one is due. At
/// most one snapshot is written at a time; the write itself happens off the actor.
pub(crate) struct SnapshotTracker {
    store: Arc<CheckpointStore>,
    latest: Option<Arc<SnapshotPayload>>,
    in_flight: bool,
    period_entries: u64,
}

impl SnapshotTracker {
    pub(crate) fn new(store: Arc<CheckpointStore>, latest: Option<SnapshotPayload>, period_entries: u64) -> Self {
        SnapshotTracker {
            store,
            latest: latest.map(Arc::new),
            in_flight: false,
            period_entries: period_entries.max(1),
        }
    }

    /// The newest snapshot that verifies, if any.
    pub(crate) fn load_latest(store: &CheckpointStore) -> Result<Option<SnapshotPayload>, io::Error> {
        match store.load_latest()? {
            Some(checkpoint) => SnapshotPayload::decode(&checkpoint.payload).map(Some),
            None => Ok(None),
        }
    }

    /// Blocking.
    pub(crate) fn persist(store: &CheckpointStore, snapshot: &SnapshotPayload) -> Result<(), io::Error> {
        store.write(snapshot.last_included_index.as_u64(), &snapshot.encode())
    }

    pub(crate) fn store(&self) -> Arc<CheckpointStore> {
        self.store.clone()
    }

    pub(crate) fn latest(&self) -> Option<Arc<SnapshotPayload>> {
        self.latest.clone()
    }

    pub(crate) fn latest_index(&self) -> Option<Index> {
        self.latest.as_ref().map(|s| s.last_included_index)
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// True once `period_entries` entries were applied since the latest snapshot.
    pub(crate) fn is_due(&self, last_applied: Option<Index>) -> bool {
        if self.in_flight {
            return false;
        }
        let applied = match last_applied {
            Some(applied) => applied.as_u64(),
            None => return false,
        };
        let covered = self.latest_index().map(|i| i.as_u64()).unwrap_or(0);
        applied.saturating_sub(covered) >= self.period_entries
    }

    pub(crate) fn begin(&mut self) {
        self.in_flight = true;
    }

    /// Returns true if `snapshot` is now the latest one.
    pub(crate) fn finish(&mut self, snapshot: Arc<SnapshotPayload>, persisted: bool) -> bool {
        self.in_flight = false;
        if !persisted {
            return false;
        }
        self.replace_latest(snapshot)
    }

    /// Adopts a snapshot that is already durable, e.g. one installed from the leader.
    pub(crate) fn replace_latest(&mut self, snapshot: Arc<SnapshotPayload>) -> bool {
        if matches!(self.latest_index(), Some(latest) if latest >= snapshot.last_included_index) {
            return false;
        }
        self.latest = Some(snapshot);
        true
    }
}

/// A caller waiting for a snapshot to land, and the sequence number it will cover.
pub(crate) struct SnapshotWaiter<C> {
    pub(crate) callback: C,
    pub(crate) sequence_number: Option<SequenceNumber>,
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
