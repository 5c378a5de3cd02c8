use crate::api::JournalOptionsValidated;
use crate::catalog::{self, CatalogError, Domain};
use crate::checkpoint::{self, CheckpointStore};
use crate::commitlog::{Log, SegmentedDiskLog, StorageConfig};
use crate::journal::{BatchReceipt, JournalBatch, JournalError, JournalWriter, Journaled, SequenceNumber};
use crate::replay::{ApplyOutcome, ReplayDispatcher};
use crate::ufs::UfsLogRecord;
use prost::Message;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

const LOGS_DIRECTORY: &str = "logs";
const CHECKPOINTS_DIRECTORY: &str = "checkpoints";

/// Where one domain keeps its journal under the shared base directory.
fn domain_directory(base_directory: &Path, domain: Domain) -> PathBuf {
    base_directory.join(domain.name())
}

/// UfsJournal is the journal of a single domain backed by files: a segmented log of batches plus
/// periodic checkpoints. Only one writer appends at a time.
pub(crate) struct UfsJournal {
    logger: slog::Logger,
    domain: Domain,
    state: Mutex<UfsJournalState>,
    checkpoints: Arc<CheckpointStore>,
    // Held for the whole capture-persist-truncate cycle, so checkpoints don't interleave.
    checkpoint_lock: Mutex<()>,
    checkpoint_wanted: Arc<Notify>,
    checkpoint_period_entries: u64,
    log_size_bytes_max: u64,
}

struct UfsJournalState {
    log: SegmentedDiskLog<UfsLogRecord>,
    dispatcher: ReplayDispatcher,
    entries_since_checkpoint: u64,
    bytes_since_checkpoint: u64,
    last_checkpoint: Option<u64>,
    // Set when applying a logged batch failed. The domain no longer matches the log.
    failure: Option<String>,
}

impl UfsJournal {
    /// Rebuilds the domain from its latest checkpoint plus the log after it. Does blocking IO.
    pub(crate) fn recover(
        logger: slog::Logger,
        base_directory: &Path,
        journaled: Arc<dyn Journaled>,
        options: &JournalOptionsValidated,
    ) -> Result<UfsJournal, JournalError> {
        let domain = journaled.domain();
        let logger = logger.new(slog::o!("Domain" => domain.name()));
        let directory = domain_directory(base_directory, domain);

        let checkpoints = CheckpointStore::open(
            logger.clone(),
            directory.join(CHECKPOINTS_DIRECTORY),
            options.retained_checkpoints,
        )?;
        let log = SegmentedDiskLog::open(
            logger.clone(),
            StorageConfig {
                directory: directory.join(LOGS_DIRECTORY),
                segment_size_bytes: options.segment_size_bytes,
            },
        )?;
        let mut dispatcher = ReplayDispatcher::new(
            logger.clone(),
            vec![journaled],
            options.operation_id_window,
        );

        let mut last_checkpoint = None;
        if let Some(latest) = checkpoints.load_latest()? {
            let image = checkpoint::decode_image(&latest.payload).map_err(|e| {
                JournalError::Failed(format!("Checkpoint {} is unreadable: {}", latest.version, e))
            })?;
            dispatcher.restore_image(&image)?;
            last_checkpoint = Some(latest.version);
        }

        let mut entries_since_checkpoint = 0;
        let mut bytes_since_checkpoint = 0;
        let mut index = log.first_index();
        while index < log.next_index() {
            let record: UfsLogRecord = log.read(index)?.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Log entry {:?} vanished during replay", index),
                )
            })?;
            match dispatcher.replay_record(&record.0)? {
                ApplyOutcome::AlreadyApplied => {}
                ApplyOutcome::Applied { .. } | ApplyOutcome::Duplicate => {
                    entries_since_checkpoint += record.num_entries();
                    bytes_since_checkpoint += record.0.encoded_len() as u64;
                }
            }
            index = index.plus(1);
        }

        slog::info!(
            logger,
            "Recovered journal. Last sequence number {:?}, {} entries since checkpoint {:?}.",
            dispatcher.last_sequence_number(),
            entries_since_checkpoint,
            last_checkpoint
        );

        let journal = UfsJournal {
            logger,
            domain,
            state: Mutex::new(UfsJournalState {
                log,
                dispatcher,
                entries_since_checkpoint,
                bytes_since_checkpoint,
                last_checkpoint,
                failure: None,
            }),
            checkpoints: Arc::new(checkpoints),
            checkpoint_lock: Mutex::new(()),
            checkpoint_wanted: Arc::new(Notify::new()),
            checkpoint_period_entries: options.checkpoint_period_entries,
            log_size_bytes_max: options.log_size_bytes_max,
        };
        if journal.is_checkpoint_due(entries_since_checkpoint, bytes_since_checkpoint) {
            journal.checkpoint_wanted.notify_one();
        }

        Ok(journal)
    }

    pub(crate) fn domain(&self) -> Domain {
        self.domain
    }

    pub(crate) fn checkpoint_wanted(&self) -> Arc<Notify> {
        self.checkpoint_wanted.clone()
    }

    pub(crate) async fn last_sequence_number(&self) -> Option<SequenceNumber> {
        self.state.lock().await.dispatcher.last_sequence_number()
    }

    fn is_checkpoint_due(&self, entries: u64, bytes: u64) -> bool {
        entries >= self.checkpoint_period_entries || bytes >= self.log_size_bytes_max
    }

    /// Writes a checkpoint of everything applied so far, then drops the log segments it covers.
    /// Writers are only blocked while the state is captured, not while it is persisted.
    pub(crate) async fn checkpoint(&self) -> Result<Option<SequenceNumber>, JournalError> {
        let _checkpointing = self.checkpoint_lock.lock().await;

        let (version, payload, covered_until, captured_entries, captured_bytes) = {
            let mut state = self.state.lock().await;
            let version = match state.dispatcher.last_sequence_number() {
                Some(last) => last.as_u64(),
                None => return Ok(None),
            };
            if state.last_checkpoint == Some(version) {
                return Ok(Some(SequenceNumber::new(version)));
            }

            let image = state.dispatcher.checkpoint_image();
            state.log.roll_segment()?;
            let covered_until = state.log.next_index();
            (
                version,
                checkpoint::encode_image(&image),
                covered_until,
                state.entries_since_checkpoint,
                state.bytes_since_checkpoint,
            )
        };

        let store = self.checkpoints.clone();
        tokio::task::spawn_blocking(move || store.write(version, &payload))
            .await
            .map_err(|e| JournalError::Failed(format!("Checkpoint task failed: {}", e)))??;

        // Writes that landed while persisting still count toward the next checkpoint.
        let mut state = self.state.lock().await;
        state.entries_since_checkpoint = state.entries_since_checkpoint.saturating_sub(captured_entries);
        state.bytes_since_checkpoint = state.bytes_since_checkpoint.saturating_sub(captured_bytes);
        state.last_checkpoint = Some(version);
        state.log.truncate_prefix(covered_until)?;
        slog::info!(self.logger, "Checkpointed at sequence number {}", version);

        Ok(Some(SequenceNumber::new(version)))
    }

    fn foreign_entry_check(&self, batch: &JournalBatch) -> Result<(), JournalError> {
        for entry in batch.entries.iter() {
            let entry_domain = catalog::domain_for(entry)?;
            if entry_domain != self.domain {
                return Err(CatalogError::ForeignEntry {
                    journal: self.domain,
                    entry_domain,
                }
                .into());
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl JournalWriter for UfsJournal {
    async fn write_batch(&self, batch: JournalBatch) -> Result<BatchReceipt, JournalError> {
        self.foreign_entry_check(&batch)?;

        let operation_id = batch.operation_id;
        let mut state = self.state.lock().await;
        if let Some(reason) = state.failure.as_ref() {
            return Err(JournalError::Failed(reason.clone()));
        }
        if state.dispatcher.has_applied(&operation_id) {
            return Ok(BatchReceipt {
                operation_id,
                last_sequence_number: None,
                duplicate: true,
            });
        }

        let record = UfsLogRecord(state.dispatcher.stamp(batch));
        let num_entries = record.num_entries();
        let num_bytes = record.0.encoded_len() as u64;
        // Not applied until the append is durable. A failed append leaves nothing behind.
        state.log.append(record.clone())?;

        let outcome = match state.dispatcher.replay_record(&record.0) {
            Ok(outcome) => outcome,
            Err(e) => {
                slog::error!(self.logger, "Failed to apply a logged batch: {}", e);
                state.failure = Some(e.to_string());
                return Err(e.into());
            }
        };

        state.entries_since_checkpoint += num_entries;
        state.bytes_since_checkpoint += num_bytes;
        if self.is_checkpoint_due(state.entries_since_checkpoint, state.bytes_since_checkpoint) {
            self.checkpoint_wanted.notify_one();
        }

        Ok(match outcome {
            ApplyOutcome::Applied {
                last_sequence_number,
            } => BatchReceipt {
                operation_id,
                last_sequence_number: Some(last_sequence_number),
                duplicate: false,
            },
            ApplyOutcome::Duplicate | ApplyOutcome::AlreadyApplied => BatchReceipt {
                operation_id,
                last_sequence_number: None,
                duplicate: true,
            },
        })
    }
}
