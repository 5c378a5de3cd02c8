use crate::api::error::JournalCreationError;
use crate::api::options::{JournalOptions, JournalOptionsValidated};
use crate::catalog::{Domain, DomainRegistry};
use crate::journal::{JournalContext, JournalError, Journaled, OperationId, SequenceNumber};
use crate::ufs::UfsJournal;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

pub struct UfsJournalConfig {
    /// Each domain gets `<base_directory>/<domain name>/{logs,checkpoints}`.
    pub base_directory: PathBuf,
    pub info_logger: slog::Logger,
    pub options: JournalOptions,
}

/// UfsJournalSystem journals every domain to its own set of files. A single process is the
/// writer; on restart each domain is rebuilt from its latest checkpoint and log.
pub struct UfsJournalSystem {
    logger: slog::Logger,
    journals: BTreeMap<Domain, Arc<UfsJournal>>,
    checkpointer_stop: watch::Sender<()>,
    checkpointers: Vec<JoinHandle<()>>,
}

/// Opens the journal of every domain and replays them, domains in parallel. Returns once all
/// domains have caught up with what was durable before.
pub async fn try_create_ufs_journal(
    config: UfsJournalConfig,
    domains: Vec<Arc<dyn Journaled>>,
) -> Result<UfsJournalSystem, JournalCreationError> {
    let logger = config.info_logger;
    let options = JournalOptionsValidated::try_from(config.options)
        .map_err(|e| JournalCreationError::IllegalOptions(e.to_string()))?;

    let mut registry = DomainRegistry::new();
    for journaled in domains {
        registry.register(journaled)?;
    }
    registry.verify_partition()?;

    let mut recoveries = Vec::with_capacity(registry.len());
    for (_, journaled) in registry.iter() {
        let logger = logger.clone();
        let base_directory = config.base_directory.clone();
        let journaled = journaled.clone();
        let options = options.clone();
        recoveries.push(tokio::task::spawn_blocking(move || {
            UfsJournal::recover(logger, &base_directory, journaled, &options)
        }));
    }

    let mut journals = BTreeMap::new();
    for recovery in recoveries {
        let journal = recovery
            .await
            .map_err(|e| JournalError::Failed(format!("Recovery task failed: {}", e)))??;
        journals.insert(journal.domain(), Arc::new(journal));
    }

    let (checkpointer_stop, stop_signal) = watch::channel(());
    let checkpointers = journals
        .values()
        .map(|journal| {
            tokio::spawn(run_checkpointer(
                logger.new(slog::o!("Domain" => journal.domain().name())),
                Arc::downgrade(journal),
                journal.checkpoint_wanted(),
                stop_signal.clone(),
            ))
        })
        .collect();

    slog::info!(logger, "UFS journal open with {} domains", journals.len());
    Ok(UfsJournalSystem {
        logger,
        journals,
        checkpointer_stop,
        checkpointers,
    })
}

impl UfsJournalSystem {
    /// A context whose entries must all belong to `domain`.
    pub fn create_journal_context(&self, domain: Domain) -> Result<JournalContext, JournalError> {
        self.create_journal_context_with_operation_id(domain, OperationId::random())
    }

    /// Like `create_journal_context()`, for retrying an operation that may already have committed.
    pub fn create_journal_context_with_operation_id(
        &self,
        domain: Domain,
        operation_id: OperationId,
    ) -> Result<JournalContext, JournalError> {
        let journal = self.journal(domain)?;
        Ok(JournalContext::with_operation_id(
            self.logger.clone(),
            journal,
            operation_id,
        ))
    }

    /// Checkpoints `domain` now, regardless of the rotation thresholds. Returns the sequence
    /// number the checkpoint covers, or None when nothing was ever applied.
    pub async fn trigger_checkpoint(
        &self,
        domain: Domain,
    ) -> Result<Option<SequenceNumber>, JournalError> {
        self.journal(domain)?.checkpoint().await
    }

    pub async fn last_sequence_number(
        &self,
        domain: Domain,
    ) -> Result<Option<SequenceNumber>, JournalError> {
        Ok(self.journal(domain)?.last_sequence_number().await)
    }

    /// Stops background checkpointing and waits for any checkpoint in progress.
    pub async fn shutdown(self) {
        drop(self.checkpointer_stop);
        for checkpointer in self.checkpointers {
            let _ = checkpointer.await;
        }
        slog::info!(self.logger, "UFS journal shut down");
    }

    fn journal(&self, domain: Domain) -> Result<Arc<UfsJournal>, JournalError> {
        self.journals.get(&domain).cloned().ok_or_else(|| {
            JournalError::Failed(format!("Domain {} is not part of this journal", domain))
        })
    }
}

async fn run_checkpointer(
    logger: slog::Logger,
    journal: Weak<UfsJournal>,
    checkpoint_wanted: Arc<Notify>,
    mut stop_signal: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = checkpoint_wanted.notified() => {}
            _ = stop_signal.changed() => return,
        }

        let journal = match journal.upgrade() {
            Some(journal) => journal,
            None => return,
        };
        if let Err(e) = journal.checkpoint().await {
            slog::error!(logger, "Background checkpoint failed: {:?}", e);
        }
    }
}
