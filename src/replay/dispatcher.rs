use crate::catalog::{self, Domain, DomainRegistry};
use crate::journal::{
    JournalBatch, Journaled, OperationId, OperationIdWindow, SequenceCheck, SequenceNumber,
    Sequencer,
};
use crate::replay::ReplayError;
use crate::schema::{CheckpointImage, DomainCheckpoint, JournalEntry};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { last_sequence_number: SequenceNumber },
    /// The operation id was applied before. Its sequence numbers were consumed, nothing else.
    Duplicate,
    /// Every entry in the record is at or below the last applied sequence number.
    AlreadyApplied,
}

/// ReplayDispatcher routes journal records to the domains that own them, strictly in sequence
/// number order. It is the only path by which journal entries reach a domain, on startup replay
/// and on the live write path alike.
pub struct ReplayDispatcher {
    logger: slog::Logger,
    domains: BTreeMap<Domain, Arc<dyn Journaled>>,
    sequencer: Sequencer,
    applied_operations: OperationIdWindow,
}

impl ReplayDispatcher {
    pub fn new(
        logger: slog::Logger,
        domains: impl IntoIterator<Item = Arc<dyn Journaled>>,
        operation_id_window: usize,
    ) -> Self {
        ReplayDispatcher {
            logger,
            domains: domains.into_iter().map(|d| (d.domain(), d)).collect(),
            sequencer: Sequencer::new(None),
            applied_operations: OperationIdWindow::new(operation_id_window),
        }
    }

    pub fn from_registry(
        logger: slog::Logger,
        registry: &DomainRegistry,
        operation_id_window: usize,
    ) -> Self {
        Self::new(
            logger,
            registry.iter().map(|(_, journaled)| journaled.clone()),
            operation_id_window,
        )
    }

    pub fn last_sequence_number(&self) -> Option<SequenceNumber> {
        self.sequencer.last_applied()
    }

    pub fn has_applied(&self, operation_id: &OperationId) -> bool {
        self.applied_operations.contains(operation_id)
    }

    /// Turns a batch into the record that will be logged, numbered to follow what's been applied.
    pub fn stamp(&self, batch: JournalBatch) -> JournalEntry {
        let mut record = batch.into_record();
        self.sequencer.stamp(&mut record.journal_entries);
        record
    }

    /// Applies a batch that hasn't been numbered yet.
    pub fn apply_batch(&mut self, batch: JournalBatch) -> Result<ApplyOutcome, ReplayError> {
        if self.has_applied(&batch.operation_id) {
            return Ok(ApplyOutcome::Duplicate);
        }
        let record = self.stamp(batch);
        self.replay_record(&record)
    }

    /// Applies one logged record. Every entry is routed before any is applied, so an unroutable
    /// entry leaves the domains untouched.
    ///
    /// A domain rejecting an entry stops the record there. Entries ahead of it stay applied, the
    /// position doesn't advance and the operation id isn't remembered. Domain state no longer
    /// matches any sequence number, so the caller fails the journal and recovery rebuilds it from
    /// checkpoint plus log.
    pub fn replay_record(&mut self, record: &JournalEntry) -> Result<ApplyOutcome, ReplayError> {
        let entries: &[JournalEntry] = if record.entry.is_some() {
            std::slice::from_ref(record)
        } else {
            &record.journal_entries
        };
        let operation_id = record.operation_id.as_ref().map(OperationId::from_proto);

        let first = match entries.first() {
            Some(first) => first,
            None => {
                return Err(ReplayError::Catalog {
                    sequence_number: SequenceNumber::from_wire(record.sequence_number),
                    source: catalog::CatalogError::UnrecognizedEntry,
                })
            }
        };
        let first_sequence_number = SequenceNumber::from_wire(first.sequence_number)
            .ok_or_else(|| ReplayError::Decode("entry has no sequence number".into()))?;

        match self.sequencer.check_next(first_sequence_number) {
            SequenceCheck::Next => {}
            SequenceCheck::AlreadyApplied => {
                slog::debug!(
                    self.logger,
                    "Skipping already applied record starting at {:?}",
                    first_sequence_number
                );
                return Ok(ApplyOutcome::AlreadyApplied);
            }
            SequenceCheck::Gap { expected, found } => {
                return Err(ReplayError::SequenceGap { expected, found });
            }
        }

        let mut routed = Vec::with_capacity(entries.len());
        let mut expected = first_sequence_number;
        for entry in entries {
            let sequence_number = SequenceNumber::from_wire(entry.sequence_number);
            if sequence_number != Some(expected) {
                return Err(match sequence_number {
                    Some(found) => ReplayError::SequenceGap { expected, found },
                    None => ReplayError::Decode("entry has no sequence number".into()),
                });
            }
            let domain = catalog::domain_for(entry).map_err(|source| ReplayError::Catalog {
                sequence_number,
                source,
            })?;
            let journaled =
                self.domains
                    .get(&domain)
                    .ok_or(ReplayError::UnregisteredDomain {
                        domain,
                        sequence_number,
                    })?;
            routed.push((journaled, entry));
            expected = expected.next();
        }
        let last_sequence_number = SequenceNumber::new(expected.as_u64() - 1);

        if let Some(operation_id) = operation_id {
            if self.applied_operations.contains(&operation_id) {
                slog::info!(
                    self.logger,
                    "Operation {:?} was already applied. Skipping its entries.",
                    operation_id
                );
                self.sequencer.advance_to(last_sequence_number);
                return Ok(ApplyOutcome::Duplicate);
            }
        }

        for (journaled, entry) in routed {
            journaled
                .process_journal_entry(entry)
                .map_err(|source| ReplayError::Apply {
                    domain: journaled.domain(),
                    sequence_number: SequenceNumber::from_wire(entry.sequence_number),
                    source,
                })?;
        }

        self.sequencer.advance_to(last_sequence_number);
        if let Some(operation_id) = operation_id {
            self.applied_operations.insert(operation_id);
        }

        Ok(ApplyOutcome::Applied {
            last_sequence_number,
        })
    }

    /// Captures every domain's state along with the position it corresponds to.
    pub fn checkpoint_image(&self) -> CheckpointImage {
        CheckpointImage {
            sequence_number: self
                .sequencer
                .last_applied()
                .map(|s| s.to_wire())
                .unwrap_or(0),
            domains: self
                .domains
                .iter()
                .map(|(domain, journaled)| DomainCheckpoint {
                    domain: domain.name().to_string(),
                    entries: journaled.checkpoint_entries(),
                })
                .collect(),
            applied_operation_ids: self
                .applied_operations
                .iter()
                .map(OperationId::to_proto)
                .collect(),
        }
    }

    /// Replaces all domain state with the contents of `image`.
    pub fn restore_image(&mut self, image: &CheckpointImage) -> Result<(), ReplayError> {
        let mut routed = Vec::with_capacity(image.domains.len());
        for domain_checkpoint in image.domains.iter() {
            let domain = Domain::from_name(&domain_checkpoint.domain).ok_or_else(|| {
                ReplayError::Decode(format!("unknown domain {:?}", domain_checkpoint.domain))
            })?;
            let journaled = self
                .domains
                .get(&domain)
                .ok_or(ReplayError::UnregisteredDomain {
                    domain,
                    sequence_number: None,
                })?;
            routed.push((domain, journaled.clone(), &domain_checkpoint.entries));
        }

        for journaled in self.domains.values() {
            journaled.reset_state();
        }
        for (domain, journaled, entries) in routed {
            for entry in entries {
                journaled
                    .process_journal_entry(entry)
                    .map_err(|source| ReplayError::Apply {
                        domain,
                        sequence_number: None,
                        source,
                    })?;
            }
        }

        self.sequencer = Sequencer::new(SequenceNumber::from_wire(image.sequence_number));
        self.applied_operations.clear();
        for operation_id in image.applied_operation_ids.iter() {
            self.applied_operations
                .insert(OperationId::from_proto(operation_id));
        }

        slog::info!(
            self.logger,
            "Restored checkpoint image at sequence number {:?}",
            self.sequencer.last_applied()
        );
        Ok(())
    }
}
