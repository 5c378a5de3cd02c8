use crate::checkpoint;
use crate::codec;
use crate::journal::{JournalBatch, OperationId, SequenceNumber};
use crate::replay::{ApplyOutcome, ReplayDispatcher, ReplayError};
use crate::schema::JournalEntry;
use bytes::Bytes;

/// JournalStateMachine is what committed data entries are applied to. Batches travel through the
/// replicated log unnumbered; every replica numbers them identically as it applies them in log
/// order.
pub(crate) struct JournalStateMachine {
    dispatcher: ReplayDispatcher,
}

impl JournalStateMachine {
    pub(crate) fn new(dispatcher: ReplayDispatcher) -> Self {
        JournalStateMachine { dispatcher }
    }

    /// Encodes a batch for a data entry.
    pub(crate) fn encode_batch(batch: JournalBatch) -> Bytes {
        Bytes::from(codec::encode_message(&batch.into_record()))
    }

    pub(crate) fn apply(&mut self, data: &[u8]) -> Result<ApplyOutcome, ReplayError> {
        let record: JournalEntry =
            codec::decode_message(data).map_err(|e| ReplayError::Decode(e.to_string()))?;
        let batch = JournalBatch::from_record(record)
            .ok_or_else(|| ReplayError::Decode("batch without operation id".into()))?;
        self.dispatcher.apply_batch(batch)
    }

    pub(crate) fn has_applied(&self, operation_id: &OperationId) -> bool {
        self.dispatcher.has_applied(operation_id)
    }

    pub(crate) fn last_sequence_number(&self) -> Option<SequenceNumber> {
        self.dispatcher.last_sequence_number()
    }

    /// Encoded image of every domain, and the sequence number it reflects.
    pub(crate) fn capture_image(&self) -> (Option<SequenceNumber>, Bytes) {
        let image = self.dispatcher.checkpoint_image();
        (
            SequenceNumber::from_wire(image.sequence_number),
            Bytes::from(checkpoint::encode_image(&image)),
        )
    }

    pub(crate) fn restore_image(&mut self, image: &[u8]) -> Result<(), ReplayError> {
        let image = checkpoint::decode_image(image).map_err(|e| ReplayError::Decode(e.to_string()))?;
        self.dispatcher.restore_image(&image)
    }
}
