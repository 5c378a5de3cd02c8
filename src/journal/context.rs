use crate::journal::{BatchReceipt, JournalBatch, JournalError, OperationId};
use crate::schema::JournalEntry;
use std::sync::Arc;

/// JournalWriter makes one batch durable and applied. Implemented by each journal mode.
#[async_trait::async_trait]
pub trait JournalWriter: Send + Sync {
    async fn write_batch(&self, batch: JournalBatch) -> Result<BatchReceipt, JournalError>;
}

/// JournalContext collects the entries of one logical operation. Entries are not visible anywhere
/// until `close()`, which writes them as a single batch.
///
/// Dropping a context that still holds entries flushes them in the background, so the operation
/// isn't silently lost, but nobody learns whether that flush succeeded. Callers should `close()`
/// or `discard()`.
pub struct JournalContext {
    logger: slog::Logger,
    writer: Arc<dyn JournalWriter>,
    operation_id: OperationId,
    entries: Vec<JournalEntry>,
}

impl JournalContext {
    pub(crate) fn new(logger: slog::Logger, writer: Arc<dyn JournalWriter>) -> Self {
        Self::with_operation_id(logger, writer, OperationId::random())
    }

    /// For retrying an operation whose first attempt may or may not have committed.
    pub(crate) fn with_operation_id(
        logger: slog::Logger,
        writer: Arc<dyn JournalWriter>,
        operation_id: OperationId,
    ) -> Self {
        JournalContext {
            logger,
            writer,
            operation_id,
            entries: Vec::new(),
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn append(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns once every appended entry is durable and applied, or with the reason it isn't.
    pub async fn close(mut self) -> Result<BatchReceipt, JournalError> {
        let entries = std::mem::take(&mut self.entries);
        if entries.is_empty() {
            return Ok(BatchReceipt {
                operation_id: self.operation_id,
                last_sequence_number: None,
                duplicate: false,
            });
        }

        self.writer
            .write_batch(JournalBatch {
                operation_id: self.operation_id,
                entries,
            })
            .await
    }

    pub fn discard(mut self) {
        self.entries.clear();
    }
}

impl Drop for JournalContext {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }

        let batch = JournalBatch {
            operation_id: self.operation_id,
            entries: std::mem::take(&mut self.entries),
        };
        let num_entries = batch.entries.len();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                slog::warn!(
                    self.logger,
                    "Journal context dropped without close(). Flushing {} entries in background.",
                    num_entries;
                    "operation_id" => ?batch.operation_id,
                );
                let writer = self.writer.clone();
                let logger = self.logger.clone();
                runtime.spawn(async move {
                    let operation_id = batch.operation_id;
                    if let Err(e) = writer.write_batch(batch).await {
                        slog::error!(
                            logger,
                            "Background flush failed: {:?}", e;
                            "operation_id" => ?operation_id,
                        );
                    }
                });
            }
            Err(_) => {
                slog::error!(
                    self.logger,
                    "Journal context dropped outside of a runtime. Lost {} entries.",
                    num_entries;
                    "operation_id" => ?batch.operation_id,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VariantTag;
    use crate::journal::SequenceNumber;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct RecordingWriter {
        written: Mutex<Vec<JournalBatch>>,
        notify: mpsc::UnboundedSender<OperationId>,
    }

    #[async_trait::async_trait]
    impl JournalWriter for RecordingWriter {
        async fn write_batch(&self, batch: JournalBatch) -> Result<BatchReceipt, JournalError> {
            let receipt = BatchReceipt {
                operation_id: batch.operation_id,
                last_sequence_number: Some(SequenceNumber::new(batch.entries.len() as u64)),
                duplicate: false,
            };
            let _ = self.notify.send(batch.operation_id);
            self.written.lock().unwrap().push(batch);
            Ok(receipt)
        }
    }

    fn recording_writer() -> (Arc<RecordingWriter>, mpsc::UnboundedReceiver<OperationId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = Arc::new(RecordingWriter {
            written: Mutex::new(vec![]),
            notify: tx,
        });
        (writer, rx)
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn close_writes_one_batch() {
        let (writer, _rx) = recording_writer();
        let mut context = JournalContext::new(logger(), writer.clone());
        let operation_id = context.operation_id();
        context.append(VariantTag::InodeFile.default_entry());
        context.append(VariantTag::NewBlock.default_entry());

        let receipt = context.close().await.unwrap();
        assert_eq!(receipt.operation_id, operation_id);
        assert_eq!(receipt.last_sequence_number, Some(SequenceNumber::new(2)));

        let written = writer.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].entries.len(), 2);
    }

    #[tokio::test]
    async fn empty_close_writes_nothing() {
        let (writer, _rx) = recording_writer();
        let context = JournalContext::new(logger(), writer.clone());
        let receipt = context.close().await.unwrap();
        assert_eq!(receipt.last_sequence_number, None);
        assert!(writer.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn discard_writes_nothing() {
        let (writer, _rx) = recording_writer();
        let mut context = JournalContext::new(logger(), writer.clone());
        context.append(VariantTag::Rename.default_entry());
        context.discard();
        tokio::task::yield_now().await;
        assert!(writer.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drop_flushes_in_background() {
        let (writer, mut rx) = recording_writer();
        let operation_id = OperationId::random();
        {
            let mut context =
                JournalContext::with_operation_id(logger(), writer.clone(), operation_id);
            context.append(VariantTag::DeleteFile.default_entry());
        }

        assert_eq!(rx.recv().await, Some(operation_id));
        assert_eq!(writer.written.lock().unwrap()[0].entries.len(), 1);
    }
}
