mod context;
mod dedup;
mod domain;
mod error;
mod record;

pub use context::JournalContext;
pub use context::JournalWriter;
pub use dedup::OperationIdWindow;
pub use domain::ApplyError;
pub use domain::Journaled;
pub use error::JournalError;
pub use error::LeaderInfo;
pub use record::BatchReceipt;
pub use record::JournalBatch;
pub use record::OperationId;
pub use record::SequenceCheck;
pub use record::SequenceNumber;
pub use record::Sequencer;
