//! Applying journal records to the domains, both during recovery and at runtime.

mod dispatcher;

pub use dispatcher::ApplyOutcome;
pub use dispatcher::ReplayDispatcher;

use crate::catalog::{CatalogError, Domain};
use crate::journal::{ApplyError, SequenceNumber};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Journal sequence gap: expected {expected:?} but found {found:?}")]
    SequenceGap {
        expected: SequenceNumber,
        found: SequenceNumber,
    },

    #[error("Unroutable journal entry {sequence_number:?}")]
    Catalog {
        sequence_number: Option<SequenceNumber>,
        #[source]
        source: CatalogError,
    },

    #[error("No domain registered for {domain} (entry {sequence_number:?})")]
    UnregisteredDomain {
        domain: Domain,
        sequence_number: Option<SequenceNumber>,
    },

    #[error("{domain} failed to apply entry {sequence_number:?}")]
    Apply {
        domain: Domain,
        sequence_number: Option<SequenceNumber>,
        #[source]
        source: ApplyError,
    },

    #[error("Malformed journal record: {0}")]
    Decode(String),
}
