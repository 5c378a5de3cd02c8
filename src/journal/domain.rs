use crate::catalog::{Domain, VariantTag};
use crate::schema::JournalEntry;

/// Journaled is implemented by every metadata domain whose state is rebuilt from the journal.
///
/// The journal calls into a domain from one task at a time, but not always the same task, so
/// implementations hold their state behind interior mutability.
pub trait Journaled: Send + Sync {
    fn domain(&self) -> Domain;

    /// The variants this domain applies. Defaults to the catalog's assignment.
    fn owned_variants(&self) -> Vec<VariantTag> {
        let domain = self.domain();
        VariantTag::ALL
            .iter()
            .copied()
            .filter(|variant| variant.domain() == domain)
            .collect()
    }

    /// Applies one committed entry. Must be deterministic: every replica applying the same
    /// entries in the same order ends in the same state.
    fn process_journal_entry(&self, entry: &JournalEntry) -> Result<(), ApplyError>;

    /// Entries which, applied to a freshly reset domain, rebuild the current state.
    fn checkpoint_entries(&self) -> Vec<JournalEntry>;

    /// Drops all state, as if no entry had ever been applied.
    fn reset_state(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("{domain} does not handle {variant:?}")]
    Unsupported { domain: Domain, variant: VariantTag },

    #[error("Entry rejected: {0}")]
    Rejected(String),
}
