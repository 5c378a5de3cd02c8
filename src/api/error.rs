use crate::catalog::CatalogError;
use crate::journal::JournalError;
use std::error::Error;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum JournalCreationError {
    #[error("Invalid cluster info")]
    InvalidClusterInfo(Box<dyn Error + Send + Sync>),
    #[error("Illegal options for configuring journal: {0}")]
    IllegalOptions(String),
    #[error("Registered domains don't cover the catalog")]
    Catalog(#[from] CatalogError),
    #[error("Log initialization failure")]
    LogInitialization(#[from] io::Error),
    #[error("Failed to recover journal state")]
    Recovery(#[from] JournalError),
}
