use crate::catalog::CatalogError;
use crate::replay::ReplayError;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Where to send writes instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderInfo {
    pub replica_id: String,
    pub ip_addr: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("I'm not leader")]
    LeaderRedirect(LeaderInfo),

    #[error("Cluster is in a tough shape. No one is leader.")]
    NoLeader,

    #[error("Leadership was lost before the write committed")]
    LeadershipLost,

    #[error("Write did not commit within {0:?}")]
    Unavailable(Duration),

    #[error("A membership change is already in progress")]
    ChangeInProgress,

    #[error("Invalid membership change: {0}")]
    InvalidMembershipChange(String),

    #[error("Journal IO failure")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error("Journal has failed and refuses writes: {0}")]
    Failed(String),

    #[error("Journal has shut down")]
    Closed,
}

impl JournalError {
    /// Retrying the same operation (same operation id) elsewhere or later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            JournalError::LeaderRedirect(_)
            | JournalError::NoLeader
            | JournalError::LeadershipLost
            | JournalError::Unavailable(_)
            | JournalError::ChangeInProgress => true,
            JournalError::Io(e) => is_transient(e.kind()),
            JournalError::InvalidMembershipChange(_)
            | JournalError::Catalog(_)
            | JournalError::Replay(_)
            | JournalError::Failed(_)
            | JournalError::Closed => false,
        }
    }
}

// The storage hiccuped and the same write may go through on the next attempt.
fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_io_is_retryable() {
        for kind in [io::ErrorKind::Interrupted, io::ErrorKind::TimedOut, io::ErrorKind::WouldBlock].iter() {
            let error = JournalError::from(io::Error::new(*kind, "hiccup"));
            assert!(error.is_retryable(), "{:?}", kind);
        }

        let error = JournalError::from(io::Error::new(io::ErrorKind::PermissionDenied, "read only"));
        assert!(!error.is_retryable());
        let error = JournalError::from(io::Error::new(io::ErrorKind::InvalidData, "corrupt"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn failed_journal_is_not_retryable() {
        assert!(!JournalError::Failed("apply".into()).is_retryable());
        assert!(!JournalError::Closed.is_retryable());
        assert!(JournalError::Unavailable(Duration::from_secs(1)).is_retryable());
    }
}
