//! This mod is meant to hold most of the code for the library's client-facing API.
mod embedded;
mod error;
mod event_bus;
mod options;
mod quorum;
mod types;
mod ufs_journal;

pub use embedded::try_create_embedded_journal;
pub use embedded::EmbeddedJournalConfig;
pub use embedded::EmbeddedJournalSystem;
pub use error::JournalCreationError;
pub use event_bus::ElectionEvent;
pub use event_bus::Event;
pub use event_bus::EventListener;
pub use event_bus::FollowerEventData;
pub use options::JournalOptions;
pub use options::RaftOptions;
pub use quorum::MembershipChangeError;
pub use quorum::QuorumController;
pub use quorum::QuorumInfo;
pub use quorum::QuorumMember;
pub use quorum::RaftRole;
pub use types::RaftMemberInfo;
pub use ufs_journal::try_create_ufs_journal;
pub use ufs_journal::UfsJournalConfig;
pub use ufs_journal::UfsJournalSystem;

pub(crate) use options::JournalOptionsValidated;
