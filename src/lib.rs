mod actor;
mod api;
mod catalog;
mod checkpoint;
mod codec;
mod commitlog;
mod journal;
mod replay;
mod replica;
mod server;
mod ufs;
mod grpc {
    include!("../generated/raft.rs");
}

/// Journal entry messages. Domains build and apply these.
pub mod schema {
    include!("../generated/journal.rs");
}

pub use api::try_create_embedded_journal;
pub use api::try_create_ufs_journal;
pub use api::ElectionEvent;
pub use api::EmbeddedJournalConfig;
pub use api::EmbeddedJournalSystem;
pub use api::Event;
pub use api::EventListener;
pub use api::FollowerEventData;
pub use api::JournalCreationError;
pub use api::JournalOptions;
pub use api::MembershipChangeError;
pub use api::QuorumController;
pub use api::QuorumInfo;
pub use api::QuorumMember;
pub use api::RaftMemberInfo;
pub use api::RaftOptions;
pub use api::RaftRole;
pub use api::UfsJournalConfig;
pub use api::UfsJournalSystem;
pub use catalog::all_variants;
pub use catalog::domain_for;
pub use catalog::variant_of;
pub use catalog::CatalogError;
pub use catalog::Domain;
pub use catalog::VariantTag;
pub use checkpoint::CheckpointError;
pub use journal::ApplyError;
pub use journal::BatchReceipt;
pub use journal::JournalContext;
pub use journal::JournalError;
pub use journal::Journaled;
pub use journal::LeaderInfo;
pub use journal::OperationId;
pub use journal::SequenceNumber;
pub use replay::ReplayError;
pub use server::LocalNetwork;

// `crate::{root_mod}` should not have any code. Just `mod` and `pub use` statements. The
// generated `schema` is the one public mod: domains need all of its messages.
