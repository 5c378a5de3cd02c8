use crate::catalog::CatalogError;
use crate::schema::{journal_entry, JournalEntry};
use std::fmt;

/// Domain is one independent metadata state machine. Each owns a disjoint subset of the journal
/// entry variants.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Domain {
    Block,
    FileSystem,
    Table,
    Meta,
    Job,
}

impl Domain {
    pub const ALL: &'static [Domain] = &[
        Domain::Block,
        Domain::FileSystem,
        Domain::Table,
        Domain::Meta,
        Domain::Job,
    ];

    /// Stable name, used for on-disk directories and checkpoint images.
    pub fn name(&self) -> &'static str {
        match self {
            Domain::Block => "BlockMaster",
            Domain::FileSystem => "FileSystemMaster",
            Domain::Table => "TableMaster",
            Domain::Meta => "MetaMaster",
            Domain::Job => "JobMaster",
        }
    }

    pub fn from_name(name: &str) -> Option<Domain> {
        Self::ALL.iter().copied().find(|domain| domain.name() == name)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Every match below is exhaustive with no wildcard arm. Adding a variant to the `entry` oneof in
// journal.proto without listing it here fails to compile.
macro_rules! journal_variants {
    ($($domain:ident => [$($tag:ident),+ $(,)?]),+ $(,)?) => {
        /// VariantTag names one mutation variant of `JournalEntry::entry`, without its payload.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub enum VariantTag {
            $($($tag,)+)+
        }

        impl VariantTag {
            pub const ALL: &'static [VariantTag] = &[$($(VariantTag::$tag,)+)+];

            pub fn of(entry: &journal_entry::Entry) -> VariantTag {
                match entry {
                    $($(journal_entry::Entry::$tag(_) => VariantTag::$tag,)+)+
                }
            }

            pub fn domain(&self) -> Domain {
                match self {
                    $($(VariantTag::$tag => Domain::$domain,)+)+
                }
            }

            /// An entry of this variant with an all-default payload.
            pub fn default_entry(&self) -> JournalEntry {
                let entry = match self {
                    $($(VariantTag::$tag => journal_entry::Entry::$tag(Default::default()),)+)+
                };
                JournalEntry {
                    entry: Some(entry),
                    ..JournalEntry::default()
                }
            }
        }
    };
}

journal_variants! {
    Block => [
        BlockContainerIdGenerator,
        BlockInfo,
        DeleteBlock,
    ],
    FileSystem => [
        AddMountPoint,
        AddSyncPoint,
        ActiveSyncTxId,
        AsyncPersistRequest,
        CompleteFile,
        DeleteFile,
        DeleteMountPoint,
        InodeDirectory,
        InodeDirectoryIdGenerator,
        InodeFile,
        InodeLastModificationTime,
        NewBlock,
        PersistDirectory,
        RemoveSyncPoint,
        Rename,
        SetAcl,
        SetAttribute,
        UpdateInode,
        UpdateInodeDirectory,
        UpdateInodeFile,
        UpdateUfsMode,
    ],
    Meta => [
        ClusterInfo,
        PathProperties,
        RemovePathProperties,
    ],
    Table => [
        AddTable,
        AddTablePartitions,
        AttachDb,
        DetachDb,
        RemoveTable,
        UpdateDatabaseInfo,
        AddTransformJobInfo,
        RemoveTransformJobInfo,
        CompleteTransformTable,
    ],
    Job => [
        LoadJob,
    ],
}

/// Returns the variant carried by `entry`. A batch wrapper or a default entry carries none.
pub fn variant_of(entry: &JournalEntry) -> Result<VariantTag, CatalogError> {
    entry
        .entry
        .as_ref()
        .map(VariantTag::of)
        .ok_or(CatalogError::UnrecognizedEntry)
}

/// Returns the domain responsible for applying `entry`.
pub fn domain_for(entry: &JournalEntry) -> Result<Domain, CatalogError> {
    variant_of(entry).map(|variant| variant.domain())
}

pub fn all_variants() -> &'static [VariantTag] {
    VariantTag::ALL
}
