/// A globally unique token identifying one logical operation. Retried writes reuse it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperationIdProto {
    #[prost(uint64, tag = "1")]
    pub most_significant_bits: u64,
    #[prost(uint64, tag = "2")]
    pub least_significant_bits: u64,
}
/// A JournalEntry carries exactly one mutation in `entry`. A batch is a JournalEntry with no `entry`
/// set, an `operation_id`, and its mutations in `journal_entries`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JournalEntry {
    #[prost(int64, tag = "1")]
    pub sequence_number: i64,
    #[prost(message, optional, tag = "2")]
    pub operation_id: ::core::option::Option<OperationIdProto>,
    #[prost(message, repeated, tag = "3")]
    pub journal_entries: ::prost::alloc::vec::Vec<JournalEntry>,
    #[prost(
        oneof = "journal_entry::Entry",
        tags = "10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46"
    )]
    pub entry: ::core::option::Option<journal_entry::Entry>,
}
/// Nested message and enum types in `JournalEntry`.
pub mod journal_entry {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Entry {
        /// Block domain
        #[prost(message, tag = "10")]
        BlockContainerIdGenerator(super::BlockContainerIdGeneratorEntry),
        #[prost(message, tag = "11")]
        BlockInfo(super::BlockInfoEntry),
        #[prost(message, tag = "12")]
        DeleteBlock(super::DeleteBlockEntry),
        /// File system domain
        #[prost(message, tag = "13")]
        AddMountPoint(super::AddMountPointEntry),
        #[prost(message, tag = "14")]
        AddSyncPoint(super::AddSyncPointEntry),
        #[prost(message, tag = "15")]
        ActiveSyncTxId(super::ActiveSyncTxIdEntry),
        #[prost(message, tag = "16")]
        AsyncPersistRequest(super::AsyncPersistRequestEntry),
        #[prost(message, tag = "17")]
        CompleteFile(super::CompleteFileEntry),
        #[prost(message, tag = "18")]
        DeleteFile(super::DeleteFileEntry),
        #[prost(message, tag = "19")]
        DeleteMountPoint(super::DeleteMountPointEntry),
        #[prost(message, tag = "20")]
        InodeDirectory(super::InodeDirectoryEntry),
        #[prost(message, tag = "21")]
        InodeDirectoryIdGenerator(super::InodeDirectoryIdGeneratorEntry),
        #[prost(message, tag = "22")]
        InodeFile(super::InodeFileEntry),
        #[prost(message, tag = "23")]
        InodeLastModificationTime(super::InodeLastModificationTimeEntry),
        #[prost(message, tag = "24")]
        NewBlock(super::NewBlockEntry),
        #[prost(message, tag = "25")]
        PersistDirectory(super::PersistDirectoryEntry),
        #[prost(message, tag = "26")]
        RemoveSyncPoint(super::RemoveSyncPointEntry),
        #[prost(message, tag = "27")]
        Rename(super::RenameEntry),
        #[prost(message, tag = "28")]
        SetAcl(super::SetAclEntry),
        #[prost(message, tag = "29")]
        SetAttribute(super::SetAttributeEntry),
        #[prost(message, tag = "30")]
        UpdateInode(super::UpdateInodeEntry),
        #[prost(message, tag = "31")]
        UpdateInodeDirectory(super::UpdateInodeDirectoryEntry),
        #[prost(message, tag = "32")]
        UpdateInodeFile(super::UpdateInodeFileEntry),
        #[prost(message, tag = "33")]
        UpdateUfsMode(super::UpdateUfsModeEntry),
        /// Meta domain
        #[prost(message, tag = "34")]
        ClusterInfo(super::ClusterInfoEntry),
        #[prost(message, tag = "35")]
        PathProperties(super::PathPropertiesEntry),
        #[prost(message, tag = "36")]
        RemovePathProperties(super::RemovePathPropertiesEntry),
        /// Table domain
        #[prost(message, tag = "37")]
        AddTable(super::AddTableEntry),
        #[prost(message, tag = "38")]
        AddTablePartitions(super::AddTablePartitionsEntry),
        #[prost(message, tag = "39")]
        AttachDb(super::AttachDbEntry),
        #[prost(message, tag = "40")]
        DetachDb(super::DetachDbEntry),
        #[prost(message, tag = "41")]
        RemoveTable(super::RemoveTableEntry),
        #[prost(message, tag = "42")]
        UpdateDatabaseInfo(super::UpdateDatabaseInfoEntry),
        #[prost(message, tag = "43")]
        AddTransformJobInfo(super::AddTransformJobInfoEntry),
        #[prost(message, tag = "44")]
        RemoveTransformJobInfo(super::RemoveTransformJobInfoEntry),
        #[prost(message, tag = "45")]
        CompleteTransformTable(super::CompleteTransformTableEntry),
        /// Job domain
        #[prost(message, tag = "46")]
        LoadJob(super::LoadJobEntry),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockContainerIdGeneratorEntry {
    #[prost(int64, tag = "1")]
    pub next_container_id: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockInfoEntry {
    #[prost(int64, tag = "1")]
    pub block_id: i64,
    #[prost(int64, tag = "2")]
    pub length: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteBlockEntry {
    #[prost(int64, tag = "1")]
    pub block_id: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddMountPointEntry {
    #[prost(string, tag = "1")]
    pub mount_path: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub ufs_path: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub mount_id: i64,
    #[prost(bool, tag = "4")]
    pub read_only: bool,
    #[prost(bool, tag = "5")]
    pub shared: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddSyncPointEntry {
    #[prost(string, tag = "1")]
    pub sync_point_path: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub mount_id: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActiveSyncTxIdEntry {
    #[prost(int64, tag = "1")]
    pub mount_id: i64,
    #[prost(int64, tag = "2")]
    pub tx_id: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AsyncPersistRequestEntry {
    #[prost(int64, tag = "1")]
    pub file_id: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompleteFileEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub path: ::prost::alloc::string::String,
    #[prost(int64, repeated, tag = "3")]
    pub block_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, tag = "4")]
    pub length: i64,
    #[prost(int64, tag = "5")]
    pub op_time_ms: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteFileEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub path: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub recursive: bool,
    #[prost(int64, tag = "4")]
    pub op_time_ms: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteMountPointEntry {
    #[prost(string, tag = "1")]
    pub mount_path: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InodeDirectoryEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(int64, tag = "2")]
    pub parent_id: i64,
    #[prost(string, tag = "3")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub path: ::prost::alloc::string::String,
    #[prost(int64, tag = "5")]
    pub creation_time_ms: i64,
    #[prost(int64, tag = "6")]
    pub ttl: i64,
    #[prost(enumeration = "TtlAction", tag = "7")]
    pub ttl_action: i32,
    #[prost(string, tag = "8")]
    pub owner: ::prost::alloc::string::String,
    #[prost(string, tag = "9")]
    pub group: ::prost::alloc::string::String,
    #[prost(int32, tag = "10")]
    pub mode: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InodeDirectoryIdGeneratorEntry {
    #[prost(int64, tag = "1")]
    pub container_id: i64,
    #[prost(int64, tag = "2")]
    pub sequence_number: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InodeFileEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(int64, tag = "2")]
    pub parent_id: i64,
    #[prost(string, tag = "3")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub path: ::prost::alloc::string::String,
    #[prost(int64, tag = "5")]
    pub creation_time_ms: i64,
    #[prost(int64, tag = "6")]
    pub ttl: i64,
    #[prost(enumeration = "TtlAction", tag = "7")]
    pub ttl_action: i32,
    #[prost(int64, tag = "8")]
    pub block_size_bytes: i64,
    #[prost(string, tag = "9")]
    pub owner: ::prost::alloc::string::String,
    #[prost(string, tag = "10")]
    pub group: ::prost::alloc::string::String,
    #[prost(int32, tag = "11")]
    pub mode: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InodeLastModificationTimeEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(int64, tag = "2")]
    pub last_modification_time_ms: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewBlockEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(int64, tag = "2")]
    pub block_id: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PersistDirectoryEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveSyncPointEntry {
    #[prost(string, tag = "1")]
    pub sync_point_path: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub mount_id: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenameEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub path: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub new_path: ::prost::alloc::string::String,
    #[prost(int64, tag = "4")]
    pub op_time_ms: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetAclEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub path: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub entries: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(int64, tag = "4")]
    pub op_time_ms: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetAttributeEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub path: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub op_time_ms: i64,
    #[prost(bool, tag = "4")]
    pub pinned: bool,
    /// `ttl` and `ttl_action` only apply when `has_ttl` is set.
    #[prost(bool, tag = "5")]
    pub has_ttl: bool,
    #[prost(int64, tag = "6")]
    pub ttl: i64,
    #[prost(enumeration = "TtlAction", tag = "7")]
    pub ttl_action: i32,
    #[prost(string, tag = "8")]
    pub owner: ::prost::alloc::string::String,
    #[prost(string, tag = "9")]
    pub group: ::prost::alloc::string::String,
    #[prost(int32, tag = "10")]
    pub permission: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateInodeEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(int64, tag = "2")]
    pub last_modification_time_ms: i64,
    #[prost(string, tag = "3")]
    pub owner: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub group: ::prost::alloc::string::String,
    #[prost(int32, tag = "5")]
    pub mode: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateInodeDirectoryEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(bool, tag = "2")]
    pub direct_children_loaded: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateInodeFileEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(int64, tag = "2")]
    pub length: i64,
    #[prost(bool, tag = "3")]
    pub completed: bool,
    #[prost(int64, repeated, tag = "4")]
    pub block_ids: ::prost::alloc::vec::Vec<i64>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateUfsModeEntry {
    #[prost(string, tag = "1")]
    pub ufs_path: ::prost::alloc::string::String,
    #[prost(enumeration = "UfsMode", tag = "2")]
    pub ufs_mode: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusterInfoEntry {
    #[prost(string, tag = "1")]
    pub cluster_id: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PathPropertiesEntry {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "2")]
    pub properties:
        ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemovePathPropertiesEntry {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddTableEntry {
    #[prost(string, tag = "1")]
    pub db_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub table_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub owner: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "4")]
    pub schema: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddTablePartitionsEntry {
    #[prost(string, tag = "1")]
    pub db_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub table_name: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub version: i64,
    #[prost(string, repeated, tag = "4")]
    pub partition_specs: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttachDbEntry {
    #[prost(string, tag = "1")]
    pub udb_type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub udb_connection_uri: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub udb_db_name: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub db_name: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DetachDbEntry {
    #[prost(string, tag = "1")]
    pub db_name: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveTableEntry {
    #[prost(string, tag = "1")]
    pub db_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub table_name: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateDatabaseInfoEntry {
    #[prost(string, tag = "1")]
    pub db_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub location: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub comment: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddTransformJobInfoEntry {
    #[prost(string, tag = "1")]
    pub db_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub table_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub definition: ::prost::alloc::string::String,
    #[prost(int64, tag = "4")]
    pub job_id: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveTransformJobInfoEntry {
    #[prost(string, tag = "1")]
    pub db_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub table_name: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompleteTransformTableEntry {
    #[prost(string, tag = "1")]
    pub db_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub table_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub definition: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadJobEntry {
    #[prost(string, tag = "1")]
    pub load_path: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub job_id: i64,
    #[prost(enumeration = "PJobState", tag = "3")]
    pub job_state: i32,
    #[prost(int64, tag = "4")]
    pub end_time_ms: i64,
}
/// The state of one domain at a checkpoint, expressed as the entries that rebuild it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DomainCheckpoint {
    #[prost(string, tag = "1")]
    pub domain: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub entries: ::prost::alloc::vec::Vec<JournalEntry>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckpointImage {
    /// Last sequence number applied before the image was captured.
    #[prost(int64, tag = "1")]
    pub sequence_number: i64,
    #[prost(message, repeated, tag = "2")]
    pub domains: ::prost::alloc::vec::Vec<DomainCheckpoint>,
    /// Recently applied operations, oldest first.
    #[prost(message, repeated, tag = "3")]
    pub applied_operation_ids: ::prost::alloc::vec::Vec<OperationIdProto>,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TtlAction {
    Free = 0,
    Delete = 1,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum UfsMode {
    NoAccess = 0,
    ReadOnly = 1,
    ReadWrite = 2,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PJobState {
    Created = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
    Stopped = 4,
}
