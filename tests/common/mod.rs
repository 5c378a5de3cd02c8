#![allow(dead_code)]

use chrono::Utc;
use metajournal::schema::{journal_entry, DeleteFileEntry, InodeFileEntry, JournalEntry, SetAttributeEntry, TtlAction};
use metajournal::{ApplyError, Domain, Journaled, VariantTag};
use slog::Drain;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

/// A file in the namespace, as far as the tests care.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileInfo {
    pub id: i64,
    pub ttl: i64,
}

#[derive(Clone, Debug)]
struct FileRecord {
    info: FileInfo,
    ttl_action: i32,
    // TTL counts from here, in epoch millis.
    ttl_start_ms: i64,
}

/// NamespaceDomain keeps the file system domain's path table: which paths exist, and their TTL.
#[derive(Default)]
pub struct NamespaceDomain {
    files: Mutex<BTreeMap<String, FileRecord>>,
    restores: AtomicUsize,
}

impl NamespaceDomain {
    pub fn files(&self) -> BTreeMap<String, FileInfo> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, record)| (path.clone(), record.info.clone()))
            .collect()
    }

    pub fn file(&self, path: &str) -> Option<FileInfo> {
        self.files.lock().unwrap().get(path).map(|record| record.info.clone())
    }

    /// Files whose TTL ran out by `now_ms` and are to be deleted, as (path, id).
    pub fn expired(&self, now_ms: i64) -> Vec<(String, i64)> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, record)| {
                record.info.ttl > 0
                    && record.ttl_action == TtlAction::Delete as i32
                    && record.ttl_start_ms + record.info.ttl <= now_ms
            })
            .map(|(path, record)| (path.clone(), record.info.id))
            .collect()
    }

    /// How many times the table was rebuilt from a checkpoint image.
    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

impl Journaled for NamespaceDomain {
    fn domain(&self) -> Domain {
        Domain::FileSystem
    }

    fn process_journal_entry(&self, entry: &JournalEntry) -> Result<(), ApplyError> {
        let mut files = self.files.lock().unwrap();
        match entry.entry.as_ref() {
            Some(journal_entry::Entry::InodeFile(inode)) => {
                if files.contains_key(&inode.path) {
                    return Err(ApplyError::Rejected(format!("{} already exists", inode.path)));
                }
                files.insert(
                    inode.path.clone(),
                    FileRecord {
                        info: FileInfo {
                            id: inode.id,
                            ttl: inode.ttl,
                        },
                        ttl_action: inode.ttl_action,
                        ttl_start_ms: inode.creation_time_ms,
                    },
                );
            }
            Some(journal_entry::Entry::DeleteFile(delete)) => {
                files.remove(&delete.path);
            }
            Some(journal_entry::Entry::SetAttribute(attribute)) => {
                if attribute.has_ttl {
                    if let Some(record) = files.get_mut(&attribute.path) {
                        record.info.ttl = attribute.ttl;
                        record.ttl_action = attribute.ttl_action;
                        record.ttl_start_ms = attribute.op_time_ms;
                    }
                }
            }
            // Everything else in the domain is accepted and ignored.
            _ => {}
        }
        Ok(())
    }

    fn checkpoint_entries(&self) -> Vec<JournalEntry> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, record)| {
                file_entry(InodeFileEntry {
                    id: record.info.id,
                    path: path.clone(),
                    ttl: record.info.ttl,
                    ttl_action: record.ttl_action,
                    creation_time_ms: record.ttl_start_ms,
                    ..InodeFileEntry::default()
                })
            })
            .collect()
    }

    fn reset_state(&self) {
        self.restores.fetch_add(1, Ordering::SeqCst);
        self.files.lock().unwrap().clear();
    }
}

/// RecordingDomain remembers every entry applied to it.
pub struct RecordingDomain {
    domain: Domain,
    applied: Mutex<Vec<JournalEntry>>,
}

impl RecordingDomain {
    pub fn new(domain: Domain) -> Self {
        RecordingDomain {
            domain,
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn applied(&self) -> Vec<JournalEntry> {
        self.applied.lock().unwrap().clone()
    }
}

impl Journaled for RecordingDomain {
    fn domain(&self) -> Domain {
        self.domain
    }

    fn process_journal_entry(&self, entry: &JournalEntry) -> Result<(), ApplyError> {
        self.applied.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn checkpoint_entries(&self) -> Vec<JournalEntry> {
        self.applied()
    }

    fn reset_state(&self) {
        self.applied.lock().unwrap().clear();
    }
}

/// One replica's (or one process's) domains.
pub struct Domains {
    pub namespace: Arc<NamespaceDomain>,
    pub block: Arc<RecordingDomain>,
    pub table: Arc<RecordingDomain>,
    pub meta: Arc<RecordingDomain>,
    pub job: Arc<RecordingDomain>,
}

impl Domains {
    pub fn new() -> Self {
        Domains {
            namespace: Arc::new(NamespaceDomain::default()),
            block: Arc::new(RecordingDomain::new(Domain::Block)),
            table: Arc::new(RecordingDomain::new(Domain::Table)),
            meta: Arc::new(RecordingDomain::new(Domain::Meta)),
            job: Arc::new(RecordingDomain::new(Domain::Job)),
        }
    }

    pub fn journaled(&self) -> Vec<Arc<dyn Journaled>> {
        vec![
            self.namespace.clone(),
            self.block.clone(),
            self.table.clone(),
            self.meta.clone(),
            self.job.clone(),
        ]
    }
}

pub fn create_file(path: &str, id: i64, ttl: i64) -> JournalEntry {
    file_entry(InodeFileEntry {
        id,
        path: path.to_string(),
        ttl,
        ..InodeFileEntry::default()
    })
}

fn file_entry(inode: InodeFileEntry) -> JournalEntry {
    JournalEntry {
        entry: Some(journal_entry::Entry::InodeFile(inode)),
        ..JournalEntry::default()
    }
}

pub fn delete_file(path: &str, id: i64) -> JournalEntry {
    JournalEntry {
        entry: Some(journal_entry::Entry::DeleteFile(DeleteFileEntry {
            id,
            path: path.to_string(),
            ..DeleteFileEntry::default()
        })),
        ..JournalEntry::default()
    }
}

pub fn set_ttl(path: &str, ttl: i64) -> JournalEntry {
    JournalEntry {
        entry: Some(journal_entry::Entry::SetAttribute(SetAttributeEntry {
            path: path.to_string(),
            has_ttl: true,
            ttl,
            ..SetAttributeEntry::default()
        })),
        ..JournalEntry::default()
    }
}

/// A TTL of `ttl_ms` starting at `op_time_ms`, after which the file is deleted.
pub fn set_ttl_delete(path: &str, ttl_ms: i64, op_time_ms: i64) -> JournalEntry {
    JournalEntry {
        entry: Some(journal_entry::Entry::SetAttribute(SetAttributeEntry {
            path: path.to_string(),
            op_time_ms,
            has_ttl: true,
            ttl: ttl_ms,
            ttl_action: TtlAction::Delete as i32,
            ..SetAttributeEntry::default()
        })),
        ..JournalEntry::default()
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn block_entry() -> JournalEntry {
    VariantTag::BlockInfo.default_entry()
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

pub fn create_root_logger_for_file(directory_prefix: String, replica_id: String) -> slog::Logger {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let log_path = format!("{}/{}_{}_info.log", directory_prefix, replica_id, now);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)
        .unwrap();

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

pub fn create_root_logger_for_stdout(replica_id: String) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("ReplicaId" => replica_id))
}
