use crate::commitlog::sync_directory;
use std::convert::TryInto;
use std::fs::{self, File, OpenOptions};
use std::io::{Error, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

// Checkpoint file layout, integers little endian:
//
// [0, 4)            : magic "MJCK"
// [4, 5)            : format version
// [5, 13)           : checkpoint version
// [13, 21)          : payload length N
// [21, 21 + N)      : payload
// [21 + N, 25 + N)  : crc32 of every preceding byte
const MAGIC: &[u8; 4] = b"MJCK";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 21;
const TRAILER_LEN: usize = 4;

const CHECKPOINT_FILE_PREFIX: &str = "checkpoint-";
const TMP_SUFFIX: &str = ".tmp";
const LATEST_MARKER: &str = "LATEST";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub version: u64,
    pub payload: Vec<u8>,
}

/// CheckpointStore keeps the newest few checkpoints of one journal in a directory. A checkpoint
/// only becomes visible once it is completely on disk, so a crash mid-write leaves the previous
/// checkpoint in charge.
pub struct CheckpointStore {
    logger: slog::Logger,
    directory: PathBuf,
    retained: usize,
}

impl CheckpointStore {
    /// Opens (or creates) the store and discards leftovers of interrupted writes.
    pub fn open(
        logger: slog::Logger,
        directory: impl Into<PathBuf>,
        retained: usize,
    ) -> Result<Self, Error> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        for dir_entry in fs::read_dir(&directory)? {
            let path = dir_entry?.path();
            let is_tmp = path
                .file_name()
                .map(|name| name.to_string_lossy().ends_with(TMP_SUFFIX))
                .unwrap_or(false);
            if is_tmp {
                slog::info!(logger, "Removing partial checkpoint {:?}", path);
                fs::remove_file(&path)?;
            }
        }

        Ok(CheckpointStore {
            logger,
            directory,
            retained: retained.max(1),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Durably writes a checkpoint and makes it the latest one. Older checkpoints beyond the
    /// retention count are deleted afterwards.
    pub fn write(&self, version: u64, payload: &[u8]) -> Result<(), Error> {
        let final_path = self.directory.join(checkpoint_file_name(version));
        let tmp_path = tmp_path_for(&final_path);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&encode_checkpoint(version, payload))?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &final_path)?;
        sync_directory(&self.directory)?;

        self.write_marker(version)?;
        slog::info!(
            self.logger,
            "Wrote checkpoint {} ({} bytes)",
            version,
            payload.len()
        );

        self.prune(version)
    }

    /// The newest checkpoint that verifies, not newer than the LATEST marker. Falls back to older
    /// ones when the newest is damaged.
    pub fn load_latest(&self) -> Result<Option<Checkpoint>, Error> {
        let marker = self.read_marker();
        let mut versions = self.versions()?;
        versions.reverse();

        for version in versions {
            if let Some(marker) = marker {
                if version > marker {
                    continue;
                }
            }
            match self.read_verified(version)? {
                Some(payload) => return Ok(Some(Checkpoint { version, payload })),
                None => slog::warn!(
                    self.logger,
                    "Checkpoint {} failed verification. Trying an older one.",
                    version
                ),
            }
        }

        Ok(None)
    }

    /// Versions of every checkpoint file present, oldest first.
    pub fn versions(&self) -> Result<Vec<u64>, Error> {
        let mut versions = Vec::new();
        for dir_entry in fs::read_dir(&self.directory)? {
            let file_name = dir_entry?.file_name();
            if let Some(version) = parse_checkpoint_file_name(&file_name.to_string_lossy()) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn read_verified(&self, version: u64) -> Result<Option<Vec<u8>>, Error> {
        let path = self.directory.join(checkpoint_file_name(version));
        let mut bytes = Vec::new();
        match File::open(&path) {
            Ok(mut file) => file.read_to_end(&mut bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(decode_checkpoint(&bytes).and_then(|(decoded_version, payload)| {
            if decoded_version == version {
                Some(payload.to_vec())
            } else {
                None
            }
        }))
    }

    fn write_marker(&self, version: u64) -> Result<(), Error> {
        let marker_path = self.directory.join(LATEST_MARKER);
        let tmp_path = tmp_path_for(&marker_path);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(version.to_string().as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &marker_path)?;
        sync_directory(&self.directory)
    }

    fn read_marker(&self) -> Option<u64> {
        let contents = fs::read_to_string(self.directory.join(LATEST_MARKER)).ok()?;
        match contents.trim().parse() {
            Ok(version) => Some(version),
            Err(_) => {
                slog::warn!(self.logger, "Ignoring unreadable {} marker", LATEST_MARKER);
                None
            }
        }
    }

    fn prune(&self, newest: u64) -> Result<(), Error> {
        let older: Vec<u64> = self
            .versions()?
            .into_iter()
            .filter(|version| *version < newest)
            .collect();
        let num_to_delete = (older.len() + 1).saturating_sub(self.retained);

        for version in older.into_iter().take(num_to_delete) {
            let path = self.directory.join(checkpoint_file_name(version));
            slog::debug!(self.logger, "Deleting checkpoint {:?}", path);
            fs::remove_file(path)?;
        }
        sync_directory(&self.directory)
    }
}

fn checkpoint_file_name(version: u64) -> String {
    format!("{}{:020}", CHECKPOINT_FILE_PREFIX, version)
}

fn parse_checkpoint_file_name(file_name: &str) -> Option<u64> {
    if file_name.ends_with(TMP_SUFFIX) {
        return None;
    }
    file_name.strip_prefix(CHECKPOINT_FILE_PREFIX)?.parse().ok()
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    PathBuf::from(tmp)
}

fn encode_checkpoint(version: u64, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    bytes.extend_from_slice(MAGIC);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(payload);
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}

fn decode_checkpoint(bytes: &[u8]) -> Option<(u64, &[u8])> {
    if bytes.len() < HEADER_LEN + TRAILER_LEN
        || &bytes[0..4] != MAGIC
        || bytes[4] != FORMAT_VERSION
    {
        return None;
    }
    let version = u64::from_le_bytes(bytes[5..13].try_into().ok()?);
    let payload_len = u64::from_le_bytes(bytes[13..21].try_into().ok()?) as usize;
    if bytes.len() != HEADER_LEN + payload_len + TRAILER_LEN {
        return None;
    }

    let (body, trailer) = bytes.split_at(HEADER_LEN + payload_len);
    let crc = u32::from_le_bytes(trailer.try_into().ok()?);
    if crc32fast::hash(body) != crc {
        return None;
    }

    Some((version, &body[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn open(directory: &Path, retained: usize) -> CheckpointStore {
        CheckpointStore::open(logger(), directory, retained).unwrap()
    }

    #[test]
    fn empty_store_has_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(open(dir.path(), 2).load_latest().unwrap(), None);
    }

    #[test]
    fn latest_wins_and_old_ones_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 2);
        store.write(5, b"five").unwrap();
        store.write(9, b"nine").unwrap();
        store.write(12, b"twelve").unwrap();

        assert_eq!(store.versions().unwrap(), vec![9, 12]);
        assert_eq!(
            store.load_latest().unwrap(),
            Some(Checkpoint {
                version: 12,
                payload: b"twelve".to_vec()
            })
        );
    }

    #[test]
    fn damaged_newest_falls_back_to_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 2);
        store.write(3, b"three").unwrap();
        store.write(7, b"seven").unwrap();

        // Flip one payload byte of the newest checkpoint.
        let newest = dir.path().join(checkpoint_file_name(7));
        let mut bytes = fs::read(&newest).unwrap();
        bytes[HEADER_LEN] ^= 0xff;
        fs::write(&newest, bytes).unwrap();

        let loaded = open(dir.path(), 2).load_latest().unwrap().unwrap();
        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.payload, b"three".to_vec());
    }

    #[test]
    fn unpublished_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 3);
        store.write(4, b"four").unwrap();

        // Renamed into place, but the marker was never updated.
        fs::write(
            dir.path().join(checkpoint_file_name(8)),
            encode_checkpoint(8, b"eight"),
        )
        .unwrap();

        assert_eq!(open(dir.path(), 3).load_latest().unwrap().unwrap().version, 4);
    }

    #[test]
    fn partial_write_is_cleaned_up_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 2);
        store.write(1, b"one").unwrap();
        let tmp = tmp_path_for(&dir.path().join(checkpoint_file_name(2)));
        fs::write(&tmp, b"MJCK garbage").unwrap();

        let reopened = open(dir.path(), 2);
        assert!(!tmp.exists());
        assert_eq!(reopened.load_latest().unwrap().unwrap().version, 1);
    }

    #[test]
    fn missing_marker_uses_newest_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 2);
        store.write(2, b"two").unwrap();
        store.write(6, b"six").unwrap();
        fs::remove_file(dir.path().join(LATEST_MARKER)).unwrap();

        assert_eq!(open(dir.path(), 2).load_latest().unwrap().unwrap().version, 6);
    }
}
