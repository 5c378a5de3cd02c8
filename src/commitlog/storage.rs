use crate::commitlog::{Entry, Index, Log};
use std::convert::TryFrom;
use std::fs::{self, File, OpenOptions};
use std::io::{Error, ErrorKind};
use std::marker::PhantomData;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

// Based on https://thehoard.blog/how-kafkas-storage-internals-work-3a29b02e026
//
// Bytes:
// 0    : crc
// 1    : crc
// 2    : crc
// 3    : crc
// 4    : version
// 5    : attributes
// 6    : timestamp
// 7    : timestamp
// 8    : timestamp
// 9    : timestamp
// 10   : timestamp
// 11   : timestamp
// 12   : timestamp
// 13   : timestamp
// 14   : data size
// 15   : data size
// 16   : data size
// 17   : data size
// V0   : data
// V1   : data
// ...
// Vn   : data
//
// The crc covers everything from `version` through the last data byte. All integers are little
// endian. The timestamp is epoch millis at append time and is informational only.
const RECORD_HEADER_LEN: u64 = 18;
const RECORD_FORMAT_VERSION: u8 = 1;
const SEGMENT_FILE_PREFIX: &str = "segment-";
const SEGMENT_FILE_SUFFIX: &str = ".log";

/// Generic config for initializing any type of disk-based commit log, independent of data
/// model and algorithm.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub directory: PathBuf,
    /// A segment is sealed once it grows past this size. The next append starts a new segment.
    pub segment_size_bytes: u64,
}

/// SegmentedDiskLog is a durable `Log` split across segment files named after the index of their
/// first entry. Every append is fsync'd before returning. Prefix truncation deletes whole sealed
/// segments, so it is only as precise as the segment boundaries.
pub struct SegmentedDiskLog<E: Entry> {
    logger: slog::Logger,
    directory: PathBuf,
    segment_size_bytes: u64,
    // Oldest first. Contiguous with `active`.
    sealed: Vec<Segment>,
    active: Segment,
    _pd: PhantomData<E>,
}

struct Segment {
    first_index: u64,
    path: PathBuf,
    file: File,
    // Byte offset of each record, in index order.
    offsets: Vec<u64>,
    size: u64,
}

impl Segment {
    fn create(directory: &Path, first_index: u64) -> Result<Self, Error> {
        let path = directory.join(segment_file_name(first_index));
        let file = OpenOptions::new().read(true).write(true).create_new(true).open(&path)?;
        sync_directory(directory)?;

        Ok(Segment {
            first_index,
            path,
            file,
            offsets: Vec::new(),
            size: 0,
        })
    }

    fn next_index(&self) -> u64 {
        self.first_index + self.offsets.len() as u64
    }

    fn contains(&self, index: u64) -> bool {
        self.first_index <= index && index < self.next_index()
    }

    fn read_record(&self, index: u64) -> Result<Vec<u8>, Error> {
        let offset = self.offsets[(index - self.first_index) as usize];
        let (record, _) = read_record_at(&self.file, offset, self.size)?.ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!("Record {} in {:?} is damaged", index, self.path),
            )
        })?;

        Ok(record)
    }

    // Cuts off bytes past `size` that a failed append left behind.
    fn trim_to_size(&self) -> Result<(), Error> {
        if self.file.metadata()?.len() > self.size {
            self.file.set_len(self.size)?;
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn truncate_records(&mut self, keep: usize) -> Result<(), Error> {
        if keep >= self.offsets.len() {
            return Ok(());
        }
        let new_size = self.offsets[keep];
        self.file.set_len(new_size)?;
        self.file.sync_all()?;
        self.offsets.truncate(keep);
        self.size = new_size;

        Ok(())
    }
}

impl<E: Entry> SegmentedDiskLog<E> {
    /// Opens (or creates) the log in `config.directory`. A torn record at the tail of the newest
    /// segment is an append that was never acknowledged, so it is cut off. Damage anywhere else is
    /// reported as `InvalidData`.
    pub fn open(logger: slog::Logger, config: StorageConfig) -> Result<Self, Error> {
        fs::create_dir_all(&config.directory)?;

        let mut first_indexes = Vec::new();
        for dir_entry in fs::read_dir(&config.directory)? {
            let file_name = dir_entry?.file_name();
            if let Some(first_index) = parse_segment_file_name(&file_name.to_string_lossy()) {
                first_indexes.push(first_index);
            }
        }
        first_indexes.sort_unstable();

        let mut segments = Vec::with_capacity(first_indexes.len());
        let num_segments = first_indexes.len();
        for (position, first_index) in first_indexes.into_iter().enumerate() {
            let is_newest = position + 1 == num_segments;
            segments.push(Self::recover_segment(&logger, &config.directory, first_index, is_newest)?);
        }

        for pair in segments.windows(2) {
            if pair[0].next_index() != pair[1].first_index {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!(
                        "Segments {:?} and {:?} are not contiguous",
                        pair[0].path, pair[1].path
                    ),
                ));
            }
        }

        let active = match segments.pop() {
            Some(segment) => segment,
            None => Segment::create(&config.directory, Index::start_index().as_u64())?,
        };
        slog::info!(
            logger,
            "Opened log at {:?}: {} segment(s), next index {}",
            config.directory,
            segments.len() + 1,
            active.next_index()
        );

        Ok(SegmentedDiskLog {
            logger,
            directory: config.directory,
            segment_size_bytes: config.segment_size_bytes,
            sealed: segments,
            active,
            _pd: PhantomData::default(),
        })
    }

    fn recover_segment(
        logger: &slog::Logger,
        directory: &Path,
        first_index: u64,
        is_newest: bool,
    ) -> Result<Segment, Error> {
        let path = directory.join(segment_file_name(first_index));
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();

        let mut offsets = Vec::new();
        let mut position = 0;
        while position < file_len {
            match read_record_at(&file, position, file_len)? {
                Some((_, record_len)) => {
                    offsets.push(position);
                    position += record_len;
                }
                None if is_newest => {
                    slog::warn!(
                        logger,
                        "Discarding torn tail of {:?} at byte {} (file is {} bytes)",
                        path,
                        position,
                        file_len
                    );
                    file.set_len(position)?;
                    file.sync_all()?;
                    break;
                }
                None => {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("Sealed segment {:?} is damaged at byte {}", path, position),
                    ));
                }
            }
        }

        Ok(Segment {
            first_index,
            path,
            file,
            offsets,
            size: position,
        })
    }

    /// Seals the active segment and starts a new one at `next_index()`. No-op if the active
    /// segment is empty.
    pub fn roll_segment(&mut self) -> Result<(), Error> {
        if self.active.offsets.is_empty() {
            return Ok(());
        }

        // A sealed segment must end on a record boundary.
        self.active.trim_to_size()?;
        let new_active = Segment::create(&self.directory, self.active.next_index())?;
        let sealed = std::mem::replace(&mut self.active, new_active);
        slog::debug!(self.logger, "Sealed segment {:?}", sealed.path);
        self.sealed.push(sealed);

        Ok(())
    }

    /// Paths of every segment file, oldest first.
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.sealed
            .iter()
            .chain(std::iter::once(&self.active))
            .map(|segment| segment.path.clone())
            .collect()
    }

    fn segment_for(&self, index: u64) -> Option<&Segment> {
        if self.active.contains(index) {
            return Some(&self.active);
        }
        let position = self.sealed.partition_point(|segment| segment.next_index() <= index);
        self.sealed.get(position).filter(|segment| segment.contains(index))
    }

    fn delete_segment(&self, segment: Segment) -> Result<(), Error> {
        slog::debug!(self.logger, "Deleting segment {:?}", segment.path);
        let path = segment.path.clone();
        drop(segment);
        fs::remove_file(path)?;
        sync_directory(&self.directory)
    }
}

impl<E: Entry> Log<E> for SegmentedDiskLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, Error> {
        if self.active.size >= self.segment_size_bytes {
            self.roll_segment()?;
        }

        let data: Vec<u8> = entry.into();
        let record = encode_record(&data)?;
        let written = self
            .active
            .file
            .write_all_at(&record, self.active.size)
            .and_then(|_| self.active.file.sync_data());
        if let Err(e) = written {
            if let Err(trim_error) = self.active.trim_to_size() {
                slog::warn!(
                    self.logger,
                    "Failed to cut off failed append in {:?}: {:?}",
                    self.active.path,
                    trim_error
                );
            }
            return Err(e);
        }

        let appended_index = self.active.next_index();
        self.active.offsets.push(self.active.size);
        self.active.size += record.len() as u64;

        Ok(Index::new(appended_index))
    }

    fn read(&self, index: Index) -> Result<Option<E>, Error> {
        match self.segment_for(index.as_u64()) {
            Some(segment) => E::try_from(segment.read_record(index.as_u64())?).map(Some),
            None => Ok(None),
        }
    }

    fn truncate(&mut self, index: Index) -> Result<(), Error> {
        let index = index.as_u64();

        while index <= self.active.first_index {
            match self.sealed.pop() {
                Some(previous) => {
                    let removed = std::mem::replace(&mut self.active, previous);
                    self.delete_segment(removed)?;
                }
                None => break,
            }
        }

        let keep = index.saturating_sub(self.active.first_index) as usize;
        self.active.truncate_records(keep)
    }

    fn truncate_prefix(&mut self, index: Index) -> Result<(), Error> {
        let index = index.as_u64();
        let num_covered = self
            .sealed
            .iter()
            .take_while(|segment| segment.next_index() <= index)
            .count();

        for segment in self.sealed.drain(..num_covered).collect::<Vec<_>>() {
            self.delete_segment(segment)?;
        }

        Ok(())
    }

    fn reset(&mut self, next_index: Index) -> Result<(), Error> {
        for segment in std::mem::take(&mut self.sealed) {
            self.delete_segment(segment)?;
        }

        fs::remove_file(&self.active.path)?;
        self.active = Segment::create(&self.directory, next_index.as_u64())?;
        slog::info!(self.logger, "Reset log. Next index is {:?}", next_index);

        Ok(())
    }

    fn first_index(&self) -> Index {
        match self.sealed.first() {
            Some(segment) => Index::new(segment.first_index),
            None => Index::new(self.active.first_index),
        }
    }

    fn next_index(&self) -> Index {
        Index::new(self.active.next_index())
    }
}

fn segment_file_name(first_index: u64) -> String {
    format!("{}{:020}{}", SEGMENT_FILE_PREFIX, first_index, SEGMENT_FILE_SUFFIX)
}

fn parse_segment_file_name(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(SEGMENT_FILE_PREFIX)?
        .strip_suffix(SEGMENT_FILE_SUFFIX)?
        .parse()
        .ok()
        .filter(|first_index| *first_index > 0)
}

fn encode_record(data: &[u8]) -> Result<Vec<u8>, Error> {
    let data_len = u32::try_from(data.len())
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "Log entry larger than 4GiB"))?;

    let mut record = Vec::with_capacity(RECORD_HEADER_LEN as usize + data.len());
    record.extend_from_slice(&[0u8; 4]);
    record.push(RECORD_FORMAT_VERSION);
    record.push(0);
    record.extend_from_slice(&chrono::Utc::now().timestamp_millis().to_le_bytes());
    record.extend_from_slice(&data_len.to_le_bytes());
    record.extend_from_slice(data);

    let crc = crc32fast::hash(&record[4..]);
    record[0..4].copy_from_slice(&crc.to_le_bytes());

    Ok(record)
}

/// Returns the data and on-disk length of the record at `offset`, or None if the bytes there are
/// not a complete, checksum-valid record.
fn read_record_at(file: &File, offset: u64, file_len: u64) -> Result<Option<(Vec<u8>, u64)>, Error> {
    if offset + RECORD_HEADER_LEN > file_len {
        return Ok(None);
    }

    let mut header = [0u8; RECORD_HEADER_LEN as usize];
    file.read_exact_at(&mut header, offset)?;

    let mut size_bytes = [0u8; 4];
    size_bytes.copy_from_slice(&header[14..18]);
    let data_len = u32::from_le_bytes(size_bytes) as u64;
    let record_len = RECORD_HEADER_LEN + data_len;
    if offset + record_len > file_len || header[4] != RECORD_FORMAT_VERSION {
        return Ok(None);
    }

    let mut data = vec![0u8; data_len as usize];
    file.read_exact_at(&mut data, offset + RECORD_HEADER_LEN)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header[4..]);
    hasher.update(&data);
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&header[0..4]);
    if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
        return Ok(None);
    }

    Ok(Some((data, record_len)))
}

pub(crate) fn sync_directory(directory: &Path) -> Result<(), Error> {
    File::open(directory)?.sync_all()
}
