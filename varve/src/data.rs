//! Fixed-record data files: one bounded ring per shard.
//!
//! A data file holds a small header followed by a ring of fixed-size
//! records. The header's cursor is the byte offset of the next record slot;
//! it is the only word the writer and its readers synchronize on. A record
//! is written in full with plain stores, then the cursor is published with
//! a release store, so any reader that acquires the cursor sees complete
//! records below it. The ring never wraps: when a record no longer fits,
//! the shard is full and the writer rolls over to a new one.
//!
//! # File Format
//!
//! ```text
//! [ 0 -  7]  u64  cursor - ring offset where the next record is written
//! [   8   ]  u8   labels per entry (K) for every record in this file
//! [ 9 - 15]  reserved
//! [16 - ..]  ring of records
//! ```
//!
//! Each record is `16 + 4K` bytes:
//!
//! ```text
//! [ 0 -  7]  u64  timestamp
//! [ 8 - 15]  u64  value (opaque)
//! [16 - ..]  u32 x K label ids, unused slots are 0
//! ```
//!
//! The file size is rounded up to the page size, so the ring usually holds
//! a few more records than `max_entries` asked for. Integers are stored in
//! native byte order; the format is not portable across architectures.
//!
//! Timestamps `0` ("uninitialized slot") and `u64::MAX` ("sealed" sentinel)
//! are reserved.

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DataError, Result};
use crate::labels::LabelId;
use crate::mmap::{FileMap, page_align};

/// Size of the data file header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Fixed part of every record: timestamp and value.
pub const ENTRY_FIXED_SIZE: usize = 16;

/// Bytes taken by one label id inside a record.
pub const LABEL_ID_SIZE: usize = 4;

/// Largest number of label ids a record can carry. The count is stored in
/// one header byte.
pub const MAX_LABELS_PER_ENTRY: usize = 255;

/// Timestamp written by [`DataStore::seal`] to mark the end of a shard.
pub const SEAL_TIMESTAMP: u64 = u64::MAX;

/// Default number of entries per shard: a week of one-second samples.
pub const DEFAULT_MAX_ENTRIES: usize = 604_800;

/// Default number of label slots per record.
pub const DEFAULT_LABELS_PER_ENTRY: usize = 4;

/// Returns the record size in bytes for `lpe` label slots.
pub fn entry_size(lpe: usize) -> usize {
    ENTRY_FIXED_SIZE + lpe * LABEL_ID_SIZE
}

/// Options for creating a writable data store.
#[derive(Debug, Clone, Copy)]
pub struct DataStoreOptions {
    /// Unix mode for a newly created file.
    pub mode: u32,
    /// Number of label id slots in every record of this shard.
    pub labels_per_entry: usize,
    /// Requested ring capacity; the file size is rounded up to the page
    /// size, so the real capacity can be larger (see [`Self::capacity`]).
    pub max_entries: usize,
}

impl Default for DataStoreOptions {
    fn default() -> Self {
        Self {
            mode: 0o666,
            labels_per_entry: DEFAULT_LABELS_PER_ENTRY,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl DataStoreOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidOptions`] if the label count does not
    /// fit the header byte or the resulting file size would overflow an
    /// i32 (the on-disk cursor arithmetic assumes it).
    pub fn validate(&self) -> Result<()> {
        if self.labels_per_entry > MAX_LABELS_PER_ENTRY {
            return Err(DataError::InvalidOptions {
                reason: format!(
                    "labels per entry {} does not fit the header byte (max {MAX_LABELS_PER_ENTRY})",
                    self.labels_per_entry
                ),
            }
            .into());
        }
        let size = self
            .max_entries
            .checked_mul(entry_size(self.labels_per_entry))
            .and_then(|ring| ring.checked_add(HEADER_SIZE));
        match size {
            Some(size) if size <= i32::MAX as usize => Ok(()),
            _ => Err(DataError::InvalidOptions {
                reason: "max entries and labels per entry would overflow an i32 file size"
                    .to_string(),
            }
            .into()),
        }
    }

    /// Total file size in bytes, rounded up to the page size.
    pub fn file_size(&self) -> usize {
        page_align(HEADER_SIZE + entry_size(self.labels_per_entry) * self.max_entries)
    }

    /// Ring size in bytes: everything after the header.
    pub fn ring_size(&self) -> usize {
        self.file_size() - HEADER_SIZE
    }

    /// Real ring capacity in records after page rounding.
    pub fn capacity(&self) -> usize {
        self.ring_size() / entry_size(self.labels_per_entry)
    }
}

/// Header and first-record summary of a data file, obtained without
/// mapping it. Readers use this to discover shards cheaply.
#[derive(Debug, Clone, Copy)]
pub struct ShardMeta {
    /// Timestamp of the first record (0 when the shard is empty).
    pub first_time: u64,
    /// Value of the first record.
    pub first_value: u64,
    /// Number of populated records.
    pub entries: usize,
    /// Label slots per record in this file.
    pub labels_per_entry: usize,
}

/// One shard's record ring over a shared mapping.
///
/// A writable store belongs to exactly one writer; read-only stores can be
/// opened by any number of threads or processes while the writer appends.
#[derive(Debug)]
pub struct DataStore {
    path: PathBuf,
    map: FileMap,
    /// Label slots per record, fixed at creation.
    lpe: usize,
    /// Total ring capacity in records.
    capacity: usize,
}

impl DataStore {
    /// Opens the data file read-write, creating it if needed.
    ///
    /// Creation goes through a temp file in the same directory: the file is
    /// sized, its header initialized, and only then renamed into place, so
    /// other processes never observe a half-built shard. Losing the rename
    /// race to a concurrent writer is handled by opening whatever won.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidOptions`], [`DataError::OpenFailed`],
    /// [`DataError::MapFailed`], or [`DataError::Corrupted`] if an existing
    /// file is not a valid shard.
    pub fn open_rw<P: AsRef<Path>>(path: P, options: &DataStoreOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();

        loop {
            match FileMap::open_rw(&path) {
                Ok(map) => return Self::from_map(path, map),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(open_failed(&path, source)),
            }

            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let tmp = tempfile::Builder::new()
                .prefix(".varve-shard")
                .tempfile_in(dir)
                .map_err(|source| open_failed(&path, source))?;

            let init = |file: &File| -> std::io::Result<()> {
                file.set_len(options.file_size() as u64)?;
                // The cursor is already zero; only the label count needs
                // writing before the file becomes visible.
                file.write_all_at(&[options.labels_per_entry as u8], 8)?;
                file.set_permissions(std::fs::Permissions::from_mode(options.mode))
            };
            init(tmp.as_file()).map_err(|source| open_failed(&path, source))?;

            match tmp.persist_noclobber(&path) {
                Ok(file) => {
                    let map = FileMap::from_file(file)
                        .map_err(|source| map_failed(&path, source))?;
                    return Self::from_map(path, map);
                }
                // Someone else created the shard between our open and
                // rename; drop the temp file and open theirs.
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(open_failed(&path, e.error)),
            }
        }
    }

    /// Opens an existing data file read-only.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::OpenFailed`] or [`DataError::Corrupted`].
    pub fn open_ro<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map = FileMap::open_ro(&path).map_err(|source| open_failed(&path, source))?;
        Self::from_map(path, map)
    }

    fn from_map(path: PathBuf, map: FileMap) -> Result<Self> {
        if map.len() < HEADER_SIZE {
            return Err(DataError::Corrupted {
                path: path.display().to_string(),
                reason: format!("file of {} bytes is smaller than the header", map.len()),
            }
            .into());
        }

        let lpe = map.as_slice()[8] as usize;
        let store = Self {
            path,
            map,
            lpe,
            capacity: 0,
        };
        let entry = entry_size(lpe);
        let cursor = store.cursor().load(Ordering::Acquire);
        if cursor % entry as u64 != 0 {
            return Err(DataError::Corrupted {
                path: store.path.display().to_string(),
                reason: format!("cursor {cursor} is not aligned to the {entry}-byte record size"),
            }
            .into());
        }

        let capacity = store.ring_len() / entry;
        Ok(Self { capacity, ..store })
    }

    /// Reads the header and first record of a data file without mapping it.
    ///
    /// Works on live and on sealed-and-truncated files; for the latter the
    /// reported entry count reflects the truncated length, not the mapped
    /// ring the writer once had.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::OpenFailed`] if the file cannot be opened and
    /// [`DataError::Corrupted`] if it is too small to hold a header and one
    /// record prefix.
    pub fn peek_header<P: AsRef<Path>>(path: P) -> Result<ShardMeta> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|source| open_failed(path, source))?;
        let size = file
            .metadata()
            .map_err(|source| open_failed(path, source))?
            .len() as usize;

        let mut buf = [0u8; HEADER_SIZE + ENTRY_FIXED_SIZE];
        file.read_exact(&mut buf).map_err(|source| {
            if source.kind() == std::io::ErrorKind::UnexpectedEof {
                crate::error::VarveError::from(DataError::Corrupted {
                    path: path.display().to_string(),
                    reason: format!("file of {size} bytes is too small to peek"),
                })
            } else {
                open_failed(path, source)
            }
        })?;

        let cursor = get_u64(&buf, 0);
        let lpe = buf[8] as usize;
        let ring_len = (size - HEADER_SIZE) as u64;

        Ok(ShardMeta {
            first_time: get_u64(&buf, HEADER_SIZE),
            first_value: get_u64(&buf, HEADER_SIZE + 8),
            entries: (cursor.min(ring_len) / entry_size(lpe) as u64) as usize,
            labels_per_entry: lpe,
        })
    }

    /// Label slots per record in this shard.
    pub fn labels_per_entry(&self) -> usize {
        self.lpe
    }

    /// Total ring capacity in records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of populated records, as published by the cursor.
    pub fn entries(&self) -> usize {
        let cursor = self.cursor().load(Ordering::Acquire);
        (cursor.min(self.ring_len() as u64) as usize) / self.entry_size()
    }

    /// Returns whether one more record fits, and the current cursor.
    pub fn peek_append(&self) -> (bool, u64) {
        let cursor = self.cursor().load(Ordering::Acquire);
        let fits = cursor + (self.entry_size() as u64) < self.ring_len() as u64;
        (fits, cursor)
    }

    /// Appends one record and publishes the new cursor.
    ///
    /// Returns the new cursor, or `None` if the record does not fit (the
    /// shard is full; the caller rolls over). Label ids beyond this shard's
    /// slot count are silently dropped; missing ones stay 0.
    pub fn append(&mut self, time: u64, value: u64, labels: &[LabelId]) -> Option<u64> {
        let entry = self.entry_size();
        let cursor = self.cursor().load(Ordering::Relaxed) as usize;
        if cursor + entry >= self.ring_len() {
            return None;
        }

        let base = HEADER_SIZE + cursor;
        let lpe = self.lpe;
        let raw = self.map.as_mut_slice();
        put_u64(raw, base, time);
        put_u64(raw, base + 8, value);
        for (i, &id) in labels.iter().take(lpe).enumerate() {
            put_u32(raw, base + ENTRY_FIXED_SIZE + i * LABEL_ID_SIZE, id);
        }

        let new_cursor = (cursor + entry) as u64;
        self.cursor_mut().store(new_cursor, Ordering::Release);
        Some(new_cursor)
    }

    /// Byte offset within the ring of the record at `element`.
    ///
    /// A non-negative `element` counts from the start of the shard; a
    /// negative one counts back from the cursor (`-1` is the most recently
    /// appended record).
    ///
    /// # Panics
    ///
    /// Panics when `element` is outside the reachable range; an index this
    /// wrong is a caller bug, not an I/O condition.
    pub fn offset_of(&self, element: isize) -> usize {
        let capacity = self.capacity as isize;
        if (element > 0 && element >= capacity) || element < -capacity {
            panic!("invalid index {element}, only {capacity} elements are reachable");
        }

        let entry = self.entry_size() as isize;
        if element < 0 {
            let cursor = self.cursor().load(Ordering::Acquire) as isize;
            let offset = cursor + entry * element;
            if offset < 0 {
                panic!("index {element} reaches before the start of the ring");
            }
            offset as usize
        } else {
            (element * entry) as usize
        }
    }

    /// Timestamp of the record at the given ring offset.
    pub fn time_at(&self, offset: usize) -> u64 {
        get_u64(self.map.as_slice(), HEADER_SIZE + offset)
    }

    /// Value of the record at the given ring offset.
    pub fn value_at(&self, offset: usize) -> u64 {
        get_u64(self.map.as_slice(), HEADER_SIZE + offset + 8)
    }

    /// Appends the record's label ids to `out`, stopping at the first empty
    /// slot, and returns `out`.
    pub fn labels_at<'a>(&self, offset: usize, out: &'a mut Vec<LabelId>) -> &'a mut Vec<LabelId> {
        let raw = self.map.as_slice();
        for i in 0..self.lpe {
            let id = get_u32(raw, HEADER_SIZE + offset + ENTRY_FIXED_SIZE + i * LABEL_ID_SIZE);
            if id == 0 {
                break;
            }
            out.push(id);
        }
        out
    }

    /// Reads one record by element index: `(time, value, label ids)`.
    ///
    /// # Panics
    ///
    /// Panics like [`Self::offset_of`] when `element` is out of range.
    pub fn read_one(&self, element: isize) -> (u64, u64, Vec<LabelId>) {
        let offset = self.offset_of(element);
        let mut labels = Vec::with_capacity(self.lpe);
        self.labels_at(offset, &mut labels);
        (self.time_at(offset), self.value_at(offset), labels)
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::SyncFailed`] if msync fails.
    pub fn sync(&self) -> Result<()> {
        self.map.sync().map_err(|source| {
            DataError::SyncFailed {
                path: self.path.display().to_string(),
                source,
            }
            .into()
        })
    }

    /// Seals the shard: appends the `(u64::MAX, u64::MAX)` sentinel if it
    /// still fits, truncates the file to a tight page-aligned bound, syncs
    /// and unmaps.
    ///
    /// On a full shard the sentinel does not fit; the file already has its
    /// final size and is just synced and closed.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::SyncFailed`] if flushing or truncating fails.
    pub fn seal(mut self) -> Result<()> {
        match self.append(SEAL_TIMESTAMP, SEAL_TIMESTAMP, &[]) {
            Some(cursor) => {
                let path = self.path;
                self.map
                    .truncate_and_close(HEADER_SIZE + cursor as usize)
                    .map_err(|source| {
                        DataError::SyncFailed {
                            path: path.display().to_string(),
                            source,
                        }
                        .into()
                    })
            }
            None => self.close(),
        }
    }

    /// Syncs and unmaps.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::SyncFailed`] if msync fails.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    fn entry_size(&self) -> usize {
        entry_size(self.lpe)
    }

    fn ring_len(&self) -> usize {
        self.map.len() - HEADER_SIZE
    }

    /// The cursor word at the start of the header, for loads.
    fn cursor(&self) -> &AtomicU64 {
        // SAFETY: the mapping starts page-aligned and is at least
        // HEADER_SIZE bytes (checked in from_map), so its first eight bytes
        // form a properly aligned u64 that outlives the returned reference.
        unsafe { &*(self.map.as_slice().as_ptr() as *const AtomicU64) }
    }

    /// The cursor word through the writable mapping, for the publish store.
    fn cursor_mut(&mut self) -> &AtomicU64 {
        // SAFETY: as for cursor(), with the pointer derived from the
        // mutable slice so the store happens through write-valid memory.
        unsafe { &*(self.map.as_mut_slice().as_mut_ptr() as *const AtomicU64) }
    }
}

fn open_failed(path: &Path, source: std::io::Error) -> crate::error::VarveError {
    DataError::OpenFailed {
        path: path.display().to_string(),
        source,
    }
    .into()
}

fn map_failed(path: &Path, source: std::io::Error) -> crate::error::VarveError {
    DataError::MapFailed {
        path: path.display().to_string(),
        source,
    }
    .into()
}

fn get_u64(raw: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[offset..offset + 8]);
    u64::from_ne_bytes(bytes)
}

fn put_u64(raw: &mut [u8], offset: usize, value: u64) {
    raw[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
}

fn get_u32(raw: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&raw[offset..offset + 4]);
    u32::from_ne_bytes(bytes)
}

fn put_u32(raw: &mut [u8], offset: usize, value: u32) {
    raw[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_options() -> DataStoreOptions {
        DataStoreOptions {
            mode: 0o666,
            labels_per_entry: 4,
            max_entries: 32,
        }
    }

    #[test]
    fn options_arithmetic() {
        let options = small_options();

        assert_eq!(entry_size(options.labels_per_entry), 32);
        assert_eq!(options.file_size() % crate::mmap::page_size(), 0);
        assert!(options.file_size() >= HEADER_SIZE + 32 * 32);
        assert!(options.validate().is_ok());

        // At 4096-byte pages the rounded ring holds 127 records, not 32.
        if crate::mmap::page_size() == 4096 {
            assert_eq!(options.capacity(), 127);
        }
    }

    #[test]
    fn options_reject_oversized_label_count() {
        let options = DataStoreOptions {
            labels_per_entry: 256,
            ..small_options()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn fill_one_shard() {
        let dir = tempdir().unwrap();
        let options = small_options();
        let mut store = DataStore::open_rw(dir.path().join("test.data"), &options).unwrap();
        let capacity = store.capacity();

        for i in 0..capacity as u64 {
            let cursor = store.append(i + 1, i + 1024, &[]).unwrap();
            assert_eq!(cursor, (i + 1) * 32);

            // The record just appended is reachable as element -1.
            let (time, value, labels) = store.read_one(-1);
            assert_eq!(time, i + 1);
            assert_eq!(value, i + 1024);
            assert!(labels.is_empty());
            assert_eq!(store.entries(), (i + 1) as usize);
        }

        let (fits, _) = store.peek_append();
        assert!(!fits);
        assert!(store.append(1, 1, &[]).is_none());
    }

    #[test]
    fn read_back_in_both_directions() {
        let dir = tempdir().unwrap();
        let mut store = DataStore::open_rw(dir.path().join("test.data"), &small_options()).unwrap();
        let capacity = store.capacity() as i64;

        for i in 0..capacity as u64 {
            store.append(i + 1, i + 1024, &[]).unwrap();
        }

        for i in 0..capacity {
            let (time, value, _) = store.read_one(i as isize);
            assert_eq!(time, i as u64 + 1);
            assert_eq!(value, i as u64 + 1024);
        }
        for i in -capacity..0 {
            let (time, value, _) = store.read_one(i as isize);
            assert_eq!(time, (capacity + i) as u64 + 1);
            assert_eq!(value, (capacity + i) as u64 + 1024);
        }
    }

    #[test]
    fn time_and_value_accessors_are_distinct() {
        let dir = tempdir().unwrap();
        let mut store = DataStore::open_rw(dir.path().join("test.data"), &small_options()).unwrap();

        store.append(7, 99, &[]).unwrap();
        let offset = store.offset_of(0);
        assert_eq!(store.time_at(offset), 7);
        assert_eq!(store.value_at(offset), 99);
    }

    #[test]
    fn labels_are_truncated_and_zero_padded() {
        let dir = tempdir().unwrap();
        let mut store = DataStore::open_rw(dir.path().join("test.data"), &small_options()).unwrap();

        // Five ids into four slots: the fifth is dropped.
        store.append(1, 2, &[11, 12, 13, 14, 15]).unwrap();
        let (_, _, labels) = store.read_one(0);
        assert_eq!(labels, vec![11, 12, 13, 14]);

        // Two ids into four slots: the trailing zeros end the list.
        store.append(2, 3, &[21, 22]).unwrap();
        let (_, _, labels) = store.read_one(1);
        assert_eq!(labels, vec![21, 22]);
    }

    #[test]
    fn reopen_preserves_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let options = small_options();

        {
            let mut store = DataStore::open_rw(&path, &options).unwrap();
            for i in 1..=10u64 {
                store.append(i, i * 2, &[]).unwrap();
            }
            store.close().unwrap();
        }

        let store = DataStore::open_rw(&path, &options).unwrap();
        assert_eq!(store.entries(), 10);
        let (time, value, _) = store.read_one(9);
        assert_eq!((time, value), (10, 20));
    }

    #[test]
    fn readers_observe_appends_through_their_own_map() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let mut writer = DataStore::open_rw(&path, &small_options()).unwrap();
        let reader = DataStore::open_ro(&path).unwrap();

        assert_eq!(reader.entries(), 0);
        writer.append(5, 6, &[]).unwrap();
        assert_eq!(reader.entries(), 1);
        assert_eq!(reader.read_one(0), (5, 6, vec![]));
    }

    #[test]
    fn cursor_is_monotonic_under_concurrent_reads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let mut writer = DataStore::open_rw(&path, &small_options()).unwrap();
        let capacity = writer.capacity();
        let reader = DataStore::open_ro(&path).unwrap();

        let poller = std::thread::spawn(move || {
            let mut seen = 0;
            while seen < capacity {
                let now = reader.entries();
                assert!(now >= seen, "entries went backwards: {seen} -> {now}");
                seen = now;
                std::thread::yield_now();
            }
        });

        for i in 0..capacity as u64 {
            writer.append(i + 1, i, &[]).unwrap();
        }
        poller.join().unwrap();
    }

    #[test]
    fn seal_appends_sentinel_and_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let options = DataStoreOptions {
            max_entries: 1000,
            ..small_options()
        };
        assert!(options.file_size() > page_align(HEADER_SIZE + 2 * 32));

        {
            let mut store = DataStore::open_rw(&path, &options).unwrap();
            store.append(1, 2, &[]).unwrap();
            store.seal().unwrap();
        }

        // One record plus the sentinel, page aligned.
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            page_align(HEADER_SIZE + 2 * 32) as u64
        );

        let store = DataStore::open_ro(&path).unwrap();
        assert_eq!(store.entries(), 2);
        let (time, value, _) = store.read_one(1);
        assert_eq!((time, value), (SEAL_TIMESTAMP, SEAL_TIMESTAMP));
    }

    #[test]
    fn seal_of_a_full_shard_keeps_its_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let options = small_options();
        let before = options.file_size() as u64;

        {
            let mut store = DataStore::open_rw(&path, &options).unwrap();
            let capacity = store.capacity();
            for i in 0..capacity as u64 {
                store.append(i + 1, i, &[]).unwrap();
            }
            store.seal().unwrap();
        }

        assert_eq!(std::fs::metadata(&path).unwrap().len(), before);

        // No sentinel: the last record is still the last append.
        let store = DataStore::open_ro(&path).unwrap();
        let entries = store.entries();
        let (time, _, _) = store.read_one(entries as isize - 1);
        assert_eq!(time, entries as u64);
    }

    #[test]
    fn peek_header_reads_without_mapping() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let options = small_options();

        {
            let mut store = DataStore::open_rw(&path, &options).unwrap();
            store.append(42, 43, &[1]).unwrap();
            store.append(44, 45, &[]).unwrap();
            store.close().unwrap();
        }

        let meta = DataStore::peek_header(&path).unwrap();
        assert_eq!(meta.first_time, 42);
        assert_eq!(meta.first_value, 43);
        assert_eq!(meta.entries, 2);
        assert_eq!(meta.labels_per_entry, 4);
    }

    #[test]
    fn peek_header_of_a_fresh_shard_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let _store = DataStore::open_rw(&path, &small_options()).unwrap();

        // Cursor 0 and a zero first timestamp: no records yet.
        let meta = DataStore::peek_header(&path).unwrap();
        assert_eq!(meta.entries, 0);
        assert_eq!(meta.first_time, 0);
    }

    #[test]
    fn truncated_file_clamps_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let options = small_options();

        {
            let mut store = DataStore::open_rw(&path, &options).unwrap();
            for i in 0..100u64 {
                store.append(i + 1, i, &[]).unwrap();
            }
            store.close().unwrap();
        }

        // A lost tail page: the cursor claims 100 records, the file has
        // room for none. Readers must clamp, not fault.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(HEADER_SIZE as u64).unwrap();
        drop(file);

        let meta = DataStore::peek_header(&path);
        assert!(meta.is_err() || meta.unwrap().entries == 0);
    }

    #[test]
    fn open_rejects_files_smaller_than_the_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        std::fs::write(&path, b"tiny").unwrap();

        assert!(DataStore::open_ro(&path).is_err());
        assert!(DataStore::peek_header(&path).is_err());
    }

    #[test]
    #[should_panic(expected = "invalid index")]
    fn offset_of_panics_past_capacity() {
        let dir = tempdir().unwrap();
        let store = DataStore::open_rw(dir.path().join("test.data"), &small_options()).unwrap();
        store.offset_of(store.capacity() as isize);
    }

    #[test]
    #[should_panic(expected = "before the start")]
    fn offset_of_panics_before_the_first_record()
    {
        let dir = tempdir().unwrap();
        let mut store = DataStore::open_rw(dir.path().join("test.data"), &small_options()).unwrap();
        store.append(1, 2, &[]).unwrap();
        store.offset_of(-2);
    }
}
