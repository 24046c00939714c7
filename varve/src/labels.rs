//! Interned label strings for one shard.
//!
//! Every shard owns a label file mapping strings to stable non-zero 32-bit
//! ids and back. An id is the byte offset of the string's record plus one,
//! so id `0` can mean "no label" inside data records.
//!
//! # File Format
//!
//! ```text
//! offset 0:   [u32 len][len bytes][zero pad to 8]   first record, id 1
//! offset k:   [u32 len][len bytes][zero pad to 8]   next record, id k+1
//! ...
//!             [u32 0]                               terminator, rest is zero
//! ```
//!
//! The file is grown in fixed blocks, so the tail past the last record is
//! always zero bytes: the first zero length field is the terminator. A
//! length field is published with a release store only after the string
//! bytes before it are in place, and readers load it with acquire, so a
//! reader that observes a non-zero length observes the full string.
//!
//! The empty string cannot be interned: a zero length *is* the terminator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{LabelError, Result};
use crate::mmap::FileMap;

/// Identifier of one interned label within one shard's label file.
///
/// `0` is reserved and means "absent"; valid ids start at 1 and equal the
/// record's byte offset plus one. Ids are only meaningful within the label
/// file that produced them: the same string in two shards can have two
/// different ids.
pub type LabelId = u32;

/// Alignment of label records within the file.
pub const LABEL_ALIGN: usize = 8;

/// Default growth block for label files: 4 MiB.
pub const DEFAULT_LABEL_BLOCK: usize = 4 * 1024 * 1024;

/// Smallest accepted growth block. A block needs to hold at least one short
/// label record (4 bytes of length plus the string itself).
pub const MIN_LABEL_BLOCK: usize = 128;

/// Options for opening a writable label store.
#[derive(Debug, Clone, Copy)]
pub struct LabelOptions {
    /// Unix mode for a newly created file.
    pub mode: u32,
    /// Growth increment in bytes; the file size is always rounded up to the
    /// page size on top of this.
    pub block: usize,
}

impl Default for LabelOptions {
    fn default() -> Self {
        Self {
            mode: 0o666,
            block: DEFAULT_LABEL_BLOCK,
        }
    }
}

impl LabelOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::InvalidOptions`] if the block size is out of
    /// range.
    pub fn validate(&self) -> Result<()> {
        if self.block < MIN_LABEL_BLOCK {
            return Err(LabelError::InvalidOptions {
                reason: format!("block size {} is too small, needs >= {MIN_LABEL_BLOCK}", self.block),
            }
            .into());
        }
        if self.block >= i32::MAX as usize {
            return Err(LabelError::InvalidOptions {
                reason: format!("block size {} would overflow an i32", self.block),
            }
            .into());
        }
        Ok(())
    }
}

/// Interned-string store backed by a growable shared mapping.
///
/// Single writer, any number of readers, possibly in other processes. The
/// writer keeps a name-to-id cache and the next write offset; both are
/// rebuilt from the file on first use, so reopening after a crash resumes
/// appending right at the terminator.
#[derive(Debug)]
pub struct LabelStore {
    path: PathBuf,
    map: FileMap,
    /// Writer-side name-to-id cache, built lazily by scanning the file.
    cache: Option<HashMap<String, LabelId>>,
    /// Next write offset; meaningful once the cache is built.
    offset: usize,
    /// Growth increment from the open options (0 for read-only stores).
    block: usize,
}

impl LabelStore {
    /// Opens or creates a writable label store.
    ///
    /// A created file is pre-sized to one block, rounded up to the page
    /// size, and is all zeros: an empty store whose first record lands at
    /// offset 0.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::InvalidOptions`] for bad options and
    /// [`LabelError::OpenFailed`] if the file cannot be opened, created, or
    /// mapped.
    pub fn open_rw<P: AsRef<Path>>(path: P, options: LabelOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();

        let map = match FileMap::open_rw(&path) {
            Ok(map) => map,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                FileMap::create_rw(&path, options.block, options.mode).map_err(|source| {
                    LabelError::OpenFailed {
                        path: path.display().to_string(),
                        source,
                    }
                })?
            }
            Err(source) => {
                return Err(LabelError::OpenFailed {
                    path: path.display().to_string(),
                    source,
                }
                .into());
            }
        };

        Ok(Self {
            path,
            map,
            cache: None,
            offset: 0,
            block: options.block,
        })
    }

    /// Opens an existing label store read-only.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::OpenFailed`] if the file cannot be opened or
    /// mapped.
    pub fn open_ro<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map = FileMap::open_ro(&path).map_err(|source| LabelError::OpenFailed {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Self {
            path,
            map,
            cache: None,
            offset: 0,
            block: 0,
        })
    }

    /// Returns the id for `name`, interning it if it is new.
    ///
    /// The string bytes are written first, then the length field is
    /// published with a release store, so a concurrent reader either sees
    /// the terminator or the complete record.
    ///
    /// # Errors
    ///
    /// - [`LabelError::EmptyLabel`] for the empty string.
    /// - [`LabelError::GrowFailed`] if the file cannot be extended.
    /// - [`LabelError::IdSpaceExhausted`] if the new record's offset would
    ///   not fit a 32-bit id.
    /// - [`LabelError::Corrupted`] if the existing content cannot be
    ///   scanned.
    pub fn intern(&mut self, name: &str) -> Result<LabelId> {
        if name.is_empty() {
            return Err(LabelError::EmptyLabel.into());
        }
        if self.cache.is_none() {
            self.reload_cache()?;
        }

        if let Some(&id) = self.cache.as_ref().and_then(|c| c.get(name)) {
            return Ok(id);
        }

        if self.offset + 4 + name.len() >= self.map.len() {
            self.grow_for(name.len())?;
        }
        if self.offset >= LabelId::MAX as usize {
            return Err(LabelError::IdSpaceExhausted {
                path: self.path.display().to_string(),
            }
            .into());
        }

        let offset = self.offset;
        let raw = self.map.as_mut_slice();
        raw[offset + 4..offset + 4 + name.len()].copy_from_slice(name.as_bytes());
        // Publish the length only after the bytes are in place.
        // SAFETY: offset is record-aligned and in bounds (grown above), and
        // the pointer comes from the mutable slice so the release store
        // happens through write-valid memory.
        let len_field = unsafe { &*(raw.as_mut_ptr().add(offset) as *const AtomicU32) };
        len_field.store(name.len() as u32, Ordering::Release);

        self.offset = record_end(offset, name.len());
        let id = (offset + 1) as LabelId;
        self.cache
            .as_mut()
            .expect("cache was built above")
            .insert(name.to_string(), id);
        Ok(id)
    }

    /// Resolves an id back to its string.
    ///
    /// Returns the empty string for an id that points at the terminator
    /// (nothing has been stored there yet).
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Corrupted`] if the id is zero, misaligned,
    /// points outside the file, or describes a string that would extend
    /// past the end of the file or is not valid UTF-8.
    pub fn load(&self, id: LabelId) -> Result<String> {
        let Some(offset) = (id as usize).checked_sub(1) else {
            return Err(self.corrupted("label id 0 is reserved"));
        };
        if offset % LABEL_ALIGN != 0 {
            return Err(self.corrupted(format!("label id {id} is not record-aligned")));
        }
        if offset + 4 >= self.map.len() {
            return Err(self.corrupted(format!("label id {id} points outside the store")));
        }

        let len = self.len_field(offset).load(Ordering::Acquire) as usize;
        if len == 0 {
            return Ok(String::new());
        }
        if len >= i32::MAX as usize {
            return Err(self.corrupted(format!("label length {len} would overflow")));
        }
        if offset + 4 + len > self.map.len() {
            return Err(self.corrupted(format!("label at id {id} extends past the file")));
        }

        let bytes = &self.map.as_slice()[offset + 4..offset + 4 + len];
        String::from_utf8(bytes.to_vec())
            .map_err(|_| self.corrupted(format!("label at id {id} is not valid UTF-8")))
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::SyncFailed`] if msync fails.
    pub fn sync(&self) -> Result<()> {
        self.map.sync().map_err(|source| {
            LabelError::SyncFailed {
                path: self.path.display().to_string(),
                source,
            }
            .into()
        })
    }

    /// Seals the store: syncs, truncates the file to a tight page-aligned
    /// bound just past the terminator, and unmaps.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Corrupted`] if the populated region cannot be
    /// scanned, or [`LabelError::SyncFailed`] if flushing or truncating
    /// fails.
    pub fn seal(mut self) -> Result<()> {
        if self.cache.is_none() {
            self.reload_cache()?;
        }
        // Keep four zero bytes past the last record so a scan still finds
        // the terminator inside the file.
        let bound = self.offset + 4;
        let path = self.path;
        self.map.truncate_and_close(bound).map_err(|source| {
            LabelError::SyncFailed {
                path: path.display().to_string(),
                source,
            }
            .into()
        })
    }

    /// Syncs and unmaps without truncating.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::SyncFailed`] if msync fails.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    /// Rebuilds the name-to-id cache and write offset by scanning records
    /// from the start of the file up to the terminator.
    fn reload_cache(&mut self) -> Result<()> {
        let mut cache = HashMap::new();
        let mut offset = self.offset;

        while offset + 4 <= self.map.len() {
            let name = self.load((offset + 1) as LabelId)?;
            if name.is_empty() {
                break;
            }
            let end = record_end(offset, name.len());
            cache.insert(name, (offset + 1) as LabelId);
            offset = end;
        }

        self.offset = offset;
        self.cache = Some(cache);
        Ok(())
    }

    /// Extends the file by whole blocks so a record of `name_len` bytes fits.
    fn grow_for(&mut self, name_len: usize) -> Result<()> {
        let blocks = (name_len + 4).div_ceil(self.block);
        let new_len = self.map.len() + blocks * self.block;
        self.map.grow(new_len).map_err(|source| {
            LabelError::GrowFailed {
                path: self.path.display().to_string(),
                source,
            }
            .into()
        })
    }

    /// Returns the length field at `offset` as an atomic, for loads.
    fn len_field(&self, offset: usize) -> &AtomicU32 {
        debug_assert!(offset % LABEL_ALIGN == 0 && offset + 4 <= self.map.len());
        // SAFETY: offset is validated by the callers to be record-aligned
        // (8 bytes, which satisfies u32 alignment) and in bounds, and the
        // mapping outlives the returned reference.
        unsafe { &*(self.map.as_slice().as_ptr().add(offset) as *const AtomicU32) }
    }

    fn corrupted<S: Into<String>>(&self, reason: S) -> crate::error::VarveError {
        LabelError::Corrupted {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
        .into()
    }
}

/// Returns the offset just past a record of `name_len` bytes at `offset`,
/// padded to the record alignment.
fn record_end(offset: usize, name_len: usize) -> usize {
    offset + (4 + name_len + LABEL_ALIGN - 1) / LABEL_ALIGN * LABEL_ALIGN
}
