//! Shared memory mappings over shard files.
//!
//! [`FileMap`] is the one place in the engine that talks to mmap. Every
//! mapping is created `MAP_SHARED` so that a writer process and any number
//! of reader processes observe the same bytes, and is pinned with a
//! best-effort `mlock` (failure is logged and ignored; the mapping stays
//! valid, just not resident).
//!
//! File sizes are always rounded up to a multiple of the OS page size; the
//! [`page_align`] helper is used by every caller that computes a file size.
//!
//! Growing a mapping (`grow`) truncates the file and replaces the mapping
//! wholesale. Any raw pointer into the previous mapping becomes dangling, so
//! callers must route every access through [`FileMap::as_slice`] /
//! [`FileMap::as_mut_slice`] and never hold on to addresses across a grow.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use memmap2::{Mmap, MmapMut};

/// Returns the OS page size in bytes.
pub fn page_size() -> usize {
    // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions and cannot fail on
    // any platform this crate supports.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Rounds `value` up to the next multiple of the OS page size.
pub fn page_align(value: usize) -> usize {
    let ps = page_size();
    value.div_ceil(ps) * ps
}

/// A shared mapping of one file, read-only or read-write.
enum Map {
    Ro(Mmap),
    Rw(MmapMut),
}

/// One file mapped into memory as a shared region.
///
/// Keeps the [`File`] handle open so the mapping can be grown or the file
/// truncated without re-opening by path. Dropping a `FileMap` unmaps the
/// region; it does not sync (callers that care about durability call
/// [`FileMap::sync`] first).
pub struct FileMap {
    file: File,
    map: Map,
}

impl std::fmt::Debug for FileMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (mode, len) = match &self.map {
            Map::Ro(m) => ("ro", m.len()),
            Map::Rw(m) => ("rw", m.len()),
        };
        f.debug_struct("FileMap")
            .field("mode", &mode)
            .field("len", &len)
            .finish()
    }
}

impl FileMap {
    /// Maps an existing file read-only.
    pub fn open_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        // SAFETY: the mapping is backed by a file we just opened and hold
        // open for the lifetime of the FileMap. The file may be mutated by
        // another process through its own shared mapping; the engine only
        // reads bytes below the published cursor, which are never rewritten.
        let map = unsafe { Mmap::map(&file)? };
        lock_best_effort(map.as_ptr(), map.len());
        Ok(Self {
            file,
            map: Map::Ro(map),
        })
    }

    /// Maps an existing file read-write. Fails if the file does not exist.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::map_rw(file)
    }

    /// Creates a file of `len` bytes (rounded up to the page size) with the
    /// given Unix mode and maps it read-write.
    pub fn create_rw<P: AsRef<Path>>(path: P, len: usize, mode: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(mode)
            .open(path)?;
        file.set_len(page_align(len) as u64)?;
        Self::map_rw(file)
    }

    /// Maps an already-sized file read-write, taking ownership of the handle.
    ///
    /// Used by the data store, which sizes and initializes its file through
    /// a temp file before publishing it by rename.
    pub fn from_file(file: File) -> io::Result<Self> {
        Self::map_rw(file)
    }

    fn map_rw(file: File) -> io::Result<Self> {
        // SAFETY: same reasoning as in open_ro; additionally this process is
        // the single writer, so no other mapping mutates the region.
        let map = unsafe { MmapMut::map_mut(&file)? };
        lock_best_effort(map.as_ptr(), map.len());
        Ok(Self {
            file,
            map: Map::Rw(map),
        })
    }

    /// Returns the mapped length in bytes (always a multiple of the page
    /// size for files this engine created).
    pub fn len(&self) -> usize {
        match &self.map {
            Map::Ro(m) => m.len(),
            Map::Rw(m) => m.len(),
        }
    }

    /// Returns true if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Map::Ro(m) => m,
            Map::Rw(m) => m,
        }
    }

    /// Returns the mapped bytes mutably.
    ///
    /// # Panics
    ///
    /// Panics if the mapping is read-only; only the owning writer holds a
    /// read-write map, so reaching that panic is a programming error.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.map {
            Map::Ro(_) => panic!("write access to a read-only mapping"),
            Map::Rw(m) => m,
        }
    }

    /// Grows the backing file to `len` bytes (rounded up to the page size)
    /// and replaces the mapping.
    ///
    /// The previous region is unmapped: all raw references into it become
    /// invalid and every access must go through the new slice.
    pub fn grow(&mut self, len: usize) -> io::Result<()> {
        let new_len = page_align(len);
        self.file.set_len(new_len as u64)?;
        // SAFETY: same single-writer reasoning as map_rw; the old mapping is
        // dropped only after the new one is in place.
        let map = unsafe { MmapMut::map_mut(&self.file)? };
        lock_best_effort(map.as_ptr(), map.len());
        self.map = Map::Rw(map);
        Ok(())
    }

    /// Flushes the mapped region to the backing file with `msync`.
    pub fn sync(&self) -> io::Result<()> {
        match &self.map {
            // Nothing of ours to write back; the writer's msync makes the
            // shared pages durable.
            Map::Ro(_) => Ok(()),
            Map::Rw(m) => m.flush(),
        }
    }

    /// Truncates the backing file to `len` bytes (rounded up to the page
    /// size), syncs, and unmaps.
    ///
    /// Used by seal paths to give a finished shard a tight bound. The sync
    /// happens before the truncate so no dirty page past the new end is
    /// flushed into a shrunken file.
    pub fn truncate_and_close(self, len: usize) -> io::Result<()> {
        self.sync()?;
        drop(self.map);
        self.file.set_len(page_align(len) as u64)
    }
}

/// Pins a mapped region in memory, logging on failure.
///
/// mlock can fail under RLIMIT_MEMLOCK; the mapping still works, it is just
/// subject to paging, so this is not treated as an error.
fn lock_best_effort(addr: *const u8, len: usize) {
    if len == 0 {
        return;
    }
    // SAFETY: addr/len describe a mapping that was just created and is owned
    // by the caller for the duration of this call.
    let rc = unsafe { libc::mlock(addr as *const libc::c_void, len) };
    if rc != 0 {
        tracing::warn!(
            "mlock of {len} bytes failed: {}; mapping stays unpinned",
            io::Error::last_os_error()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_align_rounds_up() {
        let ps = page_size();
        assert_eq!(page_align(0), 0);
        assert_eq!(page_align(1), ps);
        assert_eq!(page_align(ps), ps);
        assert_eq!(page_align(ps + 1), 2 * ps);
    }

    #[test]
    fn create_rounds_to_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map");

        let map = FileMap::create_rw(&path, 100, 0o666).unwrap();
        assert_eq!(map.len(), page_size());
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            page_size() as u64
        );
    }

    #[test]
    fn write_then_read_through_ro_map() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map");

        let mut rw = FileMap::create_rw(&path, 64, 0o666).unwrap();
        rw.as_mut_slice()[0..4].copy_from_slice(b"asdf");
        rw.sync().unwrap();

        let ro = FileMap::open_ro(&path).unwrap();
        assert_eq!(&ro.as_slice()[0..4], b"asdf");
    }

    #[test]
    fn ro_and_rw_maps_share_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map");

        let mut rw = FileMap::create_rw(&path, 64, 0o666).unwrap();
        let ro = FileMap::open_ro(&path).unwrap();

        // A store through the writer's shared map is visible to the reader's
        // map without any sync.
        rw.as_mut_slice()[10] = 0x5a;
        assert_eq!(ro.as_slice()[10], 0x5a);
    }

    #[test]
    fn grow_extends_and_preserves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map");

        let mut map = FileMap::create_rw(&path, 16, 0o666).unwrap();
        let first_len = map.len();
        map.as_mut_slice()[0] = 7;

        map.grow(first_len + 1).unwrap();
        assert_eq!(map.len(), 2 * page_size());
        assert_eq!(map.as_slice()[0], 7);
        assert_eq!(map.as_slice()[first_len], 0);
    }

    #[test]
    fn truncate_and_close_shrinks_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map");

        let map = FileMap::create_rw(&path, 3 * page_size(), 0o666).unwrap();
        map.truncate_and_close(10).unwrap();

        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            page_size() as u64
        );
    }

    #[test]
    fn open_ro_missing_file_errors() {
        let dir = tempdir().unwrap();
        let err = FileMap::open_ro(dir.path().join("absent")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    #[should_panic(expected = "read-only mapping")]
    fn mut_access_to_ro_map_panics() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map");
        FileMap::create_rw(&path, 16, 0o666).unwrap();

        let mut ro = FileMap::open_ro(&path).unwrap();
        ro.as_mut_slice()[0] = 1;
    }
}
