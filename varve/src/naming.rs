//! Shard file naming and discovery.
//!
//! A series lives at a base path like `/var/metrics/kernel-memory`; its
//! shards are sibling files `kernel-memory-<id>.data` and
//! `kernel-memory-<id>.labels`, with the id rendered as zero-padded
//! lowercase hex. Zero padding makes lexicographic order equal numeric
//! order, so sorting directory entries sorts shards oldest first.
//!
//! Id `0` is reserved: it is the parse-failure value, and the first shard
//! of every series is id `1`.

use std::path::{Path, PathBuf};

/// Extension of shard data files.
pub const DATA_EXT: &str = "data";

/// Extension of shard label files.
pub const LABELS_EXT: &str = "labels";

/// Returns the data file path for shard `id` of the series at `base`.
pub fn data_path(base: &Path, id: u32) -> PathBuf {
    shard_path(base, id, DATA_EXT)
}

/// Returns the label file path for shard `id` of the series at `base`.
pub fn labels_path(base: &Path, id: u32) -> PathBuf {
    shard_path(base, id, LABELS_EXT)
}

fn shard_path(base: &Path, id: u32, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!("-{id:08x}.{ext}"));
    PathBuf::from(name)
}

/// Extracts the shard id from a data or label file path of the series at
/// `base`. Returns `0` (the reserved id) when the path does not parse.
pub fn parse_id(base: &Path, path: &Path) -> u32 {
    let base = base.to_string_lossy();
    let path = path.to_string_lossy();

    let Some(rest) = path.strip_prefix(&*base) else {
        return 0;
    };
    let Some(rest) = rest.strip_prefix('-') else {
        return 0;
    };
    let hex = rest
        .strip_suffix(".data")
        .or_else(|| rest.strip_suffix(".labels"))
        .unwrap_or(rest);
    u32::from_str_radix(hex, 16).unwrap_or(0)
}

/// Lists the data files of the series at `base`, sorted by shard id.
///
/// Only names of the exact `<base>-<8 lowercase hex>.data` shape count; an
/// unreadable directory yields an empty list, which callers treat the same
/// as a series with no shards.
pub fn data_files(base: &Path) -> Vec<PathBuf> {
    let parent = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let Some(stem) = base.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(parent) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            shard_id_of(&name, &stem, DATA_EXT).map(|_| parent.join(name))
        })
        .collect();
    files.sort();
    files
}

/// Returns the id a writer should open: the id of the newest existing data
/// file, or `1` when the series has no shards yet.
pub fn last_id(base: &Path) -> u32 {
    let id = data_files(base)
        .last()
        .map(|path| parse_id(base, path))
        .unwrap_or(0);
    if id == 0 { 1 } else { id }
}

/// Lists the distinct series base names that have at least one shard in
/// `dir`, sorted. External consumers (an HTTP listing endpoint, the CLI)
/// use this to enumerate what a directory serves.
pub fn series_in_dir(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            series_name_of(&name, DATA_EXT)
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Checks `name` against `<stem>-<8 lowercase hex>.<ext>` and returns the
/// shard id on a match.
fn shard_id_of(name: &str, stem: &str, ext: &str) -> Option<u32> {
    let rest = name.strip_prefix(stem)?.strip_prefix('-')?;
    let hex = rest.strip_suffix(ext)?.strip_suffix('.')?;
    if hex.len() != 8 || !hex.bytes().all(is_shard_hex) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

/// Splits `<series>-<8 lowercase hex>.<ext>` into its series name.
fn series_name_of(name: &str, ext: &str) -> Option<String> {
    let rest = name.strip_suffix(ext)?.strip_suffix('.')?;
    let (series, hex) = rest.rsplit_once('-')?;
    if series.is_empty() || hex.len() != 8 || !hex.bytes().all(is_shard_hex) {
        return None;
    }
    Some(series.to_string())
}

fn is_shard_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_are_zero_padded_hex() {
        let base = Path::new("/var/metrics/kernel-memory");

        assert_eq!(
            data_path(base, 1),
            PathBuf::from("/var/metrics/kernel-memory-00000001.data")
        );
        assert_eq!(
            labels_path(base, 0x1f),
            PathBuf::from("/var/metrics/kernel-memory-0000001f.labels")
        );
        assert_eq!(
            data_path(base, u32::MAX),
            PathBuf::from("/var/metrics/kernel-memory-ffffffff.data")
        );
    }

    #[test]
    fn parse_round_trips() {
        let base = Path::new("/tmp/serie");

        assert_eq!(parse_id(base, &data_path(base, 1)), 1);
        assert_eq!(parse_id(base, &labels_path(base, 0xabcd)), 0xabcd);
        assert_eq!(parse_id(base, &data_path(base, u32::MAX)), u32::MAX);
    }

    #[test]
    fn parse_failures_return_zero() {
        let base = Path::new("/tmp/serie");

        assert_eq!(parse_id(base, Path::new("/tmp/other-00000001.data")), 0);
        assert_eq!(parse_id(base, Path::new("/tmp/serie-notahexid.data")), 0);
        assert_eq!(parse_id(base, Path::new("/tmp/serie.data")), 0);
        assert_eq!(parse_id(base, Path::new("")), 0);
    }

    #[test]
    fn enumeration_sorts_and_filters() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("serie");

        for id in [3u32, 1, 2, 0x10] {
            std::fs::write(data_path(&base, id), b"x").unwrap();
            std::fs::write(labels_path(&base, id), b"x").unwrap();
        }
        // Decoys that must not match.
        std::fs::write(dir.path().join("serie-0000001.data"), b"x").unwrap();
        std::fs::write(dir.path().join("serie-0000000g.data"), b"x").unwrap();
        std::fs::write(dir.path().join("other-00000001.data"), b"x").unwrap();

        let files = data_files(&base);
        let ids: Vec<u32> = files.iter().map(|p| parse_id(&base, p)).collect();
        assert_eq!(ids, vec![1, 2, 3, 0x10]);
    }

    #[test]
    fn last_id_defaults_to_one() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("absent");
        assert_eq!(last_id(&base), 1);
    }

    #[test]
    fn last_id_finds_the_newest_shard() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("serie");

        for id in [1u32, 2, 0x10] {
            std::fs::write(data_path(&base, id), b"x").unwrap();
        }
        assert_eq!(last_id(&base), 0x10);
    }

    #[test]
    fn series_listing_dedupes_shards() {
        let dir = tempdir().unwrap();

        for id in 1u32..=3 {
            std::fs::write(data_path(&dir.path().join("cpu"), id), b"x").unwrap();
        }
        std::fs::write(data_path(&dir.path().join("kernel-memory"), 1), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        assert_eq!(
            series_in_dir(dir.path()),
            vec!["cpu".to_string(), "kernel-memory".to_string()]
        );
    }
}
