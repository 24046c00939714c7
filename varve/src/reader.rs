//! Read side of a series: shard discovery, flat indexing, range scans.
//!
//! A [`SerieReader`] presents the shards of one series as a single
//! virtually flat sequence of records. It discovers shards by probing file
//! names in id order, keeps a cheap descriptor per shard (id, first
//! timestamp, entry count), and only maps a shard's data and label files
//! when a scan actually touches it.
//!
//! Positions in the flat sequence are [`Location`]s: a shard index plus an
//! element index within that shard. `(last shard, live entry count)` is the
//! one-past-the-end location, like an end iterator, which makes range
//! arithmetic with [`SerieReader::plus`] and [`SerieReader::minus`]
//! uniform.
//!
//! Readers run in parallel with the single writer, in the same process or
//! another one. Every public operation starts by picking up shards the
//! writer may have added since the last call. Shards can also disappear
//! underneath a reader (out-of-band deletion); scans skip shards that no
//! longer load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::DataStore;
use crate::error::{Result, SerieError};
use crate::labels::{LabelId, LabelStore};
use crate::naming;

/// One record as returned to callers: timestamp, opaque value, resolved
/// label strings.
///
/// Serializes with the capitalized field names of the HTTP reply contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Record timestamp.
    #[serde(rename = "Time")]
    pub time: u64,
    /// Record value, opaque to the engine.
    #[serde(rename = "Value")]
    pub value: u64,
    /// Label strings, resolved against the record's own shard.
    #[serde(rename = "Label")]
    pub labels: Vec<String>,
}

/// Logical pointer into a series: shard index plus element index.
///
/// `element` ranges over `[0, entries]`; the upper bound is only meaningful
/// on the last shard, where it is the one-past-the-end position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Index of the shard in the reader's ordered shard list.
    pub shard: usize,
    /// Element index within that shard.
    pub element: usize,
}

/// One discovered shard: its descriptor plus lazily opened stores.
#[derive(Debug)]
pub struct Shard {
    id: u32,
    /// Timestamp of the shard's first record, from `peek_header`.
    mintime: u64,
    /// Entry count at discovery time; refreshed once the shard stops being
    /// the last one, after which it never changes again.
    entries: usize,
    data: Option<DataStore>,
    labels: Option<LabelStore>,
}

impl Shard {
    /// Shard id (the 8-hex part of its file names).
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Timestamp of the shard's first record.
    pub fn mintime(&self) -> u64 {
        self.mintime
    }

    /// Entry count from the shard's descriptor. For the last shard of a
    /// live series this lags the writer; [`SerieReader::last_location`]
    /// reports the live count.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Whether the shard's stores are currently mapped.
    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Resolves the labels of one record against this shard's label store.
    ///
    /// Only meaningful on a loaded shard (scans always hand summarizers a
    /// loaded one); unloaded shards yield no labels. An id that fails to
    /// resolve contributes an empty string and a warning rather than
    /// aborting the scan.
    pub fn labels_of(&self, element: usize) -> Vec<String> {
        let (Some(data), Some(labels)) = (&self.data, &self.labels) else {
            return Vec::new();
        };

        let mut ids: Vec<LabelId> = Vec::new();
        data.labels_at(data.offset_of(element as isize), &mut ids);
        ids.iter()
            .map(|&id| match labels.load(id) {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!("corrupted label store? {e}");
                    String::new()
                }
            })
            .collect()
    }

    fn load(&mut self, base: &Path) -> Result<()> {
        if self.data.is_some() && self.labels.is_some() {
            return Ok(());
        }

        let data = DataStore::open_ro(naming::data_path(base, self.id))?;
        let labels = match LabelStore::open_ro(naming::labels_path(base, self.id)) {
            Ok(labels) => labels,
            Err(e) => {
                self.data = None;
                return Err(e);
            }
        };

        self.data = Some(data);
        self.labels = Some(labels);
        Ok(())
    }

    fn unload(&mut self) {
        self.data = None;
        self.labels = None;
    }
}

/// Reader over all shards of one series.
pub struct SerieReader {
    path: PathBuf,
    /// Discovered shards, ordered by id (oldest first).
    shards: Vec<Shard>,
}

impl SerieReader {
    /// Creates a reader for the series at `path`. No I/O happens until
    /// [`Self::open`] or the first query.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            shards: Vec::new(),
        }
    }

    /// Series base path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Discovers the shards on disk.
    ///
    /// # Errors
    ///
    /// Returns [`SerieError::SerieNotFound`] if the series has no shard
    /// files at all.
    pub fn open(&mut self) -> Result<()> {
        self.reload_shards()
    }

    /// Number of shards currently known.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The known shards, oldest first.
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Drops the mapped stores of one shard to bound memory; the descriptor
    /// stays and the shard reloads transparently on the next scan.
    pub fn unload_shard(&mut self, index: usize) {
        if let Some(shard) = self.shards.get_mut(index) {
            shard.unload();
        }
    }

    /// Picks up shards the writer created since the last call.
    ///
    /// If the newest known shard still has append room, no newer shard can
    /// exist and the scan is skipped. Otherwise ids after the newest known
    /// one are probed with `peek_header` until a file is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SerieError::SerieNotFound`] when no shard exists, or the
    /// underlying store error if a probe fails for a reason other than a
    /// missing file.
    pub fn reload_shards(&mut self) -> Result<()> {
        if let Some(last) = self.shards.last_mut() {
            last.load(&self.path)?;
            let data = last.data.as_ref().expect("shard was just loaded");
            let (more, _) = data.peek_append();
            if more {
                return Ok(());
            }
            // This shard has filled up since we first peeked it, so its
            // entry count is final now.
            last.entries = data.entries();
        }

        let start = self.shards.last().map_or(1, |shard| shard.id + 1);
        for id in start.. {
            match DataStore::peek_header(naming::data_path(&self.path, id)) {
                Ok(meta) => self.shards.push(Shard {
                    id,
                    mintime: meta.first_time,
                    entries: meta.entries,
                    data: None,
                    labels: None,
                }),
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            }
        }

        if self.shards.is_empty() {
            return Err(SerieError::SerieNotFound {
                path: self.path.display().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Location of the very first record of the series.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::reload_shards`] errors.
    pub fn first_location(&mut self) -> Result<Location> {
        self.reload_shards()?;
        Ok(Location { shard: 0, element: 0 })
    }

    /// One-past-the-end location: the last shard and its live entry count,
    /// straight from the writer's published cursor.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::reload_shards`] and shard load errors.
    pub fn last_location(&mut self) -> Result<Location> {
        self.reload_shards()?;

        let index = self.shards.len() - 1;
        self.shards[index].load(&self.path)?;
        let data = self.shards[index].data.as_ref().expect("shard was just loaded");
        Ok(Location {
            shard: index,
            element: data.entries(),
        })
    }

    /// Walks `n` elements forward from `loc`, crossing shard boundaries,
    /// clamping at the end of the series.
    ///
    /// # Errors
    ///
    /// Returns a shard load error if the walk needs the live entry count of
    /// the last shard and it cannot be mapped.
    pub fn plus(&mut self, loc: Location, n: usize) -> Result<Location> {
        let mut shard = loc.shard;
        let mut value = n as i64;

        loop {
            let elements = self.elements_of(shard)? as i64;
            // The walk keeps loc.element in the sum and subtracts whole
            // shard counts, so intermediate values can dip negative.
            let target = loc.element as i64 + value;
            if target < elements {
                return Ok(Location {
                    shard,
                    element: target as usize,
                });
            }
            if shard + 1 == self.shards.len() {
                return Ok(Location {
                    shard,
                    element: elements as usize,
                });
            }
            value -= elements;
            shard += 1;
        }
    }

    /// Walks `n` elements backward from `loc`, crossing shard boundaries,
    /// clamping at the first record of the series.
    pub fn minus(&self, loc: Location, mut n: usize) -> Location {
        if loc.element > n {
            return Location {
                shard: loc.shard,
                element: loc.element - n,
            };
        }

        n -= loc.element;
        let mut shard = loc.shard;
        while shard > 0 {
            shard -= 1;
            let entries = self.shards[shard].entries;
            if entries >= n {
                return Location {
                    shard,
                    element: entries - n,
                };
            }
            n -= entries;
        }
        Location { shard: 0, element: 0 }
    }

    /// Signed combination of [`Self::plus`] and [`Self::minus`].
    ///
    /// # Errors
    ///
    /// Propagates [`Self::plus`] errors for positive deltas.
    pub fn offset(&mut self, loc: Location, delta: i64) -> Result<Location> {
        if delta >= 0 {
            self.plus(loc, delta as usize)
        } else {
            Ok(self.minus(loc, delta.unsigned_abs() as usize))
        }
    }

    /// Reads the records in `[start, end)` into fully resolved [`Point`]s.
    ///
    /// # Errors
    ///
    /// See [`Self::get_data_with`].
    pub fn get_data(&mut self, start: Location, end: Location) -> Result<Vec<Point>> {
        self.get_data_with(start, end, |points, shard, location, time, value| {
            points.push(Point {
                time,
                value,
                labels: shard.labels_of(location.element),
            });
        })
    }

    /// Reads the records in `[start, end)` through a caller-supplied
    /// summarizer.
    ///
    /// The summarizer is called once per record with the accumulator, the
    /// record's (loaded) shard, its location, timestamp, and value; it
    /// decides what, if anything, to push. It can resolve labels through
    /// [`Shard::labels_of`] or skip them entirely — the scan itself never
    /// touches the label store.
    ///
    /// A shard that fails to load mid-scan (rotated out on disk) is
    /// skipped.
    ///
    /// # Errors
    ///
    /// - [`SerieError::ShardGone`] if `start` or `end` references a shard
    ///   index the reader no longer has.
    /// - [`SerieError::InvalidRange`] if `end` is before `start`.
    pub fn get_data_with<F>(&mut self, start: Location, end: Location, mut summarize: F) -> Result<Vec<Point>>
    where
        F: FnMut(&mut Vec<Point>, &Shard, Location, u64, u64),
    {
        if start.shard >= self.shards.len() {
            return Err(SerieError::ShardGone {
                which: "start",
                index: start.shard,
            }
            .into());
        }
        if end.shard >= self.shards.len() {
            return Err(SerieError::ShardGone {
                which: "end",
                index: end.shard,
            }
            .into());
        }
        if start.shard > end.shard {
            return Err(SerieError::InvalidRange {
                start: start.shard,
                end: end.shard,
            }
            .into());
        }

        let mut points = Vec::new();
        let mut min_element = start.element;

        for index in start.shard..=end.shard {
            if self.shards[index].load(&self.path).is_err() {
                // Deleted underneath us; skip what we can no longer read.
                min_element = 0;
                continue;
            }

            let shard = &self.shards[index];
            let data = shard.data.as_ref().expect("shard was just loaded");
            let max_element = if index == end.shard {
                end.element
            } else {
                data.entries()
            };

            for element in min_element..max_element {
                let offset = data.offset_of(element as isize);
                let time = data.time_at(offset);
                let value = data.value_at(offset);
                summarize(&mut points, shard, Location { shard: index, element }, time, value);
            }
            min_element = 0;
        }
        Ok(points)
    }

    /// Resolves the labels of the record at `loc`.
    ///
    /// # Errors
    ///
    /// Returns [`SerieError::ShardGone`] for a stale location, or the load
    /// error of a shard that cannot be mapped.
    pub fn labels_at(&mut self, loc: Location) -> Result<Vec<String>> {
        if loc.shard >= self.shards.len() {
            return Err(SerieError::ShardGone {
                which: "start",
                index: loc.shard,
            }
            .into());
        }
        self.shards[loc.shard].load(&self.path)?;
        Ok(self.shards[loc.shard].labels_of(loc.element))
    }

    /// Finds the first location whose timestamp satisfies `finder`.
    ///
    /// `finder` must be monotone over time (false for every timestamp below
    /// some threshold, true from there on; the typical shape is
    /// `|time| time >= t0`): both the shard search over first timestamps
    /// and the element search within the found shard are binary. Returns
    /// the end location when no timestamp satisfies the predicate.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::reload_shards`] and shard load errors.
    pub fn find<F>(&mut self, finder: F) -> Result<Location>
    where
        F: Fn(u64) -> bool,
    {
        self.reload_shards()?;

        let index = self.shards.partition_point(|shard| !finder(shard.mintime));
        if index == self.shards.len() {
            return self.last_location();
        }

        self.shards[index].load(&self.path)?;
        let data = self.shards[index].data.as_ref().expect("shard was just loaded");

        let mut lo = 0;
        let mut hi = data.entries();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if finder(data.time_at(data.offset_of(mid as isize))) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(Location {
            shard: index,
            element: lo,
        })
    }

    /// Entry count of one shard: the cached descriptor count for sealed
    /// shards, the live cursor-derived count for the last one.
    fn elements_of(&mut self, index: usize) -> Result<usize> {
        if index + 1 != self.shards.len() {
            return Ok(self.shards[index].entries);
        }
        self.shards[index].load(&self.path)?;
        Ok(self.shards[index]
            .data
            .as_ref()
            .expect("shard was just loaded")
            .entries())
    }
}
