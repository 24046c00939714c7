//! Single-writer append path for one series.
//!
//! A [`SerieWriter`] owns the current shard of a series: one data store it
//! appends records to and one label store it interns label strings into.
//! When the data store fills up, both are sealed, the shard id advances,
//! and the append retries against a fresh pair. Rollover is invisible to
//! callers; only real I/O failures surface.
//!
//! One series has exactly one writer. The writer itself takes `&mut self`
//! everywhere; sharing it across threads means serializing calls outside
//! the engine.

use std::path::{Path, PathBuf};

use crate::data::{DataStore, DataStoreOptions};
use crate::error::{Result, SerieError};
use crate::labels::{LabelId, LabelOptions, LabelStore};
use crate::naming;

/// Appends records to the newest shard of a series, rolling over on
/// capacity.
///
/// ```rust,no_run
/// use varve::writer::SerieWriter;
///
/// # fn main() -> varve::error::Result<()> {
/// let mut writer = SerieWriter::new("/var/metrics/kernel-memory");
/// writer.open()?;
/// writer.append(1_700_000_000, 4096, &["zone:dma".to_string()])?;
/// writer.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SerieWriter {
    /// Series base path, e.g. `/var/metrics/kernel-memory`.
    path: PathBuf,
    /// Current shard id; 0 means "determine from disk on open".
    id: u32,
    /// Options for data stores this writer creates.
    pub data_options: DataStoreOptions,
    /// Options for label stores this writer creates.
    pub label_options: LabelOptions,

    data: Option<DataStore>,
    labels: Option<LabelStore>,
}

impl SerieWriter {
    /// Creates a writer for the series at `path` with default options.
    ///
    /// Options can be adjusted before [`Self::open`]; changing them after
    /// open only affects shards created from then on.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            id: 0,
            data_options: DataStoreOptions::default(),
            label_options: LabelOptions::default(),
            data: None,
            labels: None,
        }
    }

    /// Applies one Unix file mode to both stores' creation options.
    pub fn set_mode(&mut self, mode: u32) {
        self.data_options.mode = mode;
        self.label_options.mode = mode;
    }

    /// Series base path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Id of the shard currently open for writing (0 when closed).
    pub fn shard_id(&self) -> u32 {
        self.id
    }

    /// Whether the writer currently holds an open shard.
    pub fn is_open(&self) -> bool {
        self.data.is_some()
    }

    /// Opens the newest shard of the series, creating it if needed.
    ///
    /// If the shard on disk was written with a different labels-per-entry
    /// setting than this writer is configured for, it is sealed and the
    /// writer advances to a fresh shard; records of different widths never
    /// share a file.
    ///
    /// # Errors
    ///
    /// Returns the underlying data or label store error.
    pub fn open(&mut self) -> Result<()> {
        if self.id == 0 {
            self.id = naming::last_id(&self.path);
        }

        let data = loop {
            let data = DataStore::open_rw(
                naming::data_path(&self.path, self.id),
                &self.data_options,
            )?;
            if data.labels_per_entry() == self.data_options.labels_per_entry {
                break data;
            }

            tracing::debug!(
                "shard {:08x} of '{}' has {} label slots, want {}; sealing it",
                self.id,
                self.path.display(),
                data.labels_per_entry(),
                self.data_options.labels_per_entry,
            );
            data.seal()?;
            self.id += 1;
        };

        match LabelStore::open_rw(naming::labels_path(&self.path, self.id), self.label_options) {
            Ok(labels) => {
                self.data = Some(data);
                self.labels = Some(labels);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = data.close() {
                    tracing::warn!("closing data store after failed open: {close_err}");
                }
                Err(e)
            }
        }
    }

    /// Appends one record, rolling over to a new shard when the current one
    /// is full.
    ///
    /// Labels are interned in order into the current shard's label store;
    /// ids beyond the shard's labels-per-entry are silently dropped. The
    /// interning is skipped when the shard has no room left, so a label
    /// file never accumulates strings that no record of its shard
    /// references.
    ///
    /// # Errors
    ///
    /// - [`SerieError::ReservedTimestamp`] for `time` 0 or `u64::MAX`.
    /// - [`SerieError::NotOpen`] if [`Self::open`] was not called.
    /// - Any data or label store error from interning or rollover.
    pub fn append(&mut self, time: u64, value: u64, labels: &[String]) -> Result<()> {
        if time == 0 || time == u64::MAX {
            return Err(SerieError::ReservedTimestamp { timestamp: time }.into());
        }

        loop {
            let Some(data) = self.data.as_mut() else {
                return Err(SerieError::NotOpen {
                    path: self.path.display().to_string(),
                }
                .into());
            };

            let mut ids: Vec<LabelId> = Vec::new();
            if self.data_options.labels_per_entry > 0 && !labels.is_empty() {
                let (fits, _) = data.peek_append();
                if fits {
                    let Some(store) = self.labels.as_mut() else {
                        return Err(SerieError::NotOpen {
                            path: self.path.display().to_string(),
                        }
                        .into());
                    };
                    ids.reserve(labels.len());
                    for label in labels {
                        ids.push(store.intern(label)?);
                    }
                }
            }

            if data.append(time, value, &ids).is_some() {
                return Ok(());
            }
            self.rotate()?;
        }
    }

    /// Flushes both stores to disk without closing them.
    ///
    /// # Errors
    ///
    /// Returns the underlying sync error.
    pub fn sync(&self) -> Result<()> {
        if let Some(data) = &self.data {
            data.sync()?;
        }
        if let Some(labels) = &self.labels {
            labels.sync()?;
        }
        Ok(())
    }

    /// Syncs and unmaps both stores and resets the shard id, so a later
    /// [`Self::open`] re-discovers the newest shard from disk.
    ///
    /// A writer must be closed (or at least synced) before process exit for
    /// durability; a crash loses at most the records whose cursor advance
    /// no reader observed.
    ///
    /// # Errors
    ///
    /// Returns the underlying sync error.
    pub fn close(&mut self) -> Result<()> {
        if let Some(data) = self.data.take() {
            data.close()?;
        }
        if let Some(labels) = self.labels.take() {
            labels.close()?;
        }
        self.id = 0;
        Ok(())
    }

    /// Seals the current shard pair and opens the next id.
    fn rotate(&mut self) -> Result<()> {
        tracing::debug!(
            "shard {:08x} of '{}' is full, rotating",
            self.id,
            self.path.display()
        );

        if let Some(data) = self.data.take() {
            data.seal()?;
        }
        if let Some(labels) = self.labels.take() {
            labels.seal()?;
        }
        self.id += 1;
        self.open()
    }
}
