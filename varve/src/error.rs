//! Error types for the varve storage engine.
//!
//! Each subsystem (data files, label files, series-level operations) has its
//! own error enum with structured variants carrying the failing path and the
//! underlying I/O error where one exists. The top-level [`VarveError`]
//! aggregates them so callers can match on one type.
//!
//! "Shard full" is deliberately not an error: [`crate::data::DataStore::append`]
//! returns `None` and the writer handles it by rolling over to a new shard.
//! Programmer errors (an element index outside a shard's bounds) panic.

use thiserror::Error;

/// The main error type for all varve operations.
#[derive(Error, Debug)]
pub enum VarveError {
    /// Error in a shard data file.
    #[error("data store error: {0}")]
    Data(#[from] DataError),

    /// Error in a shard label file.
    #[error("label store error: {0}")]
    Label(#[from] LabelError),

    /// Error at the series level (writer or reader).
    #[error("serie error: {0}")]
    Serie(#[from] SerieError),
}

impl VarveError {
    /// Returns true if this error means a file was simply not there.
    ///
    /// Shard discovery uses this to tell "end of the series" apart from a
    /// real I/O failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            VarveError::Data(DataError::OpenFailed { source, .. })
            | VarveError::Label(LabelError::OpenFailed { source, .. }) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Errors raised by the fixed-record data store.
#[derive(Error, Debug)]
pub enum DataError {
    /// The data file could not be opened or created.
    #[error("failed to open data file '{path}': {source}")]
    OpenFailed {
        /// The data file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping or resizing the data file failed.
    #[error("failed to map data file '{path}': {source}")]
    MapFailed {
        /// The data file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Syncing the data file to disk failed.
    #[error("failed to sync data file '{path}': {source}")]
    SyncFailed {
        /// The data file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The data file content is not a valid shard.
    #[error("data file '{path}' is corrupted: {reason}")]
    Corrupted {
        /// The data file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// The store options are invalid.
    #[error("invalid data store options: {reason}")]
    InvalidOptions {
        /// Description of what is invalid.
        reason: String,
    },
}

/// Errors raised by the interned-string label store.
#[derive(Error, Debug)]
pub enum LabelError {
    /// The label file could not be opened or created.
    #[error("failed to open label file '{path}': {source}")]
    OpenFailed {
        /// The label file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Growing or remapping the label file failed.
    #[error("failed to grow label file '{path}': {source}")]
    GrowFailed {
        /// The label file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Syncing the label file to disk failed.
    #[error("failed to sync label file '{path}': {source}")]
    SyncFailed {
        /// The label file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A label id or length field does not describe a valid record.
    #[error("label file '{path}' is corrupted: {reason}")]
    Corrupted {
        /// The label file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// The empty string cannot be interned (a zero length is the terminator).
    #[error("empty labels cannot be stored")]
    EmptyLabel,

    /// Interning one more label would push the next id past the 32-bit range.
    #[error("label store '{path}' is out of id space")]
    IdSpaceExhausted {
        /// The label file path.
        path: String,
    },

    /// The store options are invalid.
    #[error("invalid label store options: {reason}")]
    InvalidOptions {
        /// Description of what is invalid.
        reason: String,
    },
}

/// Errors raised by series-level writers and readers.
#[derive(Error, Debug)]
pub enum SerieError {
    /// No shard file exists for the series base path.
    #[error("serie '{path}' not found: no shard files on disk")]
    SerieNotFound {
        /// The series base path.
        path: String,
    },

    /// The timestamp is one of the two reserved values (0 or `u64::MAX`).
    #[error("timestamp {timestamp:#x} is reserved and cannot be stored")]
    ReservedTimestamp {
        /// The rejected timestamp.
        timestamp: u64,
    },

    /// The writer is not open.
    #[error("serie writer '{path}' is not open")]
    NotOpen {
        /// The series base path.
        path: String,
    },

    /// A location references a shard that is no longer part of the series.
    #[error("{which} location is no longer valid: shard {index} is gone")]
    ShardGone {
        /// Which end of the range was invalid ("start" or "end").
        which: &'static str,
        /// The stale shard index.
        index: usize,
    },

    /// A range was given with its end before its start.
    #[error("invalid range: end shard {end} is before start shard {start}")]
    InvalidRange {
        /// The start shard index.
        start: usize,
        /// The end shard index.
        end: usize,
    },
}

/// Type alias for `Result<T, VarveError>`.
pub type Result<T> = std::result::Result<T, VarveError>;
