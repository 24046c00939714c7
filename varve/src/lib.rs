//! # varve
//!
//! Append-only time-series shard storage over memory-mapped files.
//!
//! varve stores one *series* as an ordered list of *shards*. Each shard is
//! a pair of files sharing an 8-hex id: a data file holding a bounded ring
//! of fixed-size `(timestamp, value, label ids)` records, and a label file
//! interning the label strings those records reference. A single writer
//! appends; any number of readers, in the same process or others, query
//! concurrently through shared mappings.
//!
//! ## Key Properties
//!
//! - One atomic cursor word per shard is the whole synchronization
//!   protocol: records are written fully, then published with a release
//!   store, and readers acquire the cursor before touching them. No locks,
//!   no background threads.
//! - Shards never mutate once full: the writer seals the pair and rolls
//!   over to a fresh id, and new shards are published atomically with a
//!   temp-file rename.
//! - Readers index the series as one flat sequence. A [`reader::Location`]
//!   crosses shard boundaries transparently, so "the last 390 records" is
//!   plain arithmetic even when it spans four files.
//! - Values are opaque 64 bits; the engine orders and searches by
//!   timestamp only.
//!
//! ## Use Cases
//!
//! - Local metrics retention with cheap, bounded disk usage
//! - Feeding an HTTP scrape or query endpoint from flat files
//! - Anywhere a full TSDB is disproportionate but "a ring of records per
//!   week" is exactly right

pub mod data;
pub mod error;
pub mod labels;
pub mod mmap;
pub mod naming;
pub mod reader;
pub mod writer;

pub use data::{DataStore, DataStoreOptions, ShardMeta};
pub use error::{Result, VarveError};
pub use labels::{LabelId, LabelOptions, LabelStore};
pub use reader::{Location, Point, SerieReader};
pub use writer::SerieWriter;
