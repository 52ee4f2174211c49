//! Streamed tree snapshots for the Data Hub.
//!
//! A snapshot walks a subtree of the resource tree, filtered to entries
//! modified after a given timestamp, and streams an encoded form through a
//! pipe with backpressure. Encoders plug in through the [`formatter`]
//! capability; JSON is the supported encoding. Deletion records, when
//! tracking is enabled, are reported in a second pass.

pub mod engine;
pub mod formatter;
pub mod json;
pub mod transport;
pub mod walk;

pub use engine::{
    MAX_PASSES, PreparedSnapshot, SnapshotParams, SnapshotStatus, begin, begin_with_formatter,
    snapshot_to, start_snapshot,
};
pub use formatter::{FormatRequest, Formatter, SnapshotFormat};
pub use walk::FilterMask;
