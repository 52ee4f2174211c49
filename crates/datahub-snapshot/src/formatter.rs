//! The formatter capability: pluggable encoders driven by the tree walker.

use crate::walk::FilterMask;
use datahub_core::error::{HubError, Result};
use datahub_core::tree::{EntryId, Tree};

/// Output encodings. Room for more by interface; JSON is the one supported
/// today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
}

impl SnapshotFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(SnapshotFormat::Json),
            other => Err(HubError::Unsupported(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SnapshotFormat::Json => "json",
        }
    }
}

/// What the formatter wants after a pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    /// Run another pass.
    pub scan: bool,
    /// Filter mask for the next pass.
    pub filter: FilterMask,
}

impl Default for FormatRequest {
    fn default() -> Self {
        Self {
            scan: false,
            filter: FilterMask::LIVE,
        }
    }
}

/// A snapshot encoder.
///
/// The engine invokes the callbacks as the walker advances; each callback
/// appends bytes to `out`, which the engine drains to the sink under
/// backpressure before the next step. After `end_tree` the engine consults
/// [`request`](Formatter::request) to decide whether to run another pass.
pub trait Formatter {
    /// A pass is starting.
    fn start_tree(&mut self, out: &mut Vec<u8>, tree: &Tree, root: EntryId);
    /// The walker entered a relevant node.
    fn begin_node(&mut self, out: &mut Vec<u8>, tree: &Tree, root: EntryId, id: EntryId);
    /// The walker left a node.
    fn end_node(&mut self, out: &mut Vec<u8>, tree: &Tree, root: EntryId, id: EntryId);
    /// The pass is complete.
    fn end_tree(&mut self, out: &mut Vec<u8>, tree: &Tree, root: EntryId);
    /// The snapshot terminated (any status); release resources.
    fn close(&mut self);
    /// Scan/filter request, read between passes.
    fn request(&self) -> FormatRequest;
}
