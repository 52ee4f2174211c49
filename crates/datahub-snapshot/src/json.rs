//! The JSON snapshot formatter.
//!
//! Wire format (byte-exact where it matters):
//!
//! ```text
//! {"ts":<double>,"root":"<path>","upserted":<obj>[,"deleted":<obj>]}
//! ```
//!
//! Non-leaf entries are objects keyed by child name. Entries with a typed
//! resource add `"type":<u32>,"ts":<double>,"mandatory":<bool>,"new":<bool>`
//! and, for non-Trigger values, `"value":<encoded>`. Scalars encode bare,
//! strings are quoted and escaped, JSON-typed values are inserted verbatim.

use crate::formatter::{FormatRequest, Formatter};
use crate::walk::FilterMask;
use datahub_core::sample::{escape_json_string, format_numeric, wall_clock};
use datahub_core::tree::{EntryId, Tree};

/// Which section the current pass feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Upserted,
    Deleted,
}

pub struct JsonFormatter {
    section: Section,
    /// Comma bookkeeping per open object: `true` once a member was written.
    comma_stack: Vec<bool>,
    request: FormatRequest,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self {
            section: Section::Upserted,
            comma_stack: Vec::new(),
            request: FormatRequest::default(),
        }
    }

    fn open_member(&mut self, out: &mut Vec<u8>) {
        if let Some(top) = self.comma_stack.last_mut() {
            if *top {
                out.push(b',');
            }
            *top = true;
        }
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for JsonFormatter {
    fn start_tree(&mut self, out: &mut Vec<u8>, tree: &Tree, root: EntryId) {
        match self.section {
            Section::Upserted => {
                let mut header = String::new();
                header.push_str("{\"ts\":");
                header.push_str(&format_numeric(wall_clock()));
                header.push_str(",\"root\":");
                escape_json_string(&tree.path_of(root), &mut header);
                header.push_str(",\"upserted\":");
                out.extend_from_slice(header.as_bytes());
            }
            Section::Deleted => {
                out.extend_from_slice(b",\"deleted\":");
            }
        }
        self.comma_stack.clear();
    }

    fn begin_node(&mut self, out: &mut Vec<u8>, tree: &Tree, root: EntryId, id: EntryId) {
        if id != root {
            self.open_member(out);
            let mut key = String::new();
            escape_json_string(&tree.node(id).name, &mut key);
            key.push(':');
            out.extend_from_slice(key.as_bytes());
        }
        out.push(b'{');
        self.comma_stack.push(false);

        // Leaf fields are reported for entries whose resource matches the
        // active section: live resources in `upserted`, deletion records in
        // `deleted`. Path-continuity nodes stay plain objects.
        let entry = tree.node(id);
        let matches_section = match self.section {
            Section::Upserted => !entry.deleted,
            Section::Deleted => entry.deleted,
        };
        let Some(res) = entry.resource.as_ref().filter(|_| matches_section) else {
            return;
        };
        let Some(ty) = res.current_type() else {
            return; // placeholder with no value yet: plain object
        };

        let ts = res
            .current
            .as_ref()
            .map_or(entry.last_modified, |s| s.timestamp());
        let mut fields = String::new();
        fields.push_str("\"type\":");
        fields.push_str(&ty.wire_tag().to_string());
        fields.push_str(",\"ts\":");
        fields.push_str(&format_numeric(ts));
        fields.push_str(",\"mandatory\":");
        fields.push_str(if res.variant.is_io() { "true" } else { "false" });
        fields.push_str(",\"new\":");
        fields.push_str(if entry.new { "true" } else { "false" });
        if let Some(sample) = &res.current
            && !matches!(sample.value(), datahub_core::sample::Value::Trigger)
        {
            fields.push_str(",\"value\":");
            fields.push_str(&sample.value().to_json_text());
        }
        out.extend_from_slice(fields.as_bytes());
        if let Some(top) = self.comma_stack.last_mut() {
            *top = true;
        }
    }

    fn end_node(&mut self, out: &mut Vec<u8>, _tree: &Tree, _root: EntryId, _id: EntryId) {
        out.push(b'}');
        self.comma_stack.pop();
    }

    fn end_tree(&mut self, out: &mut Vec<u8>, tree: &Tree, _root: EntryId) {
        match self.section {
            Section::Upserted if tree.deleted_count() > 0 => {
                // Ask for a second pass over the deletion records.
                self.section = Section::Deleted;
                self.request = FormatRequest {
                    scan: true,
                    filter: FilterMask::DELETED,
                };
            }
            _ => {
                out.push(b'}');
                self.request = FormatRequest {
                    scan: false,
                    filter: FilterMask::LIVE,
                };
            }
        }
    }

    fn close(&mut self) {}

    fn request(&self) -> FormatRequest {
        self.request
    }
}
