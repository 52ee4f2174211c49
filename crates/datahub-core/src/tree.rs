//! The Resource Tree: a rooted, named hierarchy backed by a generational
//! arena.
//!
//! Entries own their children; everything else (routes, cursors, handler
//! registrations) refers to entries by [`EntryId`], a generational index
//! that goes stale the moment the entry is released. Paths are absolute
//! `/`-separated strings resolved from the root.

use crate::error::{HubError, Result};
use crate::resource::Resource;
use crate::sample::wall_clock;

/// Generational arena index. A released slot bumps its generation, so every
/// outstanding id for it stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

/// A node in the namespace.
#[derive(Debug)]
pub struct Entry {
    pub name: String,
    pub parent: Option<EntryId>,
    /// Insertion-ordered; names unique within a parent.
    pub children: Vec<EntryId>,
    pub resource: Option<Resource>,
    /// Max of the last structural change and the last accepted value
    /// timestamp.
    pub last_modified: f64,
    /// Set on creation; cleared when a snapshot that traversed this entry
    /// ends.
    pub new: bool,
    /// Deletion record: the entry is retained for the next Deleted-filter
    /// snapshot pass instead of being released.
    pub deleted: bool,
    /// Scratch bit recomputed before each snapshot pass.
    pub relevant: bool,
    /// Structural serial at creation. Entries born after a snapshot froze
    /// the tree are invisible to it.
    pub birth_serial: u64,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Structural operations deferred while the tree is update-paused.
#[derive(Debug)]
pub enum DeferredOp {
    Delete(String),
    FlushDeletions,
    DisableTracking,
}

pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: EntryId,
    serial: u64,
    paused: bool,
    deferred: Vec<DeferredOp>,
    track_deletions: bool,
    deleted_count: usize,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let root_entry = Entry {
            name: String::new(),
            parent: None,
            children: Vec::new(),
            resource: None,
            last_modified: 0.0,
            new: false,
            deleted: false,
            relevant: false,
            birth_serial: 0,
        };
        Self {
            slots: vec![Slot {
                generation: 0,
                entry: Some(root_entry),
            }],
            free: Vec::new(),
            root: EntryId {
                index: 0,
                generation: 0,
            },
            serial: 0,
            paused: false,
            deferred: Vec::new(),
            track_deletions: false,
            deleted_count: 0,
        }
    }

    pub fn root(&self) -> EntryId {
        self.root
    }

    /// Structural serial: bumped by every entry creation or release.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted_count
    }

    pub fn track_deletions(&self) -> bool {
        self.track_deletions
    }

    pub fn set_track_deletions(&mut self, on: bool) {
        self.track_deletions = on;
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Infallible lookup for ids the caller holds by invariant. A stale id
    /// here is a programming error.
    pub fn node(&self, id: EntryId) -> &Entry {
        match self.entry(id) {
            Some(e) => e,
            None => panic!("stale entry id {id:?}"),
        }
    }

    pub fn node_mut(&mut self, id: EntryId) -> &mut Entry {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.entry.is_some() => {
                slot.entry.as_mut().unwrap()
            }
            _ => panic!("stale entry id {id:?}"),
        }
    }

    pub fn resource(&self, id: EntryId) -> Option<&Resource> {
        self.entry(id)?.resource.as_ref()
    }

    pub fn resource_mut(&mut self, id: EntryId) -> Option<&mut Resource> {
        self.entry_mut(id)?.resource.as_mut()
    }

    // -----------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------

    fn split_path(path: &str) -> Result<Vec<&str>> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| HubError::BadParameter(format!("path {path:?} is not absolute")))?;
        if rest.is_empty() {
            return Ok(Vec::new());
        }
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(HubError::BadParameter(format!(
                "path {path:?} has an empty segment"
            )));
        }
        Ok(segments)
    }

    /// Look up an entry by path without creating anything.
    pub fn find(&self, path: &str) -> Option<EntryId> {
        let segments = Self::split_path(path).ok()?;
        let mut cur = self.root;
        for seg in segments {
            cur = self.child_named(cur, seg)?;
        }
        Some(cur)
    }

    fn child_named(&self, parent: EntryId, name: &str) -> Option<EntryId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).name == name)
    }

    /// Resolve a path, creating namespace entries on demand.
    pub fn resolve(&mut self, path: &str) -> Result<EntryId> {
        let segments: Vec<String> = Self::split_path(path)?
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut cur = self.root;
        for seg in segments {
            cur = match self.child_named(cur, &seg) {
                Some(c) => c,
                None => self.add_child(cur, seg),
            };
        }
        Ok(cur)
    }

    fn add_child(&mut self, parent: EntryId, name: String) -> EntryId {
        self.serial += 1;
        let entry = Entry {
            name,
            parent: Some(parent),
            children: Vec::new(),
            resource: None,
            last_modified: wall_clock(),
            new: true,
            deleted: false,
            relevant: false,
            birth_serial: self.serial,
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                EntryId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("arena index overflow");
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                EntryId {
                    index,
                    generation: 0,
                }
            }
        };
        self.node_mut(parent).children.push(id);
        self.touch_structural(parent);
        id
    }

    /// Absolute path of an entry.
    pub fn path_of(&self, id: EntryId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let entry = self.node(c);
            if entry.parent.is_some() {
                parts.push(entry.name.clone());
            }
            cur = entry.parent;
        }
        if parts.is_empty() {
            return "/".to_string();
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    // -----------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------

    pub fn first_child(&self, id: EntryId, include_deleted: bool) -> Option<EntryId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .find(|&c| include_deleted || !self.node(c).deleted)
    }

    pub fn next_sibling(&self, id: EntryId, include_deleted: bool) -> Option<EntryId> {
        let parent = self.node(id).parent?;
        let siblings = &self.node(parent).children;
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings[pos + 1..]
            .iter()
            .copied()
            .find(|&c| include_deleted || !self.node(c).deleted)
    }

    // -----------------------------------------------------------------
    // Modification times
    // -----------------------------------------------------------------

    pub fn touch_structural(&mut self, id: EntryId) {
        let now = wall_clock();
        let entry = self.node_mut(id);
        if now > entry.last_modified {
            entry.last_modified = now;
        }
    }

    pub fn touch_value(&mut self, id: EntryId, ts: f64) {
        let entry = self.node_mut(id);
        if ts > entry.last_modified {
            entry.last_modified = ts;
        }
    }

    pub fn last_modified(&self, id: EntryId) -> f64 {
        self.node(id).last_modified
    }

    // -----------------------------------------------------------------
    // Update pausing (snapshot coordination)
    // -----------------------------------------------------------------

    /// Pause structural mutation. Deletions arriving while paused are
    /// queued and applied on resume; creations proceed but stay invisible
    /// to the running snapshot via their birth serial.
    pub fn start_update(&mut self) {
        self.paused = true;
    }

    /// Resume structural mutation, handing back the deferred operations for
    /// the hub to apply.
    pub fn end_update(&mut self) -> Vec<DeferredOp> {
        self.paused = false;
        std::mem::take(&mut self.deferred)
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn defer(&mut self, op: DeferredOp) {
        self.deferred.push(op);
    }

    // -----------------------------------------------------------------
    // Deletion records & release
    // -----------------------------------------------------------------

    /// Record a deletion: the entry keeps its resource and position but is
    /// skipped by live traversal until flushed.
    pub fn mark_deleted(&mut self, id: EntryId) {
        let entry = self.node_mut(id);
        if !entry.deleted {
            entry.deleted = true;
            self.deleted_count += 1;
        }
        self.touch_structural(id);
    }

    /// Clear a deletion record, e.g. when a resource is re-created at the
    /// same path before the record was flushed.
    pub fn unmark_deleted(&mut self, id: EntryId) {
        let entry = self.node_mut(id);
        if entry.deleted {
            entry.deleted = false;
            self.deleted_count = self.deleted_count.saturating_sub(1);
        }
    }

    /// Physically release every deletion record.
    pub fn flush_deletions(&mut self) {
        let deleted: Vec<EntryId> = self
            .iter_ids()
            .filter(|&id| self.node(id).deleted)
            .collect();
        for id in deleted {
            let entry = self.node_mut(id);
            entry.deleted = false;
            entry.resource = None;
            self.deleted_count = self.deleted_count.saturating_sub(1);
            self.try_release(id);
        }
    }

    /// All live arena ids, in no particular order.
    pub fn iter_ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.entry.as_ref().map(|_| EntryId {
                index: i as u32,
                generation: slot.generation,
            })
        })
    }

    /// Release an entry if nothing keeps it alive (children, resource, or a
    /// deletion record), then walk up releasing newly-empty ancestors.
    pub fn try_release(&mut self, id: EntryId) {
        let mut cur = id;
        loop {
            let entry = match self.entry(cur) {
                Some(e) => e,
                None => return,
            };
            let Some(parent) = entry.parent else {
                return; // never release the root
            };
            if !entry.children.is_empty() || entry.resource.is_some() || entry.deleted {
                return;
            }
            let slot = &mut self.slots[cur.index as usize];
            slot.entry = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(cur.index);
            self.serial += 1;
            self.node_mut(parent).children.retain(|&c| c != cur);
            self.touch_structural(parent);
            cur = parent;
        }
    }
}
