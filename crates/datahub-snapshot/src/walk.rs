//! The tree-walk state machine and per-pass relevance annotation.
//!
//! The walker is state-as-data: each [`Walker::step`] consumes the current
//! state, returns one event, and leaves the next state behind, so deferred
//! re-entry between buffer drains is just "call `step` again".

use datahub_core::tree::{Entry, EntryId, Tree};

/// Snapshot pass filters, combinable as a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterMask(u8);

impl FilterMask {
    /// Entries with the `new` flag set.
    pub const CREATED: FilterMask = FilterMask(1);
    /// Entries modified after the snapshot's `since` timestamp.
    pub const NORMAL: FilterMask = FilterMask(1 << 1);
    /// Entries retained as deletion records.
    pub const DELETED: FilterMask = FilterMask(1 << 2);

    /// The default live view: created or modified entries.
    pub const LIVE: FilterMask = FilterMask(1 | (1 << 1));

    pub fn contains(self, other: FilterMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for FilterMask {
    type Output = FilterMask;
    fn bitor(self, rhs: FilterMask) -> FilterMask {
        FilterMask(self.0 | rhs.0)
    }
}

/// Whether an entry itself matches the active filter.
fn entry_matches(entry: &Entry, filter: FilterMask, since: f64) -> bool {
    if entry.deleted {
        return filter.contains(FilterMask::DELETED);
    }
    (filter.contains(FilterMask::CREATED) && entry.new)
        || (filter.contains(FilterMask::NORMAL) && entry.last_modified > since)
}

/// Annotate the subtree under `root` with `relevant` bits for one pass.
///
/// An entry is relevant when it matches the filter or any descendant does
/// (path continuity). Entries born after `frozen_serial` are invisible: the
/// snapshot reflects the topology frozen when updates were paused. The root
/// is always relevant. Returns the number of entries that matched the
/// filter themselves.
pub fn mark_relevance(
    tree: &mut Tree,
    root: EntryId,
    filter: FilterMask,
    since: f64,
    frozen_serial: u64,
) -> usize {
    fn mark(
        tree: &mut Tree,
        id: EntryId,
        filter: FilterMask,
        since: f64,
        frozen_serial: u64,
        matched: &mut usize,
    ) -> bool {
        if tree.node(id).birth_serial > frozen_serial {
            tree.node_mut(id).relevant = false;
            return false;
        }
        let children = tree.node(id).children.clone();
        let own = entry_matches(tree.node(id), filter, since);
        if own {
            *matched += 1;
        }
        let mut any = own;
        for child in children {
            if mark(tree, child, filter, since, frozen_serial, matched) {
                any = true;
            }
        }
        tree.node_mut(id).relevant = any;
        any
    }

    let mut matched = 0;
    mark(tree, root, filter, since, frozen_serial, &mut matched);
    tree.node_mut(root).relevant = true;
    matched
}

/// One step's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEvent {
    /// Entered a relevant node (pre-order).
    Node(EntryId),
    /// Left a node after its children (post-order).
    NodeDone(EntryId),
    /// The pass is complete.
    Finished,
}

/// Walker states: `NodeBegin → {NodeChildren | NodeEnd} → NodeSibling →
/// {NodeBegin | NodeEnd | TreeEnd}`. The children/sibling moves are
/// computed inside [`Walker::step`]; the stored state is what the next
/// step acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    NodeBegin(EntryId),
    NodeEnd(EntryId),
    TreeEnd,
}

/// Depth-first, insertion-ordered traversal of the relevant subtree.
pub struct Walker {
    root: EntryId,
    state: WalkState,
    /// Entries visited across the pass; the engine clears their `new` flags
    /// when the snapshot ends.
    pub visited: Vec<EntryId>,
}

impl Walker {
    pub fn new(root: EntryId) -> Self {
        Self {
            root,
            state: WalkState::NodeBegin(root),
            visited: Vec::new(),
        }
    }

    /// Advance the state machine by one transition.
    pub fn step(&mut self, tree: &Tree) -> WalkEvent {
        match self.state {
            WalkState::NodeBegin(id) => {
                self.visited.push(id);
                self.state = match first_relevant_child(tree, id) {
                    Some(child) => WalkState::NodeBegin(child),
                    None => WalkState::NodeEnd(id),
                };
                WalkEvent::Node(id)
            }
            WalkState::NodeEnd(id) => {
                self.state = if id == self.root {
                    WalkState::TreeEnd
                } else {
                    match next_relevant_sibling(tree, id) {
                        Some(sib) => WalkState::NodeBegin(sib),
                        None => match tree.node(id).parent {
                            Some(parent) => WalkState::NodeEnd(parent),
                            None => WalkState::TreeEnd,
                        },
                    }
                };
                WalkEvent::NodeDone(id)
            }
            WalkState::TreeEnd => WalkEvent::Finished,
        }
    }
}

fn first_relevant_child(tree: &Tree, id: EntryId) -> Option<EntryId> {
    let mut cur = tree.first_child(id, true);
    while let Some(c) = cur {
        if tree.node(c).relevant {
            return Some(c);
        }
        cur = tree.next_sibling(c, true);
    }
    None
}

fn next_relevant_sibling(tree: &Tree, id: EntryId) -> Option<EntryId> {
    let mut cur = tree.next_sibling(id, true);
    while let Some(c) = cur {
        if tree.node(c).relevant {
            return Some(c);
        }
        cur = tree.next_sibling(c, true);
    }
    None
}
