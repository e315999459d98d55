//! The group/entry tree as an arena of index-linked nodes.
//!
//! Groups and entries live in two arenas; parent, children, and entry
//! membership are plain indices. Nothing owns anything through a
//! pointer, so there are no reference cycles and wiping is a linear
//! walk. The synthetic root is node 0 and carries no [`Group`] record;
//! it is the format's "level -1" anchor, never serialized.
//!
//! [`assemble`] rebuilds the tree from the flat serialized sequences:
//! the format stores groups pre-order with a per-record depth level and
//! entries with a group-id foreign key.

use crate::entry::{Entry, EntryRecord};
use crate::error::KdbError;
use crate::group::Group;
use std::collections::{HashMap, HashSet};

/// Index of a group node. Stable for the node's lifetime; slots of
/// deleted subtrees are never reused within one database instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Index of an entry slot, stable the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) usize);

#[derive(Debug)]
struct Node {
    /// `None` only for the synthetic root.
    group: Option<Group>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    entries: Vec<EntryId>,
}

#[derive(Debug)]
struct EntrySlot {
    entry: Entry,
    parent: NodeId,
}

/// The arena. All structural mutation goes through here so the index
/// invariants live in one file.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    entries: Vec<Option<EntrySlot>>,
}

pub(crate) const ROOT: NodeId = NodeId(0);

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// An empty tree: just the synthetic root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                group: None,
                parent: None,
                children: Vec::new(),
                entries: Vec::new(),
            })],
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        ROOT
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// The group record at `id`; `None` for the root and vacated slots.
    #[must_use]
    pub fn group(&self, id: NodeId) -> Option<&Group> {
        self.node(id).and_then(|n| n.group.as_ref())
    }

    #[must_use]
    pub fn group_mut(&mut self, id: NodeId) -> Option<&mut Group> {
        self.node_mut(id).and_then(|n| n.group.as_mut())
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |n| &n.children)
    }

    #[must_use]
    pub fn node_entries(&self, id: NodeId) -> &[EntryId] {
        self.node(id).map_or(&[], |n| &n.entries)
    }

    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0).and_then(Option::as_ref).map(|s| &s.entry)
    }

    #[must_use]
    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|s| &mut s.entry)
    }

    #[must_use]
    pub fn entry_parent(&self, id: EntryId) -> Option<NodeId> {
        self.entries.get(id.0).and_then(Option::as_ref).map(|s| s.parent)
    }

    /// Attach `group` as the last child of `parent`. Returns `None` if
    /// `parent` does not exist.
    pub fn add_group(&mut self, parent: NodeId, group: Group) -> Option<NodeId> {
        self.node(parent)?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            group: Some(group),
            parent: Some(parent),
            children: Vec::new(),
            entries: Vec::new(),
        }));
        if let Some(p) = self.node_mut(parent) {
            p.children.push(id);
        }
        Some(id)
    }

    /// Attach `entry` to `parent`. Returns `None` if `parent` does not
    /// exist or is the synthetic root (entries always live in a group).
    pub fn add_entry(&mut self, parent: NodeId, entry: Entry) -> Option<EntryId> {
        if parent == ROOT || self.node(parent).is_none() {
            return None;
        }
        let id = EntryId(self.entries.len());
        self.entries.push(Some(EntrySlot { entry, parent }));
        if let Some(p) = self.node_mut(parent) {
            p.entries.push(id);
        }
        Some(id)
    }

    /// Move an entry under another group. No-op on stale ids.
    pub fn move_entry(&mut self, id: EntryId, to: NodeId) -> bool {
        if to == ROOT || self.node(to).is_none() {
            return false;
        }
        let Some(from) = self.entry_parent(id) else {
            return false;
        };
        if from == to {
            return true;
        }
        if let Some(node) = self.node_mut(from) {
            node.entries.retain(|&e| e != id);
        }
        if let Some(node) = self.node_mut(to) {
            node.entries.push(id);
        }
        if let Some(slot) = self.entries.get_mut(id.0).and_then(Option::as_mut) {
            slot.parent = to;
        }
        true
    }

    /// Detach and take an entry, leaving its slot vacated.
    pub fn remove_entry(&mut self, id: EntryId) -> Option<Entry> {
        let slot = self.entries.get_mut(id.0).and_then(Option::take)?;
        if let Some(node) = self.node_mut(slot.parent) {
            node.entries.retain(|&e| e != id);
        }
        Some(slot.entry)
    }

    /// Detach `id` from its parent and vacate the whole subtree,
    /// dropping (and thereby wiping) every contained entry. The root
    /// cannot be removed.
    pub fn remove_subtree(&mut self, id: NodeId) {
        if id == ROOT || self.node(id).is_none() {
            return;
        }
        if let Some(parent) = self.parent(id) {
            if let Some(p) = self.node_mut(parent) {
                p.children.retain(|&c| c != id);
            }
        }
        for node_id in self.descendants(id) {
            if let Some(node) = self.nodes.get_mut(node_id.0).and_then(Option::take) {
                for entry_id in node.entries {
                    let _ = self.entries.get_mut(entry_id.0).and_then(Option::take);
                }
            }
        }
    }

    /// `id` and every group below it, pre-order.
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.node(current).is_none() {
                continue;
            }
            out.push(current);
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Every entry in the subtree rooted at `id`, pre-order by group.
    #[must_use]
    pub fn descendant_entries(&self, id: NodeId) -> Vec<EntryId> {
        self.descendants(id)
            .into_iter()
            .flat_map(|n| self.node_entries(n).to_vec())
            .collect()
    }

    /// All non-synthetic groups, pre-order.
    #[must_use]
    pub fn iter_groups(&self) -> Vec<NodeId> {
        self.descendants(ROOT)
            .into_iter()
            .filter(|&n| n != ROOT)
            .collect()
    }

    /// All live entries, grouped by their parent in pre-order.
    #[must_use]
    pub fn iter_entries(&self) -> Vec<EntryId> {
        self.descendant_entries(ROOT)
    }

    /// Depth of a node below the root: top-level groups are 0.
    #[must_use]
    pub fn level_of(&self, id: NodeId) -> u16 {
        let mut level = 0u16;
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if parent == ROOT {
                break;
            }
            level = level.saturating_add(1);
            current = parent;
        }
        level
    }

    /// True if `id` or any of its ancestors carries the deleted flag.
    #[must_use]
    pub fn is_in_deleted_subtree(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if self.group(node_id).is_some_and(|g| g.is_deleted) {
                return true;
            }
            current = self.parent(node_id);
        }
        false
    }

    /// Ids currently used by live groups.
    #[must_use]
    pub fn used_group_ids(&self) -> HashSet<i32> {
        self.iter_groups()
            .into_iter()
            .filter_map(|n| self.group(n).map(|g| g.id))
            .collect()
    }
}

/// Smallest free id after the current maximum, wrapping past `i32::MAX`
/// and probing upward over occupied slots. Ids stay >= 1.
pub(crate) fn allocate_group_id(used: &HashSet<i32>) -> i32 {
    let max = used.iter().copied().max().unwrap_or(0);
    let mut candidate = max.wrapping_add(1);
    loop {
        if candidate < 1 {
            candidate = 1;
        }
        if !used.contains(&candidate) {
            return candidate;
        }
        candidate = candidate.wrapping_add(1);
    }
}

/// Result of [`assemble`]. Meta streams keep their parsed records (the
/// group id included) so a later save re-emits them verbatim.
#[derive(Debug)]
pub(crate) struct Assembled {
    pub(crate) tree: Tree,
    pub(crate) meta_entries: Vec<EntryRecord>,
    pub(crate) warnings: Vec<String>,
}

/// Rebuild the tree from the flat serialized sequences.
///
/// Groups arrive in their on-disk order with per-record levels. The
/// reference writer emits a pre-order traversal, which this sweep
/// inverts: for each level, walking the sequence in order, a group at
/// that level attaches to the most recently seen group one level up
/// (or the root for level 0). Entries then attach by group id; meta
/// streams are diverted to the sidecar list.
///
/// # Errors
///
/// [`KdbError::OrphanedEntry`] if a non-meta entry references an
/// unknown group id.
pub(crate) fn assemble(
    groups: Vec<Group>,
    entries: Vec<EntryRecord>,
) -> Result<Assembled, KdbError> {
    let mut tree = Tree::new();
    let mut warnings = Vec::new();

    let max_level = groups.iter().map(|g| g.level).max().unwrap_or(0);
    let mut slots: Vec<Option<Group>> = groups.into_iter().map(Some).collect();
    let levels: Vec<u16> = slots
        .iter()
        .map(|g| g.as_ref().map_or(0, |g| g.level))
        .collect();
    let mut placed: Vec<Option<NodeId>> = vec![None; slots.len()];

    for level in 0..=max_level {
        let mut current_parent = ROOT;
        for index in 0..slots.len() {
            if levels[index] == level {
                if let Some(group) = slots[index].take() {
                    // add_group only fails on a dangling parent, which
                    // cannot happen here.
                    placed[index] = tree.add_group(current_parent, group);
                }
            } else if level >= 1 && levels[index] == level - 1 {
                if let Some(node) = placed[index] {
                    current_parent = node;
                }
            }
        }
    }

    // Resolve group ids, fixing duplicates rather than refusing the file.
    let mut by_id: HashMap<i32, NodeId> = HashMap::new();
    let mut used: HashSet<i32> = HashSet::new();
    for node_id in tree.iter_groups() {
        let Some(group) = tree.group(node_id) else {
            continue;
        };
        let id = group.id;
        if used.contains(&id) {
            let fresh = allocate_group_id(&used);
            warnings.push(format!("duplicate group id {id} reassigned to {fresh}"));
            log::warn!("duplicate group id {id} reassigned to {fresh}");
            if let Some(group) = tree.group_mut(node_id) {
                group.id = fresh;
            }
            used.insert(fresh);
            by_id.insert(fresh, node_id);
        } else {
            used.insert(id);
            by_id.insert(id, node_id);
        }
    }

    let mut meta_entries = Vec::new();
    for record in entries {
        if record.entry.is_meta_stream() {
            meta_entries.push(record);
            continue;
        }
        let Some(&node) = by_id.get(&record.group_id) else {
            return Err(KdbError::OrphanedEntry {
                group_id: record.group_id,
            });
        };
        let _ = tree.add_entry(node, record.entry);
    }

    Ok(Assembled {
        tree,
        meta_entries,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
