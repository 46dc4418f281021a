//! The roster: an in-memory snapshot of a versioned filesystem tree (spec
//! §3 "Roster", §4.2).
//!
//! Nodes live in a flat arena (`BTreeMap<NodeId, Node>`); parent/child
//! links are [`NodeId`] values rather than reference-counted pointers, so
//! the graph cannot have reference cycles and deep copy is just cloning
//! the map (spec §9 "Ownership of child nodes").

pub mod editable;

use std::collections::BTreeMap;

use crate::error::{DomainError, RosterError};
use crate::ident::{ContentHash, NodeId, NodeIdSource};
use crate::path::{PathComponent, RepoPath};

/// A node's content, either a directory's children or a file's hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// A directory: an ordered mapping from child basename to child id.
    Dir(BTreeMap<PathComponent, NodeId>),
    /// A file: the hash of its content.
    File(ContentHash),
}

impl NodeKind {
    /// True if this is a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self, Self::Dir(_))
    }

    /// True if this is a file.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

/// One attribute value: live (in effect) or dormant (cleared, but the key
/// still has history — spec §3 "Attribute"). A dormant attribute always
/// has an empty value (spec §9's stricter interpretation).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttrValue {
    /// Whether the attribute is currently in effect.
    pub live: bool,
    /// The attribute's value; must be empty when `live` is `false`.
    pub value: String,
}

impl AttrValue {
    /// A live attribute with the given value.
    #[must_use]
    pub fn live(value: impl Into<String>) -> Self {
        Self {
            live: true,
            value: value.into(),
        }
    }

    /// A dormant (cleared) attribute.
    #[must_use]
    pub fn dormant() -> Self {
        Self {
            live: false,
            value: String::new(),
        }
    }
}

/// A single node: identity, parent, basename, attributes, and either
/// directory children or file content (spec §3 "Node").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    id: NodeId,
    /// `None` only for the root.
    parent: Option<NodeId>,
    /// Empty only for the root.
    name: PathComponent,
    attrs: BTreeMap<String, AttrValue>,
    kind: NodeKind,
}

impl Node {
    /// This node's id.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// This node's parent, or `None` for the root or a detached node.
    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// This node's basename (empty for the root).
    #[must_use]
    pub const fn name(&self) -> &PathComponent {
        &self.name
    }

    /// True if this node is currently detached (and not the root).
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.parent.is_none() && !self.name.is_root()
    }

    /// This node's attribute map.
    #[must_use]
    pub const fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        &self.attrs
    }

    /// This node's kind (file or directory).
    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The file content hash, if this is a file.
    #[must_use]
    pub const fn file_content(&self) -> Option<ContentHash> {
        match self.kind {
            NodeKind::File(hash) => Some(hash),
            NodeKind::Dir(_) => None,
        }
    }

    /// The directory's children, if this is a directory.
    #[must_use]
    pub const fn children(&self) -> Option<&BTreeMap<PathComponent, NodeId>> {
        match &self.kind {
            NodeKind::Dir(children) => Some(children),
            NodeKind::File(_) => None,
        }
    }
}

/// The location a node was last detached from, recorded so that
/// `attach_node` can forbid immediately re-attaching at the exact same
/// spot (spec §4.2).
#[derive(Clone, Debug, PartialEq, Eq)]
struct OldLocation {
    parent: NodeId,
    name: PathComponent,
}

/// A set of nodes forming a versioned tree, plus in-flight detached nodes
/// and bookkeeping for the attach-after-detach restriction (spec §3, §4.2).
#[derive(Clone, Debug, Default)]
pub struct Roster {
    nodes: BTreeMap<NodeId, Node>,
    root: Option<NodeId>,
    old_locations: BTreeMap<NodeId, OldLocation>,
}

impl PartialEq for Roster {
    fn eq(&self, other: &Self) -> bool {
        // Old-locations bookkeeping is excluded from equality (spec §4.2
        // "Deep copy semantics").
        self.nodes == other.nodes && self.root == other.root
    }
}
impl Eq for Roster {}

impl Roster {
    /// An empty roster with no root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a root directory has been attached.
    #[must_use]
    pub const fn has_root(&self) -> bool {
        self.root.is_some()
    }

    /// The root node's id, if any.
    #[must_use]
    pub const fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    /// True if `id` names a node in this roster (attached or detached).
    #[must_use]
    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Look up a node by id.
    pub fn get_node(&self, id: NodeId) -> Result<&Node, RosterError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| DomainError::NoSuchNode { id }.into())
    }

    fn get_node_mut(&mut self, id: NodeId) -> Result<&mut Node, RosterError> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| DomainError::NoSuchNode { id }.into())
    }

    /// Resolve a path to the node it names.
    pub fn get_node_by_path(&self, path: &RepoPath) -> Result<&Node, RosterError> {
        self.resolve(path).and_then(|id| self.get_node(id))
    }

    /// True if `path` resolves to a node in this roster.
    #[must_use]
    pub fn has_path(&self, path: &RepoPath) -> bool {
        self.resolve(path).is_ok()
    }

    fn resolve(&self, path: &RepoPath) -> Result<NodeId, RosterError> {
        let mut components = path.components();
        let Some(first) = components.next() else {
            return Err(DomainError::NoSuchPath { path: path.clone() }.into());
        };
        if !first.is_root() {
            return Err(DomainError::NoSuchPath { path: path.clone() }.into());
        }
        let mut cur = self.root.ok_or_else(|| DomainError::NoSuchPath { path: path.clone() })?;
        for comp in components {
            let node = self.get_node(cur)?;
            let children = node
                .children()
                .ok_or_else(|| RosterError::from(DomainError::WrongNodeKind { id: cur, expected: "directory" }))?;
            cur = *children
                .get(comp)
                .ok_or_else(|| DomainError::NoSuchPath { path: path.clone() })?;
        }
        Ok(cur)
    }

    /// Resolve a path to the node id it names (public wrapper over the
    /// internal path-walk, used by merge unification to cross-reference
    /// the same path between two independently-edited rosters).
    pub fn resolve_path(&self, path: &RepoPath) -> Result<NodeId, RosterError> {
        self.resolve(path)
    }

    /// Compute the full path of a node by walking parent links to the root.
    pub fn get_path(&self, id: NodeId) -> Result<RepoPath, RosterError> {
        let mut components = Vec::new();
        let mut cur = id;
        loop {
            let node = self.get_node(cur)?;
            components.push(node.name.clone());
            match node.parent {
                Some(parent) => cur = parent,
                None => break,
            }
        }
        components.reverse();
        let mut path = RepoPath::root();
        for comp in components.into_iter().skip(1) {
            path = path.child(comp);
        }
        Ok(path)
    }

    /// Create a new directory node in the detached state and return its id.
    pub fn create_dir_node(&mut self, id_source: &mut dyn NodeIdSource) -> NodeId {
        let id = id_source.next();
        self.insert_dir_node(id).expect("freshly drawn id cannot collide");
        id
    }

    /// Create a new file node in the detached state and return its id.
    pub fn create_file_node(&mut self, content: ContentHash, id_source: &mut dyn NodeIdSource) -> NodeId {
        let id = id_source.next();
        self.insert_file_node(id, content).expect("freshly drawn id cannot collide");
        id
    }

    /// Insert a new detached directory node under a caller-chosen id,
    /// rather than drawing one from a [`NodeIdSource`]. Used to replay a
    /// change set or roster delta whose `add_dir` entries already name the
    /// id the new node must have (spec §4.3, §4.6).
    pub fn insert_dir_node(&mut self, id: NodeId) -> Result<(), RosterError> {
        if self.nodes.contains_key(&id) {
            return Err(crate::bug!("node id {id} already exists in this roster"));
        }
        self.nodes.insert(
            id,
            Node {
                id,
                parent: None,
                name: PathComponent::new("detached").expect("valid placeholder"),
                attrs: BTreeMap::new(),
                kind: NodeKind::Dir(BTreeMap::new()),
            },
        );
        Ok(())
    }

    /// Insert a new detached file node under a caller-chosen id. See
    /// [`Roster::insert_dir_node`].
    pub fn insert_file_node(&mut self, id: NodeId, content: ContentHash) -> Result<(), RosterError> {
        if self.nodes.contains_key(&id) {
            return Err(crate::bug!("node id {id} already exists in this roster"));
        }
        self.nodes.insert(
            id,
            Node {
                id,
                parent: None,
                name: PathComponent::new("detached").expect("valid placeholder"),
                attrs: BTreeMap::new(),
                kind: NodeKind::File(content),
            },
        );
        Ok(())
    }

    /// Attach a detached node at `path`.
    ///
    /// Fails if `path` is already occupied, the parent is missing or not a
    /// directory, `path` is the root but this roster already has one, the
    /// node is not detached, or the node was just detached from this exact
    /// `(parent, name)` (spec §4.2).
    pub fn attach_node(&mut self, id: NodeId, path: &RepoPath) -> Result<(), RosterError> {
        let node = self.get_node(id)?;
        if !node.is_detached() && node.parent.is_some() {
            return Err(DomainError::NotDetached { id }.into());
        }

        if path.is_root() {
            if self.has_root() {
                return Err(DomainError::PathOccupied { path: path.clone() }.into());
            }
            self.nodes.get_mut(&id).expect("checked above").name = PathComponent::root();
            self.root = Some(id);
            self.old_locations.clear();
            return Ok(());
        }

        let parent_path = path.parent().ok_or_else(|| DomainError::NoSuchPath { path: path.clone() })?;
        let basename = path.basename().ok_or_else(|| DomainError::NoSuchPath { path: path.clone() })?.clone();
        let parent_id = self.resolve(&parent_path)?;

        if let Some(old) = self.old_locations.get(&id) {
            if old.parent == parent_id && old.name == basename {
                return Err(DomainError::NoOpEdit {
                    detail: format!("cannot re-attach node {id} at the exact location it was detached from"),
                }
                .into());
            }
        }

        {
            let parent_node = self.get_node(parent_id)?;
            let children = parent_node
                .children()
                .ok_or_else(|| RosterError::from(DomainError::WrongNodeKind { id: parent_id, expected: "directory" }))?;
            if children.contains_key(&basename) {
                return Err(DomainError::PathOccupied { path: path.clone() }.into());
            }
        }

        {
            let parent_node = self.get_node_mut(parent_id)?;
            match &mut parent_node.kind {
                NodeKind::Dir(children) => {
                    children.insert(basename.clone(), id);
                }
                NodeKind::File(_) => unreachable!("checked above"),
            }
        }
        let node = self.get_node_mut(id)?;
        node.parent = Some(parent_id);
        node.name = basename;
        self.old_locations.clear();
        Ok(())
    }

    /// Detach the node named by `path`, returning its id. Fails on the
    /// root.
    pub fn detach_node(&mut self, path: &RepoPath) -> Result<NodeId, RosterError> {
        if path.is_root() || path.is_none() {
            return Err(DomainError::WrongNodeKind { id: self.root.unwrap_or(NodeId::ROOT), expected: "non-root" }.into());
        }
        let id = self.resolve(path)?;
        let node = self.get_node(id)?;
        let parent_id = node.parent.expect("non-root node has a parent");
        let name = node.name.clone();

        let parent_node = self.get_node_mut(parent_id)?;
        match &mut parent_node.kind {
            NodeKind::Dir(children) => {
                children.remove(&name);
            }
            NodeKind::File(_) => unreachable!("resolve walked through a directory"),
        }

        let node = self.get_node_mut(id)?;
        node.parent = None;
        self.old_locations.insert(id, OldLocation { parent: parent_id, name });
        Ok(id)
    }

    /// Permanently remove a detached node. Fails if it is still attached
    /// or (for a directory) non-empty.
    pub fn drop_detached_node(&mut self, id: NodeId) -> Result<(), RosterError> {
        let node = self.get_node(id)?;
        if node.parent.is_some() || Some(id) == self.root {
            return Err(DomainError::NotDetached { id }.into());
        }
        if let Some(children) = node.children() {
            if !children.is_empty() {
                return Err(DomainError::DirectoryNotEmpty { id }.into());
            }
        }
        self.nodes.remove(&id);
        self.old_locations.remove(&id);
        Ok(())
    }

    /// Replace a file's content, failing unless it currently holds
    /// `old_content` and `old_content != new_content`.
    pub fn apply_delta(&mut self, path: &RepoPath, old_content: ContentHash, new_content: ContentHash) -> Result<(), RosterError> {
        let id = self.resolve(path)?;
        let node = self.get_node_mut(id)?;
        match &mut node.kind {
            NodeKind::File(current) => {
                if *current != old_content {
                    return Err(DomainError::ContentMismatch { id }.into());
                }
                if old_content == new_content {
                    return Err(DomainError::NoOpEdit {
                        detail: format!("delta on node {id} would not change its content"),
                    }
                    .into());
                }
                *current = new_content;
                Ok(())
            }
            NodeKind::Dir(_) => Err(DomainError::WrongNodeKind { id, expected: "file" }.into()),
        }
    }

    /// Set an attribute on the node at `path`. Rejects a dormant value
    /// (`live: false`) carrying a non-empty value.
    pub fn set_attr(&mut self, path: &RepoPath, key: &str, value: AttrValue) -> Result<(), RosterError> {
        if !value.live && !value.value.is_empty() {
            return Err(DomainError::NoOpEdit {
                detail: format!("dormant attribute {key:?} must have an empty value"),
            }
            .into());
        }
        let id = self.resolve(path)?;
        let node = self.get_node_mut(id)?;
        node.attrs.insert(key.to_owned(), value);
        Ok(())
    }

    /// Clear (mark dormant) an attribute on the node at `path`.
    pub fn clear_attr(&mut self, path: &RepoPath, key: &str) -> Result<(), RosterError> {
        let id = self.resolve(path)?;
        let node = self.get_node_mut(id)?;
        node.attrs.insert(key.to_owned(), AttrValue::dormant());
        Ok(())
    }

    /// Change a node's id from `old` to `new`, fixing up its parent's
    /// children map, its own children's parent pointers, and the root
    /// pointer if `old` was the root. Used by merge unification (spec
    /// §4.5) to rewrite independently-assigned temporary ids onto a
    /// shared permanent id. Fails if `new` is already in use.
    pub fn renumber_node(&mut self, old: NodeId, new: NodeId) -> Result<(), RosterError> {
        if self.nodes.contains_key(&new) {
            return Err(crate::bug!("cannot renumber node {old} to {new}: {new} already exists"));
        }
        let mut node = self.nodes.remove(&old).ok_or(DomainError::NoSuchNode { id: old })?;

        if let Some(parent_id) = node.parent {
            let parent = self.get_node_mut(parent_id)?;
            match &mut parent.kind {
                NodeKind::Dir(children) => {
                    children.insert(node.name.clone(), new);
                }
                NodeKind::File(_) => return Err(crate::bug!("node {old}'s parent {parent_id} is not a directory")),
            }
        }
        if let NodeKind::Dir(children) = &node.kind {
            let child_ids: Vec<NodeId> = children.values().copied().collect();
            for child_id in child_ids {
                self.get_node_mut(child_id)?.parent = Some(new);
            }
        }
        if self.root == Some(old) {
            self.root = Some(new);
        }
        node.id = new;
        self.nodes.insert(new, node);
        self.old_locations.remove(&old);
        Ok(())
    }

    /// Iterate all nodes in id order (used by the parallel iterator;
    /// depth-first order is [`Roster::walk_depth_first`]).
    pub fn all_nodes(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Number of nodes (attached and detached) in this roster.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Depth-first, directory-children-sorted walk from the root,
    /// defining the canonical serialization order (spec §3, §6).
    #[must_use]
    pub fn walk_depth_first(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.walk_from(root, &mut out);
        }
        out
    }

    fn walk_from(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        if let Ok(node) = self.get_node(id) {
            if let Some(children) = node.children() {
                for child_id in children.values() {
                    self.walk_from(*child_id, out);
                }
            }
        }
    }

    /// Check the structural invariants of spec §3/§8: exactly one root,
    /// every non-root parent resolves to a directory in this roster, no
    /// orphans, directory children agree with child parent/name, no
    /// cycles, no duplicate attribute maps, dormant attrs have empty
    /// values, no two children of one directory share a basename (the
    /// last is enforced structurally by the `BTreeMap<PathComponent, _>`
    /// children map, so it cannot fail here).
    pub fn check_sane(&self) -> Result<(), RosterError> {
        let Some(root) = self.root else {
            if self.nodes.is_empty() {
                return Ok(());
            }
            return Err(crate::bug!("roster has nodes but no root"));
        };
        let root_node = self.get_node(root)?;
        if root_node.parent.is_some() || !root_node.name.is_root() {
            return Err(crate::bug!("root node must have no parent and an empty name"));
        }

        let mut visited = std::collections::BTreeSet::new();
        self.check_subtree(root, &mut visited)?;

        for (id, node) in &self.nodes {
            if *id == root {
                continue;
            }
            if node.parent.is_none() {
                // Detached nodes are legal in-flight, but aren't reachable
                // from the root and so are skipped by check_subtree; they
                // must still not claim to be the root.
                if node.name.is_root() {
                    return Err(crate::bug!("non-root node {id} has an empty name"));
                }
                continue;
            }
            if !visited.contains(id) {
                return Err(crate::bug!("node {id} has a parent but is unreachable from the root (orphan or cycle)"));
            }
            for attr in node.attrs.values() {
                if !attr.live && !attr.value.is_empty() {
                    return Err(crate::bug!("node {id} has a dormant attribute with a non-empty value"));
                }
            }
        }
        Ok(())
    }

    fn check_subtree(&self, id: NodeId, visited: &mut std::collections::BTreeSet<NodeId>) -> Result<(), RosterError> {
        if !visited.insert(id) {
            return Err(crate::bug!("cycle detected at node {id}"));
        }
        let node = self.get_node(id)?;
        if let Some(children) = node.children() {
            for (name, child_id) in children {
                let child = self.get_node(*child_id)?;
                if child.parent != Some(id) || &child.name != name {
                    return Err(crate::bug!(
                        "directory {id}'s children map disagrees with child {child_id}'s parent/name"
                    ));
                }
                self.check_subtree(*child_id, visited)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::PermanentIdSource;

    fn fresh_roster_with_root() -> (Roster, PermanentIdSource) {
        let mut r = Roster::new();
        let mut ids = PermanentIdSource::starting_at(1);
        let root = r.create_dir_node(&mut ids);
        r.attach_node(root, &RepoPath::root()).expect("attach root");
        (r, ids)
    }

    #[test]
    fn empty_root_roster_is_sane() {
        let (r, _) = fresh_roster_with_root();
        r.check_sane().expect("sane");
        assert!(r.has_root());
    }

    #[test]
    fn add_file_then_rename_then_delta() {
        let (mut r, mut ids) = fresh_roster_with_root();
        let foo_id = r.create_file_node(ContentHash::from_hex(&"aa".repeat(20)).expect("hex"), &mut ids);
        r.attach_node(foo_id, &RepoPath::parse("foo").expect("path")).expect("attach");
        r.check_sane().expect("sane");

        let detached = r.detach_node(&RepoPath::parse("foo").expect("path")).expect("detach");
        assert_eq!(detached, foo_id);
        r.attach_node(foo_id, &RepoPath::parse("bar").expect("path")).expect("attach renamed");
        r.check_sane().expect("sane");

        let old = ContentHash::from_hex(&"aa".repeat(20)).expect("hex");
        let new = ContentHash::from_hex(&"bb".repeat(20)).expect("hex");
        r.apply_delta(&RepoPath::parse("bar").expect("path"), old, new).expect("delta");
        assert_eq!(
            r.get_node_by_path(&RepoPath::parse("bar").expect("path"))
                .expect("node")
                .file_content(),
            Some(new)
        );
    }

    #[test]
    fn cannot_reattach_to_exact_old_location() {
        let (mut r, mut ids) = fresh_roster_with_root();
        let foo_id = r.create_file_node(ContentHash::NULL, &mut ids);
        r.attach_node(foo_id, &RepoPath::parse("foo").expect("path")).expect("attach");
        r.detach_node(&RepoPath::parse("foo").expect("path")).expect("detach");
        let err = r.attach_node(foo_id, &RepoPath::parse("foo").expect("path")).unwrap_err();
        assert!(matches!(err, RosterError::Domain(DomainError::NoOpEdit { .. })));
    }

    #[test]
    fn drop_nonempty_directory_fails() {
        let (mut r, mut ids) = fresh_roster_with_root();
        let dir_id = r.create_dir_node(&mut ids);
        r.attach_node(dir_id, &RepoPath::parse("d").expect("path")).expect("attach");
        let file_id = r.create_file_node(ContentHash::NULL, &mut ids);
        r.attach_node(file_id, &RepoPath::parse("d/f").expect("path")).expect("attach");
        let detached = r.detach_node(&RepoPath::parse("d").expect("path")).expect("detach");
        let err = r.drop_detached_node(detached).unwrap_err();
        assert!(matches!(err, RosterError::Domain(DomainError::DirectoryNotEmpty { .. })));
    }

    #[test]
    fn deep_copy_is_independent() {
        let (mut r, mut ids) = fresh_roster_with_root();
        let foo_id = r.create_file_node(ContentHash::NULL, &mut ids);
        r.attach_node(foo_id, &RepoPath::parse("foo").expect("path")).expect("attach");
        let mut copy = r.clone();
        copy.detach_node(&RepoPath::parse("foo").expect("path")).expect("detach in copy");
        assert!(r.has_path(&RepoPath::parse("foo").expect("path")));
        assert!(!copy.has_path(&RepoPath::parse("foo").expect("path")));
    }

    #[test]
    fn depth_first_walk_is_sorted() {
        let (mut r, mut ids) = fresh_roster_with_root();
        for name in ["zeta", "alpha", "mid"] {
            let id = r.create_file_node(ContentHash::NULL, &mut ids);
            r.attach_node(id, &RepoPath::parse(name).expect("path")).expect("attach");
        }
        let order: Vec<_> = r
            .walk_depth_first()
            .into_iter()
            .skip(1)
            .map(|id| r.get_node(id).expect("node").name().to_string())
            .collect();
        assert_eq!(order, vec!["alpha", "mid", "zeta"]);
    }
}
