//! The editable-tree adapter: a thin capability object the change-set
//! applier edits through, with three variants (spec §4.2):
//!
//! - [`BaseEditableTree`]: plain roster operations.
//! - [`MergeEditableTree`]: also records every newly created id so the
//!   unification pass ([`crate::merge::builder`]) can find them.
//! - [`MarkedEditableTree`]: also updates a [`MarkingMap`] in lockstep.

use std::collections::BTreeSet;

use crate::error::RosterError;
use crate::ident::{ContentHash, NodeId, NodeIdSource, RevisionId};
use crate::marking::{mark_new_node_typed, MarkingMap};
use crate::path::RepoPath;
use crate::roster::{AttrValue, Roster};

/// The operations a change-set applier needs from whatever roster(s) and
/// bookkeeping it is editing.
pub trait EditableTree {
    /// Detach the node at `path`.
    fn detach_node(&mut self, path: &RepoPath) -> Result<NodeId, RosterError>;
    /// Drop a detached node.
    fn drop_detached_node(&mut self, id: NodeId) -> Result<(), RosterError>;
    /// Create a new detached directory node.
    fn create_dir_node(&mut self) -> NodeId;
    /// Create a new detached file node.
    fn create_file_node(&mut self, content: ContentHash) -> NodeId;
    /// Insert a new detached directory node under a caller-chosen id, for
    /// replaying a change set or delta whose `add_dir` entries already
    /// name the id the new node must have.
    fn insert_dir_node(&mut self, id: NodeId) -> Result<(), RosterError>;
    /// Insert a new detached file node under a caller-chosen id. See
    /// [`EditableTree::insert_dir_node`].
    fn insert_file_node(&mut self, id: NodeId, content: ContentHash) -> Result<(), RosterError>;
    /// The current path of `id`, for callers (change-set/delta replay)
    /// that only hold node ids and must detach by path.
    fn path_of(&self, id: NodeId) -> Result<RepoPath, RosterError>;
    /// The current content of a file node, for callers (delta replay) that
    /// only record the new content and must supply the CAS old value.
    fn file_content(&self, id: NodeId) -> Result<ContentHash, RosterError>;
    /// Attach a detached node at `path`.
    fn attach_node(&mut self, id: NodeId, path: &RepoPath) -> Result<(), RosterError>;
    /// Replace a file's content.
    fn apply_delta(&mut self, path: &RepoPath, old_content: ContentHash, new_content: ContentHash) -> Result<(), RosterError>;
    /// Set an attribute.
    fn set_attr(&mut self, path: &RepoPath, key: &str, value: AttrValue) -> Result<(), RosterError>;
    /// Clear an attribute.
    fn clear_attr(&mut self, path: &RepoPath, key: &str) -> Result<(), RosterError>;
}

/// Performs only roster operations, no marking or unification bookkeeping.
pub struct BaseEditableTree<'a> {
    roster: &'a mut Roster,
    ids: &'a mut dyn NodeIdSource,
}

impl<'a> BaseEditableTree<'a> {
    /// Wrap a roster and id source.
    pub fn new(roster: &'a mut Roster, ids: &'a mut dyn NodeIdSource) -> Self {
        Self { roster, ids }
    }
}

impl EditableTree for BaseEditableTree<'_> {
    fn detach_node(&mut self, path: &RepoPath) -> Result<NodeId, RosterError> {
        self.roster.detach_node(path)
    }
    fn drop_detached_node(&mut self, id: NodeId) -> Result<(), RosterError> {
        self.roster.drop_detached_node(id)
    }
    fn create_dir_node(&mut self) -> NodeId {
        self.roster.create_dir_node(self.ids)
    }
    fn create_file_node(&mut self, content: ContentHash) -> NodeId {
        self.roster.create_file_node(content, self.ids)
    }
    fn insert_dir_node(&mut self, id: NodeId) -> Result<(), RosterError> {
        self.roster.insert_dir_node(id)
    }
    fn insert_file_node(&mut self, id: NodeId, content: ContentHash) -> Result<(), RosterError> {
        self.roster.insert_file_node(id, content)
    }
    fn path_of(&self, id: NodeId) -> Result<RepoPath, RosterError> {
        self.roster.get_path(id)
    }
    fn file_content(&self, id: NodeId) -> Result<ContentHash, RosterError> {
        self.roster
            .get_node(id)?
            .file_content()
            .ok_or_else(|| RosterError::from(crate::error::DomainError::WrongNodeKind { id, expected: "file" }))
    }
    fn attach_node(&mut self, id: NodeId, path: &RepoPath) -> Result<(), RosterError> {
        self.roster.attach_node(id, path)
    }
    fn apply_delta(&mut self, path: &RepoPath, old_content: ContentHash, new_content: ContentHash) -> Result<(), RosterError> {
        self.roster.apply_delta(path, old_content, new_content)
    }
    fn set_attr(&mut self, path: &RepoPath, key: &str, value: AttrValue) -> Result<(), RosterError> {
        self.roster.set_attr(path, key, value)
    }
    fn clear_attr(&mut self, path: &RepoPath, key: &str) -> Result<(), RosterError> {
        self.roster.clear_attr(path, key)
    }
}

/// Performs roster operations and records every id newly created during
/// this editing transaction, so a later unification pass (spec §4.5) can
/// find which ids on this side are temporary and brand-new.
pub struct MergeEditableTree<'a> {
    roster: &'a mut Roster,
    ids: &'a mut dyn NodeIdSource,
    /// All ids created through this adapter so far.
    pub new_nodes: BTreeSet<NodeId>,
}

impl<'a> MergeEditableTree<'a> {
    /// Wrap a roster and id source.
    pub fn new(roster: &'a mut Roster, ids: &'a mut dyn NodeIdSource) -> Self {
        Self {
            roster,
            ids,
            new_nodes: BTreeSet::new(),
        }
    }
}

impl EditableTree for MergeEditableTree<'_> {
    fn detach_node(&mut self, path: &RepoPath) -> Result<NodeId, RosterError> {
        self.roster.detach_node(path)
    }
    fn drop_detached_node(&mut self, id: NodeId) -> Result<(), RosterError> {
        self.roster.drop_detached_node(id)
    }
    fn create_dir_node(&mut self) -> NodeId {
        let id = self.roster.create_dir_node(self.ids);
        self.new_nodes.insert(id);
        id
    }
    fn create_file_node(&mut self, content: ContentHash) -> NodeId {
        let id = self.roster.create_file_node(content, self.ids);
        self.new_nodes.insert(id);
        id
    }
    fn insert_dir_node(&mut self, id: NodeId) -> Result<(), RosterError> {
        self.roster.insert_dir_node(id)?;
        self.new_nodes.insert(id);
        Ok(())
    }
    fn insert_file_node(&mut self, id: NodeId, content: ContentHash) -> Result<(), RosterError> {
        self.roster.insert_file_node(id, content)?;
        self.new_nodes.insert(id);
        Ok(())
    }
    fn path_of(&self, id: NodeId) -> Result<RepoPath, RosterError> {
        self.roster.get_path(id)
    }
    fn file_content(&self, id: NodeId) -> Result<ContentHash, RosterError> {
        self.roster
            .get_node(id)?
            .file_content()
            .ok_or_else(|| RosterError::from(crate::error::DomainError::WrongNodeKind { id, expected: "file" }))
    }
    fn attach_node(&mut self, id: NodeId, path: &RepoPath) -> Result<(), RosterError> {
        self.roster.attach_node(id, path)
    }
    fn apply_delta(&mut self, path: &RepoPath, old_content: ContentHash, new_content: ContentHash) -> Result<(), RosterError> {
        self.roster.apply_delta(path, old_content, new_content)
    }
    fn set_attr(&mut self, path: &RepoPath, key: &str, value: AttrValue) -> Result<(), RosterError> {
        self.roster.set_attr(path, key, value)
    }
    fn clear_attr(&mut self, path: &RepoPath, key: &str) -> Result<(), RosterError> {
        self.roster.clear_attr(path, key)
    }
}

/// Performs roster operations and keeps a [`MarkingMap`] in step: new
/// nodes are marked with the new revision id, and re-derived scalars on
/// existing nodes are re-marked per spec §4.4 "Mark-unmerged-node".
pub struct MarkedEditableTree<'a> {
    roster: &'a mut Roster,
    ids: &'a mut dyn NodeIdSource,
    marking: &'a mut MarkingMap,
    revision: RevisionId,
}

impl<'a> MarkedEditableTree<'a> {
    /// Wrap a roster, id source, and marking map, marking new and
    /// re-derived scalars as having been set by `revision`.
    pub fn new(roster: &'a mut Roster, ids: &'a mut dyn NodeIdSource, marking: &'a mut MarkingMap, revision: RevisionId) -> Self {
        Self {
            roster,
            ids,
            marking,
            revision,
        }
    }
}

impl EditableTree for MarkedEditableTree<'_> {
    fn detach_node(&mut self, path: &RepoPath) -> Result<NodeId, RosterError> {
        self.roster.detach_node(path)
    }
    fn drop_detached_node(&mut self, id: NodeId) -> Result<(), RosterError> {
        self.roster.drop_detached_node(id)?;
        self.marking.remove(id);
        Ok(())
    }
    fn create_dir_node(&mut self) -> NodeId {
        let id = self.roster.create_dir_node(self.ids);
        self.marking.insert(id, mark_new_node_typed(self.revision, false, &[]));
        id
    }
    fn create_file_node(&mut self, content: ContentHash) -> NodeId {
        let id = self.roster.create_file_node(content, self.ids);
        self.marking.insert(id, mark_new_node_typed(self.revision, true, &[]));
        id
    }
    fn insert_dir_node(&mut self, id: NodeId) -> Result<(), RosterError> {
        self.roster.insert_dir_node(id)?;
        self.marking.insert(id, mark_new_node_typed(self.revision, false, &[]));
        Ok(())
    }
    fn insert_file_node(&mut self, id: NodeId, content: ContentHash) -> Result<(), RosterError> {
        self.roster.insert_file_node(id, content)?;
        self.marking.insert(id, mark_new_node_typed(self.revision, true, &[]));
        Ok(())
    }
    fn path_of(&self, id: NodeId) -> Result<RepoPath, RosterError> {
        self.roster.get_path(id)
    }
    fn file_content(&self, id: NodeId) -> Result<ContentHash, RosterError> {
        self.roster
            .get_node(id)?
            .file_content()
            .ok_or_else(|| RosterError::from(crate::error::DomainError::WrongNodeKind { id, expected: "file" }))
    }
    fn attach_node(&mut self, id: NodeId, path: &RepoPath) -> Result<(), RosterError> {
        self.roster.attach_node(id, path)?;
        // Every attach_node call that reaches a node already carrying a
        // marking is a rename: the roster itself forbids re-attaching to
        // the exact prior (parent, name), so the scalar always changed —
        // spec §4.4's "value changed" branch of Mark-unmerged-node.
        if let Some(marking) = self.marking.get_mut(id) {
            marking.parent_name = BTreeSet::from([self.revision]);
        }
        Ok(())
    }
    fn apply_delta(&mut self, path: &RepoPath, old_content: ContentHash, new_content: ContentHash) -> Result<(), RosterError> {
        self.roster.apply_delta(path, old_content, new_content)?;
        let id = self.roster.get_node_by_path(path)?.id();
        // apply_delta rejects old == new, so content always changed.
        if let Some(marking) = self.marking.get_mut(id) {
            marking.content = BTreeSet::from([self.revision]);
        }
        Ok(())
    }
    fn set_attr(&mut self, path: &RepoPath, key: &str, value: AttrValue) -> Result<(), RosterError> {
        self.roster.set_attr(path, key, value)?;
        let id = self.roster.get_node_by_path(path)?.id();
        if let Some(marking) = self.marking.get_mut(id) {
            marking.attrs.entry(key.to_owned()).or_default().clear();
            marking.attrs.get_mut(key).expect("just inserted").insert(self.revision);
        }
        Ok(())
    }
    fn clear_attr(&mut self, path: &RepoPath, key: &str) -> Result<(), RosterError> {
        self.roster.clear_attr(path, key)?;
        let id = self.roster.get_node_by_path(path)?.id();
        if let Some(marking) = self.marking.get_mut(id) {
            marking.attrs.entry(key.to_owned()).or_default().clear();
            marking.attrs.get_mut(key).expect("just inserted").insert(self.revision);
        }
        Ok(())
    }
}
