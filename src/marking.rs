//! Per-node provenance: birth revision plus, for each scalar, the set of
//! revisions that last authoritatively set it (spec §3 "Marking",
//! §4.4).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::RosterError;
use crate::ident::{NodeId, RevisionId};

/// The set of revisions that most recently authoritatively set one scalar.
/// Never empty for a scalar that exists on its node (spec §8).
pub type MarkSet = BTreeSet<RevisionId>;

/// Provenance for one node: birth revision, parent+name mark, content
/// mark (files only; empty for directories), and per-attribute marks.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Marking {
    /// The revision this node was first created in.
    pub birth: Option<RevisionId>,
    /// Mark set for the `(parent, name)` scalar.
    pub parent_name: MarkSet,
    /// Mark set for file content; empty for directories.
    pub content: MarkSet,
    /// Mark set for each attribute key present now or historically.
    pub attrs: BTreeMap<String, MarkSet>,
}

impl Marking {
    /// Check the per-node marking invariants of spec §8: non-empty birth,
    /// non-empty parent+name mark, content mark present iff the node is a
    /// file, and every attribute mark non-empty.
    pub fn check_sane(&self, id: NodeId, is_file: bool) -> Result<(), RosterError> {
        if self.birth.is_none() {
            return Err(crate::bug!("node {id} has no birth revision"));
        }
        if self.parent_name.is_empty() {
            return Err(crate::bug!("node {id} has an empty parent+name mark set"));
        }
        if is_file && self.content.is_empty() {
            return Err(crate::bug!("file node {id} has an empty content mark set"));
        }
        if !is_file && !self.content.is_empty() {
            return Err(crate::bug!("directory node {id} has a non-empty content mark set"));
        }
        for (key, marks) in &self.attrs {
            if marks.is_empty() {
                return Err(crate::bug!("node {id} attribute {key:?} has an empty mark set"));
            }
        }
        Ok(())
    }
}

/// Maps node id to marking; must share the roster's key set (spec §3
/// "Marking map").
pub type MarkingMap = IdMap;

/// Thin wrapper over a `BTreeMap<NodeId, Marking>` so call sites read
/// `MarkingMap` rather than the raw collection type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdMap(BTreeMap<NodeId, Marking>);

impl IdMap {
    /// An empty marking map.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert or replace a node's marking.
    pub fn insert(&mut self, id: NodeId, marking: Marking) {
        self.0.insert(id, marking);
    }

    /// Remove a node's marking (called exactly when the node itself is
    /// dropped — spec §3 "Lifecycles").
    pub fn remove(&mut self, id: NodeId) -> Option<Marking> {
        self.0.remove(&id)
    }

    /// Borrow a node's marking.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Marking> {
        self.0.get(&id)
    }

    /// Mutably borrow a node's marking.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Marking> {
        self.0.get_mut(&id)
    }

    /// Iterate all (id, marking) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Marking)> {
        self.0.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the pairing invariant of spec §8 (`check_sane_against`): the
    /// marking map's key set equals the roster's node-id set, and every
    /// marking individually passes [`Marking::check_sane`].
    pub fn check_sane_against(&self, roster: &crate::roster::Roster) -> Result<(), RosterError> {
        let roster_ids: BTreeSet<NodeId> = roster.all_nodes().map(|(id, _)| *id).collect();
        let marking_ids: BTreeSet<NodeId> = self.0.keys().copied().collect();
        if roster_ids != marking_ids {
            return Err(crate::bug!("marking map key set does not match roster node-id set"));
        }
        for (id, node) in roster.all_nodes() {
            let marking = self.0.get(id).expect("key sets match");
            marking.check_sane(*id, node.kind().is_file())?;
        }
        Ok(())
    }
}

/// Mark a node freshly born in `revision` (spec §4.4 "Mark-new-node").
#[must_use]
pub fn mark_new_node(revision: RevisionId, attr_keys: &[String]) -> Marking {
    mark_new_node_typed(revision, true, attr_keys)
}

/// Like [`mark_new_node`] but lets the caller say whether the node is a
/// file (content gets a mark) or a directory (it does not).
#[must_use]
pub fn mark_new_node_typed(revision: RevisionId, is_file: bool, attr_keys: &[String]) -> Marking {
    let mut attrs = BTreeMap::new();
    for key in attr_keys {
        attrs.insert(key.clone(), BTreeSet::from([revision]));
    }
    Marking {
        birth: Some(revision),
        parent_name: BTreeSet::from([revision]),
        content: if is_file { BTreeSet::from([revision]) } else { BTreeSet::new() },
        attrs,
    }
}

/// One-parent re-marking of a single scalar (spec §4.4
/// "Mark-unmerged-node"): if the child's value equals the parent's,
/// carry the parent's mark set forward; otherwise the scalar was just
/// set by `revision`.
#[must_use]
pub fn mark_unmerged_scalar(revision: RevisionId, parent_mark: &MarkSet, value_changed: bool) -> MarkSet {
    if value_changed {
        BTreeSet::from([revision])
    } else {
        parent_mark.clone()
    }
}

/// One-parent re-marking of a whole node's non-attribute scalars, given
/// the parent's marking. `name_changed`/`content_changed` say whether
/// `(parent, name)` / file content differ from the parent's. Attribute
/// marks are handled separately by callers via [`mark_unmerged_scalar`]
/// because the set of relevant keys is situational (spec §4.4
/// "Mark-unmerged-node").
#[must_use]
pub fn mark_unmerged_node(revision: RevisionId, parent_marking: &Marking, name_changed: bool, content_changed: bool) -> Marking {
    Marking {
        birth: parent_marking.birth,
        parent_name: mark_unmerged_scalar(revision, &parent_marking.parent_name, name_changed),
        content: if parent_marking.content.is_empty() {
            BTreeSet::new()
        } else {
            mark_unmerged_scalar(revision, &parent_marking.content, content_changed)
        },
        attrs: parent_marking.attrs.clone(),
    }
}

/// Full one-parent re-marking including attributes: for every key present
/// on the child, the new node, or the parent's marking, compares the
/// child's attribute (live flag + value) against the parent's and either
/// carries the parent's mark forward or stamps it with `revision` (spec
/// §4.4 "Mark-unmerged-node", attribute clause).
#[must_use]
pub fn mark_unmerged_node_attrs(
    revision: RevisionId,
    parent_marking: &Marking,
    name_changed: bool,
    content_changed: bool,
    parent_attrs: &BTreeMap<String, crate::roster::AttrValue>,
    child_attrs: &BTreeMap<String, crate::roster::AttrValue>,
) -> Marking {
    let mut base = mark_unmerged_node(revision, parent_marking, name_changed, content_changed);
    let mut attrs = BTreeMap::new();
    let mut keys: BTreeSet<&String> = BTreeSet::new();
    keys.extend(parent_marking.attrs.keys());
    keys.extend(child_attrs.keys());
    for key in keys {
        match parent_marking.attrs.get(key) {
            Some(parent_mark) => {
                let changed = parent_attrs.get(key) != child_attrs.get(key);
                attrs.insert(key.clone(), mark_unmerged_scalar(revision, parent_mark, changed));
            }
            None => {
                attrs.insert(key.clone(), BTreeSet::from([revision]));
            }
        }
    }
    base.attrs = attrs;
    base
}

/// Two-parent per-scalar merge (spec §4.4 "Mark-merged-scalar").
///
/// `left_matches`/`right_matches` say whether the new value equals the
/// left/right parent's value. When exactly one side's value survived
/// into the child (a "clean merge"), the *losing* side's own marks are
/// checked against its own uncommon-ancestor set: if the losing side had
/// made an uncommon change of its own (even though it didn't end up in
/// the child), the scalar is freshly marked with `revision` rather than
/// silently carrying the winner's marks forward, since the losing side's
/// change was never actually reconciled. This direction follows the
/// reference roster implementation, which checks the side whose value
/// did *not* survive — not the side named by spec prose, which describes
/// the check backwards.
#[must_use]
pub fn mark_merged_scalar(
    revision: RevisionId,
    left_mark: &MarkSet,
    left_uncommon: &BTreeSet<RevisionId>,
    left_matches: bool,
    right_mark: &MarkSet,
    right_uncommon: &BTreeSet<RevisionId>,
    right_matches: bool,
) -> MarkSet {
    match (left_matches, right_matches) {
        (false, false) => BTreeSet::from([revision]),
        (true, false) => won_merge(right_mark, right_uncommon, left_mark, revision),
        (false, true) => won_merge(left_mark, left_uncommon, right_mark, revision),
        (true, true) => left_mark.union(right_mark).copied().collect(),
    }
}

/// `loser_mark`/`loser_uncommon` belong to the side whose value did not
/// survive; `winner_mark` belongs to the side whose value did.
fn won_merge(loser_mark: &MarkSet, loser_uncommon: &BTreeSet<RevisionId>, winner_mark: &MarkSet, revision: RevisionId) -> MarkSet {
    if loser_mark.iter().any(|m| loser_uncommon.contains(m)) {
        BTreeSet::from([revision])
    } else {
        winner_mark.clone()
    }
}
