//! Change sets: a declarative edit script between two rosters (spec §3
//! "Change set", §4.3).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DomainError, RosterError};
use crate::ident::{ContentHash, NodeId};
use crate::parallel_iter;
use crate::path::RepoPath;
use crate::restriction::Restriction;
use crate::roster::editable::EditableTree;
use crate::roster::{AttrValue, Roster};

/// The target location an add or rename writes a node to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    /// Destination path.
    pub path: RepoPath,
}

impl Location {
    fn new(path: RepoPath) -> Self {
        Self { path }
    }
}

/// A declarative description of the difference between two rosters (spec
/// §3 "Change set"). Every collection is keyed by node id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Nodes deleted entirely.
    pub nodes_deleted: BTreeSet<NodeId>,
    /// Nodes whose `(parent, name)` changed; maps id to its new location.
    pub nodes_renamed: BTreeMap<NodeId, Location>,
    /// New directories and the location they're attached at.
    pub dirs_added: BTreeMap<NodeId, Location>,
    /// New files, their location, and initial content.
    pub files_added: BTreeMap<NodeId, (Location, ContentHash)>,
    /// File content replacements: id maps to (old, new).
    pub deltas_applied: BTreeMap<NodeId, (ContentHash, ContentHash)>,
    /// Attribute keys cleared on a node.
    pub attrs_cleared: BTreeMap<NodeId, BTreeSet<String>>,
    /// Attribute values set on a node.
    pub attrs_set: BTreeMap<NodeId, BTreeMap<String, AttrValue>>,
}

impl ChangeSet {
    /// An empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if this change set has no effect at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes_deleted.is_empty()
            && self.nodes_renamed.is_empty()
            && self.dirs_added.is_empty()
            && self.files_added.is_empty()
            && self.deltas_applied.is_empty()
            && self.attrs_cleared.is_empty()
            && self.attrs_set.is_empty()
    }

    /// Check the normalization invariants of spec §3: no no-op delta, no
    /// attribute both cleared and set on the same node, and no deleted id
    /// appearing in any other collection.
    pub fn check_sane(&self) -> Result<(), RosterError> {
        for (id, (old, new)) in &self.deltas_applied {
            if old == new {
                return Err(DomainError::NoOpEdit {
                    detail: format!("delta on node {id} is a no-op"),
                }
                .into());
            }
        }
        for id in &self.nodes_deleted {
            if self.nodes_renamed.contains_key(id)
                || self.deltas_applied.contains_key(id)
                || self.attrs_cleared.contains_key(id)
                || self.attrs_set.contains_key(id)
            {
                return Err(DomainError::ConflictingPath {
                    path: RepoPath::none(),
                    detail: format!("node {id} is deleted but also appears in another collection"),
                }
                .into());
            }
        }
        for (id, cleared) in &self.attrs_cleared {
            if let Some(set) = self.attrs_set.get(id) {
                for key in cleared {
                    if set.contains_key(key) {
                        return Err(DomainError::ConflictingPath {
                            path: RepoPath::none(),
                            detail: format!("attribute {key:?} on node {id} is both cleared and set"),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply this change set through `tree`, in the fixed seven-step order
    /// of spec §4.3. If any step fails the tree must be treated as corrupt
    /// by the caller; this function does not roll back partial mutation.
    pub fn apply(&self, tree: &mut dyn EditableTree) -> Result<(), RosterError> {
        self.check_sane()?;
        tracing::debug!(
            deleted = self.nodes_deleted.len(),
            renamed = self.nodes_renamed.len(),
            added = self.dirs_added.len() + self.files_added.len(),
            "applying change set"
        );

        // Step 1: detach every deleted node and every rename source, in a
        // single pass, deepest path first so detaching a parent never
        // invalidates the still-to-be-resolved path of one of its children.
        let mut to_detach: Vec<(NodeId, RepoPath)> = Vec::new();
        for &id in self.nodes_deleted.iter().chain(self.nodes_renamed.keys()) {
            to_detach.push((id, tree.path_of(id)?));
        }
        to_detach.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        for (id, path) in &to_detach {
            let detached = tree.detach_node(path)?;
            if detached != *id {
                return Err(crate::bug!("detach_node at {path} returned {detached}, expected {id}"));
            }
        }

        // Step 2: drop every deleted node.
        for &id in &self.nodes_deleted {
            tree.drop_detached_node(id)?;
        }

        // Step 3: create every added directory and file, detached.
        for &id in self.dirs_added.keys() {
            tree.insert_dir_node(id)?;
        }
        for (&id, (_, content)) in &self.files_added {
            tree.insert_file_node(id, *content)?;
        }

        // Step 4: attach adds and rename targets, parents before children.
        let mut to_attach: Vec<(NodeId, RepoPath)> = Vec::new();
        for (&id, loc) in &self.dirs_added {
            to_attach.push((id, loc.path.clone()));
        }
        for (&id, (loc, _)) in &self.files_added {
            to_attach.push((id, loc.path.clone()));
        }
        for (&id, loc) in &self.nodes_renamed {
            to_attach.push((id, loc.path.clone()));
        }
        to_attach.sort_by(|a, b| a.1.len().cmp(&b.1.len()));
        for (id, path) in &to_attach {
            tree.attach_node(*id, path)?;
        }

        // Step 5: apply deltas.
        for (&id, &(old, new)) in &self.deltas_applied {
            let path = tree.path_of(id)?;
            tree.apply_delta(&path, old, new)?;
        }

        // Step 6: clear attributes.
        for (&id, keys) in &self.attrs_cleared {
            let path = tree.path_of(id)?;
            for key in keys {
                tree.clear_attr(&path, key)?;
            }
        }

        // Step 7: set attributes.
        for (&id, attrs) in &self.attrs_set {
            let path = tree.path_of(id)?;
            for (key, value) in attrs {
                tree.set_attr(&path, key, value.clone())?;
            }
        }

        Ok(())
    }
}

/// Compute the minimal change set whose application to `from` (under the
/// identity mapping of node ids) yields `to` (spec §4.3 `make_cset`).
pub fn make_cset(from: &Roster, to: &Roster) -> Result<ChangeSet, RosterError> {
    let mut cset = ChangeSet::new();
    let from_nodes: BTreeMap<NodeId, ()> = from.all_nodes().map(|(id, _)| (*id, ())).collect();
    let to_nodes: BTreeMap<NodeId, ()> = to.all_nodes().map(|(id, _)| (*id, ())).collect();

    let mut nodes = parallel_iter::ParallelIter::new(&from_nodes, &to_nodes);
    loop {
        match nodes.advance() {
            parallel_iter::Transition::InLeft { key: id, .. } => {
                cset.nodes_deleted.insert(*id);
            }
            parallel_iter::Transition::InRight { key: id, .. } => {
                let node = to.get_node(*id).expect("id came from to.all_nodes()");
                let path = to.get_path(*id).expect("id came from to.all_nodes()");
                match node.kind() {
                    crate::roster::NodeKind::Dir(_) => {
                        cset.dirs_added.insert(*id, Location::new(path));
                    }
                    crate::roster::NodeKind::File(content) => {
                        cset.files_added.insert(*id, (Location::new(path), *content));
                    }
                }
                let mut sets = BTreeMap::new();
                for (key, value) in node.attrs() {
                    if value.live {
                        sets.insert(key.clone(), value.clone());
                    }
                }
                if !sets.is_empty() {
                    cset.attrs_set.insert(*id, sets);
                }
            }
            parallel_iter::Transition::InBoth { key: id, .. } => {
                let from_node = from.get_node(*id).expect("id is in_both");
                let to_node = to.get_node(*id).expect("id is in_both");
                let from_path = from.get_path(*id).expect("id is in_both");
                let to_path = to.get_path(*id).expect("id is in_both");
                if from_path != to_path {
                    cset.nodes_renamed.insert(*id, Location::new(to_path));
                }
                if let (Some(old), Some(new)) = (from_node.file_content(), to_node.file_content()) {
                    if old != new {
                        cset.deltas_applied.insert(*id, (old, new));
                    }
                }

                let mut keys: BTreeSet<&String> = BTreeSet::new();
                keys.extend(from_node.attrs().keys());
                keys.extend(to_node.attrs().keys());
                for key in keys {
                    let old = from_node.attrs().get(key);
                    let new = to_node.attrs().get(key);
                    match (old, new) {
                        (Some(a), Some(b)) if a == b => {}
                        (_, Some(b)) if b.live => {
                            cset.attrs_set.entry(*id).or_default().insert(key.clone(), b.clone());
                        }
                        (_, Some(b)) if !b.live => {
                            cset.attrs_cleared.entry(*id).or_default().insert(key.clone());
                        }
                        _ => {}
                    }
                }
            }
            parallel_iter::Transition::Done => break,
        }
    }

    Ok(cset)
}

/// Split the change set from `from` to `to` into `(included, excluded)`
/// such that applying `included` to `from` yields an intermediate roster,
/// and applying `excluded` to that intermediate roster yields `to` (spec
/// §4.3 "Restricted csets").
///
/// `has_second_parent` must be `true` when the workspace this restriction
/// is being applied to has two merge parents; restricted commits are
/// single-parent only, so a non-empty exclusion in that case is rejected.
pub fn split_restricted(
    from: &Roster,
    to: &Roster,
    restriction: &Restriction,
    has_second_parent: bool,
) -> Result<(ChangeSet, ChangeSet), RosterError> {
    let full = make_cset(from, to)?;

    let mut to_path_of: BTreeMap<NodeId, RepoPath> = BTreeMap::new();
    for &id in full.dirs_added.keys().chain(full.files_added.keys()).chain(full.nodes_renamed.keys()) {
        let path = to.get_path(id)?;
        to_path_of.insert(id, path);
    }

    let representative_path = |id: NodeId| -> Result<RepoPath, RosterError> {
        if let Some(p) = to_path_of.get(&id) {
            return Ok(p.clone());
        }
        if full.nodes_deleted.contains(&id) {
            return from.get_path(id);
        }
        if let Ok(p) = to.get_path(id) {
            return Ok(p);
        }
        from.get_path(id)
    };

    let mut all_ids: BTreeSet<NodeId> = BTreeSet::new();
    all_ids.extend(full.nodes_deleted.iter().copied());
    all_ids.extend(full.nodes_renamed.keys().copied());
    all_ids.extend(full.dirs_added.keys().copied());
    all_ids.extend(full.files_added.keys().copied());
    all_ids.extend(full.deltas_applied.keys().copied());
    all_ids.extend(full.attrs_cleared.keys().copied());
    all_ids.extend(full.attrs_set.keys().copied());

    let mut included_ids: BTreeSet<NodeId> = BTreeSet::new();
    for &id in &all_ids {
        if restriction.matches(&representative_path(id)?) {
            included_ids.insert(id);
        }
    }

    // Closure: if a new/renamed node is included, any ancestor that is
    // itself newly added or renamed in this same change set must also be
    // included, or the child's attach target would have no parent yet.
    let path_to_touched_id: BTreeMap<RepoPath, NodeId> = to_path_of.iter().map(|(id, path)| (path.clone(), *id)).collect();
    loop {
        let mut changed = false;
        let pending: Vec<NodeId> = included_ids
            .iter()
            .copied()
            .filter(|id| to_path_of.contains_key(id))
            .collect();
        for id in pending {
            let path = &to_path_of[&id];
            if let Some(parent_path) = path.parent() {
                if let Some(&parent_id) = path_to_touched_id.get(&parent_path) {
                    if all_ids.contains(&parent_id) && included_ids.insert(parent_id) {
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    let has_exclusion = all_ids.iter().any(|id| !included_ids.contains(id));
    if has_second_parent && has_exclusion {
        return Err(DomainError::RestrictedMultiParent.into());
    }

    let mut included = ChangeSet::new();
    let mut excluded = ChangeSet::new();

    for &id in &full.nodes_deleted {
        if included_ids.contains(&id) {
            included.nodes_deleted.insert(id);
        } else {
            excluded.nodes_deleted.insert(id);
        }
    }
    for (&id, loc) in &full.nodes_renamed {
        let target = if included_ids.contains(&id) { &mut included } else { &mut excluded };
        target.nodes_renamed.insert(id, loc.clone());
    }
    for (&id, loc) in &full.dirs_added {
        let target = if included_ids.contains(&id) { &mut included } else { &mut excluded };
        target.dirs_added.insert(id, loc.clone());
    }
    for (&id, entry) in &full.files_added {
        let target = if included_ids.contains(&id) { &mut included } else { &mut excluded };
        target.files_added.insert(id, entry.clone());
    }
    for (&id, entry) in &full.deltas_applied {
        let target = if included_ids.contains(&id) { &mut included } else { &mut excluded };
        target.deltas_applied.insert(id, *entry);
    }
    for (&id, keys) in &full.attrs_cleared {
        let target = if included_ids.contains(&id) { &mut included } else { &mut excluded };
        target.attrs_cleared.insert(id, keys.clone());
    }
    for (&id, attrs) in &full.attrs_set {
        let target = if included_ids.contains(&id) { &mut included } else { &mut excluded };
        target.attrs_set.insert(id, attrs.clone());
    }

    Ok((included, excluded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::PermanentIdSource;
    use crate::roster::editable::BaseEditableTree;

    fn fresh_root() -> (Roster, PermanentIdSource) {
        let mut r = Roster::new();
        let mut ids = PermanentIdSource::starting_at(1);
        let root = r.create_dir_node(&mut ids);
        r.attach_node(root, &RepoPath::root()).expect("attach root");
        (r, ids)
    }

    #[test]
    fn make_cset_round_trips_add_file() {
        let (from, mut ids) = fresh_root();
        let mut to = from.clone();
        let hash = ContentHash::from_hex(&"aa".repeat(20)).expect("hex");
        let foo = to.create_file_node(hash, &mut ids);
        to.attach_node(foo, &RepoPath::parse("foo").expect("path")).expect("attach");

        let cset = make_cset(&from, &to).expect("cset");
        assert_eq!(cset.files_added.len(), 1);

        let mut applied = from.clone();
        let mut apply_ids = PermanentIdSource::starting_at(100);
        let mut tree = BaseEditableTree::new(&mut applied, &mut apply_ids);
        cset.apply(&mut tree).expect("apply");
        assert_eq!(applied, to);
    }

    #[test]
    fn make_cset_is_empty_for_equal_rosters() {
        let (r, _) = fresh_root();
        let cset = make_cset(&r, &r).expect("cset");
        assert!(cset.is_empty());
    }

    #[test]
    fn make_cset_round_trips_rename_and_delta() {
        let (mut from, mut ids) = fresh_root();
        let old = ContentHash::from_hex(&"aa".repeat(20)).expect("hex");
        let foo = from.create_file_node(old, &mut ids);
        from.attach_node(foo, &RepoPath::parse("foo").expect("path")).expect("attach");

        let mut to = from.clone();
        to.detach_node(&RepoPath::parse("foo").expect("path")).expect("detach");
        to.attach_node(foo, &RepoPath::parse("bar").expect("path")).expect("attach renamed");
        let new = ContentHash::from_hex(&"bb".repeat(20)).expect("hex");
        to.apply_delta(&RepoPath::parse("bar").expect("path"), old, new).expect("delta");

        let cset = make_cset(&from, &to).expect("cset");
        assert!(cset.nodes_renamed.contains_key(&foo));
        assert!(cset.deltas_applied.contains_key(&foo));

        let mut applied = from.clone();
        let mut apply_ids = PermanentIdSource::starting_at(100);
        let mut tree = BaseEditableTree::new(&mut applied, &mut apply_ids);
        cset.apply(&mut tree).expect("apply");
        assert_eq!(applied, to);
    }

    #[test]
    fn split_restricted_separates_by_path() {
        let (from, mut ids) = fresh_root();
        let mut to = from.clone();
        let keep = to.create_file_node(ContentHash::from_hex(&"aa".repeat(20)).expect("hex"), &mut ids);
        to.attach_node(keep, &RepoPath::parse("keep").expect("path")).expect("attach");
        let skip = to.create_file_node(ContentHash::from_hex(&"bb".repeat(20)).expect("hex"), &mut ids);
        to.attach_node(skip, &RepoPath::parse("skip").expect("path")).expect("attach");

        let restriction = crate::restriction::Restriction::new(
            vec![RepoPath::parse("keep").expect("path")],
            vec![],
            None,
            &from,
            &to,
            false,
        )
        .expect("valid restriction");

        let (included, excluded) = split_restricted(&from, &to, &restriction, false).expect("split");
        assert!(included.files_added.contains_key(&keep));
        assert!(!included.files_added.contains_key(&skip));
        assert!(excluded.files_added.contains_key(&skip));

        let mut intermediate = from.clone();
        let mut apply_ids = PermanentIdSource::starting_at(100);
        let mut tree = BaseEditableTree::new(&mut intermediate, &mut apply_ids);
        included.apply(&mut tree).expect("apply included");
        assert!(intermediate.has_path(&RepoPath::parse("keep").expect("path")));
        assert!(!intermediate.has_path(&RepoPath::parse("skip").expect("path")));

        let mut tree = BaseEditableTree::new(&mut intermediate, &mut apply_ids);
        excluded.apply(&mut tree).expect("apply excluded");
        assert_eq!(intermediate, to);
    }

    #[test]
    fn split_restricted_rejects_nonempty_exclusion_with_second_parent() {
        let (from, mut ids) = fresh_root();
        let mut to = from.clone();
        let skip = to.create_file_node(ContentHash::NULL, &mut ids);
        to.attach_node(skip, &RepoPath::parse("skip").expect("path")).expect("attach");

        let restriction = Restriction::everything();
        let err = split_restricted(&from, &to, &restriction, true);
        // everything() matches all paths so nothing is excluded; force an
        // exclusion by restricting to an unrelated path instead.
        assert!(err.is_ok());

        let narrow = crate::restriction::Restriction::new(vec![RepoPath::root()], vec![RepoPath::parse("skip").expect("path")], None, &from, &to, false)
            .expect("valid");
        let err = split_restricted(&from, &to, &narrow, true).unwrap_err();
        assert!(matches!(err, RosterError::Domain(DomainError::RestrictedMultiParent)));
    }

    #[test]
    fn check_sane_rejects_delete_and_rename_of_same_node() {
        let mut cset = ChangeSet::new();
        let id = NodeId::from_permanent(5);
        cset.nodes_deleted.insert(id);
        cset.nodes_renamed.insert(id, Location::new(RepoPath::parse("x").unwrap()));
        assert!(cset.check_sane().is_err());
    }
}
