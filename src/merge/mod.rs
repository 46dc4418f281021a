//! The *-merge marker: produces the marking for a freshly merged roster
//! from its two parents' rosters and markings (spec §4.4
//! "Mark-merge-roster").

pub mod builder;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DomainError, RosterError};
use crate::ident::{NodeId, RevisionId};
use crate::marking::{mark_merged_scalar, mark_unmerged_node_attrs, Marking, MarkingMap};
use crate::parallel_iter::{ParallelIter, Transition};
use crate::roster::Roster;

/// Compute the marking for `new_roster`, a two-parent merge of `left` and
/// `right`, given each parent's marking and uncommon-ancestor set (spec
/// §4.4). `revision` is the id of the merge revision being built.
///
/// Enforces the lifecycle-in-merge invariants: a node present in exactly
/// one parent must have been born after that parent's divergence point
/// ("die die die" otherwise), a node present in both parents must share
/// one birth revision, and no node may be a file on one side and a
/// directory on the other.
pub fn mark_merge_roster(
    new_roster: &Roster,
    left: &Roster,
    left_marking: &MarkingMap,
    left_uncommon: &BTreeSet<RevisionId>,
    right: &Roster,
    right_marking: &MarkingMap,
    right_uncommon: &BTreeSet<RevisionId>,
    revision: RevisionId,
) -> Result<MarkingMap, RosterError> {
    let mut marking = MarkingMap::new();

    let left_ids: BTreeMap<NodeId, ()> = left.all_nodes().map(|(id, _)| (*id, ())).collect();
    let right_ids: BTreeMap<NodeId, ()> = right.all_nodes().map(|(id, _)| (*id, ())).collect();
    let mut iter = ParallelIter::new(&left_ids, &right_ids);

    loop {
        match iter.advance() {
            Transition::Done => break,
            Transition::InLeft { key: id, .. } => {
                if !new_roster.has_node(*id) {
                    continue; // deleted by the merge; no marking to produce.
                }
                let parent_marking = left_marking.get(*id).ok_or_else(|| crate::bug!("left marking missing node {id}"))?;
                let birth = parent_marking.birth.ok_or_else(|| crate::bug!("node {id} has no birth revision"))?;
                if !left_uncommon.contains(&birth) {
                    return Err(DomainError::DieDieDie { id: *id }.into());
                }
                marking.insert(*id, mark_one_sided(revision, new_roster, left, *id, parent_marking)?);
            }
            Transition::InRight { key: id, .. } => {
                if !new_roster.has_node(*id) {
                    continue;
                }
                let parent_marking = right_marking.get(*id).ok_or_else(|| crate::bug!("right marking missing node {id}"))?;
                let birth = parent_marking.birth.ok_or_else(|| crate::bug!("node {id} has no birth revision"))?;
                if !right_uncommon.contains(&birth) {
                    return Err(DomainError::DieDieDie { id: *id }.into());
                }
                marking.insert(*id, mark_one_sided(revision, new_roster, right, *id, parent_marking)?);
            }
            Transition::InBoth { key: id, .. } => {
                if !new_roster.has_node(*id) {
                    continue; // explicitly deleted in the merge child.
                }
                marking.insert(
                    *id,
                    mark_two_sided(
                        revision,
                        new_roster,
                        left,
                        left_marking,
                        left_uncommon,
                        right,
                        right_marking,
                        right_uncommon,
                        *id,
                    )?,
                );
            }
        }
    }

    // Nodes present in the new roster but in neither parent were created
    // directly as part of building this merge revision (e.g. conflict
    // resolution adding a brand-new file).
    for (id, _) in new_roster.all_nodes() {
        if !left.has_node(*id) && !right.has_node(*id) {
            let node = new_roster.get_node(*id)?;
            marking.insert(*id, crate::marking::mark_new_node_typed(revision, node.kind().is_file(), &[]));
        }
    }

    Ok(marking)
}

fn mark_one_sided(revision: RevisionId, new_roster: &Roster, parent: &Roster, id: NodeId, parent_marking: &Marking) -> Result<Marking, RosterError> {
    let new_node = new_roster.get_node(id)?;
    let parent_node = parent.get_node(id)?;
    if new_node.kind().is_file() != parent_node.kind().is_file() {
        return Err(DomainError::KindChanged { id }.into());
    }
    let name_changed = new_roster.get_path(id)? != parent.get_path(id)?;
    let content_changed = new_node.file_content() != parent_node.file_content();
    Ok(mark_unmerged_node_attrs(
        revision,
        parent_marking,
        name_changed,
        content_changed,
        parent_node.attrs(),
        new_node.attrs(),
    ))
}

#[allow(clippy::too_many_arguments)]
fn mark_two_sided(
    revision: RevisionId,
    new_roster: &Roster,
    left: &Roster,
    left_marking: &MarkingMap,
    left_uncommon: &BTreeSet<RevisionId>,
    right: &Roster,
    right_marking: &MarkingMap,
    right_uncommon: &BTreeSet<RevisionId>,
    id: NodeId,
) -> Result<Marking, RosterError> {
    let new_node = new_roster.get_node(id)?;
    let left_node = left.get_node(id)?;
    let right_node = right.get_node(id)?;
    if left_node.kind().is_file() != right_node.kind().is_file() {
        return Err(DomainError::KindChanged { id }.into());
    }

    let lm = left_marking.get(id).ok_or_else(|| crate::bug!("left marking missing node {id}"))?;
    let rm = right_marking.get(id).ok_or_else(|| crate::bug!("right marking missing node {id}"))?;
    let birth = match (lm.birth, rm.birth) {
        (Some(l), Some(r)) if l == r => l,
        _ => return Err(DomainError::BirthMismatch { id }.into()),
    };

    let new_path = new_roster.get_path(id)?;
    let left_path = left.get_path(id)?;
    let right_path = right.get_path(id)?;
    let parent_name = mark_merged_scalar(
        revision,
        &lm.parent_name,
        left_uncommon,
        new_path == left_path,
        &rm.parent_name,
        right_uncommon,
        new_path == right_path,
    );

    let content = if new_node.kind().is_file() {
        mark_merged_scalar(
            revision,
            &lm.content,
            left_uncommon,
            new_node.file_content() == left_node.file_content(),
            &rm.content,
            right_uncommon,
            new_node.file_content() == right_node.file_content(),
        )
    } else {
        BTreeSet::new()
    };

    let mut attrs = BTreeMap::new();
    let mut keys: BTreeSet<&String> = BTreeSet::new();
    keys.extend(left_node.attrs().keys());
    keys.extend(right_node.attrs().keys());
    for key in keys {
        let new_value = new_node.attrs().get(key);
        if new_value.is_none() {
            return Err(DomainError::MissingAttr { id, key: key.clone() }.into());
        }
        let left_value = left_node.attrs().get(key);
        let right_value = right_node.attrs().get(key);
        let mark = match (left_value, right_value) {
            (Some(_), Some(_)) => {
                let lam = lm.attrs.get(key).ok_or_else(|| crate::bug!("node {id} attr {key:?} missing from left marking"))?;
                let ram = rm.attrs.get(key).ok_or_else(|| crate::bug!("node {id} attr {key:?} missing from right marking"))?;
                mark_merged_scalar(revision, lam, left_uncommon, new_value == left_value, ram, right_uncommon, new_value == right_value)
            }
            (Some(_), None) => {
                let lam = lm.attrs.get(key).ok_or_else(|| crate::bug!("node {id} attr {key:?} missing from left marking"))?;
                crate::marking::mark_unmerged_scalar(revision, lam, new_value != left_value)
            }
            (None, Some(_)) => {
                let ram = rm.attrs.get(key).ok_or_else(|| crate::bug!("node {id} attr {key:?} missing from right marking"))?;
                crate::marking::mark_unmerged_scalar(revision, ram, new_value != right_value)
            }
            (None, None) => BTreeSet::from([revision]),
        };
        attrs.insert(key.clone(), mark);
    }
    for (key, value) in new_node.attrs() {
        if !attrs.contains_key(key) && value.live {
            attrs.insert(key.clone(), BTreeSet::from([revision]));
        }
    }

    Ok(Marking {
        birth: Some(birth),
        parent_name,
        content,
        attrs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{ContentHash, PermanentIdSource};
    use crate::marking::mark_new_node_typed;
    use crate::path::RepoPath;

    fn root_with_ids() -> (Roster, PermanentIdSource, MarkingMap, RevisionId) {
        let rev = RevisionId::from_hex(&"00".repeat(20)).expect("hex");
        let mut r = Roster::new();
        let mut ids = PermanentIdSource::starting_at(1);
        let root = r.create_dir_node(&mut ids);
        r.attach_node(root, &RepoPath::root()).expect("attach root");
        let mut m = MarkingMap::new();
        m.insert(root, mark_new_node_typed(rev, false, &[]));
        (r, ids, m, rev)
    }

    #[test]
    fn die_die_die_when_node_only_on_one_side_predates_divergence() {
        let (mut left, mut ids, mut left_marking, old_rev) = root_with_ids();
        let foo = left.create_file_node(ContentHash::NULL, &mut ids);
        left.attach_node(foo, &RepoPath::parse("foo").expect("path")).expect("attach");
        left_marking.insert(foo, mark_new_node_typed(old_rev, true, &[]));

        let (right, _, right_marking, _) = root_with_ids();
        let new_rev = RevisionId::from_hex(&"ff".repeat(20)).expect("hex");

        // foo's birth is NOT in left's uncommon set, so it must have died
        // on the right: the new roster must not resurrect it.
        let mut new_roster = left.clone();
        new_roster.detach_node(&RepoPath::parse("foo").expect("path")).ok();

        let err = mark_merge_roster(&new_roster, &left, &left_marking, &BTreeSet::new(), &right, &right_marking, &BTreeSet::new(), new_rev);
        // foo is still present in `new_roster` (detach doesn't drop it), so
        // this must fail as a die-die-die violation.
        assert!(matches!(err, Err(RosterError::Domain(DomainError::DieDieDie { .. }))));
    }
}
