//! Roster builder: reconciles the independently-assigned temporary ids
//! that each side of a merge introduces for its own new nodes (spec §4.5
//! "Roster Builder (Unification)").

use std::collections::BTreeSet;

use crate::error::RosterError;
use crate::ident::{NodeId, NodeIdSource};
use crate::roster::Roster;

/// Rewrite the temporary ids each side of a merge drew for its own new
/// nodes into one shared set of permanent ids.
///
/// Each side applied its own change set against a shared starting point
/// using only temporary ids for brand-new nodes (tracked in
/// `left_new_ids`/`right_new_ids`, e.g. from
/// [`crate::roster::editable::MergeEditableTree::new_nodes`]). For every
/// temporary id `a` on the left: look up the path node `a` occupies in
/// `left`, resolve the same path on the right to find `b`.
/// - If `b` is also temporary: draw one fresh permanent id and renumber
///   both `a` and `b` to it.
/// - If `b` is already permanent (both sides independently produced the
///   same pre-existing node at that path): renumber `a` to `b`.
///
/// After both passes `left` and `right` must be structurally identical,
/// including ids; any discrepancy is reported as
/// [`crate::error::DomainError::UnificationMismatch`].
pub fn unify(
    left: &mut Roster,
    left_new_ids: &mut BTreeSet<NodeId>,
    right: &mut Roster,
    right_new_ids: &mut BTreeSet<NodeId>,
    ids: &mut dyn NodeIdSource,
) -> Result<(), RosterError> {
    let left_ids_snapshot: Vec<NodeId> = left_new_ids.iter().copied().collect();
    for a in left_ids_snapshot {
        if !left_new_ids.contains(&a) {
            continue; // already renumbered by a previous iteration.
        }
        let path = left.get_path(a)?;
        let Ok(b) = right.resolve_path(&path) else {
            continue; // not present on the other side at all; left alone.
        };
        if b.is_temp() {
            let n = ids.next();
            renumber(left, a, n)?;
            renumber(right, b, n)?;
            left_new_ids.remove(&a);
            right_new_ids.remove(&b);
        } else {
            renumber(left, a, b)?;
            left_new_ids.remove(&a);
        }
    }

    let right_ids_snapshot: Vec<NodeId> = right_new_ids.iter().copied().collect();
    for b in right_ids_snapshot {
        if !right_new_ids.contains(&b) {
            continue;
        }
        let path = right.get_path(b)?;
        let Ok(a) = left.resolve_path(&path) else {
            continue;
        };
        if a.is_temp() {
            let n = ids.next();
            renumber(right, b, n)?;
            renumber(left, a, n)?;
            right_new_ids.remove(&b);
        } else {
            renumber(right, b, a)?;
            right_new_ids.remove(&b);
        }
    }

    if *left != *right {
        return Err(crate::bug!("unification completed but the two rosters are still unequal"));
    }
    Ok(())
}

fn renumber(roster: &mut Roster, old: NodeId, new: NodeId) -> Result<(), RosterError> {
    if old == new {
        return Ok(());
    }
    roster.renumber_node(old, new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{ContentHash, PermanentIdSource, TempIdSource};
    use crate::path::RepoPath;

    fn root_roster() -> (Roster, PermanentIdSource) {
        let mut r = Roster::new();
        let mut ids = PermanentIdSource::starting_at(1);
        let root = r.create_dir_node(&mut ids);
        r.attach_node(root, &RepoPath::root()).expect("attach root");
        (r, ids)
    }

    #[test]
    fn both_sides_temp_ids_unify_to_one_fresh_permanent_id() {
        let (base, _) = root_roster();
        let mut left = base.clone();
        let mut right = base.clone();
        let mut left_temp = TempIdSource::new();
        let mut right_temp = TempIdSource::new();

        let left_foo = left.create_file_node(ContentHash::NULL, &mut left_temp);
        left.attach_node(left_foo, &RepoPath::parse("foo").expect("path")).expect("attach");
        let right_foo = right.create_file_node(ContentHash::NULL, &mut right_temp);
        right.attach_node(right_foo, &RepoPath::parse("foo").expect("path")).expect("attach");

        let mut left_new = BTreeSet::from([left_foo]);
        let mut right_new = BTreeSet::from([right_foo]);
        let mut perm = PermanentIdSource::starting_at(1000);
        unify(&mut left, &mut left_new, &mut right, &mut right_new, &mut perm).expect("unify");

        assert!(left_new.is_empty());
        assert!(right_new.is_empty());
        assert_eq!(left, right);
        let unified_id = left.get_node_by_path(&RepoPath::parse("foo").expect("path")).expect("node").id();
        assert!(unified_id.is_permanent());
    }
}
