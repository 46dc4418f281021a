//! End-to-end scenarios exercising the full roster/marking/change-set/
//! merge/delta pipeline together, plus randomized round-trip properties.

use std::collections::BTreeSet;

use proptest::prelude::*;
use roster_core::change_set::make_cset;
use roster_core::delta::RosterDelta;
use roster_core::error::RosterError;
use roster_core::ident::{ContentHash, NodeIdSource, PermanentIdSource, RevisionId};
use roster_core::manifest::{serialize_manifest, serialize_roster};
use roster_core::marking::{mark_merged_scalar, mark_new_node_typed, MarkingMap};
use roster_core::path::RepoPath;
use roster_core::roster::editable::{BaseEditableTree, EditableTree};
use roster_core::roster::Roster;

fn rev(byte: u8) -> RevisionId {
    let hex = format!("{byte:02x}").repeat(20);
    RevisionId::from_hex(&hex).expect("valid hex")
}

fn empty_root(birth: RevisionId) -> (Roster, MarkingMap, PermanentIdSource) {
    let mut roster = Roster::new();
    let mut ids = PermanentIdSource::starting_at(1);
    let root = roster.create_dir_node(&mut ids);
    roster.attach_node(root, &RepoPath::root()).expect("attach root");
    let mut marking = MarkingMap::new();
    marking.insert(root, mark_new_node_typed(birth, false, &[]));
    (roster, marking, ids)
}

/// Scenario 1: empty-root manifest and roster serialization.
#[test]
fn scenario_empty_root_round_trip() {
    let birth = rev(0x11);
    let (roster, marking, _) = empty_root(birth);

    assert_eq!(serialize_manifest(&roster), "dir \"\"\n");

    let roster_text = serialize_roster(&roster, &marking).expect("serialize");
    assert!(roster_text.contains("ident \"1\""));
    assert!(roster_text.contains(&format!("birth [{}]", "11".repeat(20))));
    assert!(roster_text.contains(&format!("path_mark [{}]", "11".repeat(20))));
}

/// Scenario 2: applying a single add-file change set.
#[test]
fn scenario_single_file_cset_application() {
    let birth = rev(0x11);
    let (mut roster, _, mut ids) = empty_root(birth);
    let content = ContentHash::from_hex(&"aa".repeat(20)).expect("hex");

    let foo = ids.next();
    {
        let mut tree = BaseEditableTree::new(&mut roster, &mut ids);
        tree.insert_file_node(foo, content).expect("insert");
        tree.attach_node(foo, &RepoPath::parse("foo").expect("path")).expect("attach");
    }

    assert_eq!(roster.node_count(), 2);
    let node = roster.get_node_by_path(&RepoPath::parse("foo").expect("path")).expect("node");
    assert_eq!(node.file_content(), Some(content));
    assert_eq!(serialize_manifest(&roster), format!("dir \"\"\n\nfile \"foo\"\ncontent [{}]\n", "aa".repeat(20)));
}

/// Scenario 3: rename plus content delta preserves node identity, and
/// `make_cset` recovers the same edit.
#[test]
fn scenario_rename_and_delta() {
    let birth = rev(0x11);
    let (mut from, _, mut ids) = empty_root(birth);
    let old_content = ContentHash::from_hex(&"aa".repeat(20)).expect("hex");
    let foo = from.create_file_node(old_content, &mut ids);
    from.attach_node(foo, &RepoPath::parse("foo").expect("path")).expect("attach");

    let mut to = from.clone();
    to.detach_node(&RepoPath::parse("foo").expect("path")).expect("detach");
    to.attach_node(foo, &RepoPath::parse("bar").expect("path")).expect("attach renamed");
    let new_content = ContentHash::from_hex(&"bb".repeat(20)).expect("hex");
    to.apply_delta(&RepoPath::parse("bar").expect("path"), old_content, new_content).expect("delta");

    let bar_node = to.get_node_by_path(&RepoPath::parse("bar").expect("path")).expect("node");
    assert_eq!(bar_node.id(), foo);
    assert_eq!(bar_node.file_content(), Some(new_content));

    let cset = make_cset(&from, &to).expect("cset");
    let mut applied = from.clone();
    let mut apply_ids = PermanentIdSource::starting_at(1000);
    let mut tree = BaseEditableTree::new(&mut applied, &mut apply_ids);
    cset.apply(&mut tree).expect("apply");
    assert_eq!(applied, to);
}

/// Scenario 4: a clean merge (one side renames, the other is untouched)
/// keeps the winning mark and the loser's still-visible content mark.
#[test]
fn scenario_clean_merge_keeps_winning_mark() {
    let old = rev(0x01);
    let left = rev(0x02);
    let merged = rev(0x03);

    let left_mark = BTreeSet::from([left]);
    let left_uncommon = BTreeSet::from([left]);
    let right_mark = BTreeSet::from([old]);
    let right_uncommon = BTreeSet::new();

    // Left renamed (left_matches = true, the node now sits where left put
    // it); right is untouched (right_matches = false, the new location
    // differs from right's).
    let result = mark_merged_scalar(merged, &left_mark, &left_uncommon, true, &right_mark, &right_uncommon, false);
    assert_eq!(result, BTreeSet::from([left]));
}

/// Scenario 5: a genuine three-way conflict gets a fresh mark.
#[test]
fn scenario_conflict_gets_fresh_mark() {
    let left = rev(0x02);
    let right = rev(0x03);
    let merged = rev(0x04);

    let left_mark = BTreeSet::from([left]);
    let right_mark = BTreeSet::from([right]);
    let result = mark_merged_scalar(merged, &left_mark, &BTreeSet::from([left]), false, &right_mark, &BTreeSet::from([right]), false);
    assert_eq!(result, BTreeSet::from([merged]));
}

/// Scenario 7 + 8: delta round-trips bit-identically and partial queries
/// behave per spec on deleted/added/unmentioned nodes.
#[test]
fn scenario_delta_bit_identity_and_partial_queries() {
    let birth = rev(0x11);
    let (from, from_mark, mut ids) = empty_root(birth);
    let mut to = from.clone();
    let mut to_mark = from_mark.clone();
    let new_rev = rev(0x22);

    let added = to.create_file_node(ContentHash::from_hex(&"bb".repeat(20)).expect("hex"), &mut ids);
    to.attach_node(added, &RepoPath::parse("added").expect("path")).expect("attach");
    to_mark.insert(added, mark_new_node_typed(new_rev, true, &[]));

    let delta = RosterDelta::build(&from, &from_mark, &to, &to_mark, None).expect("build");

    let mut applied = from.clone();
    let mut applied_mark = from_mark.clone();
    delta.apply(&mut applied, &mut applied_mark, new_rev).expect("apply");

    assert_eq!(serialize_roster(&applied, &applied_mark).expect("serialize"), serialize_roster(&to, &to_mark).expect("serialize"));

    assert_eq!(delta.try_get_content(added), Some(ContentHash::from_hex(&"bb".repeat(20)).expect("hex")));
    assert_eq!(delta.try_get_content(roster_core::ident::NodeId::from_permanent(9999)), None);

    let mut delete_delta = RosterDelta::new();
    let deleted_id = roster_core::ident::NodeId::from_permanent(7);
    delete_delta.deleted.insert(deleted_id);
    assert_eq!(delete_delta.try_get_content(deleted_id), Some(ContentHash::NULL));
}

/// Scenario 6: a node that only one side knows about, whose birth
/// predates that side's divergence, must not silently reappear.
#[test]
fn scenario_die_die_die_blocks_resurrection() {
    use roster_core::error::DomainError;
    use roster_core::merge::mark_merge_roster;

    let (mut left, mut ids, mut left_marking, old_rev) = {
        let (r, m, ids) = empty_root(rev(0x00));
        (r, ids, m, rev(0x00))
    };
    let foo = left.create_file_node(ContentHash::NULL, &mut ids);
    left.attach_node(foo, &RepoPath::parse("foo").expect("path")).expect("attach");
    left_marking.insert(foo, mark_new_node_typed(old_rev, true, &[]));

    let (right, right_marking, _) = empty_root(rev(0x00));
    let new_rev = rev(0xff);

    let mut new_roster = left.clone();
    new_roster.detach_node(&RepoPath::parse("foo").expect("path")).ok();

    let err = mark_merge_roster(&new_roster, &left, &left_marking, &BTreeSet::new(), &right, &right_marking, &BTreeSet::new(), new_rev);
    assert!(matches!(err, Err(RosterError::Domain(DomainError::DieDieDie { .. }))));
}

fn arb_component() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

#[derive(Debug, Clone)]
enum Op {
    AddFile(String),
    Delete(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![arb_component().prop_map(Op::AddFile), (0usize..8).prop_map(Op::Delete),]
}

proptest! {
    /// Randomized property (spec §8): for any sequence of edits starting
    /// from the empty tree, `(start, end)` round-trips through
    /// `make_cset`/apply and through a roster delta.
    #[test]
    fn roundtrip_holds_for_random_edit_sequences(ops in prop::collection::vec(arb_op(), 0..12)) {
        let birth = rev(0x11);
        let (mut roster, mut marking, mut ids) = empty_root(birth);
        let mut live_files: Vec<(roster_core::ident::NodeId, String)> = Vec::new();

        let from = roster.clone();
        let from_mark = marking.clone();

        for op in ops {
            match op {
                Op::AddFile(name) => {
                    let path = RepoPath::parse(&name);
                    let Ok(path) = path else { continue };
                    if roster.has_path(&path) {
                        continue;
                    }
                    let id = roster.create_file_node(ContentHash::NULL, &mut ids);
                    if roster.attach_node(id, &path).is_ok() {
                        marking.insert(id, mark_new_node_typed(rev(0x22), true, &[]));
                        live_files.push((id, name));
                    }
                }
                Op::Delete(idx) => {
                    if live_files.is_empty() {
                        continue;
                    }
                    let (id, name) = live_files.remove(idx % live_files.len());
                    let path = RepoPath::parse(&name).expect("previously parsed");
                    if roster.detach_node(&path).is_ok() {
                        roster.drop_detached_node(id).ok();
                        marking.remove(id);
                    }
                }
            }
        }

        let to = roster.clone();
        let to_mark = marking.clone();

        let cset = make_cset(&from, &to).expect("make_cset");
        let mut applied = from.clone();
        let mut apply_ids = PermanentIdSource::starting_at(1_000_000);
        {
            let mut tree = BaseEditableTree::new(&mut applied, &mut apply_ids);
            cset.apply(&mut tree).expect("apply cset");
        }
        prop_assert_eq!(&applied, &to);
        prop_assert_eq!(cset.is_empty(), from == to);

        let delta = RosterDelta::build(&from, &from_mark, &to, &to_mark, None).expect("build delta");
        let mut delta_applied = from.clone();
        let mut delta_applied_mark = from_mark.clone();
        delta.apply(&mut delta_applied, &mut delta_applied_mark, rev(0x33)).expect("apply delta");
        prop_assert_eq!(&delta_applied, &to);
        prop_assert_eq!(&delta_applied_mark, &to_mark);

        let reverse_cset = make_cset(&to, &from).expect("reverse make_cset");
        let merge_edge_delta = RosterDelta::build(&from, &from_mark, &to, &to_mark, Some(&reverse_cset)).expect("build merge-edge delta");
        let mut merge_edge_applied = from.clone();
        let mut merge_edge_applied_mark = from_mark.clone();
        merge_edge_delta.apply(&mut merge_edge_applied, &mut merge_edge_applied_mark, rev(0x33)).expect("apply merge-edge delta");
        prop_assert_eq!(&merge_edge_applied, &to);
        prop_assert_eq!(&merge_edge_applied_mark, &to_mark);
    }
}
