//! Roster delta: the canonical encoded difference between two
//! `(roster, marking)` pairs (spec §4.6).

use std::collections::{BTreeMap, BTreeSet};

use crate::basic_io::{self, Line, Stanza, Value};
use crate::change_set::ChangeSet;
use crate::error::RosterError;
use crate::ident::{ContentHash, NodeId, RevisionId};
use crate::marking::{Marking, MarkingMap};
use crate::parallel_iter;
use crate::path::{PathComponent, RepoPath};
use crate::roster::editable::{EditableTree, MarkedEditableTree};
use crate::roster::{AttrValue, NodeKind, Roster};

/// Where a node ends up: its parent id and basename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaLocation {
    /// The new parent's id.
    pub parent: NodeId,
    /// The new basename.
    pub name: PathComponent,
}

/// One attribute change recorded in a delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaAttrChange {
    /// The attribute was cleared.
    Cleared,
    /// The attribute was set to a value.
    Changed(AttrValue),
}

/// The canonical difference between two `(roster, marking)` pairs (spec
/// §4.6). Every collection is keyed by node id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RosterDelta {
    /// Nodes deleted.
    pub deleted: BTreeSet<NodeId>,
    /// Nodes renamed; new location only (old location is implicit).
    pub renamed: BTreeMap<NodeId, DeltaLocation>,
    /// Directories added.
    pub add_dir: BTreeMap<NodeId, DeltaLocation>,
    /// Files added, with their initial content.
    pub add_file: BTreeMap<NodeId, (DeltaLocation, ContentHash)>,
    /// File content replacements.
    pub delta: BTreeMap<NodeId, ContentHash>,
    /// Per-node attribute changes.
    pub attrs: BTreeMap<NodeId, BTreeMap<String, DeltaAttrChange>>,
    /// New marking for every node whose marking changed.
    pub markings: BTreeMap<NodeId, Marking>,
}

impl RosterDelta {
    /// An empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct the delta from `(from, from_mark)` to `(to, to_mark)`.
    ///
    /// Without `rcs`, this is simple mode: a parallel walk of both node
    /// maps and both marking maps with no reverse change set to narrow
    /// which nodes structurally changed. Appropriate for siblings sharing
    /// the same parent revision (spec §4.6 "Construction... without rcs").
    ///
    /// With `rcs` (merge-edge mode), `rcs` must be the change set that
    /// rebuilds `from` out of `to` (the reverse of the edge this delta
    /// encodes). Only the nodes it actually touches get structural
    /// stanzas — a node it adds exists only in `to` (forward add), a node
    /// it adds to its own target exists only in `from` (forward delete),
    /// and a node its rename/delta/attr edits touch exists in both and is
    /// diffed directly. Every forward-added node gets a marking stanza
    /// unconditionally; every other touched node gets one only if its
    /// mark set actually differs (spec §4.6 "Construction... with rcs").
    pub fn build(from: &Roster, from_mark: &MarkingMap, to: &Roster, to_mark: &MarkingMap, rcs: Option<&ChangeSet>) -> Result<Self, RosterError> {
        let mut delta = Self::new();

        match rcs {
            None => Self::build_unconstrained(&mut delta, from, from_mark, to, to_mark),
            Some(rcs) => Self::build_from_reverse_cset(&mut delta, from, from_mark, to, to_mark, rcs),
        }

        Ok(delta)
    }

    fn build_unconstrained(delta: &mut Self, from: &Roster, from_mark: &MarkingMap, to: &Roster, to_mark: &MarkingMap) {
        let from_nodes: BTreeMap<NodeId, ()> = from.all_nodes().map(|(id, _)| (*id, ())).collect();
        let to_nodes: BTreeMap<NodeId, ()> = to.all_nodes().map(|(id, _)| (*id, ())).collect();
        let mut nodes = parallel_iter::ParallelIter::new(&from_nodes, &to_nodes);
        loop {
            match nodes.advance() {
                parallel_iter::Transition::InLeft { key, .. } => {
                    delta.deleted.insert(*key);
                }
                parallel_iter::Transition::InRight { key, .. } => diff_added_node(delta, to, *key),
                parallel_iter::Transition::InBoth { key, .. } => diff_node_in_both(delta, from, to, *key),
                parallel_iter::Transition::Done => break,
            }
        }

        let from_mark_keys = to_marking_map_keys(from_mark);
        let to_mark_keys = to_marking_map_keys(to_mark);
        let mut marks = parallel_iter::ParallelIter::new(&from_mark_keys, &to_mark_keys);
        loop {
            match marks.advance() {
                parallel_iter::Transition::InLeft { .. } => {}
                parallel_iter::Transition::InRight { key, .. } => {
                    delta.markings.insert(*key, to_mark.get(*key).expect("id came from to_mark").clone());
                }
                parallel_iter::Transition::InBoth { key, .. } => {
                    let old = from_mark.get(*key).expect("id is in_both");
                    let new = to_mark.get(*key).expect("id is in_both");
                    if old != new {
                        delta.markings.insert(*key, new.clone());
                    }
                }
                parallel_iter::Transition::Done => break,
            }
        }
    }

    fn build_from_reverse_cset(delta: &mut Self, from: &Roster, from_mark: &MarkingMap, to: &Roster, to_mark: &MarkingMap, rcs: &ChangeSet) {
        // rcs rebuilds `from` out of `to`: a node it deletes (from its own
        // source, which is `to`) only exists forward in `to` — a forward
        // add.
        for &id in &rcs.nodes_deleted {
            diff_added_node(delta, to, id);
            delta.markings.insert(id, to_mark.get(id).expect("forward-added node has a to marking").clone());
        }

        // A node it adds (into its own target, which is `from`) only
        // exists forward in `from` — a forward delete. No new marking: a
        // deleted node's marking is dropped on apply, not recorded.
        for &id in rcs.dirs_added.keys().chain(rcs.files_added.keys()) {
            delta.deleted.insert(id);
        }

        // Everything else rcs touches structurally exists on both sides;
        // diff it directly and only record a marking if it actually
        // differs.
        let mut touched_both: BTreeSet<NodeId> = BTreeSet::new();
        touched_both.extend(rcs.nodes_renamed.keys().copied());
        touched_both.extend(rcs.deltas_applied.keys().copied());
        touched_both.extend(rcs.attrs_cleared.keys().copied());
        touched_both.extend(rcs.attrs_set.keys().copied());
        for id in touched_both {
            diff_node_in_both(delta, from, to, id);
            let old = from_mark.get(id).expect("structurally touched node has a from marking");
            let new = to_mark.get(id).expect("structurally touched node has a to marking");
            if old != new {
                delta.markings.insert(id, new.clone());
            }
        }
    }

    /// Apply this delta onto `(roster, marking)`, per spec §4.6
    /// "Application": detach deleted/renamed, drop deleted, create and
    /// attach adds and rename targets, apply deltas and attr edits, apply
    /// recorded markings, then drop markings for deleted nodes.
    pub fn apply(&self, roster: &mut Roster, marking: &mut MarkingMap, revision: RevisionId) -> Result<(), RosterError> {
        let mut fresh_ids = crate::ident::PermanentIdSource::starting_at(0);
        let mut tree = MarkedEditableTree::new(roster, &mut fresh_ids, marking, revision);

        let mut to_detach: Vec<NodeId> = self.deleted.iter().copied().chain(self.renamed.keys().copied()).collect();
        let mut detach_paths = Vec::new();
        for id in to_detach.drain(..) {
            detach_paths.push((id, tree.path_of(id)?));
        }
        detach_paths.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        for (id, path) in &detach_paths {
            let detached = tree.detach_node(path)?;
            if detached != *id {
                return Err(crate::bug!("delta detach at {path} returned {detached}, expected {id}"));
            }
        }

        for &id in &self.deleted {
            tree.drop_detached_node(id)?;
        }

        for &id in self.add_dir.keys() {
            tree.insert_dir_node(id)?;
        }
        for (&id, (_, content)) in &self.add_file {
            tree.insert_file_node(id, *content)?;
        }

        // Attachment order must be parent before child, but a new node's
        // parent may itself be another new node with not-yet-known final
        // path, so resolve greedily: repeatedly attach whichever pending
        // entry's parent is already resolvable.
        let mut pending: Vec<(NodeId, DeltaLocation)> = self
            .add_dir
            .iter()
            .map(|(id, loc)| (*id, loc.clone()))
            .chain(self.add_file.iter().map(|(id, (loc, _))| (*id, loc.clone())))
            .chain(self.renamed.iter().map(|(id, loc)| (*id, loc.clone())))
            .collect();
        while !pending.is_empty() {
            let resolvable = pending.iter().position(|(_, loc)| tree.path_of(loc.parent).is_ok());
            let Some(i) = resolvable else {
                return Err(crate::bug!("roster delta attach order could not be resolved"));
            };
            let (id, loc) = pending.remove(i);
            let parent_path = tree.path_of(loc.parent)?;
            tree.attach_node(id, &parent_path.child(loc.name))?;
        }

        for (&id, &new_content) in &self.delta {
            let path = tree.path_of(id)?;
            let current = tree.file_content(id)?;
            tree.apply_delta(&path, current, new_content)?;
        }

        for (&id, changes) in &self.attrs {
            let path = tree.path_of(id)?;
            for (key, change) in changes {
                match change {
                    DeltaAttrChange::Cleared => tree.clear_attr(&path, key)?,
                    DeltaAttrChange::Changed(value) => tree.set_attr(&path, key, value.clone())?,
                }
            }
        }

        drop(tree);
        for (&id, new_marking) in &self.markings {
            marking.insert(id, new_marking.clone());
        }
        for &id in &self.deleted {
            marking.remove(id);
        }

        Ok(())
    }

    /// Return the new marking for `nid`, if this delta records one.
    #[must_use]
    pub fn try_get_marking(&self, nid: NodeId) -> Option<&Marking> {
        self.markings.get(&nid)
    }

    /// Return the new content for `nid`: a replaced file's new content, an
    /// added file's initial content, the null content for a deleted node,
    /// or `None` if this delta does not mention `nid` (spec §4.6 "Partial
    /// queries").
    #[must_use]
    pub fn try_get_content(&self, nid: NodeId) -> Option<ContentHash> {
        if let Some(&content) = self.delta.get(&nid) {
            return Some(content);
        }
        if let Some((_, content)) = self.add_file.get(&nid) {
            return Some(*content);
        }
        if self.deleted.contains(&nid) {
            return Some(ContentHash::NULL);
        }
        None
    }

    /// Render this delta as a textual basic-IO document, in the fixed
    /// stanza order of spec §4.6: `deleted`, `rename`, `add_dir`,
    /// `add_file`, `delta`, attribute edits, then `marking`.
    #[must_use]
    pub fn to_document(&self) -> String {
        let mut stanzas: Vec<Stanza> = Vec::new();

        for id in &self.deleted {
            stanzas.push(vec![line1("deleted", nid(*id))]);
        }
        for (id, loc) in &self.renamed {
            stanzas.push(vec![line1("rename", nid(*id)), location_line(loc)]);
        }
        for (id, loc) in &self.add_dir {
            stanzas.push(vec![line1("add_dir", nid(*id)), location_line(loc)]);
        }
        for (id, (loc, content)) in &self.add_file {
            stanzas.push(vec![
                line1("add_file", nid(*id)),
                location_line(loc),
                Line {
                    symbol: "content".to_owned(),
                    values: vec![Value::Hex(content.0.as_bytes().to_vec())],
                },
            ]);
        }
        for (id, content) in &self.delta {
            stanzas.push(vec![
                line1("delta", nid(*id)),
                Line {
                    symbol: "content".to_owned(),
                    values: vec![Value::Hex(content.0.as_bytes().to_vec())],
                },
            ]);
        }
        for (id, changes) in &self.attrs {
            for (key, change) in changes {
                match change {
                    DeltaAttrChange::Cleared => {
                        stanzas.push(vec![
                            line1("attr_cleared", nid(*id)),
                            Line {
                                symbol: "attr".to_owned(),
                                values: vec![Value::Str(key.clone())],
                            },
                        ]);
                    }
                    DeltaAttrChange::Changed(value) => {
                        stanzas.push(vec![
                            line1("attr_changed", nid(*id)),
                            Line {
                                symbol: "attr".to_owned(),
                                values: vec![Value::Str(key.clone())],
                            },
                            Line {
                                symbol: "value".to_owned(),
                                values: vec![Value::Str(value.live.to_string()), Value::Str(value.value.clone())],
                            },
                        ]);
                    }
                }
            }
        }
        for (id, marking) in &self.markings {
            let mut lines = vec![
                line1("marking", nid(*id)),
                Line {
                    symbol: "birth".to_owned(),
                    values: vec![Value::Hex(marking.birth.map_or_else(Vec::new, |r| r.0.as_bytes().to_vec()))],
                },
            ];
            lines.push(Line {
                symbol: "path_mark".to_owned(),
                values: marking.parent_name.iter().map(|r| Value::Hex(r.0.as_bytes().to_vec())).collect(),
            });
            if !marking.content.is_empty() {
                lines.push(Line {
                    symbol: "content_mark".to_owned(),
                    values: marking.content.iter().map(|r| Value::Hex(r.0.as_bytes().to_vec())).collect(),
                });
            }
            for (key, marks) in &marking.attrs {
                if marks.is_empty() {
                    continue;
                }
                let mut values = vec![Value::Str(key.clone())];
                values.extend(marks.iter().map(|r| Value::Hex(r.0.as_bytes().to_vec())));
                lines.push(Line {
                    symbol: "attr_mark".to_owned(),
                    values,
                });
            }
            stanzas.push(lines);
        }

        basic_io::write_document(&stanzas)
    }

    /// Parse a document produced by [`Self::to_document`] back into a
    /// `RosterDelta`.
    pub fn parse_document(stream_name: impl Into<String>, input: &str) -> Result<Self, RosterError> {
        let stream_name = stream_name.into();
        let stanzas = basic_io::Parser::new(stream_name.clone(), input).parse_document()?;
        let malformed = |reason: &str| RosterError::Malformed {
            stream: stream_name.clone(),
            line: 0,
            column: 0,
            reason: reason.to_owned(),
        };
        let mut delta = Self::new();

        for stanza in &stanzas {
            let head = stanza.first().ok_or_else(|| malformed("empty stanza"))?;
            let id = parse_nid(head, 0, &malformed)?;
            match head.symbol.as_str() {
                "deleted" => {
                    delta.deleted.insert(id);
                }
                "rename" => {
                    let loc = parse_location(stanza.get(1), &malformed)?;
                    delta.renamed.insert(id, loc);
                }
                "add_dir" => {
                    let loc = parse_location(stanza.get(1), &malformed)?;
                    delta.add_dir.insert(id, loc);
                }
                "add_file" => {
                    let loc = parse_location(stanza.get(1), &malformed)?;
                    let content_line = stanza.get(2).ok_or_else(|| malformed("add_file missing content"))?;
                    let content = parse_hex_value(content_line, 0, &malformed)?;
                    delta.add_file.insert(id, (loc, ContentHash::new(crate::ident::Digest::from_bytes(content))));
                }
                "delta" => {
                    let content_line = stanza.get(1).ok_or_else(|| malformed("delta missing content"))?;
                    let content = parse_hex_value(content_line, 0, &malformed)?;
                    delta.delta.insert(id, ContentHash::new(crate::ident::Digest::from_bytes(content)));
                }
                "attr_cleared" => {
                    let attr_line = stanza.get(1).ok_or_else(|| malformed("attr_cleared missing attr"))?;
                    let key = parse_str_value(attr_line, 0, &malformed)?;
                    delta.attrs.entry(id).or_default().insert(key, DeltaAttrChange::Cleared);
                }
                "attr_changed" => {
                    let attr_line = stanza.get(1).ok_or_else(|| malformed("attr_changed missing attr"))?;
                    let key = parse_str_value(attr_line, 0, &malformed)?;
                    let value_line = stanza.get(2).ok_or_else(|| malformed("attr_changed missing value"))?;
                    let live = parse_str_value(value_line, 0, &malformed)? == "true";
                    let value = value_line.values.get(1).and_then(Value::as_str).ok_or_else(|| malformed("attr_changed value missing payload"))?.to_owned();
                    delta
                        .attrs
                        .entry(id)
                        .or_default()
                        .insert(key, DeltaAttrChange::Changed(AttrValue { live, value }));
                }
                "marking" => {
                    let marking = parse_marking(stanza, &malformed)?;
                    delta.markings.insert(id, marking);
                }
                other => return Err(malformed(&format!("unknown stanza symbol {other:?}"))),
            }
        }

        Ok(delta)
    }
}

fn parse_nid(line: &Line, index: usize, malformed: &impl Fn(&str) -> RosterError) -> Result<NodeId, RosterError> {
    let raw = line.values.get(index).and_then(Value::as_str).ok_or_else(|| malformed("expected a decimal node id"))?;
    raw.parse::<u64>().map(NodeId::from_raw).map_err(|_| malformed("malformed decimal node id"))
}

fn parse_str_value(line: &Line, index: usize, malformed: &impl Fn(&str) -> RosterError) -> Result<String, RosterError> {
    line.values
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| malformed("expected a string value"))
}

fn parse_hex_value(line: &Line, index: usize, malformed: &impl Fn(&str) -> RosterError) -> Result<[u8; 20], RosterError> {
    let bytes = line.values.get(index).and_then(Value::as_hex).ok_or_else(|| malformed("expected a hex value"))?;
    <[u8; 20]>::try_from(bytes).map_err(|_| malformed("hex value is not 20 bytes"))
}

fn parse_location(line: Option<&Line>, malformed: &impl Fn(&str) -> RosterError) -> Result<DeltaLocation, RosterError> {
    let line = line.ok_or_else(|| malformed("missing location"))?;
    let parent = parse_nid(line, 0, malformed)?;
    let name = line.values.get(1).and_then(Value::as_str).ok_or_else(|| malformed("location missing name"))?;
    let name = PathComponent::new(name).map_err(|_| malformed("invalid path component in location"))?;
    Ok(DeltaLocation { parent, name })
}

fn parse_rev_set(line: &Line, malformed: &impl Fn(&str) -> RosterError) -> Result<BTreeSet<RevisionId>, RosterError> {
    line.values
        .iter()
        .map(|v| {
            let hex = v.as_hex().ok_or_else(|| malformed("expected a hex revision id"))?;
            let bytes = <[u8; 20]>::try_from(hex).map_err(|_| malformed("revision id is not 20 bytes"))?;
            Ok(RevisionId::new(crate::ident::Digest::from_bytes(bytes)))
        })
        .collect()
}

fn parse_marking(stanza: &Stanza, malformed: &impl Fn(&str) -> RosterError) -> Result<Marking, RosterError> {
    let mut marking = Marking::default();
    for line in &stanza[1..] {
        match line.symbol.as_str() {
            "birth" => {
                let hex = line.values.first().and_then(Value::as_hex).ok_or_else(|| malformed("birth missing value"))?;
                marking.birth = if hex.is_empty() {
                    None
                } else {
                    let bytes = <[u8; 20]>::try_from(hex).map_err(|_| malformed("birth revision id is not 20 bytes"))?;
                    Some(RevisionId::new(crate::ident::Digest::from_bytes(bytes)))
                };
            }
            "path_mark" => marking.parent_name = parse_rev_set(line, malformed)?,
            "content_mark" => marking.content = parse_rev_set(line, malformed)?,
            "attr_mark" => {
                let key = line.values.first().and_then(Value::as_str).ok_or_else(|| malformed("attr_mark missing key"))?.to_owned();
                let marks: BTreeSet<RevisionId> = line.values[1..]
                    .iter()
                    .map(|v| {
                        let hex = v.as_hex().ok_or_else(|| malformed("expected a hex revision id"))?;
                        let bytes = <[u8; 20]>::try_from(hex).map_err(|_| malformed("revision id is not 20 bytes"))?;
                        Ok(RevisionId::new(crate::ident::Digest::from_bytes(bytes)))
                    })
                    .collect::<Result<_, RosterError>>()?;
                marking.attrs.insert(key, marks);
            }
            other => return Err(malformed(&format!("unknown marking line {other:?}"))),
        }
    }
    Ok(marking)
}

fn line1(symbol: &str, value: String) -> Line {
    Line {
        symbol: symbol.to_owned(),
        values: vec![Value::Str(value)],
    }
}

fn nid(id: NodeId) -> String {
    id.raw().to_string()
}

fn location_line(loc: &DeltaLocation) -> Line {
    Line {
        symbol: "location".to_owned(),
        values: vec![Value::Str(nid(loc.parent)), Value::Str(loc.name.as_str().to_owned())],
    }
}

fn to_marking_map_keys(m: &MarkingMap) -> BTreeMap<NodeId, ()> {
    m.iter().map(|(id, _)| (*id, ())).collect()
}

/// Record `id` (present only in `to`) as an add, plus its live attributes.
fn diff_added_node(delta: &mut RosterDelta, to: &Roster, id: NodeId) {
    let node = to.get_node(id).expect("id exists in to");
    let loc = DeltaLocation {
        parent: node.parent().expect("non-root node has a parent"),
        name: node.name().clone(),
    };
    match node.kind() {
        NodeKind::Dir(_) => {
            delta.add_dir.insert(id, loc);
        }
        NodeKind::File(content) => {
            delta.add_file.insert(id, (loc, *content));
        }
    }
    let mut changes = BTreeMap::new();
    for (key, value) in node.attrs() {
        if value.live {
            changes.insert(key.clone(), DeltaAttrChange::Changed(value.clone()));
        }
    }
    if !changes.is_empty() {
        delta.attrs.insert(id, changes);
    }
}

/// Record the rename/delta/attr differences for `id`, present in both
/// `from` and `to`.
fn diff_node_in_both(delta: &mut RosterDelta, from: &Roster, to: &Roster, id: NodeId) {
    let from_node = from.get_node(id).expect("id is in both rosters");
    let to_node = to.get_node(id).expect("id is in both rosters");
    if from_node.parent() != to_node.parent() || from_node.name() != to_node.name() {
        if let Some(parent) = to_node.parent() {
            delta.renamed.insert(
                id,
                DeltaLocation {
                    parent,
                    name: to_node.name().clone(),
                },
            );
        }
    }
    if let (Some(old), Some(new)) = (from_node.file_content(), to_node.file_content()) {
        if old != new {
            delta.delta.insert(id, new);
        }
    }
    let mut keys: BTreeSet<&String> = BTreeSet::new();
    keys.extend(from_node.attrs().keys());
    keys.extend(to_node.attrs().keys());
    for key in keys {
        let old = from_node.attrs().get(key);
        let new = to_node.attrs().get(key);
        match new {
            Some(n) if old != new && n.live => {
                delta.attrs.entry(id).or_default().insert(key.clone(), DeltaAttrChange::Changed(n.clone()));
            }
            Some(n) if old != new && !n.live => {
                delta.attrs.entry(id).or_default().insert(key.clone(), DeltaAttrChange::Cleared);
            }
            _ => {}
        }
    }
}
