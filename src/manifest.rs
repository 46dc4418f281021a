//! External serialization interfaces (spec §6): manifest, roster,
//! change-set, and revision serialization, plus content hashing.

use crate::basic_io::{self, Line, Stanza, Value};
use crate::change_set::ChangeSet;
use crate::error::RosterError;
use crate::ident::{ContentHash, ContentHasher, ManifestId, RevisionId};
use crate::marking::MarkingMap;
use crate::roster::{NodeKind, Roster};

/// Render `roster`'s public face, bit-exact, for use as the input to the
/// content hash: for each node in depth-first order, a `dir`/`file`
/// stanza (`content` for files), then each live attribute in sorted key
/// order. Dormant attributes and marking never appear.
#[must_use]
pub fn serialize_manifest(roster: &Roster) -> String {
    let mut stanzas: Vec<Stanza> = Vec::new();
    for id in roster.walk_depth_first() {
        let node = roster.get_node(id).expect("walk_depth_first only yields live ids");
        let path = roster.get_path(id).expect("walked node has a path");
        let mut lines = Vec::new();
        match node.kind() {
            NodeKind::Dir(_) => lines.push(str_line("dir", &path.to_internal_string())),
            NodeKind::File(content) => {
                lines.push(str_line("file", &path.to_internal_string()));
                lines.push(hex_line("content", content.0.as_bytes()));
            }
        }
        for (key, value) in node.attrs() {
            if value.live {
                lines.push(Line {
                    symbol: "attr".to_owned(),
                    values: vec![Value::Str(key.clone()), Value::Str(value.value.clone())],
                });
            }
        }
        stanzas.push(lines);
    }
    basic_io::write_document(&stanzas)
}

/// Render `roster` paired with `marking` as the full database-storage
/// form (spec §6 "Roster serialization"): the manifest fields plus
/// `ident`, dormant attributes, and the full marking for each node.
pub fn serialize_roster(roster: &Roster, marking: &MarkingMap) -> Result<String, RosterError> {
    let mut stanzas: Vec<Stanza> = Vec::new();
    for id in roster.walk_depth_first() {
        let node = roster.get_node(id)?;
        let path = roster.get_path(id)?;
        let node_marking = marking.get(id).ok_or_else(|| crate::bug!("node {id} has no marking entry"))?;
        let mut lines = Vec::new();
        match node.kind() {
            NodeKind::Dir(_) => lines.push(str_line("dir", &path.to_internal_string())),
            NodeKind::File(content) => {
                lines.push(str_line("file", &path.to_internal_string()));
                lines.push(hex_line("content", content.0.as_bytes()));
            }
        }
        lines.push(str_line("ident", &id.raw().to_string()));
        for (key, value) in node.attrs() {
            if value.live {
                lines.push(Line {
                    symbol: "attr".to_owned(),
                    values: vec![Value::Str(key.clone()), Value::Str(value.value.clone())],
                });
            } else {
                lines.push(str_line("dormant_attr", key));
            }
        }
        lines.push(Line {
            symbol: "birth".to_owned(),
            values: vec![Value::Hex(node_marking.birth.map_or_else(Vec::new, |r| r.0.as_bytes().to_vec()))],
        });
        for mark in &node_marking.parent_name {
            lines.push(Line {
                symbol: "path_mark".to_owned(),
                values: vec![Value::Hex(mark.0.as_bytes().to_vec())],
            });
        }
        if node.kind().is_file() {
            for mark in &node_marking.content {
                lines.push(Line {
                    symbol: "content_mark".to_owned(),
                    values: vec![Value::Hex(mark.0.as_bytes().to_vec())],
                });
            }
        }
        for (key, marks) in &node_marking.attrs {
            for mark in marks {
                lines.push(Line {
                    symbol: "attr_mark".to_owned(),
                    values: vec![Value::Str(key.clone()), Value::Hex(mark.0.as_bytes().to_vec())],
                });
            }
        }
        stanzas.push(lines);
    }
    Ok(basic_io::write_document(&stanzas))
}

/// Render a change set: one stanza per operation, in the fixed order
/// `delete`, `rename`, `add_dir`, `add_file`/`content`, `patch`/`from`/`to`,
/// `clear`/`attr`, `set`/`attr`/`value` (spec §6 "Change-set serialization").
#[must_use]
pub fn serialize_change_set(cset: &ChangeSet) -> String {
    let mut stanzas: Vec<Stanza> = Vec::new();
    for id in &cset.nodes_deleted {
        stanzas.push(vec![str_line("delete", &id.raw().to_string())]);
    }
    for (id, loc) in &cset.nodes_renamed {
        stanzas.push(vec![str_line("rename", &id.raw().to_string()), str_line("to", &loc.path.to_internal_string())]);
    }
    for (id, loc) in &cset.dirs_added {
        stanzas.push(vec![str_line("add_dir", &id.raw().to_string()), str_line("to", &loc.path.to_internal_string())]);
    }
    for (id, (loc, content)) in &cset.files_added {
        stanzas.push(vec![
            str_line("add_file", &id.raw().to_string()),
            str_line("to", &loc.path.to_internal_string()),
            hex_line("content", content.0.as_bytes()),
        ]);
    }
    for (id, (old, new)) in &cset.deltas_applied {
        stanzas.push(vec![str_line("patch", &id.raw().to_string()), hex_line("from", old.0.as_bytes()), hex_line("to", new.0.as_bytes())]);
    }
    for (id, keys) in &cset.attrs_cleared {
        for key in keys {
            stanzas.push(vec![str_line("clear", &id.raw().to_string()), str_line("attr", key)]);
        }
    }
    for (id, attrs) in &cset.attrs_set {
        for (key, value) in attrs {
            stanzas.push(vec![
                str_line("set", &id.raw().to_string()),
                str_line("attr", key),
                Line {
                    symbol: "value".to_owned(),
                    values: vec![Value::Str(value.value.clone())],
                },
            ]);
        }
    }
    basic_io::write_document(&stanzas)
}

/// Render a revision: `format_version "1"`, then `new_manifest [<hex>]`,
/// then for each edge `old_revision [<hex>]` followed by its change set
/// (spec §6 "Revision serialization"). Merge edges must already be sorted
/// by the old revision id; this function does not reorder them.
#[must_use]
pub fn serialize_revision(new_manifest: ManifestId, edges: &[(RevisionId, ChangeSet)]) -> String {
    let mut stanzas: Vec<Stanza> = vec![
        vec![str_line("format_version", "1")],
        vec![hex_line("new_manifest", new_manifest.0.as_bytes())],
    ];
    for (old_rev, cset) in edges {
        stanzas.push(vec![hex_line("old_revision", old_rev.0.as_bytes())]);
        for stanza_text in serialize_change_set(cset).split("\n\n") {
            if stanza_text.trim().is_empty() {
                continue;
            }
            // Re-parse so the edge's change-set stanzas interleave with
            // the revision document as individual stanzas rather than one
            // opaque blob.
            let reparsed = basic_io::parse_document("revision change set", &format!("{stanza_text}\n\n")).expect("serialize_change_set output always reparses");
            stanzas.extend(reparsed);
        }
    }
    basic_io::write_document(&stanzas)
}

/// Compute the content hash of a manifest's exact serialized bytes.
#[must_use]
pub fn manifest_hash(roster: &Roster, hasher: &dyn ContentHasher) -> ManifestId {
    ManifestId::new(hasher.hash(serialize_manifest(roster).as_bytes()))
}

/// Compute the revision id: the content hash of the revision's
/// serialization.
#[must_use]
pub fn revision_hash(new_manifest: ManifestId, edges: &[(RevisionId, ChangeSet)], hasher: &dyn ContentHasher) -> RevisionId {
    RevisionId::new(hasher.hash(serialize_revision(new_manifest, edges).as_bytes()))
}

fn str_line(symbol: &str, value: &str) -> Line {
    Line {
        symbol: symbol.to_owned(),
        values: vec![Value::Str(value.to_owned())],
    }
}

fn hex_line(symbol: &str, bytes: &[u8]) -> Line {
    Line {
        symbol: symbol.to_owned(),
        values: vec![Value::Hex(bytes.to_vec())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{PermanentIdSource, Sha256ContentHasher};
    use crate::marking::mark_new_node_typed;
    use crate::path::RepoPath;

    fn sample_roster() -> (Roster, MarkingMap) {
        let rev = RevisionId::from_hex(&"11".repeat(20)).expect("hex");
        let mut r = Roster::new();
        let mut ids = PermanentIdSource::starting_at(1);
        let root = r.create_dir_node(&mut ids);
        r.attach_node(root, &RepoPath::root()).expect("attach root");
        let foo = r.create_file_node(ContentHash::from_hex(&"aa".repeat(20)).expect("hex"), &mut ids);
        r.attach_node(foo, &RepoPath::parse("foo").expect("path")).expect("attach");
        let mut m = MarkingMap::new();
        m.insert(root, mark_new_node_typed(rev, false, &[]));
        m.insert(foo, mark_new_node_typed(rev, true, &[]));
        (r, m)
    }

    #[test]
    fn manifest_omits_ident_and_marking() {
        let (roster, _) = sample_roster();
        let text = serialize_manifest(&roster);
        assert!(!text.contains("ident"));
        assert!(!text.contains("birth"));
        assert!(text.contains("file \"foo\""));
        assert!(text.contains("content ["));
    }

    #[test]
    fn roster_serialization_includes_ident_and_marking() {
        let (roster, marking) = sample_roster();
        let text = serialize_roster(&roster, &marking).expect("serialize");
        assert!(text.contains("ident"));
        assert!(text.contains("birth"));
        assert!(text.contains("path_mark"));
    }

    #[test]
    fn manifest_hash_is_deterministic() {
        let (roster, _) = sample_roster();
        let hasher = Sha256ContentHasher;
        assert_eq!(manifest_hash(&roster, &hasher), manifest_hash(&roster, &hasher));
    }

    #[test]
    fn revision_serialization_interleaves_edge_change_sets() {
        let (from, _) = sample_roster();
        let (to, _) = sample_roster();
        let cset = crate::change_set::make_cset(&from, &to).expect("cset");
        let old_rev = RevisionId::from_hex(&"22".repeat(20)).expect("hex");
        let manifest_id = ManifestId::from_hex(&"33".repeat(20)).expect("hex");
        let text = serialize_revision(manifest_id, &[(old_rev, cset)]);
        assert!(text.starts_with("format_version \"1\""));
        assert!(text.contains("old_revision"));
    }
}
