//! Collaborator interfaces consumed by the core (spec §6): persistence,
//! file storage, and revision-graph queries are a host's responsibility.
//! This module only declares the trait shapes so code built on top of
//! this crate can stay generic over storage; nothing here is implemented.

use crate::error::RosterError;
use crate::ident::RevisionId;
use crate::marking::MarkingMap;
use crate::roster::Roster;

/// Stores and retrieves file content by its content hash.
pub trait FileContentStore {
    /// Fetch the bytes for a stored file version.
    fn get_file_version(&self, id: crate::ident::ContentHash) -> Result<Vec<u8>, RosterError>;
    /// Store a file version's bytes under its content hash.
    fn put_file_version(&mut self, id: crate::ident::ContentHash, data: &[u8]) -> Result<(), RosterError>;
    /// True if a file version is already stored.
    fn file_version_exists(&self, id: crate::ident::ContentHash) -> bool;
    /// Compute an arbitrary (not necessarily ancestor-related) delta
    /// between two stored file versions, for storage compaction.
    fn get_arbitrary_file_delta(&self, old_id: crate::ident::ContentHash, new_id: crate::ident::ContentHash) -> Result<Vec<u8>, RosterError>;
}

/// Stores and retrieves `(roster, marking)` pairs and revision documents.
pub trait RosterStore {
    /// Fetch the roster and marking map recorded for a revision.
    fn get_roster(&self, rev_id: RevisionId) -> Result<(Roster, MarkingMap), RosterError>;
    /// Store a revision's serialized bytes.
    fn put_revision(&mut self, rev_id: RevisionId, revision_data: &[u8]) -> Result<(), RosterError>;
}

/// Queries the ancestry DAG of revisions.
pub trait RevisionGraph {
    /// Split the ancestors of `left` and `right` into the sets unique to
    /// each side, excluding their common ancestry — the `left_uncommon`/
    /// `right_uncommon` inputs to [`crate::merge::mark_merge_roster`].
    fn get_uncommon_ancestors(&self, left: RevisionId, right: RevisionId) -> Result<(std::collections::BTreeSet<RevisionId>, std::collections::BTreeSet<RevisionId>), RosterError>;
    /// Order `revs` so that every revision appears after its ancestors.
    fn toposort(&self, revs: &[RevisionId]) -> Result<Vec<RevisionId>, RosterError>;
    /// Remove from `set` every revision that is an ancestor of another
    /// member of `set`, leaving only the "heads".
    fn erase_ancestors(&self, set: &std::collections::BTreeSet<RevisionId>) -> Result<std::collections::BTreeSet<RevisionId>, RosterError>;
}
