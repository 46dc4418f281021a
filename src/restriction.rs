//! Path-set filter used to split a change set into included/excluded
//! halves for partial commits (spec §4.7).

use crate::error::{DomainError, RosterError};
use crate::path::RepoPath;
use crate::roster::Roster;

/// A predicate over paths built from an include list, an exclude list,
/// and an optional depth limit.
///
/// An empty restriction (no includes, no excludes) matches every path. A
/// non-empty restriction matches a path iff some include path is a
/// non-strict ancestor of it, no exclude path nearer than that include is
/// also an ancestor, and the path's depth below the nearest include does
/// not exceed the depth limit. Ancestors of any include path are always
/// matched too, so the restriction never asks a caller to apply a change
/// set whose parent directories are missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Restriction {
    includes: Vec<RepoPath>,
    excludes: Vec<RepoPath>,
    /// Maximum depth below the nearest include path; `None` is unlimited.
    depth_limit: Option<u32>,
}

impl Restriction {
    /// Build a restriction, validating that every include/exclude path
    /// resolves in `from` or `to` unless `skip_validation` is set (for
    /// restrictions built over working-copy-only paths, spec §4.7).
    pub fn new(
        includes: Vec<RepoPath>,
        excludes: Vec<RepoPath>,
        depth_limit: Option<u32>,
        from: &Roster,
        to: &Roster,
        skip_validation: bool,
    ) -> Result<Self, RosterError> {
        if !skip_validation {
            for path in includes.iter().chain(excludes.iter()) {
                if !from.has_path(path) && !to.has_path(path) {
                    return Err(DomainError::UnknownRestrictionPath { path: path.clone() }.into());
                }
            }
        }
        Ok(Self { includes, excludes, depth_limit })
    }

    /// The empty restriction: matches everything, validates nothing.
    #[must_use]
    pub const fn everything() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            depth_limit: None,
        }
    }

    /// True if this restriction matches `path`.
    #[must_use]
    pub fn matches(&self, path: &RepoPath) -> bool {
        if self.includes.is_empty() && self.excludes.is_empty() {
            return true;
        }
        if self.includes.iter().any(|inc| path.is_ancestor_of(inc)) {
            return true;
        }

        let nearest_include = if self.includes.is_empty() {
            Some(RepoPath::root())
        } else {
            self.includes.iter().filter(|inc| inc.is_ancestor_of(path)).max_by_key(|inc| inc.len()).cloned()
        };
        let Some(nearest_include) = nearest_include else {
            return false;
        };

        let nearer_exclude = self.excludes.iter().any(|exc| exc.is_ancestor_of(path) && exc.len() > nearest_include.len());
        if nearer_exclude {
            return false;
        }

        if let Some(limit) = self.depth_limit {
            let depth = path.len().saturating_sub(nearest_include.len());
            if depth as u32 > limit {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::PermanentIdSource;

    fn roster_with(paths: &[&str]) -> Roster {
        let mut r = Roster::new();
        let mut ids = PermanentIdSource::starting_at(1);
        let root = r.create_dir_node(&mut ids);
        r.attach_node(root, &RepoPath::root()).expect("attach root");
        for p in paths {
            let path = RepoPath::parse(p).expect("path");
            let parent = path.parent().expect("has parent");
            if !r.has_path(&parent) {
                let dir = r.create_dir_node(&mut ids);
                r.attach_node(dir, &parent).expect("attach parent");
            }
            let id = r.create_file_node(crate::ident::ContentHash::NULL, &mut ids);
            r.attach_node(id, &path).expect("attach");
        }
        r
    }

    #[test]
    fn empty_restriction_matches_everything() {
        let r = roster_with(&["a/b"]);
        let restriction = Restriction::everything();
        assert!(restriction.matches(&RepoPath::parse("a/b").expect("path")));
        assert!(restriction.matches(&RepoPath::parse("x/y/z").expect("path")));
    }

    #[test]
    fn include_matches_descendants_and_ancestors() {
        let r = roster_with(&["a/b"]);
        let include = RepoPath::parse("a").expect("path");
        let restriction = Restriction::new(vec![include], vec![], None, &r, &r, false).expect("valid");
        assert!(restriction.matches(&RepoPath::root()));
        assert!(restriction.matches(&RepoPath::parse("a").expect("path")));
        assert!(restriction.matches(&RepoPath::parse("a/b").expect("path")));
        assert!(!restriction.matches(&RepoPath::parse("c").expect("path")));
    }

    #[test]
    fn nearer_exclude_overrides_include() {
        let r = roster_with(&["a/b"]);
        let include = RepoPath::parse("a").expect("path");
        let exclude = RepoPath::parse("a/b").expect("path");
        let restriction = Restriction::new(vec![include], vec![exclude], None, &r, &r, false).expect("valid");
        assert!(!restriction.matches(&RepoPath::parse("a/b").expect("path")));
        assert!(restriction.matches(&RepoPath::parse("a").expect("path")));
    }

    #[test]
    fn depth_limit_bounds_descendants() {
        let r = roster_with(&["a/b"]);
        let include = RepoPath::parse("a").expect("path");
        let restriction = Restriction::new(vec![include], vec![], Some(0), &r, &r, false).expect("valid");
        assert!(restriction.matches(&RepoPath::parse("a").expect("path")));
        assert!(!restriction.matches(&RepoPath::parse("a/b").expect("path")));
    }

    #[test]
    fn construction_rejects_unknown_path() {
        let r = roster_with(&["a/b"]);
        let bogus = RepoPath::parse("nope").expect("path");
        let err = Restriction::new(vec![bogus], vec![], None, &r, &r, false).unwrap_err();
        assert!(matches!(err, RosterError::Domain(DomainError::UnknownRestrictionPath { .. })));
    }
}
