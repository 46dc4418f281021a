//! Path components and paths (spec §3 "Path component", "Path").
//!
//! A [`PathComponent`] is one segment of a path; a [`RepoPath`] is a
//! sequence of components starting with the implicit root sentinel. The
//! root's component is the empty string and may only ever be the first
//! element.

use std::fmt;

use crate::error::{DomainError, RosterError};

/// One path segment. Never contains `/` or a NUL byte, and is never `.` or
/// `..`, except for the special empty root component which may only
/// appear as the first element of a [`RepoPath`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathComponent(String);

impl PathComponent {
    /// The root's component: the empty string.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Validate and wrap a non-root path component.
    pub fn new(s: impl Into<String>) -> Result<Self, RosterError> {
        let s = s.into();
        if s.is_empty() {
            return Err(DomainError::NoOpEdit {
                detail: "path component must not be empty (use PathComponent::root() for the root)".to_owned(),
            }
            .into());
        }
        if s.contains('/') || s.contains('\0') {
            return Err(DomainError::NoOpEdit {
                detail: format!("path component {s:?} must not contain '/' or NUL"),
            }
            .into());
        }
        if s == "." || s == ".." {
            return Err(DomainError::NoOpEdit {
                detail: format!("path component must not be {s:?}"),
            }
            .into());
        }
        Ok(Self(s))
    }

    /// True for the root sentinel component.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the raw string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A sequence of path components. The empty sequence means "no path"; a
/// single root component means the root directory itself.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RepoPath(Vec<PathComponent>);

impl RepoPath {
    /// The empty path: "no path".
    #[must_use]
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// The root directory's path: a single root component.
    #[must_use]
    pub fn root() -> Self {
        Self(vec![PathComponent::root()])
    }

    /// Build the root path extended with one more component.
    #[must_use]
    pub fn child(&self, name: PathComponent) -> Self {
        let mut v = self.0.clone();
        v.push(name);
        Self(v)
    }

    /// True for the empty "no path" sequence.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// True for the single-component root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// The final component, i.e. the basename, if this path is non-empty.
    #[must_use]
    pub fn basename(&self) -> Option<&PathComponent> {
        self.0.last()
    }

    /// The path of the parent directory, or `None` if this is the root or
    /// the empty path.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// True if `self` is `other` or an ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Iterate over the components.
    pub fn components(&self) -> impl Iterator<Item = &PathComponent> {
        self.0.iter()
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty "no path" sequence (alias for [`Self::is_none`]
    /// to satisfy the usual `is_empty` convention).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a `/`-joined internal path form. The root is the empty
    /// string; every other path is joined without a leading slash, per
    /// spec §3 and the manifest serialization of spec §6.
    pub fn parse(s: &str) -> Result<Self, RosterError> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let mut out = vec![PathComponent::root()];
        for part in s.split('/') {
            out.push(PathComponent::new(part)?);
        }
        Ok(Self(out))
    }

    /// Render the internal `/`-joined form with the root sentinel elided.
    #[must_use]
    pub fn to_internal_string(&self) -> String {
        self.0
            .iter()
            .skip(1)
            .map(PathComponent::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_internal_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_roundtrips() {
        let r = RepoPath::parse("").expect("root parses");
        assert!(r.is_root());
        assert_eq!(r.to_internal_string(), "");
    }

    #[test]
    fn nested_path_roundtrips() {
        let p = RepoPath::parse("foo/bar/baz").expect("parses");
        assert_eq!(p.to_internal_string(), "foo/bar/baz");
        assert_eq!(p.basename().expect("has basename").as_str(), "baz");
        assert_eq!(p.parent().expect("has parent").to_internal_string(), "foo/bar");
    }

    #[test]
    fn rejects_dot_and_dotdot() {
        assert!(RepoPath::parse("foo/./bar").is_err());
        assert!(RepoPath::parse("foo/../bar").is_err());
    }

    #[test]
    fn ancestor_relation() {
        let root = RepoPath::root();
        let foo = RepoPath::parse("foo").expect("parses");
        let foo_bar = RepoPath::parse("foo/bar").expect("parses");
        assert!(root.is_ancestor_of(&foo_bar));
        assert!(foo.is_ancestor_of(&foo_bar));
        assert!(!foo_bar.is_ancestor_of(&foo));
    }
}
