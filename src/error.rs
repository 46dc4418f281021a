//! Unified error type for the versioned-tree core.
//!
//! Three families, matching the three kinds of failure a roster operation
//! can hit: a bug in this crate ([`RosterError::Invariant`]), bad bytes
//! handed in from outside ([`RosterError::Malformed`]), or a caller passing
//! semantically invalid arguments ([`RosterError::Domain`]). No variant here
//! is recoverable locally — every one propagates to the nearest operation
//! boundary and the caller decides what to do with it.

use std::fmt;

use crate::ident::NodeId;
use crate::path::RepoPath;

/// Captures the call site of an invariant failure, the same way an assert
/// macro would, so a crash report can point straight at the bad logic.
#[macro_export]
macro_rules! bug {
    ($($arg:tt)*) => {
        $crate::error::RosterError::Invariant {
            file: file!(),
            line: line!(),
            detail: format!($($arg)*),
        }
    };
}

/// Unified error type for roster, marking, change-set, merge, and delta
/// operations.
#[derive(Debug)]
pub enum RosterError {
    /// Something this crate itself should have prevented. Indicates a bug
    /// here or a corrupt input constructed by a trusted producer.
    Invariant {
        /// Source file where the check failed.
        file: &'static str,
        /// Line number where the check failed.
        line: u32,
        /// Human-readable description.
        detail: String,
    },
    /// Bytes from an external source (a parsed document) did not conform
    /// to the basic-IO grammar or a higher-level wire format built on it.
    Malformed {
        /// Name of the stream being parsed, for diagnostics.
        stream: String,
        /// 1-based line number of the offending token.
        line: usize,
        /// 1-based column number of the offending token.
        column: usize,
        /// Human-readable reason.
        reason: String,
    },
    /// A caller passed semantically invalid arguments to an otherwise
    /// well-formed operation.
    Domain(DomainError),
}

/// The specific ways a caller can hand this crate a meaningless request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// `attach_node` was asked to attach at a path that already has an
    /// occupant, or whose parent is missing or not a directory.
    PathOccupied {
        /// The path that could not be attached to.
        path: RepoPath,
    },
    /// A path the caller referenced does not resolve to a node.
    NoSuchPath {
        /// The path that does not exist.
        path: RepoPath,
    },
    /// A node id the caller referenced does not exist in this roster.
    NoSuchNode {
        /// The missing node id.
        id: NodeId,
    },
    /// An operation that requires a detached node was given one that is
    /// currently attached.
    NotDetached {
        /// The node id in question.
        id: NodeId,
    },
    /// An operation that requires an attached node was given one that is
    /// currently detached.
    NotAttached {
        /// The node id in question.
        id: NodeId,
    },
    /// `drop_detached_node` was called on a non-empty directory.
    DirectoryNotEmpty {
        /// The directory node id.
        id: NodeId,
    },
    /// An operation expected a node of one kind (file or directory) and
    /// found the other.
    WrongNodeKind {
        /// The node id in question.
        id: NodeId,
        /// What kind the operation required.
        expected: &'static str,
    },
    /// `apply_delta`'s `old_content` argument did not match the file's
    /// current content.
    ContentMismatch {
        /// The node id in question.
        id: NodeId,
    },
    /// An edit that would have been a no-op (rename to the same place,
    /// delta to the same content, re-attach to the just-detached location).
    NoOpEdit {
        /// Human-readable description of the rejected no-op.
        detail: String,
    },
    /// A change set referenced the same path in two mutually exclusive
    /// collections (e.g. both deleted and added).
    ConflictingPath {
        /// The offending path.
        path: RepoPath,
        /// Human-readable description.
        detail: String,
    },
    /// A merge discovered a node that exists in exactly one parent but
    /// whose birth revision predates that parent's divergence from the
    /// other — it must have died on the other side and should not
    /// reappear ("die die die").
    DieDieDie {
        /// The node id that should have stayed dead.
        id: NodeId,
    },
    /// A node's birth revision differs between the two parents of a merge.
    BirthMismatch {
        /// The node id in question.
        id: NodeId,
    },
    /// A node is a file on one side of a merge and a directory on the
    /// other.
    KindChanged {
        /// The node id in question.
        id: NodeId,
    },
    /// A restricted commit was requested on a change set with two parents;
    /// restricted commits are single-parent only.
    RestrictedMultiParent,
    /// A restriction named a path that does not exist in either roster it
    /// was built against.
    UnknownRestrictionPath {
        /// The offending path.
        path: RepoPath,
    },
    /// Unification produced two different permanent ids for what should
    /// have been the same node, or the unified rosters disagree after the
    /// pass completed.
    UnificationMismatch {
        /// One of the conflicting node ids.
        id: NodeId,
    },
    /// An attribute present on a parent is missing from the merged child
    /// with no explicit clear recorded.
    MissingAttr {
        /// The node id in question.
        id: NodeId,
        /// The attribute key that vanished.
        key: String,
    },
}

impl fmt::Display for RosterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invariant { file, line, detail } => {
                write!(f, "invariant violation at {file}:{line}: {detail}")
            }
            Self::Malformed {
                stream,
                line,
                column,
                reason,
            } => {
                write!(f, "malformed input in {stream} at {line}:{column}: {reason}")
            }
            Self::Domain(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathOccupied { path } => write!(f, "path already occupied: {path}"),
            Self::NoSuchPath { path } => write!(f, "no such path: {path}"),
            Self::NoSuchNode { id } => write!(f, "no such node: {id}"),
            Self::NotDetached { id } => write!(f, "node {id} is not detached"),
            Self::NotAttached { id } => write!(f, "node {id} is not attached"),
            Self::DirectoryNotEmpty { id } => write!(f, "directory {id} is not empty"),
            Self::WrongNodeKind { id, expected } => {
                write!(f, "node {id} is not a {expected}")
            }
            Self::ContentMismatch { id } => {
                write!(f, "old content does not match current content of node {id}")
            }
            Self::NoOpEdit { detail } => write!(f, "rejected no-op edit: {detail}"),
            Self::ConflictingPath { path, detail } => {
                write!(f, "conflicting edit on {path}: {detail}")
            }
            Self::DieDieDie { id } => write!(
                f,
                "node {id} exists in one parent but was deleted on the other side of history and must not reappear"
            ),
            Self::BirthMismatch { id } => {
                write!(f, "node {id} has different birth revisions in the two parents")
            }
            Self::KindChanged { id } => {
                write!(f, "node {id} is a file on one side of the merge and a directory on the other")
            }
            Self::RestrictedMultiParent => {
                write!(f, "restricted commits are not allowed on a multi-parent change set")
            }
            Self::UnknownRestrictionPath { path } => {
                write!(f, "restriction references a path that exists in neither roster: {path}")
            }
            Self::UnificationMismatch { id } => {
                write!(f, "unification produced inconsistent ids for node {id}")
            }
            Self::MissingAttr { id, key } => write!(
                f,
                "attribute {key:?} present on a parent is missing from merged node {id} with no clear recorded"
            ),
        }
    }
}

impl std::error::Error for RosterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::error::Error for DomainError {}

impl From<DomainError> for RosterError {
    fn from(e: DomainError) -> Self {
        Self::Domain(e)
    }
}

/// Shorthand result type used throughout this crate.
pub type Result<T> = std::result::Result<T, RosterError>;
