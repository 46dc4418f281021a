//! Versioned-tree core: roster, marking, change-set, *-merge, and roster
//! delta.
//!
//! This crate is the pure, synchronous data layer of a distributed
//! version-control system — the parts that stay the same regardless of
//! what transport, storage, or UI a host wraps around them. It has no
//! network, database, or filesystem surface of its own (see
//! [`collab`] for the trait boundary a host fills in).
//!
//! A [`roster::Roster`] is a snapshot of a versioned tree. A
//! [`change_set::ChangeSet`] is a declarative edit between two rosters.
//! [`marking`] tracks, per scalar, which revision last set it, which is
//! what lets [`merge`] three-way-merge two rosters without a common
//! ancestor diff. [`delta::RosterDelta`] is the canonical encoded
//! difference used to store history compactly. [`restriction`] lets a
//! caller split a change set for partial commits.

pub mod basic_io;
pub mod change_set;
pub mod collab;
pub mod delta;
pub mod error;
pub mod ident;
pub mod manifest;
pub mod marking;
pub mod merge;
pub mod parallel_iter;
pub mod path;
pub mod restriction;
pub mod roster;
