//! Joint, in-order walk of two ordered maps (spec §4's Component 6).
//!
//! Every pairwise roster/marking operation — `make_cset`, roster-delta
//! construction, mark-merge-roster — needs to walk two `BTreeMap`s keyed
//! on the same ordered key and classify each key as appearing only on the
//! left, only on the right, or on both. Rather than the reference
//! implementation's C++ iterator-pair idiom (spec §9 "Coroutine-like
//! parallel iteration"), this is an explicit state machine: call
//! [`ParallelIter::advance`] until [`Transition::Done`].

use std::collections::btree_map;

/// What the current step of a [`ParallelIter`] found.
#[derive(Debug)]
pub enum Transition<'a, K, VL, VR> {
    /// `key` exists only in the left map.
    InLeft { key: &'a K, left: &'a VL },
    /// `key` exists only in the right map.
    InRight { key: &'a K, right: &'a VR },
    /// `key` exists in both maps.
    InBoth { key: &'a K, left: &'a VL, right: &'a VR },
    /// Both maps are exhausted.
    Done,
}

/// Walks two `BTreeMap`s with the same key type in lockstep, in key
/// order, classifying each key as left-only / right-only / in-both.
pub struct ParallelIter<'a, K, VL, VR> {
    left: std::iter::Peekable<btree_map::Iter<'a, K, VL>>,
    right: std::iter::Peekable<btree_map::Iter<'a, K, VR>>,
}

impl<'a, K: Ord, VL, VR> ParallelIter<'a, K, VL, VR> {
    /// Begin a parallel walk over two maps.
    #[must_use]
    pub fn new(left: &'a std::collections::BTreeMap<K, VL>, right: &'a std::collections::BTreeMap<K, VR>) -> Self {
        Self {
            left: left.iter().peekable(),
            right: right.iter().peekable(),
        }
    }

    /// Produce the next transition, advancing past whichever side(s) it
    /// consumed.
    pub fn advance(&mut self) -> Transition<'a, K, VL, VR> {
        match (self.left.peek(), self.right.peek()) {
            (None, None) => Transition::Done,
            (Some(_), None) => {
                let (key, left) = self.left.next().expect("peeked Some");
                Transition::InLeft { key, left }
            }
            (None, Some(_)) => {
                let (key, right) = self.right.next().expect("peeked Some");
                Transition::InRight { key, right }
            }
            (Some((lk, _)), Some((rk, _))) => match lk.cmp(rk) {
                std::cmp::Ordering::Less => {
                    let (key, left) = self.left.next().expect("peeked Some");
                    Transition::InLeft { key, left }
                }
                std::cmp::Ordering::Greater => {
                    let (key, right) = self.right.next().expect("peeked Some");
                    Transition::InRight { key, right }
                }
                std::cmp::Ordering::Equal => {
                    let (key, left) = self.left.next().expect("peeked Some");
                    let (_, right) = self.right.next().expect("peeked Some");
                    Transition::InBoth { key, left, right }
                }
            },
        }
    }
}

/// Drain a [`ParallelIter`], invoking the matching callback for each
/// transition. A small convenience over manually looping on
/// [`ParallelIter::advance`].
pub fn for_each<K: Ord, VL, VR>(
    left: &std::collections::BTreeMap<K, VL>,
    right: &std::collections::BTreeMap<K, VR>,
    mut on_left: impl FnMut(&K, &VL),
    mut on_right: impl FnMut(&K, &VR),
    mut on_both: impl FnMut(&K, &VL, &VR),
) {
    let mut iter = ParallelIter::new(left, right);
    loop {
        match iter.advance() {
            Transition::InLeft { key, left } => on_left(key, left),
            Transition::InRight { key, right } => on_right(key, right),
            Transition::InBoth { key, left, right } => on_both(key, left, right),
            Transition::Done => break,
        }
    }
}
