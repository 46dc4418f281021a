//! Roster operation benchmarks.
//!
//! Measures the cost of building a roster, diffing it into a change set,
//! and applying a roster delta, at a few tree sizes.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench roster_ops
//! # With a custom filter:
//! cargo bench --bench roster_ops -- make_cset
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use roster_core::change_set::make_cset;
use roster_core::delta::RosterDelta;
use roster_core::ident::{ContentHash, PermanentIdSource};
use roster_core::marking::{MarkingMap, mark_new_node_typed};
use roster_core::path::RepoPath;
use roster_core::roster::Roster;

fn build_flat_roster(n: usize) -> (Roster, PermanentIdSource) {
    let mut roster = Roster::new();
    let mut ids = PermanentIdSource::starting_at(1);
    let root = roster.create_dir_node(&mut ids);
    roster.attach_node(root, &RepoPath::root()).expect("attach root");
    for i in 0..n {
        let id = roster.create_file_node(ContentHash::NULL, &mut ids);
        let path = RepoPath::parse(&format!("file{i}")).expect("path");
        roster.attach_node(id, &path).expect("attach");
    }
    (roster, ids)
}

fn bench_build_roster(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_roster");
    for &n in &[100usize, 1_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("files", n), &n, |b, &n| {
            b.iter(|| build_flat_roster(n));
        });
    }
    group.finish();
}

fn bench_make_cset(c: &mut Criterion) {
    let mut group = c.benchmark_group("make_cset");
    for &n in &[100usize, 1_000] {
        let (from, mut ids) = build_flat_roster(n);
        let mut to = from.clone();
        for i in 0..n / 2 {
            let path = RepoPath::parse(&format!("file{i}")).expect("path");
            let old = to.get_node_by_path(&path).expect("node").file_content().expect("file");
            to.apply_delta(&path, old, ContentHash::from_hex(&"ab".repeat(20)).expect("hex")).expect("delta");
        }
        let extra = to.create_file_node(ContentHash::NULL, &mut ids);
        to.attach_node(extra, &RepoPath::parse("new_file").expect("path")).expect("attach");

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("files", n), &n, |b, _| {
            b.iter(|| make_cset(&from, &to));
        });
    }
    group.finish();
}

fn bench_delta_build_and_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("roster_delta");
    let rev = roster_core::ident::RevisionId::from_hex(&"11".repeat(20)).expect("hex");
    let new_rev = roster_core::ident::RevisionId::from_hex(&"22".repeat(20)).expect("hex");

    for &n in &[100usize, 1_000] {
        let (from, _) = build_flat_roster(n);
        let mut from_mark = MarkingMap::new();
        for (id, _) in from.all_nodes() {
            from_mark.insert(*id, mark_new_node_typed(rev, false, &[]));
        }
        let (to, mut ids) = build_flat_roster(n);
        let mut to_mark = MarkingMap::new();
        for (id, _) in to.all_nodes() {
            to_mark.insert(*id, mark_new_node_typed(rev, false, &[]));
        }
        let extra = {
            let mut to = to.clone();
            let id = to.create_file_node(ContentHash::NULL, &mut ids);
            to.attach_node(id, &RepoPath::parse("bench_extra").expect("path")).expect("attach");
            (to, id)
        };
        let (to, extra_id) = extra;
        let mut to_mark = to_mark;
        to_mark.insert(extra_id, mark_new_node_typed(new_rev, true, &[]));

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("build_simple", n), &n, |b, _| {
            b.iter(|| RosterDelta::build(&from, &from_mark, &to, &to_mark, None));
        });

        let reverse_cset = make_cset(&to, &from).expect("reverse cset");
        group.bench_with_input(BenchmarkId::new("build_merge_edge", n), &n, |b, _| {
            b.iter(|| RosterDelta::build(&from, &from_mark, &to, &to_mark, Some(&reverse_cset)));
        });

        let delta = RosterDelta::build(&from, &from_mark, &to, &to_mark, None).expect("build delta");
        group.bench_with_input(BenchmarkId::new("apply", n), &n, |b, _| {
            b.iter(|| {
                let mut applied = from.clone();
                let mut applied_mark = from_mark.clone();
                delta.apply(&mut applied, &mut applied_mark, new_rev)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_roster, bench_make_cset, bench_delta_build_and_apply);
criterion_main!(benches);
