//! Interleaving exploration and race detection.

mod common;
use common::*;

use marmoset_engine::{Completeness, ExecOptions, Finding};

fn race_findings(report: &marmoset_engine::RunReport) -> Vec<&Finding> {
    report
        .findings
        .iter()
        .filter(|f| matches!(f, Finding::DataRace { .. }))
        .collect()
}

#[test]
fn unsynchronized_writers_race_once() {
    let report = run(&unsync_writers_program());
    assert!(report.data_race_checked);
    assert!(report.data_race_found);
    // Rediscoveries across interleavings deduplicate to one finding per
    // (location, site pair).
    assert_eq!(race_findings(&report).len(), 1);
    assert!(report.to_string().contains("Data Race Found: True"));
}

#[test]
fn same_lock_writers_do_not_race() {
    let report = run(&locked_writers_program());
    assert!(report.data_race_checked);
    assert!(!report.data_race_found);
    assert_eq!(report.stats.errors_found, 0);
    assert_eq!(report.completeness, Completeness::Complete);
    assert!(report.to_string().contains("Data Race Found: False"));
}

#[test]
fn disjoint_array_elements_do_not_race() {
    let report = run(&disjoint_offsets_program());
    assert!(!report.data_race_found, "per-cell granularity is required");
    assert_eq!(report.stats.errors_found, 0);
}

#[test]
fn nondeterministically_guarded_writes_race() {
    let report = run(&guarded_racers_program());
    assert!(report.data_race_found);
    assert_eq!(race_findings(&report).len(), 1);
}

#[test]
fn create_ordering_suppresses_races() {
    let report = run(&create_ordering_program());
    assert!(report.data_race_checked);
    assert!(!report.data_race_found);
}

#[test]
fn join_ordering_suppresses_races() {
    let report = run(&join_ordering_program());
    assert!(!report.data_race_found);
    assert_eq!(report.stats.errors_found, 0);
}

#[test]
fn abba_locking_deadlocks_on_some_interleaving() {
    let report = run(&abba_deadlock_program());
    assert!(report
        .findings
        .iter()
        .any(|f| matches!(f, Finding::Deadlock { .. })));
    // Other interleavings complete normally.
    assert!(report.stats.exited_paths > 0);
}

#[test]
fn context_switch_bound_is_reported_not_dropped() {
    let opts = ExecOptions { max_context_switches: 1, ..ExecOptions::default() };
    let report = run_with(&unsync_writers_program(), &opts);
    assert!(report.stats.bound_exceeded_paths > 0);
    match &report.completeness {
        Completeness::Partial { reasons } => {
            assert!(reasons.iter().any(|r| r.contains("context-switch bound")));
        }
        Completeness::Complete => panic!("bounded run must be partial"),
    }
}

#[test]
fn partial_order_reduction_shrinks_the_search() {
    let reduced = run(&disjoint_offsets_program());
    let full = run_with(
        &disjoint_offsets_program(),
        &ExecOptions { por: marmoset_engine::PorMode::Off, ..ExecOptions::default() },
    );
    // Identical verdicts either way.
    assert_eq!(reduced.data_race_found, full.data_race_found);
    assert_eq!(reduced.stats.errors_found, full.stats.errors_found);
    // The disjoint writes commute, so reduction explores fewer paths.
    assert!(
        reduced.stats.executed_paths <= full.stats.executed_paths,
        "reduction must never explore more paths than the full search"
    );
}

#[test]
fn race_findings_name_both_sites() {
    let report = run(&unsync_writers_program());
    let races = race_findings(&report);
    match races[0] {
        Finding::DataRace { object, site_a, site_b, .. } => {
            assert_eq!(object, "v");
            assert!(site_a.starts_with("thread"));
            assert!(site_b.starts_with("thread"));
            assert_ne!(site_a, site_b);
        }
        other => panic!("expected a data race, got {other:?}"),
    }
}
