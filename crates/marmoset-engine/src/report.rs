//! The run reporter: the single aggregation point for counters, findings,
//! and completeness.
//!
//! One `Reporter` exists per run. All mutation funnels through one mutex
//! so parallel search workers can feed it safely; counters are summed and
//! findings are deduplicated by canonical identity, which makes the final
//! report independent of exploration order and worker count.

use std::sync::Mutex;
use std::time::Instant;

use indexmap::IndexSet;
use serde::Serialize;

use crate::options::ExecOptions;
use crate::state::{BoundKind, StateStatus};

/// A categorized, deduplicated violation. Sites are pre-rendered labels
/// (`function:block:index`) so findings order and compare canonically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Finding {
    AssertionViolation { site: String },
    OutOfBounds { site: String, object: String },
    DataRace { object: String, cell: Option<i64>, site_a: String, site_b: String },
    Deadlock { site: String },
    /// Soft signal: the loop could be neither proved terminating nor
    /// exited within the search bound.
    NonTermination { site: String },
    Generic { site: String, message: String },
}

impl Finding {
    /// Construct a race finding with the site pair in canonical order.
    pub fn race(object: String, cell: Option<i64>, a: String, b: String) -> Self {
        let (site_a, site_b) = if a <= b { (a, b) } else { (b, a) };
        Finding::DataRace { object, cell, site_a, site_b }
    }

    /// Hard findings count toward `Found errors`; non-termination
    /// candidates are reported but kept soft (a candidate is not a proof).
    pub fn is_error(&self) -> bool {
        !matches!(self, Finding::NonTermination { .. })
    }

    /// The per-finding report line, following the classic wording.
    pub fn headline(&self) -> String {
        match self {
            Finding::AssertionViolation { site } => {
                format!("[assertion error]: assertion failed! (at {site})")
            }
            Finding::OutOfBounds { site, object } => {
                format!("[memory error] - oob (out-of-bounds access to {object} at {site})")
            }
            Finding::DataRace { object, cell, site_a, site_b } => {
                let loc = match cell {
                    Some(c) => format!("{object}[{c}]"),
                    None => object.clone(),
                };
                format!("[memory error] - Data Race detected ({loc}: {site_a} vs {site_b})")
            }
            Finding::Deadlock { site } => format!("[generic error]: Deadlock detected (at {site})"),
            Finding::NonTermination { .. } => {
                "[non-termination]: an infinite execution found".to_string()
            }
            Finding::Generic { site, message } => format!("[generic error]: {message} (at {site})"),
        }
    }
}

/// Aggregate counters over every terminal path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Every path that ran to a terminal state, whatever the outcome.
    pub executed_paths: u64,
    /// Paths that returned from the entry function.
    pub exited_paths: u64,
    /// Paths ending in a hard or soft finding.
    pub errored_paths: u64,
    /// Paths killed by an unsupported operation.
    pub killed_paths: u64,
    /// Paths silently terminated (failed assume, certified loop cutoff).
    pub terminated_paths: u64,
    /// Paths cut by a context-switch, loop, or step bound.
    pub bound_exceeded_paths: u64,
    /// Forks at data-dependent branches, counted once per fork point.
    pub branch_forks: u64,
    /// Deduplicated hard findings.
    pub errors_found: u64,
}

/// Whether the run covered the whole bounded search space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Completeness {
    Complete,
    Partial { reasons: Vec<String> },
}

/// The final, deterministic result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stats: RunStats,
    /// Canonically ordered, deduplicated findings (hard and soft).
    pub findings: Vec<Finding>,
    pub completeness: Completeness,
    /// True when the program ever ran more than one thread, which is when
    /// the race verdict line is meaningful.
    pub data_race_checked: bool,
    pub data_race_found: bool,
    pub elapsed_ms: u128,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for finding in &self.findings {
            writeln!(f, "{}", finding.headline())?;
            if finding.is_error() {
                writeln!(f, "Error found.")?;
            }
        }
        if self.data_race_checked {
            writeln!(
                f,
                "Data Race Found: {}",
                if self.data_race_found { "True" } else { "False" }
            )?;
        }
        writeln!(f, "Executed paths: {}", self.stats.executed_paths)?;
        writeln!(f, "Paths that reached exit: {}", self.stats.exited_paths)?;
        writeln!(f, "Number of forks on branches: {}", self.stats.branch_forks)?;
        writeln!(f, "Found errors: {}", self.stats.errors_found)?;
        match &self.completeness {
            Completeness::Complete => write!(f, "Exploration: complete"),
            Completeness::Partial { reasons } => {
                write!(f, "Exploration: partial ({})", reasons.join(", "))
            }
        }
    }
}

#[derive(Debug, Default)]
struct ReporterInner {
    stats: RunStats,
    findings: IndexSet<Finding>,
    partial_reasons: IndexSet<String>,
    saw_threads: bool,
    stop: bool,
    stopped_on_error: bool,
}

/// Process-wide aggregator for one run: created at run start, finalized
/// exactly once at run end. The mutex is the exclusion discipline required
/// when parallel workers feed it.
#[derive(Debug)]
pub struct Reporter {
    inner: Mutex<ReporterInner>,
    deadline: Option<Instant>,
    exit_on_error: bool,
    started: Instant,
}

impl Reporter {
    pub fn new(opts: &ExecOptions) -> Self {
        let started = Instant::now();
        let deadline = if opts.timeout_secs == 0 {
            None
        } else {
            started.checked_add(std::time::Duration::from_secs(opts.timeout_secs))
        };
        Reporter {
            inner: Mutex::new(ReporterInner::default()),
            deadline,
            exit_on_error: opts.exit_on_error,
            started,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReporterInner> {
        self.inner.lock().expect("reporter mutex poisoned")
    }

    /// A data-dependent branch forked; counted regardless of how many
    /// children survive pruning.
    pub fn on_branch_fork(&self) {
        self.lock().stats.branch_forks += 1;
    }

    /// The analyzed program spawned a second thread.
    pub fn note_threads(&self) {
        self.lock().saw_threads = true;
    }

    /// Record a reason why exploration did not cover everything.
    pub fn note_partial(&self, reason: &str) {
        self.lock().partial_reasons.insert(reason.to_string());
    }

    /// Consume a terminal state's outcome.
    pub fn on_terminal(&self, status: &StateStatus) {
        let mut inner = self.lock();
        inner.stats.executed_paths += 1;
        match status {
            StateStatus::Ready => unreachable!("terminal handler on a live state"),
            StateStatus::Exited(_) => inner.stats.exited_paths += 1,
            StateStatus::Errored(finding) => {
                inner.stats.errored_paths += 1;
                let fresh = inner.findings.insert(finding.clone());
                if fresh && finding.is_error() && self.exit_on_error {
                    inner.stop = true;
                    inner.stopped_on_error = true;
                }
            }
            StateStatus::Killed(reason) => {
                inner.stats.killed_paths += 1;
                inner
                    .partial_reasons
                    .insert(format!("path killed: {reason}"));
            }
            StateStatus::Terminated(_) => inner.stats.terminated_paths += 1,
            StateStatus::BoundExceeded(kind) => {
                inner.stats.bound_exceeded_paths += 1;
                let reason = match kind {
                    BoundKind::ContextSwitches => "context-switch bound exceeded",
                    BoundKind::LoopIterations => "loop bound exceeded",
                    BoundKind::Steps => "step bound exceeded",
                };
                inner.partial_reasons.insert(reason.to_string());
            }
        }
    }

    /// True once exploration must halt: fail-fast fired or the deadline
    /// passed. In-flight states are discarded by the caller.
    pub fn should_stop(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                let mut inner = self.lock();
                inner.partial_reasons.insert("timeout".to_string());
                inner.stop = true;
            }
        }
        self.lock().stop
    }

    /// Whether fail-fast halted the run (as opposed to a timeout).
    pub fn stopped_on_error(&self) -> bool {
        self.lock().stopped_on_error
    }

    /// Produce the final report. Findings are sorted into canonical order
    /// so the result is identical for every exploration order.
    pub fn finalize(&self) -> RunReport {
        let inner = self.lock();
        let mut findings: Vec<Finding> = inner.findings.iter().cloned().collect();
        findings.sort();
        let mut stats = inner.stats;
        stats.errors_found = findings.iter().filter(|f| f.is_error()).count() as u64;
        let data_race_found = findings
            .iter()
            .any(|f| matches!(f, Finding::DataRace { .. }));
        let mut reasons: Vec<String> = inner.partial_reasons.iter().cloned().collect();
        reasons.sort();
        RunReport {
            stats,
            findings,
            completeness: if reasons.is_empty() {
                Completeness::Complete
            } else {
                Completeness::Partial { reasons }
            },
            data_race_checked: inner.saw_threads,
            data_race_found,
            elapsed_ms: self.started.elapsed().as_millis(),
        }
    }
}
