//! Final run report: raw counters, recent errors and the PASS/FAIL verdict.

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::error_sink::ErrorRecord;
use crate::stats::{StatCounters, StatKind};
use crate::workers::WorkerRole;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    /// PASS iff nothing diverged and nothing failed.
    pub fn from_counts(inconsistencies: u64, errors: usize) -> Self {
        if inconsistencies == 0 && errors == 0 {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn evaluate(stats: &StatCounters, errors: &[ErrorRecord]) -> Self {
        Self::from_counts(stats.inconsistencies, errors.len())
    }

    pub fn is_pass(&self) -> bool {
        *self == Verdict::Pass
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail => f.write_str("FAIL"),
        }
    }
}

/// Output format for the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}. Use 'text' or 'json'.", s)),
        }
    }
}

/// Everything the reporter prints about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub verdict: Verdict,
    pub stats: StatCounters,
    /// Exact number of recorded errors
    pub error_count: usize,
    /// The most recent errors, oldest first
    pub recent_errors: Vec<ErrorRecord>,
    pub elapsed_secs: f64,
    pub ops_per_sec: f64,
    pub workers: BTreeMap<WorkerRole, usize>,
    pub interrupted: bool,
    pub abandoned_workers: Vec<String>,
    /// Configuration the run used, echoed for reproducibility
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<RunConfig>,
}

impl RunReport {
    pub fn new(
        stats: StatCounters,
        errors: &[ErrorRecord],
        error_tail: usize,
        elapsed: Duration,
    ) -> Self {
        let start = errors.len().saturating_sub(error_tail);
        let secs = elapsed.as_secs_f64();
        let ops_per_sec = if secs > 0.0 {
            stats.workload_operations() as f64 / secs
        } else {
            0.0
        };
        Self {
            verdict: Verdict::evaluate(&stats, errors),
            stats,
            error_count: errors.len(),
            recent_errors: errors[start..].to_vec(),
            elapsed_secs: secs,
            ops_per_sec,
            workers: BTreeMap::new(),
            interrupted: false,
            abandoned_workers: Vec::new(),
            config: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    format: OutputFormat,
}

impl Reporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Writes the report and returns its verdict. Write failures surface as
    /// `Error::Io`.
    pub fn render(&self, report: &RunReport, out: &mut dyn Write) -> Result<Verdict> {
        match self.format {
            OutputFormat::Text => render_text(report, out)?,
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *out, report)
                    .map_err(|e| Error::Io(io::Error::other(e)))?;
                writeln!(out)?;
            }
        }
        out.flush()?;
        Ok(report.verdict)
    }
}

fn stat_label(kind: StatKind) -> &'static str {
    match kind {
        StatKind::BatchInsert => "Batch inserts",
        StatKind::PointInsert => "Point inserts",
        StatKind::Update => "Updates",
        StatKind::Delete => "Deletes",
        StatKind::Query => "Queries",
        StatKind::ConsistencyCheck => "Consistency checks",
        StatKind::Inconsistency => "Inconsistencies found",
        StatKind::TransientMismatch => "Transient mismatches",
    }
}

fn render_text(report: &RunReport, out: &mut dyn Write) -> io::Result<()> {
    let rule = "=".repeat(50);
    writeln!(out)?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "STRESS TEST RESULTS")?;
    writeln!(out, "{}", rule)?;
    for kind in StatKind::ALL {
        writeln!(out, "{}: {}", stat_label(kind), report.stats.get(kind))?;
    }
    writeln!(out, "Errors: {}", report.error_count)?;
    writeln!(
        out,
        "Elapsed: {:.2} s ({:.0} ops/sec)",
        report.elapsed_secs, report.ops_per_sec
    )?;
    if !report.workers.is_empty() {
        let workers: Vec<String> = report
            .workers
            .iter()
            .map(|(role, n)| format!("{} {}", n, role))
            .collect();
        writeln!(out, "Workers: {}", workers.join(", "))?;
    }
    if report.interrupted {
        writeln!(out, "Run was interrupted before its configured duration")?;
    }
    if !report.abandoned_workers.is_empty() {
        writeln!(
            out,
            "Abandoned workers: {}",
            report.abandoned_workers.join(", ")
        )?;
    }

    if !report.recent_errors.is_empty() {
        writeln!(out)?;
        writeln!(out, "ERRORS:")?;
        for record in &report.recent_errors {
            writeln!(out, "  - {}", record)?;
        }
    }

    writeln!(out)?;
    match report.verdict {
        Verdict::Pass => writeln!(
            out,
            "[PASS] STRESS TEST PASSED - No inconsistencies or errors found"
        )?,
        Verdict::Fail => writeln!(out, "[FAIL] STRESS TEST FAILED - Issues detected")?,
    }
    writeln!(out, "{}", rule)?;
    Ok(())
}
