//! Run lifecycle: provision, spawn, wait, stop, join, report, tear down.

use crate::config::RunConfig;
use crate::error::Result;
use crate::report::{Reporter, RunReport, Verdict};
use crate::run_token::RunToken;
use crate::state::SharedRunState;
use crate::store::StoreConnector;
use crate::workers::{
    run_worker, worker_rng, BatchWriter, ConsistencyAuditor, JoinOutcome, PointMutator, Reader,
    WorkerGroup, Workload,
};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownStatus {
    Completed,
    /// Teardown failed; the verdict was already decided and stands
    Failed(String),
}

/// Result of a run that got past setup.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: RunReport,
    pub verdict: Verdict,
    pub interrupted: bool,
    pub join: JoinOutcome,
    pub teardown: TeardownStatus,
}

/// Builds the workloads for one run. The consistency auditor is always
/// exactly one, whatever the configured worker counts.
pub fn plan_workloads(config: &RunConfig) -> Vec<Box<dyn Workload>> {
    let mut workloads: Vec<Box<dyn Workload>> = Vec::with_capacity(config.total_workers());
    let mut index = 0u64;
    let mut next_rng = || {
        let rng = worker_rng(config.seed, index);
        index += 1;
        rng
    };

    for _ in 0..config.batch_workers {
        workloads.push(Box::new(BatchWriter::new(
            config.batch_size,
            config.batch_sleep,
            next_rng(),
        )));
    }
    for _ in 0..config.point_workers {
        workloads.push(Box::new(PointMutator::new(config.point_sleep, next_rng())));
    }
    for _ in 0..config.query_workers {
        workloads.push(Box::new(Reader::new(
            config.filter_limit,
            config.query_sleep,
            next_rng(),
        )));
    }
    workloads.push(Box::new(ConsistencyAuditor::new(
        config.audit_interval,
        config.mismatch_threshold,
    )));
    workloads
}

/// Stops whichever run of a controller is current.
///
/// A stop requested while no run is active applies to the next run, which
/// then ends immediately and is reported as interrupted.
#[derive(Debug, Clone)]
pub struct StopHandle {
    current: Arc<Mutex<RunToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.current.lock().stop();
    }
}

/// Drives runs against a store pair. Every run gets its own run token, so a
/// controller can be run again after a previous run finished.
pub struct WorkloadController {
    connector: Arc<dyn StoreConnector>,
    reporter: Reporter,
    current: Arc<Mutex<RunToken>>,
}

impl WorkloadController {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            reporter: Reporter::default(),
            current: Arc::new(Mutex::new(RunToken::new())),
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Handle for stopping runs from another thread, e.g. on Ctrl-C.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            current: Arc::clone(&self.current),
        }
    }

    /// Ends the current run's token and installs a fresh one for the next run.
    fn retire_token(&self, token: &RunToken) {
        token.stop();
        *self.current.lock() = RunToken::new();
    }

    /// Runs the full lifecycle and writes the report to `out`.
    ///
    /// Only setup failures (invalid config, schema provisioning, thread
    /// spawn) return `Err`. Store errors during the run, divergence and
    /// teardown failures all end up in the returned summary.
    pub fn run(&self, config: &RunConfig, out: &mut dyn Write) -> Result<RunSummary> {
        config.validate()?;
        info!(
            duration_secs = config.duration.as_secs_f64(),
            batch_workers = config.batch_workers,
            point_workers = config.point_workers,
            query_workers = config.query_workers,
            "Starting stress run"
        );

        self.connector.provision_schema()?;

        let state = Arc::new(SharedRunState::new());
        let token = self.current.lock().clone();
        if !token.arm() {
            warn!("Run was stopped before it started");
        }
        let started = Instant::now();

        let mut group = WorkerGroup::new();
        if let Err(e) = self.spawn_workers(config, &state, &token, &mut group) {
            error!(error = %e, "Failed to start workers; aborting run");
            self.retire_token(&token);
            group.join(config.join_grace);
            self.teardown();
            return Err(e);
        }

        let interrupted = wait_for_completion(config, &state, &token, started);
        if interrupted {
            info!("Run interrupted; stopping workers");
        }
        self.retire_token(&token);

        let workers = group.spawned_by_role();
        let join = group.join(config.join_grace);
        for (name, role) in &join.panicked {
            state
                .errors
                .record(*role, format!("worker {} panicked", name));
        }

        let mut report = RunReport::new(
            state.stats.snapshot(),
            &state.errors.all(),
            config.error_tail,
            started.elapsed(),
        );
        report.workers = workers;
        report.interrupted = interrupted;
        report.abandoned_workers = join.abandoned.clone();
        report.config = Some(config.clone());

        let verdict = match self.reporter.render(&report, out) {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(error = %e, "Failed to write report");
                report.verdict
            }
        };

        let teardown = self.teardown();
        Ok(RunSummary {
            report,
            verdict,
            interrupted,
            join,
            teardown,
        })
    }

    fn spawn_workers(
        &self,
        config: &RunConfig,
        state: &Arc<SharedRunState>,
        token: &RunToken,
        group: &mut WorkerGroup,
    ) -> Result<()> {
        for workload in plan_workloads(config) {
            let role = workload.role();
            let connector = Arc::clone(&self.connector);
            let state = Arc::clone(state);
            let token = token.clone();
            group.spawn(role, move || {
                run_worker(workload, connector.as_ref(), &state, &token)
            })?;
        }
        info!(workers = group.len(), "Workers started");
        Ok(())
    }

    fn teardown(&self) -> TeardownStatus {
        match self.connector.teardown_schema() {
            Ok(()) => TeardownStatus::Completed,
            Err(e) => {
                error!(error = %e, "Teardown failed");
                TeardownStatus::Failed(e.to_string())
            }
        }
    }
}

/// Blocks until the duration elapses or the token is stopped elsewhere.
/// Returns true when the run was interrupted.
fn wait_for_completion(
    config: &RunConfig,
    state: &SharedRunState,
    token: &RunToken,
    started: Instant,
) -> bool {
    let deadline = started + config.duration;
    let mut next_progress = started + config.progress_interval;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        if !token.sleep(deadline.min(next_progress) - now) {
            return true;
        }
        if Instant::now() >= next_progress {
            let stats = state.stats.snapshot();
            info!(
                elapsed_secs = started.elapsed().as_secs(),
                batch_inserts = stats.batch_inserts,
                point_inserts = stats.point_inserts,
                updates = stats.updates,
                deletes = stats.deletes,
                queries = stats.queries,
                consistency_checks = stats.consistency_checks,
                inconsistencies = stats.inconsistencies,
                errors = state.errors.len(),
                "Progress"
            );
            next_progress += config.progress_interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::WorkerRole;

    #[test]
    fn plan_has_exactly_one_auditor() {
        for (batch, point, query) in [(0, 0, 0), (2, 3, 2), (5, 0, 9), (1, 1, 1)] {
            let config = RunConfig {
                batch_workers: batch,
                point_workers: point,
                query_workers: query,
                ..RunConfig::default()
            };
            let plan = plan_workloads(&config);
            assert_eq!(plan.len(), config.total_workers());
            let auditors = plan
                .iter()
                .filter(|w| w.role() == WorkerRole::Auditor)
                .count();
            assert_eq!(auditors, 1);
            assert_eq!(
                plan.iter()
                    .filter(|w| w.role() == WorkerRole::Reader)
                    .count(),
                query
            );
        }
    }
}
