//! Worker roles and the loop skeleton they share.
//!
//! Every worker owns one store connection and one RNG. The loop checks the
//! run token before each iteration, runs one unit of work, records failures
//! without exiting, then sleeps on the token for the role's think time.

pub mod auditor;
pub mod batch_writer;
pub mod group;
pub mod point_mutator;
pub mod reader;

use crate::error::Result;
use crate::run_token::RunToken;
use crate::state::SharedRunState;
use crate::store::{ConnectionGuard, StoreConnection, StoreConnector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

pub use auditor::{AuditOutcome, AuditPhase, ConsistencyAuditor};
pub use batch_writer::BatchWriter;
pub use group::{JoinOutcome, WorkerGroup};
pub use point_mutator::{PointMutator, PointOp};
pub use reader::{ReadKind, Reader};

/// Values written by the mutating roles are drawn from this range.
pub const VALUE_RANGE: std::ops::RangeInclusive<i64> = 1..=10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerRole {
    BatchWriter,
    PointMutator,
    Reader,
    Auditor,
}

impl WorkerRole {
    pub fn label(&self) -> &'static str {
        match self {
            WorkerRole::BatchWriter => "batch-writer",
            WorkerRole::PointMutator => "point-mutator",
            WorkerRole::Reader => "reader",
            WorkerRole::Auditor => "consistency-auditor",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One role's unit of work.
pub trait Workload: Send {
    fn role(&self) -> WorkerRole;

    /// Performs one iteration. Stats are updated here on success; an `Err`
    /// is recorded by the loop and the worker keeps going.
    fn execute(&mut self, conn: &mut dyn StoreConnection, state: &SharedRunState) -> Result<()>;

    /// Think time before the next iteration.
    fn pause(&mut self) -> Duration;
}

/// RNG for the worker at `index`; seeded runs are reproducible.
pub fn worker_rng(seed: Option<u64>, index: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index)),
        None => StdRng::from_os_rng(),
    }
}

/// Runs `workload` until the token stops. Returns the number of iterations.
///
/// The connection is released when the guard drops, so every exit path
/// (token stop, failed iteration, panic) closes it exactly once.
pub fn run_worker(
    mut workload: Box<dyn Workload>,
    connector: &dyn StoreConnector,
    state: &SharedRunState,
    token: &RunToken,
) -> u64 {
    let role = workload.role();
    let mut conn = match connector.connect() {
        Ok(conn) => ConnectionGuard::new(conn),
        Err(e) => {
            warn!(role = %role, error = %e, "Worker could not connect");
            state.errors.record(role, format!("connect failed: {}", e));
            return 0;
        }
    };

    let mut iterations = 0u64;
    while token.is_running() {
        if let Err(e) = workload.execute(&mut *conn, state) {
            debug!(role = %role, error = %e, "Worker iteration failed");
            state.errors.record(role, e.to_string());
        }
        iterations += 1;

        if !token.sleep(workload.pause()) {
            break;
        }
    }

    debug!(role = %role, iterations, "Worker loop exited");
    iterations
}
