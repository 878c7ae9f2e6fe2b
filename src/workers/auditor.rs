//! Periodic primary-vs-derived count comparison.
//!
//! Each tick walks Idle -> Syncing -> Comparing -> Idle. Writers keep
//! mutating the primary while the check runs, so a single mismatch may be
//! nothing more than a write landing between the two counts. The
//! `mismatch_threshold` sets how many consecutive mismatches it takes to
//! flag an inconsistency; with the default of 1 every mismatch is flagged.

use super::{WorkerRole, Workload};
use crate::error::Result;
use crate::state::SharedRunState;
use crate::stats::StatKind;
use crate::store::{StoreConnection, StoreTarget};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditPhase {
    Idle,
    Syncing,
    Comparing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Consistent { rows: i64 },
    /// Mismatch inside the debounce window
    Transient { primary: i64, derived: i64, streak: u32 },
    Diverged { primary: i64, derived: i64, streak: u32 },
}

pub struct ConsistencyAuditor {
    interval: Duration,
    mismatch_threshold: u32,
    streak: u32,
    phase: AuditPhase,
}

impl ConsistencyAuditor {
    pub fn new(interval: Duration, mismatch_threshold: u32) -> Self {
        Self {
            interval,
            mismatch_threshold: mismatch_threshold.max(1),
            streak: 0,
            phase: AuditPhase::Idle,
        }
    }

    pub fn phase(&self) -> AuditPhase {
        self.phase
    }

    /// Runs one full check. The auditor is back in `Idle` afterwards, whether
    /// or not the check succeeded.
    pub fn audit_once(
        &mut self,
        conn: &mut dyn StoreConnection,
        state: &SharedRunState,
    ) -> Result<AuditOutcome> {
        let result = self.check(conn, state);
        self.phase = AuditPhase::Idle;
        result
    }

    fn check(
        &mut self,
        conn: &mut dyn StoreConnection,
        state: &SharedRunState,
    ) -> Result<AuditOutcome> {
        self.phase = AuditPhase::Syncing;
        conn.sync()?;

        self.phase = AuditPhase::Comparing;
        let primary = conn.count(StoreTarget::Primary)?;
        let derived = conn.count(StoreTarget::Derived)?;
        state.stats.increment(StatKind::ConsistencyCheck);

        if primary == derived {
            self.streak = 0;
            return Ok(AuditOutcome::Consistent { rows: primary });
        }

        self.streak = self.streak.saturating_add(1);
        if self.streak < self.mismatch_threshold {
            state.stats.increment(StatKind::TransientMismatch);
            debug!(
                primary,
                derived,
                streak = self.streak,
                "Count mismatch inside debounce window"
            );
            return Ok(AuditOutcome::Transient {
                primary,
                derived,
                streak: self.streak,
            });
        }

        state.stats.increment(StatKind::Inconsistency);
        warn!(primary, derived, streak = self.streak, "Inconsistency detected");
        state.errors.record(
            WorkerRole::Auditor,
            format!(
                "Inconsistency detected: primary={}, derived={} ({} consecutive mismatches)",
                primary, derived, self.streak
            ),
        );
        Ok(AuditOutcome::Diverged {
            primary,
            derived,
            streak: self.streak,
        })
    }
}

impl Workload for ConsistencyAuditor {
    fn role(&self) -> WorkerRole {
        WorkerRole::Auditor
    }

    fn execute(&mut self, conn: &mut dyn StoreConnection, state: &SharedRunState) -> Result<()> {
        self.audit_once(conn, state).map(|_| ())
    }

    fn pause(&mut self) -> Duration {
        self.interval
    }
}
