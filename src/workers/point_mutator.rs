use super::{WorkerRole, Workload, VALUE_RANGE};
use crate::config::SleepRange;
use crate::error::Result;
use crate::state::SharedRunState;
use crate::stats::StatKind;
use crate::store::{NewRecord, StoreConnection};
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointOp {
    Insert,
    Update,
    Delete,
}

impl PointOp {
    fn choose<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.random_range(0..3) {
            0 => PointOp::Insert,
            1 => PointOp::Update,
            _ => PointOp::Delete,
        }
    }
}

/// Single-row insert/update/delete against the primary.
pub struct PointMutator {
    sleep: SleepRange,
    rng: StdRng,
}

impl PointMutator {
    pub fn new(sleep: SleepRange, rng: StdRng) -> Self {
        Self { sleep, rng }
    }

    /// Runs one specific operation. Update and delete count only when a row
    /// was affected; the chosen row may already be gone.
    pub fn apply(
        &mut self,
        op: PointOp,
        conn: &mut dyn StoreConnection,
        state: &SharedRunState,
    ) -> Result<()> {
        match op {
            PointOp::Insert => {
                let record = NewRecord {
                    value: self.rng.random_range(VALUE_RANGE),
                    text: format!("point_text_{}", self.rng.random_range(1..=1000)),
                };
                conn.insert_one(record)?;
                state.stats.increment(StatKind::PointInsert);
            }
            PointOp::Update => {
                let affected = conn.update_random(self.rng.random_range(VALUE_RANGE))?;
                if affected > 0 {
                    state.stats.increment(StatKind::Update);
                }
            }
            PointOp::Delete => {
                if conn.delete_random()? > 0 {
                    state.stats.increment(StatKind::Delete);
                }
            }
        }
        Ok(())
    }
}

impl Workload for PointMutator {
    fn role(&self) -> WorkerRole {
        WorkerRole::PointMutator
    }

    fn execute(&mut self, conn: &mut dyn StoreConnection, state: &SharedRunState) -> Result<()> {
        let op = PointOp::choose(&mut self.rng);
        self.apply(op, conn, state)
    }

    fn pause(&mut self) -> Duration {
        self.sleep.sample(&mut self.rng)
    }
}
