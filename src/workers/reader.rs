use super::{WorkerRole, Workload};
use crate::config::SleepRange;
use crate::error::Result;
use crate::state::SharedRunState;
use crate::stats::StatKind;
use crate::store::{StoreConnection, StoreTarget};
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    Count,
    Aggregate,
    Filter,
}

impl ReadKind {
    fn choose<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.random_range(0..3) {
            0 => ReadKind::Count,
            1 => ReadKind::Aggregate,
            _ => ReadKind::Filter,
        }
    }
}

/// Analytical query against the derived store. Results are discarded; this
/// measures liveness, not correctness.
pub struct Reader {
    filter_limit: usize,
    sleep: SleepRange,
    rng: StdRng,
}

impl Reader {
    pub fn new(filter_limit: usize, sleep: SleepRange, rng: StdRng) -> Self {
        Self {
            filter_limit,
            sleep,
            rng,
        }
    }

    pub fn query(
        &mut self,
        kind: ReadKind,
        conn: &mut dyn StoreConnection,
        state: &SharedRunState,
    ) -> Result<()> {
        match kind {
            ReadKind::Count => {
                conn.count(StoreTarget::Derived)?;
            }
            ReadKind::Aggregate => {
                conn.aggregate(StoreTarget::Derived)?;
            }
            ReadKind::Filter => {
                let threshold = self.rng.random_range(1..=5_000);
                conn.filter(StoreTarget::Derived, threshold, self.filter_limit)?;
            }
        }
        state.stats.increment(StatKind::Query);
        Ok(())
    }
}

impl Workload for Reader {
    fn role(&self) -> WorkerRole {
        WorkerRole::Reader
    }

    fn execute(&mut self, conn: &mut dyn StoreConnection, state: &SharedRunState) -> Result<()> {
        let kind = ReadKind::choose(&mut self.rng);
        self.query(kind, conn, state)
    }

    fn pause(&mut self) -> Duration {
        self.sleep.sample(&mut self.rng)
    }
}
