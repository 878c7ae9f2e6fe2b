use super::{WorkerRole, Workload, VALUE_RANGE};
use crate::config::SleepRange;
use crate::error::Result;
use crate::state::SharedRunState;
use crate::stats::StatKind;
use crate::store::{NewRecord, StoreConnection};
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

/// Inserts a batch of synthetic rows into the primary each iteration.
pub struct BatchWriter {
    batch_size: usize,
    sleep: SleepRange,
    rng: StdRng,
}

impl BatchWriter {
    pub fn new(batch_size: usize, sleep: SleepRange, rng: StdRng) -> Self {
        Self {
            batch_size,
            sleep,
            rng,
        }
    }

    fn generate_batch(&mut self) -> Vec<NewRecord> {
        (0..self.batch_size)
            .map(|_| NewRecord {
                value: self.rng.random_range(VALUE_RANGE),
                text: format!("batch_text_{}", self.rng.random_range(1..=1000)),
            })
            .collect()
    }
}

impl Workload for BatchWriter {
    fn role(&self) -> WorkerRole {
        WorkerRole::BatchWriter
    }

    fn execute(&mut self, conn: &mut dyn StoreConnection, state: &SharedRunState) -> Result<()> {
        let batch = self.generate_batch();
        conn.insert_batch(&batch)?;
        // Rows, not batches.
        state.stats.add(StatKind::BatchInsert, batch.len() as u64);
        Ok(())
    }

    fn pause(&mut self) -> Duration {
        self.sleep.sample(&mut self.rng)
    }
}
