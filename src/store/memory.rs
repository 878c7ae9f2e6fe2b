//! In-process primary/derived pair.
//!
//! The primary is a row table that applies mutations immediately and appends
//! them to a replication log. The derived mirror only sees those changes when
//! a connection calls `sync()`, which is how a snapshot-refreshed columnar
//! copy behaves from the outside. Faults can be injected to exercise the
//! harness: transient operation failures, replication changes that never
//! reach the mirror, and per-operation latency.

use super::{Aggregate, NewRecord, Record, StoreConnection, StoreConnector, StoreTarget};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStoreOptions {
    /// Probability that any single operation fails with a transient error
    pub failure_rate: f64,
    /// Probability that a replicated change is lost on its way to the mirror
    pub replication_drop_rate: f64,
    /// Artificial latency added to every operation
    pub op_latency: Duration,
    /// Seed for connection RNGs; entropy is used when absent
    pub seed: Option<u64>,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            replication_drop_rate: 0.0,
            op_latency: Duration::ZERO,
            seed: None,
        }
    }
}

impl MemoryStoreOptions {
    fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("failure_rate", self.failure_rate),
            ("replication_drop_rate", self.replication_drop_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, rate
                )));
            }
        }
        Ok(())
    }
}

/// Rows addressable by id with O(1) random selection.
#[derive(Debug, Default)]
struct RowTable {
    rows: Vec<Record>,
    positions: HashMap<u64, usize>,
}

impl RowTable {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn insert(&mut self, record: Record) {
        if let Some(&pos) = self.positions.get(&record.id) {
            self.rows[pos] = record;
            return;
        }
        self.positions.insert(record.id, self.rows.len());
        self.rows.push(record);
    }

    fn update(&mut self, id: u64, value: i64) -> bool {
        match self.positions.get(&id) {
            Some(&pos) => {
                self.rows[pos].value = value;
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, id: u64) -> bool {
        let Some(pos) = self.positions.remove(&id) else {
            return false;
        };
        self.rows.swap_remove(pos);
        if let Some(moved) = self.rows.get(pos) {
            self.positions.insert(moved.id, pos);
        }
        true
    }

    fn random_id<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u64> {
        if self.rows.is_empty() {
            return None;
        }
        Some(self.rows[rng.random_range(0..self.rows.len())].id)
    }

    fn aggregate(&self) -> Aggregate {
        if self.rows.is_empty() {
            return Aggregate::default();
        }
        let sum: i128 = self.rows.iter().map(|r| r.value as i128).sum();
        Aggregate {
            avg: Some(sum as f64 / self.rows.len() as f64),
            min: self.rows.iter().map(|r| r.value).min(),
            max: self.rows.iter().map(|r| r.value).max(),
        }
    }

    fn filter(&self, threshold: i64, limit: usize) -> Vec<Record> {
        self.rows
            .iter()
            .filter(|r| r.value > threshold)
            .take(limit)
            .cloned()
            .collect()
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.positions.clear();
    }
}

#[derive(Debug, Clone)]
enum Change {
    Insert(Record),
    Update { id: u64, value: i64 },
    Delete { id: u64 },
}

#[derive(Debug, Default)]
struct MemoryState {
    provisioned: bool,
    next_id: u64,
    primary: RowTable,
    derived: RowTable,
    replication_log: Vec<Change>,
}

impl MemoryState {
    fn reset(&mut self) {
        self.next_id = 1;
        self.primary.clear();
        self.derived.clear();
        self.replication_log.clear();
    }

    fn insert_primary(&mut self, record: NewRecord) {
        let record = Record {
            id: self.next_id,
            value: record.value,
            text: record.text,
        };
        self.next_id += 1;
        self.replication_log.push(Change::Insert(record.clone()));
        self.primary.insert(record);
    }

    fn table(&self, target: StoreTarget) -> &RowTable {
        match target {
            StoreTarget::Primary => &self.primary,
            StoreTarget::Derived => &self.derived,
        }
    }
}

#[derive(Debug)]
struct MemoryShared {
    options: MemoryStoreOptions,
    state: Mutex<MemoryState>,
    connection_seq: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
}

/// Connector for the in-process store pair. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<MemoryShared>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    /// A fault-free store.
    pub fn new() -> Self {
        Self::from_valid_options(MemoryStoreOptions::default())
    }

    pub fn with_options(options: MemoryStoreOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::from_valid_options(options))
    }

    fn from_valid_options(options: MemoryStoreOptions) -> Self {
        Self {
            shared: Arc::new(MemoryShared {
                options,
                state: Mutex::new(MemoryState::default()),
                connection_seq: AtomicU64::new(0),
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_provisioned(&self) -> bool {
        self.shared.state.lock().provisioned
    }

    pub fn row_count(&self, target: StoreTarget) -> usize {
        self.shared.state.lock().table(target).len()
    }

    /// Changes written to the primary that the mirror has not seen yet.
    pub fn pending_changes(&self) -> usize {
        self.shared.state.lock().replication_log.len()
    }

    pub fn connections_opened(&self) -> u64 {
        self.shared.opened.load(Ordering::Acquire)
    }

    pub fn connections_closed(&self) -> u64 {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl StoreConnector for MemoryConnector {
    fn provision_schema(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.provisioned {
            debug!("Dropping existing tables before provisioning");
        }
        state.reset();
        state.provisioned = true;
        info!("Primary table and derived mirror provisioned");
        Ok(())
    }

    fn teardown_schema(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.reset();
        state.provisioned = false;
        info!("Primary table and derived mirror dropped");
        Ok(())
    }

    fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        let seq = self.shared.connection_seq.fetch_add(1, Ordering::AcqRel);
        let rng = match self.shared.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(seq)),
            None => StdRng::from_os_rng(),
        };
        self.shared.opened.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            rng,
            closed: false,
        }))
    }
}

/// One worker's session against the in-process store.
pub struct MemoryConnection {
    shared: Arc<MemoryShared>,
    rng: StdRng,
    closed: bool,
}

impl MemoryConnection {
    /// Applies latency and fault injection, then checks the session is usable.
    fn begin(&mut self, op: &'static str) -> Result<()> {
        if self.closed {
            return Err(Error::Connection(format!(
                "connection already closed before `{}`",
                op
            )));
        }
        let options = &self.shared.options;
        if !options.op_latency.is_zero() {
            thread::sleep(options.op_latency);
        }
        if options.failure_rate > 0.0 && self.rng.random_bool(options.failure_rate) {
            return Err(Error::store(op, "injected transient failure"));
        }
        Ok(())
    }

    fn provisioned(state: &MemoryState, op: &'static str) -> Result<()> {
        if state.provisioned {
            Ok(())
        } else {
            Err(Error::store(op, "relation does not exist"))
        }
    }

    /// Picks a target row, then mutates it in a separate critical section so
    /// a concurrent delete can win the race and leave zero affected rows.
    fn mutate_random<F>(&mut self, op: &'static str, apply: F) -> Result<u64>
    where
        F: FnOnce(&mut MemoryState, u64) -> bool,
    {
        let Some(id) = self.select_random(op)? else {
            return Ok(0);
        };
        thread::yield_now();
        self.mutate_selected(op, id, apply)
    }

    fn select_random(&mut self, op: &'static str) -> Result<Option<u64>> {
        let state = self.shared.state.lock();
        Self::provisioned(&state, op)?;
        Ok(state.primary.random_id(&mut self.rng))
    }

    fn mutate_selected<F>(&mut self, op: &'static str, id: u64, apply: F) -> Result<u64>
    where
        F: FnOnce(&mut MemoryState, u64) -> bool,
    {
        let mut state = self.shared.state.lock();
        Self::provisioned(&state, op)?;
        Ok(u64::from(apply(&mut *state, id)))
    }
}

impl StoreConnection for MemoryConnection {
    fn insert_batch(&mut self, records: &[NewRecord]) -> Result<()> {
        self.begin("insert_batch")?;
        let mut state = self.shared.state.lock();
        Self::provisioned(&state, "insert_batch")?;
        for record in records {
            state.insert_primary(record.clone());
        }
        Ok(())
    }

    fn insert_one(&mut self, record: NewRecord) -> Result<()> {
        self.begin("insert_one")?;
        let mut state = self.shared.state.lock();
        Self::provisioned(&state, "insert_one")?;
        state.insert_primary(record);
        Ok(())
    }

    fn update_random(&mut self, new_value: i64) -> Result<u64> {
        self.begin("update_random")?;
        self.mutate_random("update_random", |state, id| {
            let updated = state.primary.update(id, new_value);
            if updated {
                state.replication_log.push(Change::Update {
                    id,
                    value: new_value,
                });
            }
            updated
        })
    }

    fn delete_random(&mut self) -> Result<u64> {
        self.begin("delete_random")?;
        self.mutate_random("delete_random", |state, id| {
            let removed = state.primary.remove(id);
            if removed {
                state.replication_log.push(Change::Delete { id });
            }
            removed
        })
    }

    fn count(&mut self, target: StoreTarget) -> Result<i64> {
        self.begin("count")?;
        let state = self.shared.state.lock();
        Self::provisioned(&state, "count")?;
        Ok(state.table(target).len() as i64)
    }

    fn aggregate(&mut self, target: StoreTarget) -> Result<Aggregate> {
        self.begin("aggregate")?;
        let state = self.shared.state.lock();
        Self::provisioned(&state, "aggregate")?;
        Ok(state.table(target).aggregate())
    }

    fn filter(
        &mut self,
        target: StoreTarget,
        threshold: i64,
        limit: usize,
    ) -> Result<Vec<Record>> {
        self.begin("filter")?;
        let state = self.shared.state.lock();
        Self::provisioned(&state, "filter")?;
        Ok(state.table(target).filter(threshold, limit))
    }

    fn sync(&mut self) -> Result<()> {
        self.begin("sync")?;
        let drop_rate = self.shared.options.replication_drop_rate;
        let mut state = self.shared.state.lock();
        Self::provisioned(&state, "sync")?;

        let changes = std::mem::take(&mut state.replication_log);
        let mut dropped = 0usize;
        for change in changes {
            if drop_rate > 0.0 && self.rng.random_bool(drop_rate) {
                dropped += 1;
                continue;
            }
            match change {
                Change::Insert(record) => state.derived.insert(record),
                Change::Update { id, value } => {
                    state.derived.update(id, value);
                }
                Change::Delete { id } => {
                    state.derived.remove(id);
                }
            }
        }
        if dropped > 0 {
            debug!(dropped, "Replication changes lost during sync");
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.closed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}
