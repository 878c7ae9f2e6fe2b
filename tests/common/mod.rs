#![allow(dead_code)]

use mirror_stress::{
    Aggregate, Error, MemoryConnector, MemoryStoreOptions, NewRecord, Record, Result, RunConfig,
    SleepRange, StoreConnection, StoreConnector, StoreTarget,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Store double built on the in-memory store with scripted failures.
#[derive(Default)]
pub struct ScriptedConnector {
    pub inner: MemoryConnector,
    pub fail_provision: bool,
    pub fail_teardown: bool,
    pub fail_connect: bool,
    /// Every connection operation returns an error
    pub fail_ops: bool,
    /// Every `sync` blocks this long, ignoring the run token
    pub sync_stall: Duration,
    pub counters: Arc<ScriptCounters>,
}

#[derive(Debug, Default)]
pub struct ScriptCounters {
    pub provisions: AtomicU64,
    pub teardowns: AtomicU64,
    pub connects: AtomicU64,
    pub closes: AtomicU64,
}

impl ScriptCounters {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Acquire)
    }
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store_options(options: MemoryStoreOptions) -> Self {
        Self {
            inner: MemoryConnector::with_options(options).unwrap(),
            ..Self::default()
        }
    }
}

impl StoreConnector for ScriptedConnector {
    fn provision_schema(&self) -> Result<()> {
        self.counters.provisions.fetch_add(1, Ordering::AcqRel);
        if self.fail_provision {
            return Err(Error::Schema("permission denied for schema".into()));
        }
        self.inner.provision_schema()
    }

    fn teardown_schema(&self) -> Result<()> {
        self.counters.teardowns.fetch_add(1, Ordering::AcqRel);
        if self.fail_teardown {
            return Err(Error::Schema("table is locked".into()));
        }
        self.inner.teardown_schema()
    }

    fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        self.counters.connects.fetch_add(1, Ordering::AcqRel);
        if self.fail_connect {
            return Err(Error::Connection("connection refused".into()));
        }
        Ok(Box::new(ScriptedConnection {
            inner: self.inner.connect()?,
            fail_ops: self.fail_ops,
            sync_stall: self.sync_stall,
            counters: Arc::clone(&self.counters),
        }))
    }
}

pub struct ScriptedConnection {
    inner: Box<dyn StoreConnection>,
    fail_ops: bool,
    sync_stall: Duration,
    counters: Arc<ScriptCounters>,
}

impl ScriptedConnection {
    fn check(&self, op: &'static str) -> Result<()> {
        if self.fail_ops {
            Err(Error::store(op, "scripted failure"))
        } else {
            Ok(())
        }
    }
}

impl StoreConnection for ScriptedConnection {
    fn insert_batch(&mut self, records: &[NewRecord]) -> Result<()> {
        self.check("insert_batch")?;
        self.inner.insert_batch(records)
    }

    fn insert_one(&mut self, record: NewRecord) -> Result<()> {
        self.check("insert_one")?;
        self.inner.insert_one(record)
    }

    fn update_random(&mut self, new_value: i64) -> Result<u64> {
        self.check("update_random")?;
        self.inner.update_random(new_value)
    }

    fn delete_random(&mut self) -> Result<u64> {
        self.check("delete_random")?;
        self.inner.delete_random()
    }

    fn count(&mut self, target: StoreTarget) -> Result<i64> {
        self.check("count")?;
        self.inner.count(target)
    }

    fn aggregate(&mut self, target: StoreTarget) -> Result<Aggregate> {
        self.check("aggregate")?;
        self.inner.aggregate(target)
    }

    fn filter(
        &mut self,
        target: StoreTarget,
        threshold: i64,
        limit: usize,
    ) -> Result<Vec<Record>> {
        self.check("filter")?;
        self.inner.filter(target, threshold, limit)
    }

    fn sync(&mut self) -> Result<()> {
        if !self.sync_stall.is_zero() {
            thread::sleep(self.sync_stall);
        }
        self.check("sync")?;
        self.inner.sync()
    }

    fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::AcqRel);
        self.inner.close();
    }
}

/// A short, fast-cycling run suitable for tests.
pub fn quick_config(duration_ms: u64) -> RunConfig {
    RunConfig {
        duration: Duration::from_millis(duration_ms),
        batch_workers: 1,
        point_workers: 2,
        query_workers: 1,
        batch_size: 10,
        batch_sleep: SleepRange::from_millis(5, 15),
        point_sleep: SleepRange::from_millis(1, 5),
        query_sleep: SleepRange::from_millis(2, 8),
        audit_interval: Duration::from_millis(20),
        join_grace: Duration::from_secs(5),
        progress_interval: Duration::from_millis(100),
        seed: Some(42),
        ..RunConfig::default()
    }
}
