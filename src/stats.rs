use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

/// Operation kinds the harness keeps counters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    BatchInsert,
    PointInsert,
    Update,
    Delete,
    Query,
    ConsistencyCheck,
    Inconsistency,
    /// Mismatch observed inside a debounce window, not yet flagged
    TransientMismatch,
}

impl StatKind {
    pub const ALL: [StatKind; 8] = [
        StatKind::BatchInsert,
        StatKind::PointInsert,
        StatKind::Update,
        StatKind::Delete,
        StatKind::Query,
        StatKind::ConsistencyCheck,
        StatKind::Inconsistency,
        StatKind::TransientMismatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::BatchInsert => "batch_inserts",
            StatKind::PointInsert => "point_inserts",
            StatKind::Update => "updates",
            StatKind::Delete => "deletes",
            StatKind::Query => "queries",
            StatKind::ConsistencyCheck => "consistency_checks",
            StatKind::Inconsistency => "inconsistencies",
            StatKind::TransientMismatch => "transient_mismatches",
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatCounters {
    pub batch_inserts: u64,
    pub point_inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub queries: u64,
    pub consistency_checks: u64,
    pub inconsistencies: u64,
    pub transient_mismatches: u64,
}

impl StatCounters {
    pub fn get(&self, kind: StatKind) -> u64 {
        match kind {
            StatKind::BatchInsert => self.batch_inserts,
            StatKind::PointInsert => self.point_inserts,
            StatKind::Update => self.updates,
            StatKind::Delete => self.deletes,
            StatKind::Query => self.queries,
            StatKind::ConsistencyCheck => self.consistency_checks,
            StatKind::Inconsistency => self.inconsistencies,
            StatKind::TransientMismatch => self.transient_mismatches,
        }
    }

    fn slot(&mut self, kind: StatKind) -> &mut u64 {
        match kind {
            StatKind::BatchInsert => &mut self.batch_inserts,
            StatKind::PointInsert => &mut self.point_inserts,
            StatKind::Update => &mut self.updates,
            StatKind::Delete => &mut self.deletes,
            StatKind::Query => &mut self.queries,
            StatKind::ConsistencyCheck => &mut self.consistency_checks,
            StatKind::Inconsistency => &mut self.inconsistencies,
            StatKind::TransientMismatch => &mut self.transient_mismatches,
        }
    }

    /// Workload operations issued against the stores. Batch inserts count
    /// rows, so a large batch weighs more than a point write.
    pub fn workload_operations(&self) -> u64 {
        self.batch_inserts + self.point_inserts + self.updates + self.deletes + self.queries
    }
}

/// Thread-safe counter set shared by every worker of a run.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    counters: Mutex<StatCounters>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, kind: StatKind) {
        self.add(kind, 1);
    }

    pub fn add(&self, kind: StatKind, delta: u64) {
        let mut counters = self.counters.lock();
        let slot = counters.slot(kind);
        *slot = slot.saturating_add(delta);
    }

    pub fn get(&self, kind: StatKind) -> u64 {
        self.counters.lock().get(kind)
    }

    pub fn snapshot(&self) -> StatCounters {
        *self.counters.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn increments_are_tracked_per_kind() {
        let stats = StatsAggregator::new();
        stats.add(StatKind::BatchInsert, 100);
        stats.increment(StatKind::Update);
        stats.increment(StatKind::Update);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batch_inserts, 100);
        assert_eq!(snapshot.updates, 2);
        assert_eq!(snapshot.deletes, 0);
        assert_eq!(snapshot.workload_operations(), 102);
    }

    #[test]
    fn snapshot_is_detached_from_later_updates() {
        let stats = StatsAggregator::new();
        stats.increment(StatKind::Query);
        let before = stats.snapshot();
        stats.increment(StatKind::Query);
        assert_eq!(before.queries, 1);
        assert_eq!(stats.get(StatKind::Query), 2);
    }

    #[test]
    fn every_kind_has_a_distinct_slot() {
        let stats = StatsAggregator::new();
        for (i, kind) in StatKind::ALL.iter().enumerate() {
            stats.add(*kind, i as u64 + 1);
        }
        let snapshot = stats.snapshot();
        for (i, kind) in StatKind::ALL.iter().enumerate() {
            assert_eq!(snapshot.get(*kind), i as u64 + 1, "{}", kind);
        }
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(StatsAggregator::new());
        let threads = 50;
        let per_thread = 10_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        stats.increment(StatKind::PointInsert);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            stats.get(StatKind::PointInsert),
            (threads * per_thread) as u64
        );
    }
}
