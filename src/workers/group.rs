//! Spawns worker threads and joins them with a bounded grace period.

use super::WorkerRole;
use crate::error::{Error, Result};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::{BTreeMap, HashSet};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct WorkerHandle {
    id: usize,
    name: String,
    role: WorkerRole,
    thread: JoinHandle<u64>,
}

/// Signals completion when dropped, including during a panic unwind.
struct DoneSignal {
    id: usize,
    tx: Sender<usize>,
}

impl Drop for DoneSignal {
    fn drop(&mut self) {
        let _ = self.tx.send(self.id);
    }
}

/// What happened when the group was joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    pub joined: usize,
    /// Workers still running when the grace period ran out
    pub abandoned: Vec<String>,
    /// Workers whose thread panicked, paired with their role
    pub panicked: Vec<(String, WorkerRole)>,
    /// Iterations reported by the workers that joined cleanly
    pub iterations: u64,
}

impl JoinOutcome {
    pub fn all_joined(&self) -> bool {
        self.abandoned.is_empty() && self.panicked.is_empty()
    }
}

pub struct WorkerGroup {
    handles: Vec<WorkerHandle>,
    done_tx: Sender<usize>,
    done_rx: Receiver<usize>,
}

impl Default for WorkerGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerGroup {
    pub fn new() -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            handles: Vec::new(),
            done_tx,
            done_rx,
        }
    }

    /// Starts `work` on a dedicated, named OS thread.
    pub fn spawn<F>(&mut self, role: WorkerRole, work: F) -> Result<()>
    where
        F: FnOnce() -> u64 + Send + 'static,
    {
        let id = self.handles.len();
        let ordinal = self.handles.iter().filter(|h| h.role == role).count();
        let name = format!("{}-{}", role.label(), ordinal);
        let tx = self.done_tx.clone();

        // The signal only exists once the thread runs; a failed spawn sends nothing.
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _signal = DoneSignal { id, tx };
                work()
            })
            .map_err(|source| Error::Spawn {
                name: name.clone(),
                source,
            })?;

        debug!(worker = %name, "Worker started");
        self.handles.push(WorkerHandle {
            id,
            name,
            role,
            thread,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn spawned_by_role(&self) -> BTreeMap<WorkerRole, usize> {
        let mut counts = BTreeMap::new();
        for handle in &self.handles {
            *counts.entry(handle.role).or_insert(0) += 1;
        }
        counts
    }

    /// Waits up to `grace` for every worker to finish. Workers that are still
    /// running afterwards are detached, not killed.
    pub fn join(self, grace: Duration) -> JoinOutcome {
        let WorkerGroup {
            handles, done_rx, ..
        } = self;
        let deadline = Instant::now() + grace;
        let mut finished = HashSet::with_capacity(handles.len());

        while finished.len() < handles.len() {
            match done_rx.recv_deadline(deadline) {
                Ok(id) if id < handles.len() => {
                    finished.insert(id);
                }
                Ok(stray) => debug!(id = stray, "Ignoring completion for unknown worker"),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut outcome = JoinOutcome::default();
        for handle in handles {
            if !finished.contains(&handle.id) {
                warn!(worker = %handle.name, "Worker did not stop within grace period; abandoning");
                outcome.abandoned.push(handle.name);
                continue;
            }
            match handle.thread.join() {
                Ok(iterations) => {
                    outcome.joined += 1;
                    outcome.iterations += iterations;
                }
                Err(_) => {
                    warn!(worker = %handle.name, "Worker panicked");
                    outcome.panicked.push((handle.name, handle.role));
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn joins_finished_workers_and_sums_iterations() {
        let mut group = WorkerGroup::new();
        for n in 1..=3u64 {
            group.spawn(WorkerRole::Reader, move || n).unwrap();
        }
        group.spawn(WorkerRole::Auditor, || 10).unwrap();

        let roles = group.spawned_by_role();
        assert_eq!(roles[&WorkerRole::Reader], 3);
        assert_eq!(roles[&WorkerRole::Auditor], 1);

        let outcome = group.join(Duration::from_secs(5));
        assert_eq!(outcome.joined, 4);
        assert_eq!(outcome.iterations, 16);
        assert!(outcome.all_joined());
    }

    #[test]
    fn stragglers_are_abandoned_after_grace() {
        let release = Arc::new(AtomicBool::new(false));
        let mut group = WorkerGroup::new();
        group.spawn(WorkerRole::BatchWriter, || 1).unwrap();
        let held = Arc::clone(&release);
        group
            .spawn(WorkerRole::PointMutator, move || {
                while !held.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(5));
                }
                0
            })
            .unwrap();

        let start = Instant::now();
        let outcome = group.join(Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.joined, 1);
        assert_eq!(outcome.abandoned, vec!["point-mutator-0".to_string()]);

        release.store(true, Ordering::Release);
    }

    #[test]
    fn unknown_completion_ids_do_not_end_the_wait() {
        let mut group = WorkerGroup::new();
        group.done_tx.send(7).unwrap();
        group
            .spawn(WorkerRole::Auditor, || {
                thread::sleep(Duration::from_millis(200));
                3
            })
            .unwrap();

        let outcome = group.join(Duration::from_secs(5));
        assert_eq!(outcome.joined, 1);
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.abandoned.is_empty());
    }

    #[test]
    fn panics_are_reported_not_propagated() {
        let mut group = WorkerGroup::new();
        group
            .spawn(WorkerRole::Reader, || panic!("reader blew up"))
            .unwrap();
        let outcome = group.join(Duration::from_secs(5));
        assert_eq!(outcome.joined, 0);
        assert_eq!(
            outcome.panicked,
            vec![("reader-0".to_string(), WorkerRole::Reader)]
        );
    }
}
