//! Concurrent workload and consistency stress harness for a primary store
//! and the derived mirror that replicates it.
//!
//! A run provisions the schema, starts batch writers, point mutators and
//! analytical readers against their own connections, and periodically
//! compares row counts between the primary and the mirror. At the end it
//! reports counters and recent errors and decides PASS or FAIL.

pub mod config;
pub mod controller;
pub mod error;
pub mod error_sink;
pub mod logging;
pub mod report;
pub mod run_token;
pub mod state;
pub mod stats;
pub mod store;
pub mod workers;

pub use config::{RunConfig, RunPreset, SleepRange};
pub use controller::{plan_workloads, RunSummary, StopHandle, TeardownStatus, WorkloadController};
pub use error::{Error, Result};
pub use error_sink::{ErrorRecord, ErrorSink};
pub use report::{OutputFormat, Reporter, RunReport, Verdict};
pub use run_token::RunToken;
pub use state::SharedRunState;
pub use stats::{StatCounters, StatKind, StatsAggregator};
pub use store::{
    Aggregate, ConnectionGuard, MemoryConnector, MemoryStoreOptions, NewRecord, PostgresConnector,
    PostgresOptions, Record, StoreConnection, StoreConnector, StoreTarget,
};
pub use workers::{WorkerRole, Workload};
