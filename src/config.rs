use crate::error::{Error, Result};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

/// Inclusive think-time range a worker sleeps between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SleepRange {
    pub min: Duration,
    pub max: Duration,
}

impl SleepRange {
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// A range that always yields the same duration.
    pub const fn fixed(duration: Duration) -> Self {
        Self {
            min: duration,
            max: duration,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_micros() as u64;
        let max = self.max.as_micros() as u64;
        Duration::from_micros(rng.random_range(min..=max))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.min > self.max {
            return Err(Error::Config(format!(
                "{} sleep range is inverted: min {:?} > max {:?}",
                name, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Immutable description of one harness run.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Wall-clock length of the workload phase
    pub duration: Duration,
    pub batch_workers: usize,
    pub point_workers: usize,
    pub query_workers: usize,
    /// Records generated per batch insert
    pub batch_size: usize,
    pub batch_sleep: SleepRange,
    pub point_sleep: SleepRange,
    pub query_sleep: SleepRange,
    /// Fixed pause between consistency checks
    pub audit_interval: Duration,
    /// How long the controller waits for workers after stopping the run
    pub join_grace: Duration,
    /// Cadence of progress snapshots while the run is active
    pub progress_interval: Duration,
    /// Row limit for filtered reads
    pub filter_limit: usize,
    /// Consecutive mismatching checks required before flagging an inconsistency
    pub mismatch_threshold: u32,
    /// Number of errors shown in the text report
    pub error_tail: usize,
    /// Base seed for worker RNGs; entropy is used when absent
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            batch_workers: 2,
            point_workers: 3,
            query_workers: 2,
            batch_size: 100,
            batch_sleep: SleepRange::from_millis(100, 500),
            point_sleep: SleepRange::from_millis(10, 100),
            query_sleep: SleepRange::from_millis(50, 200),
            audit_interval: Duration::from_secs(1),
            join_grace: Duration::from_secs(5),
            progress_interval: Duration::from_secs(10),
            filter_limit: 10,
            mismatch_threshold: 1,
            error_tail: 10,
            seed: None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.duration.is_zero() {
            return Err(Error::Config("duration must be greater than zero".into()));
        }
        if self.batch_workers > 0 && self.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be at least 1 when batch workers are enabled".into(),
            ));
        }
        if self.audit_interval.is_zero() {
            return Err(Error::Config("audit_interval must be greater than zero".into()));
        }
        if self.progress_interval.is_zero() {
            return Err(Error::Config(
                "progress_interval must be greater than zero".into(),
            ));
        }
        if self.mismatch_threshold == 0 {
            return Err(Error::Config("mismatch_threshold must be at least 1".into()));
        }
        if self.filter_limit == 0 {
            return Err(Error::Config("filter_limit must be at least 1".into()));
        }
        self.batch_sleep.validate("batch")?;
        self.point_sleep.validate("point")?;
        self.query_sleep.validate("query")?;
        Ok(())
    }

    /// Total workers a run spawns, the auditor included.
    pub fn total_workers(&self) -> usize {
        self.batch_workers + self.point_workers + self.query_workers + 1
    }
}

/// Canned configurations for common run shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPreset {
    /// A few seconds with one worker per role, for CI and local checks
    Smoke,
    /// The default 30 second mixed workload
    Standard,
    /// Ten minutes with doubled writers and a debounced auditor
    Soak,
}

impl RunPreset {
    pub fn to_config(self) -> RunConfig {
        match self {
            RunPreset::Smoke => RunConfig {
                duration: Duration::from_secs(5),
                batch_workers: 1,
                point_workers: 1,
                query_workers: 1,
                batch_size: 20,
                audit_interval: Duration::from_millis(500),
                join_grace: Duration::from_secs(2),
                progress_interval: Duration::from_secs(1),
                ..RunConfig::default()
            },
            RunPreset::Standard => RunConfig::default(),
            RunPreset::Soak => RunConfig {
                duration: Duration::from_secs(600),
                batch_workers: 4,
                point_workers: 6,
                query_workers: 4,
                mismatch_threshold: 3,
                progress_interval: Duration::from_secs(30),
                error_tail: 25,
                ..RunConfig::default()
            },
        }
    }
}

impl std::str::FromStr for RunPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "smoke" => Ok(RunPreset::Smoke),
            "standard" => Ok(RunPreset::Standard),
            "soak" => Ok(RunPreset::Soak),
            _ => Err(format!(
                "Invalid preset: {}. Use 'smoke', 'standard' or 'soak'.",
                s
            )),
        }
    }
}
