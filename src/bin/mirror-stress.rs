//! mirror-stress: drives a concurrent workload against a primary store and
//! its derived mirror, then reports PASS or FAIL.

use clap::Parser;
use mirror_stress::{
    logging, Error, MemoryConnector, MemoryStoreOptions, OutputFormat, PostgresConnector,
    PostgresOptions, Reporter, Result, RunConfig, RunPreset, StoreConnector, TeardownStatus,
    WorkloadController,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

/// Which store pair the run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Target {
    /// In-process store with optional fault injection
    #[default]
    Memory,
    /// Postgres primary mirrored by a pg_mooncake columnstore table
    Postgres,
}

impl std::str::FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Target::Memory),
            "postgres" => Ok(Target::Postgres),
            _ => Err(format!("Invalid target: {}. Use 'memory' or 'postgres'.", s)),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "mirror-stress")]
#[command(about = "Concurrent workload and consistency stress test for a mirrored store", version)]
struct Cli {
    /// Store pair to drive: memory or postgres
    #[arg(long, default_value = "memory")]
    target: Target,

    /// Connection string for the postgres target, e.g.
    /// "host=localhost port=28817 user=postgres dbname=pg_mooncake"
    #[arg(long)]
    dsn: Option<String>,

    /// Primary table name (postgres target)
    #[arg(long, default_value = mirror_stress::store::postgres::DEFAULT_PRIMARY_TABLE)]
    primary_table: String,

    /// Columnstore mirror table name (postgres target)
    #[arg(long, default_value = mirror_stress::store::postgres::DEFAULT_MIRROR_TABLE)]
    mirror_table: String,

    /// Base configuration: smoke, standard or soak
    #[arg(long, default_value = "standard")]
    preset: RunPreset,

    /// Run length in seconds
    #[arg(short, long)]
    duration: Option<u64>,

    #[arg(long)]
    batch_workers: Option<usize>,

    #[arg(long)]
    point_workers: Option<usize>,

    #[arg(long)]
    query_workers: Option<usize>,

    /// Records per batch insert
    #[arg(long)]
    batch_size: Option<usize>,

    /// Pause between consistency checks, in milliseconds
    #[arg(long)]
    audit_interval_ms: Option<u64>,

    /// Seconds to wait for workers after the run stops
    #[arg(long)]
    grace: Option<u64>,

    /// Consecutive mismatches needed to flag an inconsistency
    #[arg(long)]
    mismatch_threshold: Option<u32>,

    /// Seed for reproducible workloads
    #[arg(long)]
    seed: Option<u64>,

    /// Probability that a store operation fails
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    /// Probability that a replicated change is lost
    #[arg(long, default_value_t = 0.0)]
    replication_drop_rate: f64,

    /// Latency added to every in-memory store operation, in milliseconds
    #[arg(long, default_value_t = 0)]
    op_latency_ms: u64,

    /// Report format: text or json
    #[arg(short = 'o', long, default_value = "text")]
    format: OutputFormat,

    /// Log progress at info level
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let mut config = self.preset.to_config();
        if let Some(secs) = self.duration {
            config.duration = Duration::from_secs(secs);
        }
        if let Some(n) = self.batch_workers {
            config.batch_workers = n;
        }
        if let Some(n) = self.point_workers {
            config.point_workers = n;
        }
        if let Some(n) = self.query_workers {
            config.query_workers = n;
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(ms) = self.audit_interval_ms {
            config.audit_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.grace {
            config.join_grace = Duration::from_secs(secs);
        }
        if let Some(n) = self.mismatch_threshold {
            config.mismatch_threshold = n;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config
    }

    fn store_options(&self) -> MemoryStoreOptions {
        MemoryStoreOptions {
            failure_rate: self.failure_rate,
            replication_drop_rate: self.replication_drop_rate,
            op_latency: Duration::from_millis(self.op_latency_ms),
            seed: self.seed,
        }
    }

    fn fault_injection_requested(&self) -> bool {
        self.failure_rate > 0.0 || self.replication_drop_rate > 0.0 || self.op_latency_ms > 0
    }

    /// Checks that the target and its flags agree.
    fn validate_target(&self) -> Result<()> {
        match self.target {
            Target::Memory if self.dsn.is_some() => Err(Error::Config(
                "--dsn only applies to --target postgres".into(),
            )),
            Target::Postgres if self.dsn.is_none() => Err(Error::Config(
                "--target postgres requires --dsn".into(),
            )),
            Target::Postgres if self.fault_injection_requested() => Err(Error::Config(
                "fault injection flags only apply to --target memory".into(),
            )),
            _ => Ok(()),
        }
    }

    fn connector(&self, runtime: tokio::runtime::Handle) -> Result<Arc<dyn StoreConnector>> {
        self.validate_target()?;
        match (self.target, &self.dsn) {
            (Target::Postgres, Some(dsn)) => {
                let options = PostgresOptions {
                    dsn: dsn.clone(),
                    primary_table: self.primary_table.clone(),
                    mirror_table: self.mirror_table.clone(),
                };
                Ok(Arc::new(PostgresConnector::new(&options, runtime)?))
            }
            _ => Ok(Arc::new(MemoryConnector::with_options(self.store_options())?)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::INFO } else { Level::WARN };
    if let Err(e) = logging::init_logging(level, cli.json_logs) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let connector = match cli.connector(tokio::runtime::Handle::current()) {
        Ok(connector) => connector,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = cli.run_config();
    let controller = WorkloadController::new(connector).with_reporter(Reporter::new(cli.format));

    let stop = controller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; stopping run");
            stop.stop();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        controller.run(&config, &mut out)
    })
    .await;

    match outcome {
        Ok(Ok(summary)) => {
            if let TeardownStatus::Failed(reason) = &summary.teardown {
                eprintln!("Warning: teardown failed: {}", reason);
            }
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(error = %e, code = e.error_code(), "Stress run aborted");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: stress run panicked: {}", e);
            ExitCode::FAILURE
        }
    }
}
