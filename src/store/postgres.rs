//! Postgres primary with a pg_mooncake columnstore mirror.
//!
//! Workers are plain OS threads, so every call blocks on the runtime handle
//! the connector was built with. Each connection's driver task runs on that
//! runtime.

use super::{Aggregate, NewRecord, Record, StoreConnection, StoreConnector, StoreTarget};
use crate::error::{Error, Result};
use tokio::runtime::Handle;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{info, warn};

pub const DEFAULT_PRIMARY_TABLE: &str = "stress_regular";
pub const DEFAULT_MIRROR_TABLE: &str = "stress_columnstore";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresOptions {
    /// libpq-style connection string or URL
    pub dsn: String,
    pub primary_table: String,
    pub mirror_table: String,
}

impl PostgresOptions {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            primary_table: DEFAULT_PRIMARY_TABLE.to_string(),
            mirror_table: DEFAULT_MIRROR_TABLE.to_string(),
        }
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && name.len() <= 63 {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid table name: {:?}", name)))
    }
}

#[derive(Debug, Clone)]
struct Statements {
    provision: String,
    teardown: String,
    insert: String,
    update_random: String,
    delete_random: String,
    count_primary: String,
    count_mirror: String,
    aggregate_primary: String,
    aggregate_mirror: String,
    filter_primary: String,
    filter_mirror: String,
    snapshot: String,
}

impl Statements {
    fn new(primary: &str, mirror: &str) -> Self {
        let count = |t: &str| format!("SELECT COUNT(*) FROM {}", t);
        let aggregate =
            |t: &str| format!("SELECT AVG(value)::float8, MIN(value), MAX(value) FROM {}", t);
        let filter = |t: &str| {
            format!(
                "SELECT id, value, text_data FROM {} WHERE value > $1 LIMIT $2",
                t
            )
        };
        Self {
            provision: format!(
                "CREATE EXTENSION IF NOT EXISTS pg_mooncake;
                 DROP TABLE IF EXISTS {p} CASCADE;
                 DROP TABLE IF EXISTS {m} CASCADE;
                 CREATE TABLE {p} (
                     id BIGSERIAL PRIMARY KEY,
                     value BIGINT,
                     text_data TEXT,
                     created_at TIMESTAMP DEFAULT NOW()
                 );
                 CALL mooncake.create_table('{m}', '{p}');",
                p = primary,
                m = mirror
            ),
            teardown: format!(
                "DROP TABLE IF EXISTS {} CASCADE; DROP TABLE IF EXISTS {} CASCADE;",
                primary, mirror
            ),
            insert: format!("INSERT INTO {} (value, text_data) VALUES ($1, $2)", primary),
            update_random: format!(
                "UPDATE {p} SET value = $1 WHERE id = (SELECT id FROM {p} ORDER BY RANDOM() LIMIT 1)",
                p = primary
            ),
            delete_random: format!(
                "DELETE FROM {p} WHERE id = (SELECT id FROM {p} ORDER BY RANDOM() LIMIT 1)",
                p = primary
            ),
            count_primary: count(primary),
            count_mirror: count(mirror),
            aggregate_primary: aggregate(primary),
            aggregate_mirror: aggregate(mirror),
            filter_primary: filter(primary),
            filter_mirror: filter(mirror),
            snapshot: format!("CALL mooncake.create_snapshot('{}')", mirror),
        }
    }

    fn count(&self, target: StoreTarget) -> &str {
        match target {
            StoreTarget::Primary => &self.count_primary,
            StoreTarget::Derived => &self.count_mirror,
        }
    }

    fn aggregate(&self, target: StoreTarget) -> &str {
        match target {
            StoreTarget::Primary => &self.aggregate_primary,
            StoreTarget::Derived => &self.aggregate_mirror,
        }
    }

    fn filter(&self, target: StoreTarget) -> &str {
        match target {
            StoreTarget::Primary => &self.filter_primary,
            StoreTarget::Derived => &self.filter_mirror,
        }
    }
}

pub struct PostgresConnector {
    config: Config,
    statements: Statements,
    runtime: Handle,
}

impl PostgresConnector {
    /// Validates the options; no connection is opened until it is needed.
    pub fn new(options: &PostgresOptions, runtime: Handle) -> Result<Self> {
        validate_identifier(&options.primary_table)?;
        validate_identifier(&options.mirror_table)?;
        if options.primary_table == options.mirror_table {
            return Err(Error::Config(
                "primary and mirror tables must differ".into(),
            ));
        }
        let config: Config = options
            .dsn
            .parse()
            .map_err(|e| Error::Config(format!("invalid connection string: {}", e)))?;

        Ok(Self {
            config,
            statements: Statements::new(&options.primary_table, &options.mirror_table),
            runtime,
        })
    }

    fn open(&self) -> Result<Client> {
        let (client, connection) = self
            .runtime
            .block_on(self.config.connect(NoTls))
            .map_err(|e| Error::Connection(e.to_string()))?;
        self.runtime.spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "Postgres connection task ended with an error");
            }
        });
        Ok(client)
    }

    fn execute_script(&self, script: &str) -> Result<()> {
        let client = self.open()?;
        self.runtime
            .block_on(client.batch_execute(script))
            .map_err(|e| Error::Schema(e.to_string()))
    }
}

impl StoreConnector for PostgresConnector {
    fn provision_schema(&self) -> Result<()> {
        self.execute_script(&self.statements.provision)?;
        info!("Primary table and columnstore mirror provisioned");
        Ok(())
    }

    fn teardown_schema(&self) -> Result<()> {
        self.execute_script(&self.statements.teardown)?;
        info!("Primary table and columnstore mirror dropped");
        Ok(())
    }

    fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        Ok(Box::new(PostgresConnection {
            client: Some(self.open()?),
            statements: self.statements.clone(),
            runtime: self.runtime.clone(),
        }))
    }
}

pub struct PostgresConnection {
    client: Option<Client>,
    statements: Statements,
    runtime: Handle,
}

impl PostgresConnection {
    fn client(&self, op: &'static str) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::Connection(format!("connection already closed before `{}`", op)))
    }
}

fn store_err(op: &'static str) -> impl FnOnce(tokio_postgres::Error) -> Error {
    move |e| Error::store(op, e.to_string())
}

impl StoreConnection for PostgresConnection {
    fn insert_batch(&mut self, records: &[NewRecord]) -> Result<()> {
        let op = "insert_batch";
        let mut client = self
            .client
            .take()
            .ok_or_else(|| Error::Connection(format!("connection already closed before `{}`", op)))?;
        let insert = &self.statements.insert;
        let result = self.runtime.block_on(async {
            let tx = client.transaction().await?;
            let statement = tx.prepare(insert).await?;
            for record in records {
                tx.execute(&statement, &[&record.value, &record.text]).await?;
            }
            tx.commit().await
        });
        self.client = Some(client);
        result.map_err(store_err(op))
    }

    fn insert_one(&mut self, record: NewRecord) -> Result<()> {
        let client = self.client("insert_one")?;
        self.runtime
            .block_on(client.execute(
                self.statements.insert.as_str(),
                &[&record.value, &record.text],
            ))
            .map(|_| ())
            .map_err(store_err("insert_one"))
    }

    fn update_random(&mut self, new_value: i64) -> Result<u64> {
        let client = self.client("update_random")?;
        self.runtime
            .block_on(client.execute(self.statements.update_random.as_str(), &[&new_value]))
            .map_err(store_err("update_random"))
    }

    fn delete_random(&mut self) -> Result<u64> {
        let client = self.client("delete_random")?;
        self.runtime
            .block_on(client.execute(self.statements.delete_random.as_str(), &[]))
            .map_err(store_err("delete_random"))
    }

    fn count(&mut self, target: StoreTarget) -> Result<i64> {
        let client = self.client("count")?;
        let row = self
            .runtime
            .block_on(client.query_one(self.statements.count(target), &[]))
            .map_err(store_err("count"))?;
        row.try_get(0).map_err(store_err("count"))
    }

    fn aggregate(&mut self, target: StoreTarget) -> Result<Aggregate> {
        let client = self.client("aggregate")?;
        let row = self
            .runtime
            .block_on(client.query_one(self.statements.aggregate(target), &[]))
            .map_err(store_err("aggregate"))?;
        Ok(Aggregate {
            avg: row.try_get(0).map_err(store_err("aggregate"))?,
            min: row.try_get(1).map_err(store_err("aggregate"))?,
            max: row.try_get(2).map_err(store_err("aggregate"))?,
        })
    }

    fn filter(
        &mut self,
        target: StoreTarget,
        threshold: i64,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let client = self.client("filter")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .runtime
            .block_on(client.query(self.statements.filter(target), &[&threshold, &limit]))
            .map_err(store_err("filter"))?;

        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get(0).map_err(store_err("filter"))?;
                Ok(Record {
                    id: u64::try_from(id).unwrap_or_default(),
                    value: row
                        .try_get::<_, Option<i64>>(1)
                        .map_err(store_err("filter"))?
                        .unwrap_or_default(),
                    text: row
                        .try_get::<_, Option<String>>(2)
                        .map_err(store_err("filter"))?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    fn sync(&mut self) -> Result<()> {
        let client = self.client("sync")?;
        self.runtime
            .block_on(client.batch_execute(self.statements.snapshot.as_str()))
            .map_err(store_err("sync"))
    }

    fn close(&mut self) {
        self.client = None;
    }
}
