//! Database access used by the hub's checks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

use crate::error::AppError;
use gpupgrade_core::cluster::{SegmentConfig, SegmentConfigs};
use gpupgrade_core::version::VERSION_QUERY;

/// The database used for cluster-wide catalog queries.
pub const TEMPLATE_DATABASE: &str = "template1";

const SEGMENT_CONFIGURATION_QUERY: &str = "SELECT s.dbid::int4, s.content::int4, s.role::text, s.preferred_role::text, \
    s.mode::text, s.status::text, s.port::int4, s.hostname, s.address, e.fselocation AS datadir \
    FROM gp_segment_configuration s \
    JOIN pg_filespace_entry e ON s.dbid = e.fsedbid \
    JOIN pg_filespace f ON e.fsefsoid = f.oid \
    WHERE f.fsname = 'pg_system' \
    ORDER BY s.content, s.dbid";
const DATABASE_NAMES_QUERY: &str = "SELECT datname FROM pg_database WHERE datname != 'template0' ORDER BY datname";
const USER_TABLES_FILTER: &str = "c.relkind = 'r' \
    AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'gp_toolkit', 'pg_aoseg', 'pg_bitmapindex') \
    AND n.nspname NOT LIKE 'pg_temp%' AND n.nspname NOT LIKE 'pg_toast%'";

/// A factory of database connections.
#[async_trait]
pub trait DbConnector: Send + Sync {
    /// Open a connection to the given database, failing with `AppError::Connection` if the
    /// target is unreachable.
    async fn connect(&self, host: &str, port: u16, dbname: &str) -> Result<Box<dyn DbConn>, AppError>;
}

/// An open database connection, released when dropped.
#[async_trait]
pub trait DbConn: Send + Sync {
    /// The raw output of `SELECT version()`.
    async fn version_string(&self) -> Result<String>;
    /// The cluster's segment configuration.
    async fn segment_configuration(&self) -> Result<SegmentConfigs>;
    /// The names of all connectable databases.
    async fn database_names(&self) -> Result<Vec<String>>;
    /// The number of append-optimized and heap user tables in the connected database.
    async fn table_counts(&self) -> Result<TableCounts>;
}

/// Per-database table counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub ao: i32,
    pub heap: i32,
}

/// A connector for PostgreSQL-protocol databases.
#[derive(Clone, Debug)]
pub struct PgConnector {
    user: String,
}

impl PgConnector {
    /// Create a new instance which connects as the given user.
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    /// Create a new instance which connects as `$PGUSER`, falling back to `$USER`.
    pub fn from_env() -> Self {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "gpadmin".into());
        Self::new(user)
    }
}

#[async_trait]
impl DbConnector for PgConnector {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn connect(&self, host: &str, port: u16, dbname: &str) -> Result<Box<dyn DbConn>, AppError> {
        let conn_str = format!("host={} port={} dbname={} user={}", host, port, dbname, self.user);
        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
            .await
            .map_err(|err| AppError::connection(format!("database {} at {}:{}", dbname, host, port), err))?;
        let handle = tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = ?err, "database connection error");
            }
        });
        Ok(Box::new(PgConn { client, handle }))
    }
}

/// A live PostgreSQL connection.
struct PgConn {
    client: Client,
    handle: JoinHandle<()>,
}

impl Drop for PgConn {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[async_trait]
impl DbConn for PgConn {
    async fn version_string(&self) -> Result<String> {
        let row = self.client.query_one(VERSION_QUERY, &[]).await.context("error querying database version")?;
        row.try_get(0).context("error reading database version")
    }

    async fn segment_configuration(&self) -> Result<SegmentConfigs> {
        let rows = self
            .client
            .query(SEGMENT_CONFIGURATION_QUERY, &[])
            .await
            .context("error querying segment configuration")?;
        let segments = rows
            .iter()
            .map(|row| -> Result<SegmentConfig> {
                Ok(SegmentConfig {
                    dbid: row.try_get(0)?,
                    content: row.try_get(1)?,
                    role: row.try_get(2)?,
                    preferred_role: row.try_get(3)?,
                    mode: row.try_get(4)?,
                    status: row.try_get(5)?,
                    port: row.try_get(6)?,
                    hostname: row.try_get(7)?,
                    address: row.try_get(8)?,
                    datadir: row.try_get(9)?,
                })
            })
            .collect::<Result<Vec<_>>>()
            .context("error decoding segment configuration row")?;
        Ok(SegmentConfigs(segments))
    }

    async fn database_names(&self) -> Result<Vec<String>> {
        let rows = self.client.query(DATABASE_NAMES_QUERY, &[]).await.context("error listing databases")?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).context("error decoding database name"))
            .collect()
    }

    async fn table_counts(&self) -> Result<TableCounts> {
        let ao_query = format!(
            "SELECT COUNT(*)::int4 FROM pg_class c JOIN pg_namespace n ON c.relnamespace = n.oid WHERE {} AND c.relstorage IN ('a', 'c')",
            USER_TABLES_FILTER
        );
        let heap_query = format!(
            "SELECT COUNT(*)::int4 FROM pg_class c JOIN pg_namespace n ON c.relnamespace = n.oid WHERE {} AND c.relstorage = 'h'",
            USER_TABLES_FILTER
        );
        let ao = self.client.query_one(ao_query.as_str(), &[]).await.context("error counting append-optimized tables")?;
        let heap = self.client.query_one(heap_query.as_str(), &[]).await.context("error counting heap tables")?;
        Ok(TableCounts {
            ao: ao.try_get(0).context("error decoding append-optimized table count")?,
            heap: heap.try_get(0).context("error decoding heap table count")?,
        })
    }
}
