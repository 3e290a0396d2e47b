//! Connection handling. One [`Database`] is shared by every store; it owns
//! an [`AnyPool`] so each worker task checks out its own connection rather
//! than sharing driver state across threads.

use crate::dialect::Dialect;
use crate::fs::errors::{FsError, FsResult};
use anyhow::{bail, Context};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{Any, AnyPool, Transaction};
use std::sync::Arc;

/// A parsed `dbi:<driver>:<rest>` data-source string. The driver token
/// selects the dialect; the remainder is handed to the database client.
#[derive(Debug, Clone)]
pub struct DataSource {
    pub dialect: Dialect,
    pub url: String,
    single_connection: bool,
}

impl DataSource {
    pub fn parse(dsn: &str) -> anyhow::Result<Self> {
        let rest = dsn
            .strip_prefix("dbi:")
            .with_context(|| format!("data source must start with 'dbi:': {dsn}"))?;
        let (driver, spec) = rest
            .split_once(':')
            .with_context(|| format!("data source missing driver separator: {dsn}"))?;
        let Some(dialect) = Dialect::from_driver(driver) else {
            bail!("unrecognized driver '{driver}' (expected SQLite, mysql or Pg)");
        };

        let (url, single_connection) = match dialect {
            Dialect::Sqlite => {
                if spec == ":memory:" {
                    // All connections must see the same in-memory database;
                    // shared cache plus a one-connection pool guarantees it.
                    ("sqlite::memory:?cache=shared".to_string(), true)
                } else {
                    (format!("sqlite:{spec}?mode=rwc"), false)
                }
            }
            Dialect::Mysql => (Self::with_scheme("mysql", spec), false),
            Dialect::Postgres => (Self::with_scheme("postgres", spec), false),
        };

        Ok(Self {
            dialect,
            url,
            single_connection,
        })
    }

    /// In-memory SQLite source, used by the test suites.
    pub fn in_memory() -> Self {
        Self::parse("dbi:SQLite::memory:").expect("static dsn parses")
    }

    fn with_scheme(scheme: &str, spec: &str) -> String {
        if spec.contains("://") {
            spec.to_string()
        } else {
            format!("{scheme}://{spec}")
        }
    }
}

/// Pooled connection handle plus the dialect everything speaks.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
    dialect: Dialect,
}

pub type DbHandle = Arc<Database>;

impl Database {
    pub async fn connect(source: &DataSource) -> anyhow::Result<Self> {
        install_default_drivers();

        let dialect = source.dialect;
        let max_connections = if source.single_connection { 1 } else { 16 };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    for stmt in dialect.on_connect() {
                        sqlx::query(stmt).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect(&source.url)
            .await
            .with_context(|| format!("failed to connect to {}", source.url))?;

        Ok(Self { pool, dialect })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Begin an explicit transaction. Dropping the returned value without
    /// committing rolls it back.
    pub async fn begin(&self) -> FsResult<Transaction<'static, Any>> {
        self.pool.begin().await.map_err(FsError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_file() {
        let src = DataSource::parse("dbi:SQLite:/tmp/fs.db").unwrap();
        assert_eq!(src.dialect, Dialect::Sqlite);
        assert_eq!(src.url, "sqlite:/tmp/fs.db?mode=rwc");
        assert!(!src.single_connection);
    }

    #[test]
    fn parses_memory_sqlite() {
        let src = DataSource::parse("dbi:SQLite::memory:").unwrap();
        assert!(src.single_connection);
        assert!(src.url.contains("cache=shared"));
    }

    #[test]
    fn parses_mysql_and_pg() {
        let src = DataSource::parse("dbi:mysql:user:pw@db.example.com/fs").unwrap();
        assert_eq!(src.dialect, Dialect::Mysql);
        assert_eq!(src.url, "mysql://user:pw@db.example.com/fs");

        let src = DataSource::parse("dbi:Pg:postgres://user@localhost/fs").unwrap();
        assert_eq!(src.dialect, Dialect::Postgres);
        assert_eq!(src.url, "postgres://user@localhost/fs");
    }

    #[test]
    fn rejects_unknown_driver() {
        assert!(DataSource::parse("dbi:oracle:whatever").is_err());
        assert!(DataSource::parse("mysql://direct").is_err());
    }
}
