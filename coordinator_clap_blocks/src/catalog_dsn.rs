//! Catalog-DSN-related configs.
use coordinator_catalog::{
    interface::Catalog,
    mem::MemCatalog,
    postgres::{PostgresCatalog, PostgresConnectionOptions},
    sqlite::{SqliteCatalog, SqliteConnectionOptions},
};
use snafu::{ResultExt, Snafu};
use std::{sync::Arc, time::Duration};
use tracing::info;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display(
        "Unknown Catalog DSN {dsn}. Expected a string like 'postgresql://postgres@localhost:5432/postgres' or 'sqlite:///tmp/catalog.sqlite'"
    ))]
    UnknownCatalogDsn { dsn: String },

    #[snafu(display(
        "Catalog DSN not specified. Expected a string like 'postgresql://postgres@localhost:5432/postgres' or 'sqlite:///tmp/catalog.sqlite'"
    ))]
    DsnNotSpecified {},

    #[snafu(display("A catalog error occurred: {}", source))]
    Catalog {
        source: coordinator_catalog::interface::Error,
    },
}

fn default_max_connections() -> &'static str {
    let s = PostgresConnectionOptions::DEFAULT_MAX_CONNS.to_string();
    Box::leak(Box::new(s))
}

fn default_connect_timeout() -> &'static str {
    let s =
        humantime::format_duration(PostgresConnectionOptions::DEFAULT_CONNECT_TIMEOUT).to_string();
    Box::leak(Box::new(s))
}

fn default_idle_timeout() -> &'static str {
    let s = humantime::format_duration(PostgresConnectionOptions::DEFAULT_IDLE_TIMEOUT).to_string();
    Box::leak(Box::new(s))
}

/// CLI config for catalog DSN.
#[derive(Debug, Clone, Default, clap::Parser)]
pub struct CatalogDsnConfig {
    /// Catalog connection string.
    ///
    /// The dsn determines the type of catalog used.
    ///
    /// PostgreSQL: `postgresql://postgres@localhost:5432/postgres`, or
    /// `dsn-file:///path/to/file` to read the connection string from a file
    ///
    /// Sqlite (a local filename /tmp/foo.sqlite): `sqlite:///tmp/foo.sqlite`
    ///
    /// Memory (ephemeral, only useful for testing): `memory`
    ///
    #[clap(long = "catalog-dsn", env = "COORDINATOR_CATALOG_DSN", action)]
    pub dsn: Option<String>,

    /// Maximum number of connections allowed to the catalog at any one time.
    #[clap(
        long = "catalog-max-connections",
        env = "COORDINATOR_CATALOG_MAX_CONNECTIONS",
        default_value = default_max_connections(),
        action,
    )]
    pub max_catalog_connections: u32,

    /// Schema name for PostgreSQL-based catalogs.
    #[clap(
        long = "catalog-postgres-schema-name",
        env = "COORDINATOR_CATALOG_POSTGRES_SCHEMA_NAME",
        default_value = PostgresConnectionOptions::DEFAULT_SCHEMA_NAME,
        action,
    )]
    pub postgres_schema_name: String,

    /// Set the amount of time to attempt connecting to the database.
    #[clap(
        long = "catalog-connect-timeout",
        env = "COORDINATOR_CATALOG_CONNECT_TIMEOUT",
        default_value = default_connect_timeout(),
        value_parser = humantime::parse_duration,
    )]
    pub connect_timeout: Duration,

    /// Set a maximum idle duration for individual connections.
    #[clap(
        long = "catalog-idle-timeout",
        env = "COORDINATOR_CATALOG_IDLE_TIMEOUT",
        default_value = default_idle_timeout(),
        value_parser = humantime::parse_duration,
    )]
    pub idle_timeout: Duration,
}

impl CatalogDsnConfig {
    /// Get config-dependent catalog.
    ///
    /// The catalog is connected but not set up, callers run
    /// [`Catalog::setup`] before first use.
    pub async fn get_catalog(&self, app_name: &'static str) -> Result<Arc<dyn Catalog>, Error> {
        let Some(dsn) = self.dsn.as_ref() else {
            return Err(Error::DsnNotSpecified {});
        };

        if dsn.starts_with("postgres") || dsn.starts_with("dsn-file://") {
            // do not log entire postgres dsn as it may contain credentials
            info!(postgres_schema_name=%self.postgres_schema_name, "Catalog: Postgres");
            let options = PostgresConnectionOptions {
                app_name: app_name.to_string(),
                schema_name: self.postgres_schema_name.clone(),
                dsn: dsn.clone(),
                max_conns: self.max_catalog_connections,
                connect_timeout: self.connect_timeout,
                idle_timeout: self.idle_timeout,
            };
            Ok(Arc::new(
                PostgresCatalog::connect(options)
                    .await
                    .context(CatalogSnafu)?,
            ))
        } else if dsn == "memory" {
            info!("Catalog: In-memory");
            Ok(Arc::new(MemCatalog::new()))
        } else if let Some(file_path) = dsn.strip_prefix("sqlite://") {
            info!(file_path, "Catalog: Sqlite");
            let options = SqliteConnectionOptions {
                file_path: file_path.to_string(),
            };
            Ok(Arc::new(
                SqliteCatalog::connect(options)
                    .await
                    .context(CatalogSnafu)?,
            ))
        } else {
            Err(Error::UnknownCatalogDsn {
                dsn: dsn.to_string(),
            })
        }
    }
}
