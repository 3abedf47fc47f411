//! A Postgres backed implementation of the Catalog

use crate::{
    interface::{
        next_version, validate_filter, validate_update, Catalog, CollectionMetadataRepo,
        CollectionRepo, DatabaseRepo, Error, InternalSnafu, RepoCollection, Result,
        SetupSnafu, StorageUnavailableSnafu,
    },
    projector::{assemble, JoinedRow, MetadataColumns},
    storage_error::{log_position_cas_failure, ViolationCodes},
};
use async_trait::async_trait;
use coordinator_types::{
    Collection, CollectionAndMetadata, CollectionFilter, CollectionId, CollectionMetadata,
    CollectionParams, CollectionUpdate, CollectionVersion, Database, DatabaseId, LogPosition,
    TenantId,
};
use snafu::prelude::*;
use sqlx::{
    migrate::Migrator,
    postgres::{PgConnectOptions, PgPoolOptions, PgRow},
    ConnectOptions, Executor, Pool, Postgres, QueryBuilder, Row,
};
use std::{fmt::Display, str::FromStr, time::Duration};
use tracing::{debug, info};

static MIGRATOR: Migrator = sqlx::migrate!();

const CODES: ViolationCodes = ViolationCodes::POSTGRES;

/// Postgres connection options.
#[derive(Debug, Clone)]
pub struct PostgresConnectionOptions {
    /// Application name.
    ///
    /// This will be reported to postgres.
    pub app_name: String,

    /// Schema name.
    pub schema_name: String,

    /// DSN, either a postgres URI or `dsn-file://<path>` naming a file that
    /// holds one.
    pub dsn: String,

    /// Maximum number of concurrent connections.
    pub max_conns: u32,

    /// Set the amount of time to attempt connecting to the database.
    pub connect_timeout: Duration,

    /// Set a maximum idle duration for individual connections.
    pub idle_timeout: Duration,
}

impl PostgresConnectionOptions {
    /// Default value for [`schema_name`](Self::schema_name).
    pub const DEFAULT_SCHEMA_NAME: &'static str = "coordinator_catalog";

    /// Default value for [`max_conns`](Self::max_conns).
    pub const DEFAULT_MAX_CONNS: u32 = 10;

    /// Default value for [`connect_timeout`](Self::connect_timeout).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Default value for [`idle_timeout`](Self::idle_timeout).
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
}

impl Default for PostgresConnectionOptions {
    fn default() -> Self {
        Self {
            app_name: String::from("coordinator"),
            schema_name: String::from(Self::DEFAULT_SCHEMA_NAME),
            dsn: String::new(),
            max_conns: Self::DEFAULT_MAX_CONNS,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// PostgreSQL catalog.
#[derive(Debug)]
pub struct PostgresCatalog {
    pool: Pool<Postgres>,
    // Connection options for display
    options: PostgresConnectionOptions,
}

/// Repositories of a [`PostgresCatalog`].
#[derive(Debug)]
pub struct PostgresRepos {
    pool: Pool<Postgres>,
}

impl PostgresCatalog {
    /// Connect to the catalog store.
    pub async fn connect(options: PostgresConnectionOptions) -> Result<Self> {
        let pool = new_pool(&options)
            .await
            .context(StorageUnavailableSnafu)?;

        Ok(Self { pool, options })
    }

    fn schema_name(&self) -> &str {
        &self.options.schema_name
    }
}

impl Display for PostgresCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            // Do not include dsn in log as it may have credentials
            // that should not end up in the log
            "Postgres(dsn=OMITTED, schema_name='{}')",
            self.schema_name()
        )
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn setup(&self) -> Result<(), Error> {
        // The schema has to exist before the migrations run, otherwise sqlx
        // records the first run in `public._sqlx_migrations` and every later
        // run in the schema, re-applying all migrations.
        let create_schema_query = format!("CREATE SCHEMA IF NOT EXISTS {};", self.schema_name());
        self.pool
            .execute(sqlx::query(&create_schema_query))
            .await
            .context(SetupSnafu)?;

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| Error::Setup { source: e.into() })?;

        Ok(())
    }

    async fn repositories(&self) -> Box<dyn RepoCollection> {
        Box::new(PostgresRepos {
            pool: self.pool.clone(),
        })
    }
}

/// Creates a new [`sqlx::Pool`] from the connection options, resolving a
/// `dsn-file://` DSN first.
async fn new_pool(options: &PostgresConnectionOptions) -> Result<Pool<Postgres>, sqlx::Error> {
    let parsed_dsn = parse_dsn(&options.dsn)?;

    // sqlx exposes some options as pool options, while other options are available as connection options.
    let connect_options = PgConnectOptions::from_str(&parsed_dsn)?
        // statements would otherwise be logged at INFO
        .log_statements(log::LevelFilter::Trace);

    let app_name = options.app_name.clone();
    let schema_name = options.schema_name.clone();
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(options.max_conns)
        .acquire_timeout(options.connect_timeout)
        .idle_timeout(options.idle_timeout)
        .test_before_acquire(true)
        .after_connect(move |c, _meta| {
            let app_name = app_name.clone();
            let schema_name = schema_name.clone();
            Box::pin(async move {
                // An application name given in the DSN wins over ours.
                let current_application_name: String =
                    sqlx::query_scalar("SELECT current_setting('application_name');")
                        .fetch_one(&mut *c)
                        .await?;
                if current_application_name.is_empty() {
                    sqlx::query("SELECT set_config('application_name', $1, false);")
                        .bind(&*app_name)
                        .execute(&mut *c)
                        .await?;
                }
                let search_path_query = format!("SET search_path TO {schema_name},public;");
                c.execute(sqlx::query(&search_path_query)).await?;

                // Ensure explicit timezone selection, instead of deferring to
                // the server value.
                c.execute("SET timezone = 'UTC';").await?;
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await?;

    info!(
        application_name=%options.app_name,
        schema_name=%options.schema_name,
        "connected to catalog store"
    );

    Ok(pool)
}

/// Parse a postgres catalog dsn, handling the special `dsn-file://`
/// syntax.
///
/// Returns an error if the dsn-file could not be read correctly.
pub fn parse_dsn(dsn: &str) -> Result<String, sqlx::Error> {
    let dsn = match get_dsn_file_path(dsn) {
        Some(filename) => std::fs::read_to_string(filename)?.trim().to_string(),
        None => dsn.to_string(),
    };
    Ok(dsn)
}

// If the dsn matches the `dsn-file://` prefix, the prefix is removed and the rest is interpreted
// as a file name. No URI decoding is performed on the filename.
fn get_dsn_file_path(dsn: &str) -> Option<String> {
    const DSN_SCHEME: &str = "dsn-file://";
    dsn.strip_prefix(DSN_SCHEME).map(str::to_owned)
}

impl RepoCollection for PostgresRepos {
    fn databases(&mut self) -> &mut dyn DatabaseRepo {
        self
    }

    fn collections(&mut self) -> &mut dyn CollectionRepo {
        self
    }

    fn collection_metadata(&mut self) -> &mut dyn CollectionMetadataRepo {
        self
    }
}

#[async_trait]
impl DatabaseRepo for PostgresRepos {
    async fn insert(&mut self, database: Database) -> Result<Database> {
        sqlx::query_as::<_, Database>(
            r#"
INSERT INTO databases ( id, name, tenant_id )
VALUES ( $1, $2, $3 )
RETURNING id, name, tenant_id;
            "#,
        )
        .bind(&database.id) // $1
        .bind(&database.name) // $2
        .bind(&database.tenant_id) // $3
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            CODES.classify(e, || {
                format!(
                    "database {} (name {} of tenant {})",
                    database.id, database.name, database.tenant_id
                )
            })
        })
    }

    async fn get_databases(&mut self, tenant_id: &TenantId, name: &str) -> Result<Vec<Database>> {
        sqlx::query_as::<_, Database>(
            r#"
SELECT id, name, tenant_id
FROM databases
WHERE tenant_id = $1 AND name = $2;
            "#,
        )
        .bind(tenant_id) // $1
        .bind(name) // $2
        .fetch_all(&self.pool)
        .await
        .context(StorageUnavailableSnafu)
    }

    async fn get_databases_by_tenant_id(&mut self, tenant_id: &TenantId) -> Result<Vec<Database>> {
        sqlx::query_as::<_, Database>(
            r#"
SELECT id, name, tenant_id
FROM databases
WHERE tenant_id = $1
ORDER BY id;
            "#,
        )
        .bind(tenant_id) // $1
        .fetch_all(&self.pool)
        .await
        .context(StorageUnavailableSnafu)
    }

    async fn get_all_databases(&mut self) -> Result<Vec<Database>> {
        sqlx::query_as::<_, Database>("SELECT id, name, tenant_id FROM databases ORDER BY id;")
            .fetch_all(&self.pool)
            .await
            .context(StorageUnavailableSnafu)
    }

    async fn get_by_id(&mut self, id: &DatabaseId) -> Result<Database> {
        let rec = sqlx::query_as::<_, Database>(
            r#"
SELECT id, name, tenant_id
FROM databases
WHERE id = $1;
            "#,
        )
        .bind(id) // $1
        .fetch_one(&self.pool)
        .await;

        match rec {
            Ok(database) => Ok(database),
            Err(sqlx::Error::RowNotFound) => Err(Error::NotFound {
                descr: format!("database {id}"),
            }),
            Err(e) => Err(Error::StorageUnavailable { source: e }),
        }
    }

    async fn delete_by_tenant_id_and_name(
        &mut self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM databases WHERE tenant_id = $1 AND name = $2;")
            .bind(tenant_id) // $1
            .bind(name) // $2
            .execute(&self.pool)
            .await
            .context(StorageUnavailableSnafu)?
            .rows_affected();

        debug!(%tenant_id, database_name = name, deleted, "deleted database");
        Ok(deleted)
    }

    async fn delete_all(&mut self) -> Result<()> {
        sqlx::query("DELETE FROM databases;")
            .execute(&self.pool)
            .await
            .context(StorageUnavailableSnafu)?;
        Ok(())
    }
}

fn scan_joined_row(row: &PgRow) -> Result<JoinedRow, sqlx::Error> {
    Ok(JoinedRow {
        collection: Collection {
            id: row.try_get("id")?,
            database_id: row.try_get("database_id")?,
            name: row.try_get("name")?,
            topic: row.try_get("topic")?,
            dimension: row.try_get("dimension")?,
            version: row.try_get("version")?,
            log_position: row.try_get("log_position")?,
            ts: row.try_get("ts")?,
        },
        metadata: MetadataColumns {
            key: row.try_get("key")?,
            str_value: row.try_get("str_value")?,
            int_value: row.try_get("int_value")?,
            float_value: row.try_get("float_value")?,
        },
    })
}

#[async_trait]
impl CollectionRepo for PostgresRepos {
    async fn insert(&mut self, params: CollectionParams) -> Result<Collection> {
        sqlx::query_as::<_, Collection>(
            r#"
INSERT INTO collections ( id, database_id, name, topic, dimension, ts )
VALUES ( $1, $2, $3, $4, $5, $6 )
RETURNING id, database_id, name, topic, dimension, version, log_position, ts;
            "#,
        )
        .bind(&params.id) // $1
        .bind(&params.database_id) // $2
        .bind(&params.name) // $3
        .bind(&params.topic) // $4
        .bind(params.dimension) // $5
        .bind(params.ts) // $6
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            CODES.classify(e, || {
                format!("collection {} (name {:?})", params.id, params.name)
            })
        })
    }

    async fn update(&mut self, update: CollectionUpdate) -> Result<u64> {
        validate_update(&update)?;

        let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new("UPDATE collections SET ");
        {
            let mut set = query.separated(", ");
            if let Some(name) = &update.name {
                set.push("name = ");
                set.push_bind_unseparated(name);
            }
            if let Some(topic) = &update.topic {
                set.push("topic = ");
                set.push_bind_unseparated(topic);
            }
            if let Some(dimension) = update.dimension {
                set.push("dimension = ");
                set.push_bind_unseparated(dimension);
            }
        }
        query.push(" WHERE id = ");
        query.push_bind(&update.id);

        let updated = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| {
                CODES.classify(e, || {
                    format!("collection name {:?} of collection {}", update.name, update.id)
                })
            })?
            .rows_affected();

        Ok(updated)
    }

    async fn update_log_position_and_version(
        &mut self,
        id: &CollectionId,
        log_position: LogPosition,
        expected_version: CollectionVersion,
    ) -> Result<CollectionVersion> {
        let new_version = next_version(id, expected_version)?;

        let res = sqlx::query_scalar::<_, CollectionVersion>(
            r#"
UPDATE collections
SET version = $1, log_position = $2
WHERE id = $3 AND version = $4 AND log_position <= $2
RETURNING version;
            "#,
        )
        .bind(new_version) // $1
        .bind(log_position) // $2
        .bind(id) // $3
        .bind(expected_version) // $4
        .fetch_one(&self.pool)
        .await;

        let version = match res {
            Ok(v) => v,
            Err(sqlx::Error::RowNotFound) => {
                // Either the collection does not exist, its version moved on
                // or the log position would go backwards. Look at the current
                // row to tell which.
                //
                // NOTE: this is racy, the row may have changed again since the
                // update was rejected.
                let current = sqlx::query_as::<_, (CollectionVersion, LogPosition)>(
                    "SELECT version, log_position FROM collections WHERE id = $1;",
                )
                .bind(id) // $1
                .fetch_optional(&self.pool)
                .await
                .context(StorageUnavailableSnafu)?;

                return Err(log_position_cas_failure(
                    id,
                    expected_version,
                    log_position,
                    current,
                ));
            }
            Err(e) => return Err(Error::StorageUnavailable { source: e }),
        };

        debug!(collection_id=%id, %log_position, %version, "advanced log position");
        Ok(version)
    }

    async fn delete_by_id(&mut self, id: &CollectionId) -> Result<u64> {
        let deleted = sqlx::query_scalar::<_, CollectionId>(
            "DELETE FROM collections WHERE id = $1 RETURNING id;",
        )
        .bind(id) // $1
        .fetch_all(&self.pool)
        .await
        .context(StorageUnavailableSnafu)?;

        debug!(collection_id=%id, deleted=deleted.len(), "deleted collection");
        Ok(deleted.len() as u64)
    }

    async fn delete_all(&mut self) -> Result<()> {
        sqlx::query("DELETE FROM collections;")
            .execute(&self.pool)
            .await
            .context(StorageUnavailableSnafu)?;
        Ok(())
    }

    async fn get_collections(
        &mut self,
        filter: &CollectionFilter,
    ) -> Result<Vec<CollectionAndMetadata>> {
        validate_filter(filter)?;

        let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            r#"
SELECT c.id, c.database_id, c.name, c.topic, c.dimension, c.version, c.log_position, c.ts,
       cm.key, cm.str_value, cm.int_value, cm.float_value
FROM collections c
INNER JOIN databases d ON c.database_id = d.id
LEFT JOIN collection_metadata cm ON cm.collection_id = c.id
WHERE d.tenant_id = "#,
        );
        query.push_bind(&filter.tenant_id);
        query.push(" AND d.name = ");
        query.push_bind(&filter.database_name);
        if let Some(id) = &filter.id {
            query.push(" AND c.id = ");
            query.push_bind(id);
        }
        if let Some(name) = &filter.name {
            query.push(" AND c.name = ");
            query.push_bind(name);
        }
        query.push(" ORDER BY c.id, cm.key;");

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .context(StorageUnavailableSnafu)?;
        let rows = rows
            .iter()
            .map(scan_joined_row)
            .collect::<Result<Vec<_>, _>>()
            .context(StorageUnavailableSnafu)?;

        assemble(rows).context(InternalSnafu)
    }
}

#[async_trait]
impl CollectionMetadataRepo for PostgresRepos {
    async fn insert(&mut self, entry: CollectionMetadata) -> Result<()> {
        let (str_value, int_value, float_value) = entry
            .value
            .as_ref()
            .map(|v| v.as_columns())
            .unwrap_or_default();

        sqlx::query(
            r#"
INSERT INTO collection_metadata ( collection_id, key, str_value, int_value, float_value )
VALUES ( $1, $2, $3, $4, $5 );
            "#,
        )
        .bind(&entry.collection_id) // $1
        .bind(&entry.key) // $2
        .bind(str_value) // $3
        .bind(int_value) // $4
        .bind(float_value) // $5
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if CODES.is_fk_violation(&e) {
                Error::NotFound {
                    descr: format!("collection {}", entry.collection_id),
                }
            } else {
                CODES.classify(e, || {
                    format!(
                        "metadata key {} of collection {}",
                        entry.key, entry.collection_id
                    )
                })
            }
        })?;

        Ok(())
    }

    async fn delete_by_collection_id(&mut self, collection_id: &CollectionId) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM collection_metadata WHERE collection_id = $1;")
            .bind(collection_id) // $1
            .execute(&self.pool)
            .await
            .context(StorageUnavailableSnafu)?
            .rows_affected();
        Ok(deleted)
    }

    async fn delete_all(&mut self) -> Result<()> {
        sqlx::query("DELETE FROM collection_metadata;")
            .execute(&self.pool)
            .await
            .context(StorageUnavailableSnafu)?;
        Ok(())
    }
}
