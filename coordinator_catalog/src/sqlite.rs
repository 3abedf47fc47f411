//! A SQLite backed implementation of the Catalog

use crate::{
    interface::{
        next_version, validate_filter, validate_update, Catalog, CollectionMetadataRepo,
        CollectionRepo, DatabaseRepo, Error, InternalSnafu, RepoCollection, Result,
        StorageUnavailableSnafu,
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
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    ConnectOptions, Pool, QueryBuilder, Row, Sqlite,
};
use std::{fmt::Display, str::FromStr};
use tracing::{debug, info};

static MIGRATOR: Migrator = sqlx::migrate!("sqlite/migrations");

const CODES: ViolationCodes = ViolationCodes::SQLITE;

/// SQLite connection options.
#[derive(Debug, Clone)]
pub struct SqliteConnectionOptions {
    /// local file path to .sqlite file, or `sqlite::memory:`
    pub file_path: String,
}

/// SQLite catalog.
#[derive(Debug)]
pub struct SqliteCatalog {
    pool: Pool<Sqlite>,
    options: SqliteConnectionOptions,
}

/// Repositories of a [`SqliteCatalog`].
#[derive(Debug)]
pub struct SqliteRepos {
    pool: Pool<Sqlite>,
}

impl SqliteCatalog {
    /// Connect to the catalog store.
    ///
    /// The pool holds a single connection that is never recycled. An
    /// in-memory database lives exactly as long as that connection, and
    /// SQLite serializes writers anyway.
    pub async fn connect(options: SqliteConnectionOptions) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&options.file_path)
            .context(StorageUnavailableSnafu)?
            .create_if_missing(true)
            .foreign_keys(true)
            .log_statements(log::LevelFilter::Trace);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .context(StorageUnavailableSnafu)?;

        info!(file_path=%options.file_path, "connected to sqlite catalog");

        Ok(Self { pool, options })
    }
}

impl Display for SqliteCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sqlite(dsn='{}')", self.options.file_path)
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn setup(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| Error::Setup { source: e.into() })?;

        Ok(())
    }

    async fn repositories(&self) -> Box<dyn RepoCollection> {
        Box::new(SqliteRepos {
            pool: self.pool.clone(),
        })
    }
}

impl RepoCollection for SqliteRepos {
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
impl DatabaseRepo for SqliteRepos {
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

fn scan_joined_row(row: &SqliteRow) -> Result<JoinedRow, sqlx::Error> {
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
impl CollectionRepo for SqliteRepos {
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

        let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new("UPDATE collections SET ");
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

        let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
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
impl CollectionMetadataRepo for SqliteRepos {
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
