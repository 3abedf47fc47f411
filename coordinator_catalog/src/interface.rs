//! Traits and data objects for the catalog API.

use crate::projector::ProjectionError;
use async_trait::async_trait;
use coordinator_types::{
    Collection, CollectionAndMetadata, CollectionFilter, CollectionId, CollectionMetadata,
    CollectionParams, CollectionUpdate, CollectionVersion, Database, DatabaseId, LogPosition,
    TenantId,
};
use snafu::{ensure, OptionExt, Snafu};
use std::fmt::{Debug, Display};

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{descr} not found"))]
    NotFound { descr: String },

    #[snafu(display("{descr} already exists"))]
    UniqueConstraintViolation { descr: String },

    #[snafu(display(
        "collection {collection_id} is at version {actual}, caller expected version {expected}"
    ))]
    VersionConflict {
        collection_id: CollectionId,
        expected: CollectionVersion,
        actual: CollectionVersion,
    },

    #[snafu(display("catalog storage unavailable: {source}"))]
    StorageUnavailable { source: sqlx::Error },

    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument { reason: String },

    #[snafu(display("failed to set up catalog schema: {source}"))]
    Setup { source: sqlx::Error },

    #[snafu(display("internal catalog inconsistency: {source}"))]
    Internal { source: ProjectionError },
}

impl Error {
    /// True for violations of the catalog's own consistency, as opposed to
    /// expected conditions such as conflicts or missing rows.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// A specialized `Error` for Catalog errors
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Trait that contains methods for working with the catalog
#[async_trait]
pub trait Catalog: Send + Sync + Debug + Display {
    /// Setup catalog for usage and apply possible migrations.
    async fn setup(&self) -> Result<(), Error>;

    /// Accesses the repositories.
    ///
    /// Every repository operation is a single atomic call against the
    /// underlying store, there is no transaction spanning several calls.
    async fn repositories(&self) -> Box<dyn RepoCollection>;
}

/// Collection of repositories for all catalog data types.
pub trait RepoCollection: Send + Sync + Debug {
    /// Repository for [databases](Database).
    fn databases(&mut self) -> &mut dyn DatabaseRepo;

    /// Repository for [collections](Collection).
    fn collections(&mut self) -> &mut dyn CollectionRepo;

    /// Repository for [collection metadata](CollectionMetadata).
    fn collection_metadata(&mut self) -> &mut dyn CollectionMetadataRepo;
}

/// Functions for working with databases in the catalog
#[async_trait]
pub trait DatabaseRepo: Send + Sync {
    /// Inserts the database. If one with the same id, or the same name
    /// within the tenant, already exists, a
    /// [`Error::UniqueConstraintViolation`] is returned.
    async fn insert(&mut self, database: Database) -> Result<Database>;

    /// Gets the database `name` of `tenant_id`. The result holds at most one
    /// record and is empty if there is no such database.
    async fn get_databases(&mut self, tenant_id: &TenantId, name: &str) -> Result<Vec<Database>>;

    /// Lists all databases of the tenant, ordered by id.
    async fn get_databases_by_tenant_id(&mut self, tenant_id: &TenantId) -> Result<Vec<Database>>;

    /// Lists every database in the catalog, ordered by id.
    async fn get_all_databases(&mut self) -> Result<Vec<Database>>;

    /// Gets the database by id, returning [`Error::NotFound`] if it does not
    /// exist.
    async fn get_by_id(&mut self, id: &DatabaseId) -> Result<Database>;

    /// Deletes the database `name` of `tenant_id` and returns the number of
    /// deleted rows. Deleting a database that doesn't exist is not an error.
    async fn delete_by_tenant_id_and_name(&mut self, tenant_id: &TenantId, name: &str)
    -> Result<u64>;

    /// Deletes every database.
    async fn delete_all(&mut self) -> Result<()>;
}

/// Functions for working with collections in the catalog
#[async_trait]
pub trait CollectionRepo: Send + Sync {
    /// Inserts a collection at [`CollectionVersion::INITIAL`] and
    /// [`LogPosition::INITIAL`].
    async fn insert(&mut self, params: CollectionParams) -> Result<Collection>;

    /// Applies the sparse patch `update` and returns the number of updated
    /// rows, which is zero if the collection doesn't exist.
    async fn update(&mut self, update: CollectionUpdate) -> Result<u64>;

    /// Advance the log position of the collection `id` to `log_position` if
    /// and only if its stored version still equals `expected_version`.
    ///
    /// On success the collection is at `expected_version + 1`, which is
    /// returned. Otherwise nothing is written and the caller gets
    /// [`Error::VersionConflict`] carrying the stored version, or
    /// [`Error::NotFound`] if there is no such collection, or
    /// [`Error::InvalidArgument`] if `log_position` is behind the stored log
    /// position. The stored state used to explain a failure is read after the
    /// failed write, so it may already be newer than at write time.
    ///
    /// This never retries; retry policy is left to the caller.
    async fn update_log_position_and_version(
        &mut self,
        id: &CollectionId,
        log_position: LogPosition,
        expected_version: CollectionVersion,
    ) -> Result<CollectionVersion>;

    /// Deletes the collection and its metadata and returns the number of
    /// deleted collections. Deleting a collection that doesn't exist is not an
    /// error.
    async fn delete_by_id(&mut self, id: &CollectionId) -> Result<u64>;

    /// Deletes every collection and all metadata.
    async fn delete_all(&mut self) -> Result<()>;

    /// Lists the collections of a tenant's database with their metadata,
    /// optionally restricted to one id and/or name.
    ///
    /// Collections are ordered by id, each collection appears once and its
    /// metadata entries are ordered by key.
    async fn get_collections(&mut self, filter: &CollectionFilter)
    -> Result<Vec<CollectionAndMetadata>>;
}

/// Functions for working with collection metadata in the catalog
#[async_trait]
pub trait CollectionMetadataRepo: Send + Sync {
    /// Inserts a metadata entry. Returns [`Error::UniqueConstraintViolation`]
    /// if the collection already has the key and [`Error::NotFound`] if the
    /// collection does not exist.
    async fn insert(&mut self, entry: CollectionMetadata) -> Result<()>;

    /// Deletes all metadata of a collection and returns the number of deleted
    /// entries.
    async fn delete_by_collection_id(&mut self, collection_id: &CollectionId) -> Result<u64>;

    /// Deletes all metadata of all collections.
    async fn delete_all(&mut self) -> Result<()>;
}

pub(crate) fn validate_update(update: &CollectionUpdate) -> Result<()> {
    ensure!(
        !update.is_empty(),
        InvalidArgumentSnafu {
            reason: format!("update of collection {} sets no fields", update.id),
        }
    );
    Ok(())
}

pub(crate) fn validate_filter(filter: &CollectionFilter) -> Result<()> {
    ensure!(
        !filter.tenant_id.get().is_empty() && !filter.database_name.is_empty(),
        InvalidArgumentSnafu {
            reason: "collection lookups need a tenant and a database name",
        }
    );
    ensure!(
        filter.id.as_ref().is_none_or(|id| !id.get().is_empty()),
        InvalidArgumentSnafu {
            reason: "collection id filter is empty",
        }
    );
    ensure!(
        filter.name.as_ref().is_none_or(|name| !name.is_empty()),
        InvalidArgumentSnafu {
            reason: "collection name filter is empty",
        }
    );
    Ok(())
}

/// The version a successful compare-and-swap from `expected` moves to.
pub(crate) fn next_version(
    id: &CollectionId,
    expected: CollectionVersion,
) -> Result<CollectionVersion> {
    expected.next().context(InvalidArgumentSnafu {
        reason: format!("version {expected} of collection {id} cannot be advanced"),
    })
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use assert_matches::assert_matches;
    use coordinator_types::MetadataValue;
    use pretty_assertions::assert_eq;
    use std::{future::Future, sync::Arc};

    pub(crate) async fn test_catalog<R, F>(clean_state: R)
    where
        R: Fn() -> F + Send + Sync,
        F: Future<Output = Arc<dyn Catalog>> + Send,
    {
        test_setup(clean_state().await).await;
        test_databases(clean_state().await).await;
        test_collection_insert(clean_state().await).await;
        test_collection_update(clean_state().await).await;
        test_log_position_cas(clean_state().await).await;
        test_concurrent_log_position_cas(clean_state().await).await;
        test_collection_delete(clean_state().await).await;
        test_get_collections(clean_state().await).await;
        test_collection_metadata(clean_state().await).await;
    }

    async fn arbitrary_database(repos: &mut dyn RepoCollection, tenant: &str, name: &str) -> Database {
        repos
            .databases()
            .insert(Database::new(format!("{tenant}-{name}"), name, tenant))
            .await
            .unwrap()
    }

    async fn arbitrary_collection(
        repos: &mut dyn RepoCollection,
        database: &Database,
        id: &str,
        name: &str,
    ) -> Collection {
        repos
            .collections()
            .insert(
                CollectionParams::new(id, database.id.clone())
                    .with_name(name)
                    .with_topic(format!("topic-{id}")),
            )
            .await
            .unwrap()
    }

    async fn get_one(
        repos: &mut dyn RepoCollection,
        database: &Database,
        id: &str,
    ) -> CollectionAndMetadata {
        let mut found = repos
            .collections()
            .get_collections(
                &CollectionFilter::new(database.tenant_id.clone(), database.name.clone())
                    .with_id(id),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1, "expected exactly one collection {id}");
        found.remove(0)
    }

    async fn test_setup(catalog: Arc<dyn Catalog>) {
        // already set up by the caller, running it again must be a no-op
        catalog.setup().await.unwrap();
        catalog.setup().await.unwrap();
    }

    async fn test_databases(catalog: Arc<dyn Catalog>) {
        let mut repos = catalog.repositories().await;
        let tenant1 = TenantId::new("tenant1");
        let tenant2 = TenantId::new("tenant2");

        let db = Database::new("db1", "default", "tenant1");
        let created = repos.databases().insert(db.clone()).await.unwrap();
        assert_eq!(created, db);
        assert_eq!(
            repos.databases().get_databases(&tenant1, "default").await.unwrap(),
            vec![db.clone()]
        );

        // same name within the tenant
        let err = repos
            .databases()
            .insert(Database::new("db2", "default", "tenant1"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::UniqueConstraintViolation { .. });
        assert_eq!(
            repos
                .databases()
                .get_databases_by_tenant_id(&tenant1)
                .await
                .unwrap(),
            vec![db.clone()]
        );

        // same id
        let err = repos
            .databases()
            .insert(Database::new("db1", "other", "tenant1"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::UniqueConstraintViolation { .. });

        // names are only unique within a tenant
        let other_tenant = repos
            .databases()
            .insert(Database::new("db3", "default", "tenant2"))
            .await
            .unwrap();
        let analytics = repos
            .databases()
            .insert(Database::new("db4", "analytics", "tenant1"))
            .await
            .unwrap();

        assert!(
            repos
                .databases()
                .get_databases(&tenant1, "missing")
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            repos
                .databases()
                .get_databases_by_tenant_id(&tenant1)
                .await
                .unwrap(),
            vec![db.clone(), analytics.clone()]
        );
        assert_eq!(
            repos
                .databases()
                .get_databases_by_tenant_id(&tenant2)
                .await
                .unwrap(),
            vec![other_tenant.clone()]
        );
        assert_eq!(
            repos.databases().get_all_databases().await.unwrap(),
            vec![db.clone(), other_tenant.clone(), analytics.clone()]
        );
        // listing is stable without intervening writes
        assert_eq!(
            repos.databases().get_all_databases().await.unwrap(),
            vec![db.clone(), other_tenant.clone(), analytics.clone()]
        );

        assert_eq!(
            repos.databases().get_by_id(&other_tenant.id).await.unwrap(),
            other_tenant
        );
        let err = repos
            .databases()
            .get_by_id(&DatabaseId::new("nope"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound { .. });

        assert_eq!(
            repos
                .databases()
                .delete_by_tenant_id_and_name(&tenant1, "default")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            repos
                .databases()
                .delete_by_tenant_id_and_name(&tenant1, "default")
                .await
                .unwrap(),
            0
        );
        // both fields have to match
        assert_eq!(
            repos
                .databases()
                .delete_by_tenant_id_and_name(&tenant2, "analytics")
                .await
                .unwrap(),
            0
        );
        assert!(
            repos
                .databases()
                .get_databases(&tenant1, "default")
                .await
                .unwrap()
                .is_empty()
        );

        repos.databases().delete_all().await.unwrap();
        assert!(repos.databases().get_all_databases().await.unwrap().is_empty());
    }

    async fn test_collection_insert(catalog: Arc<dyn Catalog>) {
        let mut repos = catalog.repositories().await;
        let db = arbitrary_database(&mut *repos, "tenant1", "default").await;
        let other_db = arbitrary_database(&mut *repos, "tenant1", "other").await;

        let collection = repos
            .collections()
            .insert(
                CollectionParams::new("c1", db.id.clone())
                    .with_name("docs")
                    .with_topic("t1")
                    .with_ts(42),
            )
            .await
            .unwrap();
        assert_eq!(
            collection,
            Collection {
                id: CollectionId::new("c1"),
                database_id: db.id.clone(),
                name: Some("docs".to_string()),
                topic: Some("t1".to_string()),
                dimension: None,
                version: CollectionVersion::INITIAL,
                log_position: LogPosition::INITIAL,
                ts: 42,
            }
        );

        let err = repos
            .collections()
            .insert(CollectionParams::new("c1", db.id.clone()).with_name("elsewhere"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::UniqueConstraintViolation { .. });

        let err = repos
            .collections()
            .insert(CollectionParams::new("c2", db.id.clone()).with_name("docs"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::UniqueConstraintViolation { .. });

        // the name is only unique within the database
        let twin = arbitrary_collection(&mut *repos, &other_db, "c3", "docs").await;
        assert_eq!(twin.name.as_deref(), Some("docs"));

        // unnamed collections don't collide
        for id in ["c4", "c5"] {
            let unnamed = repos
                .collections()
                .insert(CollectionParams::new(id, db.id.clone()).with_dimension(0))
                .await
                .unwrap();
            assert_eq!(unnamed.name, None);
            assert_eq!(unnamed.dimension, Some(0));
        }
    }

    async fn test_collection_update(catalog: Arc<dyn Catalog>) {
        let mut repos = catalog.repositories().await;
        let db = arbitrary_database(&mut *repos, "tenant1", "default").await;
        let created = arbitrary_collection(&mut *repos, &db, "c1", "docs").await;
        arbitrary_collection(&mut *repos, &db, "c2", "other").await;

        let updated = repos
            .collections()
            .update(CollectionUpdate::new("c1").with_dimension(0))
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let found = get_one(&mut *repos, &db, "c1").await.collection;
        assert_eq!(
            found,
            Collection {
                dimension: Some(0),
                ..created.clone()
            }
        );

        let updated = repos
            .collections()
            .update(CollectionUpdate::new("c1").with_name("renamed"))
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let found = get_one(&mut *repos, &db, "c1").await.collection;
        assert_eq!(
            found,
            Collection {
                name: Some("renamed".to_string()),
                dimension: Some(0),
                ..created.clone()
            }
        );

        let updated = repos
            .collections()
            .update(CollectionUpdate::new("missing").with_topic("t9"))
            .await
            .unwrap();
        assert_eq!(updated, 0);

        let err = repos
            .collections()
            .update(CollectionUpdate::new("c1"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidArgument { .. });

        let err = repos
            .collections()
            .update(CollectionUpdate::new("c2").with_name("renamed"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::UniqueConstraintViolation { .. });
        let found = get_one(&mut *repos, &db, "c2").await.collection;
        assert_eq!(found.name.as_deref(), Some("other"));
    }

    async fn test_log_position_cas(catalog: Arc<dyn Catalog>) {
        let mut repos = catalog.repositories().await;
        let db = arbitrary_database(&mut *repos, "tenant1", "default").await;
        let id = arbitrary_collection(&mut *repos, &db, "c1", "docs").await.id;

        let v1 = repos
            .collections()
            .update_log_position_and_version(&id, LogPosition::new(10), CollectionVersion::INITIAL)
            .await
            .unwrap();
        assert_eq!(v1, CollectionVersion::new(1));
        let found = get_one(&mut *repos, &db, "c1").await.collection;
        assert_eq!(found.version, v1);
        assert_eq!(found.log_position, LogPosition::new(10));

        // stale version
        let err = repos
            .collections()
            .update_log_position_and_version(&id, LogPosition::new(20), CollectionVersion::INITIAL)
            .await
            .unwrap_err();
        assert_matches!(err, Error::VersionConflict { expected, actual, .. } => {
            assert_eq!(expected, CollectionVersion::INITIAL);
            assert_eq!(actual, v1);
        });
        let found = get_one(&mut *repos, &db, "c1").await.collection;
        assert_eq!(found.version, v1);
        assert_eq!(found.log_position, LogPosition::new(10));

        let v2 = repos
            .collections()
            .update_log_position_and_version(&id, LogPosition::new(20), v1)
            .await
            .unwrap();
        assert_eq!(v2, CollectionVersion::new(2));

        // the log position may stay where it is
        let v3 = repos
            .collections()
            .update_log_position_and_version(&id, LogPosition::new(20), v2)
            .await
            .unwrap();
        assert_eq!(v3, CollectionVersion::new(3));

        // but it may not go backwards
        let err = repos
            .collections()
            .update_log_position_and_version(&id, LogPosition::new(5), v3)
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidArgument { .. });
        let found = get_one(&mut *repos, &db, "c1").await.collection;
        assert_eq!(found.version, v3);
        assert_eq!(found.log_position, LogPosition::new(20));

        let err = repos
            .collections()
            .update_log_position_and_version(
                &CollectionId::new("missing"),
                LogPosition::new(1),
                CollectionVersion::INITIAL,
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound { .. });

        // plain updates leave the versioned state alone
        repos
            .collections()
            .update(CollectionUpdate::new("c1").with_topic("t2"))
            .await
            .unwrap();
        let found = get_one(&mut *repos, &db, "c1").await.collection;
        assert_eq!(found.version, v3);
        assert_eq!(found.log_position, LogPosition::new(20));
    }

    async fn test_concurrent_log_position_cas(catalog: Arc<dyn Catalog>) {
        let db = {
            let mut repos = catalog.repositories().await;
            let db = arbitrary_database(&mut *repos, "tenant1", "default").await;
            arbitrary_collection(&mut *repos, &db, "c1", "docs").await;
            db
        };

        let tasks = [11_i64, 12].map(|log_position| {
            let catalog = Arc::clone(&catalog);
            tokio::spawn(async move {
                let mut repos = catalog.repositories().await;
                repos
                    .collections()
                    .update_log_position_and_version(
                        &CollectionId::new("c1"),
                        LogPosition::new(log_position),
                        CollectionVersion::INITIAL,
                    )
                    .await
                    .map(|version| (log_position, version))
            })
        });

        let (winners, losers): (Vec<_>, Vec<_>) = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.expect("cas task panicked"))
            .partition(|res| res.is_ok());
        assert_eq!(winners.len(), 1);
        assert_eq!(losers.len(), 1);

        let (winning_position, version) = winners.into_iter().next().unwrap().unwrap();
        assert_eq!(version, CollectionVersion::new(1));
        assert_matches!(
            losers.into_iter().next().unwrap().unwrap_err(),
            Error::VersionConflict { expected, actual, .. } => {
                assert_eq!(expected, CollectionVersion::INITIAL);
                assert_eq!(actual, CollectionVersion::new(1));
            }
        );

        let mut repos = catalog.repositories().await;
        let found = get_one(&mut *repos, &db, "c1").await.collection;
        assert_eq!(found.version, CollectionVersion::new(1));
        assert_eq!(found.log_position, LogPosition::new(winning_position));
    }

    async fn test_collection_delete(catalog: Arc<dyn Catalog>) {
        let mut repos = catalog.repositories().await;
        let db = arbitrary_database(&mut *repos, "tenant1", "default").await;
        let filter = CollectionFilter::new(db.tenant_id.clone(), db.name.clone());
        let c1 = arbitrary_collection(&mut *repos, &db, "c1", "docs").await;
        let c2 = arbitrary_collection(&mut *repos, &db, "c2", "notes").await;
        for entry in [
            CollectionMetadata::new("c1", "owner", "alice"),
            CollectionMetadata::new("c1", "priority", 3_i64),
            CollectionMetadata::new("c2", "owner", "bob"),
        ] {
            repos.collection_metadata().insert(entry).await.unwrap();
        }

        assert_eq!(repos.collections().delete_by_id(&c1.id).await.unwrap(), 1);
        assert_eq!(repos.collections().delete_by_id(&c1.id).await.unwrap(), 0);
        assert_eq!(
            repos
                .collections()
                .delete_by_id(&CollectionId::new("missing"))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            repos.collections().get_collections(&filter).await.unwrap(),
            vec![CollectionAndMetadata {
                collection: c2.clone(),
                metadata: vec![CollectionMetadata::new("c2", "owner", "bob")],
            }]
        );

        // the metadata went with the collection
        assert_eq!(
            repos
                .collection_metadata()
                .delete_by_collection_id(&c1.id)
                .await
                .unwrap(),
            0
        );
        arbitrary_collection(&mut *repos, &db, "c1", "docs").await;
        assert!(get_one(&mut *repos, &db, "c1").await.metadata.is_empty());

        repos.collections().delete_all().await.unwrap();
        assert!(
            repos
                .collections()
                .get_collections(&filter)
                .await
                .unwrap()
                .is_empty()
        );
        arbitrary_collection(&mut *repos, &db, "c2", "notes").await;
        assert!(get_one(&mut *repos, &db, "c2").await.metadata.is_empty());
    }

    async fn test_get_collections(catalog: Arc<dyn Catalog>) {
        let mut repos = catalog.repositories().await;
        let db = arbitrary_database(&mut *repos, "tenant1", "default").await;
        let other_db = arbitrary_database(&mut *repos, "tenant1", "other").await;
        arbitrary_database(&mut *repos, "tenant2", "default").await;
        let filter = CollectionFilter::new("tenant1", "default");

        let c1 = repos
            .collections()
            .insert(
                CollectionParams::new("c1", db.id.clone())
                    .with_name("docs")
                    .with_topic("t1"),
            )
            .await
            .unwrap();

        // no metadata rows means an empty list, not a phantom entry
        let found = repos
            .collections()
            .get_collections(&filter.clone().with_id("c1"))
            .await
            .unwrap();
        assert_eq!(
            found,
            vec![CollectionAndMetadata {
                collection: c1.clone(),
                metadata: vec![],
            }]
        );

        repos
            .collection_metadata()
            .insert(CollectionMetadata::new("c1", "owner", "alice"))
            .await
            .unwrap();
        let found = repos
            .collections()
            .get_collections(&filter.clone().with_id("c1"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].collection.name.as_deref(), Some("docs"));
        assert_eq!(found[0].collection.topic.as_deref(), Some("t1"));
        assert_eq!(found[0].collection.dimension, None);
        assert_eq!(
            found[0].metadata,
            vec![CollectionMetadata {
                collection_id: CollectionId::new("c1"),
                key: "owner".to_string(),
                value: Some(MetadataValue::Str("alice".to_string())),
            }]
        );

        let c2 = arbitrary_collection(&mut *repos, &db, "c2", "notes").await;
        for entry in [
            CollectionMetadata::new("c2", "priority", 3_i64),
            CollectionMetadata::new("c2", "owner", "alice"),
            CollectionMetadata::new("c2", "score", 0.5_f64),
            CollectionMetadata {
                collection_id: CollectionId::new("c2"),
                key: "flag".to_string(),
                value: None,
            },
        ] {
            repos.collection_metadata().insert(entry).await.unwrap();
        }
        let c3 = arbitrary_collection(&mut *repos, &other_db, "c3", "docs").await;

        let c2_metadata = vec![
            CollectionMetadata {
                collection_id: CollectionId::new("c2"),
                key: "flag".to_string(),
                value: None,
            },
            CollectionMetadata::new("c2", "owner", "alice"),
            CollectionMetadata::new("c2", "priority", 3_i64),
            CollectionMetadata::new("c2", "score", 0.5_f64),
        ];
        assert_eq!(
            repos.collections().get_collections(&filter).await.unwrap(),
            vec![
                CollectionAndMetadata {
                    collection: c1.clone(),
                    metadata: vec![CollectionMetadata::new("c1", "owner", "alice")],
                },
                CollectionAndMetadata {
                    collection: c2.clone(),
                    metadata: c2_metadata.clone(),
                },
            ]
        );

        assert_eq!(
            repos
                .collections()
                .get_collections(&filter.clone().with_name("notes"))
                .await
                .unwrap(),
            vec![CollectionAndMetadata {
                collection: c2.clone(),
                metadata: c2_metadata,
            }]
        );
        assert!(
            repos
                .collections()
                .get_collections(&filter.clone().with_id("c1").with_name("notes"))
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            repos
                .collections()
                .get_collections(&CollectionFilter::new("tenant1", "other").with_name("docs"))
                .await
                .unwrap(),
            vec![CollectionAndMetadata {
                collection: c3,
                metadata: vec![],
            }]
        );
        assert!(
            repos
                .collections()
                .get_collections(&CollectionFilter::new("tenant2", "default"))
                .await
                .unwrap()
                .is_empty()
        );

        let err = repos
            .collections()
            .get_collections(&CollectionFilter::new("", "default"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidArgument { .. });
        let err = repos
            .collections()
            .get_collections(&filter.clone().with_id(""))
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidArgument { .. });
    }

    async fn test_collection_metadata(catalog: Arc<dyn Catalog>) {
        let mut repos = catalog.repositories().await;
        let db = arbitrary_database(&mut *repos, "tenant1", "default").await;
        let c1 = arbitrary_collection(&mut *repos, &db, "c1", "docs").await;

        repos
            .collection_metadata()
            .insert(CollectionMetadata::new("c1", "owner", "alice"))
            .await
            .unwrap();
        let err = repos
            .collection_metadata()
            .insert(CollectionMetadata::new("c1", "owner", "bob"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::UniqueConstraintViolation { .. });

        let err = repos
            .collection_metadata()
            .insert(CollectionMetadata::new("missing", "owner", "alice"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound { .. });

        repos
            .collection_metadata()
            .insert(CollectionMetadata::new("c1", "priority", 1_i64))
            .await
            .unwrap();
        assert_eq!(
            repos
                .collection_metadata()
                .delete_by_collection_id(&c1.id)
                .await
                .unwrap(),
            2
        );
        assert!(get_one(&mut *repos, &db, "c1").await.metadata.is_empty());

        repos
            .collection_metadata()
            .insert(CollectionMetadata::new("c1", "owner", "carol"))
            .await
            .unwrap();
        repos.collection_metadata().delete_all().await.unwrap();
        let found = get_one(&mut *repos, &db, "c1").await;
        assert_eq!(found.collection, c1);
        assert!(found.metadata.is_empty());
    }
}
