//! This module implements an in-memory implementation of the catalog interface. It can be
//! used for testing or for a coordinator designed to run without catalog persistence.

use crate::{
    interface::{
        next_version, validate_filter, validate_update, Catalog, CollectionMetadataRepo,
        CollectionRepo, DatabaseRepo, Error, InternalSnafu, RepoCollection, Result,
    },
    projector::{assemble, JoinedRow, MetadataColumns},
    storage_error::log_position_cas_failure,
};
use async_trait::async_trait;
use coordinator_types::{
    Collection, CollectionAndMetadata, CollectionFilter, CollectionId, CollectionMetadata,
    CollectionParams, CollectionUpdate, CollectionVersion, Database, DatabaseId, LogPosition,
    TenantId,
};
use parking_lot::Mutex;
use snafu::ResultExt;
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};
use tracing::debug;

/// In-memory catalog that implements the `RepoCollection` and individual repo traits from
/// the catalog interface.
#[derive(Default)]
pub struct MemCatalog {
    tables: Arc<Mutex<MemTables>>,
}

impl MemCatalog {
    /// return new initialized `MemCatalog`
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemCatalog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemCatalog").finish_non_exhaustive()
    }
}

impl Display for MemCatalog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Memory")
    }
}

#[derive(Debug, Default)]
struct MemTables {
    databases: Vec<Database>,
    collections: Vec<Collection>,
    metadata: Vec<CollectionMetadata>,
}

/// Repositories of a [`MemCatalog`].
///
/// The tables are locked for the duration of a single operation only, which
/// makes every operation atomic with respect to all other handles.
#[derive(Debug)]
pub struct MemRepos {
    tables: Arc<Mutex<MemTables>>,
}

#[async_trait]
impl Catalog for MemCatalog {
    async fn setup(&self) -> Result<(), Error> {
        // nothing to do
        Ok(())
    }

    async fn repositories(&self) -> Box<dyn RepoCollection> {
        Box::new(MemRepos {
            tables: Arc::clone(&self.tables),
        })
    }
}

impl RepoCollection for MemRepos {
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

fn sorted_by_id(mut databases: Vec<Database>) -> Vec<Database> {
    databases.sort_by(|a, b| a.id.cmp(&b.id));
    databases
}

#[async_trait]
impl DatabaseRepo for MemRepos {
    async fn insert(&mut self, database: Database) -> Result<Database> {
        let mut tables = self.tables.lock();

        if tables.databases.iter().any(|d| {
            d.id == database.id || (d.tenant_id == database.tenant_id && d.name == database.name)
        }) {
            return Err(Error::UniqueConstraintViolation {
                descr: format!(
                    "database {} (name {} of tenant {})",
                    database.id, database.name, database.tenant_id
                ),
            });
        }

        tables.databases.push(database.clone());
        Ok(database)
    }

    async fn get_databases(&mut self, tenant_id: &TenantId, name: &str) -> Result<Vec<Database>> {
        let tables = self.tables.lock();
        Ok(tables
            .databases
            .iter()
            .filter(|d| &d.tenant_id == tenant_id && d.name == name)
            .cloned()
            .collect())
    }

    async fn get_databases_by_tenant_id(&mut self, tenant_id: &TenantId) -> Result<Vec<Database>> {
        let tables = self.tables.lock();
        Ok(sorted_by_id(
            tables
                .databases
                .iter()
                .filter(|d| &d.tenant_id == tenant_id)
                .cloned()
                .collect(),
        ))
    }

    async fn get_all_databases(&mut self) -> Result<Vec<Database>> {
        let tables = self.tables.lock();
        Ok(sorted_by_id(tables.databases.clone()))
    }

    async fn get_by_id(&mut self, id: &DatabaseId) -> Result<Database> {
        let tables = self.tables.lock();
        tables
            .databases
            .iter()
            .find(|d| &d.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                descr: format!("database {id}"),
            })
    }

    async fn delete_by_tenant_id_and_name(
        &mut self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<u64> {
        let mut tables = self.tables.lock();
        let before = tables.databases.len();
        tables
            .databases
            .retain(|d| !(&d.tenant_id == tenant_id && d.name == name));
        Ok((before - tables.databases.len()) as u64)
    }

    async fn delete_all(&mut self) -> Result<()> {
        self.tables.lock().databases.clear();
        Ok(())
    }
}

fn name_taken(tables: &MemTables, database_id: &DatabaseId, name: &str, except: &CollectionId) -> bool {
    tables.collections.iter().any(|c| {
        &c.id != except && &c.database_id == database_id && c.name.as_deref() == Some(name)
    })
}

fn metadata_columns(entry: &CollectionMetadata) -> MetadataColumns {
    let (str_value, int_value, float_value) = entry
        .value
        .as_ref()
        .map(|v| v.as_columns())
        .unwrap_or_default();
    MetadataColumns {
        key: Some(entry.key.clone()),
        str_value: str_value.map(str::to_string),
        int_value,
        float_value,
    }
}

#[async_trait]
impl CollectionRepo for MemRepos {
    async fn insert(&mut self, params: CollectionParams) -> Result<Collection> {
        let mut tables = self.tables.lock();

        let id_taken = tables.collections.iter().any(|c| c.id == params.id);
        let name_clash = params
            .name
            .as_deref()
            .is_some_and(|name| name_taken(&tables, &params.database_id, name, &params.id));
        if id_taken || name_clash {
            return Err(Error::UniqueConstraintViolation {
                descr: format!("collection {} (name {:?})", params.id, params.name),
            });
        }

        let collection = Collection {
            id: params.id,
            database_id: params.database_id,
            name: params.name,
            topic: params.topic,
            dimension: params.dimension,
            version: CollectionVersion::INITIAL,
            log_position: LogPosition::INITIAL,
            ts: params.ts,
        };
        tables.collections.push(collection.clone());
        Ok(collection)
    }

    async fn update(&mut self, update: CollectionUpdate) -> Result<u64> {
        validate_update(&update)?;
        let mut tables = self.tables.lock();

        let Some(idx) = tables.collections.iter().position(|c| c.id == update.id) else {
            return Ok(0);
        };
        if let Some(name) = &update.name {
            let database_id = tables.collections[idx].database_id.clone();
            if name_taken(&tables, &database_id, name, &update.id) {
                return Err(Error::UniqueConstraintViolation {
                    descr: format!("collection name {name} in database {database_id}"),
                });
            }
        }

        let collection = &mut tables.collections[idx];
        if let Some(name) = update.name {
            collection.name = Some(name);
        }
        if let Some(topic) = update.topic {
            collection.topic = Some(topic);
        }
        if let Some(dimension) = update.dimension {
            collection.dimension = Some(dimension);
        }
        Ok(1)
    }

    async fn update_log_position_and_version(
        &mut self,
        id: &CollectionId,
        log_position: LogPosition,
        expected_version: CollectionVersion,
    ) -> Result<CollectionVersion> {
        let new_version = next_version(id, expected_version)?;
        let mut tables = self.tables.lock();

        match tables.collections.iter_mut().find(|c| &c.id == id) {
            Some(c) if c.version == expected_version && c.log_position <= log_position => {
                c.version = new_version;
                c.log_position = log_position;
                debug!(collection_id=%id, %log_position, version=%new_version, "advanced log position");
                Ok(new_version)
            }
            current => Err(log_position_cas_failure(
                id,
                expected_version,
                log_position,
                current.map(|c| (c.version, c.log_position)),
            )),
        }
    }

    async fn delete_by_id(&mut self, id: &CollectionId) -> Result<u64> {
        let mut tables = self.tables.lock();
        let before = tables.collections.len();
        tables.collections.retain(|c| &c.id != id);
        let deleted = (before - tables.collections.len()) as u64;
        tables.metadata.retain(|m| &m.collection_id != id);
        Ok(deleted)
    }

    async fn delete_all(&mut self) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.collections.clear();
        tables.metadata.clear();
        Ok(())
    }

    async fn get_collections(
        &mut self,
        filter: &CollectionFilter,
    ) -> Result<Vec<CollectionAndMetadata>> {
        validate_filter(filter)?;
        let tables = self.tables.lock();

        let database_ids = tables
            .databases
            .iter()
            .filter(|d| d.tenant_id == filter.tenant_id && d.name == filter.database_name)
            .map(|d| &d.id)
            .collect::<Vec<_>>();

        let mut collections = tables
            .collections
            .iter()
            .filter(|c| database_ids.contains(&&c.database_id))
            .filter(|c| filter.id.as_ref().is_none_or(|id| &c.id == id))
            .filter(|c| {
                filter
                    .name
                    .as_deref()
                    .is_none_or(|name| c.name.as_deref() == Some(name))
            })
            .collect::<Vec<_>>();
        collections.sort_by(|a, b| a.id.cmp(&b.id));

        let mut rows = Vec::new();
        for collection in collections {
            let mut entries = tables
                .metadata
                .iter()
                .filter(|m| m.collection_id == collection.id)
                .collect::<Vec<_>>();
            entries.sort_by(|a, b| a.key.cmp(&b.key));

            if entries.is_empty() {
                rows.push(JoinedRow {
                    collection: collection.clone(),
                    metadata: MetadataColumns::default(),
                });
            }
            rows.extend(entries.into_iter().map(|entry| JoinedRow {
                collection: collection.clone(),
                metadata: metadata_columns(entry),
            }));
        }

        assemble(rows).context(InternalSnafu)
    }
}

#[async_trait]
impl CollectionMetadataRepo for MemRepos {
    async fn insert(&mut self, entry: CollectionMetadata) -> Result<()> {
        let mut tables = self.tables.lock();

        if !tables
            .collections
            .iter()
            .any(|c| c.id == entry.collection_id)
        {
            return Err(Error::NotFound {
                descr: format!("collection {}", entry.collection_id),
            });
        }
        if tables
            .metadata
            .iter()
            .any(|m| m.collection_id == entry.collection_id && m.key == entry.key)
        {
            return Err(Error::UniqueConstraintViolation {
                descr: format!(
                    "metadata key {} of collection {}",
                    entry.key, entry.collection_id
                ),
            });
        }

        tables.metadata.push(entry);
        Ok(())
    }

    async fn delete_by_collection_id(&mut self, collection_id: &CollectionId) -> Result<u64> {
        let mut tables = self.tables.lock();
        let before = tables.metadata.len();
        tables.metadata.retain(|m| &m.collection_id != collection_id);
        Ok((before - tables.metadata.len()) as u64)
    }

    async fn delete_all(&mut self) -> Result<()> {
        self.tables.lock().metadata.clear();
        Ok(())
    }
}
