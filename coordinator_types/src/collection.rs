use crate::{CollectionId, CollectionVersion, DatabaseId, LogPosition, TenantId};
use serde::{Deserialize, Serialize};

/// Data object for a collection.
///
/// `version` and `log_position` start at [`CollectionVersion::INITIAL`] and
/// [`LogPosition::INITIAL`] and only ever move through the catalog's log
/// position compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Collection {
    /// The id of the collection
    pub id: CollectionId,
    /// The database the collection belongs to
    pub database_id: DatabaseId,
    /// The name of the collection, unique within its database when present
    pub name: Option<String>,
    /// The log topic the collection ingests from
    pub topic: Option<String>,
    /// The dimensionality of the embeddings, if known
    pub dimension: Option<i32>,
    /// Bumped by one on every log position advance
    pub version: CollectionVersion,
    /// The write-ahead log position this collection is consistent with
    pub log_position: LogPosition,
    /// Caller supplied timestamp of the last insert
    pub ts: i64,
}

/// Data for a collection to be inserted into the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionParams {
    /// The id of the collection
    pub id: CollectionId,
    /// The database the collection belongs to
    pub database_id: DatabaseId,
    /// The name of the collection
    pub name: Option<String>,
    /// The log topic the collection ingests from
    pub topic: Option<String>,
    /// The dimensionality of the embeddings
    pub dimension: Option<i32>,
    /// Timestamp recorded with the collection
    pub ts: i64,
}

impl CollectionParams {
    /// Params for a collection with only its identity set.
    pub fn new(id: impl Into<CollectionId>, database_id: impl Into<DatabaseId>) -> Self {
        Self {
            id: id.into(),
            database_id: database_id.into(),
            name: None,
            topic: None,
            dimension: None,
            ts: 0,
        }
    }

    /// Set the collection name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the log topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: i32) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Set the timestamp.
    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = ts;
        self
    }
}

/// A sparse patch of a collection.
///
/// Only the fields that are `Some` are written, everything else is left
/// untouched in storage. `Some(0)` for the dimension therefore writes a zero
/// while `None` leaves the stored dimension alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionUpdate {
    /// The collection to patch
    pub id: CollectionId,
    /// New name
    pub name: Option<String>,
    /// New log topic
    pub topic: Option<String>,
    /// New embedding dimension
    pub dimension: Option<i32>,
}

impl CollectionUpdate {
    /// An empty patch of the collection `id`.
    pub fn new(id: impl Into<CollectionId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            topic: None,
            dimension: None,
        }
    }

    /// Patch the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Patch the topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Patch the dimension.
    pub fn with_dimension(mut self, dimension: i32) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// True if the patch sets no field at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.topic.is_none() && self.dimension.is_none()
    }
}

/// Scope and filters of a collection lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFilter {
    /// Only return the collection with this id
    pub id: Option<CollectionId>,
    /// Only return the collection with this name
    pub name: Option<String>,
    /// The tenant owning the database
    pub tenant_id: TenantId,
    /// The name of the database within the tenant
    pub database_name: String,
}

impl CollectionFilter {
    /// All collections of the database `database_name` of `tenant_id`.
    pub fn new(tenant_id: impl Into<TenantId>, database_name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: None,
            tenant_id: tenant_id.into(),
            database_name: database_name.into(),
        }
    }

    /// Restrict to a single collection id.
    pub fn with_id(mut self, id: impl Into<CollectionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Restrict to a collection name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The value of a metadata entry, stored in one of three typed columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// Stored in `str_value`
    Str(String),
    /// Stored in `int_value`
    Int(i64),
    /// Stored in `float_value`
    Float(f64),
}

impl MetadataValue {
    /// Split the value into its `(str_value, int_value, float_value)` storage
    /// columns, exactly one of which is set.
    pub fn as_columns(&self) -> (Option<&str>, Option<i64>, Option<f64>) {
        match self {
            Self::Str(v) => (Some(v.as_str()), None, None),
            Self::Int(v) => (None, Some(*v), None),
            Self::Float(v) => (None, None, Some(*v)),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// A key/value metadata entry owned by a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// The owning collection
    pub collection_id: CollectionId,
    /// The key, unique within the collection
    pub key: String,
    /// The value, absent when no value column is set
    pub value: Option<MetadataValue>,
}

impl CollectionMetadata {
    /// An entry with a present value.
    pub fn new(
        collection_id: impl Into<CollectionId>,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// A collection together with its metadata entries, as returned by lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionAndMetadata {
    /// The collection record
    pub collection: Collection,
    /// Metadata entries in storage order; empty if the collection has none
    pub metadata: Vec<CollectionMetadata>,
}
