//! Reconstruction of the flat `collections LEFT JOIN collection_metadata` row
//! stream into one record per collection.
//!
//! Nothing in here touches storage, the backends only decode rows into
//! [`JoinedRow`]s and hand them to [`assemble`].

use coordinator_types::{
    Collection, CollectionAndMetadata, CollectionId, CollectionMetadata, MetadataValue,
};
use indexmap::IndexMap;
use snafu::{ensure, Snafu};

/// A row stream that no well-formed join can produce.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum ProjectionError {
    #[snafu(display(
        "rows of collection {collection_id} are interleaved with rows of another collection"
    ))]
    NonContiguousCollection { collection_id: CollectionId },

    #[snafu(display("metadata value without a key for collection {collection_id}"))]
    ValueWithoutKey { collection_id: CollectionId },

    #[snafu(display(
        "metadata entry {key:?} of collection {collection_id} has more than one value column set"
    ))]
    AmbiguousValue {
        collection_id: CollectionId,
        key: Option<String>,
    },
}

/// The nullable metadata columns of one joined row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataColumns {
    /// `collection_metadata.key`, null when the collection has no metadata
    pub key: Option<String>,
    /// `collection_metadata.str_value`
    pub str_value: Option<String>,
    /// `collection_metadata.int_value`
    pub int_value: Option<i64>,
    /// `collection_metadata.float_value`
    pub float_value: Option<f64>,
}

/// The metadata half of a joined row, keyed by its collection.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    /// The collection the row belongs to
    pub collection_id: CollectionId,
    /// Absent for the single row of a collection without metadata
    pub key: Option<String>,
    /// The typed value, if any
    pub value: Option<MetadataValue>,
}

impl MetadataRow {
    /// Classify the value columns. At most one of them may be set.
    pub fn from_columns(
        collection_id: CollectionId,
        columns: MetadataColumns,
    ) -> Result<Self, ProjectionError> {
        let MetadataColumns {
            key,
            str_value,
            int_value,
            float_value,
        } = columns;

        let value = match (str_value, int_value, float_value) {
            (None, None, None) => None,
            (Some(v), None, None) => Some(MetadataValue::Str(v)),
            (None, Some(v), None) => Some(MetadataValue::Int(v)),
            (None, None, Some(v)) => Some(MetadataValue::Float(v)),
            _ => return AmbiguousValueSnafu { collection_id, key }.fail(),
        };

        Ok(Self {
            collection_id,
            key,
            value,
        })
    }
}

/// A full joined row as decoded by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    /// The collection columns
    pub collection: Collection,
    /// The metadata columns, all null if the collection has no metadata
    pub metadata: MetadataColumns,
}

/// Group metadata rows by collection.
///
/// Rows of one collection must be contiguous. Collections come out in the
/// order they were first seen and entries in row order. A keyless row only
/// registers its collection, so a collection without metadata maps to an
/// empty list.
pub fn project(
    rows: impl IntoIterator<Item = MetadataRow>,
) -> Result<IndexMap<CollectionId, Vec<CollectionMetadata>>, ProjectionError> {
    let mut grouped: IndexMap<CollectionId, Vec<CollectionMetadata>> = IndexMap::new();

    for MetadataRow {
        collection_id,
        key,
        value,
    } in rows
    {
        let continues = grouped
            .last()
            .is_some_and(|(last_id, _)| *last_id == collection_id);
        if !continues {
            ensure!(
                !grouped.contains_key(&collection_id),
                NonContiguousCollectionSnafu { collection_id }
            );
        }
        let entries = grouped.entry(collection_id.clone()).or_default();

        match (key, value) {
            (Some(key), value) => entries.push(CollectionMetadata {
                collection_id,
                key,
                value,
            }),
            (None, None) => {}
            (None, Some(_)) => return ValueWithoutKeySnafu { collection_id }.fail(),
        }
    }

    Ok(grouped)
}

/// Turn the joined rows into one [`CollectionAndMetadata`] per collection.
pub fn assemble(
    rows: impl IntoIterator<Item = JoinedRow>,
) -> Result<Vec<CollectionAndMetadata>, ProjectionError> {
    let mut collections: Vec<Collection> = Vec::new();
    let mut metadata_rows = Vec::new();

    for JoinedRow {
        collection,
        metadata,
    } in rows
    {
        metadata_rows.push(MetadataRow::from_columns(
            collection.id.clone(),
            metadata,
        )?);
        if collections.last().is_none_or(|last| last.id != collection.id) {
            collections.push(collection);
        }
    }

    // rejects repeated ids, so `collections` holds each id once
    let mut grouped = project(metadata_rows)?;

    Ok(collections
        .into_iter()
        .map(|collection| {
            let metadata = grouped.swap_remove(&collection.id).unwrap_or_default();
            CollectionAndMetadata {
                collection,
                metadata,
            }
        })
        .collect())
}
