//! This crate contains the data types that are shared between the coordinator
//! metastore catalog, its storage backends and the service layer calling it:
//! tenants, databases, collections and the metadata attached to them.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod collection;
mod database;

pub use collection::*;
pub use database::*;

use serde::{Deserialize, Serialize};

/// Declares a string-backed identifier newtype that is stored as `TEXT`.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(String);

        #[allow(missing_docs)]
        impl $name {
            pub fn new(v: impl Into<String>) -> Self {
                Self(v.into())
            }

            pub fn get(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(v: &str) -> Self {
                Self(v.to_string())
            }
        }

        impl From<String> for $name {
            fn from(v: String) -> Self {
                Self(v)
            }
        }
    };
}

string_id!(
    /// Opaque identifier of a tenant, the top-level isolation boundary.
    TenantId
);

string_id!(
    /// Unique ID for a [`Database`].
    DatabaseId
);

string_id!(
    /// Unique ID for a [`Collection`].
    CollectionId
);

/// Version of a [`Collection`], bumped by exactly one on every successful
/// log position compare-and-swap.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct CollectionVersion(i32);

#[allow(missing_docs)]
impl CollectionVersion {
    /// The version of a freshly inserted collection.
    pub const INITIAL: Self = Self(0);

    pub fn new(v: i32) -> Self {
        Self(v)
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    /// The version following this one, or `None` on overflow.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl std::fmt::Display for CollectionVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position in the write-ahead log that a collection's catalog state has
/// caught up with.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct LogPosition(i64);

#[allow(missing_docs)]
impl LogPosition {
    /// The log position of a freshly inserted collection.
    pub const INITIAL: Self = Self(0);

    pub fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
