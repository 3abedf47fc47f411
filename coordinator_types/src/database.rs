use crate::{DatabaseId, TenantId};
use serde::{Deserialize, Serialize};

/// Data object for a database, a named grouping of collections within a
/// tenant. `(tenant_id, name)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Database {
    /// The id of the database
    pub id: DatabaseId,
    /// The name of the database, unique within its tenant
    pub name: String,
    /// The tenant owning the database
    pub tenant_id: TenantId,
}

impl Database {
    /// Create a new database record.
    pub fn new(
        id: impl Into<DatabaseId>,
        name: impl Into<String>,
        tenant_id: impl Into<TenantId>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tenant_id: tenant_id.into(),
        }
    }
}
