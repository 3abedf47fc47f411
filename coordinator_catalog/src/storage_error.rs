//! Mapping of engine errors onto the catalog's [`Error`] taxonomy.

use crate::interface::Error;
use coordinator_types::{CollectionId, CollectionVersion, LogPosition};

/// The engine specific codes a backend reports for constraint violations.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ViolationCodes {
    pub(crate) unique: &'static [&'static str],
    pub(crate) foreign_key: &'static [&'static str],
}

impl ViolationCodes {
    /// <https://www.postgresql.org/docs/current/errcodes-appendix.html>
    pub(crate) const POSTGRES: Self = Self {
        unique: &["23505"],
        foreign_key: &["23503"],
    };

    /// Extended result codes, <https://www.sqlite.org/rescode.html>.
    /// `SQLITE_CONSTRAINT_PRIMARYKEY` is reported separately from
    /// `SQLITE_CONSTRAINT_UNIQUE`.
    pub(crate) const SQLITE: Self = Self {
        unique: &["2067", "1555"],
        foreign_key: &["787"],
    };

    fn matches(codes: &[&str], e: &sqlx::Error) -> bool {
        match e {
            sqlx::Error::Database(inner) => inner
                .code()
                .is_some_and(|code| codes.contains(&code.as_ref())),
            _ => false,
        }
    }

    pub(crate) fn is_unique_violation(&self, e: &sqlx::Error) -> bool {
        Self::matches(self.unique, e)
    }

    pub(crate) fn is_fk_violation(&self, e: &sqlx::Error) -> bool {
        Self::matches(self.foreign_key, e)
    }

    /// Classify a failed write of `descr`. A foreign key violation means the
    /// referenced parent row is missing.
    pub(crate) fn classify(&self, e: sqlx::Error, descr: impl FnOnce() -> String) -> Error {
        if self.is_unique_violation(&e) {
            Error::UniqueConstraintViolation { descr: descr() }
        } else if self.is_fk_violation(&e) {
            Error::NotFound { descr: descr() }
        } else {
            Error::StorageUnavailable { source: e }
        }
    }
}

/// Explain why the conditional log position update of `collection_id` wrote
/// nothing, given the state read back after the failed write.
pub(crate) fn log_position_cas_failure(
    collection_id: &CollectionId,
    expected: CollectionVersion,
    log_position: LogPosition,
    current: Option<(CollectionVersion, LogPosition)>,
) -> Error {
    match current {
        None => Error::NotFound {
            descr: format!("collection {collection_id}"),
        },
        Some((actual, _)) if actual != expected => Error::VersionConflict {
            collection_id: collection_id.clone(),
            expected,
            actual,
        },
        Some((_, stored)) => Error::InvalidArgument {
            reason: format!(
                "log position {log_position} of collection {collection_id} is behind the stored log position {stored}"
            ),
        },
    }
}
