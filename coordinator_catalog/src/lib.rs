//! The coordinator catalog which keeps track of the tenants' databases, the collections within
//! them and the metadata attached to each collection, together with the log position and
//! version every collection has caught up to.
//!
//! Three backends implement [`interface::Catalog`]: [`postgres`] for production, [`sqlite`]
//! for single node deployments and [`mem`] for tests.
#![warn(
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod interface;
pub mod mem;
pub mod postgres;
pub mod projector;
pub mod sqlite;
mod storage_error;
