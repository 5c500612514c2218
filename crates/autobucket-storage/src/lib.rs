//! Cloud object-storage adapters for autobucket
//!
//! The bucket controller talks to clouds only through [`CloudStorageAdapter`].
//! Each cloud supplies a thin [`ObjectStorageApi`] client; the shared
//! [`PurgingStorageAdapter`] layers idempotent create and purge-then-delete on
//! top, so every cloud gets the same semantics.

#![deny(missing_docs)]

pub mod adapter;
pub mod error;
pub mod gcs;
pub mod purge;

pub use adapter::{CloudAdapters, CloudStorageAdapter};
pub use error::StorageError;
pub use gcs::{GcsAuth, GcsJsonApi};
pub use purge::{ObjectPage, ObjectStorageApi, PurgingStorageAdapter};
