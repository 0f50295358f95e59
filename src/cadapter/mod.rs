//! Object-storage adapters.
//!
//! The cache talks to object storage through [`client::ObjectClient`], a
//! thin wrapper over an [`client::ObjectBackend`]. Production uses the S3
//! backend; tests use the local-filesystem mock.

pub mod client;
pub mod localfs;
pub mod s3;

pub use client::{BackendError, ObjectBackend, ObjectClient};
pub use localfs::LocalFsBackend;
pub use s3::{S3Backend, S3Config};
