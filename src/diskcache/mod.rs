//! Client-side disk write-back cache.
//!
//! Client writes land as regular files in a staging directory and are
//! flushed to object storage by a background worker. Per-inode flushes and
//! a full drain are supported; a successfully uploaded file is removed from
//! disk before its task counts as complete.
//!
//! Submodules:
//! - `naming`: the object-name ↔ inode rule shared with the read cache
//! - `lru`: the shared recency index of locally cached object names
//! - `sync`: countdown latch used to wait on upload batches
//! - `write`: the cache itself

pub mod lru;
pub mod naming;
pub mod sync;
pub mod write;

pub use lru::LruIndex;
pub use sync::SynchronizationTask;
pub use write::{DiskCacheWrite, DiskCacheWriteOptions};
