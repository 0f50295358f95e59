// Library crate for TideFS: metaserver operator pipeline + client write-back cache.

pub mod cadapter;
pub mod diskcache;
pub mod metaserver;

// Public surface for external users.
pub use crate::cadapter::client::{BackendError, ObjectBackend, ObjectClient};
pub use crate::cadapter::localfs::LocalFsBackend;
pub use crate::cadapter::s3::{S3Backend, S3Config};
pub use crate::diskcache::lru::LruIndex;
pub use crate::diskcache::sync::SynchronizationTask;
pub use crate::diskcache::write::{DiskCacheWrite, DiskCacheWriteOptions};
pub use crate::metaserver::apply_queue::ApplyQueue;
pub use crate::metaserver::message::{MetaRequest, MetaResponse, OperatorType};
pub use crate::metaserver::metrics::OperatorMetrics;
pub use crate::metaserver::operator::MetaOperator;
pub use crate::metaserver::raft::{LeaseState, RaftNode, RaftTask};
pub use crate::metaserver::store::{ChunkInfoIter, MetaStore};
pub use crate::metaserver::stream::{
    RpcController, StreamConnection, StreamFrame, StreamServer,
};
pub use crate::metaserver::types::MetaStatusCode;
