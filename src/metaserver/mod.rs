//! Metaserver copyset operator pipeline.
//!
//! The layer between the metadata RPC entry point and the Raft-replicated
//! state machine. Each incoming metadata RPC becomes a [`operator::MetaOperator`]
//! which is either answered from the local state machine via a lease read,
//! proposed to Raft as a log entry, or redirected to the current leader.
//!
//! Submodules:
//! - `types`: status codes and metadata records shared by requests/responses
//! - `message`: per-operator request/response pairs and the tagged enums
//! - `store`: the `MetaStore` contract the state machine applies into
//! - `raft`: the `RaftNode` contract consumed by operators
//! - `apply_queue`: per-partition serial apply workers
//! - `codec`: the Raft log envelope
//! - `operator`: operator lifecycle (propose / apply / replay)
//! - `stream`: streaming tail for large responses
//! - `metrics`: per-operator latency and completion counters

pub mod apply_queue;
pub mod codec;
pub mod message;
pub mod metrics;
pub mod operator;
pub mod raft;
pub mod store;
pub mod stream;
pub mod types;

pub use message::{MetaRequest, MetaResponse, OperatorType};
pub use operator::MetaOperator;
pub use raft::{LeaseState, RaftNode, RaftTask};
pub use store::MetaStore;
pub use types::MetaStatusCode;
