//! Contract between the operator pipeline and the Raft engine hosting a
//! copyset.
//!
//! The engine itself (log append, election, snapshotting) lives elsewhere;
//! operators only need the queries and the proposal entry point below.

use std::sync::Arc;

use super::apply_queue::ApplyQueue;
use super::metrics::OperatorMetrics;
use super::operator::MetaOperator;
use super::store::MetaStore;

/// Leader-lease state at the time of a read classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// The lease is held and valid: local reads are linearizable.
    Leader,
    /// The lease expired; the caller must be redirected.
    Expired,
    /// The lease is not established yet; degrade to a log read.
    NotReady,
    /// Lease reads are turned off; degrade to a log read.
    Disabled,
}

/// A log proposal carrying the encoded operator envelope.
///
/// Contract for implementors: once the entry commits, drive
/// [`MetaOperator::on_apply`] with the commit index (through the node's
/// apply queue, keyed by the operator's partition); if the proposal is
/// rejected (term mismatch, leadership loss), deliver the failure through
/// [`MetaOperator::on_failed`]. Dropping the task without either delivers
/// `UnknownError` to the waiting client.
pub struct RaftTask {
    pub data: Vec<u8>,
    pub expected_term: i64,
    pub operator: Box<MetaOperator>,
}

/// One Raft-replicated copyset node, as seen by its operators.
pub trait RaftNode: Send + Sync {
    /// Whether this node currently believes it is leader for its term.
    fn is_leader_term(&self) -> bool;

    fn leader_term(&self) -> i64;

    fn lease_state(&self) -> LeaseState;

    /// Submits a proposal. Non-blocking enqueue; completion is delivered
    /// through the task's operator.
    fn propose(&self, task: RaftTask);

    fn apply_queue(&self) -> &ApplyQueue;

    fn applied_index(&self) -> u64;

    /// Monotonic max: concurrent operators may race their commit indexes.
    fn update_applied_index(&self, index: u64);

    fn meta_store(&self) -> Arc<dyn MetaStore>;

    fn metrics(&self) -> Arc<OperatorMetrics>;
}
