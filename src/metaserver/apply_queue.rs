//! Per-partition serial apply workers.
//!
//! Tasks pushed with the same shard key execute serially, in enqueue order,
//! on the same worker. This gives per-partition linearizability without a
//! global lock: lease reads and committed writes against one partition all
//! funnel through one shard.

use std::time::Instant;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::message::OperatorType;
use super::metrics::CONCURRENT_FAST_APPLY_WAIT;

struct QueueEntry {
    op: OperatorType,
    enqueued_at: Instant,
    task: BoxFuture<'static, ()>,
}

/// A fixed pool of shard workers, each draining a FIFO channel.
pub struct ApplyQueue {
    shards: Vec<mpsc::UnboundedSender<QueueEntry>>,
}

impl ApplyQueue {
    /// Spawns `worker_count` shard workers on the current runtime.
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "apply queue needs at least one worker");
        let mut shards = Vec::with_capacity(worker_count);
        for shard in 0..worker_count {
            let (tx, mut rx) = mpsc::unbounded_channel::<QueueEntry>();
            tokio::spawn(async move {
                while let Some(entry) = rx.recv().await {
                    CONCURRENT_FAST_APPLY_WAIT
                        .observe(entry.enqueued_at.elapsed().as_micros() as u64);
                    trace!(shard, op = entry.op.name(), "running apply task");
                    entry.task.await;
                }
                debug!(shard, "apply worker drained and exiting");
            });
            shards.push(tx);
        }
        Self { shards }
    }

    /// Enqueues a task on the shard selected by `hash`. FIFO per shard.
    pub fn push<F>(&self, hash: u64, op: OperatorType, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shard = (hash % self.shards.len() as u64) as usize;
        let entry = QueueEntry {
            op,
            enqueued_at: Instant::now(),
            task: Box::pin(task),
        };
        if self.shards[shard].send(entry).is_err() {
            // Worker already exited; only possible after runtime shutdown.
            debug!(shard, op = op.name(), "apply shard closed, dropping task");
        }
    }

    pub fn worker_count(&self) -> usize {
        self.shards.len()
    }
}
