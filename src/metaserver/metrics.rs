//! Per-operator latency and completion metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::message::OperatorType;

/// A bvar-style latency recorder: count, sum and max in microseconds.
pub struct LatencyRecorder {
    name: &'static str,
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

impl LatencyRecorder {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            count: AtomicU64::new(0),
            total_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn observe(&self, us: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total_us(&self) -> u64 {
        self.total_us.load(Ordering::Relaxed)
    }

    pub fn max_us(&self) -> u64 {
        self.max_us.load(Ordering::Relaxed)
    }
}

/// Queue-wait latency of fast-apply tasks, recorded by the apply workers.
pub static CONCURRENT_FAST_APPLY_WAIT: LatencyRecorder =
    LatencyRecorder::new("concurrent_fast_apply_wait");

#[derive(Default)]
struct OpCell {
    wait_count: AtomicU64,
    wait_us: AtomicU64,
    execute_count: AtomicU64,
    execute_us: AtomicU64,
    complete_ok: AtomicU64,
    complete_err: AtomicU64,
    complete_us: AtomicU64,
    from_log_ok: AtomicU64,
    from_log_err: AtomicU64,
    from_log_us: AtomicU64,
}

/// Metric sink attached to one copyset node.
#[derive(Default)]
pub struct OperatorMetrics {
    cells: DashMap<OperatorType, OpCell>,
}

impl OperatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_cell(&self, op: OperatorType, f: impl FnOnce(&OpCell)) {
        f(&self.cells.entry(op).or_default());
    }

    pub fn wait_in_queue_latency(&self, op: OperatorType, us: u64) {
        self.with_cell(op, |cell| {
            cell.wait_count.fetch_add(1, Ordering::Relaxed);
            cell.wait_us.fetch_add(us, Ordering::Relaxed);
        });
    }

    pub fn execute_latency(&self, op: OperatorType, us: u64) {
        self.with_cell(op, |cell| {
            cell.execute_count.fetch_add(1, Ordering::Relaxed);
            cell.execute_us.fetch_add(us, Ordering::Relaxed);
        });
    }

    pub fn on_operator_complete(&self, op: OperatorType, us: u64, success: bool) {
        self.with_cell(op, |cell| {
            if success {
                cell.complete_ok.fetch_add(1, Ordering::Relaxed);
            } else {
                cell.complete_err.fetch_add(1, Ordering::Relaxed);
            }
            cell.complete_us.fetch_add(us, Ordering::Relaxed);
        });
    }

    pub fn on_operator_complete_from_log(&self, op: OperatorType, us: u64, success: bool) {
        self.with_cell(op, |cell| {
            if success {
                cell.from_log_ok.fetch_add(1, Ordering::Relaxed);
            } else {
                cell.from_log_err.fetch_add(1, Ordering::Relaxed);
            }
            cell.from_log_us.fetch_add(us, Ordering::Relaxed);
        });
    }

    /// (successes, failures) completed through the RPC path.
    pub fn completed(&self, op: OperatorType) -> (u64, u64) {
        self.cells
            .get(&op)
            .map(|cell| {
                (
                    cell.complete_ok.load(Ordering::Relaxed),
                    cell.complete_err.load(Ordering::Relaxed),
                )
            })
            .unwrap_or((0, 0))
    }

    /// (successes, failures) completed through log replay.
    pub fn completed_from_log(&self, op: OperatorType) -> (u64, u64) {
        self.cells
            .get(&op)
            .map(|cell| {
                (
                    cell.from_log_ok.load(Ordering::Relaxed),
                    cell.from_log_err.load(Ordering::Relaxed),
                )
            })
            .unwrap_or((0, 0))
    }

    pub fn wait_samples(&self, op: OperatorType) -> u64 {
        self.cells
            .get(&op)
            .map(|cell| cell.wait_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_recorder_tracks_count_sum_max() {
        let recorder = LatencyRecorder::new("test_recorder");
        recorder.observe(10);
        recorder.observe(30);
        recorder.observe(20);
        assert_eq!(recorder.count(), 3);
        assert_eq!(recorder.total_us(), 60);
        assert_eq!(recorder.max_us(), 30);
        assert_eq!(recorder.name(), "test_recorder");
    }

    #[test]
    fn test_completion_counters_split_by_success() {
        let metrics = OperatorMetrics::new();
        metrics.on_operator_complete(OperatorType::GetInode, 5, true);
        metrics.on_operator_complete(OperatorType::GetInode, 7, false);
        metrics.on_operator_complete_from_log(OperatorType::UpdateInode, 3, true);
        assert_eq!(metrics.completed(OperatorType::GetInode), (1, 1));
        assert_eq!(metrics.completed_from_log(OperatorType::UpdateInode), (1, 0));
        assert_eq!(metrics.completed(OperatorType::CreateInode), (0, 0));
    }
}
