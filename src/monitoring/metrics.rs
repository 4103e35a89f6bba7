//! Engine Metrics
//!
//! Lock-free counters updated by the engine and step executor, and a
//! serializable snapshot for reporting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters shared by the service, engine and step executor.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    definitions_registered: AtomicU64,
    executions_submitted: AtomicU64,
    executions_started: AtomicU64,
    executions_completed: AtomicU64,
    executions_failed: AtomicU64,
    executions_cancelled: AtomicU64,
    workflow_retries: AtomicU64,
    step_attempts: AtomicU64,
    step_retries: AtomicU64,
    step_timeouts: AtomicU64,
    steps_skipped: AtomicU64,
    completed_duration_ms: AtomicU64,
    running: AtomicUsize,
    queue_depth: AtomicUsize,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_definition(&self) {
        self.definitions_registered.fetch_add(1, Ordering::Relaxed);
    }

    /// An execution was enqueued.
    pub fn record_submitted(&self) {
        self.executions_submitted.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker took an execution off the queue.
    pub fn record_dequeued(&self) {
        let _ = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_started(&self) {
        self.executions_started.fetch_add(1, Ordering::Relaxed);
        self.running.fetch_add(1, Ordering::Relaxed);
    }

    /// A running execution left the RUNNING state.
    pub fn record_finished(&self) {
        let _ = self
            .running
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_completed(&self, duration: Duration) {
        self.executions_completed.fetch_add(1, Ordering::Relaxed);
        self.completed_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.executions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.executions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_workflow_retry(&self) {
        self.workflow_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_attempt(&self) {
        self.step_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_retry(&self) {
        self.step_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_timeout(&self) {
        self.step_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_skipped(&self) {
        self.steps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.executions_completed.load(Ordering::Relaxed);
        let failed = self.executions_failed.load(Ordering::Relaxed);
        let duration_ms = self.completed_duration_ms.load(Ordering::Relaxed);

        let average_execution_time_secs = if completed == 0 {
            0.0
        } else {
            duration_ms as f64 / completed as f64 / 1000.0
        };

        let finished = completed + failed;
        let success_rate = if finished == 0 {
            0.0
        } else {
            completed as f64 / finished as f64 * 100.0
        };

        MetricsSnapshot {
            definitions_registered: self.definitions_registered.load(Ordering::Relaxed),
            executions_submitted: self.executions_submitted.load(Ordering::Relaxed),
            executions_started: self.executions_started.load(Ordering::Relaxed),
            executions_completed: completed,
            executions_failed: failed,
            executions_cancelled: self.executions_cancelled.load(Ordering::Relaxed),
            workflow_retries: self.workflow_retries.load(Ordering::Relaxed),
            step_attempts: self.step_attempts.load(Ordering::Relaxed),
            step_retries: self.step_retries.load(Ordering::Relaxed),
            step_timeouts: self.step_timeouts.load(Ordering::Relaxed),
            steps_skipped: self.steps_skipped.load(Ordering::Relaxed),
            average_execution_time_secs,
            success_rate,
            running_executions: self.running.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            active_workflows: 0,
        }
    }
}

/// Point-in-time metrics report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub definitions_registered: u64,
    pub executions_submitted: u64,
    pub executions_started: u64,
    pub executions_completed: u64,
    pub executions_failed: u64,
    pub executions_cancelled: u64,
    pub workflow_retries: u64,
    pub step_attempts: u64,
    pub step_retries: u64,
    pub step_timeouts: u64,
    pub steps_skipped: u64,
    pub average_execution_time_secs: f64,
    /// Completed share of finished executions, in percent
    pub success_rate: f64,
    pub running_executions: usize,
    pub queue_depth: usize,
    /// Definitions currently loaded in the service
    pub active_workflows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = EngineMetrics::new().snapshot();
        assert_eq!(snapshot.executions_submitted, 0);
        assert_eq!(snapshot.average_execution_time_secs, 0.0);
        assert_eq!(snapshot.success_rate, 0.0);
    }

    #[test]
    fn test_average_and_success_rate() {
        let metrics = EngineMetrics::new();
        metrics.record_completed(Duration::from_millis(1000));
        metrics.record_completed(Duration::from_millis(3000));
        metrics.record_failed();
        metrics.record_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.executions_completed, 2);
        assert_eq!(snapshot.average_execution_time_secs, 2.0);
        assert_eq!(snapshot.success_rate, 50.0);
    }

    #[test]
    fn test_gauges_never_underflow() {
        let metrics = EngineMetrics::new();
        metrics.record_dequeued();
        metrics.record_finished();

        metrics.record_submitted();
        metrics.record_started();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queue_depth, 1);
        assert_eq!(snapshot.running_executions, 1);

        metrics.record_dequeued();
        metrics.record_finished();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queue_depth, 0);
        assert_eq!(snapshot.running_executions, 0);
    }
}
