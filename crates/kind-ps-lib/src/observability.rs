//! Structured logging for pipeline events
//!
//! The logger is built by the caller and handed to the pipeline, so the
//! pipeline never touches global log configuration. Events are emitted
//! through `tracing` with a stable `event` field.

use std::time::Duration;
use tracing::{debug, info, warn};

/// Structured logger for discovery runs
#[derive(Clone, Debug)]
pub struct StructuredLogger {
    run_id: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new(std::process::id().to_string())
    }
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_run_started(&self, node_filter: &str, pod_filter: &str) {
        debug!(
            event = "run_started",
            run_id = %self.run_id,
            node_filter = %node_filter,
            pod_filter = %pod_filter,
            "Listing processes"
        );
    }

    pub fn log_nodes_discovered(&self, node_filter: &str, nodes: &[String]) {
        info!(
            event = "nodes_discovered",
            run_id = %self.run_id,
            node_filter = %node_filter,
            count = nodes.len(),
            nodes = ?nodes,
            "Discovered kind nodes"
        );
    }

    pub fn log_inventory_collected(&self, node: &str, images: usize, pods: usize, containers: usize) {
        debug!(
            event = "inventory_collected",
            run_id = %self.run_id,
            node = %node,
            images = images,
            ready_pods = pods,
            containers = containers,
            "Collected runtime inventory"
        );
    }

    pub fn log_pid_vanished(&self, node: &str, container_id: &str, pid: &str) {
        warn!(
            event = "pid_vanished",
            run_id = %self.run_id,
            node = %node,
            container_id = %container_id,
            pid = %pid,
            "Process exited before its command line was read, skipping"
        );
    }

    pub fn log_process_groups_resolved(&self, node: &str, groups: usize, processes: usize, elapsed: Duration) {
        info!(
            event = "process_groups_resolved",
            run_id = %self.run_id,
            node = %node,
            groups = groups,
            processes = processes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Resolved host processes"
        );
    }

    pub fn log_node_failed(&self, node: &str, error: &dyn std::error::Error) {
        warn!(
            event = "node_failed",
            run_id = %self.run_id,
            node = %node,
            error = %error,
            "Failed to resolve processes on node"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("run-1");
        assert_eq!(logger.run_id(), "run-1");
    }

    #[test]
    fn test_default_uses_process_id() {
        let logger = StructuredLogger::default();
        assert_eq!(logger.run_id(), std::process::id().to_string());
    }

    #[test]
    fn test_logging_without_subscriber() {
        let logger = StructuredLogger::new("run-2");
        logger.log_run_started("kind", "");
        logger.log_nodes_discovered("kind", &["kind-worker".to_string()]);
        logger.log_inventory_collected("kind-worker", 3, 1, 2);
        logger.log_pid_vanished("kind-worker", "c0ffee01", "20");
        logger.log_process_groups_resolved("kind-worker", 2, 4, Duration::from_millis(12));
    }
}
