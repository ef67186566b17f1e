//! End-to-end process listing across kind nodes
//!
//! Nodes are discovered once, then each node is handled by its own task:
//! runtime inventory, cgroup scan, PID resolution, correlation. Results are
//! reassembled in discovery order. The first failing node, in that order,
//! fails the whole run.

use crate::cgroup::ProcessResolver;
use crate::config::PipelineConfig;
use crate::correlate::{containers_of_ready_pods, correlate};
use crate::discovery::discover_nodes;
use crate::error::{KindPsError, Result};
use crate::exec::{CommandRunner, Gateway, ProcessRunner};
use crate::inventory::InventoryReader;
use crate::models::{Node, ProcessGroup};
use crate::observability::StructuredLogger;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;


/// Maps kind workloads to host processes
#[derive(Clone)]
pub struct Pipeline {
    gateway: Gateway,
    inventory: InventoryReader,
    resolver: ProcessResolver,
    internal_label_prefix: String,
    logger: StructuredLogger,
}

impl Pipeline {
    /// Pipeline that shells out to the real docker CLI
    pub fn new(config: &PipelineConfig, logger: StructuredLogger) -> Self {
        let runner = Arc::new(ProcessRunner::new(config.command_timeout()));
        Self::with_runner(config, runner, logger)
    }

    pub fn with_runner(
        config: &PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        logger: StructuredLogger,
    ) -> Self {
        let gateway = Gateway::new(runner, config.docker_bin.clone());
        let inventory = InventoryReader::new(gateway.clone(), config.crictl_bin.clone());
        let resolver = ProcessResolver::new(&config.cgroup_root, &config.proc_root)
            .with_policy(config.vanished_pid_policy)
            .with_logger(logger.clone());

        Self {
            gateway,
            inventory,
            resolver,
            internal_label_prefix: config.internal_label_prefix.clone(),
            logger,
        }
    }

    /// Process groups of every ready pod matching `pod_filter` on every node
    /// matching `node_filter`
    ///
    /// Fails with `NoNodesFound` when no node matches. An empty pod filter
    /// matches all pods.
    pub async fn list_processes(
        &self,
        node_filter: &str,
        pod_filter: &str,
    ) -> Result<Vec<ProcessGroup>> {
        self.logger.log_run_started(node_filter, pod_filter);

        let nodes = discover_nodes(&self.gateway, node_filter).await?;
        let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        self.logger.log_nodes_discovered(node_filter, &names);

        let mut tasks = JoinSet::new();
        for (index, node) in nodes.iter().cloned().enumerate() {
            let pipeline = self.clone();
            let pod_filter = pod_filter.to_string();
            tasks.spawn(async move {
                let result = pipeline.process_node(&node, &pod_filter).await;
                (index, result)
            });
        }

        let mut per_node: Vec<Option<Result<Vec<ProcessGroup>>>> =
            (0..nodes.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            };
            per_node[index] = Some(result);
        }

        let mut groups = Vec::new();
        for (node, result) in nodes.iter().zip(per_node) {
            match result {
                Some(Ok(node_groups)) => groups.extend(node_groups),
                Some(Err(e)) => {
                    self.logger.log_node_failed(&node.name, &e);
                    return Err(e);
                }
                None => {}
            }
        }

        Ok(groups)
    }

    async fn process_node(&self, node: &Node, pod_filter: &str) -> Result<Vec<ProcessGroup>> {
        let started = Instant::now();

        let inventory = self.inventory.collect(node, pod_filter).await?;
        self.logger.log_inventory_collected(
            &node.name,
            inventory.images.len(),
            inventory.pods.len(),
            inventory.containers.len(),
        );

        let scan = self
            .resolver
            .scan(node)
            .await
            .map_err(|e| KindPsError::cgroup_walk(&node.name, e))?;
        let mut pids = HashMap::new();
        for container in containers_of_ready_pods(&inventory) {
            let records = self
                .resolver
                .resolve_in(node, &scan, &container.id)
                .await
                .map_err(|e| KindPsError::process_resolution(&node.name, &container.name, e))?;
            pids.insert(container.id.clone(), records);
        }

        let groups = correlate(node, &inventory, &pids, &self.internal_label_prefix)?;
        let processes = groups.iter().map(|g| g.pids.len()).sum();
        self.logger
            .log_process_groups_resolved(&node.name, groups.len(), processes, started.elapsed());

        Ok(groups)
    }
}
