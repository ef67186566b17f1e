//! Node discovery
//!
//! Lists the host-level docker containers that back kind cluster nodes.
//! Name matching is done by `docker ps --filter`, never here.

use crate::error::{KindPsError, Result};
use crate::exec::Gateway;
use crate::models::Node;
use serde::Deserialize;
use tracing::debug;

/// One line of `docker ps --format json`
#[derive(Debug, Deserialize)]
struct DockerPsEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
}

/// Parse newline-delimited `docker ps` JSON, keeping the tool's order
pub fn parse_docker_ps(stdout: &str) -> Result<Vec<Node>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let entry: DockerPsEntry =
                serde_json::from_str(line).map_err(|source| KindPsError::Parse {
                    what: "docker ps output",
                    source,
                })?;
            Ok(Node {
                id: entry.id,
                name: entry.names,
            })
        })
        .collect()
}

/// Find kind nodes whose container name matches `name_filter`
///
/// An empty result is an error: nothing downstream can run without nodes.
pub async fn discover_nodes(gateway: &Gateway, name_filter: &str) -> Result<Vec<Node>> {
    let filter = format!("name={}", name_filter);
    let stdout = gateway
        .docker(&["ps", "--no-trunc", "--format", "json", "--filter", &filter])
        .await?;

    let nodes = parse_docker_ps(&stdout)?;
    debug!(filter = %name_filter, count = nodes.len(), "Listed node containers");

    if nodes.is_empty() {
        return Err(KindPsError::NoNodesFound {
            filter: name_filter.to_string(),
        });
    }

    Ok(nodes)
}
