//! Error taxonomy for the process discovery pipeline

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KindPsError>;

/// Errors raised while correlating cluster workloads with host processes
#[derive(Debug, Error)]
pub enum KindPsError {
    /// The external binary could not be started at all
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external command ran but exited non-zero
    #[error("`{command}` failed with exit code {}: {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()), stderr.trim())]
    Command {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    /// Structured output did not match the expected shape
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("no nodes found for filter {filter:?}")]
    NoNodesFound { filter: String },

    /// One of the runtime reads (images, pods, containers) failed for a node
    #[error("failed to read runtime inventory from node {node}: {source}")]
    Inventory {
        node: String,
        #[source]
        source: Box<KindPsError>,
    },

    #[error("container {container} on node {node} references unknown image {image}")]
    ImageNotFound {
        node: String,
        container: String,
        image: String,
    },

    /// The kubelet cgroup hierarchy of a node could not be walked
    #[error("failed to walk kubelet cgroups of node {node}: {source}")]
    CgroupWalk {
        node: String,
        #[source]
        source: Box<KindPsError>,
    },

    #[error("failed to resolve processes of container {container} on node {node}: {source}")]
    ProcessResolution {
        node: String,
        container: String,
        #[source]
        source: Box<KindPsError>,
    },

    /// A PID listed in cgroup.procs exited before /proc could be read
    #[error("process {pid} of container {container} exited before its command line was read")]
    ProcessReadRace { pid: String, container: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl KindPsError {
    pub(crate) fn inventory(node: impl Into<String>, source: KindPsError) -> Self {
        Self::Inventory {
            node: node.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn cgroup_walk(node: impl Into<String>, source: KindPsError) -> Self {
        Self::CgroupWalk {
            node: node.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn process_resolution(
        node: impl Into<String>,
        container: impl Into<String>,
        source: KindPsError,
    ) -> Self {
        Self::ProcessResolution {
            node: node.into(),
            container: container.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
