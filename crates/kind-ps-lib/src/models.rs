//! Core data models for process discovery

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Host-level container running a whole kind cluster node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub name: String,
}

/// Container image known to a node's runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    /// Repo tags followed by repo digests
    pub tags: Vec<String>,
}

impl Image {
    /// Preferred display tag: the first repo tag, else the first repo digest
    pub fn primary_tag(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }
}

/// Pod sandbox lifecycle state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodState {
    Pending,
    Ready,
    NotReady,
    Other,
}

impl PodState {
    pub fn from_cri(state: &str) -> Self {
        match state {
            "SANDBOX_READY" => Self::Ready,
            "SANDBOX_NOTREADY" => Self::NotReady,
            "SANDBOX_PENDING" => Self::Pending,
            _ => Self::Other,
        }
    }
}

/// Pod sandbox known to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub id: String,
    pub name: String,
    pub state: PodState,
    pub labels: BTreeMap<String, String>,
}

/// Container as known to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub pod_id: String,
    pub image_ref: String,
    /// Creation time in nanoseconds since the Unix epoch
    pub created_at: i64,
}

/// One host process believed to belong to a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: String,
    pub cmd: String,
}

/// Joined view of a container and the host processes running inside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessGroup {
    pub node: String,
    pub pod: String,
    pub container: String,
    pub image: String,
    /// ISO-8601 creation time in UTC
    pub created: String,
    pub pids: Vec<ProcessRecord>,
    pub labels: BTreeMap<String, String>,
}
