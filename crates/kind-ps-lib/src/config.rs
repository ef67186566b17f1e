//! Pipeline configuration

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// What to do when a PID disappears between the cgroup listing and the /proc read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VanishedPidPolicy {
    /// Drop the PID and log a warning
    #[default]
    Skip,
    /// Fail resolution for the container
    Abort,
}

/// Settings shared by every stage of the pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Docker CLI used to list and exec into kind nodes
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// crictl binary inside the node
    #[serde(default = "default_crictl_bin")]
    pub crictl_bin: String,

    /// Host cgroup v2 mount point
    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    /// Host procfs mount point
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Upper bound for each external command in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Pod labels with this prefix are kubelet bookkeeping and get dropped
    #[serde(default = "default_label_prefix")]
    pub internal_label_prefix: String,

    #[serde(default)]
    pub vanished_pid_policy: VanishedPidPolicy,
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_crictl_bin() -> String {
    "crictl".to_string()
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_command_timeout() -> u64 {
    30
}

fn default_label_prefix() -> String {
    "io.kubernetes.pod.".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
            crictl_bin: default_crictl_bin(),
            cgroup_root: default_cgroup_root(),
            proc_root: default_proc_root(),
            command_timeout_secs: default_command_timeout(),
            internal_label_prefix: default_label_prefix(),
            vanished_pid_policy: VanishedPidPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.docker_bin, "docker");
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.vanished_pid_policy, VanishedPidPolicy::Skip);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"proc_root": "/host/proc", "vanished_pid_policy": "abort"}"#,
        )
        .unwrap();
        assert_eq!(config.proc_root, PathBuf::from("/host/proc"));
        assert_eq!(config.vanished_pid_policy, VanishedPidPolicy::Abort);
        assert_eq!(config.crictl_bin, "crictl");
    }
}
