//! Host PID resolution through the cgroup v2 hierarchy
//!
//! Each kind node runs under its own docker scope on the host:
//! `<cgroup_root>/system.slice/docker-<node_id>.scope`. The kubelet inside the
//! node nests pod and container cgroups below `kubelet.slice/kubelet-kubepods.slice`,
//! and every container cgroup directory name embeds the CRI container id.
//!
//! A container's processes are the union of all `cgroup.procs` files whose
//! directory path contains the container id as a plain substring.

use crate::config::VanishedPidPolicy;
use crate::error::{KindPsError, Result};
use crate::models::{Node, ProcessRecord};
use crate::observability::StructuredLogger;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tracing::debug;

const PROCS_FILE: &str = "cgroup.procs";

/// Every `cgroup.procs` file found below one node's kubelet hierarchy
#[derive(Debug, Clone, Default)]
pub struct CgroupScan {
    procs_files: Vec<PathBuf>,
}

impl CgroupScan {
    pub fn len(&self) -> usize {
        self.procs_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs_files.is_empty()
    }

    /// procs files whose containing directory mentions `container_id`
    pub fn matching<'a>(&'a self, container_id: &'a str) -> impl Iterator<Item = &'a Path> + 'a {
        self.procs_files.iter().map(PathBuf::as_path).filter(move |file| {
            file.parent()
                .map(|dir| dir.to_string_lossy().contains(container_id))
                .unwrap_or(false)
        })
    }
}

/// Maps CRI container ids to host processes
#[derive(Debug, Clone)]
pub struct ProcessResolver {
    cgroup_root: PathBuf,
    proc_path: PathBuf,
    policy: VanishedPidPolicy,
    logger: StructuredLogger,
}

impl ProcessResolver {
    pub fn new(cgroup_root: impl Into<PathBuf>, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_path: proc_path.into(),
            policy: VanishedPidPolicy::default(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_policy(mut self, policy: VanishedPidPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// kubelet pods slice for the node whose docker container id is `node_id`
    pub fn kubepods_path(&self, node_id: &str) -> PathBuf {
        self.cgroup_root
            .join("system.slice")
            .join(format!("docker-{}.scope", node_id))
            .join("kubelet.slice")
            .join("kubelet-kubepods.slice")
    }

    /// Walk the node's kubelet hierarchy once and remember every procs file
    ///
    /// A missing hierarchy yields an empty scan.
    pub async fn scan(&self, node: &Node) -> Result<CgroupScan> {
        let root = self.kubepods_path(&node.id);
        if fs::metadata(&root).await.is_err() {
            debug!(node = %node.name, path = %root.display(), "No kubelet cgroup hierarchy");
            return Ok(CgroupScan::default());
        }

        let mut procs_files = Vec::new();
        Self::scan_dir(&root, &mut procs_files).await?;
        debug!(node = %node.name, files = procs_files.len(), "Scanned kubelet cgroups");

        Ok(CgroupScan { procs_files })
    }

    fn scan_dir<'a>(
        path: &'a Path,
        procs_files: &'a mut Vec<PathBuf>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(path).await {
                Ok(entries) => entries,
                // cgroup removed while walking
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(KindPsError::io(path, e)),
            };

            let mut subdirs = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| KindPsError::io(path, e))?
            {
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(KindPsError::io(entry.path(), e)),
                };

                if file_type.is_dir() {
                    subdirs.push(entry.path());
                } else if entry.file_name() == PROCS_FILE {
                    procs_files.push(entry.path());
                }
            }

            subdirs.sort();
            for dir in subdirs {
                Self::scan_dir(&dir, procs_files).await?;
            }

            Ok(())
        })
    }

    /// Host processes of `container_id` on `node`
    pub async fn resolve_pids(&self, node: &Node, container_id: &str) -> Result<Vec<ProcessRecord>> {
        let scan = self.scan(node).await?;
        self.resolve_in(node, &scan, container_id).await
    }

    /// Same as [`resolve_pids`](Self::resolve_pids) against an existing scan
    ///
    /// PIDs keep file order within each procs file.
    pub async fn resolve_in(
        &self,
        node: &Node,
        scan: &CgroupScan,
        container_id: &str,
    ) -> Result<Vec<ProcessRecord>> {
        let mut records = Vec::new();

        for procs_file in scan.matching(container_id) {
            let content = match fs::read_to_string(procs_file).await {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %procs_file.display(), "cgroup vanished before read");
                    continue;
                }
                Err(e) => return Err(KindPsError::io(procs_file, e)),
            };

            for pid in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                match self.read_cmdline(pid).await? {
                    Some(cmd) => records.push(ProcessRecord {
                        pid: pid.to_string(),
                        cmd,
                    }),
                    None => match self.policy {
                        VanishedPidPolicy::Skip => {
                            self.logger.log_pid_vanished(&node.name, container_id, pid);
                        }
                        VanishedPidPolicy::Abort => {
                            return Err(KindPsError::ProcessReadRace {
                                pid: pid.to_string(),
                                container: container_id.to_string(),
                            });
                        }
                    },
                }
            }
        }

        Ok(records)
    }

    /// `/proc/<pid>/cmdline` with NULs turned into spaces, or `None` if the
    /// process is gone
    async fn read_cmdline(&self, pid: &str) -> Result<Option<String>> {
        let path = self.proc_path.join(pid).join("cmdline");
        match fs::read(&path).await {
            Ok(raw) => Ok(Some(Self::format_cmdline(&raw))),
            // ESRCH: procfs read racing with process exit
            Err(e) if e.kind() == ErrorKind::NotFound || e.raw_os_error() == Some(libc::ESRCH) => {
                Ok(None)
            }
            Err(e) => Err(KindPsError::io(path, e)),
        }
    }

    pub fn format_cmdline(raw: &[u8]) -> String {
        let text: String = String::from_utf8_lossy(raw)
            .chars()
            .map(|c| if c == '\0' { ' ' } else { c })
            .collect();
        text.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const NODE_ID: &str = "f00dcafe";

    struct FakeHost {
        _dir: TempDir,
        cgroup_root: PathBuf,
        proc_root: PathBuf,
    }

    impl FakeHost {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let cgroup_root = dir.path().join("cgroup");
            let proc_root = dir.path().join("proc");
            fs::create_dir_all(&cgroup_root).await.unwrap();
            fs::create_dir_all(&proc_root).await.unwrap();
            Self {
                _dir: dir,
                cgroup_root,
                proc_root,
            }
        }

        fn resolver(&self) -> ProcessResolver {
            ProcessResolver::new(&self.cgroup_root, &self.proc_root)
        }

        /// Create a container cgroup below the node's kubelet slice
        async fn add_cgroup(&self, relative: &str, pids: &[&str]) {
            let dir = self.resolver().kubepods_path(NODE_ID).join(relative);
            fs::create_dir_all(&dir).await.unwrap();
            let mut content = pids.join("\n");
            content.push('\n');
            fs::write(dir.join(PROCS_FILE), content).await.unwrap();
        }

        async fn add_process(&self, pid: &str, argv: &[&str]) {
            let dir = self.proc_root.join(pid);
            fs::create_dir_all(&dir).await.unwrap();
            let mut raw = argv.join("\0");
            raw.push('\0');
            fs::write(dir.join("cmdline"), raw).await.unwrap();
        }
    }

    fn node() -> Node {
        Node {
            id: NODE_ID.to_string(),
            name: "kind-worker".to_string(),
        }
    }

    #[test]
    fn test_kubepods_path() {
        let resolver = ProcessResolver::new("/sys/fs/cgroup", "/proc");
        assert_eq!(
            resolver.kubepods_path("abc"),
            PathBuf::from(
                "/sys/fs/cgroup/system.slice/docker-abc.scope/kubelet.slice/kubelet-kubepods.slice"
            )
        );
    }

    #[test]
    fn test_format_cmdline() {
        assert_eq!(
            ProcessResolver::format_cmdline(b"nginx: master process\0-g\0daemon off;\0"),
            "nginx: master process -g daemon off;"
        );
        assert_eq!(ProcessResolver::format_cmdline(b""), "");
    }

    #[tokio::test]
    async fn test_resolve_pids_reads_cmdlines_in_file_order() {
        let host = FakeHost::new().await;
        host.add_cgroup(
            "kubelet-kubepods-besteffort.slice/kubelet-kubepods-besteffort-pod1.slice/cri-containerd-c0ffee01.scope",
            &["20", "10"],
        )
        .await;
        host.add_process("10", &["/pause"]).await;
        host.add_process("20", &["nginx", "-g", "daemon off;"]).await;

        let records = host.resolver().resolve_pids(&node(), "c0ffee01").await.unwrap();
        assert_eq!(
            records,
            vec![
                ProcessRecord {
                    pid: "20".into(),
                    cmd: "nginx -g daemon off;".into()
                },
                ProcessRecord {
                    pid: "10".into(),
                    cmd: "/pause".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_resolve_pids_unions_all_matching_cgroups() {
        let host = FakeHost::new().await;
        host.add_cgroup("pod1.slice/cri-containerd-c0ffee01.scope", &["10"])
            .await;
        host.add_cgroup("pod1.slice/cri-containerd-c0ffee01.scope/nested", &["11"])
            .await;
        host.add_cgroup("pod1.slice/cri-containerd-c0ffee02.scope", &["30"])
            .await;
        for pid in ["10", "11", "30"] {
            host.add_process(pid, &["sleep", "inf"]).await;
        }

        let records = host.resolver().resolve_pids(&node(), "c0ffee01").await.unwrap();
        let mut pids: Vec<_> = records.into_iter().map(|r| r.pid).collect();
        pids.sort();
        assert_eq!(pids, vec!["10", "11"]);
    }

    #[tokio::test]
    async fn test_resolve_pids_substring_match() {
        // "c0ffee01" is also a substring of "c0ffee010"; the loose match picks up both
        let host = FakeHost::new().await;
        host.add_cgroup("pod.slice/cri-containerd-c0ffee01.scope", &["1"]).await;
        host.add_cgroup("pod.slice/cri-containerd-c0ffee010.scope", &["2"]).await;
        host.add_process("1", &["a"]).await;
        host.add_process("2", &["b"]).await;

        let records = host.resolver().resolve_pids(&node(), "c0ffee01").await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_pids_skips_vanished_process() {
        let host = FakeHost::new().await;
        host.add_cgroup("pod.slice/cri-containerd-c0ffee01.scope", &["10", "20"])
            .await;
        host.add_process("10", &["/app", "--serve"]).await;

        let records = host.resolver().resolve_pids(&node(), "c0ffee01").await.unwrap();
        assert_eq!(
            records,
            vec![ProcessRecord {
                pid: "10".into(),
                cmd: "/app --serve".into()
            }]
        );
    }

    /// Log sink shared between the subscriber and the test
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_resolve_pids_logs_vanished_process() {
        let host = FakeHost::new().await;
        host.add_cgroup("pod.slice/cri-containerd-c0ffee01.scope", &["10", "20"])
            .await;
        host.add_process("10", &["/app"]).await;

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let records = host
            .resolver()
            .with_logger(StructuredLogger::new("run-7"))
            .resolve_pids(&node(), "c0ffee01")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);

        let output = logs.contents();
        let line = output
            .lines()
            .find(|line| line.contains(r#""event":"pid_vanished""#))
            .expect("pid_vanished event");
        assert!(line.contains(r#""run_id":"run-7""#));
        assert!(line.contains(r#""node":"kind-worker""#));
        assert!(line.contains(r#""container_id":"c0ffee01""#));
        assert!(line.contains(r#""pid":"20""#));
        assert!(line.contains(r#""level":"WARN""#));
    }

    #[tokio::test]
    async fn test_resolve_pids_abort_policy() {
        let host = FakeHost::new().await;
        host.add_cgroup("pod.slice/cri-containerd-c0ffee01.scope", &["10", "20"])
            .await;
        host.add_process("10", &["/app"]).await;

        let err = host
            .resolver()
            .with_policy(VanishedPidPolicy::Abort)
            .resolve_pids(&node(), "c0ffee01")
            .await
            .unwrap_err();

        match err {
            KindPsError::ProcessReadRace { pid, container } => {
                assert_eq!(pid, "20");
                assert_eq!(container, "c0ffee01");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_pids_missing_hierarchy() {
        let host = FakeHost::new().await;
        let records = host.resolver().resolve_pids(&node(), "c0ffee01").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_scan_ignores_other_files() {
        let host = FakeHost::new().await;
        host.add_cgroup("pod.slice/cri-containerd-c0ffee01.scope", &["1"]).await;
        let dir = host
            .resolver()
            .kubepods_path(NODE_ID)
            .join("pod.slice/cri-containerd-c0ffee01.scope");
        fs::write(dir.join("cgroup.threads"), "1\n").await.unwrap();
        fs::write(dir.join("memory.current"), "4096\n").await.unwrap();

        let scan = host.resolver().scan(&node()).await.unwrap();
        assert_eq!(scan.len(), 1);
        assert_eq!(scan.matching("c0ffee01").count(), 1);
        assert_eq!(scan.matching("c0ffee02").count(), 0);
    }
}
