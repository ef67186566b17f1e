//! Command gateway for the host docker CLI and for commands run inside kind nodes
//!
//! Only captures output; parsing belongs to the callers.

use crate::error::{KindPsError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs an external command and returns its stdout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[String]) -> Result<String>;
}

/// Runs commands as child processes with a per-command timeout
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String]) -> Result<String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| KindPsError::Spawn {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            })?;
        let command_line = argv.join(" ");
        debug!(command = %command_line, "Executing");

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(result) => result.map_err(|source| KindPsError::Spawn {
                program: program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(KindPsError::CommandTimeout {
                    command: command_line,
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(KindPsError::Command {
                command: command_line,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Entry point for every external invocation the pipeline makes
#[derive(Clone)]
pub struct Gateway {
    runner: Arc<dyn CommandRunner>,
    docker_bin: String,
}

impl Gateway {
    pub fn new(runner: Arc<dyn CommandRunner>, docker_bin: impl Into<String>) -> Self {
        Self {
            runner,
            docker_bin: docker_bin.into(),
        }
    }

    /// Run a docker subcommand on the host
    pub async fn docker(&self, args: &[&str]) -> Result<String> {
        let argv: Vec<String> = std::iter::once(self.docker_bin.as_str())
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        self.runner.run(&argv).await
    }

    /// Run a command inside the node container identified by `node_id`
    pub async fn execute(&self, node_id: &str, command: &[&str]) -> Result<String> {
        let mut args = Vec::with_capacity(command.len() + 2);
        args.push("exec");
        args.push(node_id);
        args.extend_from_slice(command);
        self.docker(&args).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner standing in for docker/crictl

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: Mutex<HashMap<String, std::result::Result<String, (i32, String)>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, command: &str, stdout: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(command.to_string(), Ok(stdout.to_string()));
            self
        }

        pub fn fail(self, command: &str, exit_code: i32, stderr: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(command.to_string(), Err((exit_code, stderr.to_string())));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, argv: &[String]) -> Result<String> {
            let command = argv.join(" ");
            self.calls.lock().unwrap().push(command.clone());
            let response = self.responses.lock().unwrap().get(&command).cloned();
            match response {
                Some(Ok(stdout)) => Ok(stdout),
                Some(Err((code, stderr))) => Err(KindPsError::Command {
                    command,
                    exit_code: Some(code),
                    stderr,
                }),
                None => Err(KindPsError::Command {
                    command,
                    exit_code: Some(127),
                    stderr: "unscripted command".to_string(),
                }),
            }
        }
    }
}
