//! Remote command runner interface, ssh implementation and mock.
//!
//! The runner abstracts a single lifecycle command against a single node:
//! - `cd <workload dir> && docker compose <start|stop>` over ssh
//! - password auth through `sshpass` when the node carries a credential
//!
//! A mock implementation is provided for testing and dry runs.

use std::collections::HashSet;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::fleet::Node;

/// Lifecycle action for a workload's compose project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => write!(f, "start"),
            Action::Stop => write!(f, "stop"),
        }
    }
}

/// Errors from remote command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("[{node}] docker compose {action} could not be launched: {source}")]
    Spawn {
        node: String,
        action: Action,
        #[source]
        source: std::io::Error,
    },

    /// `output` holds stdout followed by stderr; the streams are not interleaved.
    #[error("[{node}] docker compose {action} failed: {status}\n{output}")]
    Failed {
        node: String,
        action: Action,
        status: ExitStatus,
        output: String,
    },

    #[error("[{node}] docker compose {action} failed: {reason}")]
    Rejected {
        node: String,
        action: Action,
        reason: String,
    },
}

/// Runs one lifecycle command on one node.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, node: &Node, workload_dir: &str, action: Action)
        -> Result<(), CommandError>;
}

/// Shell command executed on the remote node.
pub fn remote_command(workload_dir: &str, action: Action) -> String {
    format!("cd {} && docker compose {}", workload_dir, action)
}

/// Runner that shells out to `ssh` (and `sshpass` for password auth).
#[derive(Debug, Clone)]
pub struct SshRunner {
    login: String,
    ssh_program: String,
    sshpass_program: String,
}

impl SshRunner {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            ssh_program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
        }
    }

    /// Use a different `ssh` binary for key-authenticated nodes.
    pub fn with_ssh_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    /// Use a different `sshpass` binary for password-authenticated nodes.
    pub fn with_sshpass_program(mut self, program: impl Into<String>) -> Self {
        self.sshpass_program = program.into();
        self
    }

    /// Program and arguments for a command against `node`.
    pub fn argv(&self, node: &Node, workload_dir: &str, action: Action) -> (String, Vec<String>) {
        let target = format!("{}@{}", self.login, node.address);
        let remote = remote_command(workload_dir, action);

        match &node.credential {
            Some(password) => (
                self.sshpass_program.clone(),
                vec![
                    "-p".to_string(),
                    password.clone(),
                    "ssh".to_string(),
                    "-o".to_string(),
                    "StrictHostKeyChecking=no".to_string(),
                    target,
                    remote,
                ],
            ),
            None => (self.ssh_program.clone(), vec![target, remote]),
        }
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(
        &self,
        node: &Node,
        workload_dir: &str,
        action: Action,
    ) -> Result<(), CommandError> {
        let (program, args) = self.argv(node, workload_dir, action);
        debug!(node = %node.address, %action, dir = %workload_dir, "Running remote command");

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                node: node.address.clone(),
                action,
                source,
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(CommandError::Failed {
                node: node.address.clone(),
                action,
                status: output.status,
                output: combined,
            });
        }

        info!(node = %node.address, %action, dir = %workload_dir, "docker compose {}", action);
        Ok(())
    }
}

/// A command observed by [`MockRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Global order in which the command was issued.
    pub seq: u64,
    pub node: String,
    pub workload_dir: String,
    pub action: Action,
}

/// Mock runner for testing and development.
pub struct MockRunner {
    /// Counter for ordering invocations.
    seq: AtomicU64,

    /// Every command issued, sorted by `seq` on read.
    invocations: Mutex<Vec<Invocation>>,

    /// Nodes whose commands "fail".
    failing_nodes: HashSet<String>,

    /// Simulated round-trip time.
    delay: Duration,
}

impl MockRunner {
    /// Create a mock runner where every command succeeds.
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            invocations: Mutex::new(Vec::new()),
            failing_nodes: HashSet::new(),
            delay: Duration::ZERO,
        }
    }

    /// Make every command against `address` fail.
    pub fn fail_node(mut self, address: impl Into<String>) -> Self {
        self.failing_nodes.insert(address.into());
        self
    }

    /// Sleep this long inside every command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Snapshot of recorded commands sorted by issue order.
    pub fn invocations(&self) -> Vec<Invocation> {
        let mut recorded = self
            .invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        recorded.sort_by_key(|i| i.seq);
        recorded
    }

    /// Recorded commands for a single node, in issue order.
    pub fn invocations_for(&self, address: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.node == address)
            .collect()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        node: &Node,
        workload_dir: &str,
        action: Action,
    ) -> Result<(), CommandError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        info!(node = %node.address, %action, dir = %workload_dir, "[MOCK] docker compose");

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Invocation {
                seq,
                node: node.address.clone(),
                workload_dir: workload_dir.to_string(),
                action,
            });

        if self.failing_nodes.contains(&node.address) {
            return Err(CommandError::Rejected {
                node: node.address.clone(),
                action,
                reason: "mock runner configured to fail".to_string(),
            });
        }

        Ok(())
    }
}
