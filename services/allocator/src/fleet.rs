//! Fleet model and concurrent fan-out executor.
//!
//! The fleet is a fixed, ordered set of nodes. A transition is expressed as
//! one [`NodePlan`] per node; the [`FleetExecutor`] runs every plan on its own
//! task, stopping before starting on each node, and waits for all of them.
//! A failing node never aborts its siblings.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::runner::{Action, CommandRunner};

/// One of the two mutually exclusive workloads a node can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workload {
    Prover1,
    Prover2,
}

impl Workload {
    /// The workload this one excludes.
    pub fn other(self) -> Self {
        match self {
            Workload::Prover1 => Workload::Prover2,
            Workload::Prover2 => Workload::Prover1,
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workload::Prover1 => write!(f, "prover 1"),
            Workload::Prover2 => write!(f, "prover 2"),
        }
    }
}

/// Remote working directories, one per workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadDirs {
    pub prover1: String,
    pub prover2: String,
}

impl WorkloadDirs {
    pub fn dir(&self, workload: Workload) -> &str {
        match workload {
            Workload::Prover1 => &self.prover1,
            Workload::Prover2 => &self.prover2,
        }
    }
}

impl Default for WorkloadDirs {
    fn default() -> Self {
        Self {
            prover1: "~/prover-1-aux-cluster".to_string(),
            prover2: "~/prover-2-aux-cluster".to_string(),
        }
    }
}

/// A managed machine.
#[derive(Clone, PartialEq, Eq)]
pub struct Node {
    /// Network address used to reach the node.
    pub address: String,

    /// Password for the remote channel. `None` means key-based auth.
    pub credential: Option<String>,
}

impl Node {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

// Keeps credentials out of logs.
impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What to do on a single node during a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePlan {
    pub node: Node,
    pub stop: Option<Workload>,
    pub start: Option<Workload>,
}

/// Plan that moves every node onto `target`.
pub fn single_plan(nodes: &[Node], target: Workload) -> Vec<NodePlan> {
    nodes
        .iter()
        .map(|node| NodePlan {
            node: node.clone(),
            stop: Some(target.other()),
            start: Some(target),
        })
        .collect()
}

/// Index of the first node assigned to prover 2 in split mode.
///
/// For odd fleets prover 2 receives the larger half.
pub fn split_point(node_count: usize) -> usize {
    node_count / 2
}

/// Plan that runs prover 1 on the first half of the fleet and prover 2 on the rest.
pub fn split_plan(nodes: &[Node]) -> Vec<NodePlan> {
    let mid = split_point(nodes.len());
    nodes
        .iter()
        .enumerate()
        .map(|(idx, node)| {
            let start = if idx < mid {
                Workload::Prover1
            } else {
                Workload::Prover2
            };
            NodePlan {
                node: node.clone(),
                stop: Some(start.other()),
                start: Some(start),
            }
        })
        .collect()
}

/// Result of one command on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    pub node: String,
    pub workload: Workload,
    pub action: Action,
    /// `Err` carries the rendered command error.
    pub result: Result<(), String>,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs node plans concurrently through a [`CommandRunner`].
#[derive(Clone)]
pub struct FleetExecutor {
    runner: Arc<dyn CommandRunner>,
    dirs: WorkloadDirs,
}

impl FleetExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, dirs: WorkloadDirs) -> Self {
        Self { runner, dirs }
    }

    /// Execute every plan and wait for all nodes to finish.
    ///
    /// Outcomes are returned in plan order, stop before start for each node.
    pub async fn execute(&self, plans: Vec<NodePlan>) -> Vec<NodeOutcome> {
        let mut tasks = JoinSet::new();

        for (idx, plan) in plans.into_iter().enumerate() {
            let runner = Arc::clone(&self.runner);
            let dirs = self.dirs.clone();
            tasks.spawn(async move {
                let outcomes = run_node_plan(runner.as_ref(), &dirs, &plan).await;
                (idx, outcomes)
            });
        }

        let mut collected = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => collected.push(entry),
                Err(e) => error!(error = %e, "Node task panicked"),
            }
        }

        collected.sort_by_key(|(idx, _)| *idx);
        collected
            .into_iter()
            .flat_map(|(_, outcomes)| outcomes)
            .collect()
    }
}

async fn run_node_plan(
    runner: &dyn CommandRunner,
    dirs: &WorkloadDirs,
    plan: &NodePlan,
) -> Vec<NodeOutcome> {
    let steps = [
        plan.stop.map(|w| (w, Action::Stop)),
        plan.start.map(|w| (w, Action::Start)),
    ];

    let mut outcomes = Vec::with_capacity(2);
    for (workload, action) in steps.into_iter().flatten() {
        let result = runner.run(&plan.node, dirs.dir(workload), action).await;
        match &result {
            Ok(()) => debug!(
                node = %plan.node.address,
                %action,
                %workload,
                "Node command succeeded"
            ),
            Err(e) => warn!(
                node = %plan.node.address,
                %action,
                %workload,
                error = %e,
                "Node command failed"
            ),
        }
        outcomes.push(NodeOutcome {
            node: plan.node.address.clone(),
            workload,
            action,
            result: result.map_err(|e| e.to_string()),
        });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;

    fn nodes(n: usize) -> Vec<Node> {
        (0..n).map(|i| Node::new(format!("10.0.0.{}", i + 1))).collect()
    }

    #[test]
    fn test_split_point_odd_fleet_favors_prover2() {
        assert_eq!(split_point(0), 0);
        assert_eq!(split_point(1), 0);
        assert_eq!(split_point(2), 1);
        assert_eq!(split_point(5), 2);
    }

    #[test]
    fn test_split_plan_partitions_in_order() {
        let plan = split_plan(&nodes(3));
        let starts: Vec<_> = plan.iter().map(|p| p.start).collect();
        assert_eq!(
            starts,
            vec![
                Some(Workload::Prover1),
                Some(Workload::Prover2),
                Some(Workload::Prover2)
            ]
        );
        assert_eq!(plan[0].stop, Some(Workload::Prover2));
        assert_eq!(plan[2].stop, Some(Workload::Prover1));
    }

    #[test]
    fn test_single_plan_stops_other_workload() {
        let plan = single_plan(&nodes(2), Workload::Prover2);
        assert!(plan
            .iter()
            .all(|p| p.stop == Some(Workload::Prover1) && p.start == Some(Workload::Prover2)));
    }

    #[test]
    fn test_node_debug_redacts_credential() {
        let node = Node::new("10.0.0.1").with_credential("hunter2");
        let rendered = format!("{:?}", node);
        assert!(rendered.contains("10.0.0.1"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_execute_skips_missing_steps() {
        let runner = Arc::new(MockRunner::new());
        let executor = FleetExecutor::new(runner.clone(), WorkloadDirs::default());

        let plans = vec![NodePlan {
            node: Node::new("10.0.0.1"),
            stop: None,
            start: Some(Workload::Prover1),
        }];
        let outcomes = executor.execute(plans).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].action, Action::Start);
        assert_eq!(runner.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_continues_past_failures() {
        let runner = Arc::new(MockRunner::new().fail_node("10.0.0.1"));
        let executor = FleetExecutor::new(runner.clone(), WorkloadDirs::default());

        let outcomes = executor
            .execute(single_plan(&nodes(2), Workload::Prover1))
            .await;

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[..2].iter().all(|o| !o.is_success()));
        assert!(outcomes[2..].iter().all(NodeOutcome::is_success));
        assert_eq!(runner.invocations().len(), 4);
    }
}
