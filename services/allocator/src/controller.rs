//! Allocation controller.
//!
//! The controller:
//! - Owns the fleet-wide allocation state
//! - Serializes transitions behind a single lock held for the whole
//!   decide, execute, commit sequence
//! - Commits the target allocation once every node command has finished,
//!   whether or not the commands succeeded

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::fleet::{self, FleetExecutor, Node, NodeOutcome, Workload, WorkloadDirs};
use crate::runner::CommandRunner;

/// What the fleet is intended to be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Allocation {
    /// No transition has happened yet.
    #[default]
    Unassigned,
    /// Every node runs the same workload.
    Single(Workload),
    /// First half on prover 1, the rest on prover 2.
    Split,
}

impl Allocation {
    pub fn active_workload(&self) -> Option<Workload> {
        match self {
            Allocation::Single(workload) => Some(*workload),
            Allocation::Unassigned | Allocation::Split => None,
        }
    }

    pub fn split_active(&self) -> bool {
        matches!(self, Allocation::Split)
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allocation::Unassigned => write!(f, "unassigned"),
            Allocation::Single(workload) => write!(f, "{}", workload),
            Allocation::Split => write!(f, "split"),
        }
    }
}

/// Result of a single transition request.
#[derive(Debug, Clone)]
pub struct TransitionReport {
    /// Allocation before the request.
    pub previous: Allocation,

    /// Allocation after the request.
    pub current: Allocation,

    /// Per-node, per-action outcomes. Empty when the request was a no-op.
    pub outcomes: Vec<NodeOutcome>,
}

impl TransitionReport {
    fn unchanged(state: Allocation) -> Self {
        Self {
            previous: state,
            current: state,
            outcomes: Vec::new(),
        }
    }

    /// Whether any node command was issued.
    pub fn executed(&self) -> bool {
        !self.outcomes.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Controller for the fleet-wide allocation.
pub struct AllocationController {
    nodes: Vec<Node>,
    executor: FleetExecutor,
    state: Mutex<Allocation>,
}

impl AllocationController {
    pub fn new(nodes: Vec<Node>, runner: Arc<dyn CommandRunner>, dirs: WorkloadDirs) -> Self {
        Self {
            nodes,
            executor: FleetExecutor::new(runner, dirs),
            state: Mutex::new(Allocation::Unassigned),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Current allocation. Waits for any in-flight transition.
    pub async fn state(&self) -> Allocation {
        *self.state.lock().await
    }

    /// Run `target` on every node.
    pub async fn switch_to(&self, target: Workload) -> TransitionReport {
        let mut state = self.state.lock().await;
        let previous = *state;

        if previous == Allocation::Single(target) {
            debug!(%target, "Already active, nothing to do");
            return TransitionReport::unchanged(previous);
        }

        info!(from = %previous, "Switching to {}", target);

        let outcomes = self
            .executor
            .execute(fleet::single_plan(&self.nodes, target))
            .await;

        *state = Allocation::Single(target);
        let report = TransitionReport {
            previous,
            current: *state,
            outcomes,
        };
        log_completion(&report);
        info!("{} active on all nodes", target);
        report
    }

    /// Run prover 1 on the first half of the fleet and prover 2 on the rest.
    pub async fn split_to(&self) -> TransitionReport {
        let mut state = self.state.lock().await;
        let previous = *state;

        if previous.split_active() {
            debug!("Split mode already active, nothing to do");
            return TransitionReport::unchanged(previous);
        }

        let mid = fleet::split_point(self.nodes.len());
        info!(
            from = %previous,
            prover1_nodes = mid,
            prover2_nodes = self.nodes.len() - mid,
            "Splitting nodes"
        );

        let outcomes = self.executor.execute(fleet::split_plan(&self.nodes)).await;

        *state = Allocation::Split;
        let report = TransitionReport {
            previous,
            current: *state,
            outcomes,
        };
        log_completion(&report);
        let (first, second) = self.nodes.split_at(mid);
        let prover1: Vec<&str> = first.iter().map(|n| n.address.as_str()).collect();
        let prover2: Vec<&str> = second.iter().map(|n| n.address.as_str()).collect();
        info!(?prover1, ?prover2, "Split mode active");
        report
    }
}

fn log_completion(report: &TransitionReport) {
    let failed = report.failures().count();
    if failed > 0 {
        warn!(
            from = %report.previous,
            to = %report.current,
            failed,
            total = report.outcomes.len(),
            "Transition committed with failed node commands"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{Action, MockRunner};

    fn controller(n: usize) -> (AllocationController, Arc<MockRunner>) {
        let runner = Arc::new(MockRunner::new());
        let nodes = (0..n).map(|i| Node::new(format!("node-{}", i))).collect();
        let controller = AllocationController::new(nodes, runner.clone(), WorkloadDirs::default());
        (controller, runner)
    }

    #[test]
    fn test_allocation_flags() {
        assert_eq!(Allocation::Unassigned.active_workload(), None);
        assert!(!Allocation::Unassigned.split_active());
        assert_eq!(
            Allocation::Single(Workload::Prover2).active_workload(),
            Some(Workload::Prover2)
        );
        assert!(Allocation::Split.split_active());
        assert_eq!(Allocation::Split.active_workload(), None);
    }

    #[tokio::test]
    async fn test_switch_to_commits_target() {
        let (controller, runner) = controller(2);

        let report = controller.switch_to(Workload::Prover1).await;

        assert_eq!(report.previous, Allocation::Unassigned);
        assert_eq!(report.current, Allocation::Single(Workload::Prover1));
        assert_eq!(controller.state().await, Allocation::Single(Workload::Prover1));
        assert_eq!(runner.invocations().len(), 4);
    }

    #[tokio::test]
    async fn test_switch_to_is_idempotent() {
        let (controller, runner) = controller(2);

        controller.switch_to(Workload::Prover2).await;
        let second = controller.switch_to(Workload::Prover2).await;

        assert!(!second.executed());
        assert_eq!(runner.invocations().len(), 4);
    }

    #[tokio::test]
    async fn test_split_to_is_idempotent() {
        let (controller, runner) = controller(3);

        let first = controller.split_to().await;
        let second = controller.split_to().await;

        assert!(first.executed());
        assert!(!second.executed());
        assert_eq!(runner.invocations().len(), 6);
        assert_eq!(controller.state().await, Allocation::Split);
    }

    #[tokio::test]
    async fn test_switch_from_split_stops_other_on_every_node() {
        let (controller, runner) = controller(2);
        controller.split_to().await;

        let report = controller.switch_to(Workload::Prover1).await;

        assert_eq!(report.previous, Allocation::Split);
        let dirs = WorkloadDirs::default();
        let stops: Vec<_> = runner
            .invocations()
            .into_iter()
            .skip(4)
            .filter(|i| i.action == Action::Stop)
            .collect();
        assert_eq!(stops.len(), 2);
        assert!(stops
            .iter()
            .all(|i| i.workload_dir == dirs.dir(Workload::Prover2)));
    }

    #[tokio::test]
    async fn test_empty_fleet_still_commits() {
        let (controller, runner) = controller(0);

        let report = controller.split_to().await;

        assert_eq!(report.current, Allocation::Split);
        assert!(runner.invocations().is_empty());
    }
}
