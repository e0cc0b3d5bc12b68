//! Prover allocator library.
//!
//! The allocator decides which of two exclusive prover workloads a fleet of
//! nodes runs, or whether the fleet is split between them, and converges
//! every node over ssh.
//!
//! ## Architecture
//!
//! ```text
//! DemandPoller ── decide() ──> AllocationController ──> FleetExecutor
//!      │                                                    │
//!      └── DemandOracle (HTTP)              CommandRunner (ssh) × N nodes
//! ```
//!
//! ## Modules
//!
//! - `config`: environment configuration
//! - `controller`: allocation state and serialized transitions
//! - `fleet`: node and workload model, concurrent fan-out
//! - `oracle`: demand oracle client
//! - `poller`: periodic decision loop
//! - `runner`: remote lifecycle commands

pub mod config;
pub mod controller;
pub mod fleet;
pub mod oracle;
pub mod poller;
pub mod runner;

// Re-export commonly used types
pub use controller::{Allocation, AllocationController, TransitionReport};
pub use fleet::{FleetExecutor, Node, NodeOutcome, NodePlan, Workload, WorkloadDirs};
pub use poller::{Decision, DemandPoller, PollerConfig};
pub use runner::{Action, CommandRunner, MockRunner, SshRunner};
