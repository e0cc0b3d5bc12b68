//! Demand polling loop.
//!
//! The poller:
//! - Queries the demand oracle for both provers on a fixed interval
//! - Maps the pair of answers to a [`Decision`]
//! - Applies the decision through the allocation controller
//!
//! Any query error forces prover 1, regardless of the other answer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::controller::AllocationController;
use crate::fleet::Workload;
use crate::oracle::{DemandOracle, OracleError};

/// Poller configuration.
pub struct PollerConfig {
    /// Interval between demand queries.
    pub poll_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run one workload everywhere.
    Switch(Workload),
    /// Split the fleet between both workloads.
    Split,
    /// No demand, leave the fleet alone.
    Keep,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Switch(workload) => write!(f, "switch to {}", workload),
            Decision::Split => write!(f, "split"),
            Decision::Keep => write!(f, "keep"),
        }
    }
}

/// Map a pair of demand answers to a decision.
pub fn decide(
    prover1: &Result<bool, OracleError>,
    prover2: &Result<bool, OracleError>,
) -> Decision {
    match (prover1, prover2) {
        (Ok(true), Ok(true)) => Decision::Split,
        (Ok(true), Ok(false)) => Decision::Switch(Workload::Prover1),
        (Ok(false), Ok(true)) => Decision::Switch(Workload::Prover2),
        (Ok(false), Ok(false)) => Decision::Keep,
        _ => Decision::Switch(Workload::Prover1),
    }
}

/// Drives the controller from demand signals.
pub struct DemandPoller {
    oracle: Arc<dyn DemandOracle>,
    controller: Arc<AllocationController>,
    config: PollerConfig,
}

impl DemandPoller {
    pub fn new(
        oracle: Arc<dyn DemandOracle>,
        controller: Arc<AllocationController>,
        config: PollerConfig,
    ) -> Self {
        Self {
            oracle,
            controller,
            config,
        }
    }

    /// Run the polling loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            nodes = self.controller.nodes().len(),
            "Starting demand poller"
        );

        let period = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Demand poller shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single poll cycle and apply its decision.
    pub async fn poll_once(&self) -> Decision {
        let prover1 = self.oracle.order_assigned(Workload::Prover1).await;
        let prover2 = self.oracle.order_assigned(Workload::Prover2).await;

        let decision = decide(&prover1, &prover2);

        match (&prover1, &prover2) {
            (Ok(assigned1), Ok(assigned2)) => {
                info!(prover1 = assigned1, prover2 = assigned2, %decision, "Demand polled");
            }
            _ => {
                warn!(
                    prover1 = ?prover1.as_ref().err().map(ToString::to_string),
                    prover2 = ?prover2.as_ref().err().map(ToString::to_string),
                    "Endpoint error, defaulting to prover 1"
                );
            }
        }

        match decision {
            Decision::Switch(target) => {
                self.controller.switch_to(target).await;
            }
            Decision::Split => {
                self.controller.split_to().await;
            }
            Decision::Keep => {
                let current = self.controller.state().await;
                info!(%current, "No orders, keeping current allocation");
            }
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_error() -> OracleError {
        OracleError::Decode(serde_json::from_str::<bool>("<html>").unwrap_err())
    }

    #[test]
    fn test_poller_config_default() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_decide_demand_pairs() {
        assert_eq!(decide(&Ok(true), &Ok(true)), Decision::Split);
        assert_eq!(
            decide(&Ok(true), &Ok(false)),
            Decision::Switch(Workload::Prover1)
        );
        assert_eq!(
            decide(&Ok(false), &Ok(true)),
            Decision::Switch(Workload::Prover2)
        );
        assert_eq!(decide(&Ok(false), &Ok(false)), Decision::Keep);
    }

    #[test]
    fn test_decide_errors_force_prover1() {
        let fallback = Decision::Switch(Workload::Prover1);
        assert_eq!(decide(&Err(decode_error()), &Ok(true)), fallback);
        assert_eq!(decide(&Ok(false), &Err(decode_error())), fallback);
        assert_eq!(decide(&Ok(true), &Err(decode_error())), fallback);
        assert_eq!(decide(&Err(decode_error()), &Err(decode_error())), fallback);
    }
}
