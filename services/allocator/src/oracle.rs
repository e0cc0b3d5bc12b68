//! Demand oracle client.
//!
//! The oracle reports whether an order is currently assigned to a prover:
//! `GET <api_endpoint>?prover=<address>` answers `{"assigned": bool}`.
//! Only transport failures and undecodable bodies are errors; the HTTP status
//! is not checked.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::fleet::Workload;

/// Errors from a demand query.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("undecodable response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Response body of a demand query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AssignedOrder {
    pub assigned: bool,
}

/// Source of demand signals.
#[async_trait]
pub trait DemandOracle: Send + Sync {
    /// Whether an order is currently assigned to `workload`.
    async fn order_assigned(&self, workload: Workload) -> Result<bool, OracleError>;
}

/// HTTP oracle client.
pub struct HttpDemandOracle {
    client: reqwest::Client,
    api_endpoint: String,
    prover1_address: String,
    prover2_address: String,
}

impl HttpDemandOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_endpoint: config.api_endpoint.clone(),
            prover1_address: config.prover1_address.clone(),
            prover2_address: config.prover2_address.clone(),
        })
    }

    fn prover_address(&self, workload: Workload) -> &str {
        match workload {
            Workload::Prover1 => &self.prover1_address,
            Workload::Prover2 => &self.prover2_address,
        }
    }
}

#[async_trait]
impl DemandOracle for HttpDemandOracle {
    async fn order_assigned(&self, workload: Workload) -> Result<bool, OracleError> {
        let prover = self.prover_address(workload);
        debug!(url = %self.api_endpoint, %prover, "Querying demand oracle");

        let response = self
            .client
            .get(&self.api_endpoint)
            .query(&[("prover", prover)])
            .send()
            .await?;

        // The body decides, whatever the status.
        let status = response.status();
        let body = response.text().await?;
        let order: AssignedOrder = serde_json::from_str(&body).map_err(|e| {
            warn!(%status, body = %body, %workload, "Undecodable demand response");
            OracleError::Decode(e)
        })?;
        debug!(%workload, %status, assigned = order.assigned, "Demand query answered");

        Ok(order.assigned)
    }
}
