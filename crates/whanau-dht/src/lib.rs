//! Whanau DHT - Sybil-resistant routing built from random walks
//!
//! Every node samples the peer graph with fixed-length random walks and
//! assembles, per layer, an identifier, a finger table and a successor
//! table. Lookups narrow toward a key through the fingers and answer from
//! the successor tables.

pub mod lookup;
pub mod node;
pub mod routing;
pub mod rpc;
pub mod setup;
pub mod storage;

pub use node::WhanauNode;
pub use routing::RoutingTables;
pub use setup::SetupReport;
pub use storage::RecordStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use whanau_core::proto::ResultKind;

#[derive(Error, Debug)]
pub enum DhtError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Layer {layer} not ready")]
    NotReady { layer: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Node has no neighbors")]
    NoNeighbors,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl DhtError {
    /// The wire status reported for this error
    pub fn kind(&self) -> ResultKind {
        match self {
            DhtError::Unreachable(_) => ResultKind::Unreachable,
            DhtError::NotFound(_) | DhtError::NotReady { .. } | DhtError::NoNeighbors => {
                ResultKind::NotFound
            }
            DhtError::InvalidArgument(_) | DhtError::Protocol(_) => ResultKind::InvalidArgument,
        }
    }

    /// Rebuild an error from a non-success wire status
    pub fn from_kind(kind: ResultKind, context: impl Into<String>) -> Self {
        let context = context.into();
        match kind {
            ResultKind::Unreachable => DhtError::Unreachable(context),
            ResultKind::NotFound => DhtError::NotFound(context),
            ResultKind::InvalidArgument => DhtError::InvalidArgument(context),
            ResultKind::Success => DhtError::Protocol(format!("unexpected success: {}", context)),
        }
    }
}

impl From<whanau_core::Error> for DhtError {
    fn from(err: whanau_core::Error) -> Self {
        match err {
            whanau_core::Error::Unreachable(peer) => DhtError::Unreachable(peer),
            other => DhtError::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DhtError>;

/// Setup and lookup parameters, fixed at node construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhanauConfig {
    /// Number of layers
    pub nlayers: usize,
    /// Finger table size per layer
    pub rf: usize,
    /// Random walk length
    pub w: u32,
    /// Number of records sampled into the db
    pub rd: usize,
    /// Number of nodes sampled per successor table
    pub rs: usize,
    /// Successor records pulled from each sampled node
    pub t: usize,
    /// Extra attempts per sample slot before it is dropped
    pub sample_retries: usize,
    /// Fingers queried per lookup try
    pub max_query_attempts: usize,
    /// Lookup tries delegated to random-walk peers after the local try
    pub max_delegations: usize,
    /// RNG seed; mixed with the node address so nodes differ
    pub seed: Option<u64>,
}

impl Default for WhanauConfig {
    fn default() -> Self {
        Self {
            nlayers: 4,
            rf: 7,
            w: 10,
            rd: 14,
            rs: 35,
            t: 5,
            sample_retries: 1,
            max_query_attempts: 8,
            max_delegations: 2,
            seed: None,
        }
    }
}

/// Multiplier on the analytic walk length and successor sample count
pub const WALK_CONSTANT: usize = 5;

impl WhanauConfig {
    /// Derive parameters for `nodes` peers holding `keys_per_node` records each
    pub fn for_network(nodes: usize, keys_per_node: usize) -> Self {
        let records = (nodes * keys_per_node).max(1) as f64;
        let sqrt = records.sqrt() as usize;
        let walk = WALK_CONSTANT * (nodes.max(1) as f64).ln() as usize;

        Self {
            nlayers: records.ln() as usize + 1,
            rf: sqrt.max(1),
            w: walk.max(1) as u32,
            rd: (2 * sqrt).max(1),
            rs: (WALK_CONSTANT * sqrt).max(1),
            t: 5,
            ..Self::default()
        }
    }

    /// Reject parameters that cannot produce a usable table
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("nlayers", self.nlayers),
            ("rf", self.rf),
            ("w", self.w as usize),
            ("rd", self.rd),
            ("rs", self.rs),
            ("t", self.t),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(DhtError::InvalidArgument(format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }
}
