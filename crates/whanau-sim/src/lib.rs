//! Whanau network simulator
//!
//! Builds an in-process network of Whanau nodes, runs setup on all of them
//! and measures how well the resulting tables cover and resolve the keys.

pub mod cluster;
pub mod config;

pub use cluster::{Cluster, Coverage, LookupStats};
pub use config::Config;

use serde::Serialize;
use std::time::Instant;
use whanau_dht::{SetupReport, WhanauConfig};

/// Everything one simulation run measured
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub nodes: usize,
    pub records: usize,
    pub failed_nodes: Vec<usize>,
    pub params: WhanauConfig,
    /// Reports from the last setup round, in node order
    pub setups: Vec<SetupReport>,
    pub setup_millis: u64,
    pub db_coverage: Coverage,
    pub successor_coverage: Coverage,
    pub lookups: LookupStats,
    pub calls: u64,
    pub failed_calls: u64,
}

/// Build the network `config` describes, set it up and sweep every key
pub async fn run(config: &Config) -> anyhow::Result<SimReport> {
    config.validate()?;
    let params = config.whanau_config();
    let network = &config.network;

    let mut cluster = Cluster::full_mesh(network.nodes, params.clone());
    cluster.install_records(network.keys_per_node, network.seed.unwrap_or_default());
    for &index in &network.failed_nodes {
        cluster.set_down(index, true);
    }

    let started = Instant::now();
    let mut setups = Vec::new();
    for round in 0..network.setup_rounds {
        tracing::info!("Setup round {} of {}", round + 1, network.setup_rounds);
        setups = cluster.setup_all().await?;
    }
    let setup_millis = started.elapsed().as_millis() as u64;

    let lookups = cluster.lookup_sweep(&network.failed_nodes).await?;
    tracing::info!(
        "Lookups: {}/{} found, {} wrong, {} unreachable",
        lookups.found,
        lookups.total,
        lookups.wrong,
        lookups.unreachable
    );

    Ok(SimReport {
        nodes: network.nodes,
        records: cluster.records().len(),
        failed_nodes: network.failed_nodes.clone(),
        params,
        setups,
        setup_millis,
        db_coverage: cluster.db_coverage(),
        successor_coverage: cluster.successor_coverage(),
        lookups,
        calls: cluster.network().call_count(),
        failed_calls: cluster.network().failed_call_count(),
    })
}
