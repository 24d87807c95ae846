//! An in-process Whanau network
//!
//! Every node lives in the same process and talks through a shared
//! [`MemoryNetwork`]; peers can be taken down to simulate failures.

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use whanau_core::transport::memory::{MemoryNetwork, MemoryTransport};
use whanau_core::{Address, Key, Value, PAXOS_SIZE};
use whanau_dht::{DhtError, SetupReport, WhanauConfig, WhanauNode};

pub type SimNode = Arc<WhanauNode<MemoryTransport>>;

/// Share of all installed keys a set of tables covers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coverage {
    pub covered: usize,
    pub total: usize,
}

impl Coverage {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.covered as f64 / self.total as f64
    }
}

/// Outcome of looking every key up from every node
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LookupStats {
    /// Lookups that returned the installed value
    pub found: usize,
    /// Lookups that returned a value different from the installed one
    pub wrong: usize,
    pub not_found: usize,
    pub unreachable: usize,
    pub total: usize,
}

impl LookupStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.found as f64 / self.total as f64
    }
}

pub struct Cluster {
    network: Arc<MemoryNetwork>,
    nodes: Vec<SimNode>,
    records: BTreeMap<Key, Value>,
}

impl Cluster {
    /// Address of the node at `index`
    pub fn address(index: usize) -> Address {
        Address::new(format!("node-{}", index))
    }

    /// `nodes` peers, each a neighbor of every other
    pub fn full_mesh(nodes: usize, config: WhanauConfig) -> Self {
        let network = MemoryNetwork::new();
        let nodes: Vec<SimNode> = (0..nodes)
            .map(|i| {
                let neighbors = (0..nodes).filter(|j| *j != i).map(Self::address).collect();
                let transport = network.transport_for(Self::address(i));
                Arc::new(WhanauNode::new(neighbors, config.clone(), transport))
            })
            .collect();

        for node in &nodes {
            network.register(node.address().clone(), node.clone());
        }
        tracing::debug!("Built full mesh of {} nodes", nodes.len());

        Self {
            network,
            nodes,
            records: BTreeMap::new(),
        }
    }

    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&SimNode> {
        self.nodes.get(index)
    }

    /// Every record installed so far, by key
    pub fn records(&self) -> &BTreeMap<Key, Value> {
        &self.records
    }

    /// Install `keys_per_node` records on every node. Node `i` owns keys
    /// `i*keys_per_node .. (i+1)*keys_per_node`, written as decimal strings.
    pub fn install_records(&mut self, keys_per_node: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for (i, node) in self.nodes.iter().enumerate() {
            for j in 0..keys_per_node {
                let key = Key::new((i * keys_per_node + j).to_string());
                let value = random_value(&mut rng, &key);
                node.insert_local_record(key.clone(), value.clone());
                self.records.insert(key, value);
            }
        }
        tracing::info!("Installed {} records", self.records.len());
    }

    /// Mark a node as failing (or recovered)
    pub fn set_down(&self, index: usize, down: bool) {
        self.network.set_down(&Self::address(index), down);
        tracing::debug!("{} down: {}", Self::address(index), down);
    }

    /// Run setup on every node concurrently and wait for all of them.
    /// Reports come back in node order.
    pub async fn setup_all(&self) -> anyhow::Result<Vec<SetupReport>> {
        let mut tasks = JoinSet::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let node = Arc::clone(node);
            tasks.spawn(async move { (i, node.setup().await) });
        }

        let mut reports = vec![SetupReport::default(); self.nodes.len()];
        while let Some(joined) = tasks.join_next().await {
            let (i, result) = joined.context("setup task panicked")?;
            reports[i] = result.with_context(|| format!("setup of {}", Self::address(i)))?;
        }
        Ok(reports)
    }

    /// Share of installed keys present in at least one node's db
    pub fn db_coverage(&self) -> Coverage {
        let seen: BTreeSet<Key> = self
            .nodes
            .iter()
            .flat_map(|node| node.db().iter().map(|r| r.key.clone()).collect::<Vec<_>>())
            .collect();
        self.coverage(&seen)
    }

    /// Share of installed keys present in at least one successor table
    pub fn successor_coverage(&self) -> Coverage {
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            let tables = node.tables();
            for layer in 0..tables.complete_layers() {
                seen.extend(tables.successors(layer).iter().map(|r| r.key.clone()));
            }
        }
        self.coverage(&seen)
    }

    fn coverage(&self, seen: &BTreeSet<Key>) -> Coverage {
        Coverage {
            covered: self.records.keys().filter(|k| seen.contains(*k)).count(),
            total: self.records.len(),
        }
    }

    /// Look every installed key up from every node that is up
    pub async fn lookup_sweep(&self, skip: &[usize]) -> anyhow::Result<LookupStats> {
        let mut stats = LookupStats::default();
        for (i, node) in self.nodes.iter().enumerate() {
            if skip.contains(&i) {
                continue;
            }
            for (key, expected) in &self.records {
                stats.total += 1;
                match node.lookup(key).await {
                    Ok(Some(value)) if value == *expected => stats.found += 1,
                    Ok(Some(value)) => {
                        tracing::warn!("{}: wrong value for {}: {:?}", node.address(), key, value);
                        stats.wrong += 1;
                    }
                    Ok(None) => stats.not_found += 1,
                    Err(DhtError::Unreachable(e)) => {
                        tracing::debug!("{}: lookup of {} unreachable: {}", node.address(), key, e);
                        stats.unreachable += 1;
                    }
                    Err(e) => {
                        return Err(e).with_context(|| format!("lookup of {} from {}", key, node.address()));
                    }
                }
            }
        }
        Ok(stats)
    }
}

/// A value naming a replication cluster of `PAXOS_SIZE` web servers and
/// carrying a placeholder signed envelope
fn random_value(rng: &mut StdRng, key: &Key) -> Value {
    let servers = (0..PAXOS_SIZE)
        .map(|_| format!("ws{}", rng.gen_range(0..PAXOS_SIZE * 4)))
        .collect();
    let mut signature = [0u8; 16];
    rng.fill_bytes(&mut signature);
    let mut envelope = format!("record:{}:", key).into_bytes();
    envelope.extend_from_slice(&signature);
    Value { servers, envelope }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WhanauConfig {
        WhanauConfig {
            seed: Some(5),
            ..WhanauConfig::for_network(4, 3)
        }
    }

    #[test]
    fn test_install_records_is_reproducible() {
        let mut a = Cluster::full_mesh(4, config());
        let mut b = Cluster::full_mesh(4, config());
        a.install_records(3, 9);
        b.install_records(3, 9);

        assert_eq!(a.records().len(), 12);
        assert_eq!(a.records(), b.records());
        assert_eq!(a.node(2).unwrap().local_records().len(), 3);
        for value in a.records().values() {
            assert_eq!(value.servers.len(), PAXOS_SIZE);
            assert!(!value.envelope.is_empty());
        }
    }

    #[test]
    fn test_mesh_neighbors() {
        let cluster = Cluster::full_mesh(4, config());
        let node = cluster.node(1).unwrap();
        assert_eq!(node.neighbors().len(), 3);
        assert!(!node.neighbors().contains(node.address()));
    }

    #[test]
    fn test_coverage_before_setup_is_zero() {
        let mut cluster = Cluster::full_mesh(3, config());
        cluster.install_records(2, 1);
        assert_eq!(cluster.db_coverage(), Coverage { covered: 0, total: 6 });
        assert_eq!(cluster.successor_coverage().fraction(), 0.0);
    }

    #[tokio::test]
    async fn test_setup_all_reports_in_node_order() {
        let mut cluster = Cluster::full_mesh(4, config());
        cluster.install_records(3, 2);
        let reports = cluster.setup_all().await.unwrap();
        assert_eq!(reports.len(), 4);
        for report in &reports {
            assert_eq!(report.fingers.len(), config().nlayers);
        }
        assert!(cluster.db_coverage().covered > 0);
    }
}
