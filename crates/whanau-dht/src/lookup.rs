//! Lookup: resolve a key through fingers and successor tables

use crate::node::WhanauNode;
use crate::{rpc, DhtError, Result};
use whanau_core::{Key, Transport, Value};

impl<T: Transport> WhanauNode<T> {
    /// Resolve `key` to its value.
    ///
    /// Tries from this node's own tables first, then delegates up to
    /// `max_delegations` tries to the ends of fresh random walks. Returns
    /// `Ok(None)` when no path yields the key, and `Err(Unreachable)` only
    /// when every remote attempt failed in the transport.
    pub async fn lookup(&self, key: &Key) -> Result<Option<Value>> {
        let mut only_unreachable = match self.try_lookup(key).await {
            Ok(value) => return Ok(Some(value)),
            Err(DhtError::Unreachable(_)) => true,
            Err(e) => {
                tracing::trace!("{}: local try for {} failed: {}", self.address, key, e);
                false
            }
        };

        for _ in 0..self.config.max_delegations {
            match self.delegate(key).await {
                Ok(value) => return Ok(Some(value)),
                Err(DhtError::Unreachable(e)) => {
                    tracing::debug!("{}: delegated try for {} unreachable: {}", self.address, key, e);
                }
                Err(e) => {
                    tracing::trace!("{}: delegated try for {} failed: {}", self.address, key, e);
                    only_unreachable = false;
                }
            }
        }

        if only_unreachable {
            return Err(DhtError::Unreachable(format!("no peer answered lookup for {}", key)));
        }
        Ok(None)
    }

    async fn delegate(&self, key: &Key) -> Result<Value> {
        let via = self.random_walk(self.config.w).await?;
        rpc::try_lookup(&self.transport, &via, key).await
    }

    /// One lookup try from this node's tables: search the local successor
    /// tables, then query candidate fingers best first.
    pub async fn try_lookup(&self, key: &Key) -> Result<Value> {
        let tables = self.tables();
        if let Some(record) = tables.find(key) {
            return Ok(record.value.clone());
        }

        let candidates = tables.finger_candidates(key);
        if candidates.is_empty() {
            return Err(DhtError::NotFound(format!("no finger toward {}", key)));
        }

        let mut answered = false;
        for (finger, layer) in candidates
            .into_iter()
            .take(self.config.max_query_attempts)
        {
            match rpc::query(&self.transport, &finger.server, layer, key).await {
                Ok(value) => return Ok(value),
                Err(DhtError::Unreachable(e)) => {
                    tracing::debug!("{}: finger {} unreachable: {}", self.address, finger.server, e);
                }
                Err(e) => {
                    tracing::trace!(
                        "{}: finger {} at layer {} has no {}: {}",
                        self.address,
                        finger.server,
                        layer,
                        key,
                        e
                    );
                    answered = true;
                }
            }
        }

        if answered {
            Err(DhtError::NotFound(key.to_string()))
        } else {
            Err(DhtError::Unreachable(format!("every finger toward {}", key)))
        }
    }

    /// Look `key` up in this node's successor table at `layer`
    pub fn query(&self, layer: usize, key: &Key) -> Result<Value> {
        let tables = self.tables();
        if layer >= tables.complete_layers() {
            return Err(DhtError::NotReady { layer });
        }
        tables
            .find_successor(layer, key)
            .map(|record| record.value.clone())
            .ok_or_else(|| DhtError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{address, full_mesh, install_records, value_for};
    use crate::WhanauConfig;

    fn config() -> WhanauConfig {
        WhanauConfig {
            seed: Some(23),
            ..WhanauConfig::for_network(6, 4)
        }
    }

    async fn ready(nodes: &[crate::testing::TestNode]) {
        for _ in 0..2 {
            for node in nodes {
                node.setup().await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_found_values_are_exact() {
        let (_network, nodes) = full_mesh(6, config());
        install_records(&nodes, 4);
        ready(&nodes).await;

        let mut found = 0;
        for node in &nodes {
            for i in 0..24 {
                let key = Key::new(i.to_string());
                if let Some(value) = node.lookup(&key).await.unwrap() {
                    assert_eq!(value, value_for(&key));
                    found += 1;
                }
            }
        }
        assert!(found > 0);
    }

    #[tokio::test]
    async fn test_unknown_key_not_found() {
        let (_network, nodes) = full_mesh(6, config());
        install_records(&nodes, 4);
        ready(&nodes).await;

        let outcome = nodes[0].lookup(&Key::from("no-such-key")).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_query_layer_bounds() {
        let (_network, nodes) = full_mesh(3, config());
        let err = nodes[0].query(0, &Key::from("x")).unwrap_err();
        assert!(matches!(err, DhtError::NotReady { layer: 0 }));
    }

    #[tokio::test]
    async fn test_lookup_before_setup_is_not_found() {
        let (_network, nodes) = full_mesh(3, config());
        install_records(&nodes, 2);
        // No tables anywhere: local try finds no fingers, delegates get NotFound
        let outcome = nodes[0].lookup(&Key::from("0")).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_isolated_node_reports_unreachable() {
        let (network, nodes) = full_mesh(4, config());
        install_records(&nodes, 3);
        ready(&nodes).await;

        // Cut node 0 off from everyone, itself included
        for i in 0..4 {
            network.cut_link(&address(0), &address(i));
        }
        // Never installed, so only the fingers could answer it
        let key = Key::from("absent");
        let tables = nodes[0].tables();
        assert!(tables.find(&key).is_none());
        assert!(!tables.fingers(0).is_empty());
        assert!(!tables.finger_candidates(&key).is_empty());

        let err = nodes[0].lookup(&key).await.unwrap_err();
        assert!(matches!(err, DhtError::Unreachable(_)));
    }
}
