//! A Whanau node: peer state, the walk primitives and the RPC dispatcher

use crate::routing::RoutingTables;
use crate::storage::RecordStore;
use crate::{rpc, DhtError, Result, WhanauConfig};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use whanau_core::proto::{
    self, Envelope, GetIdRequest, Payload, QueryRequest, QueryResponse, RandomWalkRequest,
    RandomWalkResponse, ResultKind, SampleRecordResponse, SuccessorsRequest, SuccessorsResponse,
    TryRequest, TryResponse,
};
use whanau_core::{Address, Key, Record, RequestHandler, Transport, Value};

/// One peer of the routing network
pub struct WhanauNode<T: Transport> {
    pub(crate) address: Address,
    pub(crate) neighbors: Vec<Address>,
    pub(crate) config: WhanauConfig,
    pub(crate) transport: T,
    rng: Mutex<StdRng>,
    pub(crate) store: RecordStore,
    /// Published routing state; replaced, never mutated in place
    tables: RwLock<Arc<RoutingTables>>,
    dropped_samples: AtomicU64,
}

impl<T: Transport> WhanauNode<T> {
    /// Create a node at the transport's local address
    pub fn new(neighbors: Vec<Address>, config: WhanauConfig, transport: T) -> Self {
        let address = transport.local_address().clone();
        let rng = StdRng::seed_from_u64(node_seed(config.seed, &address));
        Self {
            address,
            neighbors,
            config,
            transport,
            rng: Mutex::new(rng),
            store: RecordStore::new(),
            tables: RwLock::new(Arc::new(RoutingTables::default())),
            dropped_samples: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn neighbors(&self) -> &[Address] {
        &self.neighbors
    }

    pub fn config(&self) -> &WhanauConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Add or replace an authoritative record
    pub fn insert_local_record(&self, key: Key, value: Value) -> Option<Value> {
        self.store.insert_local(key, value)
    }

    /// Drop an authoritative record; later setup passes stop sampling it
    pub fn remove_local_record(&self, key: &Key) -> Option<Value> {
        self.store.remove_local(key)
    }

    pub fn local_records(&self) -> Vec<Record> {
        self.store.local_records()
    }

    /// Records sampled by the last setup pass
    pub fn db(&self) -> Arc<Vec<Record>> {
        self.store.db()
    }

    /// Snapshot of the published routing tables
    pub fn tables(&self) -> Arc<RoutingTables> {
        self.tables.read().clone()
    }

    /// Samples dropped since the node was created
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    pub(crate) fn note_dropped(&self) {
        self.dropped_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Make `tables` the state readers see
    pub(crate) fn publish(&self, tables: &RoutingTables) {
        debug_assert!(tables.is_well_formed());
        *self.tables.write() = Arc::new(tables.clone());
    }

    /// Run `f` with this node's random source
    pub(crate) fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        f(&mut self.rng.lock())
    }

    fn random_neighbor(&self) -> Result<Address> {
        self.with_rng(|rng| self.neighbors.choose(rng).cloned())
            .ok_or(DhtError::NoNeighbors)
    }

    /// Walk `steps` uniformly random hops from this node and return where
    /// the walk ends. Each hop after the first is a remote call to the
    /// chosen neighbor, so the walk fails if any hop is unreachable.
    pub async fn random_walk(&self, steps: u32) -> Result<Address> {
        if steps == 0 {
            return Err(DhtError::InvalidArgument(
                "random walk needs at least one step".to_string(),
            ));
        }
        let neighbor = self.random_neighbor()?;
        if steps == 1 {
            return Ok(neighbor);
        }
        rpc::random_walk(&self.transport, &neighbor, steps - 1).await
    }

    /// This node's id at `layer`
    pub fn get_id(&self, layer: usize) -> Result<Key> {
        self.tables
            .read()
            .id(layer)
            .cloned()
            .ok_or(DhtError::NotReady { layer })
    }

    async fn handle_random_walk(&self, req: RandomWalkRequest) -> Payload {
        let resp = match self.random_walk(req.steps).await {
            Ok(server) => RandomWalkResponse {
                status: ResultKind::Success as i32,
                server: server.as_str().to_string(),
            },
            Err(e) => {
                tracing::debug!("{}: walk of {} steps failed: {}", self.address, req.steps, e);
                RandomWalkResponse {
                    status: e.kind() as i32,
                    server: String::new(),
                }
            }
        };
        Payload::RandomWalkResponse(resp)
    }

    fn handle_get_id(&self, req: GetIdRequest) -> Payload {
        match self.get_id(req.layer as usize) {
            Ok(key) => Payload::GetIdResponse(proto::get_id_ok(key)),
            Err(e) => Payload::GetIdResponse(proto::GetIdResponse {
                status: e.kind() as i32,
                key: String::new(),
            }),
        }
    }

    fn handle_sample_record(&self) -> Payload {
        let record = self.with_rng(|rng| self.store.sample_local(rng));
        let resp = match record {
            Some(record) => SampleRecordResponse {
                status: ResultKind::Success as i32,
                record: Some(record.into()),
            },
            None => SampleRecordResponse {
                status: ResultKind::NotFound as i32,
                record: None,
            },
        };
        Payload::SampleRecordResponse(resp)
    }

    fn handle_successors(&self, req: SuccessorsRequest) -> Payload {
        let records = self
            .store
            .successors_of(&Key::new(req.key), req.count as usize);
        let status = if records.is_empty() {
            ResultKind::NotFound
        } else {
            ResultKind::Success
        };
        Payload::SuccessorsResponse(SuccessorsResponse {
            status: status as i32,
            records: records.into_iter().map(Into::into).collect(),
        })
    }

    fn handle_query(&self, req: QueryRequest) -> Payload {
        let resp = match self.query(req.layer as usize, &Key::new(req.key)) {
            Ok(value) => QueryResponse {
                status: ResultKind::Success as i32,
                value: Some(value.into()),
            },
            Err(e) => QueryResponse {
                status: e.kind() as i32,
                value: None,
            },
        };
        Payload::QueryResponse(resp)
    }

    async fn handle_try(&self, req: TryRequest) -> Payload {
        let resp = match self.try_lookup(&Key::new(req.key)).await {
            Ok(value) => TryResponse {
                status: ResultKind::Success as i32,
                value: Some(value.into()),
            },
            Err(e) => TryResponse {
                status: e.kind() as i32,
                value: None,
            },
        };
        Payload::TryResponse(resp)
    }
}

#[async_trait]
impl<T: Transport> RequestHandler for WhanauNode<T> {
    async fn handle(&self, from: &Address, request: Vec<u8>) -> Vec<u8> {
        let envelope = match Envelope::from_bytes(&request) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!("{}: failed to decode message from {}: {}", self.address, from, e);
                let response = proto::error_response(
                    0,
                    ResultKind::InvalidArgument,
                    format!("decode error: {}", e),
                );
                return response.to_bytes();
            }
        };

        let request_id = envelope.request_id;
        let payload = match envelope.payload {
            Some(Payload::RandomWalkRequest(req)) => self.handle_random_walk(req).await,
            Some(Payload::GetIdRequest(req)) => self.handle_get_id(req),
            Some(Payload::SampleRecordRequest(_)) => self.handle_sample_record(),
            Some(Payload::SuccessorsRequest(req)) => self.handle_successors(req),
            Some(Payload::QueryRequest(req)) => self.handle_query(req),
            Some(Payload::TryRequest(req)) => self.handle_try(req).await,
            Some(other) => {
                tracing::warn!("{}: unexpected message type from {}: {:?}", self.address, from, other);
                return proto::error_response(
                    request_id,
                    ResultKind::InvalidArgument,
                    "unexpected message type".to_string(),
                )
                .to_bytes();
            }
            None => {
                tracing::warn!("{}: empty payload from {}", self.address, from);
                return proto::error_response(
                    request_id,
                    ResultKind::InvalidArgument,
                    "empty payload".to_string(),
                )
                .to_bytes();
            }
        };

        Envelope::new(request_id, payload).to_bytes()
    }
}

/// Seed for a node's RNG: the configured seed mixed with the address, or
/// fresh entropy when no seed is configured
fn node_seed(seed: Option<u64>, address: &Address) -> u64 {
    let Some(seed) = seed else {
        let mut buf = [0u8; 8];
        if getrandom::getrandom(&mut buf).is_err() {
            return std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64;
        }
        return u64::from_le_bytes(buf);
    };

    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(address.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// A stable layer-0 name for a node that holds no records
pub(crate) fn stable_name(address: &Address) -> Key {
    let digest = blake3::hash(address.as_str().as_bytes());
    Key::new(hex::encode(&digest.as_bytes()[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{address, full_mesh, seeded, with_neighbors};

    #[tokio::test]
    async fn test_single_step_returns_neighbor() {
        let (_network, nodes) = full_mesh(5, seeded(1));
        let node = &nodes[0];

        for _ in 0..20 {
            let end = node.random_walk(1).await.unwrap();
            assert!(node.neighbors().contains(&end));
        }
    }

    #[tokio::test]
    async fn test_walk_follows_fixed_path() {
        // 0 -> 1 -> 2 -> 0: every hop has exactly one choice
        let ring = vec![vec![address(1)], vec![address(2)], vec![address(0)]];
        let (_network, nodes) = with_neighbors(ring, seeded(2));

        assert_eq!(nodes[0].random_walk(1).await.unwrap(), address(1));
        assert_eq!(nodes[0].random_walk(2).await.unwrap(), address(2));
        assert_eq!(nodes[0].random_walk(3).await.unwrap(), address(0));
        assert_eq!(nodes[0].random_walk(7).await.unwrap(), address(1));
    }

    #[tokio::test]
    async fn test_walk_is_reproducible_under_seed() {
        let (_a, first) = full_mesh(6, seeded(42));
        let (_b, second) = full_mesh(6, seeded(42));

        let mut left = Vec::new();
        let mut right = Vec::new();
        for _ in 0..10 {
            left.push(first[0].random_walk(4).await.unwrap());
            right.push(second[0].random_walk(4).await.unwrap());
        }
        assert_eq!(left, right);
    }

    #[tokio::test]
    async fn test_zero_steps_rejected() {
        let (_network, nodes) = full_mesh(3, seeded(3));
        let err = nodes[0].random_walk(0).await.unwrap_err();
        assert!(matches!(err, DhtError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_walk_without_neighbors() {
        let (_network, nodes) = with_neighbors(vec![vec![]], seeded(4));
        let err = nodes[0].random_walk(3).await.unwrap_err();
        assert!(matches!(err, DhtError::NoNeighbors));
    }

    #[tokio::test]
    async fn test_walk_reports_unreachable_hop() {
        let line = vec![vec![address(1)], vec![address(2)], vec![address(0)]];
        let (network, nodes) = with_neighbors(line, seeded(5));
        network.set_down(&address(1), true);

        let err = nodes[0].random_walk(3).await.unwrap_err();
        assert!(matches!(err, DhtError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_remote_walk_failure_propagates() {
        // The hop 1 -> 2 fails inside node 1 and comes back as a status
        let line = vec![vec![address(1)], vec![address(2)], vec![address(0)]];
        let (network, nodes) = with_neighbors(line, seeded(6));
        network.cut_link(&address(1), &address(2));

        let err = nodes[0].random_walk(3).await.unwrap_err();
        assert!(matches!(err, DhtError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_get_id_before_setup() {
        let (_network, nodes) = full_mesh(2, seeded(7));
        assert!(matches!(nodes[0].get_id(0), Err(DhtError::NotReady { layer: 0 })));

        let err = rpc::get_id(nodes[1].transport(), &address(0), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, DhtError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_garbage_request_gets_error_reply() {
        let (network, nodes) = full_mesh(2, seeded(8));
        let transport = network.transport_for(Address::new("outsider"));

        let reply = transport.call(nodes[0].address(), vec![0xff, 0xff, 0xff]).await.unwrap();
        let envelope = Envelope::from_bytes(&reply).unwrap();
        assert!(matches!(envelope.payload, Some(Payload::ErrorResponse(_))));
    }

    #[tokio::test]
    async fn test_sample_record_from_empty_node() {
        let (_network, nodes) = full_mesh(2, seeded(9));
        let err = rpc::sample_record(nodes[0].transport(), &address(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DhtError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_removed_record_is_not_sampled() {
        let (_network, nodes) = full_mesh(2, seeded(10));
        let key = Key::from("only");
        nodes[1].insert_local_record(key.clone(), Value::new(vec!["ws0".to_string()]));

        let sampled = rpc::sample_record(nodes[0].transport(), &address(1)).await.unwrap();
        assert_eq!(sampled.key, key);

        assert!(nodes[1].remove_local_record(&key).is_some());
        let err = rpc::sample_record(nodes[0].transport(), &address(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DhtError::NotFound(_)));
    }

    #[test]
    fn test_seed_mixes_address() {
        let a = node_seed(Some(1), &Address::new("a"));
        let b = node_seed(Some(1), &Address::new("b"));
        assert_ne!(a, b);
        assert_eq!(a, node_seed(Some(1), &Address::new("a")));
    }

    #[test]
    fn test_stable_name_is_hex() {
        let name = stable_name(&Address::new("node-0"));
        assert_eq!(name.as_str().len(), 16);
        assert_eq!(name, stable_name(&Address::new("node-0")));
    }
}
