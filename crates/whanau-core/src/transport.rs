//! Transport abstraction for peer-to-peer request/reply calls
//!
//! The routing engine only ever needs one primitive: send an encoded
//! request to an address and wait for the encoded reply. A call either
//! yields a reply or fails with [`Error::Unreachable`]; timeouts, refusals
//! and crashes all look the same to the caller.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A peer network address
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create a new Address from a string
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidAddress("empty address".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Client side of the request/reply transport
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Our own address on the network
    fn local_address(&self) -> &Address;

    /// Send a request and wait for the reply
    async fn call(&self, to: &Address, request: Vec<u8>) -> Result<Vec<u8>>;
}

/// Server side: something that answers encoded requests
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Answer one request. Handlers always produce a reply; failures are
    /// reported inside it.
    async fn handle(&self, from: &Address, request: Vec<u8>) -> Vec<u8>;
}

pub mod memory {
    //! In-process transport for simulation and testing

    use super::*;
    use parking_lot::RwLock;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// A network of in-process peers addressed by [`Address`]
    #[derive(Default)]
    pub struct MemoryNetwork {
        peers: RwLock<HashMap<Address, Arc<dyn RequestHandler>>>,
        /// Peers that fail every call made to them
        down: RwLock<HashSet<Address>>,
        /// Directed links (from, to) that fail
        cut: RwLock<HashSet<(Address, Address)>>,
        calls: AtomicU64,
        failed_calls: AtomicU64,
    }

    impl MemoryNetwork {
        /// Create an empty network
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Attach a handler at `address`, replacing any previous one
        pub fn register(&self, address: Address, handler: Arc<dyn RequestHandler>) {
            self.peers.write().insert(address, handler);
        }

        /// Detach the handler at `address`
        pub fn unregister(&self, address: &Address) -> bool {
            self.peers.write().remove(address).is_some()
        }

        /// Mark a peer as failing (or recovered)
        pub fn set_down(&self, address: &Address, down: bool) {
            let mut set = self.down.write();
            if down {
                set.insert(address.clone());
            } else {
                set.remove(address);
            }
        }

        /// Make every call from `from` to `to` fail
        pub fn cut_link(&self, from: &Address, to: &Address) {
            self.cut.write().insert((from.clone(), to.clone()));
        }

        /// Restore a link previously cut
        pub fn restore_link(&self, from: &Address, to: &Address) {
            self.cut.write().remove(&(from.clone(), to.clone()));
        }

        /// Create a transport that sends from `address`
        pub fn transport_for(self: &Arc<Self>, address: Address) -> MemoryTransport {
            MemoryTransport {
                network: Arc::clone(self),
                address,
            }
        }

        /// Total number of calls attempted
        pub fn call_count(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }

        /// Number of calls that failed
        pub fn failed_call_count(&self) -> u64 {
            self.failed_calls.load(Ordering::Relaxed)
        }

        fn route(&self, from: &Address, to: &Address) -> Option<Arc<dyn RequestHandler>> {
            if self.down.read().contains(to) {
                return None;
            }
            if self.cut.read().contains(&(from.clone(), to.clone())) {
                return None;
            }
            self.peers.read().get(to).cloned()
        }
    }

    /// A transport bound to one sender address on a [`MemoryNetwork`]
    #[derive(Clone)]
    pub struct MemoryTransport {
        network: Arc<MemoryNetwork>,
        address: Address,
    }

    impl MemoryTransport {
        /// The network this transport sends on
        pub fn network(&self) -> &Arc<MemoryNetwork> {
            &self.network
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        fn local_address(&self) -> &Address {
            &self.address
        }

        async fn call(&self, to: &Address, request: Vec<u8>) -> Result<Vec<u8>> {
            self.network.calls.fetch_add(1, Ordering::Relaxed);

            // Let other peers make progress between hops
            tokio::task::yield_now().await;

            match self.network.route(&self.address, to) {
                Some(handler) => Ok(handler.handle(&self.address, request).await),
                None => {
                    self.network.failed_calls.fetch_add(1, Ordering::Relaxed);
                    Err(Error::Unreachable(to.to_string()))
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        struct Echo;

        #[async_trait]
        impl RequestHandler for Echo {
            async fn handle(&self, _from: &Address, request: Vec<u8>) -> Vec<u8> {
                request
            }
        }

        #[tokio::test]
        async fn test_memory_call_reaches_handler() {
            let network = MemoryNetwork::new();
            network.register(Address::new("b"), Arc::new(Echo));

            let transport = network.transport_for(Address::new("a"));
            let reply = transport.call(&Address::new("b"), b"hello".to_vec()).await.unwrap();

            assert_eq!(reply, b"hello");
            assert_eq!(network.call_count(), 1);
        }

        #[tokio::test]
        async fn test_memory_unknown_peer_unreachable() {
            let network = MemoryNetwork::new();
            let transport = network.transport_for(Address::new("a"));

            let err = transport.call(&Address::new("nobody"), vec![]).await.unwrap_err();
            assert!(matches!(err, Error::Unreachable(_)));
            assert_eq!(network.failed_call_count(), 1);
        }

        #[tokio::test]
        async fn test_memory_down_and_cut_links() {
            let network = MemoryNetwork::new();
            network.register(Address::new("b"), Arc::new(Echo));
            let from_a = network.transport_for(Address::new("a"));
            let from_c = network.transport_for(Address::new("c"));

            network.cut_link(&Address::new("a"), &Address::new("b"));
            assert!(from_a.call(&Address::new("b"), vec![1]).await.is_err());
            assert!(from_c.call(&Address::new("b"), vec![1]).await.is_ok());

            network.restore_link(&Address::new("a"), &Address::new("b"));
            network.set_down(&Address::new("b"), true);
            assert!(from_a.call(&Address::new("b"), vec![1]).await.is_err());
            assert!(from_c.call(&Address::new("b"), vec![1]).await.is_err());

            network.set_down(&Address::new("b"), false);
            assert!(from_a.call(&Address::new("b"), vec![1]).await.is_ok());

            assert!(network.unregister(&Address::new("b")));
            assert!(from_a.call(&Address::new("b"), vec![1]).await.is_err());
        }

        #[test]
        fn test_address_parse() {
            assert!("".parse::<Address>().is_err());
            assert_eq!("node-1".parse::<Address>().unwrap().as_str(), "node-1");
        }
    }
}
