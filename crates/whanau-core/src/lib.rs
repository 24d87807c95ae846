//! Whanau Core - Shared types, protocols, and transport
//!
//! This crate provides the building blocks shared by the Whanau routing
//! engine and its simulator: the record/finger data model, the RPC wire
//! messages, and the request/reply transport abstraction.

pub mod error;
pub mod proto;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use transport::{Address, RequestHandler, Transport};
pub use types::*;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Number of replicas in a key's replication cluster
pub const PAXOS_SIZE: usize = 5;
