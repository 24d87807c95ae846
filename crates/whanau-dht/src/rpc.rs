//! Client side of the Whanau RPC surface
//!
//! Each helper encodes one request, sends it through the transport and maps
//! the reply status back onto a [`DhtError`].

use crate::{DhtError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use whanau_core::proto::{self, Envelope, Payload, ResultKind};
use whanau_core::{Address, Key, Record, Transport, Value};

/// Request ID counter, initialized with a random offset to avoid collisions across sessions
static REQUEST_COUNTER: LazyLock<AtomicU64> = LazyLock::new(|| {
    let mut buf = [0u8; 8];
    // If getrandom fails, use current time as fallback
    if getrandom::getrandom(&mut buf).is_err() {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        return AtomicU64::new(ts);
    }
    AtomicU64::new(u64::from_le_bytes(buf))
});

/// Get a unique request ID
pub fn next_request_id() -> u64 {
    REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Send one request and return the reply payload
async fn exchange<T: Transport>(transport: &T, to: &Address, envelope: Envelope) -> Result<Payload> {
    let request_id = envelope.request_id;
    let reply = transport.call(to, envelope.to_bytes()).await?;
    let envelope = Envelope::from_bytes(&reply)?;

    if envelope.request_id != request_id {
        tracing::warn!(
            "Request ID mismatch from {}: expected {}, got {}",
            to,
            request_id,
            envelope.request_id
        );
    }

    match envelope.payload {
        Some(Payload::ErrorResponse(err)) => {
            let kind = ResultKind::from_status(err.status)?;
            Err(DhtError::from_kind(kind, format!("{}: {}", to, err.message)))
        }
        Some(payload) => Ok(payload),
        None => Err(DhtError::Protocol(format!("empty reply from {}", to))),
    }
}

/// Turn a reply status into `Ok(())` or the matching error
fn check(status: i32, to: &Address, what: &str) -> Result<()> {
    match ResultKind::from_status(status)? {
        ResultKind::Success => Ok(()),
        kind => Err(DhtError::from_kind(kind, format!("{} at {}", what, to))),
    }
}

fn unexpected(to: &Address, payload: &Payload) -> DhtError {
    DhtError::Protocol(format!("unexpected reply from {}: {:?}", to, payload))
}

/// Ask `to` to continue a walk for `steps` more hops
pub async fn random_walk<T: Transport>(transport: &T, to: &Address, steps: u32) -> Result<Address> {
    let request = proto::random_walk_request(next_request_id(), steps);
    match exchange(transport, to, request).await? {
        Payload::RandomWalkResponse(resp) => {
            check(resp.status, to, "random walk")?;
            Ok(Address::new(resp.server))
        }
        other => Err(unexpected(to, &other)),
    }
}

/// Fetch the id `to` holds at `layer`
pub async fn get_id<T: Transport>(transport: &T, to: &Address, layer: usize) -> Result<Key> {
    let request = proto::get_id_request(next_request_id(), layer as u32);
    match exchange(transport, to, request).await? {
        Payload::GetIdResponse(resp) => {
            check(resp.status, to, "layer id")?;
            Ok(Key::new(resp.key))
        }
        other => Err(unexpected(to, &other)),
    }
}

/// Fetch one random authoritative record held by `to`
pub async fn sample_record<T: Transport>(transport: &T, to: &Address) -> Result<Record> {
    let request = proto::sample_record_request(next_request_id());
    match exchange(transport, to, request).await? {
        Payload::SampleRecordResponse(resp) => {
            check(resp.status, to, "record sample")?;
            let record = resp
                .record
                .ok_or_else(|| DhtError::Protocol(format!("sample from {} has no record", to)))?;
            Ok(Record::try_from(record)?)
        }
        other => Err(unexpected(to, &other)),
    }
}

/// Fetch up to `count` db records following `key` from `to`
pub async fn successors<T: Transport>(
    transport: &T,
    to: &Address,
    key: &Key,
    count: usize,
) -> Result<Vec<Record>> {
    let request = proto::successors_request(next_request_id(), key, count as u32);
    match exchange(transport, to, request).await? {
        Payload::SuccessorsResponse(resp) => {
            check(resp.status, to, "successor sample")?;
            resp.records
                .into_iter()
                .map(|record| Record::try_from(record).map_err(DhtError::from))
                .collect()
        }
        other => Err(unexpected(to, &other)),
    }
}

/// Look `key` up in the successor table `to` holds at `layer`
pub async fn query<T: Transport>(
    transport: &T,
    to: &Address,
    layer: usize,
    key: &Key,
) -> Result<Value> {
    let request = proto::query_request(next_request_id(), layer as u32, key);
    match exchange(transport, to, request).await? {
        Payload::QueryResponse(resp) => {
            check(resp.status, to, "query")?;
            resp.value
                .map(Value::from)
                .ok_or_else(|| DhtError::Protocol(format!("query reply from {} has no value", to)))
        }
        other => Err(unexpected(to, &other)),
    }
}

/// Ask `to` to run a lookup try for `key` from its own tables
pub async fn try_lookup<T: Transport>(transport: &T, to: &Address, key: &Key) -> Result<Value> {
    let request = proto::try_request(next_request_id(), key);
    match exchange(transport, to, request).await? {
        Payload::TryResponse(resp) => {
            check(resp.status, to, "lookup try")?;
            resp.value
                .map(Value::from)
                .ok_or_else(|| DhtError::Protocol(format!("try reply from {} has no value", to)))
        }
        other => Err(unexpected(to, &other)),
    }
}
