//! Protocol buffer message definitions
//!
//! These are manually defined to avoid the need for protoc at build time.
//! Every response carries a [`ResultKind`] status; a node never answers a
//! request with silence, only the transport can fail.

use crate::{Error, Key, Record, Result, Value, PROTOCOL_VERSION};
use prost::Message;

/// Message envelope wrapping all protocol messages
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    /// Protocol version
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// Request ID for correlation
    #[prost(uint64, tag = "2")]
    pub request_id: u64,
    /// The actual message payload
    #[prost(oneof = "Payload", tags = "10, 11, 20, 21, 30, 31, 40, 41, 50, 51, 60, 61, 100")]
    pub payload: Option<Payload>,
}

/// Payload variants for the envelope
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    #[prost(message, tag = "10")]
    RandomWalkRequest(RandomWalkRequest),
    #[prost(message, tag = "11")]
    RandomWalkResponse(RandomWalkResponse),
    #[prost(message, tag = "20")]
    GetIdRequest(GetIdRequest),
    #[prost(message, tag = "21")]
    GetIdResponse(GetIdResponse),
    #[prost(message, tag = "30")]
    SampleRecordRequest(SampleRecordRequest),
    #[prost(message, tag = "31")]
    SampleRecordResponse(SampleRecordResponse),
    #[prost(message, tag = "40")]
    SuccessorsRequest(SuccessorsRequest),
    #[prost(message, tag = "41")]
    SuccessorsResponse(SuccessorsResponse),
    #[prost(message, tag = "50")]
    QueryRequest(QueryRequest),
    #[prost(message, tag = "51")]
    QueryResponse(QueryResponse),
    #[prost(message, tag = "60")]
    TryRequest(TryRequest),
    #[prost(message, tag = "61")]
    TryResponse(TryResponse),
    #[prost(message, tag = "100")]
    ErrorResponse(ErrorResponse),
}

/// Outcome attached to every reply
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ResultKind {
    Success = 0,
    Unreachable = 1,
    NotFound = 2,
    InvalidArgument = 3,
}

impl ResultKind {
    /// Decode a status field, treating unknown values as a protocol error
    pub fn from_status(status: i32) -> Result<Self> {
        Self::try_from(status)
            .map_err(|_| Error::Protocol(format!("unknown result kind {}", status)))
    }
}

// Shared records

#[derive(Clone, PartialEq, Message)]
pub struct ProtoValue {
    #[prost(string, repeated, tag = "1")]
    pub servers: Vec<String>,
    #[prost(bytes = "vec", tag = "2")]
    pub envelope: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoRecord {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, optional, tag = "2")]
    pub value: Option<ProtoValue>,
}

// Random walk messages

#[derive(Clone, PartialEq, Message)]
pub struct RandomWalkRequest {
    #[prost(uint32, tag = "1")]
    pub steps: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct RandomWalkResponse {
    #[prost(enumeration = "ResultKind", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub server: String,
}

// Layer id messages

#[derive(Clone, PartialEq, Message)]
pub struct GetIdRequest {
    #[prost(uint32, tag = "1")]
    pub layer: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetIdResponse {
    #[prost(enumeration = "ResultKind", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub key: String,
}

// Sampling messages

#[derive(Clone, PartialEq, Message)]
pub struct SampleRecordRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct SampleRecordResponse {
    #[prost(enumeration = "ResultKind", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub record: Option<ProtoRecord>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SuccessorsRequest {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(uint32, tag = "2")]
    pub count: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SuccessorsResponse {
    #[prost(enumeration = "ResultKind", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub records: Vec<ProtoRecord>,
}

// Lookup messages

#[derive(Clone, PartialEq, Message)]
pub struct QueryRequest {
    #[prost(uint32, tag = "1")]
    pub layer: u32,
    #[prost(string, tag = "2")]
    pub key: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryResponse {
    #[prost(enumeration = "ResultKind", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub value: Option<ProtoValue>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TryRequest {
    #[prost(string, tag = "1")]
    pub key: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TryResponse {
    #[prost(enumeration = "ResultKind", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub value: Option<ProtoValue>,
}

// Error message

#[derive(Clone, PartialEq, Message)]
pub struct ErrorResponse {
    #[prost(enumeration = "ResultKind", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

// Helper implementations

impl Envelope {
    /// Create a new envelope with the current protocol version
    pub fn new(request_id: u64, payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION as u32,
            request_id,
            payload: Some(payload),
        }
    }

    /// Encode the envelope to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode an envelope from bytes, checking version compatibility
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let envelope = Self::decode(buf)?;

        if envelope.version != PROTOCOL_VERSION as u32 {
            return Err(Error::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: envelope.version,
            });
        }

        Ok(envelope)
    }
}

impl From<Value> for ProtoValue {
    fn from(value: Value) -> Self {
        Self {
            servers: value.servers,
            envelope: value.envelope,
        }
    }
}

impl From<ProtoValue> for Value {
    fn from(value: ProtoValue) -> Self {
        Self {
            servers: value.servers,
            envelope: value.envelope,
        }
    }
}

impl From<Record> for ProtoRecord {
    fn from(record: Record) -> Self {
        Self {
            key: record.key.into_string(),
            value: Some(record.value.into()),
        }
    }
}

impl TryFrom<ProtoRecord> for Record {
    type Error = Error;

    fn try_from(record: ProtoRecord) -> Result<Self> {
        let value = record
            .value
            .ok_or_else(|| Error::InvalidData(format!("record {} has no value", record.key)))?;
        Ok(Record::new(record.key, value.into()))
    }
}

/// Helper functions to create common message types

pub fn random_walk_request(request_id: u64, steps: u32) -> Envelope {
    Envelope::new(
        request_id,
        Payload::RandomWalkRequest(RandomWalkRequest { steps }),
    )
}

pub fn get_id_request(request_id: u64, layer: u32) -> Envelope {
    Envelope::new(request_id, Payload::GetIdRequest(GetIdRequest { layer }))
}

pub fn get_id_ok(key: Key) -> GetIdResponse {
    GetIdResponse {
        status: ResultKind::Success as i32,
        key: key.into_string(),
    }
}

pub fn sample_record_request(request_id: u64) -> Envelope {
    Envelope::new(request_id, Payload::SampleRecordRequest(SampleRecordRequest {}))
}

pub fn successors_request(request_id: u64, key: &Key, count: u32) -> Envelope {
    Envelope::new(
        request_id,
        Payload::SuccessorsRequest(SuccessorsRequest {
            key: key.as_str().to_string(),
            count,
        }),
    )
}

pub fn query_request(request_id: u64, layer: u32, key: &Key) -> Envelope {
    Envelope::new(
        request_id,
        Payload::QueryRequest(QueryRequest {
            layer,
            key: key.as_str().to_string(),
        }),
    )
}

pub fn try_request(request_id: u64, key: &Key) -> Envelope {
    Envelope::new(
        request_id,
        Payload::TryRequest(TryRequest {
            key: key.as_str().to_string(),
        }),
    )
}

pub fn error_response(request_id: u64, status: ResultKind, message: String) -> Envelope {
    Envelope::new(
        request_id,
        Payload::ErrorResponse(ErrorResponse {
            status: status as i32,
            message,
        }),
    )
}
