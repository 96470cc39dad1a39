//! Pluggable event serialization.
//!
//! The producer only needs [`Encode`], the consumer only needs [`Decode`].
//! JSON is the default wire format; any codec works as long as it round-trips
//! every field of [`Event`].

use std::sync::Arc;

use taskflow_core::Event;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to marshal event: {0}")]
    Marshal(String),

    #[error("failed to unmarshal event: {0}")]
    Unmarshal(String),
}

pub trait Encode: Send + Sync {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, CodecError>;
}

pub trait Decode: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Event, CodecError>;
}

impl<C> Encode for Arc<C>
where
    C: Encode + ?Sized,
{
    fn encode(&self, event: &Event) -> Result<Vec<u8>, CodecError> {
        (**self).encode(event)
    }
}

impl<C> Decode for Arc<C>
where
    C: Decode + ?Sized,
{
    fn decode(&self, bytes: &[u8]) -> Result<Event, CodecError> {
        (**self).decode(bytes)
    }
}

/// `serde_json` codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Encode for JsonCodec {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(event).map_err(|e| CodecError::Marshal(e.to_string()))
    }
}

impl Decode for JsonCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Event, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Unmarshal(e.to_string()))
    }
}
