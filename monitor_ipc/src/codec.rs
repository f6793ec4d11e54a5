//! Payload serialization.
//!
//! Every byte string crossing a channel, the envelope as well as the message
//! content inside it, goes through these two functions.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Largest encoded value accepted by the codec. Matches the frame ceiling of
/// the socket transport.
pub const MAX_ENCODED_SIZE: u64 = 10 * 1024 * 1024;

/// Error raised when a value cannot be encoded or decoded.
#[derive(Error, Debug)]
#[error("codec error: {0}")]
pub struct CodecError(#[from] bincode::Error);

impl CodecError {
    /// The underlying bincode error kind.
    pub fn kind(&self) -> &bincode::ErrorKind {
        &self.0
    }
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_ENCODED_SIZE)
        .reject_trailing_bytes()
}

/// Serialize a value to bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(options().serialize(value)?)
}

/// Deserialize a value from bytes. Trailing bytes are an error.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(options().deserialize(bytes)?)
}
