//! Message envelope.
//!
//! A [`Container`] wraps a serialized message together with the type tag of
//! its schema, so the receiving side knows how to decode the content before
//! looking at it.

use crate::codec::{self, CodecError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A message schema that can travel inside a [`Container`].
///
/// The tag is declared by the schema itself and must stay stable across
/// releases. Two schemas must never share a tag; [`Router::add_message_handler`]
/// rejects a second schema claiming a tag that is already taken.
///
/// [`Router::add_message_handler`]: crate::Router::add_message_handler
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Stable identifier of this schema on the wire.
    const TYPE_TAG: &'static str;
}

/// Envelope carried over every channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Type tag of the schema the content was serialized from
    type_tag: String,

    /// Serialized message content, absent for content-less messages
    content: Option<Vec<u8>>,
}

impl Container {
    /// Create a container from a tag and already serialized content.
    pub fn new(type_tag: impl Into<String>, content: Option<Vec<u8>>) -> Self {
        Self {
            type_tag: type_tag.into(),
            content,
        }
    }

    /// Serialize a message into a container tagged with its schema.
    pub fn make<M: Message>(message: &M) -> Result<Self, CodecError> {
        let content = codec::encode(message)?;
        Ok(Self::new(M::TYPE_TAG, Some(content)))
    }

    /// Attempt to decode a container from bytes.
    ///
    /// Malformed input yields `None`; whether that is an error is up to the
    /// caller.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        codec::decode(bytes).ok()
    }

    /// Serialize this container for transmission.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    /// The type tag of the content.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The serialized content, if any.
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// Consume the container, returning its content.
    pub fn into_content(self) -> Option<Vec<u8>> {
        self.content
    }

    /// Decode the content as `M`. An absent payload is decoded as an empty
    /// byte string, which only succeeds for schemas without data.
    pub fn decode_content<M: Message>(&self) -> Result<M, CodecError> {
        codec::decode(self.content().unwrap_or_default())
    }
}
