//! Relay output types

use bytes::Bytes;
use tokio_tungstenite::tungstenite::Message;

use crate::datagram::RemoteInfo;

/// A payload broadcast to stream clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Sent as a binary frame
    Binary(Bytes),
    /// Sent as a text frame
    Text(String),
}

impl Outgoing {
    pub fn len(&self) -> usize {
        match self {
            Outgoing::Binary(data) => data.len(),
            Outgoing::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// WebSocket frame carrying this payload
    pub fn to_message(&self) -> Message {
        match self {
            Outgoing::Binary(data) => Message::Binary(data.to_vec()),
            Outgoing::Text(text) => Message::Text(text.clone()),
        }
    }
}

impl From<Bytes> for Outgoing {
    fn from(data: Bytes) -> Self {
        Outgoing::Binary(data)
    }
}

impl From<Vec<u8>> for Outgoing {
    fn from(data: Vec<u8>) -> Self {
        Outgoing::Binary(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Outgoing {
    fn from(data: &'static [u8]) -> Self {
        Outgoing::Binary(Bytes::from_static(data))
    }
}

impl From<String> for Outgoing {
    fn from(text: String) -> Self {
        Outgoing::Text(text)
    }
}

impl From<&str> for Outgoing {
    fn from(text: &str) -> Self {
        Outgoing::Text(text.to_string())
    }
}

/// Record of one broadcast, published by a pipeline
///
/// Pairs the payload with the sender of the datagram it came from.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Outgoing,
    pub remote: RemoteInfo,
    /// Number of open clients the payload was queued for
    pub recipients: usize,
}
