//! Handler bindings and output transforms
//!
//! A handler maps one datagram to an optional output. The transform then
//! turns that output into a finite stream of results, each of which is
//! broadcast unless it is `None`.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::datagram::{RemoteInfo, MESSAGE_EVENT};

use super::message::Outgoing;

/// Handler callback: payload and sender in, optional output out
pub type MessageCallback =
    Arc<dyn Fn(Bytes, RemoteInfo) -> anyhow::Result<Option<Outgoing>> + Send + Sync>;

/// Maps a handler result to the results that get broadcast
pub type Transform =
    Arc<dyn Fn(Option<Outgoing>) -> BoxStream<'static, Option<Outgoing>> + Send + Sync>;

/// An (event name, callback) pair
#[derive(Clone)]
pub struct HandlerBinding {
    pub message: String,
    pub callback: MessageCallback,
}

impl HandlerBinding {
    pub fn new<F>(message: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Bytes, RemoteInfo) -> anyhow::Result<Option<Outgoing>> + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            callback: Arc::new(callback),
        }
    }

    /// Handler for received datagrams
    pub fn on_message<F>(callback: F) -> Self
    where
        F: Fn(Bytes, RemoteInfo) -> anyhow::Result<Option<Outgoing>> + Send + Sync + 'static,
    {
        Self::new(MESSAGE_EVENT, callback)
    }
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Transform yielding the handler result unchanged
pub fn identity() -> Transform {
    Arc::new(|output| stream::once(async move { output }).boxed())
}

/// Build a transform from a function returning any stream
pub fn transform_fn<F, S>(f: F) -> Transform
where
    F: Fn(Option<Outgoing>) -> S + Send + Sync + 'static,
    S: Stream<Item = Option<Outgoing>> + Send + 'static,
{
    Arc::new(move |output| f(output).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RemoteInfo {
        RemoteInfo::new("127.0.0.1:5000".parse().unwrap(), 2)
    }

    #[tokio::test]
    async fn test_identity_yields_once() {
        let results: Vec<_> = identity()(Some(Outgoing::from("x"))).collect().await;
        assert_eq!(results, vec![Some(Outgoing::from("x"))]);

        let results: Vec<_> = identity()(None).collect().await;
        assert_eq!(results, vec![None]);
    }

    #[tokio::test]
    async fn test_transform_fn_fans_out() {
        let transform = transform_fn(|output| {
            let copies = vec![output.clone(), None, output];
            stream::iter(copies)
        });

        let results: Vec<_> = transform(Some(Outgoing::from("y"))).collect().await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[1], None);
    }

    #[test]
    fn test_on_message_binding() {
        let binding = HandlerBinding::on_message(|payload, _| Ok(Some(payload.into())));

        assert_eq!(binding.message, "message");
        let output = (binding.callback)(Bytes::from_static(b"hi"), remote()).unwrap();
        assert_eq!(output, Some(Outgoing::Binary(Bytes::from_static(b"hi"))));
    }
}
