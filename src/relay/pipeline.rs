//! Message pipeline
//!
//! Wires datagram events to stream-server broadcasts. Each handler gets its
//! own task, so one handler's slow transform never delays another handler.
//! Every task stops on the socket's closed signal.
//!
//! ```text
//!   DatagramBinding ──message──► callback(payload, remote)
//!                                     │ Option<Outgoing>
//!                                     ▼
//!                               transform(output) ──► Some(x) ──► server.broadcast(x)
//!                                                 └─► None  ──► dropped
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};

use futures_util::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::datagram::Datagram;
use crate::server::StreamServer;
use crate::shutdown::ShutdownListener;

use super::bridge::Relay;
use super::handler::{HandlerBinding, Transform};
use super::message::Delivery;

/// What happens to a transform stream that is in flight when the relay closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InFlightPolicy {
    /// Drop the remaining results
    #[default]
    Abandon,
    /// Drain the stream; results after the server closed reach nobody
    Complete,
}

/// Running handler subscriptions of one relay
///
/// Dropping the pipeline detaches the tasks; they still end with the relay.
#[derive(Debug)]
pub struct MessagePipeline {
    tasks: Vec<JoinHandle<()>>,
    deliveries: broadcast::Sender<Delivery>,
}

impl MessagePipeline {
    /// Subscribe `handlers` to the relay's socket with the default policy
    pub fn bind(relay: &Relay, handlers: Vec<HandlerBinding>, transform: Transform) -> Self {
        Self::bind_with_policy(relay, handlers, transform, InFlightPolicy::default())
    }

    /// Subscribe `handlers` to the relay's socket
    ///
    /// Subscriptions are in place when this returns. Handlers for events that
    /// carry no datagrams are skipped with a warning.
    pub fn bind_with_policy(
        relay: &Relay,
        handlers: Vec<HandlerBinding>,
        transform: Transform,
        policy: InFlightPolicy,
    ) -> Self {
        let (deliveries, _) = broadcast::channel(relay.server().config().channel_capacity());
        let mut tasks = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let Some(messages) = relay.socket().subscribe(&handler.message) else {
                tracing::warn!(
                    event = %handler.message,
                    "No datagram event with this name, handler skipped"
                );
                continue;
            };

            let task = HandlerTask {
                handler,
                transform: transform.clone(),
                messages,
                closed: relay.socket().closed_signal(),
                server: relay.server().clone(),
                deliveries: deliveries.clone(),
                policy,
            };
            tasks.push(tokio::spawn(task.run()));
        }

        Self { tasks, deliveries }
    }

    /// Subscribe to broadcast records
    pub fn subscribe_deliveries(&self) -> broadcast::Receiver<Delivery> {
        self.deliveries.subscribe()
    }

    /// Number of handlers that were subscribed
    pub fn handler_count(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every handler task has ended
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }

    /// Stop every handler task now
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct HandlerTask {
    handler: HandlerBinding,
    transform: Transform,
    messages: broadcast::Receiver<Datagram>,
    closed: ShutdownListener,
    server: StreamServer,
    deliveries: broadcast::Sender<Delivery>,
    policy: InFlightPolicy,
}

impl HandlerTask {
    async fn run(mut self) {
        loop {
            let datagram = tokio::select! {
                biased;
                _ = self.closed.wait() => break,
                received = self.messages.recv() => match received {
                    Ok(datagram) => datagram,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            event = %self.handler.message,
                            skipped = skipped,
                            "Handler lagging, datagrams dropped"
                        );
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if !self.handle(datagram).await {
                break;
            }
        }

        tracing::debug!(event = %self.handler.message, "Handler subscription ended");
    }

    /// Returns false once the closed signal cut the work short
    async fn handle(&mut self, datagram: Datagram) -> bool {
        let Datagram { payload, remote } = datagram;

        let callback = &*self.handler.callback;
        let output = match catch_unwind(AssertUnwindSafe(|| callback(payload, remote))) {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(
                    event = %self.handler.message,
                    remote = %remote,
                    error = %e,
                    "Message handler failed"
                );
                return true;
            }
            Err(_) => {
                tracing::error!(
                    event = %self.handler.message,
                    remote = %remote,
                    "Message handler panicked"
                );
                return true;
            }
        };

        let mut results = (self.transform)(output);
        loop {
            let next = match self.policy {
                InFlightPolicy::Abandon => tokio::select! {
                    biased;
                    _ = self.closed.wait() => return false,
                    next = results.next() => next,
                },
                InFlightPolicy::Complete => results.next().await,
            };

            // Stream exhausted
            let Some(result) = next else {
                return true;
            };
            let Some(payload) = result else {
                continue;
            };

            if self.policy == InFlightPolicy::Abandon && self.closed.is_triggered() {
                return false;
            }

            let recipients = self.server.broadcast(payload.to_message()).await;
            let _ = self.deliveries.send(Delivery {
                payload,
                remote,
                recipients,
            });
        }
    }
}
