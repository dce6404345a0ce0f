//! Per-node completion signals.
//!
//! Every resource node owns one `watch` channel. Deferred values built from a
//! node's outputs hold a receiver and suspend until the node publishes a
//! terminal signal.

use std::sync::Arc;
use tokio::sync::watch;

use crate::graph::ResourceId;

use super::properties::PropertySet;

/// Completion state published by a resource node.
#[derive(Debug, Clone, Default)]
pub enum NodeSignal {
    /// The node has not reached a terminal state.
    #[default]
    Pending,
    /// The node's operation succeeded with these outputs.
    Resolved(Arc<PropertySet>),
    /// The node's operation failed.
    Failed {
        /// Failure description.
        cause: String,
    },
    /// The node was never attempted because an upstream node failed.
    Skipped {
        /// The upstream node whose failure originated the skip.
        blocked_by: ResourceId,
        /// The originating failure.
        cause: String,
    },
    /// The node was never attempted because the run stopped early.
    Cancelled {
        /// Why the run stopped.
        reason: String,
    },
}

impl NodeSignal {
    /// Returns true once the node can no longer change state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Sending half of a node's completion signal.
pub type SignalSender = watch::Sender<NodeSignal>;

/// Receiving half of a node's completion signal.
pub type SignalReceiver = watch::Receiver<NodeSignal>;

/// Creates a fresh, pending completion signal.
#[must_use]
pub fn channel() -> SignalSender {
    watch::Sender::new(NodeSignal::Pending)
}

/// Publishes a terminal signal; receivers are woken even if none exist yet.
pub fn publish(sender: &SignalSender, signal: NodeSignal) {
    sender.send_replace(signal);
}

/// Waits until the node publishes a terminal signal.
///
/// If the sending half is dropped first, the node is reported as cancelled.
pub async fn wait_terminal(mut receiver: SignalReceiver) -> NodeSignal {
    match receiver.wait_for(NodeSignal::is_terminal).await {
        Ok(signal) => signal.clone(),
        Err(_) => NodeSignal::Cancelled {
            reason: String::from("run ended before the resource was evaluated"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_waiter_wakes_on_publish() {
        let sender = channel();
        let receiver = sender.subscribe();

        let waiter = tokio::spawn(wait_terminal(receiver));
        publish(
            &sender,
            NodeSignal::Failed {
                cause: String::from("boom"),
            },
        );

        let signal = waiter.await.expect("waiter panicked");
        assert!(matches!(signal, NodeSignal::Failed { cause } if cause == "boom"));
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_cancelled() {
        let sender = channel();
        let receiver = sender.subscribe();
        drop(sender);

        let signal = wait_terminal(receiver).await;
        assert!(matches!(signal, NodeSignal::Cancelled { .. }));
    }
}
