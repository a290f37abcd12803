use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::types::{ServerAddr, Sub};

/// Notifications delivered to the application, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A connection to the server was established.
    Connected(ServerAddr),
    /// The connection was lost; the listed subscriptions moved to pending.
    Disconnected(ServerAddr, Vec<Sub>),
    /// The reconnect loop re-established the connection.
    Reconnected(ServerAddr),
    /// One resubscribe batch completed; the listed subscriptions are active again.
    Resubscribed(ServerAddr, Vec<Sub>),
    /// Permanently failed subscriptions, aggregated per batch.
    SubscriptionError(ServerAddr, Vec<(Sub, ClientError)>),
}

/// Bounded event pipe, many producers and a single consumer. Producers
/// suspend when the queue is full; events are never dropped while the
/// consumer is alive.
#[derive(Clone)]
pub(crate) struct EventTx {
    tx: mpsc::Sender<Event>,
}

impl EventTx {
    #[inline]
    pub(crate) fn channel(cap: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(cap.max(1));
        (Self { tx }, rx)
    }

    #[inline]
    pub(crate) async fn emit(&self, ev: Event) {
        if let Err(e) = self.tx.send(ev).await {
            log::debug!("event receiver dropped, discarding {:?}", e.0);
        }
    }
}
