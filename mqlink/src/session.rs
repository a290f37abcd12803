//! Single-assignment shared slot for "the outcome of connecting to server S".
//! Concurrent callers share one slot per server, so at most one connect
//! attempt is in flight per server at a time.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::{ClientError, Result};
use crate::transport::{conn_ptr_eq, Conn};

#[derive(Clone)]
enum Slot {
    Unset,
    Resolved(Result<Conn>),
}

/// Shared future for one connect attempt. The creator resolves it exactly
/// once; all other holders await the resolution.
#[derive(Clone)]
pub(crate) struct SessionVar {
    tx: watch::Sender<Slot>,
}

impl SessionVar {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot::Unset);
        Self { tx }
    }

    /// First resolution wins; later calls are no-ops and return false.
    pub(crate) fn resolve(&self, outcome: Result<Conn>) -> bool {
        self.tx.send_if_modified(|slot| match slot {
            Slot::Unset => {
                *slot = Slot::Resolved(outcome);
                true
            }
            Slot::Resolved(_) => false,
        })
    }

    /// Await resolution, up to `timeout`. A timeout yields
    /// `ResponseTimeout` without disturbing the shared slot.
    pub(crate) async fn wait(&self, timeout: Duration) -> Result<Conn> {
        let mut rx = self.tx.subscribe();
        let resolved = async {
            loop {
                {
                    let slot = rx.borrow_and_update();
                    if let Slot::Resolved(r) = &*slot {
                        return r.clone();
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(ClientError::Network("session slot dropped".into()));
                }
            }
        };
        match tokio::time::timeout(timeout, resolved).await {
            Ok(r) => r,
            Err(_) => Err(ClientError::ResponseTimeout),
        }
    }

    /// The connection, if already resolved successfully.
    pub(crate) fn ready(&self) -> Option<Conn> {
        match &*self.tx.borrow() {
            Slot::Resolved(Ok(conn)) => Some(conn.clone()),
            _ => None,
        }
    }

    /// Whether this slot resolved to exactly this connection handle.
    pub(crate) fn holds(&self, conn: &Conn) -> bool {
        match &*self.tx.borrow() {
            Slot::Resolved(Ok(c)) => conn_ptr_eq(c, conn),
            _ => false,
        }
    }

    /// Identity: do both handles share one underlying slot?
    pub(crate) fn same(&self, other: &SessionVar) -> bool {
        self.tx.same_channel(&other.tx)
    }
}
