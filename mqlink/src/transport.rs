//! Narrow interfaces to the protocol-client collaborator. Wire encoding,
//! TLS setup and the request/response exchange all live behind these traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::types::{PartyRole, QueueId, ServerAddr, SubKey};

pub type Conn = Arc<dyn Connection>;

/// Establishes transport sessions. One connect call per session; retry
/// policy is owned by the caller.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, srv: &ServerAddr, cfg: &ClientConfig) -> Result<Conn>;
}

/// One established transport session.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Subscribe a single queue.
    async fn subscribe(&self, role: PartyRole, queue: &QueueId, key: &SubKey) -> Result<()>;

    /// One multi-subscribe request. `Err` means the whole request failed;
    /// `Ok` carries one result per input, preserving input order.
    async fn subscribe_many(
        &self,
        role: PartyRole,
        subs: &[(QueueId, SubKey)],
    ) -> Result<Vec<(QueueId, Result<()>)>>;

    /// Remove a subscription on the broker.
    async fn unsubscribe(&self, role: PartyRole, queue: &QueueId) -> Result<()>;

    /// Best-effort teardown.
    async fn close(&self);

    /// Resolves once, when the connection is lost. The manager runs one
    /// watcher task per handle awaiting this.
    async fn closed(&self);
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Connection")
    }
}

#[inline]
pub(crate) fn conn_ptr_eq(a: &Conn, b: &Conn) -> bool {
    Arc::ptr_eq(a, b)
}
