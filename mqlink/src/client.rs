//! Public subscribe operations and the event stream.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::event::Event;
use crate::manager::ConnectionManager;
use crate::transport::Connector;
use crate::types::{PartyRole, QueueId, ServerAddr, Sub, SubKey};

/// Connection-and-subscription manager for many broker servers: one live
/// connection per server, many queue subscriptions multiplexed over it,
/// transparent reconnect and resubscribe after network failures.
pub struct QueueClient {
    mgr: ConnectionManager,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
}

impl QueueClient {
    pub fn new(connector: Arc<dyn Connector>, cfg: ClientConfig) -> Self {
        let (mgr, events_rx) = ConnectionManager::new(connector, cfg);
        Self { mgr, events_rx: Mutex::new(Some(events_rx)) }
    }

    /// Take the event stream. Single consumer; returns `None` after the
    /// first call.
    pub fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.events_rx.lock().take()
    }

    /// Subscribe one queue. The request is recorded as pending before any
    /// network traffic, so a racing disconnect cannot lose it. A transient
    /// error leaves the subscription pending (a later reconnect replays it);
    /// a permanent error removes it and emits a `SubscriptionError` event.
    pub async fn subscribe(&self, srv: &ServerAddr, sub: Sub, key: SubKey) -> Result<()> {
        self.mgr.subs.insert_pending(srv, sub.clone(), key.clone());
        let conn = match self.mgr.get_conn(srv).await {
            Ok(conn) => conn,
            Err(e) => {
                if e.is_permanent() {
                    self.mgr.subs.fail_permanent(srv, &sub);
                    self.mgr.emit(Event::SubscriptionError(srv.clone(), vec![(sub, e.clone())])).await;
                }
                return Err(e);
            }
        };
        match conn.subscribe(sub.role, &sub.queue, &key).await {
            Ok(()) => {
                self.mgr.subs.confirm(srv, &sub);
                Ok(())
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                self.mgr.subs.fail_permanent(srv, &sub);
                self.mgr.emit(Event::SubscriptionError(srv.clone(), vec![(sub, e.clone())])).await;
                Err(e)
            }
        }
    }

    /// Bulk subscribe within one role namespace, e.g. restoring all queues
    /// on startup. Inputs are pre-chunked into multi-subscribe requests of
    /// at most `resub_batch_size` each. Returns one outcome per input, in
    /// input order. If connection acquisition fails, every input reports
    /// that same error and nothing is attempted.
    pub async fn subscribe_many(
        &self,
        srv: &ServerAddr,
        role: PartyRole,
        items: Vec<(QueueId, SubKey)>,
    ) -> Vec<(QueueId, Result<()>)> {
        if items.is_empty() {
            return Vec::new();
        }
        self.mgr.subs.insert_pending_many(srv, role, &items);
        let conn = match self.mgr.get_conn(srv).await {
            Ok(conn) => conn,
            Err(e) => {
                if e.is_permanent() {
                    let failed: Vec<(Sub, ClientError)> =
                        items.iter().map(|(q, _)| (Sub::new(role, q.clone()), e.clone())).collect();
                    for (sub, _) in &failed {
                        self.mgr.subs.fail_permanent(srv, sub);
                    }
                    self.mgr.emit(Event::SubscriptionError(srv.clone(), failed)).await;
                }
                return items.into_iter().map(|(q, _)| (q, Err(e.clone()))).collect();
            }
        };

        let batch_size = self.mgr.cfg.resub_batch_size.max(1);
        let mut out: Vec<(QueueId, Result<()>)> = Vec::with_capacity(items.len());
        let mut aborted: Option<ClientError> = None;
        for chunk in items.chunks(batch_size) {
            if let Some(e) = &aborted {
                // entries stay pending, discoverable by a later reconnect
                out.extend(chunk.iter().map(|(q, _)| (q.clone(), Err(e.clone()))));
                continue;
            }
            match conn.subscribe_many(role, chunk).await {
                Ok(results) => {
                    let mut failed: Vec<(Sub, ClientError)> = Vec::new();
                    for (queue, res) in results {
                        let sub = Sub::new(role, queue.clone());
                        match res {
                            Ok(()) => {
                                self.mgr.subs.confirm(srv, &sub);
                                out.push((queue, Ok(())));
                            }
                            Err(e) if e.is_transient() => {
                                if aborted.is_none() {
                                    aborted = Some(e.clone());
                                }
                                out.push((queue, Err(e)));
                            }
                            Err(e) => {
                                self.mgr.subs.fail_permanent(srv, &sub);
                                failed.push((sub, e.clone()));
                                out.push((queue, Err(e)));
                            }
                        }
                    }
                    if !failed.is_empty() {
                        self.mgr.emit(Event::SubscriptionError(srv.clone(), failed)).await;
                    }
                }
                Err(e) => {
                    // whole request failed; only the attempted chunk is
                    // dropped from pending when the error is permanent
                    if e.is_permanent() {
                        let failed: Vec<(Sub, ClientError)> = chunk
                            .iter()
                            .map(|(q, _)| (Sub::new(role, q.clone()), e.clone()))
                            .collect();
                        for (sub, _) in &failed {
                            self.mgr.subs.fail_permanent(srv, sub);
                        }
                        self.mgr.emit(Event::SubscriptionError(srv.clone(), failed)).await;
                    }
                    out.extend(chunk.iter().map(|(q, _)| (q.clone(), Err(e.clone()))));
                    aborted = Some(e);
                }
            }
        }
        out
    }

    /// Forget a subscription and best-effort remove it on the broker.
    pub async fn unsubscribe(&self, srv: &ServerAddr, sub: &Sub) {
        if self.mgr.subs.remove(srv, sub).is_none() {
            return;
        }
        if let Some(conn) = self.mgr.ready_conn(srv) {
            if let Err(e) = conn.unsubscribe(sub.role, &sub.queue).await {
                log::debug!("unsubscribe {sub} on {srv} failed: {e}");
            }
        }
    }

    /// (active, pending) snapshot for one server.
    pub fn subscriptions(&self, srv: &ServerAddr) -> (Vec<(Sub, SubKey)>, Vec<(Sub, SubKey)>) {
        self.mgr.subs.snapshot(srv)
    }

    /// Servers currently holding any subscription state.
    pub fn servers(&self) -> Vec<ServerAddr> {
        self.mgr.subs.servers()
    }

    /// Shut down: cancel all background tasks and close every connection.
    /// Further operations fail with `ClientError::Closed`.
    pub async fn close_all(&self) {
        self.mgr.close_all().await;
    }
}
