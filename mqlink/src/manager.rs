//! Per-server connection lifecycle: session slots, the disconnect callback
//! and the reconnect/resubscribe loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use backoff::future::retry;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::event::{Event, EventTx};
use crate::session::SessionVar;
use crate::subs::SubTable;
use crate::transport::{Conn, Connector};
use crate::types::{DashMap, PartyRole, QueueId, ServerAddr, Sub, SubKey};

#[derive(Clone)]
pub(crate) struct ConnectionManager {
    connector: Arc<dyn Connector>,
    pub(crate) cfg: Arc<ClientConfig>,
    sessions: Arc<DashMap<ServerAddr, SessionVar>>,
    pub(crate) subs: SubTable,
    events: EventTx,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    reconnecting: Arc<DashMap<ServerAddr, ()>>,
    closed: Arc<AtomicBool>,
}

impl ConnectionManager {
    pub(crate) fn new(connector: Arc<dyn Connector>, cfg: ClientConfig) -> (Self, mpsc::Receiver<Event>) {
        let (events, events_rx) = EventTx::channel(cfg.event_queue_cap);
        let mgr = Self {
            connector,
            cfg: Arc::new(cfg),
            sessions: Arc::new(DashMap::default()),
            subs: SubTable::new(),
            events,
            tasks: Arc::new(Mutex::new(Vec::new())),
            reconnecting: Arc::new(DashMap::default()),
            closed: Arc::new(AtomicBool::new(false)),
        };
        (mgr, events_rx)
    }

    #[inline]
    pub(crate) async fn emit(&self, ev: Event) {
        self.events.emit(ev).await;
    }

    /// Get the live connection for `srv`, creating it if necessary. Exactly
    /// one caller runs the connect attempt; concurrent callers await the
    /// shared session slot up to `connect_timeout`.
    pub(crate) async fn get_conn(&self, srv: &ServerAddr) -> Result<Conn> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let (var, created) = match self.sessions.entry(srv.clone()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let var = SessionVar::new();
                e.insert(var.clone());
                (var, true)
            }
        };
        if created {
            self.connect_resolving(srv, var).await
        } else {
            var.wait(self.cfg.connect_timeout).await
        }
    }

    async fn connect_resolving(&self, srv: &ServerAddr, var: SessionVar) -> Result<Conn> {
        match self.connector.connect(srv, &self.cfg).await {
            Ok(conn) => {
                // close_all may have swept the table while this attempt was
                // in flight; do not let a late connection escape teardown
                if self.closed.load(Ordering::SeqCst) {
                    conn.close().await;
                    self.sessions.remove_if(srv, |_, v| v.same(&var));
                    var.resolve(Err(ClientError::Closed));
                    return Err(ClientError::Closed);
                }
                var.resolve(Ok(conn.clone()));
                self.spawn_disconnect_watcher(srv.clone(), conn.clone());
                self.events.emit(Event::Connected(srv.clone())).await;
                Ok(conn)
            }
            Err(e) => {
                log::debug!("connect to {srv} failed: {e}");
                // Resolved-error slots are never reused: clear the table
                // entry before resolving, so the next caller starts fresh
                // while current waiters still observe this error.
                self.sessions.remove_if(srv, |_, v| v.same(&var));
                var.resolve(Err(e.clone()));
                if e.is_transient() && self.subs.has_pending(srv) {
                    self.start_reconnector(srv.clone());
                }
                Err(e)
            }
        }
    }

    /// The connection for `srv` if one is already established.
    pub(crate) fn ready_conn(&self, srv: &ServerAddr) -> Option<Conn> {
        self.sessions.get(srv).and_then(|v| v.ready())
    }

    fn spawn_disconnect_watcher(&self, srv: ServerAddr, conn: Conn) {
        let mgr = self.clone();
        self.track(tokio::spawn(async move {
            conn.closed().await;
            mgr.handle_disconnect(&srv, &conn).await;
        }));
    }

    /// Invoked once per handle when its connection is lost: clear the
    /// session slot, move actives to pending and kick off the reconnector.
    async fn handle_disconnect(&self, srv: &ServerAddr, conn: &Conn) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.sessions.remove_if(srv, |_, v| v.holds(conn));
        let orphaned = self.subs.on_disconnect_drain(srv);
        if orphaned.is_empty() {
            return;
        }
        log::info!("{srv} disconnected, {} subscription(s) moved to pending", orphaned.len());
        self.events.emit(Event::Disconnected(srv.clone(), orphaned)).await;
        self.start_reconnector(srv.clone());
    }

    /// Spawn the reconnect loop for `srv` unless one is already running.
    pub(crate) fn start_reconnector(&self, srv: ServerAddr) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.reconnecting.insert(srv.clone(), ()).is_some() {
            return;
        }
        let mgr = self.clone();
        self.track(tokio::spawn(async move {
            let _flag = scopeguard::guard((mgr.clone(), srv.clone()), |(mgr, srv)| {
                mgr.reconnecting.remove(&srv);
            });
            if let Err(e) = mgr.reconnect(&srv).await {
                log::error!("reconnect to {srv} aborted: {e}");
            }
        }));
    }

    /// Retry with backoff until a connection is up and all pending
    /// subscriptions are replayed. A transient error anywhere restarts the
    /// whole loop; already-confirmed subscriptions are filtered out on the
    /// next pass.
    async fn reconnect(&self, srv: &ServerAddr) -> Result<()> {
        retry(self.cfg.reconnect_backoff(), || async {
            if self.closed.load(Ordering::SeqCst) {
                return Err(backoff::Error::permanent(ClientError::Closed));
            }
            let fresh = self.ready_conn(srv).is_none();
            let conn = self.get_conn(srv).await.map_err(retry_class)?;
            if fresh {
                self.events.emit(Event::Reconnected(srv.clone())).await;
            }
            self.resubscribe_all(srv, &conn).await.map_err(retry_class)?;
            Ok(())
        })
        .await
    }

    async fn resubscribe_all(&self, srv: &ServerAddr, conn: &Conn) -> Result<()> {
        let snapshot = self.subs.resub_snapshot(srv);
        if snapshot.is_empty() {
            return Ok(());
        }
        log::debug!("{srv} resubscribing {} subscription(s)", snapshot.len());
        let batch_size = self.cfg.resub_batch_size.max(1);
        let mut idx = 0;
        // the snapshot is role-partitioned (notifiers first); batches never
        // mix roles
        while idx < snapshot.len() {
            let role = snapshot[idx].0.role;
            let role_end = snapshot[idx..]
                .iter()
                .position(|(s, _)| s.role != role)
                .map(|p| idx + p)
                .unwrap_or(snapshot.len());
            let end = role_end.min(idx + batch_size);
            self.send_batch(srv, conn, role, &snapshot[idx..end]).await?;
            idx = end;
        }
        Ok(())
    }

    async fn send_batch(
        &self,
        srv: &ServerAddr,
        conn: &Conn,
        role: PartyRole,
        batch: &[(Sub, SubKey)],
    ) -> Result<()> {
        let req: Vec<(QueueId, SubKey)> =
            batch.iter().map(|(s, k)| (s.queue.clone(), k.clone())).collect();
        let results = match conn.subscribe_many(role, &req).await {
            Ok(results) => results,
            Err(e) => {
                // a request-level permanent rejection drops the whole batch;
                // a transient one leaves it pending for the next pass
                if e.is_permanent() {
                    let failed: Vec<(Sub, ClientError)> = batch
                        .iter()
                        .map(|(s, _)| {
                            self.subs.fail_permanent(srv, s);
                            (s.clone(), e.clone())
                        })
                        .collect();
                    self.events.emit(Event::SubscriptionError(srv.clone(), failed)).await;
                }
                return Err(e);
            }
        };
        let mut confirmed = Vec::new();
        let mut failed = Vec::new();
        let mut transient: Option<ClientError> = None;
        for (queue, res) in results {
            let sub = Sub::new(role, queue);
            match res {
                Ok(()) => {
                    self.subs.confirm(srv, &sub);
                    confirmed.push(sub);
                }
                Err(e) if e.is_transient() => {
                    if transient.is_none() {
                        transient = Some(e);
                    }
                }
                Err(e) => {
                    self.subs.fail_permanent(srv, &sub);
                    failed.push((sub, e));
                }
            }
        }
        if !confirmed.is_empty() {
            self.events.emit(Event::Resubscribed(srv.clone(), confirmed)).await;
        }
        if !failed.is_empty() {
            self.events.emit(Event::SubscriptionError(srv.clone(), failed)).await;
        }
        // abort remaining batches, the backoff loop retries the whole pass
        match transient {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn track(&self, h: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(h);
    }

    /// Shut everything down: cancel and await all background tasks, then
    /// close every live connection best-effort.
    pub(crate) async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for t in &tasks {
            t.abort();
        }
        for t in tasks {
            let _ = t.await;
        }
        self.reconnecting.clear();
        let mut conns: Vec<Conn> = Vec::new();
        self.sessions.retain(|_, var| {
            if let Some(conn) = var.ready() {
                conns.push(conn);
            }
            false
        });
        futures::future::join_all(conns.iter().map(|c| c.close())).await;
    }
}

#[inline]
fn retry_class(e: ClientError) -> backoff::Error<ClientError> {
    if e.is_transient() {
        backoff::Error::transient(e)
    } else {
        backoff::Error::permanent(e)
    }
}
