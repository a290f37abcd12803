//! Per-server active/pending subscription tables.
//!
//! Both tables for one server live inside a single map entry, and every
//! multi-step transition runs while holding that entry's guard, so no
//! observer can see a torn intermediate state (e.g. a subscription missing
//! from both tables mid-move).

use crate::types::{DashMap, HashMap, PartyRole, QueueId, ServerAddr, Sub, SubKey};

#[derive(Default)]
struct ServerSubs {
    /// Confirmed live on the current connection.
    active: HashMap<Sub, SubKey>,
    /// Requested but unconfirmed, or orphaned by a disconnect.
    pending: HashMap<Sub, SubKey>,
}

#[derive(Clone, Default)]
pub(crate) struct SubTable {
    servers: std::sync::Arc<DashMap<ServerAddr, ServerSubs>>,
}

impl SubTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a subscription request before any network traffic, so a racing
    /// disconnect can never lose it.
    pub(crate) fn insert_pending(&self, srv: &ServerAddr, sub: Sub, key: SubKey) {
        self.servers.entry(srv.clone()).or_default().pending.insert(sub, key);
    }

    pub(crate) fn insert_pending_many(&self, srv: &ServerAddr, role: PartyRole, items: &[(QueueId, SubKey)]) {
        let mut entry = self.servers.entry(srv.clone()).or_default();
        for (queue, key) in items {
            entry.pending.insert(Sub::new(role, queue.clone()), key.clone());
        }
    }

    /// Confirmed by the broker: move pending -> active. Returns false if the
    /// subscription is no longer pending (e.g. removed meanwhile).
    pub(crate) fn confirm(&self, srv: &ServerAddr, sub: &Sub) -> bool {
        match self.servers.get_mut(srv) {
            Some(mut entry) => match entry.pending.remove(sub) {
                Some(key) => {
                    entry.active.insert(sub.clone(), key);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Permanently failed: drop from pending, never inserted into active.
    pub(crate) fn fail_permanent(&self, srv: &ServerAddr, sub: &Sub) -> bool {
        self.servers.get_mut(srv).map(|mut entry| entry.pending.remove(sub).is_some()).unwrap_or(false)
    }

    /// Disconnect transition: drain active into pending in one step,
    /// merging (an existing pending entry wins). Returns the drained subs.
    pub(crate) fn on_disconnect_drain(&self, srv: &ServerAddr) -> Vec<Sub> {
        match self.servers.get_mut(srv) {
            Some(mut entry) => {
                let entry = &mut *entry;
                let drained: Vec<Sub> = entry.active.keys().cloned().collect();
                for (sub, key) in entry.active.drain() {
                    entry.pending.entry(sub).or_insert(key);
                }
                drained
            }
            None => Vec::new(),
        }
    }

    /// Snapshot of pending subscriptions not already active (the idempotent
    /// resubscribe filter), partitioned deterministically: Notifier first,
    /// then Recipient, each sorted by queue id.
    pub(crate) fn resub_snapshot(&self, srv: &ServerAddr) -> Vec<(Sub, SubKey)> {
        let mut subs: Vec<(Sub, SubKey)> = match self.servers.get(srv) {
            Some(entry) => entry
                .pending
                .iter()
                .filter(|(sub, _)| !entry.active.contains_key(*sub))
                .map(|(sub, key)| (sub.clone(), key.clone()))
                .collect(),
            None => Vec::new(),
        };
        subs.sort_by(|(a, _), (b, _)| {
            role_rank(a.role).cmp(&role_rank(b.role)).then_with(|| a.queue.cmp(&b.queue))
        });
        subs
    }

    /// Remove a subscription from both tables. Returns its credential if it
    /// was present anywhere.
    pub(crate) fn remove(&self, srv: &ServerAddr, sub: &Sub) -> Option<SubKey> {
        self.servers.get_mut(srv).and_then(|mut entry| {
            let active = entry.active.remove(sub);
            let pending = entry.pending.remove(sub);
            active.or(pending)
        })
    }

    /// (active, pending) snapshot for one server.
    pub(crate) fn snapshot(&self, srv: &ServerAddr) -> (Vec<(Sub, SubKey)>, Vec<(Sub, SubKey)>) {
        match self.servers.get(srv) {
            Some(entry) => (
                entry.active.iter().map(|(s, k)| (s.clone(), k.clone())).collect(),
                entry.pending.iter().map(|(s, k)| (s.clone(), k.clone())).collect(),
            ),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Servers currently holding any subscription state.
    pub(crate) fn servers(&self) -> Vec<ServerAddr> {
        self.servers
            .iter()
            .filter(|e| !e.active.is_empty() || !e.pending.is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    pub(crate) fn has_pending(&self, srv: &ServerAddr) -> bool {
        self.servers.get(srv).map(|e| !e.pending.is_empty()).unwrap_or(false)
    }
}

#[inline]
fn role_rank(role: PartyRole) -> u8 {
    match role {
        PartyRole::Notifier => 0,
        PartyRole::Recipient => 1,
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn key(s: &str) -> SubKey {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn srv() -> ServerAddr {
        ServerAddr::new("broker", 5223)
    }

    #[test]
    fn pending_then_confirm() {
        let t = SubTable::new();
        let s = srv();
        let sub = Sub::recipient("q1");
        t.insert_pending(&s, sub.clone(), key("k1"));

        let (active, pending) = t.snapshot(&s);
        assert!(active.is_empty());
        assert_eq!(pending, vec![(sub.clone(), key("k1"))]);

        assert!(t.confirm(&s, &sub));
        let (active, pending) = t.snapshot(&s);
        assert_eq!(active, vec![(sub.clone(), key("k1"))]);
        assert!(pending.is_empty());

        // already confirmed, nothing pending to move
        assert!(!t.confirm(&s, &sub));
    }

    #[test]
    fn permanent_failure_drops_pending() {
        let t = SubTable::new();
        let s = srv();
        let sub = Sub::notifier("q1");
        t.insert_pending(&s, sub.clone(), key("k"));
        assert!(t.fail_permanent(&s, &sub));
        let (active, pending) = t.snapshot(&s);
        assert!(active.is_empty() && pending.is_empty());
    }

    #[test]
    fn disconnect_drains_active_into_pending() {
        let t = SubTable::new();
        let s = srv();
        for q in ["q1", "q2"] {
            let sub = Sub::recipient(q);
            t.insert_pending(&s, sub.clone(), key(q));
            t.confirm(&s, &sub);
        }
        // one entry already pending with its own credential; the merge keeps it
        t.insert_pending(&s, Sub::recipient("q3"), key("k3"));

        let mut drained = t.on_disconnect_drain(&s);
        drained.sort();
        assert_eq!(drained, vec![Sub::recipient("q1"), Sub::recipient("q2")]);

        let (active, pending) = t.snapshot(&s);
        assert!(active.is_empty());
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn disconnect_merge_prefers_existing_pending() {
        let t = SubTable::new();
        let s = srv();
        let sub = Sub::recipient("q1");
        t.insert_pending(&s, sub.clone(), key("old"));
        t.confirm(&s, &sub);
        t.insert_pending(&s, sub.clone(), key("new"));

        t.on_disconnect_drain(&s);
        let (_, pending) = t.snapshot(&s);
        assert_eq!(pending, vec![(sub, key("new"))]);
    }

    #[test]
    fn resub_snapshot_filters_and_orders() {
        let t = SubTable::new();
        let s = srv();
        t.insert_pending(&s, Sub::recipient("b"), key("1"));
        t.insert_pending(&s, Sub::recipient("a"), key("2"));
        t.insert_pending(&s, Sub::notifier("z"), key("3"));
        // concurrently confirmed: must be excluded from the snapshot
        t.insert_pending(&s, Sub::recipient("c"), key("4"));
        t.confirm(&s, &Sub::recipient("c"));

        let snap: Vec<Sub> = t.resub_snapshot(&s).into_iter().map(|(sub, _)| sub).collect();
        assert_eq!(snap, vec![Sub::notifier("z"), Sub::recipient("a"), Sub::recipient("b")]);
    }

    #[test]
    fn remove_clears_both_tables() {
        let t = SubTable::new();
        let s = srv();
        let sub = Sub::recipient("q1");
        t.insert_pending(&s, sub.clone(), key("k"));
        t.confirm(&s, &sub);
        assert_eq!(t.remove(&s, &sub), Some(key("k")));
        assert_eq!(t.remove(&s, &sub), None);
        assert!(t.servers().is_empty());
    }
}
