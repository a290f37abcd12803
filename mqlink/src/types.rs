use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

/// Opaque broker-assigned queue identifier.
pub type QueueId = ByteString;

/// Authentication private key for one subscription, resent on every resubscribe.
pub type SubKey = Bytes;

/// Broker endpoint identity, the key of all per-server tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerAddr {
    pub host: ByteString,
    pub port: u16,
    /// Optional certificate fingerprint pinning the endpoint identity.
    #[serde(default)]
    pub fingerprint: Option<ByteString>,
}

impl ServerAddr {
    #[inline]
    pub fn new<H: Into<ByteString>>(host: H, port: u16) -> Self {
        Self { host: host.into(), port, fingerprint: None }
    }

    #[inline]
    pub fn with_fingerprint<F: Into<ByteString>>(mut self, fp: F) -> Self {
        self.fingerprint = Some(fp.into());
        self
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (host, port) =
            s.rsplit_once(':').ok_or_else(|| anyhow!("invalid server address: {}", s))?;
        if host.is_empty() {
            return Err(anyhow!("invalid server address: {}", s));
        }
        let port = port.parse::<u16>().map_err(|e| anyhow!("invalid server port: {}", e))?;
        Ok(ServerAddr::new(host, port))
    }
}

/// Subscription namespace within one queue. A queue may be subscribed to
/// separately for receiving messages and for receiving notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartyRole {
    Recipient,
    Notifier,
}

/// Subscription identity, unique per (role, queue, server).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sub {
    pub role: PartyRole,
    pub queue: QueueId,
}

impl Sub {
    #[inline]
    pub fn new<Q: Into<QueueId>>(role: PartyRole, queue: Q) -> Self {
        Self { role, queue: queue.into() }
    }

    #[inline]
    pub fn recipient<Q: Into<QueueId>>(queue: Q) -> Self {
        Self::new(PartyRole::Recipient, queue)
    }

    #[inline]
    pub fn notifier<Q: Into<QueueId>>(queue: Q) -> Self {
        Self::new(PartyRole::Notifier, queue)
    }
}

impl fmt::Display for Sub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            PartyRole::Recipient => write!(f, "rcv/{}", self.queue),
            PartyRole::Notifier => write!(f, "ntf/{}", self.queue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_addr_parse() {
        let srv: ServerAddr = "broker1.example.com:5223".parse().unwrap();
        assert_eq!(AsRef::<str>::as_ref(&srv.host), "broker1.example.com");
        assert_eq!(srv.port, 5223);
        assert!(srv.fingerprint.is_none());
        assert_eq!(srv.to_string(), "broker1.example.com:5223");

        assert!("no-port".parse::<ServerAddr>().is_err());
        assert!(":5223".parse::<ServerAddr>().is_err());
        assert!("host:notaport".parse::<ServerAddr>().is_err());
    }

    #[test]
    fn sub_identity() {
        let a = Sub::recipient("q1");
        let b = Sub::notifier("q1");
        assert_ne!(a, b);
        assert_eq!(a, Sub::new(PartyRole::Recipient, "q1"));
        assert_eq!(a.to_string(), "rcv/q1");
        assert_eq!(b.to_string(), "ntf/q1");
    }
}
