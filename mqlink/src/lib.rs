#![deny(unsafe_code)]

//! # mqlink
//!
//! Client-side connection-and-subscription manager for a message-queue
//! protocol client talking to many independent broker servers: exactly one
//! live connection per server, many logical queue subscriptions multiplexed
//! over it, and transparent reconnect + resubscribe after any network
//! failure. Subscriptions are tracked in per-server *active* and *pending*
//! tables, so nothing is ever lost between a disconnect and the reconnect
//! that follows.
//!
//! The wire protocol, TLS setup and the request/response exchange live
//! behind the [`Connector`]/[`Connection`] traits; this crate owns the
//! lifecycle state machine around them.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mqlink::async_trait::async_trait;
//! use mqlink::{ClientConfig, Conn, Connector, QueueClient, Result, ServerAddr, Sub};
//!
//! struct TcpConnector;
//!
//! #[async_trait]
//! impl Connector for TcpConnector {
//!     async fn connect(&self, srv: &ServerAddr, cfg: &ClientConfig) -> Result<Conn> {
//!         // dial `srv` with the real transport here
//!         unimplemented!()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = QueueClient::new(Arc::new(TcpConnector), ClientConfig::default());
//!     let mut events = client.events().expect("events taken once");
//!     tokio::spawn(async move {
//!         while let Some(ev) = events.recv().await {
//!             println!("{ev:?}");
//!         }
//!     });
//!
//!     let srv: ServerAddr = "broker1.example.com:5223".parse().unwrap();
//!     client.subscribe(&srv, Sub::recipient("q1"), "credential".into()).await?;
//!     client.close_all().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod transport;
pub mod types;

mod manager;
mod session;
mod subs;

pub use client::QueueClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use event::Event;
pub use transport::{Conn, Connection, Connector};
pub use types::{PartyRole, QueueId, ServerAddr, Sub, SubKey};

/// Re-exports for [`Connector`]/[`Connection`] implementors.
pub use async_trait;
pub use bytes;
pub use bytestring;
