//! # netconf - NETCONF Client for Network Devices
//!
//! `netconf` is a Rust client for the NETCONF network management protocol
//! (RFC 6241). It connects to network devices over SSH (RFC 6242) or
//! mutually-authenticated TLS, negotiates capabilities, and exposes the
//! protocol operations (`get`, `get-config`, `edit-config`, `commit`,
//! locks, subscriptions, and more) as structured async calls. A call-home
//! listener (RFC 8071) accepts connections dialed in by devices.
//!
//! ## Features
//!
//! - **Both framings**: end-of-message and chunked (base:1.1), selected
//!   automatically from the hello exchange
//! - **Concurrent RPCs**: replies are correlated by `message-id`, so any
//!   number of requests can be in flight on one session
//! - **Notifications**: RFC 5277 subscriptions with a pull-based queue
//! - **Lock handling**: `lock` retries while the datastore is contended,
//!   bounded by the caller's deadline
//! - **Call-home**: server-role SSH and TLS accepts per RFC 8071
//! - **Async/Await**: built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netconf::connect::{SshConnectOptions, connect_ssh};
//! use netconf::manager::Manager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut options = SshConnectOptions::new("192.0.2.1", "admin", "password");
//!     options.port = 830;
//!
//!     let session = connect_ssh(&options).await?;
//!     println!("session {} established", session.session_id());
//!
//!     let manager = Manager::new(session);
//!     let running = manager.get_config("running", None, None).await?;
//!     if let Some(data) = running.data {
//!         println!("{data}");
//!     }
//!
//!     manager.close_session().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::Session`] - One NETCONF session: hello exchange, framing,
//!   reply correlation, notification queue
//! - [`manager::Manager`] - Protocol operations as structured calls
//! - [`connect`] - Outbound SSH and TLS establishment
//! - [`callhome::CallhomeManager`] - Listener for device-initiated dials
//! - [`error::NetconfError`] - Error taxonomy for transport, protocol,
//!   and rpc failures
//! - [`config`] - SSH algorithm profiles for legacy device compatibility

pub mod callhome;
pub mod config;
pub mod connect;
pub mod error;
pub mod frame;
pub mod manager;
pub mod rpc;
pub mod session;

mod xml;
