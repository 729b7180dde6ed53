//! NETCONF session establishment and message dispatch.
//!
//! A [`Session`] owns one [`Transport`] and drives the protocol engine:
//! the hello exchange and framing negotiation, the background dispatch
//! loop that reassembles and classifies inbound messages, the
//! correlation table matching `<rpc-reply>` messages to their callers,
//! and the notification queue. Higher-level operation builders live in
//! [`crate::manager`].
//!
//! # Main Components
//!
//! - [`Session`] - One established NETCONF session
//! - [`Transport`] - Byte stream over SSH, TLS, or an in-memory pipe
//! - [`PendingReply`] - A caller's handle to one outstanding RPC

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::mpsc::{Receiver, Sender, UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Notify, oneshot};

use crate::error::NetconfError;
use crate::frame::{FrameMode, Framer};
use crate::{rpc, xml};

pub use transport::Transport;

/// Capability URI for NETCONF 1.0 (EOM framing).
pub const CAP_BASE_10: &str = "urn:ietf:params:netconf:base:1.0";

/// Capability URI for NETCONF 1.1 (chunked framing).
pub const CAP_BASE_11: &str = "urn:ietf:params:netconf:base:1.1";

/// The hello sent by this implementation: both framings are supported,
/// so both base capabilities are advertised.
pub(crate) const DEFAULT_HELLO: &str = "<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">\
<capabilities>\
<capability>urn:ietf:params:netconf:base:1.0</capability>\
<capability>urn:ietf:params:netconf:base:1.1</capability>\
</capabilities>\
</hello>";

/// Resolution of one outstanding RPC: the raw reply text, or the error
/// that ended the wait.
pub(crate) type RpcOutcome = Result<String, NetconfError>;

/// State shared between caller contexts and the dispatch loop.
///
/// The correlation table and the poison slots are the only mutable state
/// both sides touch, so they sit behind plain mutexes; everything else
/// on the session is immutable after the hello exchange.
#[derive(Debug)]
struct Shared {
    /// Correlation table: message-id of each in-flight RPC to the slot
    /// its reply resolves.
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcOutcome>>>,

    /// Set once the session closed, explicitly or by transport failure.
    closed: AtomicBool,

    /// Deferred protocol error from unclassifiable inbound content,
    /// surfaced on the next send.
    protocol_error: Mutex<Option<String>>,
}

impl Shared {
    /// Resolves every outstanding request with a fresh error.
    fn fail_all_pending(&self, make_err: impl Fn() -> NetconfError) {
        let drained: Vec<_> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(poisoned) => poisoned.into_inner().drain().collect(),
        };
        for (id, slot) in drained {
            trace!("failing pending request {id}");
            let _ = slot.send(Err(make_err()));
        }
    }
}

/// One established session with a NETCONF peer.
///
/// Created by [`Session::establish`] after the transport handshake; the
/// constructor performs the hello exchange and spawns the dispatch
/// loop. All methods take `&self` and are safe to call from concurrent
/// tasks. Dropping the session (or calling [`Session::close`]) stops
/// the loop and closes the transport.
#[derive(Debug)]
pub struct Session {
    shared: Arc<Shared>,
    outbound: Sender<Vec<u8>>,
    shutdown: Arc<Notify>,

    /// Framing negotiated by the hello exchange; fixed afterwards.
    mode: FrameMode,

    /// Session identifier assigned by the peer's hello.
    session_id: u64,

    /// Capability URIs from the peer's hello.
    server_capabilities: Vec<String>,

    /// Capability URIs this side advertised.
    client_capabilities: Vec<String>,

    /// Next message-id; monotonically increasing, never reused.
    next_message_id: AtomicU64,

    /// Consumer end of the notification queue.
    notifications: tokio::sync::Mutex<UnboundedReceiver<String>>,
}

/// A caller's handle to one outstanding RPC.
///
/// Returned by [`Session::send_rpc`]; await it with or without a bound.
/// Dropping the handle abandons the wait: the correlation entry stays
/// behind and a late reply is consumed and discarded without affecting
/// any other request.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<RpcOutcome>,
    message_id: u64,
}

mod dispatch;
mod transport;
