//! Error types for NETCONF sessions and operations.
//!
//! This module defines all errors that can occur during transport
//! establishment, message framing, RPC exchange, and call-home accepts.

use thiserror::Error;

/// Details of an `<rpc-error>` returned by the peer.
///
/// The raw reply is kept verbatim next to the extracted fields so callers
/// can re-parse vendor-specific `<error-info>` content themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcErrorDetail {
    /// The full `<rpc-reply>` text as received from the peer.
    pub reply_raw: String,

    /// Contents of `<error-type>`, if present.
    pub error_type: Option<String>,

    /// Contents of `<error-tag>`, if present (e.g. `lock-denied`).
    pub tag: Option<String>,

    /// Contents of `<error-severity>`, if present.
    pub severity: Option<String>,

    /// Contents of `<error-message>`, if present.
    pub message: Option<String>,

    /// Raw text of the `<error-info>` subtree, if present.
    pub info: Option<String>,
}

impl RpcErrorDetail {
    /// True when the error indicates a contended datastore lock.
    ///
    /// RFC 6241 reports lock contention as `lock-denied`; some stacks
    /// use the more generic `in-use` tag. Both are retryable.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self.tag.as_deref(), Some("lock-denied") | Some("in-use"))
    }
}

impl std::fmt::Display for RpcErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = self.tag.as_deref().unwrap_or("rpc-error");
        match self.message.as_deref() {
            Some(msg) => write!(f, "{tag}: {msg}"),
            None => write!(f, "{tag}"),
        }
    }
}

/// Errors that can occur during NETCONF session and transport management.
#[derive(Error, Debug)]
pub enum NetconfError {
    /// The underlying byte stream broke.
    ///
    /// Fatal to the session: the dispatch loop stops and every pending
    /// request is failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed framing or an unparseable top-level message.
    ///
    /// A corrupted frame boundary makes the stream unrecoverable, so
    /// framing errors are fatal to the session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer reported an operation failure inside a well-formed
    /// `<rpc-reply>`.
    ///
    /// Not fatal: the session remains usable and the caller decides
    /// whether to retry.
    #[error("rpc error: {0}")]
    Rpc(RpcErrorDetail),

    /// A specific wait (reply, lock, notification, accept) exceeded its
    /// bound. Local to that wait; other in-flight operations are
    /// unaffected.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// SSH or TLS negotiation or identity verification failed.
    ///
    /// Fatal to that connection attempt only; a call-home listener keeps
    /// accepting.
    #[error("handshake failure: {0}")]
    Handshake(String),

    /// Operation attempted after the session was closed, explicitly or
    /// implicitly by a transport failure.
    #[error("session closed")]
    SessionClosed,

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// An I/O error occurred while connecting or listening.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetconfError {
    /// Returns the RPC error detail when this is a peer-reported failure.
    pub fn as_rpc_error(&self) -> Option<&RpcErrorDetail> {
        match self {
            NetconfError::Rpc(detail) => Some(detail),
            _ => None,
        }
    }
}
