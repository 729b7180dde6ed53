//! High-level NETCONF operations over an established [`Session`].
//!
//! [`Manager`] pairs a session with a default reply timeout and exposes
//! each protocol operation as a structured call: it builds the request
//! body, sends it, awaits the correlated reply, and decodes it. Raw
//! reply text is always kept alongside anything extracted from it.

use std::time::{Duration, Instant};

use log::debug;

use crate::error::NetconfError;
use crate::rpc::{
    self, CommitOptions, EditConfigOptions, GetDataRequest, SubscriptionRequest, WithDefaults,
};
use crate::session::Session;
use crate::xml;

/// Reply timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Pause between lock attempts while the peer reports contention.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(250);

/// A successful reply with no data payload, e.g. `<ok/>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    /// The full `<rpc-reply>` text as received.
    pub raw: String,
}

/// A successful reply to a retrieval operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReply {
    /// The full `<rpc-reply>` text as received.
    pub raw: String,
    /// The `<data>` subtree sliced out of the reply, when present.
    pub data: Option<String>,
}

/// Structured front-end for NETCONF operations on one session.
pub struct Manager {
    session: Session,
    timeout: Duration,
}

impl Manager {
    /// Wraps an established session with the default reply timeout.
    pub fn new(session: Session) -> Self {
        Self::with_timeout(session, DEFAULT_TIMEOUT)
    }

    /// Wraps an established session with a caller-chosen reply timeout.
    pub fn with_timeout(session: Session, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    /// The underlying session, for capability checks or raw sends.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The reply timeout applied to every operation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Changes the reply timeout for subsequent operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sends a raw request body and returns the raw reply.
    ///
    /// Escape hatch for operations this type has no builder for. The
    /// body is wrapped in `<rpc>` and correlated like any other call.
    pub async fn dispatch(&self, body: &str) -> Result<String, NetconfError> {
        let started = Instant::now();
        let outcome = self
            .session
            .send_rpc(body)
            .await?
            .wait_timeout(self.timeout)
            .await;
        match &outcome {
            Ok(_) => debug!("rpc completed in {:?}", started.elapsed()),
            Err(err) => debug!("rpc failed after {:?}: {err}", started.elapsed()),
        }
        outcome
    }

    /// `<get>`: running config plus operational state.
    pub async fn get(
        &self,
        filter: Option<&str>,
        with_defaults: Option<WithDefaults>,
    ) -> Result<DataReply, NetconfError> {
        let raw = self.dispatch(&rpc::get(filter, with_defaults)).await?;
        decode_data(raw)
    }

    /// `<get-config>` from the named datastore.
    pub async fn get_config(
        &self,
        source: &str,
        filter: Option<&str>,
        with_defaults: Option<WithDefaults>,
    ) -> Result<DataReply, NetconfError> {
        let raw = self
            .dispatch(&rpc::get_config(source, filter, with_defaults))
            .await?;
        decode_data(raw)
    }

    /// NMDA `<get-data>` (RFC 8526).
    pub async fn get_data(&self, request: &GetDataRequest) -> Result<DataReply, NetconfError> {
        let raw = self.dispatch(&rpc::get_data(request)).await?;
        decode_data(raw)
    }

    /// `<edit-config>` applying `config` to the target datastore.
    pub async fn edit_config(
        &self,
        config: &str,
        target: &str,
        options: &EditConfigOptions,
    ) -> Result<RpcReply, NetconfError> {
        let raw = self
            .dispatch(&rpc::edit_config(config, target, options))
            .await?;
        Ok(RpcReply { raw })
    }

    /// `<copy-config>` from `source` into `target`.
    ///
    /// `source` may be a datastore name or an inline `<config>` element.
    pub async fn copy_config(
        &self,
        target: &str,
        source: &str,
        with_defaults: Option<WithDefaults>,
    ) -> Result<RpcReply, NetconfError> {
        let raw = self
            .dispatch(&rpc::copy_config(target, source, with_defaults))
            .await?;
        Ok(RpcReply { raw })
    }

    /// `<delete-config>` removing the named datastore.
    pub async fn delete_config(&self, target: &str) -> Result<RpcReply, NetconfError> {
        let raw = self.dispatch(&rpc::delete_config(target)).await?;
        Ok(RpcReply { raw })
    }

    /// `<discard-changes>` reverting the candidate datastore.
    pub async fn discard_changes(&self) -> Result<RpcReply, NetconfError> {
        let raw = self.dispatch(&rpc::discard_changes()).await?;
        Ok(RpcReply { raw })
    }

    /// `<commit>`, covering plain, confirmed, and persistent commits.
    pub async fn commit(&self, options: &CommitOptions) -> Result<RpcReply, NetconfError> {
        let raw = self.dispatch(&rpc::commit(options)).await?;
        Ok(RpcReply { raw })
    }

    /// `<cancel-commit>` aborting a pending confirmed commit.
    pub async fn cancel_commit(
        &self,
        persist_id: Option<&str>,
    ) -> Result<RpcReply, NetconfError> {
        let raw = self.dispatch(&rpc::cancel_commit(persist_id)).await?;
        Ok(RpcReply { raw })
    }

    /// `<validate>` against the named datastore.
    pub async fn validate(&self, source: &str) -> Result<RpcReply, NetconfError> {
        let raw = self.dispatch(&rpc::validate(source)).await?;
        Ok(RpcReply { raw })
    }

    /// `<lock>` on the target datastore, retrying while it is contended.
    ///
    /// Uses the manager timeout as the overall deadline; see
    /// [`Manager::lock_deadline`].
    pub async fn lock(&self, target: &str) -> Result<RpcReply, NetconfError> {
        self.lock_deadline(target, self.timeout).await
    }

    /// `<lock>` with an explicit overall deadline.
    ///
    /// While the peer reports `lock-denied` or `in-use` the request is
    /// reissued after a short pause, until it succeeds or the deadline
    /// budget runs out, which yields [`NetconfError::Timeout`]. Any other
    /// rpc-error surfaces immediately.
    pub async fn lock_deadline(
        &self,
        target: &str,
        timeout: Duration,
    ) -> Result<RpcReply, NetconfError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NetconfError::Timeout("datastore lock"));
            }
            let pending = self.session.send_rpc(&rpc::lock(target)).await?;
            match pending.wait_timeout(remaining).await {
                Ok(raw) => return Ok(RpcReply { raw }),
                Err(NetconfError::Rpc(detail)) if detail.is_lock_contention() => {
                    debug!("lock on {target} contended ({detail}), retrying");
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(NetconfError::Timeout("datastore lock"));
                    }
                    tokio::time::sleep(LOCK_RETRY_DELAY.min(remaining)).await;
                }
                Err(NetconfError::Timeout(_)) => {
                    return Err(NetconfError::Timeout("datastore lock"));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `<unlock>` on the target datastore.
    pub async fn unlock(&self, target: &str) -> Result<RpcReply, NetconfError> {
        let raw = self.dispatch(&rpc::unlock(target)).await?;
        Ok(RpcReply { raw })
    }

    /// `<kill-session>` terminating another session on the peer.
    pub async fn kill_session(&self, session_id: u64) -> Result<RpcReply, NetconfError> {
        let raw = self.dispatch(&rpc::kill_session(session_id)).await?;
        Ok(RpcReply { raw })
    }

    /// `<close-session>`, then tears the local session down.
    ///
    /// The session is closed whether or not the peer replied cleanly;
    /// queued notifications remain consumable afterwards.
    pub async fn close_session(&self) -> Result<RpcReply, NetconfError> {
        let outcome = self.dispatch(&rpc::close_session()).await;
        self.session.close();
        outcome.map(|raw| RpcReply { raw })
    }

    /// `<create-subscription>` (RFC 5277) starting notification delivery.
    pub async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<RpcReply, NetconfError> {
        let raw = self.dispatch(&rpc::create_subscription(request)).await?;
        Ok(RpcReply { raw })
    }

    /// Pulls the next queued `<notification>`; `None` on timeout.
    pub async fn take_notification(&self, timeout: Option<Duration>) -> Option<String> {
        self.session.take_notification(timeout).await
    }
}

fn decode_data(raw: String) -> Result<DataReply, NetconfError> {
    let data = {
        let doc = xml::parse(&raw)?;
        xml::data_element_raw(&raw, &doc)
    };
    Ok(DataReply { raw, data })
}
