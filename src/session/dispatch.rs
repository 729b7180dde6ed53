use super::*;

impl Session {
    /// Performs the hello exchange on `transport` and starts the
    /// dispatch loop.
    ///
    /// Sends the local hello in EOM framing, waits for the peer hello,
    /// records both capability sets and the assigned session-id, and
    /// switches to chunked framing when both sides advertise base:1.1.
    /// The framing transition happens here, before any caller can send,
    /// so no message is ever framed half in one mode.
    pub async fn establish(mut transport: Transport) -> Result<Session, NetconfError> {
        let mut framer = Framer::new();

        transport
            .send(framer.encode(DEFAULT_HELLO.as_bytes()))
            .await?;

        // The first inbound message must be the peer hello. Anything the
        // peer pipelined behind it stays buffered in the framer (or, for
        // an EOM-only peer, may already be decoded) and is handed to the
        // dispatch loop as backlog.
        let mut backlog: Vec<Vec<u8>> = Vec::new();
        let hello_raw = loop {
            let Some(chunk) = transport.recv().await else {
                return Err(NetconfError::Transport(
                    "connection closed before hello".to_string(),
                ));
            };
            let mut msgs = framer.feed(&chunk)?.into_iter();
            if let Some(first) = msgs.next() {
                backlog.extend(msgs);
                break String::from_utf8(first)
                    .map_err(|_| NetconfError::Protocol("hello is not valid utf-8".to_string()))?;
            }
        };

        let (session_id, server_capabilities) = {
            let doc = xml::parse(&hello_raw)?;
            if xml::root_name(&doc) != "hello" {
                return Err(NetconfError::Protocol(format!(
                    "expected <hello>, got <{}>",
                    xml::root_name(&doc)
                )));
            }
            let session_id = xml::session_id_from_hello(&doc).ok_or_else(|| {
                NetconfError::Protocol("peer hello carries no session-id".to_string())
            })?;
            (session_id, xml::capabilities_from_hello(&doc))
        };
        let client_capabilities = {
            let doc = xml::parse(DEFAULT_HELLO)?;
            xml::capabilities_from_hello(&doc)
        };

        let both_base_11 = server_capabilities.iter().any(|cap| cap == CAP_BASE_11)
            && client_capabilities.iter().any(|cap| cap == CAP_BASE_11);
        let mode = if both_base_11 {
            FrameMode::Chunked
        } else {
            FrameMode::Eom
        };
        framer.set_mode(mode);
        debug!("session {session_id} established with {mode:?} framing");

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            protocol_error: Mutex::new(None),
        });
        let (notif_tx, notif_rx) = unbounded_channel();
        let (outbound, inbound, shutdown) = transport.into_parts();

        tokio::spawn(run_dispatch(
            inbound,
            framer,
            backlog,
            shared.clone(),
            notif_tx,
            shutdown.clone(),
        ));

        Ok(Session {
            shared,
            outbound,
            shutdown,
            mode,
            session_id,
            server_capabilities,
            client_capabilities,
            next_message_id: AtomicU64::new(1),
            notifications: tokio::sync::Mutex::new(notif_rx),
        })
    }

    /// Session identifier assigned by the peer's hello.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Capability URIs advertised by the peer.
    pub fn server_capabilities(&self) -> &[String] {
        &self.server_capabilities
    }

    /// Capability URIs advertised by this side.
    pub fn client_capabilities(&self) -> &[String] {
        &self.client_capabilities
    }

    /// Framing negotiated for this session.
    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// True once the session closed, explicitly or by transport failure.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Frames and queues one raw message.
    ///
    /// Safe to call from concurrent tasks: frames are queued whole, so
    /// partial frames can never interleave on the wire.
    pub async fn send_msg(&self, payload: &[u8]) -> Result<(), NetconfError> {
        if self.is_closed() {
            return Err(NetconfError::SessionClosed);
        }
        if let Some(pending_err) = self.take_protocol_error() {
            return Err(NetconfError::Protocol(pending_err));
        }
        let frame = self.mode.encode(payload);
        trace!("sending message: {}", String::from_utf8_lossy(payload));
        self.outbound.send(frame).await.map_err(|_| {
            if self.is_closed() {
                NetconfError::SessionClosed
            } else {
                NetconfError::Transport("connection task stopped".to_string())
            }
        })
    }

    /// Sends one RPC and returns the handle its reply resolves.
    ///
    /// Assigns a fresh message-id, registers the correlation entry
    /// before the frame is queued (a fast peer must not be able to reply
    /// before the entry exists), and returns without waiting. The
    /// dispatch loop is never blocked by a slow caller.
    pub async fn send_rpc(&self, body: &str) -> Result<PendingReply, NetconfError> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let envelope = rpc::wrap_rpc(message_id, body);

        let (tx, rx) = oneshot::channel();
        lock_unpoisoned(&self.shared.pending).insert(message_id, tx);

        if let Err(err) = self.send_msg(envelope.as_bytes()).await {
            lock_unpoisoned(&self.shared.pending).remove(&message_id);
            return Err(err);
        }
        Ok(PendingReply { rx, message_id })
    }

    /// Pulls the next queued notification.
    ///
    /// Blocks until one arrives, bounded by `timeout` when given;
    /// returns `None` on timeout. Notifications delivered before a close
    /// remain consumable afterwards.
    pub async fn take_notification(&self, timeout: Option<Duration>) -> Option<String> {
        let mut notifications = self.notifications.lock().await;
        match timeout {
            None => notifications.recv().await,
            Some(bound) => tokio::time::timeout(bound, notifications.recv())
                .await
                .ok()
                .flatten(),
        }
    }

    /// Closes the session.
    ///
    /// Idempotent. Stops the transport, fails every outstanding request
    /// with [`NetconfError::SessionClosed`], and makes all subsequent
    /// send attempts fail immediately.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing session {}", self.session_id);
        self.shutdown.notify_one();
        self.shared.fail_all_pending(|| NetconfError::SessionClosed);
    }

    fn take_protocol_error(&self) -> Option<String> {
        lock_unpoisoned(&self.shared.protocol_error).take()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl PendingReply {
    /// The message-id this request was sent with.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Waits for the reply without a bound.
    pub async fn wait(self) -> Result<String, NetconfError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(NetconfError::SessionClosed),
        }
    }

    /// Waits for the reply, at most `bound`.
    ///
    /// Expiry fails only this caller; the correlation entry stays in
    /// place and a late reply is discarded when it eventually arrives.
    pub async fn wait_timeout(self, bound: Duration) -> Result<String, NetconfError> {
        match tokio::time::timeout(bound, self.rx).await {
            Err(_) => Err(NetconfError::Timeout("rpc reply")),
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(NetconfError::SessionClosed),
        }
    }
}

/// The inbound half of a session: reassembles messages from the byte
/// stream and routes each one.
///
/// Runs until the transport ends or a framing error makes the stream
/// unrecoverable. Decoding is strictly sequential, preserving wire
/// order; only the correlation table and notification queue are shared
/// with caller contexts.
async fn run_dispatch(
    mut inbound: Receiver<Vec<u8>>,
    mut framer: Framer,
    backlog: Vec<Vec<u8>>,
    shared: Arc<Shared>,
    notifications: UnboundedSender<String>,
    shutdown: Arc<Notify>,
) {
    for msg in backlog {
        route_message(&shared, &notifications, msg);
    }

    loop {
        let Some(chunk) = inbound.recv().await else {
            break;
        };
        match framer.feed(&chunk) {
            Ok(msgs) => {
                for msg in msgs {
                    route_message(&shared, &notifications, msg);
                }
            }
            Err(err) => {
                // A corrupted frame boundary poisons the whole stream.
                // Once `closed` is set here an explicit close() becomes a
                // no-op, so the transport must be stopped from this side.
                warn!("fatal framing error, closing session: {err}");
                let text = err.to_string();
                *lock_unpoisoned(&shared.protocol_error) = Some(text.clone());
                shared.closed.store(true, Ordering::SeqCst);
                shutdown.notify_one();
                shared.fail_all_pending(|| NetconfError::Protocol(text.clone()));
                return;
            }
        }
    }

    debug!("transport ended, dispatch loop stopping");
    shared.closed.store(true, Ordering::SeqCst);
    shared.fail_all_pending(|| NetconfError::SessionClosed);
}

/// Classifies one decoded message and hands it to its consumer.
fn route_message(shared: &Shared, notifications: &UnboundedSender<String>, msg: Vec<u8>) {
    let text = match String::from_utf8(msg) {
        Ok(text) => text,
        Err(_) => {
            warn!("dropping message that is not valid utf-8");
            record_protocol_error(shared, "message is not valid utf-8".to_string());
            return;
        }
    };

    let (root, reply_id, rpc_error) = match xml::parse(&text) {
        Ok(doc) => (
            xml::root_name(&doc).to_string(),
            xml::message_id(&doc),
            xml::rpc_error_detail(&text, &doc),
        ),
        Err(err) => {
            warn!("dropping unparseable message: {err}");
            record_protocol_error(shared, err.to_string());
            return;
        }
    };

    match root.as_str() {
        "rpc-reply" => {
            let Some(id) = reply_id else {
                warn!("an <rpc-reply> without a usable message-id was dropped: {text}");
                return;
            };
            let Some(slot) = lock_unpoisoned(&shared.pending).remove(&id) else {
                // A reply after caller abandonment or a peer bug; either
                // way nobody is waiting and the loop must keep running.
                warn!("an <rpc-reply> was received with no corresponding handler: {text}");
                return;
            };
            let outcome = match rpc_error {
                Some(detail) => Err(NetconfError::Rpc(detail)),
                None => Ok(text),
            };
            if slot.send(outcome).is_err() {
                debug!("reply for message-id {id} arrived after its caller timed out; discarded");
            }
        }
        "notification" => {
            let _ = notifications.send(text);
        }
        other => {
            warn!("unexpected top-level element <{other}>");
            record_protocol_error(shared, format!("unexpected top-level element <{other}>"));
        }
    }
}

fn record_protocol_error(shared: &Shared, text: String) {
    let mut slot = lock_unpoisoned(&shared.protocol_error);
    // First error wins; later ones are already logged.
    if slot.is_none() {
        *slot = Some(text);
    }
}

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
