//! Call-home listener (RFC 8071).
//!
//! In call-home the managed device dials in and the management system
//! answers, but the NETCONF roles are unchanged: this side still speaks
//! as the client once the transport is up. That means acting as the
//! SSH or TLS *server* during the handshake, then running the normal
//! hello exchange over the resulting stream.
//!
//! One listener accepts any number of connections; a failed handshake
//! closes that connection only and the listener keeps accepting.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use russh::keys::PrivateKey;
use russh::server::{self, Auth, Msg};
use russh::{Channel, ChannelId};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;

use crate::connect::TlsIdentity;
use crate::error::NetconfError;
use crate::session::{Session, Transport};

/// IANA-assigned port for NETCONF call-home over SSH.
pub const DEFAULT_CALLHOME_SSH_PORT: u16 = 4334;
/// IANA-assigned port for NETCONF call-home over TLS.
pub const DEFAULT_CALLHOME_TLS_PORT: u16 = 4335;

/// Credentials and host identity for answering SSH call-home dials.
#[derive(Clone)]
pub struct CallhomeSshConfig {
    /// Host key presented to the connecting device.
    pub host_key: PrivateKey,
    /// User the device must authenticate as.
    pub username: String,
    /// Password checked against the device's auth request.
    pub password: String,
    /// Drop the connection after this much silence, when set.
    pub inactivity_timeout: Option<Duration>,
}

impl CallhomeSshConfig {
    pub fn new(
        host_key: PrivateKey,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host_key,
            username: username.into(),
            password: password.into(),
            inactivity_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Listener for connections dialed in by managed devices.
pub struct CallhomeManager {
    listener: tokio::net::TcpListener,
    local_addr: SocketAddr,
}

impl CallhomeManager {
    /// Binds the listening socket with an explicit accept backlog.
    ///
    /// The socket closes when this value drops, on every exit path.
    pub async fn bind(addr: SocketAddr, backlog: u32) -> Result<Self, NetconfError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;
        let local_addr = listener.local_addr()?;
        debug!("call-home listener bound on {local_addr}");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The bound address, useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts one raw TCP connection, for callers that run their own
    /// handshake.
    pub async fn accept_one(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(TcpStream, SocketAddr), NetconfError> {
        let accepted = match timeout {
            Some(bound) => tokio::time::timeout(bound, self.listener.accept())
                .await
                .map_err(|_| NetconfError::Timeout("call-home connection"))?,
            None => self.listener.accept().await,
        }?;
        Ok(accepted)
    }

    /// Accepts one connection, answers the device's SSH handshake, and
    /// establishes a session on the `netconf` subsystem channel it opens.
    pub async fn accept_one_ssh(
        &self,
        config: &CallhomeSshConfig,
        timeout: Option<Duration>,
    ) -> Result<Session, NetconfError> {
        let (tcp, peer) = self.accept_one(timeout).await?;
        debug!("call-home SSH dial from {peer}");

        let server_config = Arc::new(server::Config {
            keys: vec![config.host_key.clone()],
            inactivity_timeout: config.inactivity_timeout,
            ..Default::default()
        });

        let (subsystem_tx, mut subsystem_rx) = mpsc::channel(1);
        let handler = CallhomeHandler {
            peer,
            username: config.username.clone(),
            password: config.password.clone(),
            channels: HashMap::new(),
            subsystem_tx,
        };

        let running = server::run_stream(server_config, tcp, handler)
            .await
            .map_err(|err| NetconfError::Handshake(format!("SSH handshake with {peer}: {err}")))?;
        // Drives the SSH connection for the session's lifetime; it ends
        // when the device hangs up or the transport is shut down. If no
        // session ends up owning the connection, it is aborted below so
        // the dial does not linger until the inactivity timeout.
        let driver = tokio::spawn(async move {
            if let Err(err) = running.await {
                debug!("call-home SSH connection from {peer} ended: {err}");
            }
        });

        let waited = match timeout {
            Some(bound) => match tokio::time::timeout(bound, subsystem_rx.recv()).await {
                Ok(waited) => waited,
                Err(_) => {
                    driver.abort();
                    return Err(NetconfError::Timeout("netconf subsystem request"));
                }
            },
            None => subsystem_rx.recv().await,
        };
        let Some(channel) = waited else {
            driver.abort();
            return Err(NetconfError::Handshake(format!(
                "{peer} closed before requesting the netconf subsystem"
            )));
        };

        let session = Session::establish(Transport::from_stream(channel.into_stream())).await;
        if session.is_err() {
            driver.abort();
        }
        session
    }

    /// Accepts one connection, answers the device's TLS handshake, and
    /// establishes a session over it.
    ///
    /// The device must present a client certificate chaining to the
    /// identity's CA bundle; anything else fails this accept and leaves
    /// the listener untouched.
    pub async fn accept_one_tls(
        &self,
        identity: &TlsIdentity,
        timeout: Option<Duration>,
    ) -> Result<Session, NetconfError> {
        let (tcp, peer) = self.accept_one(timeout).await?;
        debug!("call-home TLS dial from {peer}");

        let accepting = identity.acceptor().accept(tcp);
        let tls = match timeout {
            Some(bound) => tokio::time::timeout(bound, accepting)
                .await
                .map_err(|_| NetconfError::Timeout("TLS handshake"))?,
            None => accepting.await,
        }
        .map_err(|err| NetconfError::Handshake(format!("TLS handshake with {peer}: {err}")))?;

        Session::establish(Transport::from_stream(tls)).await
    }
}

/// Server-side handler for one dialed-in SSH connection.
///
/// Accepts password auth against the configured credentials, then waits
/// for the device to open a session channel and request the `netconf`
/// subsystem. That channel is forwarded out and becomes the session
/// transport.
struct CallhomeHandler {
    peer: SocketAddr,
    username: String,
    password: String,
    channels: HashMap<ChannelId, Channel<Msg>>,
    subsystem_tx: mpsc::Sender<Channel<Msg>>,
}

impl server::Handler for CallhomeHandler {
    type Error = NetconfError;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == self.username && password == self.password {
            debug!("call-home peer {} authenticated as {user}", self.peer);
            Ok(Auth::Accept)
        } else {
            warn!("call-home peer {} failed password auth for {user}", self.peer);
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut server::Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut server::Session,
    ) -> Result<(), Self::Error> {
        if name != "netconf" {
            warn!("call-home peer {} requested subsystem {name}", self.peer);
            session.channel_failure(channel_id)?;
            return Ok(());
        }
        let Some(channel) = self.channels.remove(&channel_id) else {
            session.channel_failure(channel_id)?;
            return Ok(());
        };
        session.channel_success(channel_id)?;
        if self.subsystem_tx.try_send(channel).is_err() {
            // A second netconf channel on the same dial has no taker.
            warn!("call-home peer {} opened an extra netconf channel", self.peer);
        }
        Ok(())
    }
}
