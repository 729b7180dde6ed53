//! Outbound connection establishment over SSH and TLS.
//!
//! Both paths end the same way: an established byte stream is handed to
//! [`Transport`] and the hello exchange runs in [`Session::establish`].
//! SSH uses the `netconf` subsystem on the async-ssh2-tokio client; TLS
//! is mutual, with the peer verified against a caller-supplied CA
//! bundle.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::debug;
use once_cell::sync::Lazy;
use russh::Preferred;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config;
use crate::error::NetconfError;
use crate::session::{Session, Transport};

/// IANA-assigned port for NETCONF over SSH.
pub const DEFAULT_SSH_PORT: u16 = 830;
/// IANA-assigned port for NETCONF over TLS.
pub const DEFAULT_TLS_PORT: u16 = 6513;

/// Security level used for SSH algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SecurityLevel {
    /// Strict modern algorithms (default).
    Secure,
    /// Good security with broader compatibility.
    Balanced,
    /// Maximum compatibility with legacy devices.
    LegacyCompatible,
}

/// Connection security options for SSH establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    /// SSH algorithm policy.
    pub level: SecurityLevel,
    /// Server host key verification method.
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::secure_default()
    }
}

impl ConnectionSecurityOptions {
    /// Secure-by-default profile (recommended).
    pub fn secure_default() -> Self {
        Self {
            level: SecurityLevel::Secure,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }

    /// Balanced profile for mixed environments.
    pub fn balanced() -> Self {
        Self {
            level: SecurityLevel::Balanced,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }

    /// Legacy compatibility profile for older devices.
    pub fn legacy_compatible() -> Self {
        Self {
            level: SecurityLevel::LegacyCompatible,
            server_check: ServerCheckMethod::NoCheck,
        }
    }

    pub(crate) fn preferred(&self) -> Preferred {
        match self.level {
            SecurityLevel::Secure => Preferred {
                kex: Cow::Borrowed(config::SECURE_KEX_ORDER),
                key: Cow::Borrowed(config::SECURE_KEY_TYPES),
                cipher: Cow::Borrowed(config::SECURE_CIPHERS),
                mac: Cow::Borrowed(config::SECURE_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::Balanced => Preferred {
                kex: Cow::Borrowed(config::BALANCED_KEX_ORDER),
                key: Cow::Borrowed(config::BALANCED_KEY_TYPES),
                cipher: Cow::Borrowed(config::BALANCED_CIPHERS),
                mac: Cow::Borrowed(config::BALANCED_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::LegacyCompatible => Preferred {
                kex: Cow::Borrowed(config::LEGACY_KEX_ORDER),
                key: Cow::Borrowed(config::LEGACY_KEY_TYPES),
                cipher: Cow::Borrowed(config::LEGACY_CIPHERS),
                mac: Cow::Borrowed(config::LEGACY_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
        }
    }
}

/// Client authentication credential for SSH establishment.
#[derive(Debug, Clone)]
pub enum SshAuth {
    /// Password authentication.
    Password(String),
    /// Public-key authentication with a private key file, optionally
    /// passphrase-protected.
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl SshAuth {
    fn method(&self) -> AuthMethod {
        match self {
            SshAuth::Password(password) => AuthMethod::with_password(password),
            SshAuth::KeyFile { path, passphrase } => {
                AuthMethod::with_key_file(path, passphrase.as_deref())
            }
        }
    }
}

/// Parameters for an outbound NETCONF-over-SSH connection.
#[derive(Debug, Clone)]
pub struct SshConnectOptions {
    /// Device hostname or address.
    pub host: String,
    /// SSH port, conventionally 830 for NETCONF.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Client credential.
    pub auth: SshAuth,
    /// Algorithm profile and host key check.
    pub security: ConnectionSecurityOptions,
    /// Drop the connection after this much silence, when set.
    pub inactivity_timeout: Option<Duration>,
}

impl SshConnectOptions {
    /// Options for `user@host:830` with password auth and the secure
    /// defaults.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::with_auth(host, username, SshAuth::Password(password.into()))
    }

    /// Options for `user@host:830` authenticating with a private key
    /// file.
    pub fn with_key_file(
        host: impl Into<String>,
        username: impl Into<String>,
        path: impl Into<PathBuf>,
        passphrase: Option<&str>,
    ) -> Self {
        Self::with_auth(
            host,
            username,
            SshAuth::KeyFile {
                path: path.into(),
                passphrase: passphrase.map(str::to_string),
            },
        )
    }

    /// Options for `user@host:830` with an explicit credential.
    pub fn with_auth(
        host: impl Into<String>,
        username: impl Into<String>,
        auth: SshAuth,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            auth,
            security: ConnectionSecurityOptions::default(),
            inactivity_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Connects over SSH, opens the `netconf` subsystem, and establishes a
/// session on it.
pub async fn connect_ssh(options: &SshConnectOptions) -> Result<Session, NetconfError> {
    let endpoint = format!("{}@{}:{}", options.username, options.host, options.port);

    let config = Config {
        preferred: options.security.preferred(),
        inactivity_timeout: options.inactivity_timeout,
        ..Default::default()
    };

    let client = Client::connect_with_config(
        (options.host.clone(), options.port),
        &options.username,
        options.auth.method(),
        options.security.server_check.clone(),
        config,
    )
    .await?;
    debug!("{endpoint} SSH connection established");

    let mut channel = client.get_channel().await?;
    channel.request_subsystem(true, "netconf").await?;
    debug!("{endpoint} netconf subsystem opened");

    // The client owns the TCP connection and closes it on drop, so it
    // rides along with the transport task for the session's lifetime.
    let transport = Transport::from_stream_with_guard(channel.into_stream(), Some(Box::new(client)));
    Session::establish(transport).await
}

/// Parameters for an outbound NETCONF-over-TLS connection.
#[derive(Debug, Clone)]
pub struct TlsConnectOptions {
    /// Device hostname or address.
    pub host: String,
    /// TLS port, conventionally 6513 for NETCONF.
    pub port: u16,
    /// Name the server certificate must be valid for; the host when
    /// unset.
    pub server_name: Option<String>,
    /// Certificate material for mutual verification.
    pub tls: TlsIdentity,
}

impl TlsConnectOptions {
    /// Options for `host:6513` with the given identity.
    pub fn new(host: impl Into<String>, tls: TlsIdentity) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_TLS_PORT,
            server_name: None,
            tls,
        }
    }
}

/// Connects over mutually-authenticated TLS and establishes a session.
pub async fn connect_tls(options: &TlsConnectOptions) -> Result<Session, NetconfError> {
    let endpoint = format!("{}:{}", options.host, options.port);
    let stream = TcpStream::connect((options.host.as_str(), options.port)).await?;

    let server_name = options.server_name.as_ref().unwrap_or(&options.host);
    let server_name = ServerName::try_from(server_name.clone())
        .map_err(|err| NetconfError::Handshake(format!("invalid server name: {err}")))?;

    let tls_stream = options
        .tls
        .connector()
        .connect(server_name, stream)
        .await
        .map_err(|err| NetconfError::Handshake(format!("TLS handshake failed: {err}")))?;
    debug!("{endpoint} TLS connection established");

    Session::establish(Transport::from_stream(tls_stream)).await
}

/// Certificate material for one side of a mutual-TLS connection.
///
/// Holds both a client and a server rustls config built from the same
/// identity, so one value serves outbound connects and call-home
/// accepts alike.
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    pub(crate) client_config: Arc<ClientConfig>,
    pub(crate) server_config: Arc<ServerConfig>,
}

/// Builder for [`TlsIdentity`]. All three PEM inputs are required.
#[derive(Default)]
pub struct TlsIdentityBuilder {
    ca_cert_pem: Option<Vec<u8>>,
    cert_pem: Option<Vec<u8>>,
    key_pem: Option<Vec<u8>>,
}

impl TlsIdentityBuilder {
    /// CA bundle the peer certificate must chain to.
    pub fn ca_cert_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert_pem = Some(pem.into());
        self
    }

    /// Certificate chain presented to the peer.
    pub fn cert_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.cert_pem = Some(pem.into());
        self
    }

    /// Private key matching the certificate.
    pub fn key_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.key_pem = Some(pem.into());
        self
    }

    /// Parses the PEM inputs and builds both rustls configs.
    pub fn build(self) -> Result<TlsIdentity, NetconfError> {
        ensure_crypto_provider();

        let ca_pem = self
            .ca_cert_pem
            .ok_or_else(|| NetconfError::Handshake("CA certificate required".to_string()))?;
        let cert_pem = self
            .cert_pem
            .ok_or_else(|| NetconfError::Handshake("certificate required".to_string()))?;
        let key_pem = self
            .key_pem
            .ok_or_else(|| NetconfError::Handshake("private key required".to_string()))?;

        let ca_certs = parse_certificates(&ca_pem)?;
        if ca_certs.is_empty() {
            return Err(NetconfError::Handshake(
                "no CA certificates found".to_string(),
            ));
        }
        let mut root_store = RootCertStore::empty();
        for cert in &ca_certs {
            root_store.add(cert.clone()).map_err(|err| {
                NetconfError::Handshake(format!("failed to add CA certificate: {err}"))
            })?;
        }

        let certs = parse_certificates(&cert_pem)?;
        if certs.is_empty() {
            return Err(NetconfError::Handshake("no certificates found".to_string()));
        }
        let key = PrivateKeyDer::from_pem_slice(&key_pem)
            .map_err(|err| NetconfError::Handshake(format!("failed to parse key: {err}")))?;

        let client_config = ClientConfig::builder()
            .with_root_certificates(root_store.clone())
            .with_client_auth_cert(certs.clone(), key.clone_key())
            .map_err(|err| NetconfError::Handshake(format!("client config error: {err}")))?;

        // Call-home is mutual TLS too: the connecting device must present
        // a certificate chaining to the same CA bundle.
        let client_cert_verifier =
            rustls::server::WebPkiClientVerifier::builder(Arc::new(root_store))
                .build()
                .map_err(|err| NetconfError::Handshake(format!("client verifier error: {err}")))?;
        let server_config = ServerConfig::builder()
            .with_client_cert_verifier(client_cert_verifier)
            .with_single_cert(certs, key)
            .map_err(|err| NetconfError::Handshake(format!("server config error: {err}")))?;

        Ok(TlsIdentity {
            client_config: Arc::new(client_config),
            server_config: Arc::new(server_config),
        })
    }
}

impl TlsIdentity {
    /// Starts building an identity from PEM material.
    pub fn builder() -> TlsIdentityBuilder {
        TlsIdentityBuilder::default()
    }

    /// Connector for outbound connections.
    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.client_config.clone())
    }

    /// Acceptor for call-home connections.
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config.clone())
    }
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, NetconfError> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| NetconfError::Handshake(format!("failed to parse certificates: {err}")))
}

static CRYPTO_PROVIDER: Lazy<()> = Lazy::new(|| {
    // Fails only when a provider is already installed, which is the
    // state we want.
    let _ = rustls::crypto::ring::default_provider().install_default();
});

pub(crate) fn ensure_crypto_provider() {
    Lazy::force(&CRYPTO_PROVIDER);
}
