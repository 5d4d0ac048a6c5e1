//! Server engine: shared context, listener, and admission control.

pub mod accounts;
pub mod auth;
pub mod characters;
pub mod connection;
pub mod maps;
pub mod registry;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

use crate::common::error::{ConnectionError, ConnectionResult};
use crate::config::types::ServerConfig;
use crate::protocol::packets::codec::MessageCodec;
use crate::protocol::packets::messages::Message;
use crate::protocol::packets::types::reject;
use crate::protocol::secure::{self, ServerIdentity};
use crate::protocol::transport::{Conn, StreamIo};
use crate::server::accounts::AccountRepository;
use crate::server::auth::AuthService;
use crate::server::characters::CharacterService;
use crate::server::connection::Connection;
use crate::server::maps::MapStore;
use crate::server::registry::{AdmitVerdict, ConnectionRegistry};

pub use accounts::{AccountRecord, CharacterRecord, InMemoryAccounts};
pub use auth::{LoginStart, LoginVerdict, RegisterVerdict};
pub use characters::CreateVerdict;
pub use maps::{map_checksum, InMemoryMaps, MapRecord};

/// Everything a connection task needs, shared by reference. No globals.
pub struct ServerContext {
    pub config: ServerConfig,
    pub auth: Arc<AuthService>,
    pub characters: CharacterService,
    pub maps: Arc<dyn MapStore>,
    pub registry: ConnectionRegistry,
    pub tls: TlsAcceptor,
    /// SHA-256 of the serving certificate, for clients that pin.
    pub tls_fingerprint: Vec<u8>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        accounts: Arc<dyn AccountRepository>,
        maps: Arc<dyn MapStore>,
    ) -> ConnectionResult<Self> {
        let identity = match &config.tls {
            Some(tls) => ServerIdentity::from_pem_files(
                std::path::Path::new(&tls.cert_path),
                std::path::Path::new(&tls.key_path),
            )?,
            None => {
                info!("no tls material configured, generating a self-signed certificate");
                ServerIdentity::self_signed("localhost")?
            }
        };
        let tls_fingerprint = identity.fingerprint();
        let tls = secure::server_acceptor(identity)?;

        let auth = Arc::new(AuthService::new(accounts, config.auth.clone()));
        let characters = CharacterService::new(auth.clone());
        let registry = ConnectionRegistry::new(config.limits.clone());
        Ok(ServerContext {
            config,
            auth,
            characters,
            maps,
            registry,
            tls,
            tls_fingerprint,
        })
    }
}

/// Listening server. One accepted connection = one spawned task.
pub struct ServerEngine {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
}

impl ServerEngine {
    /// Binds the configured listener and prepares the shared context.
    pub async fn bind(
        config: ServerConfig,
        accounts: Arc<dyn AccountRepository>,
        maps: Arc<dyn MapStore>,
    ) -> ConnectionResult<Self> {
        let host = config.listen.host.clone();
        let port = config.listen.port;
        let listener = TcpListener::bind((host.as_str(), port)).await.map_err(|e| {
            ConnectionError::ConnectFailed {
                host,
                port,
                source: e,
            }
        })?;
        info!(address = %listener.local_addr()?, "server listening");
        let ctx = Arc::new(ServerContext::new(config, accounts, maps)?);
        Ok(ServerEngine { ctx, listener })
    }

    pub fn local_addr(&self) -> ConnectionResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.ctx.clone()
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> ConnectionResult<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Transient accept errors (fd exhaustion etc) must not
                    // kill the listener.
                    error!(error = %e, "accept failed");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                error!(error = %e, "set_nodelay failed");
            }
            serve_stream(self.ctx.clone(), stream, peer.ip()).await;
        }
    }
}

/// Admission check plus task spawn for one inbound byte stream.
///
/// Split out from the accept loop so tests can drive the full server over
/// an in-memory duplex stream.
pub async fn serve_stream<S: StreamIo + 'static>(ctx: Arc<ServerContext>, stream: S, ip: IpAddr) {
    let mut conn = Conn::plain(stream, MessageCodec::new());
    let id = match ctx.registry.admit(ip).await {
        AdmitVerdict::Admitted(id) => id,
        AdmitVerdict::Banned => {
            let _ = conn
                .send(Message::ConnectionRejected {
                    code: reject::BANNED,
                })
                .await;
            return;
        }
        AdmitVerdict::Full | AdmitVerdict::IpFull => {
            let _ = conn
                .send(Message::ConnectionRejected {
                    code: reject::NO_SLOTS,
                })
                .await;
            return;
        }
    };
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    ctx.registry.attach_sender(id, push_tx).await;
    tokio::spawn(Connection::new(id, ip, conn, ctx, push_rx).run());
}
