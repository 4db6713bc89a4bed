//! Listener and session pool
//!
//! Accepts TCP connections, negotiates the SSLRequest/GSSENCRequest
//! preamble, routes CancelRequest packets to the cancel registry, enforces
//! the session budget, and spawns one task per session. Shutdown stops the
//! accept loop, waits out a grace period, then tells every session to go
//! away.

use crate::cancel::CancelRegistry;
use crate::config::{AdapterConfig, TlsSettings};
use crate::error::{AdapterError, Result};
use crate::executor::ExecutorFactory;
use crate::protocol::auth::{AuthMethod, Authenticator, EnvCredentialStore, MemoryCredentialStore};
use crate::protocol::connection::{run_session, SessionContext};
use crate::protocol::formatter::encode_backend;
use crate::protocol::message::{BackendMessage, ErrorFields, StartupFrame};
use crate::protocol::parser::FrameReader;
use crate::translate::TranslationCache;
use bytes::BytesMut;
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use std::io::BufReader;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

/// TLS acceptor plus the certificate digest SCRAM channel binding needs.
struct TlsContext {
    acceptor: TlsAcceptor,
    cert_hash: Vec<u8>,
}

/// The adapter's front door.
pub struct AdapterServer {
    ctx: SessionContext,
    tls: Option<Arc<TlsContext>>,
    active: Arc<AtomicUsize>,
}

impl AdapterServer {
    /// Assemble a server: build the authenticator from configuration, load
    /// TLS material, create the shared registries.
    pub fn new(config: AdapterConfig, factory: Arc<dyn ExecutorFactory>) -> Result<Self> {
        let method = AuthMethod::from(config.auth.method.as_str());
        let authenticator = if config.auth.users.is_empty() {
            Authenticator::new(method, Arc::new(EnvCredentialStore))
        } else {
            Authenticator::new(
                method,
                Arc::new(MemoryCredentialStore::new(config.auth.users.clone())),
            )
        };

        let tls = match &config.tls {
            Some(settings) => Some(Arc::new(load_tls(settings)?)),
            None => None,
        };

        let ctx = SessionContext {
            config: Arc::new(config),
            authenticator: Arc::new(authenticator),
            factory,
            cancel_registry: Arc::new(CancelRegistry::new()),
            translation_cache: Arc::new(TranslationCache::new()),
        };

        Ok(Self {
            ctx,
            tls,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The shared collaborators, for driving sessions over in-memory
    /// streams in tests.
    pub fn session_context(&self) -> SessionContext {
        self.ctx.clone()
    }

    /// Sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run(self: Arc<Self>, shutdown: impl std::future::Future<Output = ()> + Send) -> Result<()> {
        let addr = self.ctx.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AdapterError::Config(format!("cannot bind {}: {}", addr, e)))?;
        info!("listening on {}", addr);
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an existing listener until `shutdown` resolves.
    pub async fn run_with_listener(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()> + Send,
    ) -> Result<()> {
        let (notify_tx, notify_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    debug!("connection from {}", peer);
                    let server = Arc::clone(&self);
                    let sessions = notify_rx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, sessions).await {
                            if !matches!(e, AdapterError::ConnectionClosed) {
                                error!("connection from {} failed: {}", peer, e);
                            }
                        }
                    });
                }
            }
        }

        // stop accepting, give sessions a grace period, then tell the
        // stragglers to go away
        info!("shutting down: waiting for {} sessions", self.active_sessions());
        let grace = Duration::from_secs(self.ctx.config.shutdown_grace_secs);
        let drained = async {
            while self.active_sessions() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(grace, drained).await.is_err() {
            let _ = notify_tx.send(true);
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while self.active_sessions() > 0 && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        info!("shutdown complete");
        Ok(())
    }

    /// Drive one accepted connection through the startup preamble and into
    /// a session.
    async fn handle_connection(
        &self,
        mut stream: TcpStream,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        stream.set_nodelay(true)?;

        loop {
            let mut reader = FrameReader::new(&mut stream);
            match reader.read_startup().await? {
                StartupFrame::SslRequest => {
                    match &self.tls {
                        Some(tls) => {
                            stream.write_all(b"S").await?;
                            let tls_stream = tls.acceptor.accept(stream).await.map_err(|e| {
                                AdapterError::Protocol(format!("TLS handshake failed: {}", e))
                            })?;
                            return self
                                .startup_on(tls_stream, Some(tls.cert_hash.clone()), shutdown)
                                .await;
                        }
                        None => {
                            stream.write_all(b"N").await?;
                            // client continues in plaintext or disconnects
                            continue;
                        }
                    }
                }
                StartupFrame::GssEncRequest => {
                    stream.write_all(b"N").await?;
                    continue;
                }
                StartupFrame::CancelRequest {
                    process_id,
                    secret_key,
                } => {
                    // no reply either way, by protocol design
                    self.ctx.cancel_registry.cancel(process_id, secret_key);
                    return Ok(());
                }
                StartupFrame::Startup { parameters } => {
                    return self.spawn_session(stream, parameters, None, shutdown).await;
                }
            }
        }
    }

    /// Read the startup frame that follows a TLS upgrade, then run the
    /// session on the encrypted stream.
    async fn startup_on<S>(
        &self,
        mut stream: S,
        cert_hash: Option<Vec<u8>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut reader = FrameReader::new(&mut stream);
        match reader.read_startup().await? {
            StartupFrame::Startup { parameters } => {
                self.spawn_session(stream, parameters, cert_hash, shutdown).await
            }
            StartupFrame::CancelRequest {
                process_id,
                secret_key,
            } => {
                self.ctx.cancel_registry.cancel(process_id, secret_key);
                Ok(())
            }
            other => Err(AdapterError::Protocol(format!(
                "unexpected frame after TLS upgrade: {:?}",
                other
            ))),
        }
    }

    async fn spawn_session<S>(
        &self,
        mut stream: S,
        parameters: std::collections::HashMap<String, String>,
        cert_hash: Option<Vec<u8>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let permit = SessionPermit::acquire(
            Arc::clone(&self.active),
            self.ctx.config.max_connections,
        );
        if permit.is_none() {
            let mut buf = BytesMut::new();
            encode_backend(
                &mut buf,
                &BackendMessage::ErrorResponse(ErrorFields::fatal(
                    "53300",
                    "sorry, too many clients already",
                )),
            );
            let _ = stream.write_all(&buf).await;
            return Err(AdapterError::TooManyConnections);
        }

        let result = run_session(stream, parameters, cert_hash, self.ctx.clone(), shutdown).await;
        drop(permit);
        result
    }
}

/// Connection-count guard; the slot frees when the permit drops.
struct SessionPermit {
    active: Arc<AtomicUsize>,
}

impl SessionPermit {
    fn acquire(active: Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        let previous = active.fetch_add(1, Ordering::SeqCst);
        if previous >= limit {
            active.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self { active })
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn load_tls(settings: &TlsSettings) -> Result<TlsContext> {
    let cert_file = std::fs::File::open(&settings.cert_file).map_err(|e| {
        AdapterError::Config(format!(
            "cannot open certificate {}: {}",
            settings.cert_file.display(),
            e
        ))
    })?;
    let certs: std::result::Result<Vec<_>, _> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file)).collect();
    let certs = certs.map_err(|e| AdapterError::Config(format!("bad certificate file: {}", e)))?;
    if certs.is_empty() {
        return Err(AdapterError::Config(
            "certificate file contains no certificates".to_string(),
        ));
    }

    let key_file = std::fs::File::open(&settings.key_file).map_err(|e| {
        AdapterError::Config(format!(
            "cannot open key {}: {}",
            settings.key_file.display(),
            e
        ))
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| AdapterError::Config(format!("bad key file: {}", e)))?
        .ok_or_else(|| AdapterError::Config("key file contains no private key".to_string()))?;

    // tls-server-end-point binds to the hash of the leaf certificate
    let cert_hash = Sha256::digest(certs[0].as_ref()).to_vec();

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| AdapterError::Config(format!("TLS configuration rejected: {}", e)))?;

    Ok(TlsContext {
        acceptor: TlsAcceptor::from(Arc::new(server_config)),
        cert_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::memory::MemoryExecutorFactory;

    fn test_server(max_connections: usize) -> Arc<AdapterServer> {
        let config = AdapterConfig {
            max_connections,
            auth: crate::config::AuthSettings {
                method: "trust".to_string(),
                users: std::collections::HashMap::new(),
            },
            ..Default::default()
        };
        Arc::new(AdapterServer::new(config, Arc::new(MemoryExecutorFactory::new())).unwrap())
    }

    #[test]
    fn test_session_permit_budget() {
        let active = Arc::new(AtomicUsize::new(0));
        let a = SessionPermit::acquire(Arc::clone(&active), 2);
        let b = SessionPermit::acquire(Arc::clone(&active), 2);
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(SessionPermit::acquire(Arc::clone(&active), 2).is_none());
        drop(a);
        assert!(SessionPermit::acquire(Arc::clone(&active), 2).is_some());
        drop(b);
    }

    #[tokio::test]
    async fn test_server_builds_with_trust_auth() {
        let server = test_server(10);
        assert_eq!(server.active_sessions(), 0);
        let ctx = server.session_context();
        assert_eq!(ctx.config.max_connections, 10);
    }
}
