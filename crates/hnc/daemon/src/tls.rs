//! Mutual TLS for the aggregated reader
//!
//! Every caller presents a certificate signed by the configured client CA.
//! The certificate's common name is the caller's user name; handlers see it
//! as a [`CallerIdentity`] request extension.

use crate::config::ReaderTlsConfig;
use crate::error::{DaemonError, DaemonResult};
use axum::{Extension, Router};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// User name taken from a verified client certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

/// Server side of the reader's mutual TLS
#[derive(Clone)]
pub struct ReaderTls {
    config: Arc<ServerConfig>,
}

impl ReaderTls {
    pub async fn load(files: &ReaderTlsConfig) -> DaemonResult<Self> {
        let cert = read_pem(&files.cert_path).await?;
        let key = read_pem(&files.key_path).await?;
        let client_ca = read_pem(&files.client_ca_path).await?;
        Self::from_pem(&cert, &key, &client_ca)
    }

    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], client_ca_pem: &[u8]) -> DaemonResult<Self> {
        let certs = parse_certs(cert_pem, "server certificate")?;
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| DaemonError::Tls(format!("server key: {e:?}")))?;

        let mut roots = RootCertStore::empty();
        for ca in parse_certs(client_ca_pem, "client CA")? {
            roots
                .add(ca)
                .map_err(|e| DaemonError::Tls(format!("client CA: {e}")))?;
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| DaemonError::Tls(format!("client verifier: {e}")))?;
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| DaemonError::Tls(e.to_string()))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| DaemonError::Tls(format!("server certificate: {e}")))?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.config.clone())
    }
}

async fn read_pem(path: &str) -> DaemonResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| DaemonError::Tls(format!("{path}: {e}")))
}

fn parse_certs(pem: &[u8], what: &str) -> DaemonResult<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DaemonError::Tls(format!("{what}: {e:?}")))?;
    if certs.is_empty() {
        return Err(DaemonError::Tls(format!("{what}: no certificate found")));
    }
    Ok(certs)
}

/// Subject common name of a DER certificate
pub fn common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let name = cert.subject().iter_common_name().next()?.as_str().ok()?.to_string();
    Some(name)
}

fn peer_identity(conn: &ServerConnection) -> Option<CallerIdentity> {
    let leaf = conn.peer_certificates()?.first()?;
    common_name(leaf.as_ref()).map(CallerIdentity)
}

/// Serves `app` over mutual TLS until `token` is cancelled
pub async fn serve(
    listener: TcpListener,
    app: Router,
    tls: ReaderTls,
    token: CancellationToken,
) -> DaemonResult<()> {
    let acceptor = tls.acceptor();
    let mut connections = JoinSet::new();

    loop {
        let (tcp, peer) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Reader accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };
        connections.spawn(serve_connection(
            acceptor.clone(),
            tcp,
            peer,
            app.clone(),
            token.clone(),
        ));
        while connections.try_join_next().is_some() {}
    }

    while connections.join_next().await.is_some() {}
    Ok(())
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    tcp: TcpStream,
    peer: SocketAddr,
    app: Router,
    token: CancellationToken,
) {
    let stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(tcp)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(%peer, error = %e, "Reader TLS handshake failed");
            return;
        }
        Err(_) => {
            debug!(%peer, "Reader TLS handshake timed out");
            return;
        }
    };

    let Some(caller) = peer_identity(stream.get_ref().1) else {
        warn!(%peer, "Client certificate has no common name");
        return;
    };
    debug!(%peer, user = %caller.0, "Reader connection established");

    let app = app.layer(Extension(caller));
    let service = service_fn(move |request: hyper::Request<Incoming>| app.clone().oneshot(request));
    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        served = connection.as_mut() => {
            if let Err(e) = served {
                debug!(%peer, error = %e, "Reader connection closed with error");
            }
        }
        _ = token.cancelled() => {
            connection.as_mut().graceful_shutdown();
            // Watch streams never finish on their own
            if tokio::time::timeout(DRAIN_TIMEOUT, connection).await.is_err() {
                debug!(%peer, "Dropped reader connection at shutdown");
            }
        }
    }
}
