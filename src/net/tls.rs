//! TLS termination and client certificate capture.
//!
//! # Responsibilities
//! - Load the listener certificate and key (PEM)
//! - Request client certificates; verify them against a CA bundle when one
//!   is configured, otherwise accept any certificate and leave the decision
//!   to the certificate registry
//! - Expose the peer's leaf certificate to handlers as a request extension
//!
//! # Data Flow
//! ```text
//! TCP ──▶ RustlsAcceptor (handshake) ──▶ ClientCertAcceptor
//!                                             │
//!                    peer_certificates()[0] ──┘──▶ PeerCertificate extension
//!                                                        │
//!                                               auth middleware
//! ```

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use axum_server::accept::{Accept, DefaultAcceptor};
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tower_http::add_extension::AddExtension;

use crate::config::TlsConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("no certificate found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("client CA bundle rejected: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

/// DER leaf certificate the client presented, if any.
#[derive(Debug, Clone, Default)]
pub struct PeerCertificate(pub Option<Bytes>);

/// Install the process-wide crypto provider once.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Build the listener configuration.
pub fn load_tls_config(config: &TlsConfig) -> Result<RustlsConfig, TlsError> {
    install_crypto_provider();

    let certs = read_certificates(&config.cert_path)?;
    let key = {
        let mut reader = open(&config.key_path)?;
        rustls_pemfile::private_key(&mut reader)
            .map_err(|source| TlsError::Io {
                path: config.key_path.clone(),
                source,
            })?
            .ok_or_else(|| TlsError::NoPrivateKey(config.key_path.clone()))?
    };

    let verifier: Arc<dyn ClientCertVerifier> = match &config.client_ca_path {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            for cert in read_certificates(path)? {
                roots.add(cert)?;
            }
            WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()?
        }
        None => Arc::new(AnyClientCertificate::new()),
    };

    let mut server = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    server.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(server)))
}

fn open(path: &str) -> Result<BufReader<File>, TlsError> {
    File::open(Path::new(path))
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })
}

fn read_certificates(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_string()));
    }
    Ok(certs)
}

/// Requests a client certificate and accepts any that proves key possession.
///
/// Chain trust is not checked; only certificates present in the registry
/// authenticate.
#[derive(Debug)]
pub struct AnyClientCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AnyClientCertificate {
    pub fn new() -> Self {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl Default for AnyClientCertificate {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCertVerifier for AnyClientCertificate {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }
}

/// TLS acceptor that records the peer certificate on every request of the
/// connection.
#[derive(Clone)]
pub struct ClientCertAcceptor {
    inner: RustlsAcceptor<DefaultAcceptor>,
}

impl ClientCertAcceptor {
    pub fn new(config: RustlsConfig) -> Self {
        Self {
            inner: RustlsAcceptor::new(config),
        }
    }
}

impl<I, S> Accept<I, S> for ClientCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, PeerCertificate>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();
        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let peer = stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|chain| chain.first())
                .map(|leaf| Bytes::copy_from_slice(leaf.as_ref()));

            if peer.is_some() {
                tracing::debug!("Client presented a certificate");
            }
            Ok((stream, AddExtension::new(service, PeerCertificate(peer))))
        })
    }
}
