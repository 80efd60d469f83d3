//! Socket dialing: plain TCP or TLS over TCP.
//!
//! The supervisor only sees a [`Dialer`] and the boxed [`Socket`] it returns,
//! so tests can hand it in-memory streams.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;
use tokio_rustls::rustls::DigitallySignedStruct;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};

use crate::error::Error;

/// A bidirectional byte stream the client can run IRC over.
pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Socket for T {}

pub type BoxSocket = Box<dyn Socket>;

pub type DialFuture<'a> = Pin<Box<dyn Future<Output = Result<BoxSocket, Error>> + Send + 'a>>;

/// Opens one socket to `addr` (`host:port`). `host` is the bare hostname,
/// used for TLS server-name verification.
pub trait Dialer: Send + Sync {
    fn dial<'a>(&'a self, addr: &'a str, host: &'a str) -> DialFuture<'a>;
}

/// Dials real TCP connections, optionally wrapped in TLS.
#[derive(Clone)]
pub struct NetDialer {
    pub timeout: Duration,
    /// `None` means plaintext.
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl NetDialer {
    pub fn plain(timeout: Duration) -> Self {
        Self { timeout, tls: None }
    }

    pub fn tls(timeout: Duration, config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            timeout,
            tls: Some(config),
        }
    }

    async fn connect(&self, addr: &str, host: &str) -> Result<BoxSocket, Error> {
        let mode = if self.tls.is_some() { "TLS" } else { "plain" };
        tracing::debug!("Connecting to {addr} ({mode})...");

        let tcp = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::DialTimeout {
                addr: addr.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| Error::dial(addr, e))?;
        let _ = tcp.set_nodelay(true);
        tracing::debug!("TCP connected to {addr}");

        let Some(config) = &self.tls else {
            return Ok(Box::new(tcp));
        };

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::InvalidServerName(host.to_string()))?;
        let connector = TlsConnector::from(config.clone());
        let tls = tokio::time::timeout(self.timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| Error::DialTimeout {
                addr: addr.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| Error::tls(addr, e))?;
        tracing::debug!("TLS handshake with {addr} complete");
        Ok(Box::new(tls))
    }
}

impl Dialer for NetDialer {
    fn dial<'a>(&'a self, addr: &'a str, host: &'a str) -> DialFuture<'a> {
        Box::pin(self.connect(addr, host))
    }
}

#[cfg(not(any(feature = "aws-lc-rs", feature = "ring")))]
compile_error!("enable the `aws-lc-rs` or `ring` feature for TLS support");

#[cfg(feature = "ring")]
fn backend() -> CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
fn backend() -> CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}

/// The process-wide provider. One installed by the application wins.
fn provider() -> Arc<CryptoProvider> {
    let _ = backend().install_default();
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(backend()))
}

/// Client TLS settings.
///
/// With `verify_certs` the server chain is checked against the webpki root
/// set. Without it any certificate is accepted (self-signed servers), but
/// handshake signatures are still checked against the presented key.
pub fn tls_config(verify_certs: bool) -> rustls::ClientConfig {
    let provider = provider();
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap_or_else(|_| rustls::ClientConfig::builder());

    if verify_certs {
        let roots =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return builder.with_root_certificates(roots).with_no_client_auth();
    }

    builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AnyServerCert {
            algorithms: provider.signature_verification_algorithms,
        }))
        .with_no_client_auth()
}

/// Skips chain and name validation only.
#[derive(Debug)]
struct AnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_configs_build_with_and_without_verification() {
        assert!(tls_config(true).enable_sni);
        assert!(tls_config(false).enable_sni);
        assert!(!provider().signature_verification_algorithms.supported_schemes().is_empty());
    }

    #[tokio::test]
    async fn refused_connection_is_a_dial_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dialer = NetDialer::plain(Duration::from_secs(2));
        let err = dialer.dial(&addr, "127.0.0.1").await.err().unwrap();
        assert!(matches!(err, Error::Dial { .. } | Error::DialTimeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn plain_dial_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let dialer = NetDialer::plain(Duration::from_secs(2));
        assert!(dialer.dial(&addr, "127.0.0.1").await.is_ok());
        accept.await.unwrap().unwrap();
    }
}
