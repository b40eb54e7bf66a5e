//! TLS utilities for the proxy server: an insecure upstream verifier
//! (outbound connections are never certificate-checked, per policy) and
//! the dynamic per-SNI server certificate resolver that backs the MITM
//! splice.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::DigitallySignedStruct;

use crate::ca::CaManager;

/// No-op certificate verifier used for every outbound (upstream) TLS
/// connection the proxy makes. `InsecureSkipVerify=true` is a documented
/// policy of this tool, not an oversight: the operator is testing
/// the upstream, not trusting it.
#[derive(Debug)]
pub struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

/// Signs a fresh leaf certificate for whatever SNI name the client's
/// ClientHello carries, on demand, via the shared [`CaManager`]. This is
/// what makes the MITM splice transparent to any client that trusts the
/// root: every host gets its own leaf, minted and cached the first time
/// it's seen.
pub struct SniCertResolver {
    ca: Arc<CaManager>,
}

impl SniCertResolver {
    pub fn new(ca: Arc<CaManager>) -> Self {
        Self { ca }
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let sni = client_hello.server_name()?;
        match self.ca.leaf_for_sni(sni) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(sni, error = %e, "failed to mint MITM leaf certificate");
                None
            }
        }
    }
}

/// Server-side TLS config for the MITM splice: no client auth, leaf certs
/// resolved dynamically per SNI.
pub fn mitm_server_config(ca: Arc<CaManager>) -> Arc<rustls::ServerConfig> {
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniCertResolver::new(ca)));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}
