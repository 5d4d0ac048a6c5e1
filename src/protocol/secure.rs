//! TLS configuration for the in-band authentication exchange.
//!
//! Servers normally run with a PEM certificate and key from disk; for
//! development and tests a self-signed certificate can be generated in
//! memory. Clients either pin the server certificate by SHA-256
//! fingerprint or, for development against self-signed servers, accept
//! any certificate. The TLS layer here protects credential material in
//! transit, not server identity.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{Certificate, ClientConfig, Error as TlsError, PrivateKey, ServerConfig, ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::warn;

use crate::common::error::{ProtocolError, ProtocolResult};

/// How the client judges the server certificate.
#[derive(Debug, Clone)]
pub enum CertificateTrust {
    /// Require the presented end-entity certificate to match this SHA-256
    /// fingerprint of its DER encoding.
    PinnedSha256(Vec<u8>),
    /// Accept whatever the server presents. Development only.
    AcceptAny,
}

/// A server certificate and key held in memory.
pub struct ServerIdentity {
    pub cert_chain: Vec<Certificate>,
    pub key: PrivateKey,
}

impl ServerIdentity {
    /// Loads a PEM certificate chain and PKCS#8 private key from disk.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> ProtocolResult<Self> {
        let cert_file = File::open(cert_path)
            .map_err(|e| ProtocolError::tls(format!("cannot open {}: {e}", cert_path.display())))?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .map_err(|e| ProtocolError::tls(format!("bad certificate pem: {e}")))?;
        if certs.is_empty() {
            return Err(ProtocolError::tls("no certificates in pem file"));
        }

        let key_file = File::open(key_path)
            .map_err(|e| ProtocolError::tls(format!("cannot open {}: {e}", key_path.display())))?;
        let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_file))
            .map_err(|e| ProtocolError::tls(format!("bad private key pem: {e}")))?;
        let key = keys
            .pop()
            .ok_or_else(|| ProtocolError::tls("no pkcs8 private key in pem file"))?;

        Ok(ServerIdentity {
            cert_chain: certs.into_iter().map(Certificate).collect(),
            key: PrivateKey(key),
        })
    }

    /// Generates a self-signed identity for development and tests.
    pub fn self_signed(hostname: &str) -> ProtocolResult<Self> {
        let generated = rcgen::generate_simple_self_signed(vec![hostname.to_string()])
            .map_err(|e| ProtocolError::tls(format!("certificate generation failed: {e}")))?;
        let cert_der = generated.cert.der().to_vec();
        let key_der = generated.key_pair.serialize_der();
        Ok(ServerIdentity {
            cert_chain: vec![Certificate(cert_der)],
            key: PrivateKey(key_der),
        })
    }

    /// SHA-256 fingerprint of the end-entity certificate, for client pinning.
    pub fn fingerprint(&self) -> Vec<u8> {
        certificate_fingerprint(&self.cert_chain[0])
    }
}

/// SHA-256 over the DER encoding of a certificate.
pub fn certificate_fingerprint(cert: &Certificate) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(&cert.0);
    hasher.finalize().to_vec()
}

/// Builds the acceptor a server uses to wrap connections for authentication.
pub fn server_acceptor(identity: ServerIdentity) -> ProtocolResult<TlsAcceptor> {
    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(identity.cert_chain, identity.key)
        .map_err(|e| ProtocolError::tls(format!("invalid server identity: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Builds the connector a client uses for the authentication exchange.
pub fn client_connector(trust: CertificateTrust) -> TlsConnector {
    let builder = ClientConfig::builder().with_safe_defaults();
    let config = match trust {
        CertificateTrust::PinnedSha256(fingerprint) => builder
            .with_custom_certificate_verifier(Arc::new(FingerprintVerifier { fingerprint }))
            .with_no_client_auth(),
        CertificateTrust::AcceptAny => {
            warn!("tls certificate verification disabled");
            builder
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth()
        }
    };
    TlsConnector::from(Arc::new(config))
}

struct FingerprintVerifier {
    fingerprint: Vec<u8>,
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        if certificate_fingerprint(end_entity) == self.fingerprint {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(TlsError::General("pinned certificate mismatch".into()))
        }
    }
}

struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::codec::MessageCodec;
    use crate::protocol::packets::messages::Message;
    use crate::protocol::transport::Conn;

    #[test]
    fn self_signed_identity_has_stable_fingerprint() {
        let identity = ServerIdentity::self_signed("localhost").unwrap();
        let first = identity.fingerprint();
        assert_eq!(first.len(), 32);
        assert_eq!(first, identity.fingerprint());
    }

    #[tokio::test]
    async fn wrap_exchange_unwrap_over_duplex() {
        let identity = ServerIdentity::self_signed("localhost").unwrap();
        let fingerprint = identity.fingerprint();
        let acceptor = server_acceptor(identity).unwrap();
        let connector = client_connector(CertificateTrust::PinnedSha256(fingerprint));

        let (a, b) = tokio::io::duplex(16 * 1024);
        let mut server = Conn::plain(a, MessageCodec::new());
        let mut client = Conn::plain(b, MessageCodec::new());

        let server_task = tokio::spawn(async move {
            server.wrap_server(&acceptor).await.unwrap();
            let got = server.next().await.unwrap().unwrap();
            assert_eq!(
                got,
                Message::StartLogin {
                    username: "secret".into()
                }
            );
            server
                .send(Message::Success {
                    serial: 1,
                    reason: 0,
                })
                .await
                .unwrap();
            server.unwrap_tls().unwrap();
            // Back on the plain stream.
            assert_eq!(server.next().await.unwrap().unwrap(), Message::KeepAlive);
        });

        let name = ServerName::try_from("localhost").unwrap();
        client.wrap_client(&connector, name).await.unwrap();
        client
            .send(Message::StartLogin {
                username: "secret".into(),
            })
            .await
            .unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(
            reply,
            Message::Success {
                serial: 1,
                reason: 0,
            }
        );
        client.unwrap_tls().unwrap();
        client.send(Message::KeepAlive).await.unwrap();

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn wrong_pin_fails_the_handshake() {
        let identity = ServerIdentity::self_signed("localhost").unwrap();
        let acceptor = server_acceptor(identity).unwrap();
        let connector = client_connector(CertificateTrust::PinnedSha256(vec![0u8; 32]));

        let (a, b) = tokio::io::duplex(16 * 1024);
        let mut server = Conn::plain(a, MessageCodec::new());
        let mut client = Conn::plain(b, MessageCodec::new());

        let server_task = tokio::spawn(async move {
            let _ = server.wrap_server(&acceptor).await;
        });
        let name = ServerName::try_from("localhost").unwrap();
        assert!(client.wrap_client(&connector, name).await.is_err());
        let _ = server_task.await;
    }
}
