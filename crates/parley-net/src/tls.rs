//! rustls configuration for both ends of a connection.
//!
//! The server loads its certificate chain and private key from PEM files
//! at listener start.  The client verifies against the webpki root store,
//! or skips verification entirely for deployments running on self-signed
//! certificates.  rustls speaks TLS 1.2+ only, so the legacy SSLv2/SSLv3
//! protocol versions are not negotiable to begin with.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("rustls: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build a server-side acceptor from a PEM certificate chain and private
/// key file.
pub fn acceptor(cert_file: &Path, key_file: &Path) -> Result<TlsAcceptor, TlsConfigError> {
    let certs = read_certificates(cert_file)?;
    let key = read_private_key(key_file)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a client-side connector.  With `verify_peer` the webpki roots
/// are used; without it, any server certificate is accepted.
pub fn connector(verify_peer: bool) -> TlsConnector {
    let config = if verify_peer {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
            .with_no_client_auth()
    };
    TlsConnector::from(Arc::new(config))
}

/// Read every PEM `CERTIFICATE` entry in the file.
pub fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let file = File::open(path).map_err(|source| TlsConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|source| TlsConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsConfigError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

/// Read the first PEM private key (PKCS#1, PKCS#8 or SEC1) in the file.
pub fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    let file = File::open(path).map_err(|source| TlsConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsConfigError::Read {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsConfigError::NoPrivateKey(path.display().to_string()))
}

/// Accepts any server certificate while still checking handshake
/// signatures.  Only reachable through an explicit `verify_peer = false`.
#[derive(Debug)]
struct NoVerification(CryptoProvider);

impl NoVerification {
    fn new() -> Self {
        NoVerification(rustls::crypto::ring::default_provider())
    }
}

impl ServerCertVerifier for NoVerification {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_cert_file_is_a_read_error() {
        let err = read_certificates(Path::new("/nonexistent/server.crt")).unwrap_err();
        assert!(matches!(err, TlsConfigError::Read { .. }));
    }

    #[test]
    fn file_without_certificates_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not a pem file").unwrap();
        let err = read_certificates(file.path()).unwrap_err();
        assert!(matches!(err, TlsConfigError::NoCertificates(_)));
    }

    #[test]
    fn file_without_private_key_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "-----BEGIN GARBAGE-----").unwrap();
        writeln!(file, "-----END GARBAGE-----").unwrap();
        let err = read_private_key(file.path()).unwrap_err();
        assert!(matches!(
            err,
            TlsConfigError::NoPrivateKey(_) | TlsConfigError::Read { .. }
        ));
    }

    #[test]
    fn acceptor_fails_without_credentials() {
        let cert = tempfile::NamedTempFile::new().unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();
        assert!(acceptor(cert.path(), key.path()).is_err());
    }
}
