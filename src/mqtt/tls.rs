//! TLS transport setup
//!
//! Bambu printers serve MQTT over TLS with a self-signed certificate whose subject is
//! the printer serial, not its LAN address. Verifying it against system roots cannot
//! succeed, so [`MqttConfig::insecure_skip_verify`] (on by default) swaps in a verifier
//! that accepts any server certificate while still checking handshake signatures.

use std::sync::Arc;

use rumqttc::tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, SignatureScheme,
};
use rumqttc::{TlsConfiguration, Transport};
use tracing::warn;

use super::config::MqttConfig;
use super::error::ConnectError;

/// Picks the transport described by `config`.
pub fn transport(config: &MqttConfig) -> Result<Transport, ConnectError> {
    if !config.use_tls {
        warn!("TLS disabled, MQTT credentials are sent in clear text");
        return Ok(Transport::Tcp);
    }

    if config.insecure_skip_verify {
        warn!(
            "Certificate verification disabled for {} (self-signed printer certificate)",
            config.host
        );
        Ok(Transport::tls_with_config(TlsConfiguration::Rustls(
            insecure_client_config()?,
        )))
    } else {
        Ok(Transport::tls_with_config(TlsConfiguration::default()))
    }
}

/// Client config that trusts any server certificate.
pub fn insecure_client_config() -> Result<Arc<ClientConfig>, ConnectError> {
    let provider = Arc::new(ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        .with_no_client_auth();

    Ok(Arc::new(config))
}

#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
