use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use super::checker::{Checker, elapsed_ms, host_and_port};
use super::types::{CheckDetails, CheckOutcome};
use super::whois::WhoisClient;
use crate::database::models::Monitor;

/// Expiry and issuer read from a server certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub not_after: DateTime<Utc>,
    pub issuer: Option<String>,
}

/// Accepts any chain so expired or self-signed certificates can still be read.
/// Handshake signatures are still checked.
#[derive(Debug)]
struct InspectingVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for InspectingVerifier {
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
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Domain registration and TLS certificate expiry checker
pub struct DomainSslChecker {
    whois: WhoisClient,
    connector: TlsConnector,
}

impl DomainSslChecker {
    pub fn new() -> anyhow::Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InspectingVerifier { provider }))
            .with_no_client_auth();

        Ok(Self { whois: WhoisClient::new()?, connector: TlsConnector::from(Arc::new(config)) })
    }

    async fn domain_expiry(&self, domain: &str, limit: Duration) -> Result<DateTime<Utc>, String> {
        let text = self.whois.lookup(domain, limit).await?;
        self.whois
            .parse_expiry(&text)
            .ok_or_else(|| "Domain expiry date not found in WHOIS response".to_string())
    }

    async fn certificate(&self, host: &str, port: u16, limit: Duration) -> Result<CertificateInfo, String> {
        let server_name =
            ServerName::try_from(host.to_string()).map_err(|e| format!("Invalid TLS server name {host}: {e}"))?;

        let handshake = async {
            let tcp = TcpStream::connect((host, port)).await.map_err(|e| format!("Connection failed: {e}"))?;
            self.connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| format!("TLS handshake failed: {e}"))
        };
        let stream = timeout(limit, handshake).await.map_err(|_| "TLS handshake timeout".to_string())??;

        let (_, session) = stream.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| "No SSL certificate found".to_string())?;
        parse_certificate(leaf.as_ref())
    }
}

/// Pull `notAfter` and the issuer (organization, else common name) from a DER certificate
pub fn parse_certificate(der: &[u8]) -> Result<CertificateInfo, String> {
    let (_, cert) =
        x509_parser::parse_x509_certificate(der).map_err(|e| format!("Invalid certificate: {e}"))?;

    let not_after = Utc
        .timestamp_opt(cert.validity().not_after.timestamp(), 0)
        .single()
        .ok_or_else(|| "Certificate expiry out of range".to_string())?;

    let issuer = cert.issuer();
    let issuer = issuer
        .iter_organization()
        .find_map(|attr| attr.as_str().ok())
        .or_else(|| issuer.iter_common_name().find_map(|attr| attr.as_str().ok()))
        .map(str::to_string);

    Ok(CertificateInfo { not_after, issuer })
}

/// WHOIS name for a host: `www.` is dropped
fn registrable_name(host: &str) -> String {
    host.trim_end_matches('.').trim_start_matches("www.").to_ascii_lowercase()
}

#[async_trait::async_trait]
impl Checker for DomainSslChecker {
    async fn check(&self, monitor: &Monitor) -> CheckOutcome {
        let start = Instant::now();
        let Some((host, port)) = host_and_port(&monitor.url, monitor.port, Some(443)) else {
            return CheckOutcome::failure(0, format!("Invalid hostname: {}", monitor.url));
        };
        let limit = monitor.timeout();

        let name = registrable_name(&host);
        let (domain, certificate) = tokio::join!(
            self.domain_expiry(&name, limit),
            self.certificate(&host, port, limit)
        );

        let error = match (&domain, &certificate) {
            (Ok(_), Ok(_)) => None,
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Some(e.clone()),
            (Err(d), Err(c)) => Some(format!("{d}; {c}")),
        };

        let (certificate_expires_at, issuer) = match &certificate {
            Ok(info) => (Some(info.not_after), info.issuer.clone()),
            Err(_) => (None, None),
        };

        CheckOutcome::from_error(elapsed_ms(start), error).with_details(CheckDetails::DomainSsl {
            domain_expires_at: domain.as_ref().ok().copied(),
            certificate_expires_at,
            issuer,
            domain_error: domain.err(),
            certificate_error: certificate.err(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::MonitorType;

    #[test]
    fn test_registrable_name_drops_www() {
        assert_eq!(registrable_name("www.Example.com."), "example.com");
        assert_eq!(registrable_name("api.example.com"), "api.example.com");
    }

    #[test]
    fn test_garbage_certificate_is_rejected() {
        assert!(parse_certificate(b"not a certificate").is_err());
    }

    #[test]
    fn test_checker_builds_with_ring_provider() {
        assert!(DomainSslChecker::new().is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_both_errors() {
        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let checker = DomainSslChecker {
            whois: WhoisClient::new().unwrap().with_root("127.0.0.1", port),
            ..DomainSslChecker::new().unwrap()
        };
        let mut monitor = Monitor::new(uuid::Uuid::new_v4(), "https://127.0.0.1", MonitorType::DomainSsl);
        monitor.port = Some(port);
        monitor.timeout_ms = 500;

        let start = Instant::now();
        let outcome = checker.check(&monitor).await;
        assert!(!outcome.success);
        assert!(start.elapsed() < Duration::from_secs(2));
        match outcome.details {
            Some(CheckDetails::DomainSsl { domain_error, certificate_error, .. }) => {
                assert!(domain_error.unwrap().contains("WHOIS"));
                assert!(certificate_error.unwrap().starts_with("Connection failed"));
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }
}
