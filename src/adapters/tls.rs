//! TLS certificate inspection for the public endpoint

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsConnector;

use crate::error::{Result, WatchError};

/// What the server presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertInfo {
    /// Chain and hostname verified by the platform trust store
    pub verified: bool,
    pub not_after: DateTime<Utc>,
}

impl CertInfo {
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}

#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn inspect(&self, host: &str, port: u16) -> Result<CertInfo>;
}

/// Reads certificates over a live handshake using the platform TLS stack
pub struct NativeTlsInspector {
    timeout: Duration,
}

impl NativeTlsInspector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn handshake(&self, host: &str, port: u16, verify: bool) -> Result<Vec<u8>> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!verify)
            .danger_accept_invalid_hostnames(!verify)
            .build()?;
        let connector = TlsConnector::from(connector);

        let secs = self.timeout.as_secs();
        let tcp = timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| WatchError::timeout(format!("connect {}:{}", host, port), secs))??;
        let tls = timeout(self.timeout, connector.connect(host, tcp))
            .await
            .map_err(|_| WatchError::timeout(format!("tls handshake {}", host), secs))??;

        let cert = tls
            .get_ref()
            .peer_certificate()?
            .ok_or_else(|| WatchError::Malformed(format!("{} presented no certificate", host)))?;
        Ok(cert.to_der()?)
    }
}

#[async_trait]
impl CertificateSource for NativeTlsInspector {
    async fn inspect(&self, host: &str, port: u16) -> Result<CertInfo> {
        // A failed verifying handshake still lets us read the expiry for the report
        let (der, verified) = match self.handshake(host, port, true).await {
            Ok(der) => (der, true),
            Err(WatchError::Tls(_)) => (self.handshake(host, port, false).await?, false),
            Err(e) => return Err(e),
        };
        Ok(CertInfo {
            verified,
            not_after: not_after_from_der(&der)?,
        })
    }
}

/// Expiry timestamp of a DER-encoded certificate
pub fn not_after_from_der(der: &[u8]) -> Result<DateTime<Utc>> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| WatchError::Malformed(format!("certificate: {}", e)))?;
    let ts = cert.validity().not_after.timestamp();
    Utc.timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| WatchError::Malformed(format!("certificate expiry {}", ts)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_remaining() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let info = CertInfo {
            verified: true,
            not_after: Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
        };
        assert_eq!(info.days_remaining(now), 30);
    }

    #[test]
    fn test_garbage_der() {
        assert!(not_after_from_der(&[0x30, 0x01, 0x00]).is_err());
    }
}
