//! Leaf-certificate inspection used by the expiry gate and metadata builder.

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint_sha256: String,
}

/// Reads the first certificate of a PEM bundle.
pub fn inspect_leaf(pem: &[u8]) -> Result<CertificateInfo> {
    let (_, pem_block) =
        parse_x509_pem(pem).map_err(|e| anyhow!("failed to parse certificate PEM: {e}"))?;
    let cert = pem_block
        .parse_x509()
        .map_err(|e| anyhow!("failed to decode certificate: {e}"))?;

    let not_before = timestamp(cert.validity().not_before.timestamp())?;
    let not_after = timestamp(cert.validity().not_after.timestamp())?;
    let fingerprint_sha256 = {
        let mut hasher = Sha256::new();
        hasher.update(&pem_block.contents);
        hex::encode(hasher.finalize())
    };

    Ok(CertificateInfo {
        serial: cert.raw_serial_as_string(),
        not_before,
        not_after,
        fingerprint_sha256,
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| anyhow!("certificate validity {secs} is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use rcgen::{CertificateParams, KeyPair, date_time_ymd};

    #[test]
    fn reads_validity_window() {
        let mut params = CertificateParams::new(vec!["example.com".to_string()]).unwrap();
        params.not_before = date_time_ymd(2020, 1, 1);
        params.not_after = date_time_ymd(2030, 6, 15);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let info = inspect_leaf(cert.pem().as_bytes()).unwrap();
        assert_eq!(info.not_before.year(), 2020);
        assert_eq!(info.not_after.year(), 2030);
        assert_eq!(info.not_after.month(), 6);
        assert_eq!(info.fingerprint_sha256.len(), 64);
        assert!(!info.serial.is_empty());
    }

    #[test]
    fn rejects_garbage() {
        assert!(inspect_leaf(b"not a certificate").is_err());
    }
}
