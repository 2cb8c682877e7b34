use std::{collections::BTreeMap, fmt, path::PathBuf, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Certificate key algorithm and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "ecdsa-256")]
    Ec256,
    #[serde(rename = "ecdsa-384")]
    Ec384,
    #[serde(rename = "rsa-2048")]
    Rsa2048,
    #[serde(rename = "rsa-4096")]
    Rsa4096,
    #[serde(rename = "rsa-8192")]
    Rsa8192,
}

impl KeyType {
    /// Parses a config token such as `EC256` or `rsa4096`. Unknown tokens yield `None`.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "EC256" => Some(KeyType::Ec256),
            "EC384" => Some(KeyType::Ec384),
            "RSA2048" => Some(KeyType::Rsa2048),
            "RSA4096" => Some(KeyType::Rsa4096),
            "RSA8192" => Some(KeyType::Rsa8192),
            _ => None,
        }
    }

    /// File-name tag used by the certificate store.
    pub fn tag(&self) -> &'static str {
        match self {
            KeyType::Ec256 => "ecdsa-256",
            KeyType::Ec384 => "ecdsa-384",
            KeyType::Rsa2048 => "rsa-2048",
            KeyType::Rsa4096 => "rsa-4096",
            KeyType::Rsa8192 => "rsa-8192",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Process-wide settings resolved once from the configuration file.
#[derive(Debug, Clone)]
pub struct GlobalPolicy {
    pub dev: bool,
    pub log_level: Option<String>,
    pub account_email: String,
    pub acme_directory_url: String,
    pub user_agent: String,
    pub http_timeout: Duration,
    /// Renew once `notAfter` falls within this window.
    pub expiry_threshold: TimeDelta,
    pub after_renew_command: Option<String>,
    pub root_storage_dir: PathBuf,
    pub default_key_types: Vec<KeyType>,
    pub default_challenge: String,
}

/// Fully resolved settings for one domain group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainPolicy {
    pub domain_key: String,
    /// Always starts with `domain_key`; no case-insensitive duplicates.
    pub san_list: Vec<String>,
    /// Never empty.
    pub key_types: Vec<KeyType>,
    pub challenge_name: String,
    pub challenge_options: BTreeMap<String, String>,
}

impl DomainPolicy {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.challenge_options
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

/// Non-PEM facts about an issued certificate, persisted as `meta.<tag>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub domain: String,
    pub domains: Vec<String>,
    pub key_type: KeyType,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint_sha256: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub must_staple: bool,
}

/// Everything a successful obtain/renew produces for one (domain, key type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateArtifact {
    /// Leaf certificate followed by the issuer chain when bundled.
    pub certificate_pem: Vec<u8>,
    pub issuer_pem: Option<Vec<u8>>,
    /// Absent when the request went through a CSR-only path.
    pub private_key_pem: Option<Vec<u8>>,
    pub metadata: CertificateMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tokens_case_insensitively() {
        assert_eq!(KeyType::parse("ec256"), Some(KeyType::Ec256));
        assert_eq!(KeyType::parse(" RSA4096 "), Some(KeyType::Rsa4096));
        assert_eq!(KeyType::parse("rsa3072"), None);
        assert_eq!(KeyType::parse(""), None);
    }

    #[test]
    fn tags_match_store_layout() {
        let tags: Vec<&str> = [
            KeyType::Ec256,
            KeyType::Ec384,
            KeyType::Rsa2048,
            KeyType::Rsa4096,
            KeyType::Rsa8192,
        ]
        .iter()
        .map(KeyType::tag)
        .collect();
        assert_eq!(
            tags,
            ["ecdsa-256", "ecdsa-384", "rsa-2048", "rsa-4096", "rsa-8192"]
        );
    }

    #[test]
    fn serializes_key_type_as_tag() {
        let json = serde_json::to_string(&KeyType::Ec384).unwrap();
        assert_eq!(json, "\"ecdsa-384\"");
    }

    #[test]
    fn option_ignores_blank_values() {
        let mut options = BTreeMap::new();
        options.insert("public".to_string(), "  ".to_string());
        options.insert("token".to_string(), "abc".to_string());
        let policy = DomainPolicy {
            domain_key: "example.com".into(),
            san_list: vec!["example.com".into()],
            key_types: vec![KeyType::Rsa2048],
            challenge_name: "http-path".into(),
            challenge_options: options,
        };
        assert_eq!(policy.option("public"), None);
        assert_eq!(policy.option("token"), Some("abc"));
        assert_eq!(policy.option("missing"), None);
    }
}
