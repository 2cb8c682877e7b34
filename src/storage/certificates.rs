//! On-disk certificate layout.
//!
//! ```text
//! <root>/certificates/<domain>/fullchain.<tag>.crt
//!                             /privkey.<tag>.key
//!                             /issuer.<tag>.crt
//!                             /meta.<tag>.json
//! ```
//!
//! `<tag>` is [`KeyType::tag`]. Saves overwrite the whole set and are not
//! transactional.

use std::path::{Path, PathBuf};

use log::{debug, info};

use super::{create_private_dir, read_file, read_optional, write_secure_file};
use crate::{
    core::{
        types::{CertificateArtifact, CertificateMetadata, KeyType},
        x509::{CertificateInfo, inspect_leaf},
    },
    error::{Error, StateError, StorageError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub fullchain: PathBuf,
    pub private_key: PathBuf,
    pub issuer: PathBuf,
    pub metadata: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CertificateStore {
    root: PathBuf,
}

impl CertificateStore {
    pub fn new(root_storage_dir: &Path) -> Self {
        Self {
            root: root_storage_dir.join("certificates"),
        }
    }

    /// Wildcard keys map to `_.<base>` so the directory name stays shell-safe.
    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.root.join(domain.replace('*', "_"))
    }

    pub fn paths(&self, domain: &str, key_type: KeyType) -> ArtifactPaths {
        let dir = self.domain_dir(domain);
        let tag = key_type.tag();
        ArtifactPaths {
            fullchain: dir.join(format!("fullchain.{tag}.crt")),
            private_key: dir.join(format!("privkey.{tag}.key")),
            issuer: dir.join(format!("issuer.{tag}.crt")),
            metadata: dir.join(format!("meta.{tag}.json")),
        }
    }

    pub fn ensure_domain_dir(&self, domain: &str) -> Result<PathBuf, StorageError> {
        let dir = self.domain_dir(domain);
        create_private_dir(&dir)?;
        Ok(dir)
    }

    pub fn exists(&self, domain: &str, key_type: KeyType) -> bool {
        self.paths(domain, key_type).fullchain.is_file()
    }

    pub fn save(
        &self,
        domain: &str,
        key_type: KeyType,
        artifact: &CertificateArtifact,
    ) -> Result<ArtifactPaths, StorageError> {
        self.ensure_domain_dir(domain)?;
        let paths = self.paths(domain, key_type);

        write_secure_file(&paths.fullchain, &artifact.certificate_pem, false)?;
        if let Some(issuer) = artifact.issuer_pem.as_deref().filter(|pem| !pem.is_empty()) {
            write_secure_file(&paths.issuer, issuer, false)?;
        }
        if let Some(key) = artifact.private_key_pem.as_deref().filter(|pem| !pem.is_empty()) {
            write_secure_file(&paths.private_key, key, false)?;
        }
        let metadata =
            serde_json::to_vec_pretty(&artifact.metadata).map_err(|source| StorageError::Encode {
                path: paths.metadata.clone(),
                source,
            })?;
        write_secure_file(&paths.metadata, &metadata, false)?;

        info!(
            "[store] saved {domain} ({key_type}) valid until {}",
            artifact.metadata.not_after
        );
        Ok(paths)
    }

    pub fn load(&self, domain: &str, key_type: KeyType) -> Result<CertificateArtifact, Error> {
        let paths = self.paths(domain, key_type);
        let certificate_pem = read_file(&paths.fullchain)?;
        let raw_metadata = read_file(&paths.metadata)?;
        let metadata: CertificateMetadata = serde_json::from_slice(&raw_metadata).map_err(|source| {
            StateError::Metadata {
                path: paths.metadata.clone(),
                source,
            }
        })?;
        Ok(CertificateArtifact {
            certificate_pem,
            issuer_pem: read_optional(&paths.issuer)?,
            private_key_pem: read_optional(&paths.private_key)?,
            metadata,
        })
    }

    /// Parses the stored leaf certificate; drives the renewal expiry gate.
    pub fn inspect(&self, domain: &str, key_type: KeyType) -> Result<CertificateInfo, Error> {
        let path = self.paths(domain, key_type).fullchain;
        let pem = read_file(&path)?;
        let info = inspect_leaf(&pem).map_err(|err| StateError::Certificate {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        debug!("[store] {} expires {}", path.display(), info.not_after);
        Ok(info)
    }

    pub fn load_private_key(&self, domain: &str, key_type: KeyType) -> Result<String, Error> {
        let path = self.paths(domain, key_type).private_key;
        let pem = read_file(&path)?;
        String::from_utf8(pem).map_err(|_| {
            StateError::PrivateKey {
                path,
                reason: "file is not valid UTF-8 PEM".to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::fs;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("acme-lego-store-{}", uuid::Uuid::new_v4()))
    }

    fn metadata() -> CertificateMetadata {
        CertificateMetadata {
            domain: "example.com".into(),
            domains: vec!["example.com".into(), "www.example.com".into()],
            key_type: KeyType::Ec256,
            serial: "01:02".into(),
            not_before: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            not_after: Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap(),
            fingerprint_sha256: "ab".repeat(32),
            issued_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap(),
            must_staple: true,
        }
    }

    fn artifact(private_key: Option<&[u8]>, issuer: Option<&[u8]>) -> CertificateArtifact {
        CertificateArtifact {
            certificate_pem: b"-----BEGIN CERTIFICATE-----\nleaf\n-----END CERTIFICATE-----\n".to_vec(),
            issuer_pem: issuer.map(<[u8]>::to_vec),
            private_key_pem: private_key.map(<[u8]>::to_vec),
            metadata: metadata(),
        }
    }

    #[test]
    fn path_scheme_uses_key_tags() {
        let store = CertificateStore::new(Path::new("/var/lib/lego"));
        let paths = store.paths("example.com", KeyType::Rsa4096);
        assert_eq!(
            paths.fullchain,
            PathBuf::from("/var/lib/lego/certificates/example.com/fullchain.rsa-4096.crt")
        );
        assert_eq!(
            paths.private_key,
            PathBuf::from("/var/lib/lego/certificates/example.com/privkey.rsa-4096.key")
        );
        assert_eq!(
            paths.issuer,
            PathBuf::from("/var/lib/lego/certificates/example.com/issuer.rsa-4096.crt")
        );
        assert_eq!(
            paths.metadata,
            PathBuf::from("/var/lib/lego/certificates/example.com/meta.rsa-4096.json")
        );
        assert_eq!(
            store.domain_dir("*.example.com"),
            PathBuf::from("/var/lib/lego/certificates/_.example.com")
        );
    }

    #[test]
    fn save_then_load_round_trips() {
        let root = temp_dir();
        let store = CertificateStore::new(&root);
        let input = artifact(Some(b"KEY"), Some(b"ISSUER"));

        store.save("example.com", KeyType::Ec256, &input).unwrap();
        assert!(store.exists("example.com", KeyType::Ec256));
        assert!(!store.exists("example.com", KeyType::Rsa2048));

        let loaded = store.load("example.com", KeyType::Ec256).unwrap();
        assert_eq!(loaded, input);
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn private_key_file_only_when_present() {
        let root = temp_dir();
        let store = CertificateStore::new(&root);

        let paths = store.save("csr.example", KeyType::Rsa2048, &artifact(None, None)).unwrap();
        assert!(!paths.private_key.exists());
        assert!(!paths.issuer.exists());
        let loaded = store.load("csr.example", KeyType::Rsa2048).unwrap();
        assert!(loaded.private_key_pem.is_none());
        assert!(loaded.issuer_pem.is_none());

        let paths = store.save("empty.example", KeyType::Rsa2048, &artifact(Some(b""), None)).unwrap();
        assert!(!paths.private_key.exists());
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn missing_certificate_is_not_found() {
        let store = CertificateStore::new(&temp_dir());
        let err = store.load("absent.example", KeyType::Ec384).unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::NotFound(_))));
    }

    #[test]
    fn garbled_metadata_is_state_error() {
        let root = temp_dir();
        let store = CertificateStore::new(&root);
        let paths = store.save("example.com", KeyType::Ec256, &artifact(None, None)).unwrap();
        fs::write(&paths.metadata, b"{not json").unwrap();

        let err = store.load("example.com", KeyType::Ec256).unwrap_err();
        assert!(matches!(err, Error::State(StateError::Metadata { .. })));
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn unparsable_certificate_is_state_error() {
        let root = temp_dir();
        let store = CertificateStore::new(&root);
        store.save("example.com", KeyType::Ec256, &artifact(None, None)).unwrap();

        let err = store.inspect("example.com", KeyType::Ec256).unwrap_err();
        assert!(matches!(err, Error::State(StateError::Certificate { .. })));
        fs::remove_dir_all(root).ok();
    }
}
