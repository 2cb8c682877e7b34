#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use acme_lego::{
    config::{ResolvedConfig, parse, resolve},
    core::types::{CertificateArtifact, KeyType},
    error::{AcmeError, Result},
    issuance::{
        acme::{AcmeClient, ObtainRequest, build_artifact},
        challenge::{Capability, ChallengeProvider, ChallengeResponse},
        keys::generate_private_key,
    },
    storage::certificates::CertificateStore,
};
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair, date_time_ymd};
use serde_json::{Value, json};

pub const TOKEN: &str = "scripted-token";

pub fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("acme-lego-{label}-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Resolves `body` as if it were `<dir>/config.toml`, so storage lands in `dir`.
pub fn config_in(dir: &Path, body: &str) -> ResolvedConfig {
    let path = dir.join("config.toml");
    resolve(parse(body, &path).unwrap(), &path).unwrap()
}

/// Leaf + CA chain for `domains`, valid from `not_before` to `not_after` (years).
pub fn chain(domains: &[String], not_before: i32, not_after: i32) -> String {
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().unwrap();
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let mut params = CertificateParams::new(domains.to_vec()).unwrap();
    params.not_before = date_time_ymd(not_before, 1, 1);
    params.not_after = date_time_ymd(not_after, 1, 1);
    let leaf_key = KeyPair::generate().unwrap();
    let leaf = params.signed_by(&leaf_key, &ca, &ca_key).unwrap();
    format!("{}{}", leaf.pem(), ca.pem())
}

/// Puts a previously issued certificate in the store.
pub fn seed(store: &CertificateStore, domains: &[&str], key_type: KeyType, not_after: i32) -> String {
    let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    let key = generate_private_key(key_type).unwrap();
    let request = ObtainRequest {
        domains: &domains,
        key_type,
        private_key_pem: &key,
        bundle: true,
        must_staple: true,
    };
    let artifact = build_artifact(&chain(&domains, not_after - 1, not_after), Some(&key), &request).unwrap();
    store.save(&domains[0], key_type, &artifact).unwrap();
    key
}

/// In-memory CA: solves with whatever provider was installed last and issues
/// certificates valid until 2099.
#[derive(Default)]
pub struct ScriptedClient {
    pub events: Vec<String>,
    pub reject: Vec<String>,
    provider: Option<Box<dyn ChallengeProvider>>,
}

impl ScriptedClient {
    pub fn rejecting(domain: &str) -> Self {
        Self {
            reject: vec![domain.to_string()],
            ..Self::default()
        }
    }
}

impl AcmeClient for ScriptedClient {
    fn register(&mut self) -> Result<Value> {
        self.events.push("register".into());
        Ok(json!({ "status": "valid" }))
    }

    fn set_challenge_provider(&mut self, capability: Capability, provider: Box<dyn ChallengeProvider>) {
        self.events.push(format!("install {capability}"));
        self.provider = Some(provider);
    }

    fn obtain_certificate(&mut self, request: &ObtainRequest<'_>) -> Result<CertificateArtifact> {
        let primary = request.domains[0].clone();
        self.events.push(format!("obtain {primary} {}", request.key_type));
        if self.reject.contains(&primary) {
            return Err(AcmeError::Order(format!("{primary} rejected by CA")).into());
        }

        let provider = self
            .provider
            .as_mut()
            .ok_or_else(|| AcmeError::NoProvider(primary.clone()))?;
        let response = ChallengeResponse {
            domain: primary.clone(),
            token: Some(TOKEN.to_string()),
            proof: format!("{TOKEN}.thumbprint"),
        };
        provider
            .present(&response)
            .map_err(|source| AcmeError::Challenge {
                domain: primary.clone(),
                source,
            })?;
        provider
            .cleanup(&response)
            .map_err(|source| AcmeError::Challenge {
                domain: primary.clone(),
                source,
            })?;

        let chain = chain(request.domains, 2025, 2099);
        build_artifact(&chain, Some(request.private_key_pem), request)
            .map_err(|err| AcmeError::Download(err.to_string()).into())
    }
}
