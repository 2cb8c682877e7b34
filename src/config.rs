//! Layered configuration: a global section plus one entry per domain group.
//!
//! Every per-domain field falls back through `domain -> global -> fixed default`
//! using the small precedence helpers below, so each rule can be tested alone.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::TimeDelta;
use log::{debug, warn};
use serde::Deserialize;

use crate::{
    core::types::{DomainPolicy, GlobalPolicy, KeyType},
    domain::normalize_domain,
    error::ConfigError,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/lego/config.toml";
pub const DEFAULT_ACME_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const DEFAULT_CHALLENGE: &str = "http-path";
pub const DEFAULT_KEY_TYPE: KeyType = KeyType::Rsa2048;
/// Without `expire-days` a certificate is renewed only once it has expired.
const DEFAULT_EXPIRE_DAYS: u32 = 0;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RawConfig {
    pub dev: bool,
    pub root_dir: Option<String>,
    pub acme_url: Option<String>,
    pub log_level: Option<String>,
    pub email: Option<String>,
    pub key_type: Vec<String>,
    pub challenge: Option<String>,
    pub expire_days: Option<u32>,
    pub after_renew: Option<String>,
    pub domain_group: BTreeMap<String, RawDomainGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RawDomainGroup {
    pub domains: Vec<String>,
    pub key_type: Vec<String>,
    pub challenge: Option<String>,
    pub options: BTreeMap<String, String>,
}

/// Global policy plus every configured domain group, keyed by domain.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub global: GlobalPolicy,
    pub domains: BTreeMap<String, DomainPolicy>,
}

impl ResolvedConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let raw = parse(&content, &path)?;
        resolve(raw, &path)
    }

    /// Looks up a group by any spelling of its key: case, trailing dot and
    /// Unicode labels are normalized the same way the keys were.
    pub fn domain(&self, domain: &str) -> Result<Option<&DomainPolicy>, ConfigError> {
        Ok(self.domains.get(&domain_key(domain)?))
    }
}

pub fn parse(content: &str, path: &Path) -> Result<RawConfig, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Turns a parsed document into the policy the orchestrator consumes.
/// Pure: the config path is only used to anchor a relative or missing `root-dir`.
pub fn resolve(raw: RawConfig, config_path: &Path) -> Result<ResolvedConfig, ConfigError> {
    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let root_storage_dir = match non_empty(raw.root_dir.as_deref()) {
        Some(dir) => config_dir.join(dir),
        None => config_dir,
    };

    let acme_directory_url = match non_empty(raw.acme_url.as_deref()) {
        Some(url) if raw.dev => url.to_string(),
        Some(url) => {
            warn!("[config] ignoring acme-url {url} outside dev mode");
            DEFAULT_ACME_URL.to_string()
        }
        None => DEFAULT_ACME_URL.to_string(),
    };

    let expire_days = raw.expire_days.unwrap_or(DEFAULT_EXPIRE_DAYS);
    let global_key_types = key_type_list(&raw.key_type);
    let global_challenge = non_empty(raw.challenge.as_deref());

    let mut domains = BTreeMap::new();
    for (group, entry) in raw.domain_group {
        let policy = resolve_domain(&group, entry, &global_key_types, global_challenge)?;
        if domains.contains_key(&policy.domain_key) {
            warn!(
                "[config] domain group {} declared more than once; last entry wins",
                policy.domain_key
            );
        }
        debug!(
            "[config] {} -> challenge={} key_types={:?} sans={:?}",
            policy.domain_key, policy.challenge_name, policy.key_types, policy.san_list
        );
        domains.insert(policy.domain_key.clone(), policy);
    }

    let global = GlobalPolicy {
        dev: raw.dev,
        log_level: non_empty(raw.log_level.as_deref()).map(str::to_string),
        account_email: raw.email.unwrap_or_default().trim().to_string(),
        acme_directory_url,
        user_agent: format!("acme-lego/{}", env!("CARGO_PKG_VERSION")),
        http_timeout: HTTP_TIMEOUT,
        expiry_threshold: TimeDelta::days(i64::from(expire_days)),
        after_renew_command: non_empty(raw.after_renew.as_deref()).map(str::to_string),
        root_storage_dir,
        default_key_types: resolve_key_types(&[], &global_key_types),
        default_challenge: resolve_challenge(None, global_challenge),
    };

    Ok(ResolvedConfig { global, domains })
}

fn resolve_domain(
    group: &str,
    entry: RawDomainGroup,
    global_key_types: &[KeyType],
    global_challenge: Option<&str>,
) -> Result<DomainPolicy, ConfigError> {
    let san_list = build_san_list(group, &entry.domains)?;
    let domain_key = san_list[0].clone();
    Ok(DomainPolicy {
        domain_key,
        san_list,
        key_types: resolve_key_types(&key_type_list(&entry.key_type), global_key_types),
        challenge_name: resolve_challenge(non_empty(entry.challenge.as_deref()), global_challenge),
        challenge_options: entry.options,
    })
}

/// Recognized key types in declaration order; unknown tokens are dropped.
pub fn key_type_list(tokens: &[String]) -> Vec<KeyType> {
    let mut result = Vec::new();
    for token in tokens {
        match KeyType::parse(token) {
            Some(key_type) if !result.contains(&key_type) => result.push(key_type),
            Some(_) => {}
            None => debug!("[config] dropping unrecognized key type `{token}`"),
        }
    }
    result
}

pub fn resolve_key_types(domain: &[KeyType], global: &[KeyType]) -> Vec<KeyType> {
    if !domain.is_empty() {
        domain.to_vec()
    } else if !global.is_empty() {
        global.to_vec()
    } else {
        vec![DEFAULT_KEY_TYPE]
    }
}

pub fn resolve_challenge(domain: Option<&str>, global: Option<&str>) -> String {
    non_empty(domain)
        .or_else(|| non_empty(global))
        .unwrap_or(DEFAULT_CHALLENGE)
        .to_string()
}

/// The group key first, then the declared extra names, deduplicated
/// case-insensitively in first-seen order.
pub fn build_san_list(group: &str, extra: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for raw in std::iter::once(group).chain(extra.iter().map(String::as_str)) {
        let domain = normalize_domain(raw).map_err(|err| ConfigError::InvalidDomain {
            group: group.to_string(),
            domain: raw.to_string(),
            reason: err.to_string(),
        })?;
        if seen.insert(domain.clone()) {
            result.push(domain);
        }
    }
    Ok(result)
}

/// One-off policy for a domain that is not in any configured group.
pub fn fallback_webroot_policy(domain: &str, webroot: &Path) -> Result<DomainPolicy, ConfigError> {
    let domain_key = domain_key(domain)?;
    let mut challenge_options = BTreeMap::new();
    challenge_options.insert("public".to_string(), webroot.display().to_string());
    Ok(DomainPolicy {
        san_list: vec![domain_key.clone()],
        domain_key,
        key_types: vec![DEFAULT_KEY_TYPE],
        challenge_name: DEFAULT_CHALLENGE.to_string(),
        challenge_options,
    })
}

fn domain_key(domain: &str) -> Result<String, ConfigError> {
    normalize_domain(domain).map_err(|err| ConfigError::InvalidName {
        domain: domain.to_string(),
        reason: err.to_string(),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
