//! Error taxonomy shared by every command.
//!
//! Each concern owns a `thiserror` enum; [`Error`] unifies them and adds a
//! [`Error::Context`] layer so failures pick up the operation and identity
//! (domain, key type, path) they happened under while propagating.

use std::path::PathBuf;

use log::Level;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid domain `{domain}` in domain group `{group}`: {reason}")]
    InvalidDomain {
        group: String,
        domain: String,
        reason: String,
    },
    #[error("invalid domain `{domain}`: {reason}")]
    InvalidName { domain: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown challenge provider `{0}`")]
    Unknown(String),
    #[error("challenge provider `{provider}` is misconfigured: {reason}")]
    InvalidOptions { provider: String, reason: String },
    #[error("failed to construct challenge provider `{provider}`")]
    Construct {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to bind challenge listener on {address}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("failed to reach ACME directory {url}: {reason}")]
    Directory { url: String, reason: String },
    #[error("account registration failed: {0}")]
    Registration(String),
    #[error("order failed: {0}")]
    Order(String),
    #[error("no challenge provider installed for {0}")]
    NoProvider(String),
    #[error("challenge for {domain} failed")]
    Challenge {
        domain: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("finalize failed: {0}")]
    Finalize(String),
    #[error("certificate download failed: {0}")]
    Download(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("refusing to overwrite existing file {0}")]
    AlreadyExists(PathBuf),
    #[error("failed to create directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("certificate {path} is unreadable: {reason}")]
    Certificate { path: PathBuf, reason: String },
    #[error("private key {path} is unreadable: {reason}")]
    PrivateKey { path: PathBuf, reason: String },
    #[error("private key {path} has unexpected algorithm: {found}")]
    UnexpectedKeyAlgorithm { path: PathBuf, found: String },
    #[error("metadata {path} is garbled")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Acme(#[from] AcmeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("missing required parameter `{0}`")]
    RequiredParam(&'static str),
    #[error("domain `{0}` is not configured")]
    UnknownDomain(String),
    #[error("failed to generate {key_type} private key: {reason}")]
    KeyGeneration { key_type: String, reason: String },
    #[error("after-renew command `{command}` failed ({status}): {output}")]
    Hook {
        command: String,
        status: String,
        output: String,
    },
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// The innermost failure, skipping every context layer.
    pub fn origin(&self) -> &Error {
        let mut current = self;
        while let Error::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Severity of the originating failure; context layers never change it.
    pub fn severity(&self) -> Level {
        match self.origin() {
            Error::Config(_) | Error::Storage(_) | Error::State(_) => Level::Error,
            Error::RequiredParam(_) | Error::UnknownDomain(_) => Level::Error,
            Error::KeyGeneration { .. } => Level::Error,
            Error::Provider(_) | Error::Acme(_) | Error::Hook { .. } => Level::Warn,
            Error::Context { .. } => Level::Error,
        }
    }

    /// Renders the whole cause chain innermost-first.
    pub fn report(&self) -> String {
        let mut messages = Vec::new();
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            messages.push(err.to_string());
            current = err.source();
        }
        messages.reverse();
        messages.join(" <- ")
    }
}

/// Wraps a failure with the operation and identity it happened under.
pub trait ResultExt<T> {
    fn context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|err| Error::Context {
            context: f().into(),
            source: Box::new(err.into()),
        })
    }
}
