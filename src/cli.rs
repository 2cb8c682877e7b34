//! Command surface: `reg`, `run` and `renew`.
//!
//! Every failure site maps to its own process exit code so wrapper scripts
//! can tell them apart.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::{debug, error, info, log};

use crate::{
    config::{DEFAULT_CONFIG_PATH, ResolvedConfig},
    error::{ConfigError, Error},
    issuance::{
        acme::{AcmeClient, ClientSettings, LegoClient},
        challenge::ChallengeRegistry,
        flow::Lifecycle,
    },
    logging::{self, LoggingError},
    storage::account::Account,
};

pub mod exit {
    pub const CONFIG: i32 = 101;
    pub const LOGGER: i32 = 102;

    pub const REG_CREATE_ACCOUNT: i32 = 201;
    pub const REG_INIT_CLIENT: i32 = 202;
    pub const REG_REGISTER: i32 = 203;
    pub const REG_SAVE_ACCOUNT: i32 = 204;

    pub const RUN_LOAD_ACCOUNT: i32 = 301;
    pub const RUN_INIT_CLIENT: i32 = 302;
    pub const RUN_REQUIRED_PARAM: i32 = 303;
    pub const RUN_OBTAIN: i32 = 304;

    pub const RENEW_LOAD_ACCOUNT: i32 = 401;
    pub const RENEW_INIT_CLIENT: i32 = 402;
    pub const RENEW_UNKNOWN_DOMAIN: i32 = 403;
    pub const RENEW_FAILED: i32 = 404;
    pub const RENEW_HOOK: i32 = 405;
}

/// Issue and renew ACME certificates for the configured domain groups.
#[derive(Debug, Parser)]
#[command(name = "acme-lego", version, about)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "LEGO_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create and register the ACME account
    Reg {
        /// Account email; overrides `email` from the configuration
        #[arg(long)]
        mail: Option<String>,
    },
    /// Obtain certificates for one domain or every configured domain
    Run {
        #[arg(short, long)]
        domain: Option<String>,
        /// Webroot for a domain that is not configured
        #[arg(long)]
        http_path: Option<PathBuf>,
    },
    /// Renew certificates that are close to expiry
    Renew {
        #[arg(short, long)]
        domain: Option<String>,
    },
}

/// A command failure and the exit code of the site it happened at.
#[derive(Debug)]
pub struct Failure {
    pub code: i32,
    pub error: Error,
}

trait ExitSite<T> {
    fn exit(self, code: i32) -> Result<T, Failure>;
}

impl<T, E: Into<Error>> ExitSite<T> for Result<T, E> {
    fn exit(self, code: i32) -> Result<T, Failure> {
        self.map_err(|err| Failure {
            code,
            error: err.into(),
        })
    }
}

/// Runs one command and returns the process exit code.
pub fn execute(cli: Cli) -> i32 {
    let config = match ResolvedConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            logging::init_default();
            report(&Failure {
                code: exit::CONFIG,
                error: err.into(),
            });
            return exit::CONFIG;
        }
    };
    match logging::init(&config.global) {
        Ok(()) => {}
        Err(LoggingError::AlreadyInitialized(_)) => debug!("[cli] logger already installed"),
        Err(err) => {
            logging::init_default();
            error!("[cli] {err}");
            return exit::LOGGER;
        }
    }
    info!(
        "[cli] acme-lego {} using {}",
        env!("CARGO_PKG_VERSION"),
        cli.config.display()
    );

    let registry = ChallengeRegistry::builtin();
    let result = match &cli.command {
        Command::Reg { mail } => reg(&config, mail.as_deref()),
        Command::Run { domain, http_path } => {
            run(&config, &registry, domain.as_deref(), http_path.as_deref())
        }
        Command::Renew { domain } => renew(&config, &registry, domain.as_deref()),
    };
    match result {
        Ok(()) => 0,
        Err(failure) => {
            report(&failure);
            failure.code
        }
    }
}

fn report(failure: &Failure) {
    log!(
        failure.error.severity(),
        "[cli] exit {}: {}",
        failure.code,
        failure.error.report()
    );
}

fn client(config: &ResolvedConfig, account: &Account, code: i32) -> Result<LegoClient, Failure> {
    LegoClient::new(account, ClientSettings::from(&config.global)).exit(code)
}

pub fn reg(config: &ResolvedConfig, mail: Option<&str>) -> Result<(), Failure> {
    let email = mail
        .map(str::trim)
        .filter(|mail| !mail.is_empty())
        .unwrap_or(config.global.account_email.as_str());
    let mut account =
        Account::create(email, &config.global.root_storage_dir).exit(exit::REG_CREATE_ACCOUNT)?;
    let mut client = client(config, &account, exit::REG_INIT_CLIENT)?;
    let registration = client.register().exit(exit::REG_REGISTER)?;
    account.set_registration(registration);
    account.save().exit(exit::REG_SAVE_ACCOUNT)?;
    info!("[cli] registered account {}", account.email());
    Ok(())
}

pub fn run(
    config: &ResolvedConfig,
    registry: &ChallengeRegistry,
    domain: Option<&str>,
    http_path: Option<&Path>,
) -> Result<(), Failure> {
    let account = Account::load(&config.global.root_storage_dir).exit(exit::RUN_LOAD_ACCOUNT)?;
    let mut client = client(config, &account, exit::RUN_INIT_CLIENT)?;
    Lifecycle::new(config, registry, &mut client)
        .obtain(domain, http_path)
        .map_err(|error| Failure {
            code: obtain_exit_code(&error),
            error,
        })?;
    Ok(())
}

pub fn renew(
    config: &ResolvedConfig,
    registry: &ChallengeRegistry,
    domain: Option<&str>,
) -> Result<(), Failure> {
    let account =
        Account::load(&config.global.root_storage_dir).exit(exit::RENEW_LOAD_ACCOUNT)?;
    let mut client = client(config, &account, exit::RENEW_INIT_CLIENT)?;
    renew_with(config, registry, &mut client, domain)
}

/// Renew against an already constructed client.
pub fn renew_with(
    config: &ResolvedConfig,
    registry: &ChallengeRegistry,
    client: &mut dyn AcmeClient,
    domain: Option<&str>,
) -> Result<(), Failure> {
    let report = Lifecycle::new(config, registry, client)
        .renew(domain)
        .map_err(|error| Failure {
            code: renew_exit_code(&error),
            error,
        })?;
    for skipped in &report.skipped {
        info!(
            "[cli] {} ({}) not due until {}",
            skipped.domain, skipped.key_type, skipped.not_after
        );
    }
    info!(
        "[cli] renew finished: {} renewed, {} skipped",
        report.renewed.len(),
        report.skipped.len()
    );
    Ok(())
}

pub fn obtain_exit_code(error: &Error) -> i32 {
    match error.origin() {
        Error::RequiredParam(_) => exit::RUN_REQUIRED_PARAM,
        _ => exit::RUN_OBTAIN,
    }
}

pub fn renew_exit_code(error: &Error) -> i32 {
    match error.origin() {
        Error::UnknownDomain(_) | Error::Config(ConfigError::InvalidName { .. }) => {
            exit::RENEW_UNKNOWN_DOMAIN
        }
        Error::Hook { .. } => exit::RENEW_HOOK,
        _ => exit::RENEW_FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AcmeError, ResultExt};
    use std::fs;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("acme-lego-cli-{}", uuid::Uuid::new_v4()))
    }

    fn write_config(body: &str) -> PathBuf {
        let dir = temp_dir();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, body).unwrap();
        path
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn parses_command_surface() {
        let cli = parse(&["acme-lego", "-c", "/tmp/lego.toml", "run", "-d", "a.example", "--http-path", "/srv/www"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/lego.toml"));
        match cli.command {
            Command::Run { domain, http_path } => {
                assert_eq!(domain.as_deref(), Some("a.example"));
                assert_eq!(http_path, Some(PathBuf::from("/srv/www")));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = parse(&["acme-lego", "renew", "--config", "/tmp/x.toml", "--domain", "b.example"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/x.toml"));
        assert!(matches!(cli.command, Command::Renew { domain: Some(d) } if d == "b.example"));

        let cli = parse(&["acme-lego", "reg", "--mail", "ops@example.com"]);
        assert!(matches!(cli.command, Command::Reg { mail: Some(m) } if m == "ops@example.com"));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["acme-lego"]).is_err());
    }

    #[test]
    fn missing_config_exits_101() {
        let path = temp_dir().join("absent.toml");
        let cli = parse(&["acme-lego", "-c", path.to_str().unwrap(), "renew"]);
        assert_eq!(execute(cli), exit::CONFIG);
    }

    #[test]
    fn bad_log_level_exits_102() {
        let path = write_config("log-level = \"loud\"\n");
        let cli = parse(&["acme-lego", "-c", path.to_str().unwrap(), "renew"]);
        assert_eq!(execute(cli), exit::LOGGER);
    }

    #[test]
    fn reg_without_mail_exits_201() {
        let path = write_config("");
        let cli = parse(&["acme-lego", "-c", path.to_str().unwrap(), "reg"]);
        assert_eq!(execute(cli), exit::REG_CREATE_ACCOUNT);
    }

    #[test]
    fn run_and_renew_need_an_account() {
        let path = write_config("");
        let cli = parse(&["acme-lego", "-c", path.to_str().unwrap(), "run"]);
        assert_eq!(execute(cli), exit::RUN_LOAD_ACCOUNT);
        let cli = parse(&["acme-lego", "-c", path.to_str().unwrap(), "renew"]);
        assert_eq!(execute(cli), exit::RENEW_LOAD_ACCOUNT);
    }

    #[test]
    fn exit_codes_follow_the_origin() {
        let wrapped = |err: Error| -> Error {
            let result: Result<(), Error> = Err(err);
            result.context(|| "renew a.example (rsa-2048)").unwrap_err()
        };

        assert_eq!(obtain_exit_code(&Error::RequiredParam("http-path")), exit::RUN_REQUIRED_PARAM);
        assert_eq!(
            obtain_exit_code(&wrapped(AcmeError::Order("rejected".into()).into())),
            exit::RUN_OBTAIN
        );
        assert_eq!(
            renew_exit_code(&Error::UnknownDomain("x".into())),
            exit::RENEW_UNKNOWN_DOMAIN
        );
        assert_eq!(
            renew_exit_code(&ConfigError::InvalidName {
                domain: "bad/example".into(),
                reason: "invalid domain name".into(),
            }
            .into()),
            exit::RENEW_UNKNOWN_DOMAIN
        );
        assert_eq!(
            renew_exit_code(&Error::Hook {
                command: "false".into(),
                status: "exit status: 1".into(),
                output: String::new(),
            }),
            exit::RENEW_HOOK
        );
        assert_eq!(
            renew_exit_code(&wrapped(AcmeError::Finalize("bad csr".into()).into())),
            exit::RENEW_FAILED
        );
    }
}
