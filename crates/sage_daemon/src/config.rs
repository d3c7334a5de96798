//! Daemon configuration: command-line flags plus environment.
//!
//! The environment is read through an injected lookup so nothing below
//! `main` touches process-wide state.

use clap::Parser;
use sage_logging::LogLevel;
use sage_validator::MAX_ERRORS_PER_RULE;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sage-daemon",
    about = "Poll SAGE databoxes, validate deliveries and record executions"
)]
pub struct DaemonArgs {
    /// Seconds between polling cycles
    #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// DEBUG, INFO, WARNING or ERROR
    #[arg(long, default_value = "INFO")]
    pub log_level: LogLevel,

    /// Also write logs to this file (rotated)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Only process the databox with this id
    #[arg(long, conflicts_with = "casilla_nombre")]
    pub casilla_id: Option<i64>,

    /// Only process the databox with this name
    #[arg(long)]
    pub casilla_nombre: Option<String>,

    /// Directory for downloaded attachments and remote files
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Individual violations kept per rule before suppressing
    #[arg(long, default_value_t = MAX_ERRORS_PER_RULE)]
    pub max_errors_per_rule: usize,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingEnv(&'static str),

    #[error("{name} has an invalid value: '{value}'")]
    InvalidEnv { name: &'static str, value: String },
}

/// Restricts a run to one databox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSelector {
    Id(i64),
    Name(String),
}

impl EndpointSelector {
    pub fn matches(&self, id: i64, name: &str) -> bool {
        match self {
            EndpointSelector::Id(want) => *want == id,
            EndpointSelector::Name(want) => want.eq_ignore_ascii_case(name.trim()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub database_url: String,
    pub work_dir: PathBuf,
    pub interval: Duration,
    pub once: bool,
    pub selector: Option<EndpointSelector>,
    pub max_errors_per_rule: usize,
    pub smtp: Option<SmtpSettings>,
}

impl DaemonConfig {
    pub fn from_args(
        args: &DaemonArgs,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let database_url = non_empty("SAGE_DATABASE_URL")
            .or_else(|| non_empty("DATABASE_URL"))
            .ok_or(ConfigError::MissingEnv("SAGE_DATABASE_URL"))?;

        let work_dir = args
            .work_dir
            .clone()
            .or_else(|| non_empty("SAGE_WORK_DIR").map(PathBuf::from))
            .unwrap_or_else(|| std::env::temp_dir().join("sage"));

        let selector = match (&args.casilla_id, &args.casilla_nombre) {
            (Some(id), _) => Some(EndpointSelector::Id(*id)),
            (None, Some(name)) => Some(EndpointSelector::Name(name.clone())),
            (None, None) => None,
        };

        let smtp = match non_empty("SAGE_SMTP_HOST") {
            None => None,
            Some(host) => {
                let port = match non_empty("SAGE_SMTP_PORT") {
                    None => DEFAULT_SMTP_PORT,
                    Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                        name: "SAGE_SMTP_PORT",
                        value: value.clone(),
                    })?,
                };
                let username = non_empty("SAGE_SMTP_USER");
                let from = non_empty("SAGE_SMTP_FROM")
                    .or_else(|| username.clone())
                    .ok_or(ConfigError::MissingEnv("SAGE_SMTP_FROM"))?;
                Some(SmtpSettings {
                    host,
                    port,
                    username,
                    password: non_empty("SAGE_SMTP_PASSWORD"),
                    from,
                })
            }
        };

        Ok(Self {
            database_url,
            work_dir,
            interval: Duration::from_secs(args.interval.max(1)),
            once: args.once,
            selector,
            max_errors_per_rule: args.max_errors_per_rule,
            smtp,
        })
    }
}
