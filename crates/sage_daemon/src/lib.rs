//! SAGE ingestion daemon.
//!
//! Polls every active databox channel, authorizes each delivery's sender,
//! validates authorized files against the databox package and records one
//! execution per processed file.

pub mod config;
pub mod daemon;
pub mod notify;

pub use config::{ConfigError, DaemonArgs, DaemonConfig, EndpointSelector, SmtpSettings};
pub use daemon::{
    Authorization, CycleSummary, Daemon, DaemonOptions, FileValidator, MonitorFactory,
};
pub use notify::{create_notifier, LogNotifier, Notifier, SmtpNotifier};
