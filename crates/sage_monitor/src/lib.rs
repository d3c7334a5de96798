//! Delivery channels for SAGE databoxes.
//!
//! A [`Monitor`] polls one channel and returns [`CandidateFile`]s that have
//! not been processed yet. Remote channels download into a per-databox inbox
//! under the work dir and mark their candidates temporary.

pub mod candidate;
pub mod config;
pub mod email;
pub mod error;
pub mod filesystem;
pub mod monitor;
pub mod processed;
pub mod sftp;

pub use candidate::CandidateFile;
pub use config::{ChannelConfig, ChannelKind, EmailSettings, FilesystemSettings, SftpSettings};
pub use email::{extract_sender, EmailMonitor, ImapConnector, MailConnector, MailSession};
pub use error::{ChannelError, Result};
pub use filesystem::FilesystemMonitor;
pub use monitor::{DiscoveryContext, Monitor};
pub use processed::{MemoryProcessedFiles, ProcessedFiles};
pub use sftp::{RemoteEntry, SftpConnector, SftpMonitor, SftpSession, Ssh2Connector};

/// Monitor for a channel configuration, using the real transports.
pub fn build_monitor(config: &ChannelConfig) -> Box<dyn Monitor> {
    match config {
        ChannelConfig::Email(settings) => Box::new(EmailMonitor::new(settings.clone())),
        ChannelConfig::Sftp(settings) => Box::new(SftpMonitor::new(settings.clone())),
        ChannelConfig::Filesystem(settings) => Box::new(FilesystemMonitor::new(settings.clone())),
    }
}
