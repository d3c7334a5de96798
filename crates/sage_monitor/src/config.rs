//! Per-databox channel configuration.
//!
//! Stored as JSON alongside each databox and selected by its `type` tag:
//!
//! ```json
//! {"type": "email", "host": "imap.example.cl", "username": "in", "password": "..."}
//! {"type": "sftp", "host": "sftp.example.cl", "username": "u", "remote_dir": "/in"}
//! {"type": "filesystem", "path": "/srv/sage/inbox", "pattern": "*.csv"}
//! ```

use crate::error::{ChannelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sftp,
    Filesystem,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sftp => "sftp",
            ChannelKind::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSettings {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SftpSettings {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    pub remote_dir: String,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Identity checked against authorized senders; defaults to `username`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemSettings {
    pub path: PathBuf,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Identity checked against authorized senders; defaults to `filesystem:<path>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// Channel of one databox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Email(EmailSettings),
    Sftp(SftpSettings),
    Filesystem(FilesystemSettings),
}

impl ChannelConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ChannelError::Config(e.to_string()))
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelConfig::Email(_) => ChannelKind::Email,
            ChannelConfig::Sftp(_) => ChannelKind::Sftp,
            ChannelConfig::Filesystem(_) => ChannelKind::Filesystem,
        }
    }
}

fn default_imap_port() -> u16 {
    993
}

fn default_ssh_port() -> u16 {
    22
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_defaults() {
        let cfg = ChannelConfig::from_json(
            r#"{"type":"email","host":"imap.x.cl","username":"u","password":"p"}"#,
        )
        .unwrap();
        match cfg {
            ChannelConfig::Email(e) => {
                assert_eq!(e.port, 993);
                assert_eq!(e.mailbox, "INBOX");
                assert!(e.use_tls);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_kind_from_tag() {
        let fs = ChannelConfig::from_json(r#"{"type":"filesystem","path":"/in"}"#).unwrap();
        assert_eq!(fs.kind(), ChannelKind::Filesystem);
        let sftp = ChannelConfig::from_json(
            r#"{"type":"sftp","host":"h","username":"u","remote_dir":"/out","pattern":"*.zip"}"#,
        )
        .unwrap();
        assert_eq!(sftp.kind().as_str(), "sftp");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = ChannelConfig::from_json(r#"{"type":"ftp","host":"h"}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }
}
