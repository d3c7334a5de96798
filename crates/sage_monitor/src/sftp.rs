//! SFTP channel.
//!
//! Lists a remote directory, downloads new matching files into the databox
//! inbox under the work dir, and hands them out as temporary candidates.
//! The transport sits behind [`SftpConnector`] so discovery logic runs
//! without a server.

use crate::candidate::{inbox_dir, safe_file_name, CandidateFile};
use crate::config::{ChannelKind, SftpSettings};
use crate::error::{ChannelError, Result};
use crate::monitor::{DiscoveryContext, Monitor};
use std::collections::BTreeMap;
use std::fs::File;
use std::net::TcpStream;
use std::path::Path;
use tracing::{debug, info, warn};

/// One regular file in the remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub mtime: u64,
}

pub trait SftpSession {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>>;
    fn download(&mut self, remote_path: &str, local: &Path) -> Result<()>;
}

pub trait SftpConnector {
    fn connect(&self, settings: &SftpSettings) -> Result<Box<dyn SftpSession>>;
}

// ============================================================================
// ssh2 transport
// ============================================================================

pub struct Ssh2Connector;

struct Ssh2Session {
    _session: ssh2::Session,
    sftp: ssh2::Sftp,
}

impl SftpConnector for Ssh2Connector {
    fn connect(&self, settings: &SftpSettings) -> Result<Box<dyn SftpSession>> {
        let connect_err = |message: String| ChannelError::Connect {
            channel: "sftp",
            host: settings.host.clone(),
            message,
        };
        let auth_err = |e: ssh2::Error| ChannelError::Auth {
            host: settings.host.clone(),
            user: settings.username.clone(),
            message: e.to_string(),
        };

        let tcp = TcpStream::connect((settings.host.as_str(), settings.port))
            .map_err(|e| connect_err(e.to_string()))?;
        let mut session = ssh2::Session::new().map_err(|e| connect_err(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| connect_err(e.to_string()))?;

        match (&settings.private_key, &settings.password) {
            (Some(key), passphrase) => session
                .userauth_pubkey_file(&settings.username, None, key, passphrase.as_deref())
                .map_err(auth_err)?,
            (None, Some(password)) => session
                .userauth_password(&settings.username, password)
                .map_err(auth_err)?,
            (None, None) => {
                return Err(ChannelError::Config(
                    "sftp channel needs a password or private_key".into(),
                ))
            }
        }

        let sftp = session.sftp().map_err(ChannelError::protocol)?;
        Ok(Box::new(Ssh2Session {
            _session: session,
            sftp,
        }))
    }
}

impl SftpSession for Ssh2Session {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let entries = self
            .sftp
            .readdir(Path::new(dir))
            .map_err(ChannelError::protocol)?;
        Ok(entries
            .into_iter()
            .filter(|(_, stat)| stat.is_file())
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(RemoteEntry {
                    name,
                    size: stat.size.unwrap_or(0),
                    mtime: stat.mtime.unwrap_or(0),
                })
            })
            .collect())
    }

    fn download(&mut self, remote_path: &str, local: &Path) -> Result<()> {
        let mut remote = self
            .sftp
            .open(Path::new(remote_path))
            .map_err(ChannelError::protocol)?;
        let mut out = File::create(local).map_err(|e| ChannelError::io(local, e))?;
        if let Err(e) = std::io::copy(&mut remote, &mut out) {
            let _ = std::fs::remove_file(local);
            return Err(ChannelError::io(local, e));
        }
        Ok(())
    }
}

// ============================================================================
// Monitor
// ============================================================================

pub struct SftpMonitor {
    settings: SftpSettings,
    connector: Box<dyn SftpConnector>,
}

impl SftpMonitor {
    pub fn new(settings: SftpSettings) -> Self {
        Self::with_connector(settings, Box::new(Ssh2Connector))
    }

    pub fn with_connector(settings: SftpSettings, connector: Box<dyn SftpConnector>) -> Self {
        Self {
            settings,
            connector,
        }
    }

    fn remote_path(&self, name: &str) -> String {
        format!("{}/{}", self.settings.remote_dir.trim_end_matches('/'), name)
    }
}

impl Monitor for SftpMonitor {
    fn describe(&self) -> String {
        format!(
            "sftp://{}@{}:{}{}",
            self.settings.username, self.settings.host, self.settings.port, self.settings.remote_dir
        )
    }

    fn discover(&self, ctx: &DiscoveryContext<'_>) -> Result<Vec<CandidateFile>> {
        let pattern =
            glob::Pattern::new(&self.settings.pattern).map_err(|e| ChannelError::Pattern {
                pattern: self.settings.pattern.clone(),
                message: e.to_string(),
            })?;

        let mut session = self.connector.connect(&self.settings)?;
        let mut entries = session.list(&self.settings.remote_dir)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let inbox = inbox_dir(ctx.work_dir, ctx.databox_id);
        std::fs::create_dir_all(&inbox).map_err(|e| ChannelError::io(&inbox, e))?;

        let sender = self
            .settings
            .sender
            .clone()
            .unwrap_or_else(|| self.settings.username.clone());

        // Ledger lookups happen before any download so a failing lookup
        // leaves nothing behind in the inbox.
        let mut pending = Vec::new();
        for entry in entries.into_iter().filter(|e| pattern.matches(&e.name)) {
            let remote = self.remote_path(&entry.name);
            let key = format!(
                "sftp://{}{}@{}:{}",
                self.settings.host, remote, entry.mtime, entry.size
            );
            if !ctx.processed.is_processed(ctx.databox_id, &key)? {
                pending.push((entry, remote, key));
            }
        }

        let mut found = Vec::new();
        for (entry, remote, key) in pending {
            let local = inbox.join(format!("{}_{}", entry.mtime, safe_file_name(&entry.name)));
            if let Err(e) = session.download(&remote, &local) {
                warn!(remote = %remote, error = %e, "download failed, will retry next cycle");
                continue;
            }
            info!(remote = %remote, local = %local.display(), "downloaded");

            let mut metadata = BTreeMap::new();
            metadata.insert("host".to_string(), self.settings.host.clone());
            metadata.insert("remote_path".to_string(), remote);

            found.push(CandidateFile {
                path: local,
                name: entry.name,
                sender: sender.clone(),
                channel: ChannelKind::Sftp,
                processing_key: key,
                metadata,
                temporary: true,
            });
        }

        debug!(count = found.len(), "sftp scan complete");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processed::{MemoryProcessedFiles, ProcessedFiles};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct FakeServer {
        files: Arc<Mutex<Vec<(RemoteEntry, Vec<u8>)>>>,
        downloads: Arc<Mutex<Vec<String>>>,
    }

    impl FakeServer {
        fn put(&self, name: &str, mtime: u64, body: &[u8]) {
            self.files.lock().unwrap().push((
                RemoteEntry {
                    name: name.into(),
                    size: body.len() as u64,
                    mtime,
                },
                body.to_vec(),
            ));
        }
    }

    impl SftpConnector for FakeServer {
        fn connect(&self, _settings: &SftpSettings) -> Result<Box<dyn SftpSession>> {
            Ok(Box::new(self.clone()))
        }
    }

    impl SftpSession for FakeServer {
        fn list(&mut self, _dir: &str) -> Result<Vec<RemoteEntry>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .iter()
                .map(|(e, _)| e.clone())
                .collect())
        }

        fn download(&mut self, remote_path: &str, local: &Path) -> Result<()> {
            self.downloads.lock().unwrap().push(remote_path.to_string());
            let files = self.files.lock().unwrap();
            let name = remote_path.rsplit('/').next().unwrap_or_default();
            let (_, body) = files.iter().find(|(e, _)| e.name == name).unwrap();
            std::fs::write(local, body).map_err(|e| ChannelError::io(local, e))
        }
    }

    fn settings() -> SftpSettings {
        SftpSettings {
            host: "sftp.example.cl".into(),
            port: 22,
            username: "bodega".into(),
            password: Some("secret".into()),
            private_key: None,
            remote_dir: "/salida/".into(),
            pattern: "*.csv".into(),
            sender: None,
        }
    }

    #[test]
    fn test_downloads_new_matching_files() {
        let work = TempDir::new().unwrap();
        let server = FakeServer::default();
        server.put("ventas.csv", 100, b"a,b\n");
        server.put("leeme.txt", 100, b"hola");

        let ledger = MemoryProcessedFiles::new();
        let ctx = DiscoveryContext {
            databox_id: 9,
            work_dir: work.path(),
            processed: &ledger,
        };
        let mon = SftpMonitor::with_connector(settings(), Box::new(server.clone()));

        let found = mon.discover(&ctx).unwrap();
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.name, "ventas.csv");
        assert_eq!(c.sender, "bodega");
        assert!(c.temporary);
        assert_eq!(std::fs::read(&c.path).unwrap(), b"a,b\n");
        assert_eq!(c.metadata["remote_path"], "/salida/ventas.csv");

        ledger.mark_processed(9, &c.processing_key).unwrap();
        assert!(mon.discover(&ctx).unwrap().is_empty());
        assert_eq!(server.downloads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_reupload_with_new_mtime_is_new_delivery() {
        let work = TempDir::new().unwrap();
        let server = FakeServer::default();
        server.put("ventas.csv", 100, b"v1\n");
        let ledger = MemoryProcessedFiles::new();
        let ctx = DiscoveryContext {
            databox_id: 1,
            work_dir: work.path(),
            processed: &ledger,
        };
        let mon = SftpMonitor::with_connector(settings(), Box::new(server.clone()));
        for c in mon.discover(&ctx).unwrap() {
            ledger.mark_processed(1, &c.processing_key).unwrap();
        }

        server.files.lock().unwrap()[0].0.mtime = 200;
        assert_eq!(mon.discover(&ctx).unwrap().len(), 1);
    }

    /// Ledger that answers "not processed" once, then fails.
    struct FlakyLedger {
        calls: Mutex<usize>,
    }

    impl ProcessedFiles for FlakyLedger {
        fn is_processed(&self, _databox_id: i64, _key: &str) -> Result<bool> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls > 1 {
                return Err(ChannelError::Ledger("database is locked".into()));
            }
            Ok(false)
        }

        fn mark_processed(&self, _databox_id: i64, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ledger_failure_leaves_inbox_empty() {
        let work = TempDir::new().unwrap();
        let server = FakeServer::default();
        server.put("a.csv", 1, b"a\n");
        server.put("b.csv", 1, b"b\n");
        let ledger = FlakyLedger {
            calls: Mutex::new(0),
        };
        let ctx = DiscoveryContext {
            databox_id: 3,
            work_dir: work.path(),
            processed: &ledger,
        };
        let mon = SftpMonitor::with_connector(settings(), Box::new(server.clone()));

        assert!(mon.discover(&ctx).is_err());
        assert!(server.downloads.lock().unwrap().is_empty());
        let inbox = inbox_dir(work.path(), 3);
        let left: Vec<_> = std::fs::read_dir(&inbox).unwrap().collect();
        assert!(left.is_empty());
    }

    struct Refused;

    impl SftpConnector for Refused {
        fn connect(&self, settings: &SftpSettings) -> Result<Box<dyn SftpSession>> {
            Err(ChannelError::Connect {
                channel: "sftp",
                host: settings.host.clone(),
                message: "connection refused".into(),
            })
        }
    }

    #[test]
    fn test_unreachable_server_yields_nothing() {
        let work = TempDir::new().unwrap();
        let ledger = MemoryProcessedFiles::new();
        let ctx = DiscoveryContext {
            databox_id: 1,
            work_dir: work.path(),
            processed: &ledger,
        };
        let mon = SftpMonitor::with_connector(settings(), Box::new(Refused));
        assert!(mon.check_new_files(&ctx).is_empty());
    }
}
