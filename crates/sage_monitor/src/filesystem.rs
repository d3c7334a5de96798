//! Local directory channel.

use crate::candidate::CandidateFile;
use crate::config::{ChannelKind, FilesystemSettings};
use crate::error::{ChannelError, Result};
use crate::monitor::{DiscoveryContext, Monitor};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::debug;

pub struct FilesystemMonitor {
    settings: FilesystemSettings,
}

impl FilesystemMonitor {
    pub fn new(settings: FilesystemSettings) -> Self {
        Self { settings }
    }

    fn sender(&self) -> String {
        self.settings
            .sender
            .clone()
            .unwrap_or_else(|| format!("filesystem:{}", self.settings.path.display()))
    }
}

impl Monitor for FilesystemMonitor {
    fn describe(&self) -> String {
        format!("filesystem:{}", self.settings.path.display())
    }

    fn discover(&self, ctx: &DiscoveryContext<'_>) -> Result<Vec<CandidateFile>> {
        let dir = &self.settings.path;
        if !dir.is_dir() {
            return Err(ChannelError::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "directory not found"),
            ));
        }

        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            self.settings.pattern
        );
        let paths = glob::glob(&pattern).map_err(|e| ChannelError::Pattern {
            pattern: self.settings.pattern.clone(),
            message: e.to_string(),
        })?;

        let sender = self.sender();
        let mut found = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }

            let key = processing_key(&path)?;
            if ctx.processed.is_processed(ctx.databox_id, &key)? {
                continue;
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut metadata = BTreeMap::new();
            metadata.insert("directory".to_string(), dir.display().to_string());

            found.push(CandidateFile {
                path,
                name,
                sender: sender.clone(),
                channel: ChannelKind::Filesystem,
                processing_key: key,
                metadata,
                temporary: false,
            });
        }

        debug!(dir = %dir.display(), count = found.len(), "filesystem scan complete");
        Ok(found)
    }
}

/// Path plus modification time, so a replaced file is picked up again.
fn processing_key(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path).map_err(|e| ChannelError::io(path, e))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(format!("{}@{}", path.display(), mtime))
}
