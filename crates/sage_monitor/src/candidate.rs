use crate::config::ChannelKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A file discovered by a monitor, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFile {
    /// Local readable copy.
    pub path: PathBuf,
    /// Name as delivered (attachment or remote file name).
    pub name: String,
    /// Identity claimed by the channel, checked against authorized senders.
    pub sender: String,
    pub channel: ChannelKind,
    /// Stable identity of the delivery, used for the processed-file ledger.
    pub processing_key: String,
    /// Channel specifics such as message subject or remote path.
    pub metadata: BTreeMap<String, String>,
    /// Downloaded copy owned by the pipeline; removed by [`CandidateFile::cleanup`].
    pub temporary: bool,
}

impl CandidateFile {
    /// Delete the local copy if the monitor downloaded it.
    pub fn cleanup(&self) {
        if !self.temporary {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %self.path.display(), error = %e, "failed to remove downloaded file");
            }
        }
    }
}

/// Keep only the last path component and replace characters that are unsafe
/// in local file names.
pub(crate) fn safe_file_name(name: &str) -> String {
    let base = Path::new(name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "attachment".to_string()
    } else {
        cleaned
    }
}

/// Download directory for one databox under the work dir.
pub(crate) fn inbox_dir(work_dir: &Path, databox_id: i64) -> PathBuf {
    work_dir.join(format!("databox_{}", databox_id))
}
