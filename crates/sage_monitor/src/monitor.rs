use crate::candidate::CandidateFile;
use crate::error::Result;
use crate::processed::ProcessedFiles;
use std::path::Path;
use tracing::warn;

/// What a monitor needs from the daemon for one discovery pass.
pub struct DiscoveryContext<'a> {
    pub databox_id: i64,
    /// Root for downloaded copies.
    pub work_dir: &'a Path,
    pub processed: &'a dyn ProcessedFiles,
}

/// A channel that can be polled for new deliveries.
pub trait Monitor {
    /// Channel label for logs.
    fn describe(&self) -> String;

    /// List new, not yet processed deliveries, downloading them when remote.
    fn discover(&self, ctx: &DiscoveryContext<'_>) -> Result<Vec<CandidateFile>>;

    /// [`Monitor::discover`], with channel failures logged and swallowed.
    fn check_new_files(&self, ctx: &DiscoveryContext<'_>) -> Vec<CandidateFile> {
        match self.discover(ctx) {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    databox_id = ctx.databox_id,
                    channel = %self.describe(),
                    error = %e,
                    "channel check failed"
                );
                Vec::new()
            }
        }
    }
}
