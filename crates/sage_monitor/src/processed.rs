//! Ledger of deliveries already handled, keyed by databox and processing key.

use crate::error::Result;
use std::collections::HashSet;
use std::sync::Mutex;

pub trait ProcessedFiles {
    fn is_processed(&self, databox_id: i64, key: &str) -> Result<bool>;
    fn mark_processed(&self, databox_id: i64, key: &str) -> Result<()>;
}

/// In-memory ledger. Forgets everything on restart.
#[derive(Debug, Default)]
pub struct MemoryProcessedFiles {
    seen: Mutex<HashSet<(i64, String)>>,
}

impl MemoryProcessedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProcessedFiles for MemoryProcessedFiles {
    fn is_processed(&self, databox_id: i64, key: &str) -> Result<bool> {
        let seen = self
            .seen
            .lock()
            .map_err(|_| crate::ChannelError::Ledger("lock poisoned".into()))?;
        Ok(seen.contains(&(databox_id, key.to_string())))
    }

    fn mark_processed(&self, databox_id: i64, key: &str) -> Result<()> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| crate::ChannelError::Ledger("lock poisoned".into()))?;
        seen.insert((databox_id, key.to_string()));
        Ok(())
    }
}
