//! Blocking facade over [`SageStore`] for the single-threaded daemon.

use crate::error::Result;
use crate::types::{Databox, ExecutionRecord, NewDatabox};
use crate::{Registry, SageStore};
use sage_monitor::{ChannelError, ProcessedFiles};
use std::path::Path;
use tokio::runtime::{Builder, Runtime};

pub struct BlockingStore {
    runtime: Runtime,
    store: SageStore,
}

impl BlockingStore {
    pub fn connect(url: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let store = runtime.block_on(SageStore::connect(url))?;
        Ok(Self { runtime, store })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let store = runtime.block_on(SageStore::open(path))?;
        Ok(Self { runtime, store })
    }

    pub fn create_databox(&self, databox: &NewDatabox) -> Result<i64> {
        self.runtime.block_on(self.store.create_databox(databox))
    }

    pub fn set_databox_active(&self, id: i64, active: bool) -> Result<()> {
        self.runtime
            .block_on(self.store.set_databox_active(id, active))
    }

    pub fn authorize_sender(&self, databox_id: i64, sender: &str) -> Result<()> {
        self.runtime
            .block_on(self.store.authorize_sender(databox_id, sender))
    }

    pub fn list_executions(&self, databox_id: i64) -> Result<Vec<ExecutionRecord>> {
        self.runtime.block_on(self.store.list_executions(databox_id))
    }

    /// Close the pool. Dropping without calling this leaves connections to
    /// be torn down with the runtime.
    pub fn close(self) {
        let Self { runtime, store } = self;
        runtime.block_on(store.close());
    }
}

impl Registry for BlockingStore {
    fn list_active_endpoints(&self) -> Result<Vec<Databox>> {
        self.runtime.block_on(self.store.list_active_databoxes())
    }

    fn is_sender_authorized(&self, sender: &str, databox_id: i64) -> Result<bool> {
        self.runtime
            .block_on(self.store.is_sender_authorized(sender, databox_id))
    }

    fn record_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.runtime
            .block_on(self.store.record_execution(record))
            .map(|_| ())
    }
}

impl ProcessedFiles for BlockingStore {
    fn is_processed(&self, databox_id: i64, key: &str) -> sage_monitor::Result<bool> {
        self.runtime
            .block_on(self.store.is_processed(databox_id, key))
            .map_err(|e| ChannelError::Ledger(e.to_string()))
    }

    fn mark_processed(&self, databox_id: i64, key: &str) -> sage_monitor::Result<()> {
        self.runtime
            .block_on(self.store.mark_processed(databox_id, key))
            .map_err(|e| ChannelError::Ledger(e.to_string()))
    }
}
