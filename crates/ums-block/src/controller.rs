//! USB mass-storage controller aggregate.
//!
//! One [`Ums`] exists per physical device. It owns the shared queue context and embeds one
//! [`UmsBlock`] per LUN; the block devices never own the controller state, they reach it through
//! their [`UmsBlockRef`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::worker::{self, TransferExecutor};
use crate::{
    DeviceHandle, DeviceHost, LunConfig, Result, UmsBlock, UmsBlockRef, UmsConfig, UmsError,
    UmsShared,
};

pub struct Ums {
    config: UmsConfig,
    shared: Arc<UmsShared>,
    blocks: Vec<UmsBlock>,
    host: Arc<dyn DeviceHost>,
    parent: DeviceHandle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Ums {
    /// Bulk-only transport allows at most 16 LUNs (GET MAX LUN returns 0..=15).
    pub const MAX_LUNS: usize = 16;

    /// Build a controller whose device is `parent`, with one block device per entry of `luns`.
    pub fn new(
        config: UmsConfig,
        host: Arc<dyn DeviceHost>,
        parent: DeviceHandle,
        luns: &[LunConfig],
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if luns.is_empty() || luns.len() > Self::MAX_LUNS {
            return Err(UmsError::InvalidConfig("LUN count must be between 1 and 16"));
        }
        for lun in luns {
            lun.validate()?;
        }

        let blocks = luns
            .iter()
            .enumerate()
            .map(|(lun, cfg)| UmsBlock::new(lun as u8, *cfg))
            .collect();
        Ok(Arc::new(Self {
            shared: Arc::new(UmsShared::new(&config)),
            config,
            blocks,
            host,
            parent,
            worker: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &UmsConfig {
        &self.config
    }

    pub fn shared(&self) -> &UmsShared {
        &self.shared
    }

    pub fn blocks(&self) -> &[UmsBlock] {
        &self.blocks
    }

    pub fn parent(&self) -> DeviceHandle {
        self.parent
    }

    pub(crate) fn host(&self) -> &Arc<dyn DeviceHost> {
        &self.host
    }

    /// Framework-facing context for LUN `index`.
    pub fn lun(self: &Arc<Self>, index: usize) -> Option<UmsBlockRef> {
        (index < self.blocks.len()).then(|| UmsBlockRef::new(Arc::clone(self), index))
    }

    /// Register the block device of LUN `index` with the host framework.
    pub fn add_block_device(self: &Arc<Self>, index: usize) -> Result<DeviceHandle> {
        self.lun(index).ok_or(UmsError::InvalidArgs)?.add()
    }

    /// Register every LUN in order, stopping at the first failure. LUNs published before the
    /// failure stay published; the framework releases them with the parent.
    pub fn add_block_devices(self: &Arc<Self>) -> Result<Vec<DeviceHandle>> {
        (0..self.blocks.len())
            .map(|index| self.add_block_device(index))
            .collect()
    }

    /// Spawn the worker that drains the queue through `executor`.
    pub fn start(&self, executor: impl TransferExecutor) -> Result<()> {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(UmsError::AlreadyStarted);
        }
        if self.shared.is_dead() {
            return Err(UmsError::PeerClosed);
        }
        let handle = worker::spawn(
            self.config.worker_name.clone(),
            Arc::clone(&self.shared),
            executor,
        )
        .map_err(|err| UmsError::Io(err.to_string()))?;
        *slot = Some(handle);
        debug!(name = %self.config.worker_name, "worker spawned");
        Ok(())
    }

    /// Stop the worker and fail everything still queued with [`UmsError::PeerClosed`].
    ///
    /// The transaction in flight (if any) finishes normally first. Idempotent. Called from a
    /// completion handler on the worker thread, the worker is detached instead of joined; it exits
    /// once that handler returns.
    pub fn shutdown(&self) {
        self.shared.mark_dead();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                debug!("shutdown on the worker thread; detaching");
            } else if worker.join().is_err() {
                warn!("worker panicked");
            }
        }

        let mut failed = 0usize;
        while let Some(txn) = self.shared.take_next() {
            self.shared.complete(txn, Err(UmsError::PeerClosed), 0);
            failed += 1;
        }
        if failed > 0 {
            debug!(count = failed, "failed queued transactions at shutdown");
        }
    }
}

impl Drop for Ums {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Ums {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ums")
            .field("config", &self.config)
            .field("shared", &self.shared)
            .field("blocks", &self.blocks)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}
