//! Per-LUN block device: geometry, the control surface and framework registration.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::ioctl::{IOCTL_BLOCK_GET_INFO, IOCTL_DEVICE_SYNC};
use crate::{
    BlockCallbacks, DeviceHandle, DeviceOps, LunConfig, ProtocolId, Result, Transaction, Ums,
    UmsError, UmsShared,
};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u32 {
        const READ_ONLY = 1 << 0;
        const REMOVABLE = 1 << 1;
    }
}

/// Reply of `IOCTL_BLOCK_GET_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockInfo {
    pub block_count: u64,
    pub block_size: u32,
    pub flags: BlockFlags,
    pub reserved: [u32; 2],
}

impl BlockInfo {
    /// Size of the little-endian wire layout.
    pub const SIZE: usize = 24;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.block_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[16..20].copy_from_slice(&self.reserved[0].to_le_bytes());
        out[20..24].copy_from_slice(&self.reserved[1].to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        let u32_at = |at: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(word)
        };
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[0..8]);
        Some(Self {
            block_count: u64::from_le_bytes(count),
            block_size: u32_at(8),
            flags: BlockFlags::from_bits_retain(u32_at(12)),
            reserved: [u32_at(16), u32_at(20)],
        })
    }
}

/// Installed completion sink of one LUN, shared with in-flight async completions.
pub(crate) type CallbackSlot = Arc<RwLock<Option<Arc<dyn BlockCallbacks>>>>;

/// State of one logical unit.
///
/// Lives inside the [`Ums`] controller aggregate; the framework only ever sees it through a
/// [`UmsBlockRef`].
pub struct UmsBlock {
    lun: u8,
    block_size: u32,
    total_blocks: u64,
    flags: BlockFlags,
    cb: CallbackSlot,
    handle: Mutex<Option<DeviceHandle>>,
}

impl UmsBlock {
    pub(crate) fn new(lun: u8, config: LunConfig) -> Self {
        Self {
            lun,
            block_size: config.block_size,
            total_blocks: config.total_blocks,
            flags: config.flags,
            cb: Arc::new(RwLock::new(None)),
            handle: Mutex::new(None),
        }
    }

    pub fn lun(&self) -> u8 {
        self.lun
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// Framework handle, present between a successful registration and release.
    pub fn handle(&self) -> Option<DeviceHandle> {
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_handle(&self, handle: Option<DeviceHandle>) -> Option<DeviceHandle> {
        std::mem::replace(
            &mut *self.handle.lock().unwrap_or_else(PoisonError::into_inner),
            handle,
        )
    }

    pub(crate) fn callbacks(&self) -> Option<Arc<dyn BlockCallbacks>> {
        self.cb
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn callback_slot(&self) -> CallbackSlot {
        Arc::clone(&self.cb)
    }

    pub(crate) fn set_callbacks(&self, cb: Option<Arc<dyn BlockCallbacks>>) {
        *self.cb.write().unwrap_or_else(PoisonError::into_inner) = cb;
    }

    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            block_count: self.total_blocks,
            block_size: self.block_size,
            flags: self.flags,
            reserved: [0; 2],
        }
    }

    fn is_aligned(&self, txn: &Transaction) -> bool {
        let block_size = u64::from(self.block_size);
        txn.offset % block_size == 0 && txn.length() % block_size == 0
    }
}

impl fmt::Debug for UmsBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UmsBlock")
            .field("lun", &self.lun)
            .field("block_size", &self.block_size)
            .field("total_blocks", &self.total_blocks)
            .field("flags", &self.flags)
            .field("handle", &self.handle())
            .field("has_callbacks", &self.callbacks().is_some())
            .finish()
    }
}

/// Framework-facing context of one LUN: the controller plus the LUN's index inside it.
#[derive(Clone)]
pub struct UmsBlockRef {
    ums: Arc<Ums>,
    index: usize,
}

impl UmsBlockRef {
    pub(crate) fn new(ums: Arc<Ums>, index: usize) -> Self {
        debug_assert!(index < ums.blocks().len());
        Self { ums, index }
    }

    pub fn block(&self) -> &UmsBlock {
        &self.ums.blocks()[self.index]
    }

    pub fn shared(&self) -> &UmsShared {
        self.ums.shared()
    }

    /// Create the framework device for this LUN, attach the block-core protocol and publish it
    /// under the controller's device.
    ///
    /// On a failed publish the freshly created handle is destroyed before the error is returned.
    pub(crate) fn add(self) -> Result<DeviceHandle> {
        let name = format!("ums-lun-{:02}", self.block().lun());
        let host = Arc::clone(self.ums.host());
        let parent = self.ums.parent();
        let dev = Arc::new(self);

        let handle = host.create(&name, dev.clone())?;
        host.set_protocol(handle, ProtocolId::BlockCore, dev.clone());
        dev.block().set_callbacks(None);
        dev.block().set_handle(Some(handle));

        if let Err(err) = host.add(handle, parent) {
            warn!(%name, ?err, "failed to publish block device");
            dev.block().set_handle(None);
            host.destroy(handle);
            return Err(err);
        }
        debug!(%name, ?handle, "block device published");
        Ok(handle)
    }
}

impl fmt::Debug for UmsBlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UmsBlockRef")
            .field("block", self.block())
            .finish()
    }
}

impl DeviceOps for UmsBlockRef {
    fn queue(&self, mut txn: Transaction) {
        let dev = self.block();
        if !dev.is_aligned(&txn) {
            debug!(
                lun = dev.lun,
                offset = txn.offset,
                length = txn.length(),
                block_size = dev.block_size,
                "rejecting misaligned transaction"
            );
            txn.complete(Err(UmsError::InvalidArgs), 0);
            return;
        }
        txn.set_lun(dev.lun);
        self.shared().enqueue(txn);
    }

    fn ioctl(&self, op: u32, _cmd: &[u8], reply: &mut [u8]) -> Result<usize> {
        match op {
            IOCTL_BLOCK_GET_INFO => {
                let need = BlockInfo::SIZE;
                if reply.len() < need {
                    return Err(UmsError::BufferTooSmall {
                        need,
                        have: reply.len(),
                    });
                }
                reply[..need].copy_from_slice(&self.block().info().to_bytes());
                Ok(need)
            }
            IOCTL_DEVICE_SYNC => {
                self.shared().sync()?;
                Ok(0)
            }
            _ => Err(UmsError::NotSupported),
        }
    }

    fn get_size(&self) -> u64 {
        let dev = self.block();
        u64::from(dev.block_size) * dev.total_blocks
    }

    fn release(&self) {
        // Only the framework handle is owned here; the block state belongs to the controller.
        if let Some(handle) = self.block().set_handle(None) {
            debug!(lun = self.block().lun, ?handle, "releasing block device");
            self.ums.host().destroy(handle);
        }
    }
}
