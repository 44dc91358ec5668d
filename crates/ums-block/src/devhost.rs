//! Seam to the host device framework.
//!
//! The framework owns device publication and lifetime; the shim only supplies operation tables.
//! [`DeviceOps`] is the generic device table every published device has; the block-core protocol
//! table ([`crate::BlockOps`]) is attached with [`DeviceHost::set_protocol`].

use std::sync::Arc;

use crate::{BlockOps, Result, Transaction};

/// Opaque framework handle for a created device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    /// Callback-based block protocol (the [`BlockOps`] table).
    BlockCore,
}

/// Device operation table invoked by the framework.
pub trait DeviceOps: Send + Sync {
    /// Submit a transaction. Never blocks; the outcome arrives through the transaction's
    /// completion handler.
    fn queue(&self, txn: Transaction);

    /// Execute a control operation, writing any reply into `reply`. Returns the reply length.
    fn ioctl(&self, op: u32, cmd: &[u8], reply: &mut [u8]) -> Result<usize>;

    /// Device size in bytes.
    fn get_size(&self) -> u64;

    /// Called by the framework once the device is being torn down.
    fn release(&self);
}

/// Host device framework, consumed by registration.
pub trait DeviceHost: Send + Sync {
    fn create(&self, name: &str, ops: Arc<dyn DeviceOps>) -> Result<DeviceHandle>;

    fn set_protocol(&self, dev: DeviceHandle, protocol: ProtocolId, ops: Arc<dyn BlockOps>);

    /// Publish `dev` as a child of `parent`.
    fn add(&self, dev: DeviceHandle, parent: DeviceHandle) -> Result<()>;

    fn destroy(&self, dev: DeviceHandle);
}
