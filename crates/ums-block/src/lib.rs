//! Block-device shim for a USB mass-storage ("UMS") controller.
//!
//! Every logical unit (LUN) of a UMS controller is exposed to the host device framework as its own
//! block device, but all of them funnel I/O through a single transaction queue owned by the
//! controller. This crate provides:
//!
//! - [`UmsShared`]: the controller-wide FIFO queue, the "current transaction" slot and the list of
//!   blocked sync waiters, all guarded by one lock
//! - [`UmsShared::sync`]: the drain barrier (`IOCTL_DEVICE_SYNC`)
//! - [`BlockOps`]: the single-shot async read/write bridge that turns callback-style requests into
//!   queued [`Transaction`]s and back
//! - [`DeviceOps`]: the device operation table (queue, ioctl, size, release)
//! - [`Ums`]: the controller aggregate that embeds the per-LUN [`UmsBlock`] state and runs the
//!   worker loop against a [`TransferExecutor`]
//!
//! The USB transport and SCSI command layer live behind [`TransferExecutor`]; the host framework
//! lives behind [`DeviceHost`].

mod block;
mod bridge;
mod config;
mod controller;
mod devhost;
mod error;
pub mod ioctl;
mod queue;
mod sync;
mod txn;
mod vmo;
mod worker;

pub use block::{BlockFlags, BlockInfo, UmsBlock, UmsBlockRef};
pub use bridge::{BlockCallbacks, BlockOps};
pub use config::{LunConfig, UmsConfig};
pub use controller::Ums;
pub use devhost::{DeviceHandle, DeviceHost, DeviceOps, ProtocolId};
pub use error::{Result, UmsError};
pub use queue::UmsShared;
pub use sync::Completion;
pub use txn::{Transaction, TxnId, TxnOp, TxnPool, TxnStatus};
pub use vmo::Vmo;
pub use worker::{MemExecutor, TransferExecutor};
