//! Callback-based block protocol.
//!
//! Upper layers that do not want to build transactions themselves issue single-shot
//! [`BlockOps::read`] / [`BlockOps::write`] calls and receive exactly one
//! [`BlockCallbacks::complete`] per call, possibly on the worker thread. Internally each call
//! becomes an ordinary queued [`crate::Transaction`], so completions arrive in submission order.

use std::sync::{Arc, PoisonError};

use tracing::warn;

use crate::block::CallbackSlot;
use crate::{BlockInfo, DeviceOps, Result, TxnOp, UmsBlockRef, Vmo};

/// Completion sink installed with [`BlockOps::set_callbacks`].
pub trait BlockCallbacks: Send + Sync {
    fn complete(&self, cookie: u64, status: Result<()>);
}

/// Block-core protocol table.
pub trait BlockOps: Send + Sync {
    /// Install the completion sink. The last installed sink receives every later completion,
    /// including those of requests issued before the install.
    fn set_callbacks(&self, cb: Arc<dyn BlockCallbacks>);

    fn get_info(&self) -> BlockInfo;

    /// Read `length` bytes at device offset `dev_offset` into `vmo[vmo_offset..]`.
    fn read(&self, vmo: &Vmo, length: u64, vmo_offset: u64, dev_offset: u64, cookie: u64);

    /// Write `length` bytes from `vmo[vmo_offset..]` to device offset `dev_offset`.
    fn write(&self, vmo: &Vmo, length: u64, vmo_offset: u64, dev_offset: u64, cookie: u64);
}

/// Delivery end of a LUN's callback slot. Holds no reference to the controller, so queued async
/// transactions never keep it alive.
struct Notifier {
    lun: u8,
    slot: CallbackSlot,
}

impl Notifier {
    fn notify(&self, cookie: u64, status: Result<()>) {
        let cb = self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match cb {
            Some(cb) => cb.complete(cookie, status),
            None => warn!(
                lun = self.lun,
                cookie,
                ?status,
                "dropping completion: no callbacks installed"
            ),
        }
    }
}

impl UmsBlockRef {
    fn submit_async(
        &self,
        opcode: TxnOp,
        vmo: &Vmo,
        length: u64,
        vmo_offset: u64,
        dev_offset: u64,
        cookie: u64,
    ) {
        let notifier = Notifier {
            lun: self.block().lun(),
            slot: self.block().callback_slot(),
        };
        let mut txn = match self.shared().pool().alloc_vmo(vmo, vmo_offset, length) {
            Ok(txn) => txn,
            Err(err) => {
                notifier.notify(cookie, Err(err));
                return;
            }
        };
        txn.opcode = opcode;
        txn.offset = dev_offset;
        txn.cookie = cookie;

        txn.set_complete_cb(move |txn| {
            let status = txn.status().result();
            let cookie = txn.cookie;
            // Release before notifying so the pool slot is free by the time the caller reacts.
            drop(txn);
            notifier.notify(cookie, status);
        });
        self.queue(txn);
    }
}

impl BlockOps for UmsBlockRef {
    fn set_callbacks(&self, cb: Arc<dyn BlockCallbacks>) {
        self.block().set_callbacks(Some(cb));
    }

    fn get_info(&self) -> BlockInfo {
        self.block().info()
    }

    fn read(&self, vmo: &Vmo, length: u64, vmo_offset: u64, dev_offset: u64, cookie: u64) {
        self.submit_async(TxnOp::Read, vmo, length, vmo_offset, dev_offset, cookie);
    }

    fn write(&self, vmo: &Vmo, length: u64, vmo_offset: u64, dev_offset: u64, cookie: u64) {
        self.submit_async(TxnOp::Write, vmo, length, vmo_offset, dev_offset, cookie);
    }
}
