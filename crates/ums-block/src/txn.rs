use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{Result, UmsError, Vmo};

/// Process-wide transaction identity. Never reused, even across pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(u64);

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

impl TxnId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOp {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnStatus {
    Pending,
    Complete(Result<()>),
}

impl TxnStatus {
    /// Final outcome. A transaction that never completed reports [`UmsError::Io`].
    pub fn result(&self) -> Result<()> {
        match self {
            TxnStatus::Complete(status) => status.clone(),
            TxnStatus::Pending => Err(UmsError::Io("transaction has not completed".to_string())),
        }
    }
}

type CompleteFn = Box<dyn FnOnce(Transaction) + Send>;

/// One block I/O request.
///
/// A transaction is moved (never shared) between stages: the submitter hands it to the queue, the
/// worker takes it out to run it, and completion passes it by value to the completion handler.
/// Dropping it returns its slot to the [`TxnPool`] it came from.
pub struct Transaction {
    id: TxnId,
    pub opcode: TxnOp,
    /// Byte offset on the device.
    pub offset: u64,
    length: u64,
    vmo: Vmo,
    vmo_offset: u64,
    status: TxnStatus,
    actual: u64,
    /// Opaque token handed back to the completion handler's owner.
    pub cookie: u64,
    complete_cb: Option<CompleteFn>,
    lun: Option<u8>,
    _slot: PoolSlot,
}

impl Transaction {
    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn vmo(&self) -> &Vmo {
        &self.vmo
    }

    pub fn vmo_offset(&self) -> u64 {
        self.vmo_offset
    }

    pub fn status(&self) -> &TxnStatus {
        &self.status
    }

    /// Bytes transferred; only meaningful once the transaction has completed.
    pub fn actual(&self) -> u64 {
        self.actual
    }

    /// LUN of the block device the transaction was queued on.
    pub fn lun(&self) -> Option<u8> {
        self.lun
    }

    pub(crate) fn set_lun(&mut self, lun: u8) {
        self.lun = Some(lun);
    }

    pub fn set_complete_cb(&mut self, cb: impl FnOnce(Transaction) + Send + 'static) {
        self.complete_cb = Some(Box::new(cb));
    }

    /// Copy transferred data into the transaction's memory range, starting `offset` bytes in.
    pub fn copy_to_vmo(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len() as u64)?;
        self.vmo.write_at(self.vmo_offset + offset, data)
    }

    /// Copy `buf.len()` bytes out of the transaction's memory range, starting `offset` bytes in.
    pub fn copy_from_vmo(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len() as u64)?;
        self.vmo.read_at(self.vmo_offset + offset, buf)
    }

    /// Record the final status and hand the transaction to its completion handler.
    ///
    /// Without a handler the transaction is simply released.
    pub fn complete(mut self, status: Result<()>, actual: u64) {
        self.status = TxnStatus::Complete(status);
        self.actual = actual;
        if let Some(cb) = self.complete_cb.take() {
            cb(self);
        }
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.length => Ok(()),
            _ => Err(UmsError::InvalidArgs),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("opcode", &self.opcode)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("vmo_offset", &self.vmo_offset)
            .field("status", &self.status)
            .field("actual", &self.actual)
            .field("cookie", &self.cookie)
            .field("lun", &self.lun)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct PoolInner {
    limit: usize,
    outstanding: AtomicUsize,
}

#[derive(Debug)]
struct PoolSlot {
    pool: Arc<PoolInner>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded transaction allocator.
///
/// At most `limit` transactions allocated from one pool may be alive at a time; further
/// allocations fail with [`UmsError::NoMemory`] until one is dropped.
#[derive(Debug, Clone)]
pub struct TxnPool {
    inner: Arc<PoolInner>,
}

impl TxnPool {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                limit,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Number of live transactions allocated from this pool.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Allocate a read transaction bound to `vmo[vmo_offset..vmo_offset + length]`.
    ///
    /// The device offset starts at zero; callers set [`Transaction::opcode`] and
    /// [`Transaction::offset`] before queueing.
    pub fn alloc_vmo(&self, vmo: &Vmo, vmo_offset: u64, length: u64) -> Result<Transaction> {
        if !vmo.contains(vmo_offset, length) {
            return Err(UmsError::InvalidArgs);
        }

        let limit = self.inner.limit;
        self.inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .map_err(|_| UmsError::NoMemory)?;
        let slot = PoolSlot {
            pool: Arc::clone(&self.inner),
        };

        let id = TxnId(NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed));
        Ok(Transaction {
            id,
            opcode: TxnOp::Read,
            offset: 0,
            length,
            vmo: vmo.clone(),
            vmo_offset,
            status: TxnStatus::Pending,
            actual: 0,
            cookie: 0,
            complete_cb: None,
            lun: None,
            _slot: slot,
        })
    }
}
