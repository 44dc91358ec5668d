//! Worker loop that drains the controller queue.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::{Result, Transaction, TxnOp, UmsError, UmsShared, Vmo};

/// Runs one transaction against the hardware (USB bulk-only transport + SCSI READ/WRITE in a
/// real driver).
pub trait TransferExecutor: Send + 'static {
    /// Transfer `txn` to or from LUN `lun`; returns the number of bytes moved.
    fn execute(&mut self, lun: u8, txn: &Transaction) -> Result<u64>;
}

pub(crate) fn spawn<E: TransferExecutor>(
    name: String,
    shared: Arc<UmsShared>,
    executor: E,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name)
        .spawn(move || run(&shared, executor))
}

fn run(shared: &UmsShared, mut executor: impl TransferExecutor) {
    debug!("worker started");
    while let Some(txn) = shared.next_work() {
        let lun = txn.lun().unwrap_or(0);
        let (status, actual) = match executor.execute(lun, &txn) {
            Ok(actual) => (Ok(()), actual),
            Err(err) => {
                debug!(id = %txn.id(), lun, ?err, "transfer failed");
                (Err(err), 0)
            }
        };
        shared.complete(txn, status, actual);
    }
    debug!("worker exiting");
}

/// RAM-backed executor with one image per LUN.
///
/// Images are [`Vmo`]s, so a clone kept by the caller observes writes made by the worker.
#[derive(Debug, Clone, Default)]
pub struct MemExecutor {
    luns: Vec<Vmo>,
}

impl MemExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an image; LUN numbers follow insertion order.
    pub fn with_lun(mut self, image: Vmo) -> Self {
        self.luns.push(image);
        self
    }

    pub fn image(&self, lun: u8) -> Option<&Vmo> {
        self.luns.get(usize::from(lun))
    }
}

impl TransferExecutor for MemExecutor {
    fn execute(&mut self, lun: u8, txn: &Transaction) -> Result<u64> {
        let image = self
            .image(lun)
            .ok_or_else(|| UmsError::Io(format!("no medium for lun {lun}")))?;
        let len = usize::try_from(txn.length()).map_err(|_| UmsError::InvalidArgs)?;
        let mut buf = vec![0u8; len];
        let beyond_end = |_: UmsError| {
            UmsError::Io(format!(
                "lba out of range: offset={} len={len} capacity={}",
                txn.offset,
                image.len()
            ))
        };

        match txn.opcode {
            TxnOp::Read => {
                image.read_at(txn.offset, &mut buf).map_err(beyond_end)?;
                txn.copy_to_vmo(0, &buf)?;
            }
            TxnOp::Write => {
                txn.copy_from_vmo(0, &mut buf)?;
                image.write_at(txn.offset, &buf).map_err(beyond_end)?;
            }
        }
        Ok(txn.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxnPool;

    #[test]
    fn mem_executor_reads_and_writes_images() {
        let image = Vmo::from_vec((0..=255u8).cycle().take(2048).collect());
        let mut exec = MemExecutor::new().with_lun(image.clone());
        let pool = TxnPool::new(4);

        let buf = Vmo::new(512);
        let mut txn = pool.alloc_vmo(&buf, 0, 512).unwrap();
        txn.offset = 512;
        assert_eq!(exec.execute(0, &txn).unwrap(), 512);
        assert_eq!(buf.to_vec(), image.to_vec()[512..1024]);

        let src = Vmo::from_vec(vec![0x5au8; 512]);
        let mut txn = pool.alloc_vmo(&src, 0, 512).unwrap();
        txn.opcode = TxnOp::Write;
        txn.offset = 1536;
        exec.execute(0, &txn).unwrap();
        assert_eq!(image.to_vec()[1536..], [0x5au8; 512]);
    }

    #[test]
    fn mem_executor_rejects_out_of_range_and_unknown_lun() {
        let mut exec = MemExecutor::new().with_lun(Vmo::new(1024));
        let pool = TxnPool::new(4);
        let buf = Vmo::new(512);
        let mut txn = pool.alloc_vmo(&buf, 0, 512).unwrap();
        txn.offset = 1024;

        assert!(matches!(exec.execute(0, &txn), Err(UmsError::Io(_))));
        assert!(matches!(exec.execute(1, &txn), Err(UmsError::Io(_))));
    }
}
