#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use ums_block::{
    BlockCallbacks, BlockOps, DeviceHandle, DeviceHost, DeviceOps, LunConfig, ProtocolId, Result,
    Transaction, TxnOp, TxnStatus, Ums, UmsConfig, UmsError, Vmo,
};

pub const PARENT: DeviceHandle = DeviceHandle(0);
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct HostDevice {
    pub name: String,
    pub ops: Arc<dyn DeviceOps>,
    pub block_core: Option<Arc<dyn BlockOps>>,
    pub parent: Option<DeviceHandle>,
}

/// In-memory device framework that records every call.
#[derive(Default)]
pub struct RecordingHost {
    next_handle: AtomicU64,
    pub fail_create: AtomicBool,
    pub fail_add: AtomicBool,
    devices: Mutex<HashMap<DeviceHandle, HostDevice>>,
    destroyed: Mutex<Vec<DeviceHandle>>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_live(&self, handle: DeviceHandle) -> bool {
        self.devices.lock().unwrap().contains_key(&handle)
    }

    pub fn live_count(&self) -> usize {
        self.devices.lock().unwrap().len()
    }

    pub fn destroyed(&self) -> Vec<DeviceHandle> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn name(&self, handle: DeviceHandle) -> String {
        self.devices.lock().unwrap()[&handle].name.clone()
    }

    pub fn parent_of(&self, handle: DeviceHandle) -> Option<DeviceHandle> {
        self.devices.lock().unwrap()[&handle].parent
    }

    pub fn ops(&self, handle: DeviceHandle) -> Arc<dyn DeviceOps> {
        Arc::clone(&self.devices.lock().unwrap()[&handle].ops)
    }

    pub fn block_core(&self, handle: DeviceHandle) -> Arc<dyn BlockOps> {
        let devices = self.devices.lock().unwrap();
        Arc::clone(
            devices[&handle]
                .block_core
                .as_ref()
                .expect("block-core protocol attached"),
        )
    }
}

impl DeviceHost for RecordingHost {
    fn create(&self, name: &str, ops: Arc<dyn DeviceOps>) -> Result<DeviceHandle> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(UmsError::Registration("create refused".to_string()));
        }
        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.devices.lock().unwrap().insert(
            handle,
            HostDevice {
                name: name.to_string(),
                ops,
                block_core: None,
                parent: None,
            },
        );
        Ok(handle)
    }

    fn set_protocol(&self, dev: DeviceHandle, protocol: ProtocolId, ops: Arc<dyn BlockOps>) {
        assert_eq!(protocol, ProtocolId::BlockCore);
        self.devices
            .lock()
            .unwrap()
            .get_mut(&dev)
            .expect("set_protocol on unknown device")
            .block_core = Some(ops);
    }

    fn add(&self, dev: DeviceHandle, parent: DeviceHandle) -> Result<()> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(UmsError::Registration("add refused".to_string()));
        }
        self.devices
            .lock()
            .unwrap()
            .get_mut(&dev)
            .expect("add on unknown device")
            .parent = Some(parent);
        Ok(())
    }

    fn destroy(&self, dev: DeviceHandle) {
        // Take the entry out before dropping it: dropping the ops may re-enter the host.
        let removed = self.devices.lock().unwrap().remove(&dev);
        assert!(removed.is_some(), "destroy of unknown device {dev:?}");
        self.destroyed.lock().unwrap().push(dev);
        drop(removed);
    }
}

/// Records every async completion in arrival order.
#[derive(Default)]
pub struct RecordingCallbacks {
    seen: Mutex<Vec<(u64, Result<()>)>>,
    cond: Condvar,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<(u64, Result<()>)> {
        self.seen.lock().unwrap().clone()
    }

    /// Wait until at least `n` completions were recorded.
    pub fn wait_for(&self, n: usize) -> Vec<(u64, Result<()>)> {
        let deadline = Instant::now() + TIMEOUT;
        let mut seen = self.seen.lock().unwrap();
        while seen.len() < n {
            let now = Instant::now();
            assert!(now < deadline, "timed out waiting for {n} completions, got {seen:?}");
            seen = self.cond.wait_timeout(seen, deadline - now).unwrap().0;
        }
        seen.clone()
    }
}

impl BlockCallbacks for RecordingCallbacks {
    fn complete(&self, cookie: u64, status: Result<()>) {
        self.seen.lock().unwrap().push((cookie, status));
        self.cond.notify_all();
    }
}

pub fn ums_with_luns(luns: &[LunConfig]) -> (Arc<RecordingHost>, Arc<Ums>) {
    ums_with_config(UmsConfig::default(), luns)
}

pub fn ums_with_config(config: UmsConfig, luns: &[LunConfig]) -> (Arc<RecordingHost>, Arc<Ums>) {
    let host = RecordingHost::new();
    let ums = Ums::new(config, host.clone(), PARENT, luns).unwrap();
    (host, ums)
}

pub type Completed = mpsc::Receiver<(TxnId, TxnStatus, u64)>;

pub use ums_block::TxnId;

/// Allocate a transaction over a fresh buffer whose handler reports `(id, status, actual)`.
pub fn txn(ums: &Ums, opcode: TxnOp, offset: u64, length: u64) -> (Transaction, Completed) {
    let vmo = Vmo::new(length as usize);
    let mut txn = ums.shared().pool().alloc_vmo(&vmo, 0, length).unwrap();
    txn.opcode = opcode;
    txn.offset = offset;
    let (tx, rx) = mpsc::channel();
    txn.set_complete_cb(move |txn| {
        let _ = tx.send((txn.id(), txn.status().clone(), txn.actual()));
    });
    (txn, rx)
}

/// Like [`txn`], but every handler reports into the same channel.
pub fn txn_into(
    ums: &Ums,
    offset: u64,
    length: u64,
    tx: &mpsc::Sender<(TxnId, TxnStatus, u64)>,
) -> Transaction {
    let vmo = Vmo::new(length as usize);
    let mut txn = ums.shared().pool().alloc_vmo(&vmo, 0, length).unwrap();
    txn.offset = offset;
    let tx = tx.clone();
    txn.set_complete_cb(move |txn| {
        let _ = tx.send((txn.id(), txn.status().clone(), txn.actual()));
    });
    txn
}

/// Spin until `cond` holds, failing the test after [`TIMEOUT`].
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::yield_now();
    }
}

pub fn ok() -> TxnStatus {
    TxnStatus::Complete(Ok(()))
}

pub fn failed(err: UmsError) -> TxnStatus {
    TxnStatus::Complete(Err(err))
}
