//! Controller-wide transaction queue.
//!
//! All LUNs of a controller share one [`UmsShared`]. Transactions run strictly in enqueue order,
//! which is what lets the drain barrier wait on a single transaction: once the last transaction
//! submitted before the barrier has completed, everything before it has too.
//!
//! Completion contract for whoever processes the queue (normally the worker in
//! [`crate::Ums::start`]):
//!
//! 1. take a transaction with [`UmsShared::take_next`] / [`UmsShared::next_work`], which marks it
//!    current;
//! 2. run the transfer without holding any controller lock;
//! 3. hand it back through [`UmsShared::complete`], which runs the completion handler, then wakes
//!    every sync waiter bound to it and only then clears the current slot.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::sync::{SyncNode, SyncWaiter};
use crate::{Completion, Result, Transaction, TxnId, TxnPool, UmsConfig, UmsError};

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(crate) queued: VecDeque<Transaction>,
    pub(crate) curr: Option<TxnId>,
    pub(crate) sync_nodes: Vec<SyncNode>,
    pub(crate) dead: bool,
}

impl QueueState {
    fn pop_current(&mut self) -> Option<Transaction> {
        let txn = self.queued.pop_front()?;
        self.curr = Some(txn.id());
        Some(txn)
    }
}

/// Shared controller context: queue, current transaction, sync waiters and the work signal.
#[derive(Debug)]
pub struct UmsShared {
    state: Mutex<QueueState>,
    work: Completion,
    pool: TxnPool,
}

impl UmsShared {
    pub fn new(config: &UmsConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            work: Completion::new(),
            pool: TxnPool::new(config.max_outstanding_txns),
        }
    }

    /// Pool used by the async bridge to allocate transactions.
    pub fn pool(&self) -> &TxnPool {
        &self.pool
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an already-validated transaction to the tail of the queue and wake the processor.
    pub(crate) fn enqueue(&self, txn: Transaction) {
        let mut state = self.lock_state();
        if state.dead {
            drop(state);
            debug!(id = %txn.id(), "controller is shut down; failing transaction");
            txn.complete(Err(UmsError::PeerClosed), 0);
            return;
        }
        trace!(id = %txn.id(), offset = txn.offset, length = txn.length(), "queued");
        state.queued.push_back(txn);
        drop(state);
        self.work.signal();
    }

    /// Block until every transaction queued before this call has completed.
    ///
    /// Returns immediately when nothing is queued or in flight. The wait has no timeout and cannot
    /// be cancelled.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.lock_state();
        let target = match state.queued.back().map(Transaction::id).or(state.curr) {
            Some(target) => target,
            None => return Ok(()),
        };
        let waiter = SyncWaiter::register(self, &mut state, target);
        drop(state);

        trace!(%target, "sync waiting");
        waiter.wait();
        Ok(())
    }

    /// Dequeue the head transaction and mark it current, without blocking.
    pub fn take_next(&self) -> Option<Transaction> {
        self.lock_state().pop_current()
    }

    /// Block until a transaction is available and dequeue it as [`UmsShared::take_next`] does.
    ///
    /// Returns `None` once the controller has been shut down.
    pub fn next_work(&self) -> Option<Transaction> {
        loop {
            self.work.wait();
            let mut state = self.lock_state();
            if state.dead {
                return None;
            }
            if let Some(txn) = state.pop_current() {
                return Some(txn);
            }
            // Reset under the queue lock so a concurrent enqueue cannot be missed.
            self.work.reset();
        }
    }

    /// Finish a transaction obtained from [`UmsShared::take_next`] or [`UmsShared::next_work`].
    pub fn complete(&self, txn: Transaction, status: Result<()>, actual: u64) {
        let id = txn.id();
        trace!(%id, ?status, actual, "completing");
        txn.complete(status, actual);

        let mut state = self.lock_state();
        state.sync_nodes.retain(|node| {
            if node.target == id {
                node.done.signal();
                false
            } else {
                true
            }
        });
        if state.curr == Some(id) {
            state.curr = None;
        }
    }

    /// Number of transactions waiting in the queue (excluding the current one).
    pub fn queued_len(&self) -> usize {
        self.lock_state().queued.len()
    }

    pub fn current(&self) -> Option<TxnId> {
        self.lock_state().curr
    }

    /// Number of callers currently blocked in [`UmsShared::sync`].
    pub fn sync_waiters(&self) -> usize {
        self.lock_state().sync_nodes.len()
    }

    pub fn is_dead(&self) -> bool {
        self.lock_state().dead
    }

    /// Mark the controller dead and wake the processor so it can exit.
    ///
    /// Transactions already queued stay queued (and visible to [`UmsShared::sync`]) until the
    /// caller fails them; new submissions are rejected from here on.
    pub(crate) fn mark_dead(&self) {
        self.lock_state().dead = true;
        self.work.signal();
    }
}
