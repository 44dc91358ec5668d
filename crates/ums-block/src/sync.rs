//! Blocking primitives behind the drain barrier.
//!
//! [`Completion`] is a resettable signal (set once, wakes every waiter, stays set until reset). It
//! backs both the controller's "work available" flag and each [`SyncWaiter`].

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::queue::{QueueState, UmsShared};
use crate::TxnId;

#[derive(Debug, Default)]
pub struct Completion {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        *signaled = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until signaled. There is no timeout.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        while !*signaled {
            signaled = self
                .cond
                .wait(signaled)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Entry in the controller's waiter list.
#[derive(Debug)]
pub(crate) struct SyncNode {
    pub(crate) target: TxnId,
    pub(crate) done: Arc<Completion>,
}

/// A caller blocked in [`UmsShared::sync`], waiting for one specific transaction.
///
/// Registration happens in [`SyncWaiter::register`] while the caller still holds the controller
/// lock; dropping the guard removes the node again if the processor has not already done so.
pub(crate) struct SyncWaiter<'a> {
    shared: &'a UmsShared,
    done: Arc<Completion>,
}

impl<'a> SyncWaiter<'a> {
    pub(crate) fn register(shared: &'a UmsShared, state: &mut QueueState, target: TxnId) -> Self {
        let done = Arc::new(Completion::new());
        state.sync_nodes.push(SyncNode {
            target,
            done: Arc::clone(&done),
        });
        Self { shared, done }
    }

    /// Must be called without the controller lock held.
    pub(crate) fn wait(&self) {
        self.done.wait();
    }
}

impl Drop for SyncWaiter<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        state
            .sync_nodes
            .retain(|node| !Arc::ptr_eq(&node.done, &self.done));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn completion_stays_signaled_until_reset() {
        let done = Completion::new();
        assert!(!done.is_signaled());

        done.signal();
        done.wait();
        assert!(done.is_signaled());

        done.reset();
        assert!(!done.is_signaled());
    }

    #[test]
    fn completion_wakes_other_thread() {
        let done = Arc::new(Completion::new());
        let waiter = {
            let done = Arc::clone(&done);
            thread::spawn(move || done.wait())
        };
        done.signal();
        waiter.join().unwrap();
    }
}
