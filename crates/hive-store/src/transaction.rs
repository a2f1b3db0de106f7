use std::marker::PhantomData;
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::lock::{DirectoryLock, LockHandle};

#[derive(Default)]
struct TxState {
    owner: Option<ThreadId>,
    depth: usize,
    started: Option<SystemTime>,
    handle: Option<LockHandle>,
}

/// Exclusive write scopes over one store instance.
///
/// Scopes are re-entrant per thread: a thread that already holds the
/// instance may begin nested scopes freely, and exclusivity ends when the
/// outermost scope ends. When a [`DirectoryLock`] is attached, the outermost
/// scope also holds it, extending exclusion to other processes.
pub struct Transactions {
    state: Mutex<TxState>,
    released: Condvar,
    lock: Option<(DirectoryLock, Duration)>,
}

impl Transactions {
    /// Thread-level exclusion only.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TxState::default()),
            released: Condvar::new(),
            lock: None,
        }
    }

    /// Also hold `lock` for the duration of every outermost scope.
    pub fn with_lock(lock: DirectoryLock, timeout: Duration) -> Self {
        Self {
            lock: Some((lock, timeout)),
            ..Self::new()
        }
    }

    /// Enter a scope, blocking while another thread holds the instance.
    ///
    /// The instance is claimed before the directory lock is requested, and
    /// the state mutex is not held while waiting for it.
    pub fn begin(&self) -> StoreResult<Transaction<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            match state.owner {
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return Ok(self.guard());
                }
                Some(_) => {
                    state = self.released.wait(state).expect("lock poisoned");
                }
                None => break,
            }
        }
        // Claimed but not started: depth stays 0 until the lock is held.
        state.owner = Some(me);
        drop(state);

        let handle = match &self.lock {
            Some((lock, timeout)) => match lock.acquire(*timeout) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    self.state.lock().expect("lock poisoned").owner = None;
                    self.released.notify_all();
                    return Err(e);
                }
            },
            None => None,
        };

        let mut state = self.state.lock().expect("lock poisoned");
        state.depth = 1;
        state.started = Some(SystemTime::now());
        state.handle = handle;
        debug!("transaction started");
        Ok(self.guard())
    }

    fn guard(&self) -> Transaction<'_> {
        Transaction {
            txns: self,
            _not_send: PhantomData,
        }
    }

    /// Start time of the open outermost scope, if any.
    ///
    /// Objects written at or after this instant may not be referenced yet.
    pub fn oldest_start(&self) -> Option<SystemTime> {
        self.state.lock().expect("lock poisoned").started
    }

    /// Whether the calling thread is inside a scope.
    pub fn in_transaction(&self) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        state.depth > 0 && state.owner == Some(thread::current().id())
    }

    fn end(&self) -> StoreResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.owner != Some(thread::current().id()) {
            return Err(StoreError::LockMisuse(
                "transaction ended by a thread that does not hold it".into(),
            ));
        }
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }
        state.owner = None;
        state.started = None;
        let handle = state.handle.take();
        // Release the directory lock before waking local waiters so the next
        // outermost scope can take it.
        let result = handle.map_or(Ok(()), LockHandle::release);
        drop(state);
        self.released.notify_all();
        debug!("transaction finished");
        result
    }
}

impl Default for Transactions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Transactions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("lock poisoned");
        f.debug_struct("Transactions")
            .field("depth", &state.depth)
            .field("started", &state.started)
            .field("directory_lock", &self.lock.as_ref().map(|(l, _)| l.path()))
            .finish()
    }
}

/// Scoped guard returned by [`Transactions::begin`]. Ends the scope on drop.
///
/// Not `Send`: a scope must end on the thread that began it.
#[must_use = "the transaction ends when the guard is dropped"]
pub struct Transaction<'a> {
    txns: &'a Transactions,
    _not_send: PhantomData<*const ()>,
}

impl Transaction<'_> {
    /// End the scope explicitly, surfacing any error from releasing the
    /// directory lock.
    pub fn commit(self) -> StoreResult<()> {
        let txns = self.txns;
        std::mem::forget(self);
        txns.end()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.txns.end() {
            tracing::warn!(error = %e, "failed to end transaction");
        }
    }
}
