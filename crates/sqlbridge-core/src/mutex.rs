//! Async exclusive lock with explicit `lock`/`unlock`.
//!
//! Drivers hold this across a whole logical unit of work (one statement or a
//! full transaction), which spans several awaits and is ended by a separate
//! `release` call. The lock is a one-permit [`Semaphore`]; the owned permit of
//! the current holder is parked inside the mutex between `lock` and `unlock`.
//!
//! Waiters are served strictly in arrival order, and a cancelled waiter
//! leaves the queue at its next poll instead of being handed the lock.

use crate::Result;
use crate::error::{Error, MisuseErrorKind};
use asupersync::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use asupersync::{CancelReason, Cx, Outcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// FIFO async mutex guarding a single shared resource.
#[derive(Debug)]
pub struct ConnectionMutex {
    semaphore: Arc<Semaphore>,
    holder: Mutex<Option<OwnedSemaphorePermit>>,
    waiting: AtomicUsize,
}

/// Counts a caller as queued for as long as it is alive.
struct Queued<'a>(&'a AtomicUsize);

impl<'a> Queued<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ConnectionMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMutex {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            holder: Mutex::new(None),
            waiting: AtomicUsize::new(0),
        }
    }

    fn holder(&self) -> MutexGuard<'_, Option<OwnedSemaphorePermit>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the mutex is free, then mark it held.
    ///
    /// Returns `Outcome::Cancelled` if `cx` is cancelled while queued, and a
    /// `Destroyed` misuse error once the mutex has been closed. Dropping the
    /// future before it completes withdraws from the queue.
    pub async fn lock(&self, cx: &Cx) -> Outcome<(), Error> {
        let queued = Queued::enter(&self.waiting);
        let acquired = OwnedSemaphorePermit::acquire(Arc::clone(&self.semaphore), cx, 1).await;
        drop(queued);

        match acquired {
            Ok(permit) => {
                *self.holder() = Some(permit);
                Outcome::Ok(())
            }
            Err(AcquireError::Cancelled) => {
                tracing::debug!("connection lock wait cancelled");
                Outcome::Cancelled(
                    cx.cancel_reason()
                        .unwrap_or_else(|| CancelReason::user("connection lock cancelled")),
                )
            }
            Err(AcquireError::Closed) => Outcome::Err(Error::misuse(
                MisuseErrorKind::Destroyed,
                "connection mutex closed",
            )),
            Err(e) => Outcome::Err(Error::Custom(e.to_string())),
        }
    }

    /// Take the lock if it is free and nobody is queued for it.
    pub fn try_lock(&self) -> bool {
        match OwnedSemaphorePermit::try_acquire_arc(&self.semaphore, 1) {
            Ok(permit) => {
                *self.holder() = Some(permit);
                true
            }
            Err(_) => false,
        }
    }

    /// Release the lock, resuming at most one waiter.
    ///
    /// Returns a misuse error, and changes nothing, when the mutex is not held.
    #[allow(clippy::result_large_err)]
    pub fn unlock(&self) -> Result<()> {
        let permit = self.holder().take();
        match permit {
            Some(permit) => {
                drop(permit);
                Ok(())
            }
            None => Err(Error::misuse(
                MisuseErrorKind::UnlockNotHeld,
                "unlock called on a connection mutex that is not held",
            )),
        }
    }

    /// Refuse all future `lock` calls and fail every queued one.
    ///
    /// A current holder keeps the lock until it unlocks.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn is_locked(&self) -> bool {
        self.holder().is_some()
    }

    /// Number of callers still waiting for the lock.
    pub fn waiters(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}
