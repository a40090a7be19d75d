//! Lifecycle state machine: cache reset and graceful drain.
//!
//! ```text
//! Running --shutdown--> Draining --(active == 0, dispatcher exits)--> Stopped
//! ```
//!
//! Worker admission and the `Running -> Draining` transition share one lock
//! with the active-worker count, so once draining has begun no further
//! worker can be admitted and the count only moves towards zero.

use crate::cache::DigestCache;
use mio::Waker;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often a drain in progress reports what it is waiting on.
const DRAIN_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Draining,
    Stopped,
}

struct Lifecycle {
    state: State,
    active: usize,
    drained: bool,
}

/// Coordinates reset and shutdown between the signal thread, the
/// dispatcher and the workers.
pub struct ShutdownController {
    lifecycle: Mutex<Lifecycle>,
    idle: Condvar,
    cache: Arc<DigestCache>,
    waker: Arc<Waker>,
}

impl ShutdownController {
    pub fn new(cache: Arc<DigestCache>, waker: Arc<Waker>) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Mutex::new(Lifecycle {
                state: State::Running,
                active: 0,
                drained: false,
            }),
            idle: Condvar::new(),
            cache,
            waker,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_dispatcher(&self) {
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake dispatcher");
        }
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    /// True once every admitted worker has finished after a shutdown.
    pub fn is_drained(&self) -> bool {
        self.lock().drained
    }

    /// Number of workers admitted and not yet finished.
    #[cfg(test)]
    pub fn active_workers(&self) -> usize {
        self.lock().active
    }

    /// Admit a new worker. Returns `None` unless the server is running.
    pub fn try_admit(self: &Arc<Self>) -> Option<WorkerPermit> {
        let mut lifecycle = self.lock();
        if lifecycle.state != State::Running {
            return None;
        }
        lifecycle.active += 1;
        Some(WorkerPermit {
            controller: Arc::clone(self),
        })
    }

    fn release_worker(&self) {
        let mut lifecycle = self.lock();
        lifecycle.active = lifecycle.active.saturating_sub(1);
        if lifecycle.active == 0 {
            self.idle.notify_all();
        }
    }

    /// Empty the digest cache. Ignored once stopped.
    pub fn reset(&self) -> bool {
        if self.state() == State::Stopped {
            debug!("Reset ignored, server already stopped");
            return false;
        }
        let cleared = self.cache.clear();
        info!(cleared, "Done! Cache reset");
        true
    }

    /// Stop admitting work, wait for in-flight workers, then stop the
    /// dispatcher.
    ///
    /// Blocks the caller until the drain completes. A second call while a
    /// drain is already under way returns immediately.
    pub fn shutdown(&self) {
        {
            let mut lifecycle = self.lock();
            if lifecycle.state != State::Running {
                debug!(state = ?lifecycle.state, "Shutdown already in progress");
                return;
            }
            lifecycle.state = State::Draining;
        }
        info!("Shutdown requested, draining in-flight workers");
        self.wake_dispatcher();

        let mut lifecycle = self.lock();
        while lifecycle.active > 0 {
            debug!(active = lifecycle.active, "Waiting for workers to finish");
            let (guard, _) = self
                .idle
                .wait_timeout(lifecycle, DRAIN_REPORT_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            lifecycle = guard;
        }
        lifecycle.drained = true;
        drop(lifecycle);

        info!("All workers finished");
        self.wake_dispatcher();
    }

    /// Called by the dispatcher once it has exited its loop.
    pub fn mark_stopped(&self) {
        self.lock().state = State::Stopped;
    }
}

/// Proof of admission held by a running worker. Dropping it decrements the
/// active-worker count.
pub struct WorkerPermit {
    controller: Arc<ShutdownController>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.controller.release_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Poll, Token};
    use std::thread;
    use std::time::Instant;

    fn controller(capacity: usize) -> (Poll, Arc<ShutdownController>, Arc<DigestCache>) {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(0)).unwrap());
        let cache = DigestCache::new(capacity);
        let controller = ShutdownController::new(Arc::clone(&cache), waker);
        (poll, controller, cache)
    }

    #[test]
    fn test_initial_state() {
        let (_poll, controller, _) = controller(1);
        assert_eq!(controller.state(), State::Running);
        assert!(!controller.is_drained());
        assert_eq!(controller.active_workers(), 0);
    }

    #[test]
    fn test_permit_counts() {
        let (_poll, controller, _) = controller(1);
        let a = controller.try_admit().unwrap();
        let b = controller.try_admit().unwrap();
        assert_eq!(controller.active_workers(), 2);
        drop(a);
        assert_eq!(controller.active_workers(), 1);
        drop(b);
        assert_eq!(controller.active_workers(), 0);
    }

    #[test]
    fn test_reset_clears_cache() {
        let (_poll, controller, cache) = controller(4);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        assert!(controller.reset());
        assert!(cache.is_empty());
        // Safe on an empty cache too.
        assert!(controller.reset());
    }

    #[test]
    fn test_shutdown_without_workers() {
        let (_poll, controller, _) = controller(1);
        controller.shutdown();
        assert_eq!(controller.state(), State::Draining);
        assert!(controller.is_drained());
        assert!(controller.try_admit().is_none());

        controller.mark_stopped();
        assert_eq!(controller.state(), State::Stopped);
        assert!(!controller.reset());
    }

    #[test]
    fn test_shutdown_waits_for_workers() {
        let (_poll, controller, _) = controller(1);
        let permit = controller.try_admit().unwrap();

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            drop(permit);
        });

        let start = Instant::now();
        controller.shutdown();
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(controller.active_workers(), 0);
        assert!(controller.is_drained());
        worker.join().unwrap();
    }

    #[test]
    fn test_reset_during_drain() {
        let (_poll, controller, cache) = controller(4);
        let permit = controller.try_admit().unwrap();
        cache.insert("a".into(), "1".into());

        let c = Arc::clone(&controller);
        let drain = thread::spawn(move || c.shutdown());

        while controller.state() != State::Draining {
            thread::yield_now();
        }
        assert!(controller.reset());
        assert!(cache.is_empty());

        drop(permit);
        drain.join().unwrap();
        assert!(controller.is_drained());
    }

    #[test]
    fn test_second_shutdown_returns() {
        let (_poll, controller, _) = controller(1);
        let permit = controller.try_admit().unwrap();

        let c = Arc::clone(&controller);
        let first = thread::spawn(move || c.shutdown());
        while controller.state() != State::Draining {
            thread::yield_now();
        }

        // Does not block behind the first drain.
        controller.shutdown();
        assert!(!controller.is_drained());

        drop(permit);
        first.join().unwrap();
        assert!(controller.is_drained());
    }
}
