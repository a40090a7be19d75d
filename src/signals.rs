//! Process signal handling.
//!
//! `SIGUSR1` resets the digest cache; `SIGTERM` and `SIGINT` start a
//! graceful drain. The signals are blocked in every thread and consumed
//! synchronously with `sigwait` on a dedicated thread, so the controller
//! runs in ordinary thread context rather than inside a handler.

use crate::shutdown::ShutdownController;
use std::io;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Signals the server reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Reset,
    Shutdown,
}

impl Signal {
    fn from_raw(signo: libc::c_int) -> Option<Self> {
        match signo {
            libc::SIGUSR1 => Some(Signal::Reset),
            libc::SIGTERM | libc::SIGINT => Some(Signal::Shutdown),
            _ => None,
        }
    }
}

/// Set of handled signals, blocked in the calling thread.
pub struct SignalSet {
    set: libc::sigset_t,
}

/// Block the handled signals in the calling thread.
///
/// Must run before any other thread is spawned so that every thread
/// inherits the mask and the signals are only seen by `sigwait`.
pub fn block() -> io::Result<SignalSet> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initializes the set before any other use; the
    // remaining calls operate on that initialized set.
    let set = unsafe {
        if libc::sigemptyset(set.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        let mut set = set.assume_init();
        for signo in [libc::SIGUSR1, libc::SIGTERM, libc::SIGINT] {
            if libc::sigaddset(&mut set, signo) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        set
    };
    Ok(SignalSet { set })
}

impl SignalSet {
    /// Block until one of the handled signals is pending and take it.
    pub fn wait(&self) -> io::Result<Signal> {
        loop {
            let mut signo: libc::c_int = 0;
            // SAFETY: `self.set` was initialized in `block` and `signo` is a
            // valid out pointer.
            let rc = unsafe { libc::sigwait(&self.set, &mut signo) };
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            match Signal::from_raw(signo) {
                Some(signal) => return Ok(signal),
                None => debug!(signo, "Ignoring unexpected signal"),
            }
        }
    }
}

/// Start the signal thread.
///
/// The thread keeps listening for the life of the process: a shutdown
/// signal hands the blocking drain to its own thread, so a reset that
/// arrives while workers are still draining is still served.
pub fn spawn(set: SignalSet, controller: Arc<ShutdownController>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || loop {
            match set.wait() {
                Ok(Signal::Reset) => {
                    info!("Received SIGUSR1");
                    controller.reset();
                }
                Ok(Signal::Shutdown) => {
                    info!("Received termination signal");
                    start_drain(&controller);
                }
                Err(e) => {
                    warn!(error = %e, "sigwait failed, signal handling stopped");
                    return;
                }
            }
        })
}

fn start_drain(controller: &Arc<ShutdownController>) {
    if !controller.is_running() {
        debug!("Drain already under way");
        return;
    }
    let drain = Arc::clone(controller);
    if let Err(e) = thread::Builder::new()
        .name("drain".to_string())
        .spawn(move || drain.shutdown())
    {
        warn!(error = %e, "Failed to spawn drain thread, draining inline");
        controller.shutdown();
    }
}
