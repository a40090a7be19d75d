//! Connection-handling runtime.
//!
//! - `event_loop`: the single dispatcher thread (mio readiness loop)
//! - `slots`: fixed-size client slot table shared with workers
//! - `connection`: the client handle stored in each slot
//! - `worker`: one detached thread per request

mod connection;
mod event_loop;
mod slots;
mod worker;

#[cfg(test)]
use crate::cache::CacheEntry;
use crate::cache::DigestCache;
use crate::config::Config;
use crate::shutdown::ShutdownController;
#[cfg(test)]
use crate::shutdown::State;
#[cfg(test)]
use connection::Connection;
use event_loop::{Dispatcher, WAKER_TOKEN};
use mio::net::TcpListener;
use mio::{Poll, Waker};
use slots::SlotTable;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::info;

/// Handle to a running server.
///
/// `main` only needs the address, the controller and `join`. Tests also
/// drive and inspect the server through it without signals.
pub struct ServerHandle {
    local_addr: SocketAddr,
    controller: Arc<ShutdownController>,
    #[cfg(test)]
    cache: Arc<DigestCache>,
    #[cfg(test)]
    slots: Arc<SlotTable<Arc<Connection>>>,
    dispatcher: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to (with the real port if 0 was asked).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.controller)
    }

    /// Clear the digest cache.
    #[cfg(test)]
    pub fn reset(&self) -> bool {
        self.controller.reset()
    }

    /// Drain and stop. Blocks until in-flight workers have finished.
    #[cfg(test)]
    pub fn shutdown(&self) {
        self.controller.shutdown()
    }

    #[cfg(test)]
    pub fn state(&self) -> State {
        self.controller.state()
    }

    #[cfg(test)]
    pub fn cache_snapshot(&self) -> Vec<CacheEntry> {
        self.cache.snapshot()
    }

    #[cfg(test)]
    pub fn slots_in_use(&self) -> usize {
        self.slots.in_use()
    }

    #[cfg(test)]
    pub fn active_workers(&self) -> usize {
        self.controller.active_workers()
    }

    /// Wait for the dispatcher thread to exit.
    pub fn join(self) -> io::Result<()> {
        self.dispatcher
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "dispatcher thread panicked"))?
    }
}

/// Bind the listener and start the dispatcher thread.
pub fn start(config: &Config) -> io::Result<ServerHandle> {
    let ip: IpAddr = config
        .host
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let addr = SocketAddr::new(ip, config.port);

    let listener = create_listener(addr, config.backlog)?;
    let local_addr = listener.local_addr()?;
    let listener = TcpListener::from_std(listener);

    let poll = Poll::new()?;
    let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

    let cache = DigestCache::new(config.cache_capacity);
    let slots = Arc::new(SlotTable::new(config.max_clients));
    let controller = ShutdownController::new(Arc::clone(&cache), waker);

    let dispatcher = Dispatcher::new(
        poll,
        listener,
        Arc::clone(&slots),
        Arc::clone(&cache),
        Arc::clone(&controller),
    )?;

    info!(
        addr = %local_addr,
        max_clients = config.max_clients,
        cache_capacity = config.cache_capacity,
        "Starting dispatcher"
    );

    let dispatcher = thread::Builder::new()
        .name("dispatcher".to_string())
        .spawn(move || dispatcher.run())?;

    Ok(ServerHandle {
        local_addr,
        controller,
        #[cfg(test)]
        cache,
        #[cfg(test)]
        slots,
        dispatcher,
    })
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
