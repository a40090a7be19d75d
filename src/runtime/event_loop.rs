//! mio dispatcher loop.
//!
//! Readiness-based model: one thread blocks in `poll` over the listener and
//! every idle client slot. Listener readiness accepts connections into the
//! slot table; client readiness reads a single request and hands the
//! connection to a detached worker. Uses epoll on Linux, kqueue on macOS.

use crate::cache::DigestCache;
use crate::request::MAX_REQUEST_LEN;
use crate::runtime::connection::Connection;
use crate::runtime::slots::{SlotTable, SlotTableFull};
use crate::runtime::worker::{self, Job};
use crate::shutdown::{ShutdownController, State};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(crate) const LISTENER_TOKEN: Token = Token(usize::MAX);
pub(crate) const WAKER_TOKEN: Token = Token(usize::MAX - 1);

const EVENTS_CAPACITY: usize = 256;

/// The dispatcher: sole owner of the listener and sole acceptor.
pub struct Dispatcher {
    poll: Poll,
    listener: Option<TcpListener>,
    slots: Arc<SlotTable<Arc<Connection>>>,
    cache: Arc<DigestCache>,
    controller: Arc<ShutdownController>,
    /// Connections accepted while every slot was taken. Held open,
    /// never serviced, until the dispatcher exits.
    rejected: Vec<Arc<Connection>>,
    buf: Vec<u8>,
}

impl Dispatcher {
    pub fn new(
        poll: Poll,
        mut listener: TcpListener,
        slots: Arc<SlotTable<Arc<Connection>>>,
        cache: Arc<DigestCache>,
        controller: Arc<ShutdownController>,
    ) -> io::Result<Self> {
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener: Some(listener),
            slots,
            cache,
            controller,
            rejected: Vec::new(),
            buf: vec![0u8; MAX_REQUEST_LEN],
        })
    }

    /// Run until the controller reports the drain complete.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Readiness wait failed");
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    WAKER_TOKEN => {}
                    Token(slot) => self.handle_client(slot),
                }
            }

            if self.controller.state() != State::Running && self.listener.is_some() {
                self.close_listener();
            }

            if self.controller.is_drained() {
                break;
            }
        }

        self.finish();
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            if !self.controller.is_running() {
                return;
            }

            let accepted = match self.listener.as_ref() {
                Some(listener) => listener.accept(),
                None => return,
            };

            match accepted {
                Ok((stream, peer)) => self.register_connection(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    return;
                }
            }
        }
    }

    fn register_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        let conn = Arc::new(Connection::new(stream, peer));

        let slot = match self.slots.register(Arc::clone(&conn)) {
            Ok(slot) => slot,
            Err(SlotTableFull) => {
                warn!(peer = %peer, "Slot table full, connection left unserviced");
                self.rejected.push(conn);
                return;
            }
        };

        if let Err(e) = conn.register(self.poll.registry(), Token(slot)) {
            warn!(slot, peer = %peer, error = %e, "Failed to watch connection");
            self.slots.release(slot);
            return;
        }

        info!(
            fd = conn.fd(),
            ip = %peer.ip(),
            port = peer.port(),
            slot,
            "New connection"
        );
    }

    fn handle_client(&mut self, slot: usize) {
        let Some(conn) = self.slots.get(slot) else {
            return;
        };

        let n = match conn.read(&mut self.buf) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return,
            Err(e) => {
                debug!(slot, error = %e, "Read error");
                self.disconnect(slot, &conn);
                return;
            }
        };

        if n == 0 {
            info!(ip = %conn.peer().ip(), port = conn.peer().port(), slot, "Host disconnected");
            self.disconnect(slot, &conn);
            return;
        }

        let Some(permit) = self.controller.try_admit() else {
            debug!(slot, "Draining, request not scheduled");
            return;
        };

        // Past this point only the worker touches the connection.
        if let Err(e) = conn.deregister(self.poll.registry()) {
            warn!(slot, error = %e, "Failed to stop watching connection");
        }
        if let Err(e) = conn.into_blocking() {
            warn!(slot, error = %e, "Failed to switch connection to blocking mode");
        }

        let job = Job {
            raw: self.buf[..n].to_vec(),
            slot,
            conn,
            slots: Arc::clone(&self.slots),
            cache: Arc::clone(&self.cache),
            permit,
        };

        if let Err(e) = worker::spawn(job) {
            error!(slot, error = %e, "Failed to spawn worker");
            self.slots.release(slot);
        }
    }

    fn disconnect(&mut self, slot: usize, conn: &Connection) {
        if let Err(e) = conn.deregister(self.poll.registry()) {
            debug!(slot, error = %e, "Deregister failed");
        }
        self.slots.release(slot);
    }

    /// Closing the listener is how the server stops accepting: later
    /// connects are refused.
    fn close_listener(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(&mut listener) {
                debug!(error = %e, "Listener deregister failed");
            }
            info!("Stopped accepting connections");
        }
    }

    fn finish(mut self) {
        self.close_listener();

        info!("Closing the server");
        let entries = self.cache.snapshot();
        for entry in &entries {
            info!(
                text = %String::from_utf8_lossy(&entry.text),
                digest = %entry.digest,
                "cached"
            );
        }
        info!(count = entries.len(), "Cache dump complete");

        for (slot, conn) in self.slots.occupied() {
            debug!(slot, peer = %conn.peer(), "Closing connection still holding a slot");
        }
        self.slots.drain();
        self.rejected.clear();

        self.controller.mark_stopped();
    }
}
