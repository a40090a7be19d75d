//! Client connection handle shared between the dispatcher and a worker.
//!
//! While idle the dispatcher watches the connection for readability. Once a
//! request has been read the connection is handed to exactly one worker,
//! which switches it to blocking mode and owns the response cycle.

use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use socket2::SockRef;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};

/// A single accepted client.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Watch for readability under `token`.
    pub fn register(&self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut SourceFd(&self.fd()), token, Interest::READABLE)
    }

    /// Stop watching this connection.
    pub fn deregister(&self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut SourceFd(&self.fd()))
    }

    /// One read call. `Ok(0)` means the peer closed its side.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }

    /// Prepare for hand-off to a worker: blocking sends from here on.
    pub fn into_blocking(&self) -> io::Result<()> {
        SockRef::from(&self.stream).set_nonblocking(false)
    }

    /// Send one response line and half-close both directions.
    pub fn respond(&self, digest: &str) -> io::Result<()> {
        let mut line = String::with_capacity(digest.len() + 1);
        line.push_str(digest);
        line.push('\n');

        (&self.stream).write_all(line.as_bytes())?;
        (&self.stream).flush()?;
        self.stream.shutdown(Shutdown::Both)
    }
}
