//! The per-TCP-socket object and its operation tags (§3 "Connection",
//! §4.2).
//!
//! `turbo-downloader` has no analog for this — it drives everything
//! through `reqwest`'s own connection handling — so the state-machine
//! shape here is grounded directly in the original `connection.cpp`
//! (`current_op` / `next_op` / `pending_operations` / tri-state `cleanup`),
//! translated into a tagged `Op` enum and small integer/flag fields
//! instead of overlapped-I/O completion tags and `InterlockedIncrement`.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex;

use rustls::{ClientConnection, StreamOwned};

use crate::ids::{ConnectionId, DownloadId};

/// SOCKS sub-state machine driven between `Connect` and handing off to the
/// origin protocol (§4.2 "Outbound via SOCKS").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksSubstate {
    RequestAuth,
    AuthSent,
    RequestConnection,
    HandleConnection,
}

/// Completion tag driving the Connection's state machine. Each variant is
/// a point in §4.2's per-protocol happy paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Accept,
    Connect,
    ClientHandshake,
    ServerHandshake,
    ConnectResponse,
    SocksResponse(SocksSubstate),
    GetRequest,
    GetContent,
    /// Resume posted after a pause; carries the byte count recorded when
    /// the read was last interrupted so the parser continues in place.
    ResumeGetContent { recorded_bytes: u64 },
    Write,
    WriteFile { remaining: u64 },
    KeepAlive,
    Shutdown,
    Close,
}

/// Whether this Connection ever failed over to a different resolved
/// address, and whether the current failure was terminal (§3 `timed_out`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedOut {
    None,
    RetryNextAddress,
    Hard,
}

/// Tri-state cleanup flag from the original's `cleanup` field. `WriteInProgress`
/// folds in the original's "value >= 10" convention: resume the pending
/// `Live`/`ForceClose` outcome once the in-flight write completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    Live,
    AutoOnFinalCompletion,
    ForceRequested,
    WriteInProgress(Box<Cleanup>),
}

pub enum Socket {
    Plain(TcpStream),
    Tls(StreamOwned<ClientConnection, TcpStream>),
    /// No live socket yet, or closed and awaiting teardown.
    None,
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(s) => s.read(buf),
            Socket::Tls(s) => s.read(buf),
            Socket::None => Err(io::Error::new(io::ErrorKind::NotConnected, "no live socket")),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(s) => s.write(buf),
            Socket::Tls(s) => s.write(buf),
            Socket::None => Err(io::Error::new(io::ErrorKind::NotConnected, "no live socket")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Plain(s) => s.flush(),
            Socket::Tls(s) => s.flush(),
            Socket::None => Ok(()),
        }
    }
}

/// Fields mutated only under this Connection's own mutex. A worker thread
/// acquires this lock before touching any of it, and acquires the owning
/// Download's lock afterward if it needs to — never the reverse (§5).
pub struct ConnectionState {
    pub socket: Socket,
    pub current_op: Op,
    pub next_op: Option<Op>,
    pub cleanup: Cleanup,
    pub retries: u32,
    pub timed_out: TimedOut,
    pub socks_peer_addr: Option<std::net::SocketAddr>,
    /// Index into the owning Download's `range_list`.
    pub range_index: usize,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    /// An FTP control channel gets a keep-alive `NOOP` instead of being
    /// timed out by the Sweeper (§4.5). Unset for every other kind of
    /// Connection, including the FTP data channel.
    pub is_ftp_control: bool,
}

impl ConnectionState {
    fn new(range_index: usize) -> Self {
        Self {
            socket: Socket::None,
            current_op: Op::Connect,
            next_op: None,
            cleanup: Cleanup::Live,
            retries: 0,
            timed_out: TimedOut::None,
            socks_peer_addr: None,
            range_index,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            is_ftp_control: false,
        }
    }
}

pub struct Connection {
    pub id: ConnectionId,
    pub download_id: DownloadId,
    /// In-flight asynchronous operations referencing this Connection. A
    /// Connection may only be destroyed once this reaches zero AND
    /// `cleanup != Live` (§3 mandatory invariant).
    pending_operations: AtomicI32,
    pub timeout_counter: AtomicU32,
    pub state: Mutex<ConnectionState>,
}

impl Connection {
    pub fn new(id: ConnectionId, download_id: DownloadId, range_index: usize) -> Self {
        Self {
            id,
            download_id,
            pending_operations: AtomicI32::new(0),
            timeout_counter: AtomicU32::new(0),
            state: Mutex::new(ConnectionState::new(range_index)),
        }
    }

    pub fn begin_operation(&self) {
        self.pending_operations.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the post-decrement count; zero means no asynchronous
    /// operation currently references this Connection.
    pub fn end_operation(&self) -> i32 {
        self.pending_operations.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn pending_operations(&self) -> i32 {
        self.pending_operations.load(Ordering::SeqCst)
    }

    pub fn reset_timeout(&self) {
        self.timeout_counter.store(0, Ordering::SeqCst);
    }

    pub fn bump_timeout(&self) -> u32 {
        self.timeout_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// May this Connection be freed right now (§3 mandatory invariant)?
    pub fn is_destroyable(&self) -> bool {
        let live = matches!(self.state.lock().unwrap().cleanup, Cleanup::Live);
        !live && self.pending_operations() == 0
    }

    /// Install a freshly dialed (and, if applicable, TLS-wrapped) socket.
    /// Replaces whatever was there, so an FTPES control channel can call
    /// this again after `AUTH TLS` to swap plaintext for the TLS stream.
    pub fn install_socket(&self, socket: Socket) {
        self.state.lock().unwrap().socket = socket;
    }

    /// Take the live socket out, leaving `Socket::None` behind. Used by the
    /// FTPES `AUTH TLS` upgrade, which needs to move the plain `TcpStream`
    /// into a `rustls::StreamOwned` and install the result.
    pub fn take_socket(&self) -> Socket {
        std::mem::replace(&mut self.state.lock().unwrap().socket, Socket::None)
    }

    /// Read directly into the buffer, holding the state lock for the
    /// duration of the syscall so the Sweeper's `try_lock` can observe
    /// whether this Connection is mid-I/O (§4.5). A genuinely stalled peer
    /// is still bounded by the socket's own read timeout, not the Sweeper.
    pub fn read_socket(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.state.lock().unwrap().socket.read(buf)
    }

    pub fn write_all_socket(&self, buf: &[u8]) -> io::Result<()> {
        self.state.lock().unwrap().socket.write_all(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_destroyable_while_live() {
        let c = Connection::new(ConnectionId::next(), DownloadId::next(), 0);
        assert!(!c.is_destroyable());
    }

    #[test]
    fn not_destroyable_with_pending_operations() {
        let c = Connection::new(ConnectionId::next(), DownloadId::next(), 0);
        c.state.lock().unwrap().cleanup = Cleanup::ForceRequested;
        c.begin_operation();
        assert!(!c.is_destroyable());
        c.end_operation();
        assert!(c.is_destroyable());
    }

    #[test]
    fn pending_operations_tracks_begin_end() {
        let c = Connection::new(ConnectionId::next(), DownloadId::next(), 0);
        c.begin_operation();
        c.begin_operation();
        assert_eq!(c.pending_operations(), 2);
        assert_eq!(c.end_operation(), 1);
        assert_eq!(c.pending_operations(), 1);
    }
}
