//! Accept loop.
//!
//! The listener thread owns the listening socket and its own poller. Every
//! accepted connection is handed to one worker in round-robin order, after
//! which the listener never touches it again.

use super::poller::{Direction, Poller};
use super::worker::Incoming;
use crossbeam_channel::{SendError, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::{Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub const LISTENER_TOKEN: Token = Token(0);

/// How long to wait before retrying accept after a non-transient error
/// (e.g. out of file descriptors).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Create a non-blocking TCP listener with SO_REUSEADDR and SO_REUSEPORT.
pub fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Cycles through worker indices `0..size`.
#[derive(Debug)]
pub struct RoundRobin {
    next: usize,
    size: usize,
}

impl RoundRobin {
    pub fn new(size: usize) -> Self {
        Self {
            next: 0,
            size: size.max(1),
        }
    }

    pub fn next(&mut self) -> usize {
        let current = self.next;
        self.next = (self.next + 1) % self.size;
        current
    }
}

/// The listener's view of one worker.
#[derive(Clone)]
pub struct WorkerHandle {
    id: usize,
    sender: Sender<Incoming>,
    waker: Arc<Waker>,
    assigned: Arc<AtomicUsize>,
}

impl WorkerHandle {
    pub fn new(id: usize, sender: Sender<Incoming>, waker: Arc<Waker>) -> Self {
        Self {
            id,
            sender,
            waker,
            assigned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Hand a connection to the worker and wake it.
    ///
    /// If the worker has exited the connection is given back.
    pub fn assign(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), Incoming> {
        self.assigned.fetch_add(1, Ordering::Relaxed);
        if let Err(SendError(incoming)) = self.sender.send((stream, peer)) {
            self.assigned.fetch_sub(1, Ordering::Relaxed);
            return Err(incoming);
        }
        self.wake();
        Ok(())
    }

    /// Interrupt the worker's poll.
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!(worker = self.id, error = %e, "Failed to wake worker");
        }
    }

    /// Total connections ever assigned to this worker.
    pub fn assigned(&self) -> usize {
        self.assigned.load(Ordering::Relaxed)
    }
}

pub struct Listener {
    listener: TcpListener,
    poller: Poller,
    workers: Vec<WorkerHandle>,
    round_robin: RoundRobin,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl Listener {
    /// `poller` must already have `listener` registered under
    /// `LISTENER_TOKEN` for reading.
    pub fn new(
        listener: TcpListener,
        poller: Poller,
        workers: Vec<WorkerHandle>,
        running: Arc<AtomicBool>,
        poll_timeout: Duration,
    ) -> Self {
        let round_robin = RoundRobin::new(workers.len());
        Self {
            listener,
            poller,
            workers,
            round_robin,
            running,
            poll_timeout,
        }
    }

    /// Register `listener` with `poller` so it can drive a `Listener`.
    pub fn register(poller: &Poller, listener: &mut TcpListener) -> io::Result<()> {
        poller.register(listener, LISTENER_TOKEN, Direction::Read)
    }

    /// Accept until the running flag is cleared. The listening socket is
    /// closed when this returns.
    pub fn run(mut self) -> io::Result<()> {
        info!(
            addr = ?self.listener.local_addr().ok(),
            workers = self.workers.len(),
            "Listener started"
        );

        let mut ready = Vec::new();
        let mut retry_accept = false;

        while self.running.load(Ordering::Acquire) {
            let timeout = if retry_accept {
                ACCEPT_RETRY_DELAY
            } else {
                self.poll_timeout
            };

            ready.clear();
            self.poller.poll(&mut ready, Some(timeout))?;

            let acceptable = ready.iter().any(|r| r.token == LISTENER_TOKEN);
            if acceptable || retry_accept {
                retry_accept = !self.accept_pending();
            }
        }

        info!("Listener stopped");
        Ok(())
    }

    /// Accept every pending connection.
    ///
    /// Returns `true` once the queue is drained, `false` if accept failed
    /// and should be retried shortly.
    fn accept_pending(&mut self) -> bool {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.distribute(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    return false;
                }
            }
        }
    }

    /// Assign to the next worker in turn, skipping workers that have exited.
    fn distribute(&mut self, stream: TcpStream, peer: SocketAddr) {
        let mut incoming = (stream, peer);
        for _ in 0..self.workers.len() {
            let index = self.round_robin.next();
            let Some(worker) = self.workers.get(index) else {
                break;
            };

            let (stream, peer) = incoming;
            match worker.assign(stream, peer) {
                Ok(()) => {
                    trace!(worker = worker.id(), peer = %peer, "Assigned connection");
                    return;
                }
                Err(returned) => {
                    debug!(worker = worker.id(), peer = %peer, "Worker gone, trying next");
                    incoming = returned;
                }
            }
        }

        error!(peer = %incoming.1, "No live worker, dropping connection");
    }
}
