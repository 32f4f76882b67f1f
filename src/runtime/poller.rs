//! Readiness multiplexer handle.
//!
//! Thin wrapper over `mio::Poll` (epoll on Linux, kqueue on macOS). Each
//! worker and the listener own one. Interest is always a single direction,
//! read or write, never both.

use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::time::Duration;

/// Reserved token for the cross-thread waker.
///
/// Must never collide with slab keys, which start at 0.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// The one readiness direction a registration is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn interest(self) -> Interest {
        match self {
            Direction::Read => Interest::READABLE,
            Direction::Write => Interest::WRITABLE,
        }
    }
}

/// One ready registration reported by `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Error or full hang-up reported by the OS.
    pub hangup: bool,
}

impl Readiness {
    fn from_event(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            hangup: event.is_error() || (event.is_read_closed() && event.is_write_closed()),
        }
    }
}

pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    /// Create a new multiplexer able to report `max_events` per poll.
    pub fn new(max_events: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(max_events.max(1)),
        })
    }

    pub fn register<S>(&self, source: &mut S, token: Token, direction: Direction) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll
            .registry()
            .register(source, token, direction.interest())
    }

    /// Replace the interest of an existing registration.
    ///
    /// Re-arming also makes the OS report the source again if it is still
    /// ready, which is how "would block" results are retried.
    pub fn modify<S>(&self, source: &mut S, token: Token, direction: Direction) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll
            .registry()
            .reregister(source, token, direction.interest())
    }

    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Create the waker for this poller. Its events carry `WAKE_TOKEN`.
    ///
    /// Only one waker may exist per poller.
    pub fn waker(&self) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), WAKE_TOKEN)
    }

    /// Wait up to `timeout` for readiness and append the results to `ready`.
    ///
    /// Nothing ready (or an interrupted wait) leaves `ready` untouched and is
    /// not an error.
    pub fn poll(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        ready.extend(self.events.iter().map(Readiness::from_event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpListener;
    use std::io::Write;
    use std::net::TcpStream;

    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

    #[test]
    fn test_poll_empty() {
        let mut poller = Poller::new(8).unwrap();
        let mut ready = Vec::new();
        poller.poll(&mut ready, Some(Duration::ZERO)).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_waker() {
        let mut poller = Poller::new(8).unwrap();
        let waker = poller.waker().unwrap();
        waker.wake().unwrap();

        let mut ready = Vec::new();
        poller.poll(&mut ready, TIMEOUT).unwrap();
        assert!(ready.iter().any(|r| r.token == WAKE_TOKEN));
    }

    #[test]
    fn test_register_modify_deregister() {
        let mut poller = Poller::new(8).unwrap();
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        poller
            .register(&mut listener, Token(1), Direction::Read)
            .unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        let (mut stream, _) = loop {
            let mut ready = Vec::new();
            poller.poll(&mut ready, TIMEOUT).unwrap();
            assert!(ready.iter().all(|r| r.token == Token(1)));
            if let Ok(accepted) = listener.accept() {
                break accepted;
            }
        };

        // A fresh connection is immediately writable
        poller.register(&mut stream, Token(2), Direction::Write).unwrap();
        let mut ready = Vec::new();
        poller.poll(&mut ready, TIMEOUT).unwrap();
        assert!(ready.iter().any(|r| r.token == Token(2) && r.writable && !r.hangup));

        // Switch to read interest; data from the peer makes it readable
        poller.modify(&mut stream, Token(2), Direction::Read).unwrap();
        client.write_all(b"ping").unwrap();

        let mut seen = false;
        for _ in 0..10 {
            let mut ready = Vec::new();
            poller.poll(&mut ready, TIMEOUT).unwrap();
            if ready.iter().any(|r| r.token == Token(2) && r.readable) {
                seen = true;
                break;
            }
        }
        assert!(seen);

        poller.deregister(&mut stream).unwrap();
        poller.deregister(&mut listener).unwrap();
    }
}
