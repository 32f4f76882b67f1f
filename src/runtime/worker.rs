//! Worker event loop.
//!
//! Each worker owns one poller, one slab of connections and one buffer
//! pool. Connections arrive from the listener over a channel; from then on
//! only this worker touches them, so nothing here is locked.
//!
//! Per readiness event:
//! - hang-up or error flags: close, whatever the phase
//! - awaiting request + readable: read once, run the pipeline, switch to write
//! - sending response + writable: write once, switch back to read when done
//! - "would block": re-arm the same direction and wait

use super::buffer::BufferPool;
use super::connection::{Connection, ReadOutcome, WriteOutcome};
use super::pipeline;
use super::poller::{Direction, Poller, Readiness, WAKE_TOKEN};
use crate::config::Config;
use crate::http::Version;
use crate::router::Router;
use crossbeam_channel::Receiver;
use mio::net::TcpStream;
use mio::Token;
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// A freshly accepted connection handed over by the listener.
pub type Incoming = (TcpStream, SocketAddr);

/// Buffers preallocated per worker at startup.
const PREALLOCATED_BUFFERS: usize = 64;

pub struct Worker {
    id: usize,
    poller: Poller,
    incoming: Receiver<Incoming>,
    connections: Slab<Connection<TcpStream>>,
    buffers: BufferPool,
    router: Arc<Router>,
    version: Version,
    running: Arc<AtomicBool>,
    max_connections: usize,
    max_events: usize,
    poll_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        poller: Poller,
        incoming: Receiver<Incoming>,
        router: Arc<Router>,
        running: Arc<AtomicBool>,
        config: &Config,
    ) -> Self {
        Self {
            id,
            poller,
            incoming,
            connections: Slab::with_capacity(config.max_connections.min(1024)),
            buffers: BufferPool::new(
                PREALLOCATED_BUFFERS,
                config.buffer_size,
                config.max_connections,
            ),
            router,
            version: config.http_version,
            running,
            max_connections: config.max_connections,
            max_events: config.max_events,
            poll_timeout: config.poll_timeout,
        }
    }

    /// Run until the shared running flag is cleared.
    ///
    /// All connections still open are closed before returning.
    pub fn run(mut self) -> io::Result<()> {
        info!(
            worker = self.id,
            buffer_size = self.buffers.buffer_size(),
            max_connections = self.max_connections,
            "Worker started"
        );

        let mut ready = Vec::with_capacity(self.max_events);
        let result = loop {
            if !self.running.load(Ordering::Acquire) {
                break Ok(());
            }

            self.adopt_incoming();

            ready.clear();
            if let Err(e) = self.poller.poll(&mut ready, Some(self.poll_timeout)) {
                break Err(e);
            }

            for readiness in ready.drain(..) {
                self.handle_event(readiness);
            }
        };

        self.shutdown();
        info!(worker = self.id, "Worker stopped");
        result
    }

    /// Take ownership of every connection the listener has sent so far.
    fn adopt_incoming(&mut self) {
        while let Ok((stream, peer)) = self.incoming.try_recv() {
            self.adopt(stream, peer);
        }
    }

    fn adopt(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        if self.connections.len() >= self.max_connections {
            warn!(worker = self.id, peer = %peer, "Connection limit reached");
            return;
        }

        let entry = self.connections.vacant_entry();
        let conn_id = entry.key();

        if let Err(e) = self
            .poller
            .register(&mut stream, Token(conn_id), Direction::Read)
        {
            error!(worker = self.id, peer = %peer, error = %e, "Failed to register connection");
            return;
        }

        entry.insert(Connection::new(stream, self.buffers.alloc()));
        debug!(worker = self.id, conn_id, peer = %peer, "Accepted connection");
    }

    fn handle_event(&mut self, readiness: Readiness) {
        if readiness.token == WAKE_TOKEN {
            // New connections or shutdown; both are handled by the loop.
            return;
        }

        let conn_id = readiness.token.0;
        let Some(conn) = self.connections.get(conn_id) else {
            trace!(worker = self.id, conn_id, "Event for closed connection");
            return;
        };

        if readiness.hangup {
            debug!(worker = self.id, conn_id, "Peer hung up");
            self.close(conn_id);
            return;
        }

        match conn.direction() {
            Direction::Read if readiness.readable => self.on_readable(conn_id),
            Direction::Write if readiness.writable => self.on_writable(conn_id),
            direction => trace!(worker = self.id, conn_id, ?direction, "Spurious readiness"),
        }
    }

    fn on_readable(&mut self, conn_id: usize) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };

        match conn.read_request() {
            ReadOutcome::Request => {
                trace!(worker = self.id, conn_id, len = conn.request().len(), "Read request");
                let response = pipeline::respond(
                    conn.request(),
                    &self.router,
                    self.version,
                    self.buffers.buffer_size(),
                );

                if !conn.begin_response(&response, &mut self.buffers) {
                    error!(
                        worker = self.id,
                        conn_id,
                        len = response.len(),
                        "Response does not fit connection buffer"
                    );
                    self.close(conn_id);
                    return;
                }
                self.rearm(conn_id, Direction::Write);
            }
            ReadOutcome::WouldBlock => self.rearm(conn_id, Direction::Read),
            ReadOutcome::Closed => {
                trace!(worker = self.id, conn_id, "Peer closed connection");
                self.close(conn_id);
            }
            ReadOutcome::Failed(e) => {
                debug!(worker = self.id, conn_id, error = %e, "Read failed");
                self.close(conn_id);
            }
        }
    }

    fn on_writable(&mut self, conn_id: usize) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };

        match conn.write_response() {
            WriteOutcome::Flushed => {
                conn.finish_response(&mut self.buffers);
                self.rearm(conn_id, Direction::Read);
            }
            WriteOutcome::Partial => {
                trace!(worker = self.id, conn_id, remaining = conn.remaining(), "Partial write");
                self.rearm(conn_id, Direction::Write);
            }
            WriteOutcome::WouldBlock => self.rearm(conn_id, Direction::Write),
            WriteOutcome::Failed(e) => {
                debug!(worker = self.id, conn_id, error = %e, "Write failed");
                self.close(conn_id);
            }
        }
    }

    /// Re-register interest in `direction`. Failure closes the connection.
    fn rearm(&mut self, conn_id: usize, direction: Direction) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };

        if let Err(e) = self
            .poller
            .modify(conn.stream_mut(), Token(conn_id), direction)
        {
            error!(worker = self.id, conn_id, error = %e, "Failed to update interest");
            self.close(conn_id);
        }
    }

    /// Deregister, release the buffer and close the socket.
    fn close(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.try_remove(conn_id) {
            let _ = self.poller.deregister(conn.stream_mut());
            let (stream, buf) = conn.into_parts();
            self.buffers.free(buf);
            drop(stream);
            debug!(worker = self.id, conn_id, "Connection closed");
        }
    }

    fn shutdown(&mut self) {
        let open: Vec<usize> = self.connections.iter().map(|(id, _)| id).collect();
        for conn_id in open {
            self.close(conn_id);
        }

        // Connections handed over but never adopted are closed on drop.
        let pending = self.incoming.try_iter().count();
        if pending > 0 {
            debug!(worker = self.id, pending, "Dropped unadopted connections");
        }
    }
}
