//! Connection state machine.
//!
//! A connection is always in exactly one phase:
//!
//! ```text
//!   AwaitingRequest --(read > 0)--> SendingResponse --(fully sent)--> AwaitingRequest
//!         |                               |
//!         +--(EOF / error)--> closed <----+--(error)
//! ```
//!
//! Each phase owns its buffer. A transition builds the next phase with a
//! fresh buffer from the worker's pool and retires the old one, so bytes
//! from a previous phase can never leak into the next.

use super::buffer::{Buffer, BufferPool};
use super::poller::Direction;
use std::io::{self, Read, Write};

/// Current phase of a connection and the buffer it owns.
#[derive(Debug)]
pub enum Phase {
    /// Waiting for the request; the buffer receives it.
    AwaitingRequest(Buffer),
    /// Sending `buf[cursor..len]`.
    SendingResponse {
        buf: Buffer,
        /// Bytes already sent.
        cursor: usize,
    },
}

impl Phase {
    /// The readiness direction this phase waits for.
    pub fn direction(&self) -> Direction {
        match self {
            Phase::AwaitingRequest(_) => Direction::Read,
            Phase::SendingResponse { .. } => Direction::Write,
        }
    }

    fn into_buffer(self) -> Buffer {
        match self {
            Phase::AwaitingRequest(buf) => buf,
            Phase::SendingResponse { buf, .. } => buf,
        }
    }
}

/// Result of one non-blocking read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Bytes arrived and are treated as one complete request.
    Request,
    /// Nothing to read yet; retry on the next readiness.
    WouldBlock,
    /// Peer closed the connection.
    Closed,
    Failed(io::Error),
}

/// Result of one non-blocking write attempt.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The whole response has been sent.
    Flushed,
    /// Some bytes (possibly zero) remain; the cursor has advanced.
    Partial,
    WouldBlock,
    Failed(io::Error),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    phase: Phase,
}

impl<S: Read + Write> Connection<S> {
    /// Create a new connection waiting for its first request.
    pub fn new(stream: S, buf: Buffer) -> Self {
        Self {
            stream,
            phase: Phase::AwaitingRequest(buf),
        }
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn direction(&self) -> Direction {
        self.phase.direction()
    }

    /// Attempt a single read of the request.
    ///
    /// Only meaningful while awaiting a request; in any other phase the
    /// event is spurious and reported as `WouldBlock`.
    pub fn read_request(&mut self) -> ReadOutcome {
        let Phase::AwaitingRequest(buf) = &mut self.phase else {
            return ReadOutcome::WouldBlock;
        };

        buf.clear();
        match self.stream.read(buf.spare_mut()) {
            Ok(0) => ReadOutcome::Closed,
            Ok(n) => {
                buf.advance(n);
                ReadOutcome::Request
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                ReadOutcome::WouldBlock
            }
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    /// The bytes of the request read so far. Empty outside the read phase.
    pub fn request(&self) -> &[u8] {
        match &self.phase {
            Phase::AwaitingRequest(buf) => buf.filled(),
            Phase::SendingResponse { .. } => &[],
        }
    }

    /// Switch to the response phase with `response` in a fresh buffer.
    ///
    /// Returns `false`, leaving the phase untouched, if the response does
    /// not fit in one buffer.
    pub fn begin_response(&mut self, response: &[u8], pool: &mut BufferPool) -> bool {
        let mut buf = pool.alloc();
        if !buf.fill_from(response) {
            pool.free(buf);
            return false;
        }

        let retired = std::mem::replace(&mut self.phase, Phase::SendingResponse { buf, cursor: 0 });
        pool.free(retired.into_buffer());
        true
    }

    /// Attempt a single write of the unsent part of the response.
    pub fn write_response(&mut self) -> WriteOutcome {
        let Phase::SendingResponse { buf, cursor } = &mut self.phase else {
            return WriteOutcome::WouldBlock;
        };

        let remaining = &buf.filled()[*cursor..];
        if remaining.is_empty() {
            return WriteOutcome::Flushed;
        }

        match self.stream.write(remaining) {
            Ok(n) => {
                *cursor += n;
                if *cursor >= buf.len() {
                    WriteOutcome::Flushed
                } else {
                    WriteOutcome::Partial
                }
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                WriteOutcome::WouldBlock
            }
            Err(e) => WriteOutcome::Failed(e),
        }
    }

    /// Bytes of the response not yet sent. Zero outside the write phase.
    pub fn remaining(&self) -> usize {
        match &self.phase {
            Phase::SendingResponse { buf, cursor } => buf.len() - cursor,
            Phase::AwaitingRequest(_) => 0,
        }
    }

    /// Switch back to awaiting the next request with a fresh buffer.
    pub fn finish_response(&mut self, pool: &mut BufferPool) {
        let retired = std::mem::replace(&mut self.phase, Phase::AwaitingRequest(pool.alloc()));
        pool.free(retired.into_buffer());
    }

    /// Tear the connection apart, returning the stream and its buffer.
    pub fn into_parts(self) -> (S, Buffer) {
        (self.stream, self.phase.into_buffer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// What the mock does on the next `write` call.
    enum WriteStep {
        Accept(usize),
        Block,
        Fail,
    }

    /// In-memory stream with scripted reads and writes.
    ///
    /// An exhausted read script blocks; an exhausted write script accepts
    /// everything.
    #[derive(Default)]
    struct MockStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
        writes: VecDeque<WriteStep>,
        written: Vec<u8>,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = match self.writes.pop_front() {
                Some(WriteStep::Accept(limit)) => limit.min(buf.len()),
                Some(WriteStep::Block) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(WriteStep::Fail) => return Err(io::ErrorKind::BrokenPipe.into()),
                None => buf.len(),
            };
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn connection(stream: MockStream, pool: &mut BufferPool) -> Connection<MockStream> {
        Connection::new(stream, pool.alloc())
    }

    #[test]
    fn test_read_request() {
        let mut pool = BufferPool::new(4, 64, 4);
        let stream = MockStream {
            reads: VecDeque::from([Ok(b"GET / HTTP/1.1\r\n\r\n".to_vec())]),
            ..Default::default()
        };
        let mut conn = connection(stream, &mut pool);

        assert_eq!(conn.direction(), Direction::Read);
        assert!(matches!(conn.read_request(), ReadOutcome::Request));
        assert_eq!(conn.request(), b"GET / HTTP/1.1\r\n\r\n");

        // Nothing more scripted: would block, stays in the read phase
        assert!(matches!(conn.read_request(), ReadOutcome::WouldBlock));
        assert_eq!(conn.direction(), Direction::Read);
    }

    #[test]
    fn test_read_eof_and_error() {
        let mut pool = BufferPool::new(4, 64, 4);
        let stream = MockStream {
            reads: VecDeque::from([
                Err(io::ErrorKind::Interrupted.into()),
                Err(io::ErrorKind::ConnectionReset.into()),
                Ok(Vec::new()),
            ]),
            ..Default::default()
        };
        let mut conn = connection(stream, &mut pool);

        assert!(matches!(conn.read_request(), ReadOutcome::WouldBlock));
        assert!(matches!(conn.read_request(), ReadOutcome::Failed(_)));
        assert!(matches!(conn.read_request(), ReadOutcome::Closed));
    }

    #[test]
    fn test_phase_transitions_replace_buffers() {
        let mut pool = BufferPool::new(4, 64, 4);
        let stream = MockStream {
            reads: VecDeque::from([Ok(b"request".to_vec())]),
            ..Default::default()
        };
        let mut conn = connection(stream, &mut pool);
        let idle = pool.available();

        assert!(matches!(conn.read_request(), ReadOutcome::Request));
        assert!(conn.begin_response(b"response", &mut pool));
        assert_eq!(conn.direction(), Direction::Write);
        assert!(conn.request().is_empty());
        assert_eq!(conn.remaining(), 8);
        assert_eq!(pool.available(), idle);

        assert!(matches!(conn.write_response(), WriteOutcome::Flushed));
        conn.finish_response(&mut pool);
        assert_eq!(conn.direction(), Direction::Read);
        assert!(conn.request().is_empty());
        assert_eq!(pool.available(), idle);

        let (stream, buf) = conn.into_parts();
        assert_eq!(stream.written, b"response");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_response_rejected() {
        let mut pool = BufferPool::new(2, 8, 2);
        let mut conn = connection(MockStream::default(), &mut pool);

        assert!(!conn.begin_response(b"far too long for eight bytes", &mut pool));
        assert_eq!(conn.direction(), Direction::Read);
    }

    #[test]
    fn test_partial_write_resumes_from_cursor() {
        let mut pool = BufferPool::new(4, 256, 4);
        let response: Vec<u8> = (0..200u8).collect();
        let stream = MockStream {
            writes: VecDeque::from([
                WriteStep::Accept(30),
                WriteStep::Block,
                WriteStep::Accept(0),
                WriteStep::Accept(100),
            ]),
            ..Default::default()
        };
        let mut conn = connection(stream, &mut pool);
        assert!(conn.begin_response(&response, &mut pool));

        assert!(matches!(conn.write_response(), WriteOutcome::Partial));
        assert_eq!(conn.remaining(), 170);

        assert!(matches!(conn.write_response(), WriteOutcome::WouldBlock));
        assert_eq!(conn.remaining(), 170);

        assert!(matches!(conn.write_response(), WriteOutcome::Partial));
        assert_eq!(conn.remaining(), 170);

        assert!(matches!(conn.write_response(), WriteOutcome::Partial));
        assert_eq!(conn.remaining(), 70);

        assert!(matches!(conn.write_response(), WriteOutcome::Flushed));
        assert_eq!(conn.remaining(), 0);

        let (stream, _) = conn.into_parts();
        assert_eq!(stream.written, response);
    }

    #[test]
    fn test_write_error() {
        let mut pool = BufferPool::new(2, 64, 2);
        let stream = MockStream {
            writes: VecDeque::from([WriteStep::Fail]),
            ..Default::default()
        };
        let mut conn = connection(stream, &mut pool);
        assert!(conn.begin_response(b"data", &mut pool));
        assert!(matches!(conn.write_response(), WriteOutcome::Failed(_)));
    }

    #[test]
    fn test_events_in_wrong_phase_are_ignored() {
        let mut pool = BufferPool::new(2, 64, 2);
        let mut conn = connection(MockStream::default(), &mut pool);
        assert!(matches!(conn.write_response(), WriteOutcome::WouldBlock));

        assert!(conn.begin_response(b"data", &mut pool));
        assert!(matches!(conn.read_request(), ReadOutcome::WouldBlock));
        assert_eq!(conn.remaining(), 4);
    }
}
