//! Per-worker buffer management.
//!
//! Every connection owns exactly one fixed-capacity `Buffer`: the request
//! bytes while reading, the encoded response while writing. Switching phase
//! hands the old buffer back to the worker's `BufferPool` and takes a fresh
//! one, so a buffer is never shared between two phases or two connections.

/// Fixed-capacity byte region with a fill level.
#[derive(Debug)]
pub struct Buffer {
    data: Box<[u8]>,
    len: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid bytes, `data[..len]`.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Unused tail of the buffer, `data[len..]`.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Mark `n` more bytes of the spare region as valid.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.capacity(), "advance past capacity");
        self.len = (self.len + n).min(self.capacity());
    }

    /// Replace the contents with `bytes`.
    ///
    /// Returns `false` and leaves the buffer empty if `bytes` does not fit.
    pub fn fill_from(&mut self, bytes: &[u8]) -> bool {
        self.len = 0;
        if bytes.len() > self.capacity() {
            return false;
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        true
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// Per-worker pool of equally sized buffers.
///
/// Buffers are reused to avoid allocation on the hot path. When the free
/// list is empty a new buffer is allocated; at most `retain` idle buffers
/// are kept.
pub struct BufferPool {
    /// Stack of idle buffers (LIFO for cache locality).
    free_list: Vec<Buffer>,
    /// Size of each buffer.
    buffer_size: usize,
    /// Maximum number of idle buffers kept.
    retain: usize,
}

impl BufferPool {
    /// Create a pool with `preallocate` ready buffers of `buffer_size` bytes,
    /// keeping at most `retain` idle.
    pub fn new(preallocate: usize, buffer_size: usize, retain: usize) -> Self {
        let count = preallocate.min(retain);
        let free_list = (0..count)
            .map(|_| Buffer::with_capacity(buffer_size))
            .collect();

        Self {
            free_list,
            buffer_size,
            retain,
        }
    }

    /// Take an empty buffer from the pool.
    pub fn alloc(&mut self) -> Buffer {
        match self.free_list.pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => Buffer::with_capacity(self.buffer_size),
        }
    }

    /// Return a buffer to the pool.
    pub fn free(&mut self, buf: Buffer) {
        debug_assert_eq!(buf.capacity(), self.buffer_size, "foreign buffer");
        if self.free_list.len() < self.retain && buf.capacity() == self.buffer_size {
            self.free_list.push(buf);
        }
    }

    /// Get the size of each buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of idle buffers ready for reuse.
    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.free_list.len()
    }
}
