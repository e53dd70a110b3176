#[cfg(test)]
mod buffer_test;

use std::sync::Arc;

use parking_lot::Mutex;

/// Largest chunk a single `push` accepts. Two length-prefix bytes bound the
/// encodable size; UDP payloads (at most 65 507 bytes) stay under it.
pub const MAX_CHUNK_SIZE: usize = 0xffff;

const LENGTH_PREFIX: usize = 2;

/// Bounded chunk queue buffering one direction of one channel.
///
/// Each `push` stores one chunk and each `pop` returns exactly one chunk, so
/// writes are never combined into a single read; for datagram sources the
/// chunk boundaries are the datagram boundaries. The buffer is lossy: a push
/// that does not fit leaves the buffer unchanged and returns `false`. Neither
/// operation blocks, and the single internal lock is never held across a
/// syscall or an await point.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    inner: Arc<Mutex<RingBufferInternal>>,
}

#[derive(Debug)]
struct RingBufferInternal {
    data: Vec<u8>,
    head: usize,
    tail: usize,
    /// Occupied bytes, length prefixes included.
    used: usize,
    /// Queued chunk count.
    chunks: usize,
    shutdown: bool,
}

impl RingBufferInternal {
    fn write_byte(&mut self, b: u8) {
        self.data[self.tail] = b;
        self.tail += 1;
        if self.tail >= self.data.len() {
            self.tail = 0;
        }
    }

    fn read_byte(&mut self) -> u8 {
        let b = self.data[self.head];
        self.head += 1;
        if self.head >= self.data.len() {
            self.head = 0;
        }
        b
    }
}

impl RingBuffer {
    /// Creates a buffer holding at most `capacity` bytes of queued data,
    /// prefix overhead included.
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            inner: Arc::new(Mutex::new(RingBufferInternal {
                data: vec![0; capacity],
                head: 0,
                tail: 0,
                used: 0,
                chunks: 0,
                shutdown: false,
            })),
        }
    }

    /// Appends a copy of `chunk`. Returns `false`, leaving the buffer
    /// unchanged, when the buffer is shut down or the chunk does not fit.
    pub fn push(&self, chunk: &[u8]) -> bool {
        if chunk.is_empty() {
            return true;
        }
        if chunk.len() > MAX_CHUNK_SIZE {
            return false;
        }

        let mut b = self.inner.lock();

        if b.shutdown || b.used + LENGTH_PREFIX + chunk.len() > b.data.len() {
            return false;
        }

        b.write_byte((chunk.len() >> 8) as u8);
        b.write_byte(chunk.len() as u8);

        let end = std::cmp::min(b.data.len(), b.tail + chunk.len());
        let n = end - b.tail;
        let tail = b.tail;
        b.data[tail..end].copy_from_slice(&chunk[..n]);
        b.tail += n;
        if b.tail >= b.data.len() {
            // wrap around
            let m = chunk.len() - n;
            b.data[..m].copy_from_slice(&chunk[n..]);
            b.tail = m;
        }

        b.used += LENGTH_PREFIX + chunk.len();
        b.chunks += 1;
        true
    }

    /// Moves the oldest chunk into `out`, returning the number of bytes
    /// copied, or 0 when the buffer is empty or shut down. A chunk longer
    /// than `out` is truncated and the remainder discarded.
    pub fn pop(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }

        let mut b = self.inner.lock();

        if b.shutdown || b.chunks == 0 {
            return 0;
        }

        let n1 = b.read_byte() as usize;
        let n2 = b.read_byte() as usize;
        let count = (n1 << 8) | n2;

        let copied = std::cmp::min(count, out.len());
        if b.head + copied <= b.data.len() {
            out[..copied].copy_from_slice(&b.data[b.head..b.head + copied]);
        } else {
            let k = b.data.len() - b.head;
            out[..k].copy_from_slice(&b.data[b.head..]);
            out[k..copied].copy_from_slice(&b.data[..copied - k]);
        }

        // advance past the whole chunk, dropping any bytes that were not copied
        b.head += count;
        if b.head >= b.data.len() {
            b.head -= b.data.len();
        }

        b.used -= LENGTH_PREFIX + count;
        b.chunks -= 1;

        if b.chunks == 0 {
            // reset to the beginning to improve locality of the next burst
            b.head = 0;
            b.tail = 0;
        }

        copied
    }

    /// Queued payload bytes, prefix overhead excluded.
    pub fn len(&self) -> usize {
        let b = self.inner.lock();
        b.used - LENGTH_PREFIX * b.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().chunks == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Permanently stops the buffer: every later `push` returns `false` and
    /// every later `pop` returns 0, so drain loops observe shutdown on their
    /// next pop and exit promptly.
    pub fn shutdown(&self) {
        self.inner.lock().shutdown = true;
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }
}
