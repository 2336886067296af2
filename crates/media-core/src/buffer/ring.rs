//! Fixed-capacity byte ring buffer
//!
//! Feeds audio produced outside the media threads (another component, a
//! prompt generator) into a relay path. Writers never block and the buffer
//! never grows: when a write would exceed the capacity, the oldest bytes are
//! dropped and the caller is told how many.

use crate::error::{Error, Result};

/// Outcome of a successful [`RingBuffer::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingWrite {
    /// All bytes stored, nothing dropped
    Written(usize),

    /// All bytes stored, but `dropped` of the oldest unread bytes were lost
    Overflowed {
        /// Bytes copied in
        written: usize,
        /// Unread bytes discarded to make room
        dropped: usize,
    },
}

impl RingWrite {
    /// Bytes copied into the buffer
    pub fn written(&self) -> usize {
        match *self {
            RingWrite::Written(n) => n,
            RingWrite::Overflowed { written, .. } => written,
        }
    }

    /// Whether older data had to be dropped
    pub fn is_overflow(&self) -> bool {
        matches!(self, RingWrite::Overflowed { .. })
    }
}

/// Fixed-capacity byte ring buffer with drop-oldest overflow
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    stored: usize,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            stored: 0,
        }
    }

    /// Maximum number of bytes held
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of unread bytes
    pub fn len(&self) -> usize {
        self.stored
    }

    /// Whether there is nothing to read
    pub fn is_empty(&self) -> bool {
        self.stored == 0
    }

    /// Drop all unread data
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.stored = 0;
    }

    /// Append `data`, wrapping around the end of the storage.
    ///
    /// Fails with [`Error::BufferTooLarge`] without copying anything if
    /// `data` is longer than the capacity. On overflow the buffer keeps the
    /// most recent `capacity` bytes and the read cursor is moved to the write
    /// cursor.
    pub fn write(&mut self, data: &[u8]) -> Result<RingWrite> {
        let capacity = self.capacity();
        let size = data.len();
        if size > capacity {
            return Err(Error::BufferTooLarge { size, capacity });
        }
        if size == 0 {
            return Ok(RingWrite::Written(0));
        }

        let space = capacity - self.write_pos;
        if space >= size {
            self.buffer[self.write_pos..self.write_pos + size].copy_from_slice(data);
            self.write_pos += size;
        } else {
            self.buffer[self.write_pos..].copy_from_slice(&data[..space]);
            self.buffer[..size - space].copy_from_slice(&data[space..]);
            self.write_pos = size - space;
        }
        if self.write_pos == capacity {
            self.write_pos = 0;
        }

        self.stored += size;
        if self.stored > capacity {
            let dropped = self.stored - capacity;
            self.stored = capacity;
            self.read_pos = self.write_pos;
            return Ok(RingWrite::Overflowed {
                written: size,
                dropped,
            });
        }

        Ok(RingWrite::Written(size))
    }

    /// Copy up to `out.len()` unread bytes into `out`, returning the count.
    /// Returns 0 when empty.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let size = out.len().min(self.stored);
        if size == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let space = capacity - self.read_pos;
        if space >= size {
            out[..size].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + size]);
            self.read_pos += size;
        } else {
            out[..space].copy_from_slice(&self.buffer[self.read_pos..]);
            out[space..size].copy_from_slice(&self.buffer[..size - space]);
            self.read_pos = size - space;
        }
        if self.read_pos == capacity {
            self.read_pos = 0;
        }

        self.stored -= size;
        size
    }

    /// Read up to `max` bytes into a new vector
    pub fn read_vec(&mut self, max: usize) -> Vec<u8> {
        let mut out = vec![0u8; max.min(self.stored)];
        let n = self.read(&mut out);
        out.truncate(n);
        out
    }
}
