//! Bounded byte ring buffer with blocking and non-blocking I/O.
//!
//! Used to connect a console to a shell-attached script task (stdin and
//! stdout each get one buffer). Readers and writers may live on different
//! threads; all state is guarded by one mutex with separate condition
//! variables for read- and write-waiters. [`IoBuffer::stop`] is terminal:
//! it wakes everyone and makes subsequent blocking operations fail fast
//! (reads report end-of-stream, writes report zero bytes).
//!
//! Reads expose the contiguous span before the wrap point so callers can
//! consume data in place via [`IoBuffer::read_slice`] without copying.

use std::cmp;
use std::ops::Deref;
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::trace;

struct Ring {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
    used: usize,
    stopped: bool,
}

impl Ring {
    fn read_span(&self) -> usize {
        cmp::min(self.used, self.buf.len() - self.read)
    }

    fn write_span(&self) -> usize {
        cmp::min(self.buf.len() - self.used, self.buf.len() - self.write)
    }

    fn advance_read(&mut self, count: usize) {
        debug_assert!(count <= self.used);
        self.read = (self.read + count) % self.buf.len();
    }

    fn advance_write(&mut self, count: usize) {
        self.write = (self.write + count) % self.buf.len();
    }
}

pub struct IoBuffer {
    inner: Mutex<Ring>,
    read_cv: Condvar,
    write_cv: Condvar,
}

impl IoBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            inner: Mutex::new(Ring {
                buf: vec![0u8; capacity].into_boxed_slice(),
                read: 0,
                write: 0,
                used: 0,
                stopped: false,
            }),
            read_cv: Condvar::new(),
            write_cv: Condvar::new(),
        }
    }

    /// Bytes that can be read without blocking.
    pub fn read_available(&self) -> usize {
        self.inner.lock().expect("iobuffer mutex poisoned").used
    }

    /// Space that can be written without blocking.
    pub fn write_available(&self) -> usize {
        let ring = self.inner.lock().expect("iobuffer mutex poisoned");
        ring.buf.len() - ring.used
    }

    /// Read one byte. With `wait` the caller suspends until data arrives
    /// or the buffer is stopped. Returns `None` at end-of-stream (stopped)
    /// or, without `wait`, when the buffer is empty.
    pub fn read(&self, wait: bool) -> Option<u8> {
        let mut ring = self.inner.lock().expect("iobuffer mutex poisoned");

        loop {
            if ring.stopped {
                return None;
            }
            if ring.used > 0 {
                break;
            }
            if !wait {
                return None;
            }
            ring = self.read_cv.wait(ring).expect("iobuffer mutex poisoned");
        }

        let c = ring.buf[ring.read];
        ring.advance_read(1);
        self.take(&mut ring, 1);
        Some(c)
    }

    /// Borrow the contiguous readable span. Returns `None` when stopped,
    /// or when empty and `wait` is false. The returned guard holds the
    /// buffer lock; call [`ReadSlice::consume`] to release bytes.
    pub fn read_slice(&self, wait: bool) -> Option<ReadSlice<'_>> {
        let mut ring = self.inner.lock().expect("iobuffer mutex poisoned");

        loop {
            if ring.stopped {
                return None;
            }
            if ring.used > 0 {
                break;
            }
            if !wait {
                return None;
            }
            ring = self.read_cv.wait(ring).expect("iobuffer mutex poisoned");
        }

        Some(ReadSlice {
            ring: Some(ring),
            owner: self,
        })
    }

    /// Write a single byte, dropping it if the buffer is full or stopped.
    pub fn write_byte(&self, c: u8) {
        let mut ring = self.inner.lock().expect("iobuffer mutex poisoned");

        if ring.stopped || ring.used == ring.buf.len() {
            return;
        }

        let at = ring.write;
        ring.buf[at] = c;
        ring.advance_write(1);
        self.give(&mut ring, 1);
    }

    /// Write as much of `buf` as fits in the contiguous writable span,
    /// returning the number of bytes accepted. With `wait` the caller
    /// suspends while the buffer is full; a return of `0` means the
    /// buffer was stopped (or, without `wait`, full).
    pub fn write(&self, buf: &[u8], wait: bool) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let mut ring = self.inner.lock().expect("iobuffer mutex poisoned");

        loop {
            if ring.stopped {
                return 0;
            }
            if ring.write_span() > 0 {
                break;
            }
            if !wait {
                return 0;
            }
            ring = self.write_cv.wait(ring).expect("iobuffer mutex poisoned");
        }

        let count = cmp::min(ring.write_span(), buf.len());
        let at = ring.write;
        ring.buf[at..at + count].copy_from_slice(&buf[..count]);
        ring.advance_write(count);
        self.give(&mut ring, count);
        count
    }

    /// Stop the buffer: wake all blocked readers and writers and make
    /// subsequent operations fail fast. Irreversible.
    pub fn stop(&self) {
        let mut ring = self.inner.lock().expect("iobuffer mutex poisoned");
        ring.stopped = true;
        trace!(target: "iobuffer", pending = ring.used, "stopped");
        self.read_cv.notify_all();
        self.write_cv.notify_all();
    }

    pub fn stopped(&self) -> bool {
        self.inner.lock().expect("iobuffer mutex poisoned").stopped
    }

    fn take(&self, ring: &mut Ring, count: usize) {
        if ring.used == ring.buf.len() {
            self.write_cv.notify_all();
        }
        ring.used -= count;
    }

    fn give(&self, ring: &mut Ring, count: usize) {
        if ring.used == 0 {
            self.read_cv.notify_all();
        }
        ring.used += count;
    }
}

/// Zero-copy view of the contiguous readable bytes, holding the buffer
/// lock until dropped or consumed.
pub struct ReadSlice<'a> {
    ring: Option<MutexGuard<'a, Ring>>,
    owner: &'a IoBuffer,
}

impl Deref for ReadSlice<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let ring = self.ring.as_ref().expect("slice already consumed");
        let span = ring.read_span();
        &ring.buf[ring.read..ring.read + span]
    }
}

impl ReadSlice<'_> {
    /// Release `count` bytes (at most the slice length) back to writers.
    pub fn consume(mut self, count: usize) {
        let mut ring = self.ring.take().expect("slice already consumed");
        assert!(count <= ring.read_span(), "consume beyond readable span");
        ring.advance_read(count);
        self.owner.take(&mut ring, count);
    }
}
