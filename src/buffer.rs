//! Pooled, owned byte buffers handed to read-wait callers.
//!
//! A `Buffer` is produced by the read-wait adapter, owned by the caller once
//! returned, and gives its storage back to its `BufferPool` on drop. Front
//! headroom lets protocol layers prepend headers without another copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Bounded pool of fixed-size buffer storage.
///
/// At most `max_in_flight` buffers may be live at once; allocation fails once
/// the limit is reached, which is how a caller that never releases buffers
/// eventually surfaces as an error instead of unbounded memory growth.
pub struct BufferPool {
    buffer_size: usize,
    max_in_flight: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    in_flight: AtomicUsize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_in_flight: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer_size,
            max_in_flight,
            free: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Allocate a buffer, or `None` when the pool is exhausted.
    pub fn allocate(self: &Arc<Self>) -> Option<Buffer> {
        self.allocate_with_headroom(0)
    }

    /// Allocate a buffer with `headroom` bytes reserved at the front.
    pub fn allocate_with_headroom(self: &Arc<Self>, headroom: usize) -> Option<Buffer> {
        if headroom >= self.buffer_size {
            return None;
        }
        if self.in_flight.fetch_add(1, Ordering::AcqRel) >= self.max_in_flight {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        let data = match self.free.lock().pop() {
            Some(data) => data,
            None => vec![0u8; self.buffer_size].into_boxed_slice(),
        };
        Some(Buffer {
            data,
            start: headroom,
            end: headroom,
            pool: Some(self.clone()),
        })
    }

    fn recycle(&self, data: Box<[u8]>) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        let mut free = self.free.lock();
        if free.len() < self.max_in_flight {
            free.push(data);
        }
    }
}

/// An owned byte region: `[0..start)` is headroom, `[start..end)` is content,
/// `[end..capacity)` is free space.
pub struct Buffer {
    data: Box<[u8]>,
    start: usize,
    end: usize,
    pool: Option<Arc<BufferPool>>,
}

impl Buffer {
    /// Standalone buffer with no backing pool.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
            pool: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Unwritten headroom remaining at the front.
    #[inline]
    pub fn headroom(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Free capacity available for writing at the end.
    #[inline]
    pub fn free_len(&self) -> usize {
        self.data.len() - self.end
    }

    /// Writable region at the end. Pair with `truncate` or `advance_write`.
    #[inline]
    pub fn free_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Mark n bytes of `free_mut()` as written content.
    #[inline]
    pub fn advance_write(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.data.len());
        self.end += n;
    }

    /// Set the content length to exactly `len` bytes, measured from the
    /// current content start. Bytes written directly into `free_mut()`
    /// become content; any excess content is dropped.
    pub fn truncate(&mut self, len: usize) {
        debug_assert!(self.start + len <= self.data.len());
        self.end = self.start + len;
    }

    /// Consume n bytes from the front of the content.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.start += n;
    }

    /// Prepend a header into the front headroom.
    ///
    /// # Panics
    /// Panics if the remaining headroom is smaller than the header.
    pub fn prepend(&mut self, header: &[u8]) {
        assert!(
            header.len() <= self.start,
            "buffer headroom too small: need {} bytes, have {}",
            header.len(),
            self.start
        );
        self.start -= header.len();
        self.data[self.start..self.start + header.len()].copy_from_slice(header);
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let data = std::mem::replace(&mut self.data, Box::new([]));
            pool.recycle(data);
        }
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("headroom", &self.start)
            .field("capacity", &self.data.len())
            .finish()
    }
}
