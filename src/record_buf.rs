//! Fixed-capacity sliding buffer for buffered TLS wire records.
//!
//! Incoming ciphertext is appended at the end and consumed record-by-record
//! from the front. A linear layout with lazy compaction via `copy_within()`
//! is used instead of a ring buffer because record feeding needs contiguous
//! `&[u8]` slices.

pub const CONTENT_TYPE_CHANGE_CIPHER_SPEC: u8 = 0x14;
pub const CONTENT_TYPE_ALERT: u8 = 0x15;
pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
pub const CONTENT_TYPE_APPLICATION_DATA: u8 = 0x17;

/// Max TLS ciphertext fragment: 16KB plaintext plus AEAD expansion.
pub const MAX_TLS_CIPHERTEXT_LEN: usize = 16384 + 256;

/// TLS record header: content type (1) + version (2) + length (2).
pub const TLS_RECORD_HEADER_SIZE: usize = 5;

/// Largest complete record we will buffer.
pub const TLS_MAX_RECORD_SIZE: usize = MAX_TLS_CIPHERTEXT_LEN + TLS_RECORD_HEADER_SIZE;

/// Ciphertext buffer capacity: room for one max-size record plus the start
/// of the next, so a full record can complete without compaction.
pub const CIPHERTEXT_READ_BUF_CAPACITY: usize = TLS_MAX_RECORD_SIZE * 2;

/// Sliding buffer of raw TLS records as they arrived on the wire.
///
/// The first bytes of the buffer are always the start of a record header, so
/// `first_record_type` and `has_complete_record` can inspect the framing of
/// the next record without consuming it.
pub struct RecordBuffer {
    data: Box<[u8]>,
    /// Start offset of buffered data (inclusive).
    start: usize,
    /// End offset of buffered data (exclusive).
    end: usize,
}

impl RecordBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
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

    /// Space available for writing at the end. Space consumed from the front
    /// is only reclaimed by `compact()`.
    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.data.len() - self.end
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Writable region at the end of the buffer. After writing, call
    /// `advance_write(n)` to mark bytes as buffered.
    #[inline]
    pub fn write_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    #[inline]
    pub fn advance_write(&mut self, n: usize) {
        debug_assert!(
            self.end + n <= self.data.len(),
            "RecordBuffer advance_write overflow: end={}, n={}, capacity={}",
            self.end,
            n,
            self.data.len()
        );
        self.end += n;
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        debug_assert!(
            self.remaining_capacity() >= data.len(),
            "RecordBuffer overflow: need {} bytes, have {}",
            data.len(),
            self.remaining_capacity()
        );
        let end = self.end;
        self.data[end..end + data.len()].copy_from_slice(data);
        self.end += data.len();
    }

    /// Consume n bytes from the front, e.g. one complete record.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(
            n <= self.len(),
            "RecordBuffer consume underflow: n={}, len={}",
            n,
            self.len()
        );
        self.start += n;
        if self.start >= self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Move buffered data to the front, reclaiming consumed space.
    pub fn compact(&mut self) {
        if self.start > 0 && self.start < self.end {
            self.data.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        } else if self.start >= self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    #[inline]
    fn get_u16_be(&self, offset: usize) -> Option<u16> {
        if offset + 2 <= self.len() {
            let idx = self.start + offset;
            Some(u16::from_be_bytes([self.data[idx], self.data[idx + 1]]))
        } else {
            None
        }
    }

    /// Content type byte of the next buffered record, if its header byte
    /// has arrived.
    #[inline]
    pub fn first_record_type(&self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            Some(self.data[self.start])
        }
    }

    /// Total wire length (header + payload) of the next record, if the full
    /// header has arrived.
    #[inline]
    pub fn first_record_len(&self) -> Option<usize> {
        self.get_u16_be(3)
            .map(|payload_len| TLS_RECORD_HEADER_SIZE + payload_len as usize)
    }

    /// Whether the next record is fully buffered.
    #[inline]
    pub fn has_complete_record(&self) -> bool {
        match self.first_record_len() {
            Some(total) => self.len() >= total,
            None => false,
        }
    }
}
