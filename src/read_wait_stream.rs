//! Zero-copy read-wait adapter over a TLS connection.
//!
//! Instead of copying decrypted data into a caller-supplied slice, the
//! adapter drives the wrapped engine's record machinery directly — under the
//! engine's own half-duplex lock — and hands the caller an owned pooled
//! buffer as soon as decrypted application data exists in the engine's
//! internal buffer. This removes one copy per read relative to the classic
//! `read()` path.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Buf;
use parking_lot::Mutex;

use crate::backend::BackendOps;
use crate::buffer::Buffer;
use crate::error::{BindingError, ReadWaitError};
use crate::internals::{TlsInternals, bind_internals};
use crate::read_wait::{ReadWaitOptions, ReadWaiter};
use crate::record_buf::CONTENT_TYPE_ALERT;
use crate::tls_conn::TlsConn;

enum AdapterState {
    HandshakePending,
    Ready,
    Failed {
        handshake: bool,
        kind: io::ErrorKind,
        message: String,
    },
}

/// Buffer-producing wrapper around a TLS connection.
///
/// Construction binds the connection's internal state through the backend
/// registry; a connection with no matching backend is rejected untouched.
/// Once a wait call fails with a handshake or record error the adapter is
/// failed for good: every later call returns an error of the same class.
pub struct ReadWaitStream {
    conn: Arc<dyn TlsConn>,
    internals: TlsInternals,
    ops: Arc<dyn BackendOps>,
    options: Mutex<Option<ReadWaitOptions>>,
    state: Mutex<AdapterState>,
}

impl ReadWaitStream {
    pub fn new(conn: Arc<dyn TlsConn>) -> Result<Self, BindingError> {
        let (internals, ops) = bind_internals(conn.as_ref())?;
        Ok(Self {
            conn,
            internals,
            ops,
            options: Mutex::new(None),
            state: Mutex::new(AdapterState::HandshakePending),
        })
    }

    pub fn conn(&self) -> &Arc<dyn TlsConn> {
        &self.conn
    }

    fn sticky_error(&self) -> Option<ReadWaitError> {
        match &*self.state.lock() {
            AdapterState::Failed {
                handshake,
                kind,
                message,
            } => {
                let err = io::Error::new(*kind, message.clone());
                Some(if *handshake {
                    ReadWaitError::Handshake(err)
                } else {
                    ReadWaitError::Record(err)
                })
            }
            _ => None,
        }
    }

    fn fail(&self, handshake: bool, err: &io::Error) {
        *self.state.lock() = AdapterState::Failed {
            handshake,
            kind: err.kind(),
            message: err.to_string(),
        };
    }

    fn mark_ready(&self) {
        let mut state = self.state.lock();
        if matches!(*state, AdapterState::HandshakePending) {
            *state = AdapterState::Ready;
        }
    }
}

#[async_trait]
impl ReadWaiter for ReadWaitStream {
    fn initialize_read_waiter(&self, options: ReadWaitOptions) -> bool {
        let mut slot = self.options.lock();
        if slot.is_none() {
            *slot = Some(options);
        } else {
            log::warn!("read-wait options already initialized, keeping existing configuration");
        }
        // buffers are produced from our own pool, no caller-side copy needed
        false
    }

    async fn wait_read_buffer(&self) -> Result<Buffer, ReadWaitError> {
        if let Some(err) = self.sticky_error() {
            return Err(err);
        }
        let options = self
            .options
            .lock()
            .clone()
            .ok_or_else(|| ReadWaitError::Buffer("read waiter not initialized".to_string()))?;

        if let Err(err) = self.conn.handshake().await {
            self.fail(true, &err);
            return Err(ReadWaitError::Handshake(err));
        }
        self.mark_ready();

        let mut half = self.internals.half().lock().await;
        while half.plaintext_mut().is_empty() {
            if let Err(err) = self.ops.read_record(&mut *half).await {
                self.fail(false, &err);
                return Err(ReadWaitError::Record(err));
            }
            // the engine may interleave post-handshake messages with data;
            // drain them all before re-checking for application bytes
            while !half.hand().is_empty() {
                if let Err(err) = self.ops.process_post_handshake_message(&mut *half).await {
                    self.fail(false, &err);
                    return Err(ReadWaitError::Record(err));
                }
            }
        }

        let mut buffer = options.new_buffer()?;
        if buffer.free_len() == 0 {
            return Err(ReadWaitError::Buffer(
                "produced buffer has no free capacity".to_string(),
            ));
        }
        let drained = {
            let plaintext = half.plaintext_mut();
            let n = buffer.free_len().min(plaintext.len());
            buffer.free_mut()[..n].copy_from_slice(&plaintext[..n]);
            buffer.truncate(n);
            plaintext.advance(n);
            plaintext.is_empty()
        };

        // Alert short-circuit: when a connection-closing alert is already
        // buffered behind the data we just produced, consume it now so the
        // caller learns about the close on its next call instead of one
        // round-trip later. The speculative read's error is discarded: the
        // produced buffer is valid and must still be returned.
        if !buffer.is_empty()
            && drained
            && half.raw_input().has_complete_record()
            && half.raw_input().first_record_type() == Some(CONTENT_TYPE_ALERT)
        {
            let _ = self.ops.read_record(&mut *half).await;
        }
        drop(half);

        options.post_return(&buffer);
        Ok(buffer)
    }
}

// The adapter still behaves as an ordinary TLS connection, so callers that
// negotiated the capability can keep using the classic paths for writes and
// shutdown.
#[async_trait]
impl TlsConn for ReadWaitStream {
    async fn handshake(&self) -> io::Result<()> {
        self.conn.handshake().await
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.conn.read(buf).await
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.conn.write_all(buf).await
    }

    async fn shutdown(&self) -> io::Result<()> {
        self.conn.shutdown().await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
