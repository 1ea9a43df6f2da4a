//! Buffer-producing read capability and the buffer exchange protocol.
//!
//! A read-waiter hands the caller an owned, pooled buffer of received bytes
//! instead of copying into a caller-supplied slice. Streams negotiate the
//! capability once per connection via `initialize_read_waiter`, which also
//! tells the caller whether it still has to copy on its side.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferPool};
use crate::error::ReadWaitError;
use crate::read_wait_stream::ReadWaitStream;
use crate::tls_conn::TlsConn;

pub type PostReturnFn = Arc<dyn Fn(&Buffer) + Send + Sync>;

/// Buffer exchange configuration, supplied once at capability negotiation
/// and immutable for the connection's lifetime: where buffers come from,
/// how much front headroom they carry, and an optional hook invoked with
/// each produced buffer just before it is returned to the caller.
#[derive(Clone)]
pub struct ReadWaitOptions {
    pool: Arc<BufferPool>,
    front_headroom: usize,
    post_return: Option<PostReturnFn>,
}

impl ReadWaitOptions {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            front_headroom: 0,
            post_return: None,
        }
    }

    /// Reserve headroom at the front of every produced buffer so protocol
    /// layers can prepend headers without copying.
    pub fn with_front_headroom(mut self, front_headroom: usize) -> Self {
        self.front_headroom = front_headroom;
        self
    }

    /// Hook invoked exactly once per produced buffer, after the drain lock
    /// is released and before the buffer is returned. Must not block.
    pub fn with_post_return(mut self, hook: PostReturnFn) -> Self {
        self.post_return = Some(hook);
        self
    }

    pub fn front_headroom(&self) -> usize {
        self.front_headroom
    }

    pub(crate) fn new_buffer(&self) -> Result<Buffer, ReadWaitError> {
        self.pool
            .allocate_with_headroom(self.front_headroom)
            .ok_or_else(|| ReadWaitError::Buffer("buffer pool exhausted".to_string()))
    }

    pub(crate) fn post_return(&self, buffer: &Buffer) {
        if let Some(hook) = &self.post_return {
            hook(buffer);
        }
    }
}

/// Buffer-producing read contract.
#[async_trait]
pub trait ReadWaiter: Send + Sync {
    /// Store the buffer exchange configuration. Returns whether the caller
    /// must still perform its own copy on top of the produced buffers.
    fn initialize_read_waiter(&self, options: ReadWaitOptions) -> bool;

    /// Block until received data is available, then return it in an owned
    /// buffer. Never returns an empty buffer without an error.
    async fn wait_read_buffer(&self) -> Result<Buffer, ReadWaitError>;
}

/// Negotiate the read-wait capability for a TLS connection.
///
/// Returns the zero-copy adapter when a registered backend can bind the
/// connection's internals, and otherwise falls back to a classic copy-based
/// waiter that reads through the engine's ordinary read path.
pub fn read_waiter_for(conn: Arc<dyn TlsConn>) -> Box<dyn ReadWaiter> {
    match ReadWaitStream::new(conn.clone()) {
        Ok(stream) => Box::new(stream),
        Err(err) => {
            log::debug!("zero-copy read-wait unavailable, using copy fallback: {err}");
            Box::new(CopyReadWaiter::new(conn))
        }
    }
}

/// Copy-based fallback for connections without a matching backend: each wait
/// is an ordinary read into a pooled buffer.
pub struct CopyReadWaiter {
    conn: Arc<dyn TlsConn>,
    options: Mutex<Option<ReadWaitOptions>>,
}

impl CopyReadWaiter {
    pub fn new(conn: Arc<dyn TlsConn>) -> Self {
        Self {
            conn,
            options: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ReadWaiter for CopyReadWaiter {
    fn initialize_read_waiter(&self, options: ReadWaitOptions) -> bool {
        let mut slot = self.options.lock();
        if slot.is_none() {
            *slot = Some(options);
        } else {
            log::warn!("read-wait options already initialized, keeping existing configuration");
        }
        // the engine copied into our buffer, the caller need not copy again
        true
    }

    async fn wait_read_buffer(&self) -> Result<Buffer, ReadWaitError> {
        let options = self
            .options
            .lock()
            .clone()
            .ok_or_else(|| ReadWaitError::Buffer("read waiter not initialized".to_string()))?;
        self.conn
            .handshake()
            .await
            .map_err(ReadWaitError::Handshake)?;
        let mut buffer = options.new_buffer()?;
        let n = self
            .conn
            .read(buffer.free_mut())
            .await
            .map_err(ReadWaitError::Record)?;
        if n == 0 {
            return Err(ReadWaitError::Record(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            )));
        }
        buffer.truncate(n);
        options.post_return(&buffer);
        Ok(buffer)
    }
}
