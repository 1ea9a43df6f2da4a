//! rustls-backed TLS connection with an exposed receive half.
//!
//! The stream drives a `rustls::Connection` record-by-record over a boxed
//! transport, split into independent halves so readers and writers never
//! block each other:
//!   - the session state machine sits behind its own short-held
//!     `parking_lot::Mutex`, shared by both halves and never held across a
//!     transport await;
//!   - the receive half (transport read side plus the receive buffers) sits
//!     behind the `tokio::sync::Mutex` the read-wait backend binds as the
//!     half-duplex lock, held for a full record drain;
//!   - the send half (transport write side) sits behind a second
//!     `tokio::sync::Mutex` serializing writers only.
//! A writer therefore proceeds while a reader is parked on the network
//! waiting for the next record.

use std::any::Any;
use std::io;
use std::io::{Read as _, Write as _};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf as IoReadHalf, WriteHalf as IoWriteHalf};
use tokio::sync::Mutex;

use crate::async_stream::AsyncStream;
use crate::backend::{BackendOps, TlsBackend, register_backend};
use crate::error::BindingError;
use crate::internals::{ReadHalf, TlsInternals};
use crate::record_buf::{CIPHERTEXT_READ_BUF_CAPACITY, RecordBuffer, TLS_MAX_RECORD_SIZE};
use crate::tls_conn::TlsConn;

pub struct RustlsStream {
    session: Arc<parking_lot::Mutex<rustls::Connection>>,
    read_half: Arc<Mutex<RustlsReadHalf>>,
    write_half: Mutex<RustlsWriteHalf>,
}

/// Receive half: the transport read side and everything the read path
/// buffers. Holds its own handle to the session for feeding records; the
/// session lock is only taken around `read_tls`/`process_new_packets`, never
/// across the transport read.
pub struct RustlsReadHalf {
    session: Arc<parking_lot::Mutex<rustls::Connection>>,
    transport: IoReadHalf<Box<dyn AsyncStream>>,
    raw_input: RecordBuffer,
    plaintext: BytesMut,
    /// Always empty: rustls consumes post-handshake messages (key updates,
    /// session tickets) internally during record processing.
    hand: BytesMut,
    peer_closed: bool,
}

struct RustlsWriteHalf {
    transport: IoWriteHalf<Box<dyn AsyncStream>>,
}

impl RustlsStream {
    pub fn new_client(
        config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
        transport: Box<dyn AsyncStream>,
    ) -> io::Result<Arc<Self>> {
        let session = rustls::ClientConnection::new(config, server_name)
            .map_err(io::Error::other)?;
        Ok(Self::from_session(rustls::Connection::Client(session), transport))
    }

    pub fn new_server(
        config: Arc<rustls::ServerConfig>,
        transport: Box<dyn AsyncStream>,
    ) -> io::Result<Arc<Self>> {
        let session = rustls::ServerConnection::new(config).map_err(io::Error::other)?;
        Ok(Self::from_session(rustls::Connection::Server(session), transport))
    }

    fn from_session(session: rustls::Connection, transport: Box<dyn AsyncStream>) -> Arc<Self> {
        let session = Arc::new(parking_lot::Mutex::new(session));
        let (read_transport, write_transport) = tokio::io::split(transport);
        Arc::new(Self {
            session: session.clone(),
            read_half: Arc::new(Mutex::new(RustlsReadHalf {
                session,
                transport: read_transport,
                raw_input: RecordBuffer::new(CIPHERTEXT_READ_BUF_CAPACITY),
                plaintext: BytesMut::new(),
                hand: BytesMut::new(),
                peer_closed: false,
            })),
            write_half: Mutex::new(RustlsWriteHalf {
                transport: write_transport,
            }),
        })
    }
}

impl RustlsReadHalf {
    /// Buffer wire bytes until one complete record is available.
    async fn fill_record(&mut self) -> io::Result<()> {
        while !self.raw_input.has_complete_record() {
            if let Some(total) = self.raw_input.first_record_len()
                && total > TLS_MAX_RECORD_SIZE
            {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("oversized tls record: {total} bytes"),
                ));
            }
            if self.raw_input.remaining_capacity() == 0 {
                self.raw_input.compact();
            }
            let n = self.transport.read(self.raw_input.write_slice()).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "transport closed inside tls stream",
                ));
            }
            self.raw_input.advance_write(n);
        }
        Ok(())
    }

    /// Feed exactly one buffered record into the session and drain any
    /// plaintext it produced. The session lock is held only for this call.
    fn feed_record(&mut self) -> io::Result<()> {
        let Some(total) = self.raw_input.first_record_len() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "record header not buffered",
            ));
        };
        let mut session = self.session.lock();
        {
            let mut cursor = io::Cursor::new(&self.raw_input.as_slice()[..total]);
            while (cursor.position() as usize) < total {
                let n = session.read_tls(&mut cursor)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "tls session refused record bytes",
                    ));
                }
            }
        }
        self.raw_input.consume(total);

        let state = session
            .process_new_packets()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let available = state.plaintext_bytes_to_read();
        if available > 0 {
            let mut chunk = vec![0u8; available];
            session.reader().read_exact(&mut chunk)?;
            self.plaintext.extend_from_slice(&chunk);
        }
        if state.peer_has_closed() {
            self.peer_closed = true;
        }
        Ok(())
    }

    /// Read, feed and decrypt one record.
    async fn read_record(&mut self) -> io::Result<()> {
        if self.peer_closed {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "tls connection closed by peer",
            ));
        }
        self.fill_record().await?;
        self.feed_record()
    }
}

/// Write all pending wire output of the session to the transport. The wire
/// bytes are collected under the session lock, then written with the lock
/// released.
async fn flush_tls_writes(
    session: &parking_lot::Mutex<rustls::Connection>,
    write: &mut RustlsWriteHalf,
) -> io::Result<()> {
    loop {
        let mut wire = Vec::new();
        {
            let mut session = session.lock();
            while session.wants_write() {
                session.write_tls(&mut wire)?;
            }
        }
        if wire.is_empty() {
            break;
        }
        write.transport.write_all(&wire).await?;
    }
    write.transport.flush().await
}

#[async_trait]
impl TlsConn for RustlsStream {
    async fn handshake(&self) -> io::Result<()> {
        if !self.session.lock().is_handshaking() {
            return Ok(());
        }
        let mut read = self.read_half.lock().await;
        let mut write = self.write_half.lock().await;
        loop {
            let (handshaking, wants_write, wants_read) = {
                let session = self.session.lock();
                (
                    session.is_handshaking(),
                    session.wants_write(),
                    session.wants_read(),
                )
            };
            if !handshaking {
                break;
            }
            if wants_write {
                flush_tls_writes(&self.session, &mut write).await?;
                continue;
            }
            if wants_read {
                read.fill_record().await?;
                read.feed_record()?;
                continue;
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "tls handshake stalled",
            ));
        }
        // the final flight may still be pending
        flush_tls_writes(&self.session, &mut write).await?;
        {
            let session = self.session.lock();
            log::debug!(
                "tls handshake complete, version: {:?}, cipher suite: {:?}",
                session.protocol_version(),
                session.negotiated_cipher_suite(),
            );
        }
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.handshake().await?;
        let mut half = self.read_half.lock().await;
        loop {
            if !half.plaintext.is_empty() {
                let n = buf.len().min(half.plaintext.len());
                buf[..n].copy_from_slice(&half.plaintext[..n]);
                half.plaintext.advance(n);
                return Ok(n);
            }
            if half.peer_closed {
                return Ok(0);
            }
            half.read_record().await?;
        }
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.handshake().await?;
        // writers take the send lock only; a reader parked on the network
        // holds the receive lock but not the session lock
        let mut write = self.write_half.lock().await;
        self.session.lock().writer().write_all(buf)?;
        flush_tls_writes(&self.session, &mut write).await
    }

    async fn shutdown(&self) -> io::Result<()> {
        let mut write = self.write_half.lock().await;
        self.session.lock().send_close_notify();
        flush_tls_writes(&self.session, &mut write).await?;
        write.transport.shutdown().await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ReadHalf for RustlsReadHalf {
    fn raw_input(&self) -> &RecordBuffer {
        &self.raw_input
    }

    fn plaintext_mut(&mut self) -> &mut BytesMut {
        &mut self.plaintext
    }

    fn hand(&self) -> &BytesMut {
        &self.hand
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct RustlsBackend;

impl TlsBackend for RustlsBackend {
    fn name(&self) -> &'static str {
        "rustls"
    }

    fn probe(&self, conn: &dyn TlsConn) -> bool {
        conn.as_any().is::<RustlsStream>()
    }

    fn bind(
        &self,
        conn: &dyn TlsConn,
    ) -> Result<(TlsInternals, Arc<dyn BackendOps>), BindingError> {
        let conn = conn
            .as_any()
            .downcast_ref::<RustlsStream>()
            .ok_or(BindingError::UnexpectedShape("not a rustls stream"))?;
        let half: Arc<Mutex<dyn ReadHalf>> = conn.read_half.clone();
        Ok((TlsInternals::new(half), Arc::new(RustlsOps)))
    }
}

struct RustlsOps;

#[async_trait]
impl BackendOps for RustlsOps {
    async fn read_record(&self, half: &mut dyn ReadHalf) -> io::Result<()> {
        let half = half
            .as_any_mut()
            .downcast_mut::<RustlsReadHalf>()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not a rustls read half"))?;
        half.read_record().await
    }

    async fn process_post_handshake_message(&self, half: &mut dyn ReadHalf) -> io::Result<()> {
        // rustls never leaves post-handshake messages pending, so the drain
        // loop has nothing to hand us here
        debug_assert!(half.hand().is_empty());
        Ok(())
    }
}

/// Register the rustls backend. Idempotent.
pub fn register_rustls_backend() {
    static REGISTERED: std::sync::Once = std::sync::Once::new();
    REGISTERED.call_once(|| register_backend(Arc::new(RustlsBackend)));
}
