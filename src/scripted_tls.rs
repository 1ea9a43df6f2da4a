//! Scripted in-memory TLS engine for adapter tests.
//!
//! Records are injected as pre-framed wire bytes over a channel; the
//! "decryption" step just moves payloads into the plaintext or
//! pending-message buffer according to the record's content type. Alert
//! records close the connection, change-cipher-spec records are used to
//! inject record-processing errors.

use std::any::Any;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use tokio::sync::mpsc;

use crate::backend::{BackendOps, TlsBackend, register_backend};
use crate::error::BindingError;
use crate::internals::{ReadHalf, TlsInternals};
use crate::record_buf::{
    CONTENT_TYPE_ALERT, CONTENT_TYPE_APPLICATION_DATA, CONTENT_TYPE_CHANGE_CIPHER_SPEC,
    CONTENT_TYPE_HANDSHAKE, RecordBuffer, TLS_RECORD_HEADER_SIZE,
};
use crate::tls_conn::TlsConn;

#[derive(Default)]
pub struct ScriptedCounters {
    pub read_records: AtomicUsize,
    pub post_handshake_messages: AtomicUsize,
    /// Set if two callers were ever inside a record operation at once.
    pub overlapping_ops: AtomicBool,
    in_op: AtomicBool,
    pub processed_messages: parking_lot::Mutex<Vec<Vec<u8>>>,
    pub op_delay: parking_lot::Mutex<Option<Duration>>,
}

pub struct ScriptedReadHalf {
    raw_input: RecordBuffer,
    plaintext: BytesMut,
    hand: BytesMut,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: bool,
    counters: Arc<ScriptedCounters>,
}

impl ScriptedReadHalf {
    async fn read_record(&mut self) -> io::Result<()> {
        let overlapped = self.counters.in_op.swap(true, Ordering::SeqCst);
        if overlapped {
            self.counters.overlapping_ops.store(true, Ordering::SeqCst);
        }
        let result = self.read_record_inner().await;
        self.counters.in_op.store(false, Ordering::SeqCst);
        result
    }

    async fn read_record_inner(&mut self) -> io::Result<()> {
        self.counters.read_records.fetch_add(1, Ordering::SeqCst);
        let delay = *self.counters.op_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "scripted connection closed",
            ));
        }
        while !self.raw_input.has_complete_record() {
            match self.incoming.recv().await {
                Some(bytes) => self.raw_input.extend_from_slice(&bytes),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "scripted transport closed",
                    ));
                }
            }
        }
        let total = self
            .raw_input
            .first_record_len()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing record header"))?;
        let record_type = self
            .raw_input
            .first_record_type()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing record type"))?;
        let payload = self.raw_input.as_slice()[TLS_RECORD_HEADER_SIZE..total].to_vec();
        self.raw_input.consume(total);
        match record_type {
            CONTENT_TYPE_APPLICATION_DATA => {
                self.plaintext.extend_from_slice(&payload);
                Ok(())
            }
            CONTENT_TYPE_HANDSHAKE => {
                self.hand.put_u16(payload.len() as u16);
                self.hand.extend_from_slice(&payload);
                Ok(())
            }
            CONTENT_TYPE_ALERT => {
                self.closed = true;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "scripted close notify",
                ))
            }
            CONTENT_TYPE_CHANGE_CIPHER_SPEC => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "scripted record error",
            )),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown scripted record type: {other}"),
            )),
        }
    }

    fn process_post_handshake_message(&mut self) -> io::Result<()> {
        self.counters
            .post_handshake_messages
            .fetch_add(1, Ordering::SeqCst);
        if self.hand.len() < 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "truncated post-handshake message",
            ));
        }
        let len = self.hand.get_u16() as usize;
        if self.hand.len() < len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "truncated post-handshake message body",
            ));
        }
        let message = self.hand.split_to(len);
        self.counters.processed_messages.lock().push(message.to_vec());
        Ok(())
    }
}

impl ReadHalf for ScriptedReadHalf {
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

pub struct ScriptedTlsConn {
    read_half: Arc<tokio::sync::Mutex<ScriptedReadHalf>>,
    handshake_error: Option<(io::ErrorKind, &'static str)>,
    counters: Arc<ScriptedCounters>,
}

impl ScriptedTlsConn {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        Self::with_handshake_result(None)
    }

    pub fn with_handshake_error(
        kind: io::ErrorKind,
        message: &'static str,
    ) -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        Self::with_handshake_result(Some((kind, message)))
    }

    fn with_handshake_result(
        handshake_error: Option<(io::ErrorKind, &'static str)>,
    ) -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        let (sender, incoming) = mpsc::unbounded_channel();
        let counters = Arc::new(ScriptedCounters::default());
        let conn = Arc::new(Self {
            read_half: Arc::new(tokio::sync::Mutex::new(ScriptedReadHalf {
                raw_input: RecordBuffer::new(4096),
                plaintext: BytesMut::new(),
                hand: BytesMut::new(),
                incoming,
                closed: false,
                counters: counters.clone(),
            })),
            handshake_error,
            counters,
        });
        (conn, sender)
    }

    pub fn counters(&self) -> &Arc<ScriptedCounters> {
        &self.counters
    }

    /// Frame a payload as a wire record: type + version + length + payload.
    pub fn encode_record(content_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![content_type, 0x03, 0x03];
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }
}

#[async_trait]
impl TlsConn for ScriptedTlsConn {
    async fn handshake(&self) -> io::Result<()> {
        match self.handshake_error {
            Some((kind, message)) => Err(io::Error::new(kind, message)),
            None => Ok(()),
        }
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut half = self.read_half.lock().await;
        while half.plaintext.is_empty() {
            match half.read_record().await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) => return Err(e),
            }
        }
        let n = buf.len().min(half.plaintext.len());
        buf[..n].copy_from_slice(&half.plaintext[..n]);
        half.plaintext.advance(n);
        Ok(n)
    }

    async fn write_all(&self, _buf: &[u8]) -> io::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct ScriptedBackend;

impl TlsBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn probe(&self, conn: &dyn TlsConn) -> bool {
        conn.as_any().is::<ScriptedTlsConn>()
    }

    fn bind(
        &self,
        conn: &dyn TlsConn,
    ) -> Result<(TlsInternals, Arc<dyn BackendOps>), BindingError> {
        let conn = conn
            .as_any()
            .downcast_ref::<ScriptedTlsConn>()
            .ok_or(BindingError::UnexpectedShape("not a scripted connection"))?;
        let half: Arc<tokio::sync::Mutex<dyn ReadHalf>> = conn.read_half.clone();
        Ok((TlsInternals::new(half), Arc::new(ScriptedOps)))
    }
}

struct ScriptedOps;

#[async_trait]
impl BackendOps for ScriptedOps {
    async fn read_record(&self, half: &mut dyn ReadHalf) -> io::Result<()> {
        let half = half
            .as_any_mut()
            .downcast_mut::<ScriptedReadHalf>()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "not a scripted read half")
            })?;
        half.read_record().await
    }

    async fn process_post_handshake_message(&self, half: &mut dyn ReadHalf) -> io::Result<()> {
        let half = half
            .as_any_mut()
            .downcast_mut::<ScriptedReadHalf>()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "not a scripted read half")
            })?;
        half.process_post_handshake_message()
    }
}

pub fn register_scripted_backend() {
    static REGISTERED: std::sync::Once = std::sync::Once::new();
    REGISTERED.call_once(|| register_backend(Arc::new(ScriptedBackend)));
}
