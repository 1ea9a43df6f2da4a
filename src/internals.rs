//! Typed handles into a TLS engine's private receive-side state.
//!
//! This is the only place the adapter touches engine internals, and it does
//! so through an explicit per-engine compatibility shim: each supported
//! engine exposes its receive half as a [`ReadHalf`] behind the exact
//! `tokio::sync::Mutex` its own read path locks. Engines that cannot expose
//! this shape are unsupported and fail binding loudly instead of being
//! misread.

use std::any::Any;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::Mutex;

use crate::backend::{BackendOps, resolve_backend};
use crate::error::BindingError;
use crate::record_buf::RecordBuffer;
use crate::tls_conn::TlsConn;

/// View of one engine's receive half, valid only while its half-duplex lock
/// is held. The engine still owns all of this state; the adapter mutates it
/// only through backend operations and the plaintext drain.
pub trait ReadHalf: Send {
    /// Raw ciphertext records buffered from the transport.
    fn raw_input(&self) -> &RecordBuffer;

    /// Decrypted-but-unread application data.
    fn plaintext_mut(&mut self) -> &mut BytesMut;

    /// Pending post-handshake messages awaiting processing.
    fn hand(&self) -> &BytesMut;

    /// Concrete-type access for backend operations.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Bound handles into one TLS connection's internals.
///
/// The mutex here is the engine's own receive lock, not a new one: holding
/// it excludes the engine's classic read path, which is what makes direct
/// buffer access safe.
pub struct TlsInternals {
    half: Arc<Mutex<dyn ReadHalf>>,
}

impl TlsInternals {
    pub fn new(half: Arc<Mutex<dyn ReadHalf>>) -> Self {
        Self { half }
    }

    pub(crate) fn half(&self) -> &Arc<Mutex<dyn ReadHalf>> {
        &self.half
    }
}

/// Bind internal-state handles for `conn`, resolving its backend from the
/// registry. Pure inspection: no connection state is mutated, and binding is
/// safe to attempt before the handshake has begun.
pub fn bind_internals(
    conn: &dyn TlsConn,
) -> Result<(TlsInternals, Arc<dyn BackendOps>), BindingError> {
    let backend = resolve_backend(conn).ok_or(BindingError::NoBackend)?;
    log::debug!("binding tls internals via backend: {}", backend.name());
    backend.bind(conn)
}
