//! Process-wide registry of TLS engine backends.
//!
//! A backend adapts one concrete TLS engine type to the read-wait layer: it
//! can recognize connections of its engine (`probe`), expose their internal
//! receive state (`bind`), and drive the engine's record machinery one step
//! at a time (`BackendOps`). Registration is append-only and happens at
//! process start, before any connection is wrapped; registration order is
//! the resolution tie-break.

use std::io;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::BindingError;
use crate::internals::{ReadHalf, TlsInternals};
use crate::tls_conn::TlsConn;

/// Record-level operations on one engine's receive half. All methods are
/// called with the engine's half-duplex lock held (the `&mut dyn ReadHalf`
/// comes out of the locked guard) and must not re-acquire it.
#[async_trait]
pub trait BackendOps: Send + Sync {
    /// Read and decrypt exactly one TLS record, appending any application
    /// data to the plaintext buffer and any handshake payload to the
    /// pending-message buffer.
    async fn read_record(&self, half: &mut dyn ReadHalf) -> io::Result<()>;

    /// Consume one pending post-handshake message (e.g. a session ticket
    /// update) from the pending-message buffer.
    async fn process_post_handshake_message(&self, half: &mut dyn ReadHalf) -> io::Result<()>;
}

/// One supported TLS engine.
pub trait TlsBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this backend supports the connection's concrete type.
    fn probe(&self, conn: &dyn TlsConn) -> bool;

    /// Expose the connection's internal receive state and this backend's
    /// record operations. Must not mutate connection state.
    fn bind(&self, conn: &dyn TlsConn)
    -> Result<(TlsInternals, Arc<dyn BackendOps>), BindingError>;
}

static REGISTRY: LazyLock<RwLock<Vec<Arc<dyn TlsBackend>>>> =
    LazyLock::new(|| RwLock::new(Vec::new()));

/// Append a backend to the registry. Call once per supported engine at
/// process start; there is no unregistration.
pub fn register_backend(backend: Arc<dyn TlsBackend>) {
    log::debug!("registering tls backend: {}", backend.name());
    REGISTRY.write().push(backend);
}

/// Resolve the backend for a connection: first probe match in registration
/// order. At most one backend should ever match a given concrete type;
/// multiple matches are a configuration error and are logged.
pub fn resolve_backend(conn: &dyn TlsConn) -> Option<Arc<dyn TlsBackend>> {
    let registry = REGISTRY.read();
    let mut matches = registry.iter().filter(|backend| backend.probe(conn));
    let resolved = matches.next()?.clone();
    let ambiguous: Vec<&'static str> = matches.map(|backend| backend.name()).collect();
    if !ambiguous.is_empty() {
        // a misregistration, not a per-connection condition; warn once
        static WARNED: std::sync::Once = std::sync::Once::new();
        WARNED.call_once(|| {
            log::warn!(
                "multiple tls backends match connection: using {}, ignoring {:?}",
                resolved.name(),
                ambiguous
            );
        });
    }
    Some(resolved)
}
