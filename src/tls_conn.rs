use std::any::Any;
use std::io;

use async_trait::async_trait;

/// A TLS connection as seen by the layers above the record engine.
///
/// Methods take `&self`: connection handles are shared across tasks and the
/// engine's internal half-duplex locks serialize readers and writers, the
/// same model as a socket-style connection object. The read-wait adapter
/// borrows access through this trait and never takes over the engine's
/// record processing.
#[async_trait]
pub trait TlsConn: Send + Sync + 'static {
    /// Drive the handshake to completion. Idempotent; concurrent callers are
    /// serialized by the engine's own locks.
    async fn handshake(&self) -> io::Result<()>;

    /// Classic copy-based read of decrypted application data. Returns
    /// `Ok(0)` on clean close (close_notify received).
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Encrypt and write application data.
    async fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Send close_notify and shut down the transport write side.
    async fn shutdown(&self) -> io::Result<()>;

    /// Concrete-type access for backend compatibility probes.
    fn as_any(&self) -> &dyn Any;
}
