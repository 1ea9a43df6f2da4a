//! Zero-copy read-wait support for TLS streams.
//!
//! A read-waiter replaces the classic `read(&mut [u8])` contract with a
//! buffer-producing one: the caller waits, and receives an owned pooled
//! buffer holding decrypted bytes the moment the engine has any. For
//! supported TLS engines this drives the engine's record machinery directly
//! under its own receive lock, skipping the copy into a caller-supplied
//! slice.
//!
//! Engines are adapted through a backend registry: each backend recognizes
//! one concrete connection type and exposes its receive half. Connections
//! without a matching backend fall back to a copy-based waiter with the same
//! contract.

pub mod async_stream;
pub mod backend;
pub mod buffer;
pub mod error;
pub mod internals;
pub mod read_wait;
pub mod read_wait_stream;
pub mod record_buf;
pub mod rustls_stream;
pub mod tls_conn;

#[cfg(test)]
mod scripted_tls;

pub use async_stream::AsyncStream;
pub use backend::{BackendOps, TlsBackend, register_backend, resolve_backend};
pub use buffer::{Buffer, BufferPool};
pub use error::{BindingError, ReadWaitError};
pub use internals::{ReadHalf, TlsInternals, bind_internals};
pub use read_wait::{CopyReadWaiter, PostReturnFn, ReadWaitOptions, ReadWaiter, read_waiter_for};
pub use read_wait_stream::ReadWaitStream;
pub use rustls_stream::{RustlsBackend, RustlsStream, register_rustls_backend};
pub use tls_conn::TlsConn;
