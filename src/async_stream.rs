use tokio::io::{AsyncRead, AsyncWrite};

/// Boxable async byte-stream transport (TCP stream, Unix socket, in-memory
/// pipe). TLS engines in this crate read and write wire bytes through this
/// trait and never see the concrete transport type.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: ?Sized + AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}
