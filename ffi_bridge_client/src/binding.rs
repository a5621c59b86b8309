//! Client-side connection handle.
//!
//! Grounded on `windows_rpc::client_binding::ClientBinding` -- same name,
//! same shape (a thin wrapper that owns the connection for as long as the
//! generated/hand-written client struct needs it). The teacher composes an
//! `ncalrpc` binding string and resolves it through the Windows RPC
//! runtime; there is no such runtime on this side of the bridge, so
//! `new` dials a plain `TcpStream` instead. `Drop` is not implemented
//! here (unlike the teacher's `ServerBinding`) because `TcpStream` already
//! closes its socket on drop -- there is no separate unregister step to
//! run first.

use std::net::TcpStream;

/// A connection to the bridge server.
///
/// # Example
///
/// ```rust,no_run
/// use ffi_bridge_client::binding::ClientBinding;
///
/// # fn main() -> std::io::Result<()> {
/// let binding = ClientBinding::connect("127.0.0.1", 4000)?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBinding {
    stream: TcpStream,
}

impl ClientBinding {
    /// Connects to a bridge server already listening at `host:port`
    /// (spec.md §4.5: the session bootstrap collaborator, out of scope
    /// here, is responsible for having started that server first).
    pub fn connect(host: &str, port: u16) -> std::io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Returns the underlying stream for framing reads/writes.
    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}
