//! Server-side listen/accept lifecycle.
//!
//! Grounded on `windows_rpc::server_binding::ServerBinding` -- same state
//! machine (unregistered -> registered -> listening -> stopped) and the
//! same idempotent `register`, rebuilt over a `TcpListener` instead of
//! `RpcServerRegisterIf3`/`RpcServerListen` since there is no Windows RPC
//! runtime on the other end of this wire. `Drop` still does best-effort
//! cleanup, matching the teacher's `Drop for ServerBinding`.

use std::net::{TcpListener, TcpStream};

use tracing::info;

/// Owns the listening socket for one bridge session.
pub struct ServerBinding {
    listener: TcpListener,
    port: u16,
    registered: bool,
}

impl ServerBinding {
    /// Binds to `port` on loopback. Analogous to the teacher's
    /// `ServerBinding::new` registering a protocol sequence + endpoint;
    /// here that's just the bind itself.
    pub fn new(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            registered: false,
        })
    }

    /// Marks the endpoint ready to accept connections. Idempotent, like
    /// the teacher's `register()`.
    pub fn register(&mut self) {
        if self.registered {
            return;
        }
        self.registered = true;
        info!(port = self.port, "server binding registered");
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Blocks for the next incoming connection. Per spec.md §5 there is
    /// exactly one session per server process, so this is called once.
    pub fn accept(&self) -> std::io::Result<TcpStream> {
        if !self.registered {
            return Err(std::io::Error::other("binding not registered"));
        }
        let (stream, _addr) = self.listener.accept()?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Drop for ServerBinding {
    fn drop(&mut self) {
        if self.registered {
            info!(port = self.port, "server binding stopped");
        }
    }
}
