//! Server entry-point arguments (spec.md §6): the session bootstrap
//! collaborator (out of scope) spawns this binary with these four flags.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "ffi-bridge-server", about = "Dispatches DLL calls for one bridge session")]
pub struct ServerArgs {
    /// Opaque session identifier, used only for logging.
    #[arg(long)]
    pub session_id: String,

    /// TCP port to listen on for the client's single connection.
    #[arg(long)]
    pub port: u16,

    /// Directory the (out-of-scope) log transport watches for this
    /// session's log socket.
    #[arg(long)]
    pub log_socket_dir: PathBuf,

    /// Verbosity passed through to `tracing_subscriber`'s env filter.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
