mod cli;

use clap::Parser;
use ffi_bridge_core::memsync::WideCharPolicy;
use ffi_bridge_server::ServerEndpoint;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::ServerArgs;

fn main() -> std::process::ExitCode {
    let args = ServerArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        session_id = %args.session_id,
        port = args.port,
        log_socket_dir = %args.log_socket_dir.display(),
        "starting ffi-bridge-server"
    );

    let mut endpoint = match ServerEndpoint::new(args.port, WideCharPolicy::default()) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!(error = %e, "failed to bind server endpoint");
            return std::process::ExitCode::FAILURE;
        }
    };

    match endpoint.serve_forever() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "session ended with a transport error");
            std::process::ExitCode::FAILURE
        }
    }
}
