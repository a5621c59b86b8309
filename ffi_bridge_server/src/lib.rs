#![doc = include_str!("../../README.md")]

pub mod alloc;
pub mod binding;
pub mod dispatch;
pub mod library;

pub use binding::ServerBinding;
pub use dispatch::Dispatcher;
pub use ffi_bridge_core as core;
pub use library::LibraryTable;

use ffi_bridge_core::memsync::WideCharPolicy;
use ffi_bridge_core::wire::{read_frame, write_frame};
use ffi_bridge_core::{BridgeError, ErrorKind, MemsyncEngine, Request, Response};
use tracing::{info, warn};

/// Owns the listening socket and the routine registry for one session
/// (spec.md §4.5).
pub struct ServerEndpoint {
    binding: ServerBinding,
    dispatcher: Dispatcher,
}

impl ServerEndpoint {
    pub fn new(port: u16, wide_char_policy: WideCharPolicy) -> std::io::Result<Self> {
        let mut binding = ServerBinding::new(port)?;
        binding.register();
        Ok(Self {
            binding,
            dispatcher: Dispatcher::new(MemsyncEngine::new(wide_char_policy)),
        })
    }

    pub fn port(&self) -> u16 {
        self.binding.port()
    }

    /// Accepts the single client connection for this session and serves
    /// requests until `Request::Terminate` is received, acknowledging it
    /// before shutting down (spec.md §4.1, §4.5).
    pub fn serve_forever(&mut self) -> std::io::Result<()> {
        let mut stream = self.binding.accept()?;
        info!("client connected");

        loop {
            let request: Request = match read_frame(&mut stream) {
                Ok(request) => request,
                Err(BridgeError::Transport(e)) => return Err(e),
                Err(other) => {
                    warn!(error = %other, "failed to decode request");
                    continue;
                }
            };

            let is_terminate = matches!(request, Request::Terminate);
            let response = self.handle(request);
            write_frame(&mut stream, &response).map_err(to_io_error)?;
            if is_terminate {
                info!("session terminated");
                return Ok(());
            }
        }
    }

    fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::AccessDll {
                windows_path,
                posix_path,
                name,
                abi,
            } => match self.dispatcher.libraries.access_dll(windows_path, posix_path, name, abi) {
                Ok(()) => Response::Bool(true),
                Err(e) => error_response(ErrorKind::LibraryLoadError, e.to_string()),
            },
            Request::RegisterRoutine {
                posix_path,
                routine_name,
            } => match self.dispatcher.libraries.register_routine(&posix_path, routine_name) {
                Ok(()) => Response::Bool(true),
                Err(e) => error_response(ErrorKind::SymbolError, e.to_string()),
            },
            Request::RegisterArgtypeAndRestype {
                posix_path,
                routine_name,
                arg_descriptors,
                return_descriptor,
                memsync_rules,
            } => match self.dispatcher.libraries.register_argtype_and_restype(
                &posix_path,
                &routine_name,
                arg_descriptors,
                return_descriptor,
                memsync_rules,
            ) {
                Ok(()) => Response::Bool(true),
                Err(e) => error_response(ErrorKind::TypeDescriptorError, e.to_string()),
            },
            Request::CallRoutine {
                posix_path,
                routine_name,
                args,
                kwargs,
                memory_packets,
            } => match self
                .dispatcher
                .call_routine(&posix_path, &routine_name, args, kwargs, memory_packets)
            {
                Ok((return_value, memory_packets)) => Response::Call {
                    return_value,
                    memory_packets,
                },
                Err(BridgeError::Remote { kind, message, trace }) => Response::Error { kind, message, trace },
                Err(e) => error_response(ErrorKind::NativeCallError, e.to_string()),
            },
            Request::Terminate => Response::Terminated,
        }
    }
}

fn error_response(kind: ErrorKind, message: String) -> Response {
    Response::Error {
        kind,
        message,
        trace: String::new(),
    }
}

fn to_io_error(e: BridgeError) -> std::io::Error {
    std::io::Error::other(e.to_string())
}
