//! The five RPC procedures exposed to the (out-of-scope) calling program,
//! plus memsync packing around `call_routine`.
//!
//! Grounded on `windows_rpc::client_binding`'s doc examples
//! (`let client = MyInterfaceClient::new(binding); client.hello()`), but
//! unlike the teacher's proc-macro-generated one-struct-per-interface
//! client, this interface is fixed by spec.md §4.1 -- one hand-written
//! struct is enough.

use std::path::PathBuf;

use ffi_bridge_core::memsync::{MemoryAccess, MemsyncEngine};
use ffi_bridge_core::{
    AbiKind, BridgeError, ErrorKind, MemsyncRule, Request, Response, TypeDescriptor, WireValue,
};

use crate::binding::ClientBinding;

/// A live session with one bridge server.
///
/// One in-flight request at a time -- every method here takes `&mut
/// self` and blocks for the matching response, mirroring the "exactly
/// one suspension point" concurrency model of spec.md §5.
pub struct ClientSession {
    binding: ClientBinding,
    memsync: MemsyncEngine,
}

impl ClientSession {
    pub fn new(binding: ClientBinding, memsync: MemsyncEngine) -> Self {
        Self { binding, memsync }
    }

    fn roundtrip(&mut self, request: Request) -> Result<Response, BridgeError> {
        ffi_bridge_core::wire::write_frame(self.binding.stream_mut(), &request)?;
        ffi_bridge_core::wire::read_frame(self.binding.stream_mut())
    }

    fn roundtrip_bool(&mut self, request: Request) -> Result<bool, BridgeError> {
        match self.roundtrip(request)? {
            Response::Bool(ok) => Ok(ok),
            Response::Error { kind, message, trace } => Err(BridgeError::Remote { kind, message, trace }),
            other => Err(unexpected_response(&other)),
        }
    }

    pub fn access_dll(&mut self, windows_path: String, posix_path: PathBuf, name: String, abi: AbiKind) -> Result<bool, BridgeError> {
        self.roundtrip_bool(Request::AccessDll {
            windows_path,
            posix_path,
            name,
            abi,
        })
    }

    pub fn register_routine(&mut self, posix_path: PathBuf, routine_name: String) -> Result<bool, BridgeError> {
        self.roundtrip_bool(Request::RegisterRoutine {
            posix_path,
            routine_name,
        })
    }

    pub fn register_argtype_and_restype(
        &mut self,
        posix_path: PathBuf,
        routine_name: String,
        arg_descriptors: Vec<TypeDescriptor>,
        return_descriptor: TypeDescriptor,
        memsync_rules: Vec<MemsyncRule>,
    ) -> Result<bool, BridgeError> {
        self.memsync.validate_rules(&memsync_rules)?;
        self.roundtrip_bool(Request::RegisterArgtypeAndRestype {
            posix_path,
            routine_name,
            arg_descriptors,
            return_descriptor,
            memsync_rules,
        })
    }

    /// Calls a registered routine, packing and unpacking the memsync-
    /// covered buffers in `args` around the RPC (spec.md §4.3's
    /// `client_pack`/`client_unpack` phases).
    pub fn call_routine(
        &mut self,
        posix_path: PathBuf,
        routine_name: String,
        mut args: Vec<WireValue>,
        kwargs: Vec<(String, WireValue)>,
        memsync_rules: &[MemsyncRule],
        access: &mut dyn MemoryAccess,
    ) -> Result<WireValue, BridgeError> {
        let memory_packets = self.memsync.client_pack(&args, memsync_rules, access)?;

        let response = self.roundtrip(Request::CallRoutine {
            posix_path,
            routine_name,
            args: args.clone(),
            kwargs,
            memory_packets,
        })?;

        match response {
            Response::Call {
                return_value,
                memory_packets,
            } => {
                self.memsync.client_unpack(&mut args, &memory_packets, memsync_rules, access)?;
                Ok(return_value)
            }
            Response::Error { kind, message, trace } => Err(BridgeError::Remote { kind, message, trace }),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Sends `Terminate`, blocks for the acknowledgement, then drops the
    /// connection (spec.md §4.5: the client always initiates shutdown).
    pub fn terminate(mut self) -> Result<(), BridgeError> {
        match self.roundtrip(Request::Terminate)? {
            Response::Terminated => Ok(()),
            Response::Error { kind, message, trace } => Err(BridgeError::Remote { kind, message, trace }),
            other => Err(unexpected_response(&other)),
        }
    }
}

fn unexpected_response(response: &Response) -> BridgeError {
    BridgeError::Remote {
        kind: ErrorKind::TransportError,
        message: format!("unexpected response variant: {response:?}"),
        trace: String::new(),
    }
}
