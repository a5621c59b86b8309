//! Routes a `call_routine` request into a native call via `libffi`.
//!
//! Grounded on `pycrosscall/_server_.py`'s `__call_dll_routine__`: look up
//! the method handler, call it with the unpacked arguments, treat a
//! `c_void_p` restype as "no return value", catch and report failures.
//! `libffi` itself is an enrichment import with no counterpart in the
//! example pack -- the direct Rust analogue of what `ctypes` does
//! internally to call a function pointer whose argument types are only
//! known at runtime (see DESIGN.md).

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use ffi_bridge_core::error::ErrorKind;
use ffi_bridge_core::marshal::{apply_memsync_to_descriptors, Marshaller};
use ffi_bridge_core::memsync::{MemoryPacket, MemsyncEngine};
use ffi_bridge_core::{AbiKind, BridgeError, TypeDescriptor, WireValue};
use libffi::middle::{Arg, Builder, Cif, CodePtr, Type};
use tracing::{error, instrument};

use crate::alloc::{self, NativeMemory};
use crate::library::LibraryTable;

pub struct Dispatcher {
    pub libraries: LibraryTable,
    memsync: MemsyncEngine,
    memory: NativeMemory,
}

impl Dispatcher {
    pub fn new(memsync: MemsyncEngine) -> Self {
        Self {
            libraries: LibraryTable::new(),
            memsync,
            memory: NativeMemory,
        }
    }

    #[instrument(skip(self, args, kwargs, memory_packets))]
    pub fn call_routine(
        &mut self,
        posix_path: &Path,
        routine_name: &str,
        mut args: Vec<WireValue>,
        kwargs: Vec<(String, WireValue)>,
        mut memory_packets: Vec<MemoryPacket>,
    ) -> Result<(WireValue, Vec<MemoryPacket>), BridgeError> {
        if !kwargs.is_empty() {
            return Err(BridgeError::TypeDescriptor(
                "native routines take positional arguments only".into(),
            ));
        }

        let routine = self
            .libraries
            .routine(posix_path, routine_name)
            .map_err(|e| BridgeError::TypeDescriptor(e.to_string()))?
            .clone();
        let abi = self
            .libraries
            .abi_of(posix_path)
            .map_err(|e| BridgeError::TypeDescriptor(e.to_string()))?;

        let mut arg_descriptors = routine.argument_descriptors.clone();
        apply_memsync_to_descriptors(&mut arg_descriptors, &routine.memsync_rules);

        self.memsync
            .server_unpack(&mut args, &mut memory_packets, &routine.memsync_rules, &mut self.memory)?;

        let mut buffers = Vec::with_capacity(args.len());
        for (descriptor, value) in arg_descriptors.iter().zip(&args) {
            let mut buf = Vec::new();
            Marshaller::from_wire(descriptor, value, &mut buf)?;
            buffers.push(buf);
        }

        let cif = build_cif(&arg_descriptors, &routine.return_descriptor, abi);
        let ffi_args: Vec<Arg> = buffers.iter().map(|b| Arg::new(&b[0])).collect();
        let code = CodePtr::from_ptr(routine.symbol as *const _);

        let call = AssertUnwindSafe(|| unsafe { cif.call::<[u8; 64]>(code, &ffi_args) });
        let raw_result = panic::catch_unwind(call).map_err(|_| {
            error!(routine = routine_name, "native call panicked");
            BridgeError::Remote {
                kind: ErrorKind::NativeCallError,
                message: format!("native call to {routine_name} panicked"),
                trace: String::new(),
            }
        })?;

        let return_value = if matches!(routine.return_descriptor, TypeDescriptor::Void) {
            WireValue::Void
        } else {
            let size = routine.return_descriptor.layout().0;
            Marshaller::to_wire(&routine.return_descriptor, &raw_result[..size])?
        };

        self.memsync
            .server_pack(&args, &mut memory_packets, &routine.memsync_rules, &self.memory)?;

        for packet in &memory_packets {
            if let Some(addr) = packet.remote_address {
                unsafe { alloc::free(addr) };
            }
        }

        Ok((return_value, memory_packets))
    }
}

fn to_middle_type(descriptor: &TypeDescriptor) -> Type {
    match descriptor {
        TypeDescriptor::Void => Type::void(),
        TypeDescriptor::Scalar(name) => scalar_middle_type(*name),
        TypeDescriptor::Pointer(_) | TypeDescriptor::FunctionPointer => Type::pointer(),
        TypeDescriptor::Array { element, count } => Type::structure(std::iter::repeat_with(|| to_middle_type(element)).take(*count)),
        TypeDescriptor::Struct(fields) | TypeDescriptor::Union(fields) => {
            Type::structure(fields.iter().map(|f| to_middle_type(&f.descriptor)))
        }
    }
}

fn scalar_middle_type(name: ffi_bridge_core::ScalarName) -> Type {
    use ffi_bridge_core::ScalarName::*;
    match name {
        Bool | Int8 | Char => Type::i8(),
        Uint8 | Uchar => Type::u8(),
        Int16 => Type::i16(),
        Uint16 | Wchar => Type::u16(),
        Int32 => Type::i32(),
        Uint32 => Type::u32(),
        Int64 | SsizeT => Type::i64(),
        Uint64 | SizeT => Type::u64(),
        Float32 => Type::f32(),
        Float64 | LongDouble => Type::f64(),
        CharPtr | WcharPtr | VoidPtr => Type::pointer(),
    }
}

/// `AbiKind::Stdcall`/`Windows` and `Cdecl` both resolve to the platform's
/// default calling convention here: `libffi`'s `Builder` always builds
/// the default ABI for the host, which on x86_64 Windows is the single
/// Microsoft x64 convention both `__stdcall` and `__cdecl` collapse into.
/// Kept as an explicit match (rather than discarding `abi` entirely) so a
/// 32-bit target -- where the two conventions do differ -- has a single
/// place to plug in `Builder::abi(...)`.
fn build_cif(arg_descriptors: &[TypeDescriptor], return_descriptor: &TypeDescriptor, abi: AbiKind) -> Cif {
    let _ = abi.normalize();
    let mut builder = Builder::new();
    for descriptor in arg_descriptors {
        builder = builder.arg(to_middle_type(descriptor));
    }
    builder.res(to_middle_type(return_descriptor)).into_cif()
}
