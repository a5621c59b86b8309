//! End-to-end client/server integration tests, in the shape of
//! `windows_rpc/tests/test_client_server.rs`: start a server, connect a
//! client, call a routine, assert on the result.
//!
//! Gated on `cfg(windows)` for the whole file -- unlike the teacher's
//! tests, which exercise a loopback-only fake RPC interface, these calls
//! go all the way into `kernel32.dll`, so they can only run on an actual
//! Windows/Wine host. `struct_embedded_pointer` and
//! `dll_allocated_output_pointer` have no suitable fixture in
//! `kernel32.dll` and are covered instead by `ffi_bridge_core`'s own
//! `#[cfg(test)]` unit tests next to `memsync.rs`/`marshal.rs`. There is
//! no `unknown_scalar_falls_back_to_opaque` scenario anywhere in this
//! workspace: `ScalarName`/`TypeDescriptor` are closed enums shared at
//! compile time by both sides, so an "unrecognized scalar name" can never
//! reach the marshaller at runtime -- see DESIGN.md.
#![cfg(windows)]

use std::path::PathBuf;
use std::thread;

use ffi_bridge_client::binding::ClientBinding;
use ffi_bridge_client::session::ClientSession;
use ffi_bridge_core::memsync::{MemoryAccess, MemsyncEngine, WideCharPolicy};
use ffi_bridge_core::{
    AbiKind, LengthOp, LengthSpec, MemsyncRule, PathElement, PointerValue, ScalarName, ScalarValue, TypeDescriptor,
    WireValue,
};
use ffi_bridge_server::alloc::NativeMemory;
use ffi_bridge_server::ServerEndpoint;

fn spawn_server() -> (u16, thread::JoinHandle<()>) {
    let mut endpoint = ServerEndpoint::new(0, WideCharPolicy::default()).expect("failed to bind server endpoint");
    let port = endpoint.port();
    let handle = thread::spawn(move || {
        endpoint.serve_forever().expect("server session loop failed");
    });
    (port, handle)
}

fn kernel32_session() -> (ClientSession, PathBuf, thread::JoinHandle<()>) {
    let (port, server) = spawn_server();
    let binding = ClientBinding::connect("127.0.0.1", port).expect("failed to connect to server");
    let mut session = ClientSession::new(binding, MemsyncEngine::new(WideCharPolicy::default()));

    let posix_path = PathBuf::from("kernel32.dll");
    session
        .access_dll("kernel32.dll".into(), posix_path.clone(), "kernel32".into(), AbiKind::Cdecl)
        .expect("access_dll failed");

    (session, posix_path, server)
}

#[test]
fn scalar_round_trip() {
    let (mut session, posix_path, server) = kernel32_session();

    session
        .register_routine(posix_path.clone(), "GetCurrentProcessId".into())
        .expect("register_routine failed");
    session
        .register_argtype_and_restype(
            posix_path.clone(),
            "GetCurrentProcessId".into(),
            vec![],
            TypeDescriptor::Scalar(ScalarName::Uint32),
            vec![],
        )
        .expect("register_argtype_and_restype failed");

    let mut mem = NativeMemory;
    let result = session
        .call_routine(posix_path, "GetCurrentProcessId".into(), vec![], vec![], &[], &mut mem)
        .expect("call_routine failed");

    match result {
        WireValue::Scalar(ScalarValue::U32(pid)) => assert!(pid > 0, "a live process id is never 0"),
        other => panic!("unexpected return value: {other:?}"),
    }

    session.terminate().expect("terminate failed");
    server.join().expect("server thread panicked");
}

#[test]
fn null_terminated_string_in() {
    let (mut session, posix_path, server) = kernel32_session();

    session
        .register_routine(posix_path.clone(), "lstrlenA".into())
        .expect("register_routine failed");

    let rule = MemsyncRule {
        pointer_path: vec![PathElement::Index(0)],
        length: LengthSpec::Computed {
            paths: vec![vec![PathElement::Index(0)]],
            op: LengthOp::NullTerminatedPlusOne,
        },
        element_size: 1,
        is_wide: false,
        coerce_descriptor: None,
    };
    session
        .register_argtype_and_restype(
            posix_path.clone(),
            "lstrlenA".into(),
            vec![TypeDescriptor::opaque()],
            TypeDescriptor::Scalar(ScalarName::Int32),
            vec![rule.clone()],
        )
        .expect("register_argtype_and_restype failed");

    let mut mem = NativeMemory;
    let addr = mem.allocate(6).expect("allocate failed");
    mem.write(addr, b"hello\0").expect("write failed");

    let args = vec![WireValue::Pointer(PointerValue::Address(addr))];
    let result = session
        .call_routine(posix_path, "lstrlenA".into(), args, vec![], &[rule], &mut mem)
        .expect("call_routine failed");

    match result {
        WireValue::Scalar(ScalarValue::I32(len)) => assert_eq!(len, 5),
        other => panic!("unexpected return value: {other:?}"),
    }

    session.terminate().expect("terminate failed");
    server.join().expect("server thread panicked");
}

#[test]
fn wide_string_out_param() {
    let (mut session, posix_path, server) = kernel32_session();

    session
        .register_routine(posix_path.clone(), "GetModuleFileNameW".into())
        .expect("register_routine failed");

    const BUF_CHARS: u32 = 260;
    let rule = MemsyncRule {
        pointer_path: vec![PathElement::Index(1)],
        length: LengthSpec::Path(vec![PathElement::Index(2)]),
        element_size: 2,
        is_wide: true,
        coerce_descriptor: None,
    };
    session
        .register_argtype_and_restype(
            posix_path.clone(),
            "GetModuleFileNameW".into(),
            vec![
                TypeDescriptor::opaque(),
                TypeDescriptor::opaque(),
                TypeDescriptor::Scalar(ScalarName::Uint32),
            ],
            TypeDescriptor::Scalar(ScalarName::Uint32),
            vec![rule.clone()],
        )
        .expect("register_argtype_and_restype failed");

    let mut mem = NativeMemory;
    let out_addr = mem.allocate(BUF_CHARS as usize * 2).expect("allocate failed");

    let args = vec![
        WireValue::Pointer(PointerValue::Null),
        WireValue::Pointer(PointerValue::Address(out_addr)),
        WireValue::Scalar(ScalarValue::U32(BUF_CHARS)),
    ];
    let result = session
        .call_routine(posix_path, "GetModuleFileNameW".into(), args, vec![], &[rule], &mut mem)
        .expect("call_routine failed");

    match result {
        WireValue::Scalar(ScalarValue::U32(chars_written)) => assert!(chars_written > 0),
        other => panic!("unexpected return value: {other:?}"),
    }

    session.terminate().expect("terminate failed");
    server.join().expect("server thread panicked");
}
