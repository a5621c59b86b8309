//! Wire transport: a synchronous request/response channel between client
//! and server (spec.md §4.1).
//!
//! Grounded on `pycrosscall/_server_.py`'s `rpc_server_alternative` /
//! `register_function` table (`access_dll`, `call_dll_routine`,
//! `register_argtype_and_restype`, `register_routine`, `terminate`), ported
//! from an attribute-dispatch RPC table to a single closed `Request` enum.
//! Unlike the teacher crate, this does not use the real Windows RPC
//! runtime (`RpcServerListen` et al. only exist between native Windows
//! peers) -- framing is a private length-prefixed protocol over a blocking
//! `TcpStream`, matching the "single in-flight RPC, one suspension point"
//! concurrency model of spec.md §5.

use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::{AbiKind, MemsyncRule, TypeDescriptor};

/// A scalar value in transit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

/// A pointer value: either null, or a raw address in the sender's address
/// space. Null is a distinct wire value, never an ambiguous zero address
/// (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerValue {
    Null,
    Address(u64),
}

/// The transport-safe form of a native argument or return value
/// (spec.md §4.2). Scalars travel as primitive numbers, aggregates as
/// ordered sequences of marshaled fields/elements, pointers as an address
/// (the bytes they reference, if any, travel separately as
/// [`crate::memsync::MemoryPacket`]s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    /// The sentinel for a `Void`-typed return, distinct from a caller-
    /// visible null pointer (spec.md §4.4, §7).
    Void,
    Scalar(ScalarValue),
    Pointer(PointerValue),
    Sequence(Vec<WireValue>),
    Struct(Vec<(String, WireValue)>),
}

/// A request sent from client to server. The client initiates every
/// procedure except shutdown propagation (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    AccessDll {
        windows_path: String,
        posix_path: PathBuf,
        name: String,
        abi: AbiKind,
    },
    RegisterRoutine {
        posix_path: PathBuf,
        routine_name: String,
    },
    RegisterArgtypeAndRestype {
        posix_path: PathBuf,
        routine_name: String,
        arg_descriptors: Vec<TypeDescriptor>,
        return_descriptor: TypeDescriptor,
        memsync_rules: Vec<MemsyncRule>,
    },
    CallRoutine {
        posix_path: PathBuf,
        routine_name: String,
        args: Vec<WireValue>,
        kwargs: Vec<(String, WireValue)>,
        memory_packets: Vec<crate::memsync::MemoryPacket>,
    },
    Terminate,
}

/// The server's reply to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// `access_dll` / `register_routine` / `register_argtype_and_restype`
    /// success flag (spec.md §4.1: `{0,1}`).
    Bool(bool),
    Call {
        return_value: WireValue,
        memory_packets: Vec<crate::memsync::MemoryPacket>,
    },
    Error {
        kind: ErrorKind,
        message: String,
        trace: String,
    },
    Terminated,
}

/// Writes one length-prefixed, `bincode`-encoded frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), crate::BridgeError> {
    let payload = bincode::serialize(value)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        crate::BridgeError::TypeDescriptor("frame payload exceeds u32::MAX bytes".into())
    })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed, `bincode`-encoded frame.
pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<T, crate::BridgeError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let mut buf = Vec::new();
        let req = Request::Terminate;
        write_frame(&mut buf, &req).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded: Request = read_frame(&mut cursor).unwrap();
        assert!(matches!(decoded, Request::Terminate));
    }

    #[test]
    fn void_return_is_distinct_from_null_pointer() {
        let void = WireValue::Void;
        let null_ptr = WireValue::Pointer(PointerValue::Null);
        assert_ne!(void, null_ptr);
    }
}
