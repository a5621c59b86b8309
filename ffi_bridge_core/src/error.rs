//! Error types shared by both sides of the bridge.
//!
//! Mirrors the error kinds a client and server must agree on across the
//! wire (§7 of the design): transport failures are fatal to the session,
//! memsync and type-descriptor failures are per-call and recoverable.

use thiserror::Error;

/// Transport-neutral error kind carried in [`crate::wire::Response::Error`].
///
/// Keep in lockstep with the variants below -- every non-transport error a
/// handler can raise must have a matching wire representation so the far
/// side can re-raise it using its own error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    LibraryLoadError,
    SymbolError,
    TypeDescriptorError,
    MemsyncError,
    NativeCallError,
    TransportError,
}

/// Errors raised while resolving memsync rules against a live argument tree.
#[derive(Debug, Error)]
pub enum MemsyncError {
    #[error("could not resolve path {path:?}: {reason}")]
    PathResolution { path: String, reason: &'static str },

    #[error("computed element count is negative")]
    NegativeLength,

    #[error("wchar buffer length {length} is not a multiple of width {width}")]
    NonMultipleWcharLength { length: usize, width: u8 },

    #[error("wide character narrowed from {old_width} to {new_width} bytes would truncate a non-zero high byte")]
    TruncatingNarrow { old_width: u8, new_width: u8 },

    #[error("memsync rule {0} shares a writable path suffix with an earlier rule")]
    OverlappingRule(usize),
}

/// Top-level error type for `ffi_bridge_core` operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("wire encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error(transparent)]
    Memsync(#[from] MemsyncError),

    #[error("type descriptor error: {0}")]
    TypeDescriptor(String),

    #[error("{kind:?}: {message}")]
    Remote {
        kind: ErrorKind,
        message: String,
        trace: String,
    },
}

impl MemsyncError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::MemsyncError
    }
}
