#![doc = include_str!("../../README.md")]

pub mod error;
pub mod marshal;
pub mod memsync;
pub mod types;
pub mod wire;

pub use error::{BridgeError, ErrorKind, MemsyncError};
pub use marshal::Marshaller;
pub use memsync::{MemsyncEngine, WideCharPolicy};
pub use types::{AbiKind, Field, LengthOp, LengthSpec, MemsyncRule, PathElement, ScalarName, TypeDescriptor};
pub use wire::{PointerValue, Request, Response, ScalarValue, WireValue};
