#![doc = include_str!("../../README.md")]

pub mod binding;
pub mod session;

pub use binding::ClientBinding;
pub use ffi_bridge_core as core;
pub use session::ClientSession;
