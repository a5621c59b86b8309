//! Raw memory access for the native side of a call.
//!
//! Grounded on `windows_rpc::alloc`'s `midl_alloc`/`midl_free` -- the same
//! "stash a `Layout` header just before the returned pointer" trick, used
//! here to implement [`ffi_bridge_core::memsync::MemoryAccess`] instead of
//! satisfying MIDL's allocator callback contract.

use std::alloc::Layout;
use std::ptr;

use ffi_bridge_core::memsync::MemoryAccess;
use ffi_bridge_core::BridgeError;

pub struct NativeMemory;

impl MemoryAccess for NativeMemory {
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, BridgeError> {
        if address == 0 {
            return Err(BridgeError::TypeDescriptor("read from null address".into()));
        }
        let mut buf = vec![0u8; length];
        unsafe {
            ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), length);
        }
        Ok(buf)
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), BridgeError> {
        if address == 0 {
            return Err(BridgeError::TypeDescriptor("write to null address".into()));
        }
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
        }
        Ok(())
    }

    fn allocate(&mut self, length: usize) -> Result<u64, BridgeError> {
        let length = length.max(1);
        let layout = Layout::from_size_align(length + std::mem::size_of::<Layout>(), std::mem::align_of::<Layout>())
            .map_err(|e| BridgeError::TypeDescriptor(e.to_string()))?;
        unsafe {
            let raw = std::alloc::alloc_zeroed(layout);
            if raw.is_null() {
                return Err(BridgeError::TypeDescriptor("allocation failed".into()));
            }
            raw.cast::<Layout>().write(layout);
            let data = raw.add(std::mem::size_of::<Layout>());
            Ok(data as u64)
        }
    }

    fn read_until_zero(&self, address: u64, unit_width: usize) -> Result<usize, BridgeError> {
        if address == 0 {
            return Err(BridgeError::TypeDescriptor("scan from null address".into()));
        }
        let mut count = 0usize;
        unsafe {
            loop {
                let ptr = (address as *const u8).add(count * unit_width);
                let unit = std::slice::from_raw_parts(ptr, unit_width);
                if unit.iter().all(|&b| b == 0) {
                    return Ok(count);
                }
                count += 1;
            }
        }
    }

    fn wchar_width(&self) -> u8 {
        2
    }
}

/// Frees a buffer previously returned by [`NativeMemory::allocate`].
///
/// Not part of [`MemoryAccess`] since its caller needs to hold onto the
/// address past the point `server_unpack` runs -- `dispatch::call_routine`
/// invokes this once per memsync packet after `server_pack` has read the
/// server's replica back onto the wire, so the replica doesn't outlive the
/// call.
pub unsafe fn free(address: u64) {
    let data = address as *mut u8;
    let header = data.sub(std::mem::size_of::<Layout>());
    let layout = header.cast::<Layout>().read();
    std::alloc::dealloc(header, layout);
}
