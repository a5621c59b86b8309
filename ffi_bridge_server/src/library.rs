//! DLL and routine registry.
//!
//! Grounded on `pycrosscall/_server_.py`'s `wine_server_class`: `dll_dict`
//! becomes [`LibraryTable`], `__access_dll__`/`__register_routine__`/
//! `__register_argtype_and_restype__` become the methods below. The
//! original keyed everything by the DLL's Unix-visible path and stored
//! method handlers in a nested dict; here that's a typed `HashMap` of
//! `HashMap`, guarded by nothing beyond "one session, one thread"
//! (spec.md §5) -- no mutex needed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ffi_bridge_core::{AbiKind, MemsyncRule, TypeDescriptor};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library not loaded: {0}")]
    NotLoaded(String),
    #[error("routine not registered: {0}")]
    RoutineNotRegistered(String),
    #[error("failed to load library {path}: {reason}")]
    LoadFailed { path: String, reason: String },
    #[error("symbol not found: {0}")]
    Symbol(String),
}

/// A resolved routine in a loaded library (spec.md §3.2).
#[derive(Debug, Clone)]
pub struct RoutineHandle {
    pub library_key: PathBuf,
    pub name: String,
    pub symbol: usize,
    pub argument_descriptors: Vec<TypeDescriptor>,
    pub return_descriptor: TypeDescriptor,
    pub memsync_rules: Vec<MemsyncRule>,
}

/// A loaded DLL and the routines resolved from it so far (spec.md §3.2).
pub struct LibraryEntry {
    pub windows_path: String,
    pub posix_path: PathBuf,
    pub abi: AbiKind,
    handle: NativeLibrary,
    pub routines: HashMap<String, RoutineHandle>,
}

pub struct LibraryTable {
    libraries: HashMap<PathBuf, LibraryEntry>,
}

impl LibraryTable {
    pub fn new() -> Self {
        Self {
            libraries: HashMap::new(),
        }
    }

    /// Loads `windows_path` if `posix_path` is not already known
    /// (idempotent, matching `__access_dll__`'s "should happen only once
    /// per dll, lets be on the safe side").
    #[instrument(skip(self))]
    pub fn access_dll(
        &mut self,
        windows_path: String,
        posix_path: PathBuf,
        name: String,
        abi: AbiKind,
    ) -> Result<(), LibraryError> {
        if self.libraries.contains_key(&posix_path) {
            return Ok(());
        }
        info!(dll = %name, path = %windows_path, "loading library");
        let handle = NativeLibrary::load(&windows_path).map_err(|reason| LibraryError::LoadFailed {
            path: windows_path.clone(),
            reason,
        })?;
        self.libraries.insert(
            posix_path.clone(),
            LibraryEntry {
                windows_path,
                posix_path,
                abi,
                handle,
                routines: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Resolves `routine_name`'s symbol address, storing an empty
    /// descriptor set until `register_argtype_and_restype` fills it in
    /// (spec.md §3.2, §4.1).
    #[instrument(skip(self))]
    pub fn register_routine(&mut self, posix_path: &Path, routine_name: String) -> Result<(), LibraryError> {
        let entry = self
            .libraries
            .get_mut(posix_path)
            .ok_or_else(|| LibraryError::NotLoaded(posix_path.display().to_string()))?;
        if entry.routines.contains_key(&routine_name) {
            return Ok(());
        }
        let symbol = entry
            .handle
            .symbol(&routine_name)
            .ok_or_else(|| LibraryError::Symbol(routine_name.clone()))?;
        entry.routines.insert(
            routine_name.clone(),
            RoutineHandle {
                library_key: posix_path.to_path_buf(),
                name: routine_name,
                symbol,
                argument_descriptors: Vec::new(),
                return_descriptor: TypeDescriptor::Void,
                memsync_rules: Vec::new(),
            },
        );
        Ok(())
    }

    #[instrument(skip(self, argument_descriptors, return_descriptor, memsync_rules))]
    pub fn register_argtype_and_restype(
        &mut self,
        posix_path: &Path,
        routine_name: &str,
        argument_descriptors: Vec<TypeDescriptor>,
        return_descriptor: TypeDescriptor,
        memsync_rules: Vec<MemsyncRule>,
    ) -> Result<(), LibraryError> {
        let routine = self
            .libraries
            .get_mut(posix_path)
            .ok_or_else(|| LibraryError::NotLoaded(posix_path.display().to_string()))?
            .routines
            .get_mut(routine_name)
            .ok_or_else(|| LibraryError::RoutineNotRegistered(routine_name.to_string()))?;
        routine.argument_descriptors = argument_descriptors;
        routine.return_descriptor = return_descriptor;
        routine.memsync_rules = memsync_rules;
        Ok(())
    }

    pub fn routine(&self, posix_path: &Path, routine_name: &str) -> Result<&RoutineHandle, LibraryError> {
        self.libraries
            .get(posix_path)
            .ok_or_else(|| LibraryError::NotLoaded(posix_path.display().to_string()))?
            .routines
            .get(routine_name)
            .ok_or_else(|| LibraryError::RoutineNotRegistered(routine_name.to_string()))
    }

    pub fn abi_of(&self, posix_path: &Path) -> Result<AbiKind, LibraryError> {
        Ok(self
            .libraries
            .get(posix_path)
            .ok_or_else(|| LibraryError::NotLoaded(posix_path.display().to_string()))?
            .abi)
    }
}

impl Default for LibraryTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Narrowed from the teacher's `windows::Win32::System::Rpc` usage down
/// to just `Win32_System_LibraryLoader` -- this is the one place in the
/// whole workspace that actually needs to run on Windows/Wine, since
/// `LoadLibraryW`/`GetProcAddress`/`FreeLibrary` have no portable
/// equivalent.
#[cfg(windows)]
mod native {
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::{FreeLibrary, GetProcAddress, LoadLibraryW};
    use windows::core::{HSTRING, PCSTR};

    pub struct NativeLibrary {
        module: HMODULE,
    }

    impl NativeLibrary {
        pub fn load(windows_path: &str) -> Result<Self, String> {
            let module = unsafe { LoadLibraryW(&HSTRING::from(windows_path)) }.map_err(|e| e.to_string())?;
            Ok(Self { module })
        }

        pub fn symbol(&self, name: &str) -> Option<usize> {
            let mut name_bytes = name.as_bytes().to_vec();
            name_bytes.push(0);
            let proc = unsafe { GetProcAddress(self.module, PCSTR(name_bytes.as_ptr())) };
            proc.map(|p| p as usize)
        }
    }

    impl Drop for NativeLibrary {
        fn drop(&mut self) {
            unsafe {
                let _ = FreeLibrary(self.module);
            }
        }
    }
}

/// Off-Windows builds (e.g. documentation builds on the Unix side of this
/// workspace) have no DLL loader to call into; every operation fails
/// loudly instead of silently no-opping.
#[cfg(not(windows))]
mod native {
    pub struct NativeLibrary;

    impl NativeLibrary {
        pub fn load(_windows_path: &str) -> Result<Self, String> {
            Err("ffi_bridge_server must run under Windows/Wine to load a DLL".into())
        }

        pub fn symbol(&self, _name: &str) -> Option<usize> {
            None
        }
    }
}

use native::NativeLibrary;
