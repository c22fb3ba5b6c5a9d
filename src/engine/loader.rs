//! Runtime loading of libtcc.
//!
//! libtcc is opened with `libloading` instead of being linked at build time,
//! so the crate builds on hosts without it and the library can be pointed at
//! with an environment variable. A loaded library is never unloaded: compiled
//! code and every `TCCState` depend on its text staying mapped.

use std::ffi::{c_char, c_int, c_void};

use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;
use tracing::{debug, info};

use super::EngineError;

/// Environment variable naming an explicit libtcc path.
pub const LIBTCC_ENV: &str = "TCC_SESSION_LIBTCC";

#[cfg(target_os = "windows")]
const DEFAULT_NAMES: &[&str] = &["libtcc.dll"];
#[cfg(target_os = "macos")]
const DEFAULT_NAMES: &[&str] = &["libtcc.dylib", "/usr/local/lib/libtcc.dylib", "/opt/homebrew/lib/libtcc.dylib"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_NAMES: &[&str] = &["libtcc.so", "libtcc.so.1", "/usr/lib/libtcc.so", "/usr/local/lib/libtcc.so"];

/// `TCC_RELOCATE_AUTO`: let libtcc allocate the executable image itself.
pub(crate) const RELOCATE_AUTO: *mut c_void = 1 as *mut c_void;

pub(crate) type ErrorFunc = unsafe extern "C" fn(opaque: *mut c_void, msg: *const c_char);

static DEFAULT_LIBRARY: OnceCell<&'static TccLibrary> = OnceCell::new();

/// Entry points resolved from one libtcc image.
pub struct TccLibrary {
    path: String,
    pub(crate) new: unsafe extern "C" fn() -> *mut c_void,
    pub(crate) set_error_func: unsafe extern "C" fn(*mut c_void, *mut c_void, ErrorFunc),
    pub(crate) set_lib_path: unsafe extern "C" fn(*mut c_void, *const c_char),
    pub(crate) set_output_type: unsafe extern "C" fn(*mut c_void, c_int) -> c_int,
    pub(crate) set_options: unsafe extern "C" fn(*mut c_void, *const c_char),
    pub(crate) define_symbol: unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char),
    pub(crate) undefine_symbol: unsafe extern "C" fn(*mut c_void, *const c_char),
    pub(crate) add_include_path: unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int,
    pub(crate) add_sysinclude_path: unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int,
    pub(crate) add_library: unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int,
    pub(crate) add_library_path: unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int,
    pub(crate) add_file: unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int,
    pub(crate) compile_string: unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int,
    pub(crate) add_symbol: unsafe extern "C" fn(*mut c_void, *const c_char, *const c_void) -> c_int,
    pub(crate) relocate: unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int,
    pub(crate) get_symbol: unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut c_void,
    /// libtcc up to 0.9.27 keeps preprocessor and linker state in globals,
    /// so calls that compile, link, or relocate are serialized per library.
    /// Reentrant because compiled code may call back into the host, which
    /// may drive another session on the same thread.
    pub(crate) global: ReentrantMutex<()>,
    _native: libloading::Library,
}

impl std::fmt::Debug for TccLibrary {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TccLibrary").field("path", &self.path).finish()
    }
}

impl TccLibrary {
    /// The process-wide default library.
    ///
    /// Honors [`LIBTCC_ENV`] first, then the platform's usual names. The
    /// result is cached for the life of the process.
    pub fn get() -> Result<&'static TccLibrary, EngineError> {
        DEFAULT_LIBRARY.get_or_try_init(Self::locate).copied()
    }

    /// Load libtcc from an explicit path or soname.
    pub fn load(path: &str) -> Result<&'static TccLibrary, EngineError> {
        let native = unsafe { libloading::Library::new(path) }.map_err(|e| EngineError::LibraryLoad {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let library = Self::resolve(path, native)?;
        info!("loaded libtcc from {}", path);
        Ok(Box::leak(Box::new(library)))
    }

    /// Path or soname the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn locate() -> Result<&'static TccLibrary, EngineError> {
        if let Ok(explicit) = std::env::var(LIBTCC_ENV) {
            return Self::load(&explicit);
        }

        let mut tried = Vec::with_capacity(DEFAULT_NAMES.len());
        for name in DEFAULT_NAMES {
            match Self::load(name) {
                Ok(library) => return Ok(library),
                Err(e) => {
                    debug!("libtcc candidate {} rejected: {}", name, e);
                    tried.push((*name).to_string());
                }
            }
        }
        Err(EngineError::LibraryNotFound { tried })
    }

    fn resolve(
        path: &str,
        native: libloading::Library,
    ) -> Result<Self, EngineError> {
        unsafe {
            Ok(Self {
                path: path.to_string(),
                new: entry(&native, "tcc_new")?,
                set_error_func: entry(&native, "tcc_set_error_func")?,
                set_lib_path: entry(&native, "tcc_set_lib_path")?,
                set_output_type: entry(&native, "tcc_set_output_type")?,
                set_options: entry(&native, "tcc_set_options")?,
                define_symbol: entry(&native, "tcc_define_symbol")?,
                undefine_symbol: entry(&native, "tcc_undefine_symbol")?,
                add_include_path: entry(&native, "tcc_add_include_path")?,
                add_sysinclude_path: entry(&native, "tcc_add_sysinclude_path")?,
                add_library: entry(&native, "tcc_add_library")?,
                add_library_path: entry(&native, "tcc_add_library_path")?,
                add_file: entry(&native, "tcc_add_file")?,
                compile_string: entry(&native, "tcc_compile_string")?,
                add_symbol: entry(&native, "tcc_add_symbol")?,
                relocate: entry(&native, "tcc_relocate")?,
                get_symbol: entry(&native, "tcc_get_symbol")?,
                global: ReentrantMutex::new(()),
                _native: native,
            })
        }
    }
}

/// Copy a function pointer out of the library.
///
/// # Safety
///
/// `T` must match the C signature of `name`.
unsafe fn entry<T: Copy>(
    native: &libloading::Library,
    name: &'static str,
) -> Result<T, EngineError> {
    let symbol = format!("{}\0", name);
    native
        .get::<T>(symbol.as_bytes())
        .map(|sym| *sym)
        .map_err(|e| EngineError::MissingSymbol {
            name,
            reason: e.to_string(),
        })
}
