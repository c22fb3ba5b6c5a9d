//! libtcc-backed engine.
//!
//! A `TccEngine` owns exactly one `TCCState`. The state is never passed to
//! `tcc_delete`: symbol addresses handed out by a session point into memory
//! owned by the state, and nothing tracks how long callers keep them. The
//! state and its executable image therefore live until process exit.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr::{self, NonNull};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::loader::{TccLibrary, RELOCATE_AUTO};
use super::{CompilerEngine, EngineError, OutputMode, Status, SymbolValue};

type MainFn = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;

/// Messages collected from `tcc_set_error_func`.
#[derive(Debug, Default)]
struct DiagnosticSink {
    messages: Mutex<Vec<String>>,
}

unsafe extern "C" fn collect_diagnostic(
    opaque: *mut c_void,
    msg: *const c_char,
) {
    if opaque.is_null() || msg.is_null() {
        return;
    }
    let sink = &*(opaque as *const DiagnosticSink);
    let text = CStr::from_ptr(msg).to_string_lossy().into_owned();
    warn!("tcc: {}", text);
    sink.messages.lock().push(text);
}

/// Engine driving a single libtcc compilation state.
pub struct TccEngine {
    lib: &'static TccLibrary,
    state: NonNull<c_void>,
    diagnostics: &'static DiagnosticSink,
    relocated: bool,
}

// The raw state is only reachable through `&mut self`, which the session
// hands out under its write lock.
unsafe impl Send for TccEngine {}
unsafe impl Sync for TccEngine {}

impl std::fmt::Debug for TccEngine {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TccEngine")
            .field("library", &self.lib.path())
            .field("state", &self.state)
            .finish()
    }
}

impl TccEngine {
    /// Create an engine on the process-wide default libtcc.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_library(TccLibrary::get()?)
    }

    /// Create an engine on an already loaded library.
    pub fn with_library(lib: &'static TccLibrary) -> Result<Self, EngineError> {
        let _global = lib.global.lock();
        let raw = unsafe { (lib.new)() };
        let state = NonNull::new(raw).ok_or(EngineError::ContextCreation)?;

        // Outlives the state, which is never deleted either.
        let diagnostics: &'static DiagnosticSink = Box::leak(Box::default());
        unsafe {
            (lib.set_error_func)(
                state.as_ptr(),
                diagnostics as *const DiagnosticSink as *mut c_void,
                collect_diagnostic,
            );
        }

        Ok(Self {
            lib,
            state,
            diagnostics,
            relocated: false,
        })
    }

    #[inline]
    fn state(&self) -> *mut c_void {
        self.state.as_ptr()
    }

    /// Run `f` with `text` as a C string, or fail when it holds a NUL byte.
    fn with_cstr(
        op: &'static str,
        text: &str,
        f: impl FnOnce(&CStr) -> Status,
    ) -> Status {
        match CString::new(text) {
            Ok(c) => f(&c),
            Err(e) => {
                warn!("{}: argument contains a NUL byte at {}", op, e.nul_position());
                Status::FAILED
            }
        }
    }
}

impl CompilerEngine for TccEngine {
    fn set_output_type(
        &mut self,
        mode: OutputMode,
    ) -> Status {
        let _global = self.lib.global.lock();
        trace!("tcc_set_output_type({})", mode.raw());
        Status::new(unsafe { (self.lib.set_output_type)(self.state(), mode.raw()) })
    }

    fn set_lib_path(
        &mut self,
        path: &str,
    ) -> Status {
        let _global = self.lib.global.lock();
        let state = self.state();
        let set = self.lib.set_lib_path;
        Self::with_cstr("set_lib_path", path, |c| {
            unsafe { set(state, c.as_ptr()) };
            Status::OK
        })
    }

    fn set_options(
        &mut self,
        options: &str,
    ) -> Status {
        let _global = self.lib.global.lock();
        let state = self.state();
        let set = self.lib.set_options;
        Self::with_cstr("set_options", options, |c| {
            unsafe { set(state, c.as_ptr()) };
            Status::OK
        })
    }

    fn define_symbol(
        &mut self,
        name: &str,
        value: &str,
    ) {
        let _global = self.lib.global.lock();
        let (Ok(name), Ok(value)) = (CString::new(name), CString::new(value)) else {
            warn!("define_symbol: argument contains a NUL byte");
            return;
        };
        unsafe { (self.lib.define_symbol)(self.state(), name.as_ptr(), value.as_ptr()) };
    }

    fn undefine_symbol(
        &mut self,
        name: &str,
    ) {
        let _global = self.lib.global.lock();
        let Ok(name) = CString::new(name) else {
            warn!("undefine_symbol: argument contains a NUL byte");
            return;
        };
        unsafe { (self.lib.undefine_symbol)(self.state(), name.as_ptr()) };
    }

    fn add_include_path(
        &mut self,
        path: &str,
    ) -> Status {
        let _global = self.lib.global.lock();
        let (state, f) = (self.state(), self.lib.add_include_path);
        Self::with_cstr("add_include_path", path, |c| Status::new(unsafe { f(state, c.as_ptr()) }))
    }

    fn add_sysinclude_path(
        &mut self,
        path: &str,
    ) -> Status {
        let _global = self.lib.global.lock();
        let (state, f) = (self.state(), self.lib.add_sysinclude_path);
        Self::with_cstr("add_sysinclude_path", path, |c| Status::new(unsafe { f(state, c.as_ptr()) }))
    }

    fn add_library(
        &mut self,
        name: &str,
    ) -> Status {
        let _global = self.lib.global.lock();
        let (state, f) = (self.state(), self.lib.add_library);
        Self::with_cstr("add_library", name, |c| Status::new(unsafe { f(state, c.as_ptr()) }))
    }

    fn add_library_path(
        &mut self,
        path: &str,
    ) -> Status {
        let _global = self.lib.global.lock();
        let (state, f) = (self.state(), self.lib.add_library_path);
        Self::with_cstr("add_library_path", path, |c| Status::new(unsafe { f(state, c.as_ptr()) }))
    }

    fn add_file(
        &mut self,
        path: &str,
    ) -> Status {
        let _global = self.lib.global.lock();
        let (state, f) = (self.state(), self.lib.add_file);
        Self::with_cstr("add_file", path, |c| Status::new(unsafe { f(state, c.as_ptr()) }))
    }

    fn compile_string(
        &mut self,
        source: &str,
    ) -> Status {
        let _global = self.lib.global.lock();
        let (state, f) = (self.state(), self.lib.compile_string);
        Self::with_cstr("compile_string", source, |c| Status::new(unsafe { f(state, c.as_ptr()) }))
    }

    fn add_symbol(
        &mut self,
        name: &str,
        value: &SymbolValue,
    ) -> Status {
        let _global = self.lib.global.lock();
        let address = match value {
            SymbolValue::Address(addr) => *addr as *const c_void,
            SymbolValue::Text(text) => match CString::new(text.as_str()) {
                // Compiled code may read the text at any later time.
                Ok(c) => Box::leak(c.into_boxed_c_str()).as_ptr() as *const c_void,
                Err(_) => {
                    warn!("add_symbol: value for '{}' contains a NUL byte", name);
                    return Status::FAILED;
                }
            },
        };
        let (state, f) = (self.state(), self.lib.add_symbol);
        Self::with_cstr("add_symbol", name, |c| Status::new(unsafe { f(state, c.as_ptr(), address) }))
    }

    fn relocate(&mut self) -> Status {
        let _global = self.lib.global.lock();
        let status = Status::new(unsafe { (self.lib.relocate)(self.state(), RELOCATE_AUTO) });
        self.relocated |= status.is_ok();
        status
    }

    fn get_symbol(
        &mut self,
        name: &str,
    ) -> Option<NonNull<c_void>> {
        let name = CString::new(name).ok()?;
        NonNull::new(unsafe { (self.lib.get_symbol)(self.state(), name.as_ptr()) })
    }

    /// Relocates on first use, then calls `main(argc, NULL)` directly.
    ///
    /// Only relocation needs the library-wide guard; `main` runs without it
    /// so a long-running program does not stall other sessions.
    fn run(
        &mut self,
        argc: i32,
    ) -> Status {
        if !self.relocated {
            let status = self.relocate();
            if status.is_err() {
                return status;
            }
        }
        let Some(main) = self.get_symbol("main") else {
            warn!("run: no 'main' in the relocated image");
            return Status::FAILED;
        };
        let main: MainFn = unsafe { std::mem::transmute::<*mut c_void, MainFn>(main.as_ptr()) };
        trace!("calling main({})", argc);
        Status::new(unsafe { main(argc, ptr::null_mut()) })
    }

    fn take_diagnostics(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.diagnostics.messages.lock())
    }
}
