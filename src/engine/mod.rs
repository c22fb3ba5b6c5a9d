//! Compiler engine abstraction
//!
//! The session never talks to libtcc directly. Every call goes through the
//! [`CompilerEngine`] trait so the backend can be swapped or instrumented:
//!
//! ```text
//! Session ──write lock──▶ dyn CompilerEngine
//!                              │
//!                 ┌────────────┴────────────┐
//!                 ▼                         ▼
//!            TccEngine                 (test engines)
//!         libtcc via libloading
//! ```
//!
//! The trait mirrors the libtcc call surface closely: configuration and
//! compilation return a raw [`Status`], lookups return a nullable address.

pub mod loader;
pub mod tcc;

pub use loader::{TccLibrary, LIBTCC_ENV};
pub use tcc::TccEngine;

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use thiserror::Error;

/// Output mode of a compilation context, fixed when the session is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Compile into memory for inspection only; `run` is unsupported.
    Inspect,
    /// Compile into memory and support running the entry point.
    #[default]
    Execute,
}

impl OutputMode {
    /// Raw value handed to `tcc_set_output_type`.
    ///
    /// `Execute` maps to `TCC_OUTPUT_MEMORY`.
    pub fn raw(self) -> i32 {
        match self {
            OutputMode::Inspect => 0,
            OutputMode::Execute => 1,
        }
    }

    /// Whether sessions in this mode can run compiled code.
    #[inline]
    pub fn can_run(self) -> bool {
        matches!(self, OutputMode::Execute)
    }
}

impl fmt::Display for OutputMode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            OutputMode::Inspect => write!(f, "inspect"),
            OutputMode::Execute => write!(f, "execute"),
        }
    }
}

/// Signed status code as reported by the engine.
///
/// Zero or positive means success, negative means failure. Codes are passed
/// through verbatim; the session never rewrites them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
#[must_use = "engine failures are only reported through the status"]
pub struct Status(i32);

impl Status {
    /// Plain success.
    pub const OK: Status = Status(0);
    /// Generic failure, used when a call cannot reach the engine at all.
    pub const FAILED: Status = Status(-1);

    /// Wrap a raw engine code.
    #[inline]
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// The raw code.
    #[inline]
    pub const fn code(self) -> i32 {
        self.0
    }

    /// `true` for zero or positive codes.
    #[inline]
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// `true` for negative codes.
    #[inline]
    pub const fn is_err(self) -> bool {
        self.0 < 0
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.0
    }
}

impl fmt::Display for Status {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value registered for an external symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolValue {
    /// A host address (function or data).
    Address(usize),
    /// Text whose NUL-terminated bytes become the symbol's storage.
    ///
    /// The buffer is leaked so compiled code may keep referencing it.
    Text(String),
}

impl SymbolValue {
    /// Register a host pointer.
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        SymbolValue::Address(ptr as usize)
    }
}

/// Errors raised while bringing up an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No candidate libtcc could be opened
    #[error("libtcc not found (tried: {})", tried.join(", "))]
    LibraryNotFound {
        /// Every name or path that was attempted
        tried: Vec<String>,
    },

    /// A libtcc file exists but failed to load
    #[error("failed to load libtcc from '{path}': {reason}")]
    LibraryLoad { path: String, reason: String },

    /// A required entry point is missing from the loaded library
    #[error("libtcc is missing '{name}': {reason}")]
    MissingSymbol { name: &'static str, reason: String },

    /// `tcc_new` returned null
    #[error("libtcc failed to create a compilation context")]
    ContextCreation,
}

/// Narrow call surface of a compilation backend.
///
/// Implementations are driven only through `&mut self`, always under the
/// owning session's write lock.
pub trait CompilerEngine: Send + Sync {
    /// Select the output mode. Called once, at session construction.
    fn set_output_type(
        &mut self,
        mode: OutputMode,
    ) -> Status;

    /// Set the directory holding the runtime support library and headers.
    fn set_lib_path(
        &mut self,
        path: &str,
    ) -> Status;

    /// Apply command-line style options, e.g. `-nostdlib -Wall`.
    fn set_options(
        &mut self,
        options: &str,
    ) -> Status;

    /// Define a preprocessor symbol.
    fn define_symbol(
        &mut self,
        name: &str,
        value: &str,
    );

    /// Undefine a preprocessor symbol.
    fn undefine_symbol(
        &mut self,
        name: &str,
    );

    fn add_include_path(
        &mut self,
        path: &str,
    ) -> Status;

    fn add_sysinclude_path(
        &mut self,
        path: &str,
    ) -> Status;

    fn add_library(
        &mut self,
        name: &str,
    ) -> Status;

    fn add_library_path(
        &mut self,
        path: &str,
    ) -> Status;

    /// Add a C source, object, or library file.
    fn add_file(
        &mut self,
        path: &str,
    ) -> Status;

    /// Compile a translation unit from source text.
    fn compile_string(
        &mut self,
        source: &str,
    ) -> Status;

    /// Register an external symbol resolvable by compiled code.
    fn add_symbol(
        &mut self,
        name: &str,
        value: &SymbolValue,
    ) -> Status;

    /// Relocate compiled code into executable memory.
    fn relocate(&mut self) -> Status;

    /// Resolve a symbol after relocation. `None` means null.
    fn get_symbol(
        &mut self,
        name: &str,
    ) -> Option<NonNull<c_void>>;

    /// Run `main` with `argc` and an absent argument vector.
    fn run(
        &mut self,
        argc: i32,
    ) -> Status;

    /// Drain diagnostics reported by the backend since the last call.
    fn take_diagnostics(&mut self) -> Vec<String> {
        Vec::new()
    }
}
