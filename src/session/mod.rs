//! Compilation sessions
//!
//! A [`Session`] owns one engine context behind a `parking_lot::RwLock`.
//! Every operation that touches the context takes the write side for its
//! whole duration, including lookups and `run`, so sync calls from any thread
//! and async compiles on the pool are strictly serialized:
//!
//! ```text
//! configure → compile / compile_async → relocate → get_symbol / run
//!                     │
//!            all under Shared::engine.write()
//! ```
//!
//! # Lifetime
//!
//! The engine context is never destroyed. Symbol handles may be copied
//! anywhere and nothing counts them, so the compiled image stays mapped until
//! the process exits. A session is meant to be compiled once and called many
//! times; fresh code needs a fresh session.

pub mod dispatch;
pub mod error;
pub mod symbol;


pub use dispatch::{CompileOutcome, Completion, Delivery};
pub use error::{DispatchError, SessionError, SessionResult};
pub use symbol::SymbolHandle;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::engine::{CompilerEngine, OutputMode, Status, SymbolValue, TccEngine};
use crate::util::config::SessionConfig;
use dispatch::{Dispatcher, PendingCompile};

/// Options applied at construction on hosts where in-memory code cannot
/// pull in shared libraries.
const NO_DYNAMIC_LINK_OPTIONS: &str = "-nostdlib";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Whether relocated code on this host can resolve against shared libraries.
///
/// When it cannot, sessions skip the standard runtime library and any code
/// that needs external shared objects fails to resolve.
pub const fn host_supports_dynamic_linking() -> bool {
    !cfg!(any(target_os = "macos", target_os = "ios"))
}

/// State shared between a session and its in-flight work units.
pub(crate) struct Shared {
    id: u64,
    mode: OutputMode,
    engine: RwLock<Box<dyn CompilerEngine>>,
}

impl Shared {
    /// Run `f` against the engine under the write lock.
    fn with_engine<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut dyn CompilerEngine) -> R,
    ) -> R {
        let mut engine = self.engine.write();
        debug!(session = self.id, op, "engine call");
        f(engine.as_mut())
    }

    fn checked(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut dyn CompilerEngine) -> Status,
    ) -> Status {
        let status = self.with_engine(op, f);
        if status.is_err() {
            warn!(session = self.id, op, status = status.code(), "engine reported failure");
        }
        status
    }
}

/// A thread-safe compilation context.
pub struct Session {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for Session {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("mode", &self.shared.mode)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl Session {
    /// Wrap an engine with one compile worker and worker-side delivery.
    pub fn new(
        engine: Box<dyn CompilerEngine>,
        mode: OutputMode,
    ) -> Self {
        Self::with_dispatch(engine, mode, 1, Delivery::Worker)
    }

    /// Wrap an engine with an explicit compile pool size and delivery mode.
    pub fn with_dispatch(
        mut engine: Box<dyn CompilerEngine>,
        mode: OutputMode,
        workers: usize,
        delivery: Delivery,
    ) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);

        let status = engine.set_output_type(mode);
        if status.is_err() {
            warn!(session = id, %mode, status = status.code(), "engine rejected output mode");
        }
        if !host_supports_dynamic_linking() {
            debug!(session = id, "host lacks dynamic linking, applying {}", NO_DYNAMIC_LINK_OPTIONS);
            let status = engine.set_options(NO_DYNAMIC_LINK_OPTIONS);
            if status.is_err() {
                warn!(session = id, status = status.code(), "engine rejected {}", NO_DYNAMIC_LINK_OPTIONS);
            }
        }

        info!(session = id, %mode, workers, ?delivery, "session created");
        Self {
            shared: Arc::new(Shared {
                id,
                mode,
                engine: RwLock::new(engine),
            }),
            dispatcher: Dispatcher::new(id, mode, workers, delivery),
        }
    }

    /// Session on the default libtcc.
    pub fn tcc(mode: OutputMode) -> SessionResult<Self> {
        Ok(Self::new(Box::new(TccEngine::new()?), mode))
    }

    /// Session on the default libtcc, configured from `config`.
    pub fn tcc_with_config(config: &SessionConfig) -> SessionResult<Self> {
        Self::with_config(Box::new(TccEngine::new()?), config)
    }

    /// Build a session and apply `config` in order: lib path, options,
    /// include paths, system include paths, library paths, libraries,
    /// defines. Stops at the first failing step.
    pub fn with_config(
        engine: Box<dyn CompilerEngine>,
        config: &SessionConfig,
    ) -> SessionResult<Self> {
        let session = Self::with_dispatch(engine, config.mode, config.workers, config.delivery);

        let step = |name: &str, arg: &str, status: Status| -> SessionResult<()> {
            if status.is_err() {
                return Err(SessionError::Configure {
                    step: format!("{}({})", name, arg),
                    status,
                });
            }
            Ok(())
        };

        if let Some(lib_path) = &config.lib_path {
            let lib_path = lib_path.to_string_lossy();
            step("set_lib_path", &lib_path, session.set_lib_path(&lib_path))?;
        }
        if let Some(options) = &config.options {
            step("set_options", options, session.set_options(options))?;
        }
        for path in &config.include_paths {
            let path = path.to_string_lossy();
            step("add_include_path", &path, session.add_include_path(&path))?;
        }
        for path in &config.sysinclude_paths {
            let path = path.to_string_lossy();
            step("add_sysinclude_path", &path, session.add_sysinclude_path(&path))?;
        }
        for path in &config.library_paths {
            let path = path.to_string_lossy();
            step("add_library_path", &path, session.add_library_path(&path))?;
        }
        for library in &config.libraries {
            step("add_library", library, session.add_library(library))?;
        }
        for (name, value) in &config.defines {
            session.define_symbol(name, value);
        }

        Ok(session)
    }

    /// Process-unique id, used in log fields and worker names.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Output mode chosen at construction.
    pub fn mode(&self) -> OutputMode {
        self.shared.mode
    }

    pub fn set_lib_path(
        &self,
        path: &str,
    ) -> Status {
        self.shared.checked("set_lib_path", |e| e.set_lib_path(path))
    }

    pub fn set_options(
        &self,
        options: &str,
    ) -> Status {
        self.shared.checked("set_options", |e| e.set_options(options))
    }

    /// Define a preprocessor macro. Later definitions of the same name win.
    pub fn define_symbol(
        &self,
        name: &str,
        value: &str,
    ) {
        self.shared.with_engine("define_symbol", |e| e.define_symbol(name, value))
    }

    pub fn undefine_symbol(
        &self,
        name: &str,
    ) {
        self.shared.with_engine("undefine_symbol", |e| e.undefine_symbol(name))
    }

    pub fn add_include_path(
        &self,
        path: &str,
    ) -> Status {
        self.shared.checked("add_include_path", |e| e.add_include_path(path))
    }

    pub fn add_sysinclude_path(
        &self,
        path: &str,
    ) -> Status {
        self.shared.checked("add_sysinclude_path", |e| e.add_sysinclude_path(path))
    }

    pub fn add_library(
        &self,
        name: &str,
    ) -> Status {
        self.shared.checked("add_library", |e| e.add_library(name))
    }

    pub fn add_library_path(
        &self,
        path: &str,
    ) -> Status {
        self.shared.checked("add_library_path", |e| e.add_library_path(path))
    }

    /// Add a C source, object, or archive to the translation.
    pub fn add_file(
        &self,
        path: &str,
    ) -> Status {
        self.shared.checked("add_file", |e| e.add_file(path))
    }

    /// Compile source text. May be called repeatedly before [`relocate`](Self::relocate).
    pub fn compile_string(
        &self,
        source: &str,
    ) -> Status {
        self.shared.checked("compile_string", |e| e.compile_string(source))
    }

    /// Alias of [`compile_string`](Self::compile_string).
    #[inline]
    pub fn compile(
        &self,
        source: &str,
    ) -> Status {
        self.compile_string(source)
    }

    /// Compile on the session's worker pool.
    ///
    /// `source` is copied before this returns, so the caller may reuse its
    /// buffer immediately. `on_complete` runs exactly once, on the worker or
    /// in [`deliver_completions`](Self::deliver_completions) depending on the
    /// session's [`Delivery`]. Rejections (inspect-only session, missing
    /// pool) arrive the same way, never as a return value and never on this
    /// call's stack. A panicking `on_complete` is logged and contained.
    pub fn compile_async<F>(
        &self,
        source: &str,
        on_complete: F,
    ) where
        F: FnOnce(CompileOutcome) + Send + 'static,
    {
        let unit = PendingCompile::new(source, Box::new(on_complete));
        self.dispatcher.submit(&self.shared, unit);
    }

    /// Future-returning form of [`compile_async`](Self::compile_async).
    ///
    /// With [`Delivery::Queued`] the future only resolves once some thread
    /// calls [`deliver_completions`](Self::deliver_completions).
    pub fn compile_async_future(
        &self,
        source: &str,
    ) -> impl Future<Output = CompileOutcome> + Send + 'static {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.compile_async(source, move |outcome| {
            let _ = tx.send(outcome);
        });
        async move {
            rx.await
                .unwrap_or_else(|_| CompileOutcome::rejected(DispatchError::Abandoned))
        }
    }

    /// Run queued completions on the calling thread. Returns how many ran.
    ///
    /// Only meaningful with [`Delivery::Queued`].
    pub fn deliver_completions(&self) -> usize {
        self.dispatcher.drain()
    }

    /// Like [`deliver_completions`](Self::deliver_completions) but waits up
    /// to `timeout` for the first completion.
    pub fn deliver_completions_timeout(
        &self,
        timeout: Duration,
    ) -> usize {
        self.dispatcher.drain_timeout(timeout)
    }

    /// Delivery mode chosen at construction.
    pub fn delivery(&self) -> Delivery {
        self.dispatcher.delivery()
    }

    /// Relocate compiled code into executable memory.
    ///
    /// Call once, after every compile. Relocating before a successful
    /// compile, or twice, is left to the engine to reject.
    pub fn relocate(&self) -> Status {
        self.shared.checked("relocate", |e| e.relocate())
    }

    /// Register an external symbol for compiled code to link against.
    pub fn add_symbol(
        &self,
        name: &str,
        value: SymbolValue,
    ) -> Status {
        self.shared.checked("add_symbol", |e| e.add_symbol(name, &value))
    }

    /// Resolve `name` in the relocated image.
    ///
    /// Only valid after [`relocate`](Self::relocate).
    pub fn get_symbol(
        &self,
        name: &str,
    ) -> SessionResult<SymbolHandle> {
        self.shared
            .with_engine("get_symbol", |e| e.get_symbol(name))
            .map(SymbolHandle::new)
            .ok_or_else(|| {
                debug!(session = self.shared.id, name, "symbol not found");
                SessionError::SymbolNotFound { name: name.to_string() }
            })
    }

    /// Run `main(argc, NULL)` and return its exit status.
    ///
    /// The engine relocates first when [`relocate`](Self::relocate) has not
    /// been called yet. Inspect-only sessions fail without reaching the engine.
    pub fn run(
        &self,
        argc: i32,
    ) -> Status {
        if !self.shared.mode.can_run() {
            warn!(session = self.shared.id, "run called on an inspect-only session");
            return Status::FAILED;
        }
        self.shared.with_engine("run", |e| e.run(argc))
    }

    /// Drain diagnostics the engine reported since the last call.
    pub fn take_diagnostics(&self) -> Vec<String> {
        self.shared.with_engine("take_diagnostics", |e| e.take_diagnostics())
    }
}
