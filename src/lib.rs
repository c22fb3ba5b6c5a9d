//! tcc-session
//!
//! Thread-safe sessions around libtcc: compile C source into process memory,
//! relocate it, then read its data or call its functions.
//!
//! # Example
//!
//! ```no_run
//! use tcc_session::{OutputMode, Session};
//!
//! fn main() -> tcc_session::Result<()> {
//!     let session = Session::tcc(OutputMode::Execute)?;
//!     if session.compile("int answer(void) { return 42; }").is_err() || session.relocate().is_err() {
//!         anyhow::bail!("compile failed: {}", session.take_diagnostics().join("; "));
//!     }
//!
//!     let answer = session.get_symbol("answer")?;
//!     let answer: extern "C" fn() -> i32 = unsafe { answer.as_fn() };
//!     assert_eq!(answer(), 42);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - `engine`: the [`CompilerEngine`] call surface and its libtcc binding
//! - `session`: locking, async dispatch, symbol handles
//! - `codegen`: inline declaration generator
//! - `util`: configuration and logging

#![doc(html_root_url = "https://docs.rs/tcc-session")]
#![warn(rust_2018_idioms)]

pub mod codegen;
pub mod engine;
pub mod session;
pub mod util;

pub use anyhow::{Context, Result};

pub use codegen::{Declaration, InlineGenerator};
pub use engine::{CompilerEngine, EngineError, OutputMode, Status, SymbolValue, TccEngine, TccLibrary};
pub use session::{
    CompileOutcome, Delivery, DispatchError, Session, SessionError, SessionResult, SymbolHandle,
};
pub use util::config::SessionConfig;

use std::path::Path;

use tracing::debug;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "tcc-session";

/// Compile a C file in a fresh execute-mode session and run its `main`.
///
/// Returns `main`'s exit status. Compiler diagnostics are logged.
pub fn run_file(
    path: &Path,
    config: &SessionConfig,
) -> Result<i32> {
    let mut config = config.clone();
    config.mode = OutputMode::Execute;
    let session = Session::tcc_with_config(&config).context("Failed to create session")?;

    let path_str = path.to_string_lossy();
    debug!("running {}", path_str);
    let status = session.add_file(&path_str);
    if status.is_err() {
        anyhow::bail!(
            "Failed to compile {} (status {}): {}",
            path.display(),
            status,
            session.take_diagnostics().join("; ")
        );
    }
    Ok(session.run(0).code())
}
