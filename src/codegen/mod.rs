//! Inline C code generation
//!
//! Assembles a translation unit from [`Declaration`]s and resolves the
//! symbols they export once the session has been relocated. Binding works in
//! both directions: compiled functions and data are looked up for the host,
//! and host functions declared with [`Declaration::callable`] are written
//! into function-pointer slots for compiled code.
//!
//! # Layout
//!
//! ```text
//! /* top */       headers and typedefs
//!
//! /* forward */   prototypes, so declarations may reference each other
//!
//! /* code */      definitions
//! ```

use indexmap::IndexMap;
use tracing::debug;

use crate::session::{Session, SessionResult, SymbolHandle};

const BASIC_INCLUDES: &str = "#include <stddef.h>\n#include <stdint.h>\n#include <stdbool.h>";

const BASIC_TYPEDEFS: &str = "typedef int8_t int8;
typedef int16_t int16;
typedef int32_t int32;
typedef int64_t int64;
typedef uint8_t uint8;
typedef uint16_t uint16;
typedef uint32_t uint32;
typedef uint64_t uint64;
typedef void* Object;
typedef char* CString;
typedef wchar_t* WCString;
typedef unsigned char byte;
typedef unsigned char uchar;
typedef unsigned short ushort;
typedef unsigned int uint;
typedef unsigned long ulong;
typedef long long longlong;
typedef unsigned long long ulonglong;";

/// A piece of C code with its forward declaration and exported symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declaration {
    /// Definition text
    pub code: String,
    /// Prototype text placed in the forward section
    pub forward: String,
    /// Names to resolve after relocation
    pub symbols: Vec<String>,
    /// Function-pointer slots to fill with host addresses at bind time
    pub host_functions: Vec<(String, usize)>,
}

impl Declaration {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn with_forward(
        mut self,
        forward: impl Into<String>,
    ) -> Self {
        self.forward = forward.into();
        self
    }

    pub fn with_symbols<I, S>(
        mut self,
        symbols: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    /// Build a C function definition plus its prototype, exporting `name`.
    ///
    /// `params` are `(type, name)` pairs.
    pub fn function(
        restype: &str,
        name: &str,
        params: &[(&str, &str)],
        body: &str,
    ) -> Self {
        let params = params
            .iter()
            .map(|(ty, var)| format!("{} {}", ty, var))
            .collect::<Vec<_>>()
            .join(", ");
        let header = format!("{} {}({})", restype, name, params);
        Self {
            code: format!("{}\n{{\n{}\n}}\n", header, body),
            forward: format!("{};", header),
            symbols: vec![name.to_string()],
            host_functions: Vec::new(),
        }
    }

    /// Declare a function-pointer slot `name` that [`InlineGenerator::bind`]
    /// points at `host_fn`, so compiled code can call into the host.
    ///
    /// `params` are parameter types only. The slot is not part of the bound
    /// symbol map.
    ///
    /// # Safety
    ///
    /// `host_fn` must be an `extern "C"` function whose signature matches
    /// `restype name(params)`, and it must stay valid for as long as compiled
    /// code may call it.
    pub unsafe fn callable(
        restype: &str,
        name: &str,
        params: &[&str],
        host_fn: *const (),
    ) -> Self {
        Self {
            code: String::new(),
            forward: format!("{} (*{})({}) = 0;", restype, name, params.join(", ")),
            symbols: Vec::new(),
            host_functions: vec![(name.to_string(), host_fn as usize)],
        }
    }
}

/// Collects declarations into one compilable source.
#[derive(Debug, Default)]
pub struct InlineGenerator {
    header_parts: Vec<String>,
    parts: Vec<Declaration>,
    bound: Option<IndexMap<String, SymbolHandle>>,
}

impl InlineGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the standard fixed-width includes and the short typedef names.
    pub fn load_basic_types(&mut self) {
        self.add_top_declaration(&Declaration::new(BASIC_INCLUDES));
        self.add_top_declaration(&Declaration::new(BASIC_TYPEDEFS));
    }

    /// Append to the top section. Only the declaration's code is used.
    pub fn add_top_declaration(
        &mut self,
        decl: &Declaration,
    ) {
        self.header_parts.push(decl.code.clone());
    }

    pub fn add_declaration(
        &mut self,
        decl: Declaration,
    ) {
        self.parts.push(decl);
    }

    /// The generated translation unit.
    pub fn code(&self) -> String {
        let top = self.header_parts.join("\n");
        let forward = self
            .parts
            .iter()
            .map(|d| d.forward.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let code = self
            .parts
            .iter()
            .map(|d| d.code.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        ["/* top */", &top, "", "/* forward */", &forward, "", "/* code */", &code, ""].join("\n")
    }

    /// [`code`](Self::code) with right-aligned line numbers, for error reports.
    pub fn code_with_line_numbers(&self) -> String {
        let code = self.code();
        let lines: Vec<&str> = code.split('\n').collect();
        let width = lines.len().to_string().len();
        lines
            .iter()
            .enumerate()
            .map(|(idx, line)| format!("{:>width$}: {}", idx + 1, line, width = width))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resolve every declared symbol against a relocated session and fill
    /// the slots of [`callable`](Declaration::callable) declarations.
    ///
    /// The first successful call caches the map; later calls return it
    /// without touching the session.
    pub fn bind(
        &mut self,
        session: &Session,
    ) -> SessionResult<&IndexMap<String, SymbolHandle>> {
        if self.bound.is_none() {
            let mut resolved = IndexMap::new();
            for name in self.parts.iter().flat_map(|d| d.symbols.iter()) {
                resolved.insert(name.clone(), session.get_symbol(name)?);
            }
            for (name, host_fn) in self.parts.iter().flat_map(|d| d.host_functions.iter()) {
                let slot = session.get_symbol(name)?;
                // The slot is the pointer variable emitted by `callable`.
                unsafe { slot.write::<usize>(*host_fn) };
            }
            debug!("bound {} inline symbols in session {}", resolved.len(), session.id());
            self.bound = Some(resolved);
        }
        Ok(self.bound.get_or_insert_with(IndexMap::new))
    }

    /// Symbols resolved by the last [`bind`](Self::bind), if any.
    pub fn bound(&self) -> Option<&IndexMap<String, SymbolHandle>> {
        self.bound.as_ref()
    }
}
