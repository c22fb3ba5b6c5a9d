//! Instrumented engine for concurrency tests.
//!
//! Every call records `Begin`/`End` events and tracks how many calls are in
//! flight, both per engine and across every engine sharing a [`Recorder`].
//! Source markers drive behavior:
//! - `SLOW` holds the call for [`SLOW_CALL`]
//! - `#error` fails the compile with -1
//! - `PANIC` panics inside the engine

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tcc_session::{CompilerEngine, OutputMode, Session, Status, SymbolValue};

pub const SLOW_CALL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin(String),
    End(String),
}

/// Shared observation point for one or more engines.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Mutex<Vec<Event>>,
    pub sources: Mutex<Vec<String>>,
    pub defines: Mutex<HashMap<String, String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest number of engine calls observed in flight at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Position of the first event equal to `event`.
    pub fn position(
        &self,
        event: &Event,
    ) -> usize {
        self.events
            .lock()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event {:?} not recorded", event))
    }

    fn enter(
        self: &Arc<Self>,
        label: String,
    ) -> CallGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.events.lock().push(Event::Begin(label.clone()));
        CallGuard {
            recorder: Arc::clone(self),
            label,
        }
    }
}

struct CallGuard {
    recorder: Arc<Recorder>,
    label: String,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.recorder.events.lock().push(Event::End(std::mem::take(&mut self.label)));
        self.recorder.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Assert that events come in strict `Begin(x)`, `End(x)` pairs.
pub fn assert_serialized(events: &[Event]) {
    assert_eq!(events.len() % 2, 0, "unbalanced events: {:?}", events);
    for pair in events.chunks(2) {
        match pair {
            [Event::Begin(a), Event::End(b)] if a == b => {}
            _ => panic!("interleaved engine calls: {:?}", events),
        }
    }
}

pub struct MockEngine {
    recorder: Arc<Recorder>,
    symbols: HashMap<String, Box<u64>>,
}

impl MockEngine {
    pub fn new(recorder: &Arc<Recorder>) -> Self {
        Self {
            recorder: Arc::clone(recorder),
            symbols: HashMap::new(),
        }
    }
}

/// Execute-mode session over a fresh mock engine.
pub fn mock_session() -> (Session, Arc<Recorder>) {
    let recorder = Recorder::new();
    let session = Session::new(Box::new(MockEngine::new(&recorder)), OutputMode::Execute);
    (session, recorder)
}

impl CompilerEngine for MockEngine {
    fn set_output_type(
        &mut self,
        _mode: OutputMode,
    ) -> Status {
        Status::OK
    }

    fn set_lib_path(
        &mut self,
        path: &str,
    ) -> Status {
        let _call = self.recorder.enter(format!("set_lib_path {}", path));
        Status::OK
    }

    fn set_options(
        &mut self,
        _options: &str,
    ) -> Status {
        Status::OK
    }

    fn define_symbol(
        &mut self,
        name: &str,
        value: &str,
    ) {
        let _call = self.recorder.enter(format!("define {}", name));
        self.recorder.defines.lock().insert(name.to_string(), value.to_string());
    }

    fn undefine_symbol(
        &mut self,
        name: &str,
    ) {
        let _call = self.recorder.enter(format!("undefine {}", name));
        self.recorder.defines.lock().remove(name);
    }

    fn add_include_path(
        &mut self,
        _path: &str,
    ) -> Status {
        Status::OK
    }

    fn add_sysinclude_path(
        &mut self,
        _path: &str,
    ) -> Status {
        Status::OK
    }

    fn add_library(
        &mut self,
        _name: &str,
    ) -> Status {
        Status::OK
    }

    fn add_library_path(
        &mut self,
        _path: &str,
    ) -> Status {
        Status::OK
    }

    fn add_file(
        &mut self,
        _path: &str,
    ) -> Status {
        Status::FAILED
    }

    fn compile_string(
        &mut self,
        source: &str,
    ) -> Status {
        let _call = self.recorder.enter(format!("compile {}", source));
        if source.contains("SLOW") {
            thread::sleep(SLOW_CALL);
        }
        if source.contains("PANIC") {
            panic!("engine blew up");
        }
        if source.contains("#error") {
            return Status::new(-1);
        }
        self.recorder.sources.lock().push(source.to_string());
        for ident in source.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if !ident.is_empty() {
                self.symbols.entry(ident.to_string()).or_insert_with(|| Box::new(0));
            }
        }
        Status::OK
    }

    fn add_symbol(
        &mut self,
        _name: &str,
        _value: &SymbolValue,
    ) -> Status {
        Status::OK
    }

    fn relocate(&mut self) -> Status {
        let _call = self.recorder.enter("relocate".to_string());
        Status::OK
    }

    fn get_symbol(
        &mut self,
        name: &str,
    ) -> Option<NonNull<c_void>> {
        let _call = self.recorder.enter(format!("get_symbol {}", name));
        self.symbols.get_mut(name).map(|b| NonNull::from(b.as_mut()).cast())
    }

    fn run(
        &mut self,
        _argc: i32,
    ) -> Status {
        let _call = self.recorder.enter("run".to_string());
        Status::new(42)
    }
}
