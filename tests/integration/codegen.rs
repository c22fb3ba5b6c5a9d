//! Inline generator against a session.

use tcc_session::{Declaration, InlineGenerator, OutputMode, Session, SessionError};

use crate::mock_engine::mock_session;

fn fib_generator() -> InlineGenerator {
    let mut gen = InlineGenerator::new();
    gen.add_declaration(Declaration::new("int test1 = 123;").with_forward("extern int test1;").with_symbols(["test1"]));
    gen.add_declaration(Declaration::new("long test2 = 456;").with_forward("extern long test2;").with_symbols(["test2"]));
    gen.add_declaration(Declaration::function(
        "int",
        "fib",
        &[("int", "n")],
        "return n < 2 ? n : fib(n - 1) + fib(n - 2);",
    ));
    gen
}

#[test]
fn test_bind_resolves_in_declaration_order() {
    let (session, _recorder) = mock_session();
    let mut gen = fib_generator();
    assert!(session.compile(&gen.code()).is_ok());
    assert!(session.relocate().is_ok());

    let bound = gen.bind(&session).unwrap();
    let names: Vec<&str> = bound.keys().map(String::as_str).collect();
    assert_eq!(names, ["test1", "test2", "fib"]);
}

#[test]
fn test_bind_is_cached() {
    let (session, recorder) = mock_session();
    let mut gen = fib_generator();
    assert!(session.compile(&gen.code()).is_ok());
    assert!(session.relocate().is_ok());

    let first = gen.bind(&session).unwrap().clone();
    let lookups = recorder.events().len();
    let second = gen.bind(&session).unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(recorder.events().len(), lookups);
    assert_eq!(gen.bound(), Some(&first));
}

#[test]
fn test_bind_fails_on_missing_symbol() {
    let (session, _recorder) = mock_session();
    let mut gen = InlineGenerator::new();
    gen.add_declaration(Declaration::new("/* nothing */").with_symbols(["ghost_symbol"]));
    assert!(session.compile("int present;").is_ok());
    assert!(session.relocate().is_ok());

    let err = gen.bind(&session).unwrap_err();
    assert!(matches!(err, SessionError::SymbolNotFound { ref name } if name == "ghost_symbol"));
    assert!(gen.bound().is_none());
}

#[test]
fn test_generated_code_runs_on_tcc() {
    let session = match Session::tcc(OutputMode::Execute) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("skipping: {}", e);
            return;
        }
    };
    let mut gen = fib_generator();
    let status = session.compile(&gen.code());
    assert!(status.is_ok(), "compile failed:\n{}", gen.code_with_line_numbers());
    assert!(session.relocate().is_ok());

    let bound = gen.bind(&session).unwrap();
    unsafe {
        assert_eq!(bound["test1"].read::<i32>(), 123);
        assert_eq!(bound["test2"].read::<std::ffi::c_long>(), 456);
        let fib: extern "C" fn(i32) -> i32 = bound["fib"].as_fn();
        assert_eq!(fib(10), 55);
    }
}

extern "C" fn host_add(
    a: i32,
    b: i32,
) -> i32 {
    a + b
}

fn callable_generator() -> InlineGenerator {
    let mut gen = InlineGenerator::new();
    gen.add_declaration(unsafe { Declaration::callable("int", "add", &["int", "int"], host_add as *const ()) });
    gen.add_declaration(Declaration::function(
        "int",
        "use_add",
        &[("int", "a"), ("int", "b")],
        "return add(a, b);",
    ));
    gen
}

#[test]
fn test_bind_fills_host_function_slot() {
    let (session, _recorder) = mock_session();
    let mut gen = callable_generator();
    assert!(gen.code().contains("int (*add)(int, int) = 0;"));
    assert!(session.compile(&gen.code()).is_ok());
    assert!(session.relocate().is_ok());

    let bound = gen.bind(&session).unwrap();
    assert_eq!(bound.keys().collect::<Vec<_>>(), ["use_add"]);

    let slot = session.get_symbol("add").unwrap();
    assert_eq!(unsafe { slot.read::<usize>() }, host_add as usize);
}

#[test]
fn test_compiled_code_calls_bound_host_function_on_tcc() {
    let session = match Session::tcc(OutputMode::Execute) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("skipping: {}", e);
            return;
        }
    };
    let mut gen = callable_generator();
    let status = session.compile(&gen.code());
    assert!(status.is_ok(), "compile failed:\n{}", gen.code_with_line_numbers());
    assert!(session.relocate().is_ok());

    let bound = gen.bind(&session).unwrap();
    let use_add: extern "C" fn(i32, i32) -> i32 = unsafe { bound["use_add"].as_fn() };
    assert_eq!(use_add(23, 42), 65);
}
